pub mod pacing;
pub mod worker;

pub use pacing::*;
pub use worker::*;
