pub mod counters;
pub mod ratelimit;

pub use counters::*;
pub use ratelimit::*;
