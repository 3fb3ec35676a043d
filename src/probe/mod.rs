pub mod dns;
pub mod packet;
pub mod socket;
pub mod transmit;

pub use dns::*;
pub use packet::*;
pub use socket::*;
pub use transmit::*;
