//! Wire types shared between the relay and its HTTP signaling clients.

pub mod messages;
pub mod types;

pub use messages::*;
pub use types::*;
