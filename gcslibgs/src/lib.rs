//! GCS Ground/Vehicle Library (gcslibgs)
//!
//! This library contains definitions shared between the ground protocol
//! engine (gcslib) and vehicle-side software such as the simulator (gcssim).

pub mod types;
pub mod messages;
pub mod mission;
pub mod protocol;
pub mod error;

pub use types::*;
pub use messages::*;
pub use mission::*;
pub use protocol::*;
pub use error::*;
