//! GCS Ground Library (gcslib)
//!
//! Reliable command and mission transfer between a ground station and a
//! vehicle autopilot. All protocol state lives on one dispatch thread;
//! `GcsClient` is the public face.

pub mod bridge;
pub mod client;
pub mod command;
pub mod config;
pub mod engine;
pub mod link;
pub mod mission;
pub mod notify;
pub mod system;
pub mod timer;

pub use client::*;
pub use command::*;
pub use config::*;
pub use link::*;
pub use mission::*;
pub use notify::*;
pub use gcslibgs::*;
