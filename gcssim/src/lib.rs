//! GCS Autopilot Simulator (gcssim)
//!
//! A simulated vehicle for exercising the ground protocol engine, usable
//! in-process over channels or as a UDP server.

pub mod autopilot;
pub mod runner;

pub use autopilot::*;
pub use runner::*;
