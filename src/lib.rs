//! Hitron - remote diagnosis and reboot recovery for Hitron cable routers
//!
//! Logs in to the router's web UI, reads its status pages, runs ping tests
//! from the router itself and, when the line is down, reboots it and follows
//! it back through DOCSIS registration and GRE tunnel negotiation.

pub mod config;
pub mod device;
pub mod diag;
pub mod error;
pub mod http;
pub mod models;
pub mod parser;
pub mod poll;
pub mod reboot;
pub mod session;
pub mod telemetry;
pub mod utils;

#[cfg(test)]
mod testing;

pub use device::Device;
pub use error::{DeviceError, DeviceResult};
