//! This crate provides a polling Modbus RTU master for the Sinilink XY6020L programmable power supply.
//!
//! It supports `no-std` environments; enable the `std` feature to build against the standard library.
//!
//! Rather than blocking on each request, the driver keeps a local mirror of the PSU's holding
//! registers and refreshes it in the background. The application calls [`XyPsu::tick`] from its
//! main loop with a millisecond timestamp, reads values from the cache and queues writes, which
//! go out one at a time with enough spacing for the PSU to keep up.
//!
//! Other PSU models which share the register map may work too:
//! * XY6506
//! * XY6509
//! * XY-SK60S
//! * XY-SK120S
//!
//! The serial port used for PSU comms should be configured like so:
//! * Default baud rate: 115200
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod preset;
pub mod psu;
pub mod queue;
pub mod register;
pub mod transaction;

#[cfg(test)]
mod mock_serial;

pub use config::{DriverConfig, DriverOptions};
pub use error::{Error, Result};
pub use preset::{PagerState, PresetBank, PresetBankBuilder, PresetGroup};
pub use psu::{DriverStats, Instant, XyPsu};
pub use queue::PendingWrite;
pub use register::{State, XyRegister};
pub use transaction::Response;
