//! limbhub - orchestration core for an nRF52840 prosthetic controller.
//!
//! Every subsystem is a pure state machine (host-testable, time passed in
//! as milliseconds) plus a thin Embassy task that feeds it bus events and
//! timer expiries. The tasks only exist with the `embedded` feature.
//!
//! Usage: `cargo test --lib` for the host tests,
//! `cargo run --release --features embedded` for the firmware.

#![cfg_attr(not(test), no_std)]

#[macro_use]
pub mod logging;

pub mod ble;
pub mod bus;
pub mod config;
pub mod error;
pub mod monitor;
pub mod motor;
pub mod power_logic;
pub mod storage;
pub mod ui;

#[cfg(feature = "embedded")]
pub mod power;

pub use bus::{Event, EventBus, Publish};
pub use error::{BleError, Error};

/// Milliseconds since boot. All pure state machines take time in this unit.
pub type Millis = u64;

/// Current uptime in milliseconds.
#[cfg(feature = "embedded")]
pub fn uptime_ms() -> Millis {
    embassy_time::Instant::now().as_millis()
}
