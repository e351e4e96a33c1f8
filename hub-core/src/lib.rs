#![no_std]

// Device Link engine for the Hub appliance.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library. Transport and time are injected through the traits in
// `transport` and `time`, so the same engine drives the real UART and the
// emulator's simulated peer.

#[macro_use]
mod fmt;

pub mod capsense;
pub mod config_sync;
pub mod hub;
pub mod indicator;
pub mod interaction;
pub mod link;
pub mod protocol;
pub mod report;
pub mod resumable;
pub mod telemetry;
pub mod time;
pub mod touchpad;
pub mod transport;
pub mod tray;

pub use hub::{Hub, HubConfig, HubError};
pub use time::{Clock, HubInstant, Millis};
pub use transport::SerialPort;
