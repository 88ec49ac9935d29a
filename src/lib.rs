//! This crate provides an interface for communicating with and controlling bench power supplies
//! which speak a line based ASCII command language.
//!
//! Two command families are supported, see [`types::Dialect`]:
//! * Genesys style (`PV`, `MV?`, `DVC?`, ...), carriage return terminated, several supplies
//!   addressable on one RS-485 line.
//! * SCPI style (`VOLT`, `MEAS:VOLT?`, `*IDN?`, ...), newline terminated.
//!
//! [`psu::PsuClient`] talks through any [`transport::Transport`]: a serial port (feature
//! `serialport`), a TCP serial bridge, or the [`emulator::Emulator`] which answers like the real
//! instruments do and is used to test without hardware.
//!
//! A client retries failed exchanges, suspends itself for a while when the line keeps failing and
//! reconnects on the next use after that. It can also search for the line speed a supply is set to.
//!
//! The serial port used for PSU comms should be configured like so:
//! * Default baud rate: 115200
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None

pub mod attribute;
pub mod codec;
pub mod config;
pub mod emulator;
pub mod error;
pub mod psu;
pub mod registry;
#[cfg(feature = "serialport")]
pub mod serial;
pub mod stats;
pub mod transport;
pub mod types;

#[cfg(test)]
mod mock_serial;
