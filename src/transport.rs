//! The byte channel the client talks through.
//!
//! Reading and writing come from [`embedded_io`], the rest is what a serial line (or a TCP
//! serial bridge) offers on top: an available-byte count for polling and buffer resets.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

/// A half-duplex byte channel to one or more instruments.
///
/// `read` is only called when [`Transport::bytes_to_read`] reports pending bytes, so
/// implementations are free to block or to return `Ok(0)` when nothing is there.
pub trait Transport: embedded_io::Read + embedded_io::Write {
    /// Number of received bytes which can be read without waiting.
    fn bytes_to_read(&mut self) -> Result<usize, Self::Error>;

    /// Discard anything received but not read yet.
    fn clear_input(&mut self) -> Result<(), Self::Error>;

    /// Discard anything written but not sent yet.
    fn clear_output(&mut self) -> Result<(), Self::Error>;

    fn is_open(&self) -> bool;

    fn close(&mut self);
}

/// Opens (and reopens) a [`Transport`] at a given line speed.
pub trait Opener {
    type Transport: Transport;

    /// Open a fresh channel at `baud_rate`.
    fn open(
        &mut self,
        baud_rate: u32,
    ) -> Result<Self::Transport, <Self::Transport as embedded_io::ErrorType>::Error>;

    /// Human readable port name for logs.
    fn describe(&self) -> String;

    /// Address selected on the line behind this opener.
    ///
    /// Clients whose openers hand out clones of one handle share a multi-drop line. The default
    /// is a fresh handle, for a line owned by a single client.
    fn selected_address(&self) -> SelectedAddress {
        SelectedAddress::default()
    }
}

/// The device address a multi-drop line currently has selected, `None` when unknown.
///
/// Locking it also claims the half-duplex line until the guard is dropped.
#[derive(Debug, Clone, Default)]
pub struct SelectedAddress(Arc<Mutex<Option<u8>>>);

impl SelectedAddress {
    pub fn lock(&self) -> MutexGuard<'_, Option<u8>> {
        self.0.lock()
    }

    pub fn get(&self) -> Option<u8> {
        *self.0.lock()
    }
}

/// Error type of the transport behind an opener.
pub type TransportError<O> = <<O as Opener>::Transport as embedded_io::ErrorType>::Error;
