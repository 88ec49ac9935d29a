//! Helpers for a host layer which republishes client values as attributes.
//!
//! A host polls a [`SharedClient`] and needs a value for every read, so failures become a
//! sentinel value flagged [`Quality::Invalid`] instead of an error.

use crate::psu::PsuClient;
use crate::registry::SharedClient;
use crate::transport::Opener;

/// Validity flag attached to a published value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Valid,
    Invalid,
}

/// A value read for publication.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading<T> {
    pub value: T,
    pub quality: Quality,
}

impl<T> Reading<T> {
    pub fn valid(value: T) -> Self {
        Reading {
            value,
            quality: Quality::Valid,
        }
    }

    pub fn invalid(value: T) -> Self {
        Reading {
            value,
            quality: Quality::Invalid,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.quality == Quality::Valid
    }
}

/// Read one value from `client` with `f`.
///
/// An offline client is not asked. It and a failed read both give `sentinel`, flagged invalid.
pub fn read_attribute<O, T, const L: usize>(
    client: &SharedClient<O, L>,
    f: impl FnOnce(&mut PsuClient<O, L>) -> Option<T>,
    sentinel: T,
) -> Reading<T>
where
    O: Opener,
{
    let mut client = client.lock();
    if !client.ensure_ready() {
        return Reading::invalid(sentinel);
    }
    match f(&mut client) {
        Some(value) => Reading::valid(value),
        None => Reading::invalid(sentinel),
    }
}

/// Write `value` to `client` with `f`. Writes to an offline client are not attempted.
pub fn write_attribute<O, T, const L: usize>(
    client: &SharedClient<O, L>,
    f: impl FnOnce(&mut PsuClient<O, L>, T) -> bool,
    value: T,
) -> Quality
where
    O: Opener,
{
    let mut client = client.lock();
    if client.ensure_ready() && f(&mut client, value) {
        Quality::Valid
    } else {
        Quality::Invalid
    }
}

fn reading<T>(online: bool, read: impl FnOnce() -> Option<T>, sentinel: T) -> Reading<T> {
    match online.then(read).flatten() {
        Some(value) => Reading::valid(value),
        None => Reading::invalid(sentinel),
    }
}

/// Everything a host publishes for one supply, read under a single lock.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub output: Reading<bool>,
    pub voltage: Reading<f64>,
    pub current: Reading<f64>,
    pub power: Reading<f64>,
    pub programmed_voltage: Reading<f64>,
    pub programmed_current: Reading<f64>,
    pub id: String,
    pub device_type: String,
    pub serial: String,
    pub last_error: String,
}

impl Snapshot {
    /// Poll every published value of `client`. Offline clients give sentinels without I/O.
    pub fn read<O: Opener, const L: usize>(client: &mut PsuClient<O, L>) -> Self {
        let online = client.ensure_ready();
        let voltage = reading(online, || client.read_voltage(), f64::NAN);
        let current = reading(online, || client.read_current(), f64::NAN);
        let power = reading(online, || client.read_power(), f64::NAN);
        let programmed_voltage = reading(online, || client.read_programmed_voltage(), f64::NAN);
        let programmed_current = reading(online, || client.read_programmed_current(), f64::NAN);
        let output = reading(online, || client.read_output().map(bool::from), false);
        let last_error = online
            .then(|| client.read_errors())
            .flatten()
            .map(|diagnostic| diagnostic.to_string())
            .unwrap_or_default();
        Snapshot {
            output,
            voltage,
            current,
            power,
            programmed_voltage,
            programmed_current,
            id: client.id().to_string(),
            device_type: client.device_type().to_string(),
            serial: client.serial().to_string(),
            last_error,
        }
    }
}
