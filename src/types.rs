//! This module contains types shared by the client, the codec and the emulator.

use std::time::Instant;

use strum_macros::{EnumCount, EnumIter};

/// The two instrument families we know how to talk to.
///
/// Both speak upper-case ASCII lines, but differ in terminator, vocabulary and in how a bad
/// command is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, EnumCount)]
pub enum Dialect {
    /// TDK-Lambda Genesys style: `PV 5.0\r`, multi-drop via `ADR <n>`, errors come back as `E1`.
    Genesys,
    /// SCPI style as used by the ITECH IT6900 series: `VOLT 5.0\n`, errors are queued for
    /// `SYST:ERR?` and the offending command gets an empty reply.
    Scpi,
}

impl Dialect {
    /// Byte which terminates every command and every reply.
    pub const fn terminator(self) -> u8 {
        match self {
            Dialect::Genesys => b'\r',
            Dialect::Scpi => b'\n',
        }
    }

    /// Identity replies must start with this for the device to be accepted.
    pub const fn family_prefix(self) -> &'static str {
        match self {
            Dialect::Genesys => "LAMBDA, GEN",
            Dialect::Scpi => "ITECH Ltd., IT69",
        }
    }

    /// Whether several devices can share one line, selected by an address command.
    ///
    /// The SCPI family has an `ADDR` command but nothing we talk to uses it on a shared bus, so
    /// it is treated as a single device.
    pub const fn is_multi_drop(self) -> bool {
        matches!(self, Dialect::Genesys)
    }

    /// Header of the command for a writable setting, e.g. `PV` or `VOLT`.
    pub const fn mnemonic(self, setting: Setting) -> &'static str {
        match (self, setting) {
            (Dialect::Genesys, Setting::Voltage) => "PV",
            (Dialect::Genesys, Setting::Current) => "PC",
            (Dialect::Genesys, Setting::Output) => "OUT",
            (Dialect::Scpi, Setting::Voltage) => "VOLT",
            (Dialect::Scpi, Setting::Current) => "CURR",
            (Dialect::Scpi, Setting::Output) => "OUTP",
        }
    }
}

/// Settings which are written with a write-then-verify batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum Setting {
    /// Programmed output voltage, volts.
    Voltage,
    /// Programmed current limit, amps.
    Current,
    /// Output enable.
    Output,
}

/// Line speeds tried by baud rate detection, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, EnumCount)]
#[repr(u32)]
pub enum BaudRate {
    /// This is the default rate for both families.
    _115200 = 115_200,
    _9600 = 9_600,
    _4800 = 4_800,
    _19200 = 19_200,
    _38400 = 38_400,
    _57600 = 57_600,
}

impl From<BaudRate> for u32 {
    fn from(value: BaudRate) -> Self {
        value as u32
    }
}

/// Used to be less ambiguous and whether something is on or off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Disabled.
    Off,
    /// Enabled.
    On,
}

impl From<State> for bool {
    fn from(value: State) -> Self {
        match value {
            State::Off => false,
            State::On => true,
        }
    }
}

impl From<bool> for State {
    fn from(value: bool) -> Self {
        match value {
            true => State::On,
            false => State::Off,
        }
    }
}

/// Where a client is in its connection lifecycle.
///
/// ```text
/// Disconnected -> Connecting -> Ready <-> Suspended -> Reconnecting -> Ready | Suspended
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No transport is open.
    Disconnected,
    /// Transport open, identity not yet confirmed.
    Connecting,
    /// Identity confirmed, commands are accepted.
    Ready,
    /// Backoff armed. Commands fail without touching the transport until `until`.
    Suspended { until: Instant },
    /// Transport is being closed and reopened.
    Reconnecting,
}

impl LinkState {
    /// Pure readiness check, no reconnect side effects.
    pub fn is_ready(&self) -> bool {
        matches!(self, LinkState::Ready)
    }

    /// Whether the backoff window is still running at `now`.
    pub fn is_suspended_at(&self, now: Instant) -> bool {
        matches!(self, LinkState::Suspended { until } if now < *until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use strum::{EnumCount, IntoEnumIterator};

    #[test]
    fn baud_rate_candidates_order() {
        let rates: Vec<u32> = BaudRate::iter().map(u32::from).collect();
        assert_eq!(rates, [115_200, 9_600, 4_800, 19_200, 38_400, 57_600]);
        assert_eq!(rates.len(), BaudRate::COUNT);
    }

    #[test]
    fn state_bool_conversions() {
        assert_eq!(State::from(true), State::On);
        assert_eq!(State::from(false), State::Off);
        assert!(bool::from(State::On));
        assert!(!bool::from(State::Off));
    }

    #[test]
    fn mnemonics_differ_per_dialect() {
        for setting in Setting::iter() {
            assert_ne!(
                Dialect::Genesys.mnemonic(setting),
                Dialect::Scpi.mnemonic(setting)
            );
        }
    }

    #[test]
    fn suspension_window() {
        let now = Instant::now();
        let state = LinkState::Suspended {
            until: now + Duration::from_millis(100),
        };
        assert!(state.is_suspended_at(now));
        assert!(!state.is_suspended_at(now + Duration::from_millis(100)));
        assert!(!state.is_ready());
        assert!(LinkState::Ready.is_ready());
        assert!(!LinkState::Ready.is_suspended_at(now));
    }
}
