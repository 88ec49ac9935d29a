//! Session configuration for [`PsuClient`](crate::psu::PsuClient).

use fugit::MillisDurationU32;
use strum::IntoEnumIterator;

use crate::types::{BaudRate, Dialect};

/// Options for a client session.
///
/// ## Example
///
/// ```rust
/// # use benchpsu_link::config::ClientConfig;
/// # use benchpsu_link::types::Dialect;
/// # use fugit::MillisDurationU32;
/// let config = ClientConfig::new(Dialect::Genesys)
///     .with_address(6)
///     .with_retries(3)
///     .with_read_timeout(MillisDurationU32::millis(300));
/// assert_eq!(config.address, 6);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Command vocabulary of the instrument.
    pub dialect: Dialect,
    /// Bus address, only sent for multi-drop dialects.
    pub address: u8,
    /// Line speed used by `connect`.
    pub baud_rate: u32,
    /// Overrides [`Dialect::family_prefix`] when set.
    pub family_prefix: Option<String>,
    /// Extra attempts after a failed exchange. `2` means three attempts in total.
    pub retries: u8,
    /// Deadline for a complete, terminated reply.
    pub read_timeout: MillisDurationU32,
    /// How long a failing client refuses commands before trying to reconnect.
    pub suspend_delay: MillisDurationU32,
    /// Minimum time between two explicit reconnects.
    pub reconnect_cooldown: MillisDurationU32,
    /// Pause before each attempt of baud rate detection.
    pub baud_probe_delay: MillisDurationU32,
    /// Line speeds tried by baud rate detection, in order.
    pub baud_candidates: Vec<u32>,
}

impl ClientConfig {
    /// The default read timeout is 500 ms.
    const DEFAULT_READ_TIMEOUT_MS: u32 = 500;
    const DEFAULT_SUSPEND_DELAY_MS: u32 = 5_000;
    const DEFAULT_RECONNECT_COOLDOWN_MS: u32 = 5_000;
    const DEFAULT_BAUD_PROBE_DELAY_MS: u32 = 2_000;

    /// Defaults for the given dialect: address 0, 115200 baud, two retries.
    pub fn new(dialect: Dialect) -> Self {
        ClientConfig {
            dialect,
            address: 0,
            baud_rate: BaudRate::_115200.into(),
            family_prefix: None,
            retries: 2,
            read_timeout: MillisDurationU32::millis(Self::DEFAULT_READ_TIMEOUT_MS),
            suspend_delay: MillisDurationU32::millis(Self::DEFAULT_SUSPEND_DELAY_MS),
            reconnect_cooldown: MillisDurationU32::millis(Self::DEFAULT_RECONNECT_COOLDOWN_MS),
            baud_probe_delay: MillisDurationU32::millis(Self::DEFAULT_BAUD_PROBE_DELAY_MS),
            baud_candidates: BaudRate::iter().map(u32::from).collect(),
        }
    }

    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_family_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.family_prefix = Some(prefix.into());
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_read_timeout(mut self, timeout: MillisDurationU32) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_suspend_delay(mut self, delay: MillisDurationU32) -> Self {
        self.suspend_delay = delay;
        self
    }

    pub fn with_reconnect_cooldown(mut self, cooldown: MillisDurationU32) -> Self {
        self.reconnect_cooldown = cooldown;
        self
    }

    pub fn with_baud_probe_delay(mut self, delay: MillisDurationU32) -> Self {
        self.baud_probe_delay = delay;
        self
    }

    pub fn with_baud_candidates(mut self, candidates: impl IntoIterator<Item = u32>) -> Self {
        self.baud_candidates = candidates.into_iter().collect();
        self
    }

    /// Identity prefix a device must report to be accepted.
    pub fn family_prefix(&self) -> &str {
        self.family_prefix
            .as_deref()
            .unwrap_or(self.dialect.family_prefix())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig::new(Dialect::Scpi)
    }
}

/// Convert to a wall-clock duration.
pub(crate) fn std_duration(duration: MillisDurationU32) -> std::time::Duration {
    std::time::Duration::from_millis(u64::from(duration.to_millis()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.dialect, Dialect::Scpi);
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.retries, 2);
        assert_eq!(config.read_timeout, MillisDurationU32::millis(500));
        assert_eq!(config.baud_candidates.first(), Some(&115_200));
        assert_eq!(config.family_prefix(), "ITECH Ltd., IT69");
    }

    #[test]
    fn prefix_override() {
        let config = ClientConfig::new(Dialect::Genesys).with_family_prefix("TDK-LAMBDA");
        assert_eq!(config.family_prefix(), "TDK-LAMBDA");
    }

    #[test]
    fn duration_conversion() {
        assert_eq!(
            std_duration(MillisDurationU32::millis(35)),
            std::time::Duration::from_millis(35)
        );
    }
}
