use std::time::Instant;

use embedded_io::{Read, Write};
use log::{debug, error, info, warn};

use crate::{
    codec::{
        self, BATCH_SEPARATOR, Command, Diagnostic, FromReply, Identity, Status, ToArgument, limits_from_model,
    },
    config::{ClientConfig, std_duration},
    error::{Error, Result},
    stats::IoStats,
    transport::{Opener, SelectedAddress, Transport, TransportError},
    types::{LinkState, Setting, State},
};

/// Reported as identity, type and serial until a device has been accepted.
pub const UNKNOWN_DEVICE: &str = "Unknown Device";

/// A session with one power supply, opened through any [`Opener`].
///
/// All methods block until the exchange completes or times out. One command is in flight at a
/// time; share a client between threads through a
/// [`SharedClient`](crate::registry::SharedClient).
///
/// For its methods, "read" queries the instrument and "write" programs it and verifies the
/// readback. Failures are logged and counted in [`IoStats`], then reported as `None`/`false`.
/// Only [`PsuClient::query`] hands back the underlying [`Error`].
///
/// `L` is the capacity of the reply buffer in bytes.
pub struct PsuClient<O: Opener, const L: usize = 128> {
    opener: O,
    interface: Option<O::Transport>,
    /// Address the line has selected, shared with other clients on the same line.
    selected: SelectedAddress,
    config: ClientConfig,
    /// Line speed of the open transport, changed by baud rate detection.
    baud_rate: u32,
    state: LinkState,
    id: String,
    device_type: String,
    serial: String,
    max_voltage: f64,
    max_current: f64,
    programmed_voltage: Option<f64>,
    programmed_current: Option<f64>,
    /// Raw bytes of the last reply, terminator included.
    response: heapless::Vec<u8, L>,
    stats: IoStats,
    last_reconnect: Option<Instant>,
    /// Last `E1` seen on a Genesys line, reported by [`PsuClient::read_errors`].
    device_error: Option<Diagnostic>,
}

impl<O: Opener, const L: usize> PsuClient<O, L> {
    fn new(opener: O, config: ClientConfig) -> Self {
        Self {
            selected: opener.selected_address(),
            opener,
            interface: None,
            baud_rate: config.baud_rate,
            config,
            state: LinkState::Disconnected,
            id: UNKNOWN_DEVICE.into(),
            device_type: UNKNOWN_DEVICE.into(),
            serial: UNKNOWN_DEVICE.into(),
            max_voltage: f64::INFINITY,
            max_current: f64::INFINITY,
            programmed_voltage: None,
            programmed_current: None,
            response: heapless::Vec::new(),
            stats: IoStats::default(),
            last_reconnect: None,
            device_error: None,
        }
    }

    /// Open the transport and identify the device.
    ///
    /// Only a transport which cannot be opened is an error. A device which does not answer, or
    /// answers with a foreign identity, gives a client in the suspended state which retries
    /// once the backoff has elapsed.
    pub fn connect(opener: O, config: ClientConfig) -> Result<Self, TransportError<O>> {
        let mut client = Self::new(opener, config);
        client.open()?;
        client.init();
        Ok(client)
    }

    fn open(&mut self) -> Result<(), TransportError<O>> {
        debug!("Opening {} at {} baud", self.opener.describe(), self.baud_rate);
        match self.opener.open(self.baud_rate) {
            Ok(interface) => {
                self.interface = Some(interface);
                self.state = LinkState::Connecting;
                Ok(())
            }
            Err(e) => {
                error!("Cannot open {}: {e:?}", self.opener.describe());
                Err(Error::Transport(e))
            }
        }
    }

    /// Replay the connect sequence on the open transport. Returns whether the device was accepted.
    fn init(&mut self) -> bool {
        self.id = UNKNOWN_DEVICE.into();
        self.device_type = UNKNOWN_DEVICE.into();
        self.serial = UNKNOWN_DEVICE.into();
        self.max_voltage = f64::INFINITY;
        self.max_current = f64::INFINITY;
        self.programmed_voltage = None;
        self.programmed_current = None;
        self.device_error = None;

        let dialect = self.config.dialect;
        if dialect.is_multi_drop() {
            let address = self.config.address;
            if let Err(e) = self.execute(Command::SelectAddress(address), Some(true)) {
                return self.reject(e);
            }
        }
        // Not every family knows these. Only a dead line is fatal.
        for command in [Command::Remote, Command::ClearStatus] {
            match self.execute(command, Some(false)) {
                Err(e) if e.is_io() => return self.reject(e),
                _ => {}
            }
        }

        let id = match self.execute(Command::Identity, None) {
            Ok(id) => id,
            Err(e) => return self.reject(e),
        };
        if !id.starts_with(self.config.family_prefix()) {
            return self.reject(Error::UnexpectedIdentity(id));
        }
        self.id = id;
        self.state = LinkState::Ready;

        if let Ok(identity) = Identity::from_reply(&self.id) {
            self.device_type = identity.model;
            self.serial = identity.serial;
        }
        if let Ok(serial) = self.execute(Command::SerialNumber, None) {
            self.serial = serial;
        }
        let limits = limits_from_model(&self.device_type);
        self.max_voltage = self
            .execute_value::<f64>(Command::MaxVoltage)
            .ok()
            .or(limits.map(|(volts, _)| volts))
            .unwrap_or(f64::INFINITY);
        self.max_current = self
            .execute_value::<f64>(Command::MaxCurrent)
            .ok()
            .or(limits.map(|(_, amps)| amps))
            .unwrap_or(f64::INFINITY);

        info!(
            "Connected to {} (serial {}) on {} at {} baud, limits {} V / {} A",
            self.device_type,
            self.serial,
            self.opener.describe(),
            self.baud_rate,
            self.max_voltage,
            self.max_current
        );
        self.state.is_ready()
    }

    fn reject(&mut self, e: Error<TransportError<O>>) -> bool {
        error!("Device on {} rejected: {e}", self.opener.describe());
        self.suspend(Instant::now());
        false
    }

    /// Arm the backoff. Does nothing while an earlier backoff is still running.
    fn suspend(&mut self, now: Instant) {
        if self.state.is_suspended_at(now) {
            return;
        }
        let until = now + std_duration(self.config.suspend_delay);
        warn!(
            "Suspending {} for {} ms",
            self.opener.describe(),
            self.config.suspend_delay.to_millis()
        );
        self.state = LinkState::Suspended { until };
    }

    /// Gate for every operation which needs the device.
    ///
    /// An expired backoff triggers one reconnect here.
    fn check_ready(&mut self) -> Result<(), TransportError<O>> {
        match self.state {
            LinkState::Ready | LinkState::Connecting | LinkState::Reconnecting => Ok(()),
            LinkState::Disconnected => Err(Error::NotOpen),
            LinkState::Suspended { until } if Instant::now() < until => Err(Error::Suspended),
            LinkState::Suspended { .. } => {
                if self.reopen() {
                    Ok(())
                } else {
                    Err(Error::Suspended)
                }
            }
        }
    }

    /// Run the readiness check, reconnecting if a backoff has expired.
    pub fn ensure_ready(&mut self) -> bool {
        self.check_ready().is_ok()
    }

    fn reopen(&mut self) -> bool {
        self.state = LinkState::Reconnecting;
        self.last_reconnect = Some(Instant::now());
        if let Some(mut interface) = self.interface.take() {
            interface.close();
        }
        match self.open() {
            Ok(()) => self.init(),
            Err(_) => {
                self.suspend(Instant::now());
                false
            }
        }
    }

    /// Close and reopen the transport, then replay the connect sequence.
    ///
    /// Calls within `reconnect_cooldown` of the previous reconnect are ignored and report the
    /// current readiness.
    pub fn reconnect(&mut self) -> bool {
        let cooldown = std_duration(self.config.reconnect_cooldown);
        if let Some(last) = self.last_reconnect {
            if last.elapsed() < cooldown {
                debug!("Reconnect of {} ignored, cooling down", self.opener.describe());
                return self.is_ready();
            }
        }
        let ready = self.reopen();
        if ready {
            info!("Reconnected to {}", self.opener.describe());
        }
        ready
    }

    /// Find the line speed the device answers at.
    ///
    /// Each of the configured candidates is tried once, waiting `baud_probe_delay` before each.
    /// Returns the current rate straight away if the client is ready.
    pub fn detect_baud_rate(&mut self) -> Option<u32> {
        if self.is_ready() {
            return Some(self.baud_rate);
        }
        let delay = std_duration(self.config.baud_probe_delay);
        for baud_rate in self.config.baud_candidates.clone() {
            std::thread::sleep(delay);
            debug!("Trying {} at {baud_rate} baud", self.opener.describe());
            self.baud_rate = baud_rate;
            if self.reopen() {
                info!("Detected {baud_rate} baud on {}", self.opener.describe());
                return Some(baud_rate);
            }
        }
        warn!("No baud rate found for {}", self.opener.describe());
        None
    }

    /// Close the transport. The client stays unusable until [`PsuClient::reconnect`].
    pub fn close(&mut self) {
        if let Some(mut interface) = self.interface.take() {
            interface.close();
        }
        self.state = LinkState::Disconnected;
    }

    fn encode(&self, command: &Command) -> Result<String, TransportError<O>> {
        self.config
            .dialect
            .encode(command)
            .ok_or(Error::Unsupported)
    }

    fn execute(
        &mut self,
        command: Command,
        expect: Option<bool>,
    ) -> Result<String, TransportError<O>> {
        let text = self.encode(&command)?;
        self.exchange(&text, expect)
    }

    fn execute_value<T: FromReply>(&mut self, command: Command) -> Result<T, TransportError<O>> {
        let payload = self.execute(command, None)?;
        Ok(T::from_reply(&payload)?)
    }

    /// Send one line with retries and return the reply payload.
    ///
    /// `expect` defaults to whether the line holds a query. Every attempt is counted; after the
    /// last failed one the client is suspended.
    fn exchange(
        &mut self,
        command: &str,
        expect: Option<bool>,
    ) -> Result<String, TransportError<O>> {
        let terminator = self.config.dialect.terminator();
        let line = codec::normalize(command, terminator);
        let expect = expect.unwrap_or_else(|| codec::expects_reply(&line));

        let mut last_error = Error::NotOpen;
        for attempt in 0..=self.config.retries {
            let start = Instant::now();
            match self.attempt(&line, expect) {
                Ok(()) => {
                    let dt = start.elapsed();
                    self.stats.record(dt);
                    let reply = codec::payload(&self.response, terminator);
                    debug!(
                        "{:?} -> {reply:?}, ok, {:.1} ms",
                        line.trim_end(),
                        dt.as_secs_f64() * 1000.0
                    );
                    if self.config.dialect.error_reply() == Some(reply.as_str()) {
                        self.device_error = Some(Diagnostic::command_error());
                    }
                    return Ok(reply);
                }
                Err(e) => {
                    self.stats.record_error();
                    warn!(
                        "{:?} failed on attempt {} of {}: {e}",
                        line.trim_end(),
                        attempt + 1,
                        self.config.retries + 1
                    );
                    if !e.is_io() {
                        return Err(e);
                    }
                    last_error = e;
                }
            }
        }
        self.suspend(Instant::now());
        Err(last_error)
    }

    /// One write/read cycle. On a multi-drop line our address is selected first if another
    /// client has moved the line away from it.
    fn attempt(&mut self, line: &str, expect: bool) -> Result<(), TransportError<O>> {
        self.response.clear();
        let dialect = self.config.dialect;
        let address = self.config.address;
        // Held until the reply is in, so no other client gets between our write and read.
        let mut selected = self.selected.lock();
        let own = dialect.selected_by(line);
        let line = match dialect.encode(&Command::SelectAddress(address)) {
            Some(select)
                if dialect.is_multi_drop() && own.is_none() && *selected != Some(address) =>
            {
                debug!("Selecting address {address} on {}", self.opener.describe());
                format!("{select}{BATCH_SEPARATOR}{line}")
            }
            _ => line.to_string(),
        };

        let result = match self.interface.as_mut() {
            Some(interface) => {
                Self::transfer(interface, &mut self.response, &line, expect, &self.config)
            }
            None => Err(Error::NotOpen),
        };
        match &result {
            Ok(()) if dialect.is_multi_drop() => *selected = Some(own.unwrap_or(address)),
            Ok(()) => {}
            // Whether the device saw the line is unknown.
            Err(_) => *selected = None,
        }
        result
    }

    fn transfer(
        interface: &mut O::Transport,
        response: &mut heapless::Vec<u8, L>,
        line: &str,
        expect: bool,
        config: &ClientConfig,
    ) -> Result<(), TransportError<O>> {
        if !interface.is_open() {
            return Err(Error::NotOpen);
        }
        interface.clear_input().map_err(Error::Transport)?;
        interface.clear_output().map_err(Error::Transport)?;
        interface
            .write_all(line.as_bytes())
            .map_err(Error::Transport)?;
        interface.flush().map_err(Error::Transport)?;
        if !expect {
            return Ok(());
        }
        let deadline = Instant::now() + std_duration(config.read_timeout);
        Self::read_reply(interface, response, config.dialect.terminator(), deadline)
    }

    /// Poll the transport until `terminator` arrives. A reply cut short by the deadline is a
    /// timeout, never a partial success.
    fn read_reply(
        interface: &mut O::Transport,
        buffer: &mut heapless::Vec<u8, L>,
        terminator: u8,
        deadline: Instant,
    ) -> Result<(), TransportError<O>> {
        let mut temp_buf = [0u8; 8];
        loop {
            if interface.bytes_to_read().map_err(Error::Transport)? > 0 {
                let bytes_read = interface.read(&mut temp_buf).map_err(Error::Transport)?;
                for &byte in &temp_buf[..bytes_read] {
                    buffer.push(byte).map_err(|_| Error::BufferOverflow)?;
                    if byte == terminator {
                        return Ok(());
                    }
                }
            } else {
                core::hint::spin_loop();
            }
            if Instant::now() >= deadline {
                error!("No terminated reply within the read timeout, got {buffer:?}");
                return Err(Error::Timeout);
            }
        }
    }

    /// Send a raw command line, returning the reply payload.
    ///
    /// This is the only operation which surfaces the [`Error`]. A `None` `expect` means "expect a
    /// reply if the line holds a query".
    pub fn query(
        &mut self,
        command: &str,
        expect: Option<bool>,
    ) -> Result<String, TransportError<O>> {
        self.check_ready()?;
        self.exchange(command, expect)
    }

    /// Send a raw command line. The reply is available from [`PsuClient::response`].
    pub fn send_command(&mut self, command: &str, expect: Option<bool>) -> bool {
        self.settle(command, |client| client.query(command, expect))
            .is_some()
    }

    /// Payload of the last reply, terminator stripped.
    pub fn response(&self) -> String {
        codec::payload(&self.response, self.config.dialect.terminator())
    }

    /// Send a raw command line and return its reply, or an empty string on failure.
    pub fn send_raw(&mut self, command: &str) -> String {
        self.settle(command, |client| client.query(command, None))
            .unwrap_or_default()
    }

    /// Query `command` and parse the reply as `T`.
    pub fn read_value<T: FromReply>(&mut self, command: &str) -> Option<T> {
        self.settle(command, |client| {
            let payload = client.query(command, Some(true))?;
            Ok(T::from_reply(&payload)?)
        })
    }

    /// Program `value` and read it back in the same write, e.g. `VOLT 5;VOLT?`.
    ///
    /// Returns whether the readback equals `value`.
    pub fn write_value<T>(&mut self, mnemonic: &str, value: T) -> bool
    where
        T: ToArgument + FromReply + PartialEq + core::fmt::Debug,
    {
        let line = codec::write_then_verify(mnemonic, &value);
        let readback = self.read_value::<T>(&line);
        if readback.as_ref() != Some(&value) {
            warn!("{mnemonic} readback {readback:?} does not match {value:?}");
            return false;
        }
        true
    }

    fn read_command<T: FromReply>(&mut self, command: Command) -> Option<T> {
        self.settle(&format!("{command:?}"), |client| {
            client.check_ready()?;
            client.execute_value(command)
        })
    }

    fn write_command(&mut self, command: Command) -> bool {
        self.settle(&format!("{command:?}"), |client| {
            client.check_ready()?;
            client.execute(command, Some(false))
        })
        .is_some()
    }

    /// Boundary between `Result` and the plain values the public operations return.
    fn settle<T>(
        &mut self,
        what: &str,
        f: impl FnOnce(&mut Self) -> Result<T, TransportError<O>>,
    ) -> Option<T> {
        match f(self) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("{what} on {} failed: {e}", self.opener.describe());
                None
            }
        }
    }

    /// Read whether the output is enabled or disabled.
    pub fn read_output(&mut self) -> Option<State> {
        self.read_command(Command::Output)
    }

    /// Enable/disable the output.
    pub fn write_output(&mut self, state: impl Into<State>) -> bool {
        let mnemonic = self.config.dialect.mnemonic(Setting::Output);
        self.write_value(mnemonic, state.into())
    }

    /// Return the measured output voltage in volts.
    pub fn read_voltage(&mut self) -> Option<f64> {
        self.read_command(Command::MeasuredVoltage)
    }

    /// Return the measured output current in amps.
    pub fn read_current(&mut self) -> Option<f64> {
        self.read_command(Command::MeasuredCurrent)
    }

    /// Return the measured output power in watts.
    ///
    /// Genesys supplies have no power query, so it is computed from one status read.
    pub fn read_power(&mut self) -> Option<f64> {
        if self.config.dialect.encode(&Command::MeasuredPower).is_some() {
            self.read_command(Command::MeasuredPower)
        } else {
            self.read_status().map(|status| status.power())
        }
    }

    /// Measured and programmed values in one exchange (Genesys `DVC?`).
    pub fn read_status(&mut self) -> Option<Status> {
        self.read_command(Command::Status)
    }

    /// Get the output target voltage in volts.
    pub fn read_programmed_voltage(&mut self) -> Option<f64> {
        let volts = self.read_command(Command::ProgrammedVoltage)?;
        self.programmed_voltage = Some(volts);
        Some(volts)
    }

    /// Get the current limit in amps.
    pub fn read_programmed_current(&mut self) -> Option<f64> {
        let amps = self.read_command(Command::ProgrammedCurrent)?;
        self.programmed_current = Some(amps);
        Some(amps)
    }

    /// Set the output target voltage in volts.
    ///
    /// Values outside `0..=max_voltage` are refused without I/O.
    pub fn write_voltage(&mut self, volts: f64) -> bool {
        if !(0.0..=self.max_voltage).contains(&volts) {
            warn!("{volts} V is outside 0..={} V", self.max_voltage);
            return false;
        }
        let mnemonic = self.config.dialect.mnemonic(Setting::Voltage);
        let ok = self.write_value(mnemonic, volts);
        if ok {
            self.programmed_voltage = Some(volts);
        }
        ok
    }

    /// Set the current limit in amps.
    ///
    /// Values outside `0..=max_current` are refused without I/O.
    pub fn write_current(&mut self, amps: f64) -> bool {
        if !(0.0..=self.max_current).contains(&amps) {
            warn!("{amps} A is outside 0..={} A", self.max_current);
            return false;
        }
        let mnemonic = self.config.dialect.mnemonic(Setting::Current);
        let ok = self.write_value(mnemonic, amps);
        if ok {
            self.programmed_current = Some(amps);
        }
        ok
    }

    /// Every identity query goes through here. A device which no longer matches the family
    /// prefix suspends the client.
    fn read_identity(&mut self) -> Option<String> {
        let id: String = self.read_command(Command::Identity)?;
        if !id.starts_with(self.config.family_prefix()) {
            error!("Unexpected device identity {id:?}");
            self.suspend(Instant::now());
        }
        self.id = id.clone();
        Some(id)
    }

    /// Read the identity string again.
    pub fn read_device_id(&mut self) -> Option<String> {
        self.read_identity()
    }

    pub fn read_serial_number(&mut self) -> Option<String> {
        let serial = match self.read_command::<String>(Command::SerialNumber) {
            Some(serial) => serial,
            None => Identity::from_reply(&self.read_identity()?).ok()?.serial,
        };
        self.serial = serial.clone();
        Some(serial)
    }

    /// Read the model designation, e.g. `IT6932A`.
    pub fn read_device_type(&mut self) -> Option<String> {
        let identity = Identity::from_reply(&self.read_identity()?).ok()?;
        self.device_type = identity.model.clone();
        Some(identity.model)
    }

    /// Oldest error reported by the instrument, `0,"No error"` when there is none.
    ///
    /// SCPI supplies are asked for their error queue. Genesys supplies only answer `E1`, so the
    /// last one seen is reported here once.
    pub fn read_errors(&mut self) -> Option<Diagnostic> {
        if self.config.dialect.encode(&Command::ErrorQueue).is_some() {
            self.read_command(Command::ErrorQueue)
        } else {
            Some(self.device_error.take().unwrap_or_else(Diagnostic::none))
        }
    }

    /// Hand the front panel back to the operator.
    pub fn switch_local(&mut self) -> bool {
        self.write_command(Command::Local)
    }

    pub fn switch_remote(&mut self) -> bool {
        self.write_command(Command::Remote)
    }

    /// Clear the instrument's error state.
    ///
    /// On Genesys supplies this only forgets the last `E1`.
    pub fn clear_status(&mut self) -> bool {
        self.device_error = None;
        if self.config.dialect.encode(&Command::ClearStatus).is_none() {
            return true;
        }
        self.write_command(Command::ClearStatus)
    }

    /// Full identity string, [`UNKNOWN_DEVICE`] until a device has been accepted.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Voltage rating in volts, infinite if unknown.
    pub fn max_voltage(&self) -> f64 {
        self.max_voltage
    }

    /// Current rating in amps, infinite if unknown.
    pub fn max_current(&self) -> f64 {
        self.max_current
    }

    /// Last voltage successfully written or read back.
    pub fn programmed_voltage(&self) -> Option<f64> {
        self.programmed_voltage
    }

    /// Last current limit successfully written or read back.
    pub fn programmed_current(&self) -> Option<f64> {
        self.programmed_current
    }

    pub fn address(&self) -> u8 {
        self.config.address
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn stats(&self) -> &IoStats {
        &self.stats
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    /// Name of the port, for logs.
    pub fn port(&self) -> String {
        self.opener.describe()
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Whether the device has been accepted and no failure has happened since.
    ///
    /// Unlike [`PsuClient::ensure_ready`] this never reconnects.
    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn is_suspended(&self, now: Instant) -> bool {
        self.state.is_suspended_at(now)
    }

    /// End of the current backoff, if one is armed.
    pub fn suspended_until(&self) -> Option<Instant> {
        match self.state {
            LinkState::Suspended { until } => Some(until),
            _ => None,
        }
    }
}
