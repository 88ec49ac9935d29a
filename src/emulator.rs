//! A software stand-in for a bus of power supplies.
//!
//! [`Emulator`] implements [`Transport`], so a [`PsuClient`](crate::psu::PsuClient) can be
//! exercised end to end without hardware. It answers with the same vocabulary, terminators and
//! error signalling as the real instruments, and only after the same [`RESPONSE_DELAY`].
//!
//! Measured values are free running while the output is off: every measurement adds a fixed
//! step and wraps past a bound. With the output on they follow the programmed values.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, trace};
use parking_lot::Mutex;
use thiserror::Error;

use crate::codec::{BATCH_SEPARATOR, Diagnostic, FromReply, ToArgument, last_command};
use crate::transport::{Opener, SelectedAddress, Transport};
use crate::types::{Dialect, State};

/// Time an instrument needs before its reply can be read.
pub const RESPONSE_DELAY: Duration = Duration::from_millis(35);

/// Serial number of the first device an emulator creates.
const FIRST_SERIAL: u32 = 123_456;

const VOLTAGE_STEP: f64 = 0.5;
const VOLTAGE_WRAP: f64 = 10.0;
const CURRENT_STEP: f64 = 1.0;
const CURRENT_WRAP: f64 = 100.0;

/// Entries the SCPI error queue holds before it overflows.
const ERROR_QUEUE_DEPTH: usize = 16;

const GENESYS_QUERIES: &[&str] = &["DVC?", "PV?", "MV?", "PC?", "MC?", "IDN?", "SN?", "OUT?"];
const SCPI_QUERIES: &[&str] = &[
    "OUTP?",
    "VOLT?",
    "VOLT? MAX",
    "CURR?",
    "CURR? MAX",
    "MEAS:VOLT?",
    "MEAS:CURR?",
    "MEAS:POW?",
    "*IDN?",
    "SYST:ERR?",
];

/// Fixed identity and ratings of the emulated model of each family.
struct Model {
    manufacturer: &'static str,
    name: &'static str,
    firmware: &'static str,
    max_voltage: f64,
    max_current: f64,
}

const fn model(dialect: Dialect) -> Model {
    match dialect {
        Dialect::Genesys => Model {
            manufacturer: "LAMBDA",
            name: "GEN10-100",
            firmware: "1.0",
            max_voltage: 10.0,
            max_current: 100.0,
        },
        Dialect::Scpi => Model {
            manufacturer: "ITECH Ltd.",
            name: "IT6932A",
            firmware: "1.0",
            max_voltage: 60.0,
            max_current: 10.0,
        },
    }
}

/// Simulated state of one instrument on the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub programmed_voltage: f64,
    pub programmed_current: f64,
    pub measured_voltage: f64,
    pub measured_current: f64,
    pub output: State,
    pub identity: String,
    pub serial: String,
    /// Time of the last command addressed to this device.
    pub last_command: Option<Instant>,
}

impl DeviceRecord {
    fn new(dialect: Dialect, serial: u32) -> Self {
        let model = model(dialect);
        DeviceRecord {
            programmed_voltage: 0.0,
            programmed_current: 0.0,
            measured_voltage: 0.0,
            measured_current: 0.0,
            output: State::Off,
            identity: format!(
                "{}, {}, {serial}, {}",
                model.manufacturer, model.name, model.firmware
            ),
            serial: serial.to_string(),
            last_command: None,
        }
    }

    fn measure_voltage(&mut self) -> f64 {
        if self.output == State::On {
            self.measured_voltage = self.programmed_voltage;
        } else {
            self.measured_voltage += VOLTAGE_STEP;
            if self.measured_voltage > VOLTAGE_WRAP {
                self.measured_voltage = 0.0;
            }
        }
        self.measured_voltage
    }

    fn measure_current(&mut self) -> f64 {
        if self.output == State::On {
            self.measured_current = self.programmed_current;
        } else {
            self.measured_current += CURRENT_STEP;
            if self.measured_current > CURRENT_WRAP {
                self.measured_current = 0.0;
            }
        }
        self.measured_current
    }
}

/// Everything behind the line: the devices, the selected address and the pending reply.
///
/// Shared by every [`Emulator`] port an [`EmulatorOpener`] hands out, so devices keep their
/// settings across reconnects the way powered instruments do.
#[derive(Debug)]
struct Bus {
    dialect: Dialect,
    devices: HashMap<u8, DeviceRecord>,
    /// Owned serial number sequence, shared by all addresses of this bus.
    next_serial: u32,
    address: u8,
    /// Final command of the last write, waiting to be answered.
    pending: Option<String>,
    write_error: bool,
    /// SCPI error queue.
    errors: VecDeque<Diagnostic>,
}

impl Bus {
    fn new(dialect: Dialect) -> Self {
        let mut bus = Bus {
            dialect,
            devices: HashMap::new(),
            next_serial: FIRST_SERIAL,
            address: 0,
            pending: None,
            write_error: false,
            errors: VecDeque::new(),
        };
        bus.select(0);
        bus
    }

    /// Make `address` the active device, creating it on first use.
    fn select(&mut self, address: u8) {
        self.address = address;
        if !self.devices.contains_key(&address) {
            let record = DeviceRecord::new(self.dialect, self.next_serial);
            debug!("Emulated device {address} created, serial {}", record.serial);
            self.next_serial += 1;
            self.devices.insert(address, record);
        }
    }

    fn device(&mut self) -> &mut DeviceRecord {
        let dialect = self.dialect;
        let serial = &mut self.next_serial;
        self.devices.entry(self.address).or_insert_with(|| {
            *serial += 1;
            DeviceRecord::new(dialect, *serial - 1)
        })
    }

    /// Flag the current write as failed. SCPI buses also queue a diagnostic.
    fn fail(&mut self, code: i32, message: &str) {
        self.write_error = true;
        if !matches!(self.dialect, Dialect::Scpi) {
            return;
        }
        if self.errors.len() < ERROR_QUEUE_DEPTH {
            self.errors.push_back(Diagnostic {
                code,
                message: message.into(),
            });
        } else if let Some(newest) = self.errors.back_mut() {
            *newest = Diagnostic {
                code: -350,
                message: "Queue overflow".into(),
            };
        }
    }

    /// Apply one line, which may be a batch of commands.
    fn receive(&mut self, line: &[u8], now: Instant) {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches(self.dialect.terminator() as char).trim();
        self.write_error = false;
        for command in text.split(BATCH_SEPARATOR) {
            self.apply(command.trim());
        }
        trace!("Emulator {:?} received {text:?}", self.dialect);
        self.device().last_command = Some(now);
        self.pending = Some(last_command(text).to_string());
    }

    fn apply(&mut self, command: &str) {
        match self.dialect {
            Dialect::Genesys => self.apply_genesys(command),
            Dialect::Scpi => self.apply_scpi(command),
        }
    }

    fn apply_genesys(&mut self, command: &str) {
        if let Some(address) = command.strip_prefix("ADR ") {
            match address.trim().parse() {
                Ok(address) => self.select(address),
                Err(_) => self.fail(1, "Command error"),
            }
        } else if let Some(value) = command.strip_prefix("PV ") {
            self.program_voltage(value);
        } else if let Some(value) = command.strip_prefix("PC ") {
            self.program_current(value);
        } else if let Some(state) = command.strip_prefix("OUT ") {
            self.switch_output(state);
        } else if !GENESYS_QUERIES.contains(&command) {
            self.fail(1, "Command error");
        }
    }

    fn apply_scpi(&mut self, command: &str) {
        if let Some(address) = command.strip_prefix("ADDR ") {
            match address.trim().parse() {
                Ok(address) => self.select(address),
                Err(_) => self.fail(-224, "Illegal parameter value"),
            }
        } else if let Some(value) = command.strip_prefix("VOLT ") {
            self.program_voltage(value);
        } else if let Some(value) = command.strip_prefix("CURR ") {
            self.program_current(value);
        } else if let Some(state) = command.strip_prefix("OUTP ") {
            self.switch_output(state);
        } else if command == "*CLS" {
            self.errors.clear();
        } else if command == "SYST:LOC" || command == "SYST:REM" {
            // Front panel lockout is not modelled.
        } else if !SCPI_QUERIES.contains(&command) {
            self.fail(-113, "Undefined header");
        }
    }

    fn program_voltage(&mut self, value: &str) {
        let max = model(self.dialect).max_voltage;
        match f64::from_reply(value) {
            Ok(volts) if (0.0..=max).contains(&volts) => self.device().programmed_voltage = volts,
            Ok(_) => self.fail(-222, "Data out of range"),
            Err(_) => self.fail(-224, "Illegal parameter value"),
        }
    }

    fn program_current(&mut self, value: &str) {
        let max = model(self.dialect).max_current;
        match f64::from_reply(value) {
            Ok(amps) if (0.0..=max).contains(&amps) => self.device().programmed_current = amps,
            Ok(_) => self.fail(-222, "Data out of range"),
            Err(_) => self.fail(-224, "Illegal parameter value"),
        }
    }

    fn switch_output(&mut self, value: &str) {
        match State::from_reply(value) {
            Ok(state) => self.device().output = state,
            Err(_) => self.fail(-224, "Illegal parameter value"),
        }
    }

    /// Reply to the pending command once [`RESPONSE_DELAY`] has passed. Consumes it.
    fn take_reply(&mut self, now: Instant) -> Option<Vec<u8>> {
        self.pending.as_ref()?;
        let written = self.devices.get(&self.address)?.last_command?;
        if now.duration_since(written) < RESPONSE_DELAY {
            return None;
        }
        let command = self.pending.take()?;
        self.device().last_command = Some(now);
        let mut reply = match self.dialect {
            Dialect::Genesys => Some(self.reply_genesys(&command)),
            Dialect::Scpi => self.reply_scpi(&command),
        }?
        .into_bytes();
        reply.push(self.dialect.terminator());
        Some(reply)
    }

    fn reply_genesys(&mut self, command: &str) -> String {
        if self.write_error {
            return "E1".into();
        }
        let device = self.device();
        match command {
            "DVC?" => {
                let mv = device.measure_voltage();
                let mc = device.measure_current();
                format!(
                    "{mv:.6}, {:.6}, {mc:.6}, {:.6}, 0.0, 0.0",
                    device.programmed_voltage, device.programmed_current
                )
            }
            "PV?" => device.programmed_voltage.to_argument(),
            "MV?" => device.measure_voltage().to_argument(),
            "PC?" => device.programmed_current.to_argument(),
            "MC?" => device.measure_current().to_argument(),
            "IDN?" => device.identity.clone(),
            "SN?" => device.serial.clone(),
            "OUT?" => device.output.to_argument(),
            _ => "OK".into(),
        }
    }

    /// `None` for commands the SCPI family does not answer.
    fn reply_scpi(&mut self, command: &str) -> Option<String> {
        if self.write_error {
            return Some(String::new());
        }
        if command == "SYST:ERR?" {
            let entry = self.errors.pop_front().unwrap_or_else(Diagnostic::none);
            return Some(entry.to_string());
        }
        let max = model(self.dialect);
        let device = self.device();
        let reply = match command {
            "OUTP?" => device.output.to_argument(),
            "VOLT?" => device.programmed_voltage.to_argument(),
            "VOLT? MAX" => max.max_voltage.to_argument(),
            "CURR?" => device.programmed_current.to_argument(),
            "CURR? MAX" => max.max_current.to_argument(),
            "MEAS:VOLT?" => device.measure_voltage().to_argument(),
            "MEAS:CURR?" => device.measure_current().to_argument(),
            "MEAS:POW?" => (device.measure_voltage() * device.measure_current()).to_argument(),
            "*IDN?" => device.identity.clone(),
            _ => return None,
        };
        Some(reply)
    }
}

/// Error of an emulated port.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulatorError {
    #[error("Emulated port is closed")]
    Closed,
}

impl embedded_io::Error for EmulatorError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            EmulatorError::Closed => embedded_io::ErrorKind::NotConnected,
        }
    }
}

/// An emulated port onto a bus of simulated instruments.
pub struct Emulator {
    bus: Arc<Mutex<Bus>>,
    /// Reply bytes released by the bus and not read yet.
    outgoing: VecDeque<u8>,
    open: bool,
    /// `false` when opened at a line speed the devices do not use: nothing gets through.
    line_ok: bool,
}

impl Emulator {
    /// A single port with its own bus, device 0 already present.
    pub fn new(dialect: Dialect) -> Self {
        Emulator {
            bus: Arc::new(Mutex::new(Bus::new(dialect))),
            outgoing: VecDeque::new(),
            open: true,
            line_ok: true,
        }
    }

    /// Snapshot of the device at `address`, if it has been created.
    pub fn record(&self, address: u8) -> Option<DeviceRecord> {
        self.bus.lock().devices.get(&address).cloned()
    }

    /// Move a reply from the bus to the receive queue once it is due.
    fn poll(&mut self) {
        if !self.outgoing.is_empty() || !self.line_ok {
            return;
        }
        if let Some(reply) = self.bus.lock().take_reply(Instant::now()) {
            self.outgoing.extend(reply);
        }
    }
}

impl embedded_io::ErrorType for Emulator {
    type Error = EmulatorError;
}

impl embedded_io::Write for Emulator {
    /// Always reports the full length as written.
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if !self.open {
            return Err(EmulatorError::Closed);
        }
        if self.line_ok {
            self.bus.lock().receive(buf, Instant::now());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if !self.open {
            return Err(EmulatorError::Closed);
        }
        Ok(())
    }
}

impl embedded_io::Read for Emulator {
    /// Returns `Ok(0)` while no reply is due.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if !self.open {
            return Err(EmulatorError::Closed);
        }
        self.poll();
        let count = buf.len().min(self.outgoing.len());
        for (slot, byte) in buf.iter_mut().zip(self.outgoing.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

impl Transport for Emulator {
    fn bytes_to_read(&mut self) -> Result<usize, Self::Error> {
        if !self.open {
            return Err(EmulatorError::Closed);
        }
        self.poll();
        Ok(self.outgoing.len())
    }

    fn clear_input(&mut self) -> Result<(), Self::Error> {
        self.outgoing.clear();
        Ok(())
    }

    fn clear_output(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
        self.outgoing.clear();
        self.bus.lock().pending = None;
    }
}

/// Hands out [`Emulator`] ports onto one shared bus.
pub struct EmulatorOpener {
    bus: Arc<Mutex<Bus>>,
    selected: SelectedAddress,
    line_rate: Option<u32>,
    attempts: Vec<u32>,
}

impl EmulatorOpener {
    pub fn new(dialect: Dialect) -> Self {
        EmulatorOpener {
            bus: Arc::new(Mutex::new(Bus::new(dialect))),
            selected: SelectedAddress::default(),
            line_rate: None,
            attempts: Vec::new(),
        }
    }

    /// Another opener onto the same bus, for a second client on a multi-drop line.
    pub fn share(&self) -> Self {
        EmulatorOpener {
            bus: Arc::clone(&self.bus),
            selected: self.selected.clone(),
            line_rate: self.line_rate,
            attempts: Vec::new(),
        }
    }

    /// Only ports opened at `baud_rate` reach the devices.
    pub fn with_line_rate(mut self, baud_rate: u32) -> Self {
        self.line_rate = Some(baud_rate);
        self
    }

    /// Baud rates of every `open` call so far.
    pub fn attempts(&self) -> &[u32] {
        &self.attempts
    }

    /// Snapshot of the device at `address`, if it has been created.
    pub fn record(&self, address: u8) -> Option<DeviceRecord> {
        self.bus.lock().devices.get(&address).cloned()
    }
}

impl Opener for EmulatorOpener {
    type Transport = Emulator;

    fn open(&mut self, baud_rate: u32) -> Result<Emulator, EmulatorError> {
        self.attempts.push(baud_rate);
        Ok(Emulator {
            bus: Arc::clone(&self.bus),
            outgoing: VecDeque::new(),
            open: true,
            line_ok: self.line_rate.is_none_or(|rate| rate == baud_rate),
        })
    }

    fn describe(&self) -> String {
        format!("emulated {:?} bus", self.bus.lock().dialect)
    }

    fn selected_address(&self) -> SelectedAddress {
        self.selected.clone()
    }
}
