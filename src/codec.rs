//! Translation between semantic operations and the ASCII lines of each [`Dialect`], and parsing
//! of reply payloads into typed values.
//!
//! Nothing in here does I/O or keeps state.

use thiserror::Error;

use crate::types::{Dialect, Setting, State};

/// Separator between commands batched into one line.
pub const BATCH_SEPARATOR: char = ';';

/// Marks a command which the instrument answers.
pub const QUERY_MARKER: char = '?';

/// Failure to interpret a reply payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty reply")]
    Empty,
    #[error("cannot parse {0:?} as a number")]
    Number(String),
    #[error("cannot parse {0:?} as an on/off state")]
    State(String),
    #[error("reply {0:?} has too few fields")]
    Fields(String),
}

/// Semantic operations understood by at least one dialect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    SelectAddress(u8),
    SetVoltage(f64),
    SetCurrent(f64),
    SetOutput(State),
    Output,
    ProgrammedVoltage,
    ProgrammedCurrent,
    MeasuredVoltage,
    MeasuredCurrent,
    MeasuredPower,
    MaxVoltage,
    MaxCurrent,
    Identity,
    SerialNumber,
    ErrorQueue,
    /// Combined read-back of measured and programmed values (`DVC?`).
    Status,
    Local,
    Remote,
    ClearStatus,
}

impl Dialect {
    /// Wire text for `command`, without terminator.
    ///
    /// Returns `None` when the dialect has no such command.
    pub fn encode(self, command: &Command) -> Option<String> {
        use Command as C;
        let text = match (self, command) {
            (Dialect::Genesys, C::SelectAddress(address)) => format!("ADR {address}"),
            (Dialect::Scpi, C::SelectAddress(address)) => format!("ADDR {address}"),
            (_, C::SetVoltage(volts)) => {
                format!("{} {}", self.mnemonic(Setting::Voltage), volts.to_argument())
            }
            (_, C::SetCurrent(amps)) => {
                format!("{} {}", self.mnemonic(Setting::Current), amps.to_argument())
            }
            (_, C::SetOutput(state)) => {
                format!("{} {}", self.mnemonic(Setting::Output), state.to_argument())
            }
            (Dialect::Genesys, C::Output) => "OUT?".into(),
            (Dialect::Genesys, C::ProgrammedVoltage) => "PV?".into(),
            (Dialect::Genesys, C::ProgrammedCurrent) => "PC?".into(),
            (Dialect::Genesys, C::MeasuredVoltage) => "MV?".into(),
            (Dialect::Genesys, C::MeasuredCurrent) => "MC?".into(),
            (Dialect::Genesys, C::Identity) => "IDN?".into(),
            (Dialect::Genesys, C::SerialNumber) => "SN?".into(),
            (Dialect::Genesys, C::Status) => "DVC?".into(),
            (Dialect::Scpi, C::Output) => "OUTP?".into(),
            (Dialect::Scpi, C::ProgrammedVoltage) => "VOLT?".into(),
            (Dialect::Scpi, C::ProgrammedCurrent) => "CURR?".into(),
            (Dialect::Scpi, C::MeasuredVoltage) => "MEAS:VOLT?".into(),
            (Dialect::Scpi, C::MeasuredCurrent) => "MEAS:CURR?".into(),
            (Dialect::Scpi, C::MeasuredPower) => "MEAS:POW?".into(),
            (Dialect::Scpi, C::MaxVoltage) => "VOLT? MAX".into(),
            (Dialect::Scpi, C::MaxCurrent) => "CURR? MAX".into(),
            (Dialect::Scpi, C::Identity) => "*IDN?".into(),
            (Dialect::Scpi, C::ErrorQueue) => "SYST:ERR?".into(),
            (Dialect::Scpi, C::Local) => "SYST:LOC".into(),
            (Dialect::Scpi, C::Remote) => "SYST:REM".into(),
            (Dialect::Scpi, C::ClearStatus) => "*CLS".into(),
            _ => return None,
        };
        Some(text)
    }

    /// Literal payload the instrument sends back for a rejected command, if it has one.
    ///
    /// The SCPI family answers a bad command with an empty line and queues a diagnostic instead.
    pub const fn error_reply(self) -> Option<&'static str> {
        match self {
            Dialect::Genesys => Some("E1"),
            Dialect::Scpi => None,
        }
    }

    /// Address a line leaves selected when it holds its own select command, e.g. `ADR 3;PV 5`.
    pub fn selected_by(self, line: &str) -> Option<u8> {
        let header = match self {
            Dialect::Genesys => "ADR ",
            Dialect::Scpi => "ADDR ",
        };
        line.split(BATCH_SEPARATOR)
            .filter_map(|command| command.trim().strip_prefix(header)?.trim().parse().ok())
            .last()
    }
}

/// Upper-case, trim and terminate a command line.
pub fn normalize(command: &str, terminator: u8) -> String {
    let mut line = command.trim().to_ascii_uppercase();
    if !line.ends_with(terminator as char) {
        line.push(terminator as char);
    }
    line
}

/// Whether a line should be answered, judged by the presence of a query marker.
pub fn expects_reply(command: &str) -> bool {
    command.contains(QUERY_MARKER)
}

/// The final command of a `;` batch. Only this one is answered.
pub fn last_command(batch: &str) -> &str {
    batch
        .rsplit(BATCH_SEPARATOR)
        .next()
        .unwrap_or(batch)
        .trim()
}

/// Build the write-then-verify batch `<CMD> <value>;<CMD>?`.
pub fn write_then_verify(mnemonic: &str, value: &impl ToArgument) -> String {
    let mnemonic = mnemonic.trim().to_ascii_uppercase();
    format!(
        "{mnemonic} {}{BATCH_SEPARATOR}{mnemonic}{QUERY_MARKER}",
        value.to_argument()
    )
}

/// Strip the terminator (and any stray whitespace) from a raw reply.
pub fn payload(reply: &[u8], terminator: u8) -> String {
    let body = reply.strip_suffix(&[terminator]).unwrap_or(reply);
    String::from_utf8_lossy(body).trim().to_string()
}

/// Values which can be parsed from a reply payload.
pub trait FromReply: Sized {
    fn from_reply(payload: &str) -> Result<Self, ParseError>;
}

/// Values which can be sent as a command argument.
pub trait ToArgument {
    fn to_argument(&self) -> String;
}

impl FromReply for f64 {
    fn from_reply(payload: &str) -> Result<Self, ParseError> {
        let text = payload.trim();
        if text.is_empty() {
            return Err(ParseError::Empty);
        }
        text.parse()
            .map_err(|_| ParseError::Number(text.to_string()))
    }
}

impl FromReply for i32 {
    fn from_reply(payload: &str) -> Result<Self, ParseError> {
        let text = payload.trim();
        if text.is_empty() {
            return Err(ParseError::Empty);
        }
        text.parse()
            .map_err(|_| ParseError::Number(text.to_string()))
    }
}

impl FromReply for u32 {
    fn from_reply(payload: &str) -> Result<Self, ParseError> {
        let text = payload.trim();
        if text.is_empty() {
            return Err(ParseError::Empty);
        }
        text.parse()
            .map_err(|_| ParseError::Number(text.to_string()))
    }
}

impl FromReply for State {
    fn from_reply(payload: &str) -> Result<Self, ParseError> {
        let text = payload.trim().to_ascii_uppercase();
        if text.starts_with("OF") || text.starts_with('0') {
            Ok(State::Off)
        } else if text.starts_with("ON") || text.starts_with('1') {
            Ok(State::On)
        } else if text.is_empty() {
            Err(ParseError::Empty)
        } else {
            Err(ParseError::State(text))
        }
    }
}

impl FromReply for bool {
    fn from_reply(payload: &str) -> Result<Self, ParseError> {
        State::from_reply(payload).map(bool::from)
    }
}

impl FromReply for String {
    fn from_reply(payload: &str) -> Result<Self, ParseError> {
        Ok(payload.trim().to_string())
    }
}

impl ToArgument for f64 {
    fn to_argument(&self) -> String {
        format!("{self}")
    }
}

impl ToArgument for State {
    fn to_argument(&self) -> String {
        match self {
            State::On => "ON".into(),
            State::Off => "OFF".into(),
        }
    }
}

impl ToArgument for bool {
    fn to_argument(&self) -> String {
        State::from(*self).to_argument()
    }
}

impl ToArgument for String {
    fn to_argument(&self) -> String {
        self.clone()
    }
}

impl ToArgument for &str {
    fn to_argument(&self) -> String {
        (*self).to_string()
    }
}

/// Parsed `<manufacturer>, <model>, <serial>, <firmware>` identity reply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Identity {
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    /// Some firmware revisions leave this field out.
    pub firmware: String,
}

impl FromReply for Identity {
    fn from_reply(payload: &str) -> Result<Self, ParseError> {
        let mut fields = payload.split(',').map(str::trim);
        let mut next = || {
            fields
                .next()
                .filter(|field| !field.is_empty())
                .map(str::to_string)
        };
        let missing = || ParseError::Fields(payload.to_string());
        let manufacturer = next().ok_or_else(missing)?;
        let model = next().ok_or_else(missing)?;
        let serial = next().ok_or_else(missing)?;
        let firmware = next().unwrap_or_default();
        Ok(Identity {
            manufacturer,
            model,
            serial,
            firmware,
        })
    }
}

/// Reply to the Genesys `DVC?` status query.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Status {
    pub measured_voltage: f64,
    pub programmed_voltage: f64,
    pub measured_current: f64,
    pub programmed_current: f64,
    pub status_register: f64,
    pub fault_register: f64,
}

impl Status {
    /// Measured output power, watts.
    pub fn power(&self) -> f64 {
        self.measured_voltage * self.measured_current
    }
}

impl FromReply for Status {
    fn from_reply(payload: &str) -> Result<Self, ParseError> {
        let values = payload
            .split(',')
            .map(f64::from_reply)
            .collect::<Result<Vec<_>, _>>()?;
        let &[mv, pv, mc, pc, sr, fr] = values.as_slice() else {
            return Err(ParseError::Fields(payload.to_string()));
        };
        Ok(Status {
            measured_voltage: mv,
            programmed_voltage: pv,
            measured_current: mc,
            programmed_current: pc,
            status_register: sr,
            fault_register: fr,
        })
    }
}

/// An instrument-reported error, e.g. `-113,"Undefined header"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub code: i32,
    pub message: String,
}

impl Diagnostic {
    /// The entry an empty error queue reports.
    pub fn none() -> Self {
        Diagnostic {
            code: 0,
            message: "No error".into(),
        }
    }

    /// Genesys reports every rejected command as `E1`.
    pub fn command_error() -> Self {
        Diagnostic {
            code: 1,
            message: "Command error".into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.code != 0
    }
}

impl core::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{},\"{}\"", self.code, self.message)
    }
}

impl FromReply for Diagnostic {
    fn from_reply(payload: &str) -> Result<Self, ParseError> {
        let payload = payload.trim();
        let (code, message) = payload.split_once(',').unwrap_or((payload, ""));
        Ok(Diagnostic {
            code: i32::from_reply(code)?,
            message: message.trim().trim_matches('"').to_string(),
        })
    }
}

/// Genesys models carry their ratings in the name, `GEN<volts>-<amps>`.
///
/// Returns `(max_voltage, max_current)`.
pub fn limits_from_model(model: &str) -> Option<(f64, f64)> {
    let ratings = model.trim().strip_prefix("GEN")?;
    let (volts, amps) = ratings.split_once('-')?;
    Some((volts.parse().ok()?, amps.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_uppercases_and_terminates() {
        assert_eq!(normalize(" volt? ", b'\n'), "VOLT?\n");
        assert_eq!(normalize("PV 5\r", b'\r'), "PV 5\r");
    }

    #[test]
    fn reply_expectation() {
        assert!(expects_reply("MEAS:VOLT?"));
        assert!(expects_reply("PV 5;PV?"));
        assert!(!expects_reply("SYST:REM"));
        assert!(!expects_reply("ADR 3"));
    }

    #[test]
    fn last_command_of_batch() {
        assert_eq!(last_command("ADR 0;PV 5.0;OUT ON"), "OUT ON");
        assert_eq!(last_command("DVC?"), "DVC?");
    }

    #[test]
    fn write_then_verify_batch() {
        assert_eq!(write_then_verify("volt", &5.5), "VOLT 5.5;VOLT?");
        assert_eq!(write_then_verify("OUT", &true), "OUT ON;OUT?");
        assert_eq!(
            write_then_verify(Dialect::Scpi.mnemonic(Setting::Current), &0.25),
            "CURR 0.25;CURR?"
        );
    }

    #[test]
    fn encode_genesys() {
        let d = Dialect::Genesys;
        assert_eq!(d.encode(&Command::SelectAddress(6)).unwrap(), "ADR 6");
        assert_eq!(d.encode(&Command::SetVoltage(5.0)).unwrap(), "PV 5");
        assert_eq!(d.encode(&Command::SetOutput(State::Off)).unwrap(), "OUT OFF");
        assert_eq!(d.encode(&Command::Status).unwrap(), "DVC?");
        assert_eq!(d.encode(&Command::MaxVoltage), None);
        assert_eq!(d.encode(&Command::Remote), None);
    }

    #[test]
    fn select_in_line() {
        let d = Dialect::Genesys;
        assert_eq!(d.selected_by("ADR 3;PV 5\r"), Some(3));
        assert_eq!(d.selected_by("ADR 3;ADR 12;PV?\r"), Some(12));
        assert_eq!(d.selected_by("PV 5;PV?\r"), None);
        assert_eq!(d.selected_by("ADR X\r"), None);
        assert_eq!(Dialect::Scpi.selected_by("ADDR 2\n"), Some(2));
    }

    #[test]
    fn encode_scpi() {
        let d = Dialect::Scpi;
        assert_eq!(d.encode(&Command::SetCurrent(1.5)).unwrap(), "CURR 1.5");
        assert_eq!(d.encode(&Command::MaxVoltage).unwrap(), "VOLT? MAX");
        assert_eq!(d.encode(&Command::MeasuredPower).unwrap(), "MEAS:POW?");
        assert_eq!(d.encode(&Command::Identity).unwrap(), "*IDN?");
        assert_eq!(d.encode(&Command::Status), None);
    }

    #[test]
    fn parse_numbers() {
        assert_eq!(f64::from_reply(" 5.25 "), Ok(5.25));
        assert_eq!(f64::from_reply(""), Err(ParseError::Empty));
        assert!(matches!(f64::from_reply("E1"), Err(ParseError::Number(_))));
    }

    #[test]
    fn parse_states() {
        assert_eq!(State::from_reply("ON"), Ok(State::On));
        assert_eq!(State::from_reply("1"), Ok(State::On));
        assert_eq!(State::from_reply("off"), Ok(State::Off));
        assert_eq!(State::from_reply("0"), Ok(State::Off));
        assert_eq!(bool::from_reply("ON"), Ok(true));
        assert!(State::from_reply("maybe").is_err());
    }

    #[test]
    fn parse_identity() {
        let id = Identity::from_reply("ITECH Ltd., IT6932A, 800123, 1.05").unwrap();
        assert_eq!(id.manufacturer, "ITECH Ltd.");
        assert_eq!(id.model, "IT6932A");
        assert_eq!(id.serial, "800123");
        assert_eq!(id.firmware, "1.05");
        assert!(Identity::from_reply("ITECH Ltd., IT6932A").is_err());
    }

    #[test]
    fn parse_status() {
        let status =
            Status::from_reply("5.000000, 5.000000, 0.000000, 0.000000, 0.0, 0.0").unwrap();
        assert_eq!(status.measured_voltage, 5.0);
        assert_eq!(status.programmed_voltage, 5.0);
        assert_eq!(status.power(), 0.0);
        assert!(Status::from_reply("1.0, 2.0").is_err());
    }

    #[test]
    fn parse_diagnostic() {
        let none = Diagnostic::from_reply("0,\"No error\"").unwrap();
        assert_eq!(none, Diagnostic::none());
        assert!(!none.is_error());
        let bad = Diagnostic::from_reply("-113,\"Undefined header\"").unwrap();
        assert_eq!(bad.code, -113);
        assert_eq!(bad.message, "Undefined header");
        assert!(bad.is_error());
        assert_eq!(bad.to_string(), "-113,\"Undefined header\"");
    }

    #[test]
    fn payload_strips_terminator() {
        assert_eq!(payload(b"5.0\r", b'\r'), "5.0");
        assert_eq!(payload(b"\n", b'\n'), "");
    }

    #[test]
    fn genesys_model_limits() {
        assert_eq!(limits_from_model("GEN10-100"), Some((10.0, 100.0)));
        assert_eq!(limits_from_model("GEN600-2.6"), Some((600.0, 2.6)));
        assert_eq!(limits_from_model("IT6932A"), None);
    }
}
