//! [`Transport`] over a local serial port, using the `serialport` crate.
//!
//! The port is configured like so:
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None
//! * Flow control: None

use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::transport::{Opener, Transport};

/// A serial port, `None` once closed.
pub struct SerialTransport(Option<Box<dyn SerialPort>>);

#[derive(Debug)]
pub struct SerialError(std::io::Error);

impl core::fmt::Display for SerialError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SerialError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl From<serialport::Error> for SerialError {
    fn from(e: serialport::Error) -> Self {
        SerialError(e.into())
    }
}

impl embedded_io::Error for SerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self.0.kind() {
            std::io::ErrorKind::NotFound => embedded_io::ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => embedded_io::ErrorKind::PermissionDenied,
            std::io::ErrorKind::NotConnected => embedded_io::ErrorKind::NotConnected,
            std::io::ErrorKind::BrokenPipe => embedded_io::ErrorKind::BrokenPipe,
            std::io::ErrorKind::InvalidInput => embedded_io::ErrorKind::InvalidInput,
            std::io::ErrorKind::InvalidData => embedded_io::ErrorKind::InvalidData,
            std::io::ErrorKind::TimedOut => embedded_io::ErrorKind::TimedOut,
            std::io::ErrorKind::Interrupted => embedded_io::ErrorKind::Interrupted,
            std::io::ErrorKind::Unsupported => embedded_io::ErrorKind::Unsupported,
            std::io::ErrorKind::OutOfMemory => embedded_io::ErrorKind::OutOfMemory,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl SerialTransport {
    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, SerialError> {
        self.0.as_mut().ok_or_else(|| {
            SerialError(std::io::Error::from(std::io::ErrorKind::NotConnected))
        })
    }
}

impl embedded_io::ErrorType for SerialTransport {
    type Error = SerialError;
}

impl embedded_io::Read for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        std::io::Read::read(self.port()?, buf).map_err(SerialError)
    }
}

impl embedded_io::Write for SerialTransport {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        std::io::Write::write(self.port()?, buf).map_err(SerialError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        std::io::Write::flush(self.port()?).map_err(SerialError)
    }
}

impl Transport for SerialTransport {
    fn bytes_to_read(&mut self) -> Result<usize, Self::Error> {
        Ok(self.port()?.bytes_to_read()? as usize)
    }

    fn clear_input(&mut self) -> Result<(), Self::Error> {
        Ok(self.port()?.clear(ClearBuffer::Input)?)
    }

    fn clear_output(&mut self) -> Result<(), Self::Error> {
        Ok(self.port()?.clear(ClearBuffer::Output)?)
    }

    fn is_open(&self) -> bool {
        self.0.is_some()
    }

    fn close(&mut self) {
        self.0 = None;
    }
}

/// Opens a serial port by name, e.g. `/dev/ttyUSB0` or `COM3`.
#[derive(Debug, Clone)]
pub struct SerialOpener {
    path: String,
    /// Timeout of a single blocking read or write on the port.
    timeout: Duration,
}

impl SerialOpener {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            timeout: Duration::from_millis(300),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Opener for SerialOpener {
    type Transport = SerialTransport;

    fn open(&mut self, baud_rate: u32) -> Result<SerialTransport, SerialError> {
        let port = serialport::new(&self.path, baud_rate)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .flow_control(FlowControl::None)
            .timeout(self.timeout)
            .open()?;
        Ok(SerialTransport(Some(port)))
    }

    fn describe(&self) -> String {
        self.path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::Error;

    #[test]
    fn error_kinds() {
        let timeout = SerialError(std::io::Error::from(std::io::ErrorKind::TimedOut));
        assert!(matches!(timeout.kind(), embedded_io::ErrorKind::TimedOut));

        let missing: SerialError =
            serialport::Error::new(serialport::ErrorKind::NoDevice, "gone").into();
        assert!(matches!(missing.kind(), embedded_io::ErrorKind::NotFound));
    }

    #[test]
    fn closed_transport() {
        let mut transport = SerialTransport(None);
        assert!(!transport.is_open());
        let err = transport.bytes_to_read().unwrap_err();
        assert!(matches!(err.kind(), embedded_io::ErrorKind::NotConnected));
    }

    #[test]
    fn missing_port_fails_to_open() {
        let mut opener = SerialOpener::new("/dev/does-not-exist-psu");
        assert_eq!(opener.describe(), "/dev/does-not-exist-psu");
        assert!(opener.open(9600).is_err());
    }
}
