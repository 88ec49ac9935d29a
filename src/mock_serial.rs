//! We use this mocking module in unit tests to emulate a serial port.
//!
//! Unlike the [`Emulator`](crate::emulator::Emulator) it has no timing and no instrument
//! behaviour: every query written hands out the next scripted reply, and reads or writes can
//! be made to fail on demand.

use std::collections::VecDeque;

use thiserror::Error;

use crate::transport::{Opener, Transport};

/// Our mock type used to emulate a serial port.
pub struct MockSerial {
    /// Last line written to the mock serial port
    write_buffer: heapless::Vec<u8, 256>,
    /// Buffer containing the reply to be read
    read_buffer: heapless::Vec<u8, 256>,
    /// Current position in the read buffer
    read_position: usize,
    /// Replies handed out one per query written
    replies: VecDeque<Vec<u8>>,
    /// Number of successful writes
    write_calls: usize,
    open: bool,
    /// Flag to simulate write errors
    should_error_on_write: bool,
    /// Flag to simulate read errors
    should_error_on_read: bool,
    /// Writes of lines starting with this fail
    failing_line: Option<Vec<u8>>,
}

#[derive(Error, Debug)]
pub enum MockSerialError {
    #[error("Simulated timeout")]
    Timeout,
    #[error("Simulated buffer overflow")]
    BufferOverflow,
    #[error("Simulated invalid data")]
    InvalidData,
    #[error("Simulated error")]
    SimulatedError,
    /// No data available
    #[error("Would block")]
    WouldBlock,
}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::Timeout => embedded_io::ErrorKind::TimedOut,
            MockSerialError::BufferOverflow => embedded_io::ErrorKind::OutOfMemory,
            MockSerialError::InvalidData => embedded_io::ErrorKind::InvalidData,
            MockSerialError::SimulatedError => embedded_io::ErrorKind::Other,
            MockSerialError::WouldBlock => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = MockSerialError;
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let failing = self
            .failing_line
            .as_ref()
            .is_some_and(|line| buf.starts_with(line));
        if self.should_error_on_write || failing {
            return Err(MockSerialError::SimulatedError);
        }

        let available_space = self.write_buffer.capacity() - self.write_buffer.len();
        if buf.len() > available_space {
            return Err(MockSerialError::BufferOverflow);
        }

        for &byte in buf {
            self.write_buffer
                .push(byte)
                .map_err(|_| MockSerialError::BufferOverflow)?;
        }
        self.write_calls += 1;

        if buf.contains(&b'?') {
            if let Some(reply) = self.replies.pop_front() {
                self.set_read_data(&reply)?;
            }
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }
        Ok(())
    }
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_read {
            return Err(MockSerialError::SimulatedError);
        }

        if self.read_position >= self.read_buffer.len() {
            return Err(MockSerialError::WouldBlock);
        }

        let available_bytes = self.read_buffer.len() - self.read_position;
        let bytes_to_read = core::cmp::min(buf.len(), available_bytes);

        buf[..bytes_to_read]
            .copy_from_slice(&self.read_buffer[self.read_position..self.read_position + bytes_to_read]);

        self.read_position += bytes_to_read;
        Ok(bytes_to_read)
    }
}

impl Transport for MockSerial {
    fn bytes_to_read(&mut self) -> Result<usize, Self::Error> {
        if self.should_error_on_read {
            return Err(MockSerialError::SimulatedError);
        }
        Ok(self.read_buffer.len() - self.read_position)
    }

    fn clear_input(&mut self) -> Result<(), Self::Error> {
        self.read_buffer.clear();
        self.read_position = 0;
        Ok(())
    }

    /// Only the line written after the last clear is kept.
    fn clear_output(&mut self) -> Result<(), Self::Error> {
        self.write_buffer.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
    }
}

impl MockSerial {
    /// Create a new MockSerial instance with empty buffers
    pub fn new() -> Self {
        Self {
            write_buffer: heapless::Vec::new(),
            read_buffer: heapless::Vec::new(),
            read_position: 0,
            replies: VecDeque::new(),
            write_calls: 0,
            open: true,
            should_error_on_write: false,
            should_error_on_read: false,
            failing_line: None,
        }
    }

    /// Create a MockSerial which answers queries with `replies`, in order
    pub fn with_replies<R: AsRef<[u8]>>(replies: impl IntoIterator<Item = R>) -> Self {
        let mut mock = Self::new();
        for reply in replies {
            mock.queue_reply(reply.as_ref());
        }
        mock
    }

    /// Add a reply for a later query
    pub fn queue_reply(&mut self, reply: &[u8]) {
        self.replies.push_back(reply.to_vec());
    }

    /// Set the data that will be returned when read() is called
    pub fn set_read_data(&mut self, data: &[u8]) -> Result<(), MockSerialError> {
        self.read_buffer.clear();
        self.read_position = 0;

        for &byte in data {
            self.read_buffer
                .push(byte)
                .map_err(|_| MockSerialError::BufferOverflow)?;
        }

        Ok(())
    }

    /// Get a reference to the data that was written to this mock serial port
    pub fn written_data(&self) -> &[u8] {
        &self.write_buffer
    }

    /// Number of writes which reached the port
    pub fn write_calls(&self) -> usize {
        self.write_calls
    }

    /// Reset the read position to the beginning of the read buffer
    pub fn reset_read_position(&mut self) {
        self.read_position = 0;
    }

    /// Configure whether write operations should fail with an error
    pub fn set_write_error(&mut self, should_error: bool) {
        self.should_error_on_write = should_error;
    }

    /// Configure whether read operations should fail with an error
    pub fn set_read_error(&mut self, should_error: bool) {
        self.should_error_on_read = should_error;
    }

    /// Make every write of a line starting with `line` fail
    pub fn set_failing_line(&mut self, line: Option<Vec<u8>>) {
        self.failing_line = line;
    }
}

/// Opens a fresh [`MockSerial`] scripted with the same replies every time.
pub struct MockOpener {
    replies: Vec<Vec<u8>>,
    /// Baud rates passed to every `open` call
    pub opened: Vec<u32>,
    /// Flag to simulate a port which cannot be opened
    pub fail_open: bool,
    /// Passed on to every port opened
    pub failing_line: Option<Vec<u8>>,
}

impl MockOpener {
    pub fn new<R: AsRef<[u8]>>(replies: impl IntoIterator<Item = R>) -> Self {
        Self {
            replies: replies.into_iter().map(|r| r.as_ref().to_vec()).collect(),
            opened: Vec::new(),
            fail_open: false,
            failing_line: None,
        }
    }
}

impl Opener for MockOpener {
    type Transport = MockSerial;

    fn open(&mut self, baud_rate: u32) -> Result<MockSerial, MockSerialError> {
        self.opened.push(baud_rate);
        if self.fail_open {
            return Err(MockSerialError::SimulatedError);
        }
        let mut port = MockSerial::with_replies(&self.replies);
        port.set_failing_line(self.failing_line.clone());
        Ok(port)
    }

    fn describe(&self) -> String {
        "mock".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Error, Read, Write};

    #[test]
    fn test_new_mock_serial() {
        let mock = MockSerial::new();
        assert_eq!(mock.written_data().len(), 0);
        assert_eq!(mock.read_position, 0);
        assert!(mock.is_open());
        assert!(!mock.should_error_on_write);
        assert!(!mock.should_error_on_read);
    }

    #[test]
    fn test_write_data() {
        let mut mock = MockSerial::new();
        let test_data = b"VOLT 5\n";

        let result = mock.write(test_data);
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), test_data.len());
        assert_eq!(mock.written_data(), test_data);
        assert_eq!(mock.write_calls(), 1);
    }

    #[test]
    fn test_clear_output_keeps_last_line() {
        let mut mock = MockSerial::new();
        mock.write(b"SYST:REM\n").unwrap();
        mock.clear_output().unwrap();
        mock.write(b"*CLS\n").unwrap();
        assert_eq!(mock.written_data(), b"*CLS\n");
    }

    #[test]
    fn test_write_buffer_overflow() {
        let mut mock = MockSerial::new();
        let large_data = vec![0u8; 300]; // Larger than 256 byte capacity

        let result = mock.write(&large_data);
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), MockSerialError::BufferOverflow));
    }

    #[test]
    fn test_query_hands_out_reply() {
        let mut mock = MockSerial::with_replies([b"5.0\n"]);
        mock.write(b"SYST:REM\n").unwrap();
        assert_eq!(mock.bytes_to_read().unwrap(), 0);

        mock.write(b"VOLT?\n").unwrap();
        assert_eq!(mock.bytes_to_read().unwrap(), 4);

        let mut buffer = [0u8; 8];
        let read = mock.read(&mut buffer).unwrap();
        assert_eq!(&buffer[..read], b"5.0\n");
    }

    #[test]
    fn test_read_partial_data() {
        let mut mock = MockSerial::new();
        mock.set_read_data(b"Long response data").unwrap();

        let mut buffer = [0u8; 5];
        let result = mock.read(&mut buffer);

        assert_eq!(result.unwrap(), 5);
        assert_eq!(&buffer, b"Long ");
    }

    #[test]
    fn test_read_timeout_when_no_data() {
        let mut mock = MockSerial::new();
        let mut buffer = [0u8; 10];

        let result = mock.read(&mut buffer);
        assert!(matches!(result.unwrap_err(), MockSerialError::WouldBlock));
    }

    #[test]
    fn test_clear_input_drops_reply() {
        let mut mock = MockSerial::new();
        mock.set_read_data(b"stale\n").unwrap();
        mock.clear_input().unwrap();
        assert_eq!(mock.bytes_to_read().unwrap(), 0);
    }

    #[test]
    fn test_write_error_simulation() {
        let mut mock = MockSerial::new();
        mock.set_write_error(true);

        let result = mock.write(b"test");

        assert!(matches!(result.unwrap_err(), MockSerialError::SimulatedError));
        assert_eq!(mock.written_data().len(), 0); // Nothing should be written
        assert_eq!(mock.write_calls(), 0);
    }

    #[test]
    fn test_failing_line() {
        let mut mock = MockSerial::new();
        mock.set_failing_line(Some(b"SYST:REM".to_vec()));
        assert!(mock.write(b"SYST:REM\n").is_err());
        assert!(mock.write(b"*CLS\n").is_ok());
        assert_eq!(mock.write_calls(), 1);
    }

    #[test]
    fn test_read_error_simulation() {
        let mut mock = MockSerial::new();
        mock.set_read_data(b"test data").unwrap();
        mock.set_read_error(true);

        let mut buffer = [0u8; 10];
        assert!(mock.read(&mut buffer).is_err());
        assert!(mock.bytes_to_read().is_err());

        mock.set_read_error(false);
        mock.reset_read_position();
        assert!(mock.read(&mut buffer).is_ok());
    }

    #[test]
    fn test_error_kinds() {
        assert!(matches!(MockSerialError::Timeout.kind(), embedded_io::ErrorKind::TimedOut));
        assert!(matches!(
            MockSerialError::BufferOverflow.kind(),
            embedded_io::ErrorKind::OutOfMemory
        ));
        assert!(matches!(
            MockSerialError::InvalidData.kind(),
            embedded_io::ErrorKind::InvalidData
        ));
        assert!(matches!(MockSerialError::SimulatedError.kind(), embedded_io::ErrorKind::Other));
        assert_eq!(MockSerialError::WouldBlock.to_string(), "Would block");
    }

    #[test]
    fn test_opener_scripts_every_port() {
        let mut opener = MockOpener::new([b"1\n"]);
        let mut first = opener.open(9600).unwrap();
        let second = opener.open(115_200).unwrap();
        assert_eq!(opener.opened, [9600, 115_200]);
        first.write(b"OUTP?\n").unwrap();
        assert_eq!(first.bytes_to_read().unwrap(), 2);
        assert_eq!(second.replies.len(), 1);

        opener.fail_open = true;
        assert!(opener.open(9600).is_err());
    }
}
