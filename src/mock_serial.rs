//! We use this mocking module in unit tests to emulate a serial port.

/// Our mock type used to emulate a serial port.
pub struct MockSerial {
    /// Buffer to store data written to the mock serial port
    write_buffer: heapless::Vec<u8, 512>,
    /// Bytes the "device" has sent and the driver has not read yet
    read_buffer: heapless::Deque<u8, 512>,
    /// Flag to simulate write errors
    should_error_on_write: bool,
    /// Flag to simulate read errors
    should_error_on_read: bool,
}

#[derive(Debug)]
pub enum MockSerialError {
    /// Simulated buffer overflow
    BufferOverflow,
    /// Generic simulated error for testing
    SimulatedError,
    /// Would block - no data available
    WouldBlock,
}

impl core::fmt::Display for MockSerialError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl core::error::Error for MockSerialError {}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::BufferOverflow => embedded_io::ErrorKind::OutOfMemory,
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
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }

        self.write_buffer
            .extend_from_slice(buf)
            .map_err(|_| MockSerialError::BufferOverflow)?;

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

        if self.read_buffer.is_empty() {
            return Err(MockSerialError::WouldBlock);
        }

        let mut count = 0;
        for slot in buf.iter_mut() {
            match self.read_buffer.pop_front() {
                Some(byte) => {
                    *slot = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }
}

impl embedded_io::ReadReady for MockSerial {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        if self.should_error_on_read {
            return Err(MockSerialError::SimulatedError);
        }
        Ok(!self.read_buffer.is_empty())
    }
}

impl MockSerial {
    /// Create a new MockSerial instance with empty buffers
    pub fn new() -> Self {
        Self {
            write_buffer: heapless::Vec::new(),
            read_buffer: heapless::Deque::new(),
            should_error_on_write: false,
            should_error_on_read: false,
        }
    }

    /// Queue bytes for the driver to receive, after anything still unread
    pub fn push_read_data(&mut self, data: &[u8]) -> Result<(), MockSerialError> {
        for &byte in data {
            self.read_buffer
                .push_back(byte)
                .map_err(|_| MockSerialError::BufferOverflow)?;
        }
        Ok(())
    }

    /// Get a reference to the data that was written to this mock serial port
    pub fn written_data(&self) -> &[u8] {
        &self.write_buffer
    }

    /// Clear the write buffer
    pub fn clear_written_data(&mut self) {
        self.write_buffer.clear();
    }

    /// Configure whether write operations should fail with an error
    pub fn set_write_error(&mut self, should_error: bool) {
        self.should_error_on_write = should_error;
    }

    /// Configure whether read operations should fail with an error
    pub fn set_read_error(&mut self, should_error: bool) {
        self.should_error_on_read = should_error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Read, ReadReady, Write};

    #[test]
    fn test_write_multiple_times() {
        let mut mock = MockSerial::new();
        mock.write(b"Hello, ").unwrap();
        mock.write(b"World!").unwrap();
        assert_eq!(mock.written_data(), b"Hello, World!");

        mock.clear_written_data();
        assert!(mock.written_data().is_empty());
    }

    #[test]
    fn test_read_ready_tracks_pending_bytes() {
        let mut mock = MockSerial::new();
        assert!(!mock.read_ready().unwrap());

        mock.push_read_data(b"Hi").unwrap();
        assert!(mock.read_ready().unwrap());

        let mut buffer = [0u8; 10];
        assert_eq!(mock.read(&mut buffer).unwrap(), 2);
        assert_eq!(&buffer[..2], b"Hi");
        assert!(!mock.read_ready().unwrap());
        assert!(matches!(mock.read(&mut buffer), Err(MockSerialError::WouldBlock)));
    }

    #[test]
    fn test_pushes_append() {
        let mut mock = MockSerial::new();
        mock.push_read_data(b"Hello").unwrap();
        let mut buffer = [0u8; 3];
        mock.read(&mut buffer).unwrap();
        mock.push_read_data(b" World").unwrap();

        let mut rest = [0u8; 16];
        let count = mock.read(&mut rest).unwrap();
        assert_eq!(&rest[..count], b"lo World");
    }

    #[test]
    fn test_error_simulation() {
        let mut mock = MockSerial::new();
        mock.set_write_error(true);
        assert!(matches!(mock.write(b"test"), Err(MockSerialError::SimulatedError)));
        assert!(mock.written_data().is_empty());

        mock.push_read_data(b"data").unwrap();
        mock.set_read_error(true);
        assert!(mock.read_ready().is_err());
        mock.set_read_error(false);
        assert!(mock.read_ready().unwrap());
    }
}
