//! [`SerialPort`] adapter over a pair of `embedded-io` halves.
//!
//! The receive half is only read when it reports buffered data, so the hub
//! scheduler never parks inside the UART driver.

use embedded_io::{Read, ReadReady, Write};
use hub_core::SerialPort;

/// Device Link UART split into its receive and transmit halves.
pub struct IoSerial<R, W> {
    rx: R,
    tx: W,
    rx_errors: u32,
}

impl<R, W> IoSerial<R, W> {
    pub const fn new(rx: R, tx: W) -> Self {
        Self {
            rx,
            tx,
            rx_errors: 0,
        }
    }

    /// Receive faults (framing, noise, overrun) seen since start-up.
    #[must_use]
    pub const fn rx_errors(&self) -> u32 {
        self.rx_errors
    }
}

impl<R, W> SerialPort for IoSerial<R, W>
where
    R: Read + ReadReady,
    W: Write,
{
    type Error = W::Error;

    fn read_byte(&mut self) -> Option<u8> {
        match self.rx.read_ready() {
            Ok(true) => {}
            Ok(false) => return None,
            Err(_) => {
                self.rx_errors = self.rx_errors.wrapping_add(1);
                return None;
            }
        }

        let mut byte = [0u8; 1];
        match self.rx.read(&mut byte) {
            Ok(1) => Some(byte[0]),
            Ok(_) => None,
            Err(_) => {
                self.rx_errors = self.rx_errors.wrapping_add(1);
                None
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, Self::Error> {
        self.tx.write(bytes)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.tx.flush()
    }
}

#[cfg(test)]
mod tests {
    use core::convert::Infallible;
    use std::collections::VecDeque;
    use std::vec::Vec;

    use embedded_io::{ErrorKind, ErrorType};

    use super::*;

    #[derive(Default)]
    struct Inbound {
        bytes: VecDeque<u8>,
        fail_next: bool,
    }

    impl ErrorType for Inbound {
        type Error = ErrorKind;
    }

    impl ReadReady for Inbound {
        fn read_ready(&mut self) -> Result<bool, Self::Error> {
            Ok(self.fail_next || !self.bytes.is_empty())
        }
    }

    impl Read for Inbound {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            if self.fail_next {
                self.fail_next = false;
                return Err(ErrorKind::InvalidData);
            }
            let mut count = 0;
            for slot in buf.iter_mut() {
                let Some(byte) = self.bytes.pop_front() else {
                    break;
                };
                *slot = byte;
                count += 1;
            }
            Ok(count)
        }
    }

    #[derive(Default)]
    struct Outbound {
        bytes: Vec<u8>,
        flushes: usize,
    }

    impl ErrorType for Outbound {
        type Error = Infallible;
    }

    impl Write for Outbound {
        fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.bytes.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn idle_line_reads_nothing() {
        let mut port = IoSerial::new(Inbound::default(), Outbound::default());
        assert_eq!(port.read_byte(), None);
        assert_eq!(port.rx_errors(), 0);
    }

    #[test]
    fn buffered_reply_is_read_one_byte_at_a_time() {
        let inbound = Inbound {
            bytes: b"$00".iter().copied().collect(),
            fail_next: false,
        };
        let mut port = IoSerial::new(inbound, Outbound::default());

        assert_eq!(port.read_byte(), Some(b'$'));
        assert_eq!(port.read_byte(), Some(b'0'));
        assert_eq!(port.read_byte(), Some(b'0'));
        assert_eq!(port.read_byte(), None);
    }

    #[test]
    fn receive_fault_is_counted_and_reading_continues() {
        let inbound = Inbound {
            bytes: b".".iter().copied().collect(),
            fail_next: true,
        };
        let mut port = IoSerial::new(inbound, Outbound::default());

        assert_eq!(port.read_byte(), None);
        assert_eq!(port.rx_errors(), 1);
        assert_eq!(port.read_byte(), Some(b'.'));
    }

    #[test]
    fn frames_pass_through_to_the_transmitter() {
        let mut port = IoSerial::new(Inbound::default(), Outbound::default());

        assert_eq!(port.write(b"$0000B1.\r"), Ok(9));
        assert_eq!(port.flush(), Ok(()));
        assert_eq!(port.tx.bytes.as_slice(), b"$0000B1.\r");
        assert_eq!(port.tx.flushes, 1);
    }
}
