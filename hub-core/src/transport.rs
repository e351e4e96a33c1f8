//! Byte transport consumed by the link session.

/// Half-duplex serial channel to the Device Link board.
///
/// Implementations must never block: firmware wraps an interrupt-buffered UART
/// and the emulator wraps an in-memory simulated peer.
pub trait SerialPort {
    /// Transport-specific failure.
    type Error;

    /// Returns the next received byte, or `None` when nothing is buffered.
    fn read_byte(&mut self) -> Option<u8>;

    /// Queues `bytes` for transmission and reports how many were accepted.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, Self::Error>;

    /// Waits until queued bytes have been handed to the hardware.
    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
