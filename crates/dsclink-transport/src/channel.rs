use std::time::Duration;

use crate::error::Result;

/// Outcome of a single raw read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawByte {
    /// A byte arrived on the line.
    Byte(u8),
    /// Nothing arrived within the per-byte window.
    Timeout,
}

/// A half-duplex byte channel with bounded reads.
///
/// Implementations hide interrupted system calls: `EINTR` is retried and
/// never surfaces as an error. A read that sees no data reports
/// [`RawByte::Timeout`], which is distinct from an I/O failure.
pub trait ByteChannel {
    /// Read one raw byte, waiting at most the channel's per-byte timeout.
    fn read_raw_byte(&mut self) -> Result<RawByte>;

    /// Wait until input is available or `timeout` elapses.
    ///
    /// Returns `true` immediately when bytes are already buffered. A zero
    /// timeout never blocks.
    fn wait_for_input(&mut self, timeout: Duration) -> Result<bool>;

    /// Write the whole buffer.
    fn write_bytes(&mut self, buf: &[u8]) -> Result<()>;

    /// Block until everything written has left the line.
    fn drain_output(&mut self) -> Result<()>;

    /// Reconfigure the transport speed in bits per second.
    fn set_speed(&mut self, bps: u32) -> Result<()>;

    /// Current transport speed in bits per second.
    fn speed(&self) -> u32;

    /// Write a single control byte.
    fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.write_bytes(&[byte])
    }
}

impl<C: ByteChannel + ?Sized> ByteChannel for &mut C {
    fn read_raw_byte(&mut self) -> Result<RawByte> {
        (**self).read_raw_byte()
    }

    fn wait_for_input(&mut self, timeout: Duration) -> Result<bool> {
        (**self).wait_for_input(timeout)
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        (**self).write_bytes(buf)
    }

    fn drain_output(&mut self) -> Result<()> {
        (**self).drain_output()
    }

    fn set_speed(&mut self, bps: u32) -> Result<()> {
        (**self).set_speed(bps)
    }

    fn speed(&self) -> u32 {
        (**self).speed()
    }
}
