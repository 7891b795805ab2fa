use dsclink_transport::{ByteChannel, RawByte};
use tracing::{trace, warn};

use crate::error::Result;

/// Escape byte inserted by the line discipline's parity marking.
pub const ESC: u8 = 0xFF;

/// One logical byte read off the line, classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// A valid data byte.
    Data(u8),
    /// No byte within the channel's read window.
    Timeout,
    /// The line reported a parity or framing error (`FF 00 x`).
    LineError,
    /// `FF` followed by something other than `FF` or `00`.
    Violation(u8),
}

/// Strips the line discipline's `FF` escaping from a byte channel.
///
/// Callers that only care whether a usable byte arrived use
/// [`read_logical`](Self::read_logical); timeouts, line errors and escape
/// violations all collapse to `None` there. The byte following a line
/// error or a violation is always consumed so the stream stays aligned.
pub struct EscapeDecoder<C> {
    inner: C,
}

impl<C: ByteChannel> EscapeDecoder<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    /// Read and classify the next logical byte.
    pub fn read_decoded(&mut self) -> Result<Decoded> {
        let first = match self.inner.read_raw_byte()? {
            RawByte::Byte(b) => b,
            RawByte::Timeout => return Ok(Decoded::Timeout),
        };
        if first != ESC {
            return Ok(Decoded::Data(first));
        }

        let second = match self.inner.read_raw_byte()? {
            RawByte::Byte(b) => b,
            RawByte::Timeout => return Ok(Decoded::Timeout),
        };
        match second {
            ESC => Ok(Decoded::Data(ESC)),
            0x00 => {
                let damaged = self.inner.read_raw_byte()?;
                trace!(?damaged, "line error");
                Ok(Decoded::LineError)
            }
            other => {
                warn!(byte = other, "impossible escape sequence after 0xFF");
                let _ = self.inner.read_raw_byte()?;
                Ok(Decoded::Violation(other))
            }
        }
    }

    /// Read the next valid data byte, or `None` if none is available.
    pub fn read_logical(&mut self) -> Result<Option<u8>> {
        Ok(match self.read_decoded()? {
            Decoded::Data(b) => Some(b),
            Decoded::Timeout | Decoded::LineError | Decoded::Violation(_) => None,
        })
    }

    /// Discard input until no valid byte is available.
    ///
    /// A line error ends the drain just like a quiet line does.
    ///
    /// Returns the number of logical reads consumed, not counting the final
    /// empty one.
    pub fn drain(&mut self) -> Result<usize> {
        let mut discarded = 0usize;
        while self.read_logical()?.is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            trace!(discarded, "drained stale input");
        }
        Ok(discarded)
    }

    /// Borrow the underlying channel.
    pub fn get_ref(&self) -> &C {
        &self.inner
    }

    /// Mutably borrow the underlying channel.
    pub fn get_mut(&mut self) -> &mut C {
        &mut self.inner
    }

    /// Consume the decoder and return the channel.
    pub fn into_inner(self) -> C {
        self.inner
    }
}
