use dsclink_transport::ByteChannel;
use tracing::debug;

use crate::codec::{read_frame_from, Frame, FrameConfig};
use crate::error::Result;
use crate::escape::EscapeDecoder;

/// Reads complete frames from a byte channel.
///
/// Escape decoding, unstuffing and validation happen internally; callers
/// get either a checked frame or an error saying why there is none. On a
/// missing start marker or a truncated frame the rest of the input is
/// drained so the next attempt starts on a clean line.
pub struct FrameReader<C> {
    decoder: EscapeDecoder<C>,
    config: FrameConfig,
}

impl<C: ByteChannel> FrameReader<C> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: C) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: C, config: FrameConfig) -> Self {
        Self {
            decoder: EscapeDecoder::new(inner),
            config,
        }
    }

    /// Read the next frame (blocking, bounded by the channel's byte timeout).
    pub fn read_frame(&mut self) -> Result<Frame> {
        let frame = read_frame_from(&mut self.decoder, self.config.max_payload_size)?;
        debug!(
            len = frame.payload.len(),
            is_final = frame.is_final,
            "frame received"
        );
        Ok(frame)
    }

    /// Read one logical byte outside a frame.
    pub fn read_logical(&mut self) -> Result<Option<u8>> {
        self.decoder.read_logical()
    }

    /// Discard pending input.
    pub fn drain(&mut self) -> Result<usize> {
        self.decoder.drain()
    }

    /// Borrow the underlying channel.
    pub fn get_ref(&self) -> &C {
        self.decoder.get_ref()
    }

    /// Mutably borrow the underlying channel.
    pub fn get_mut(&mut self) -> &mut C {
        self.decoder.get_mut()
    }

    /// Consume the reader and return the inner channel.
    pub fn into_inner(self) -> C {
        self.decoder.into_inner()
    }
}
