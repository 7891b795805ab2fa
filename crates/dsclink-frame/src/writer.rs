use bytes::BytesMut;
use dsclink_transport::ByteChannel;
use tracing::debug;

use crate::codec::{encode_frame, FrameConfig};
use crate::control::control_name;
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Writes complete frames to a byte channel.
///
/// Each frame is encoded into an internal buffer and handed to the channel
/// in a single write.
pub struct FrameWriter<C> {
    inner: C,
    buf: BytesMut,
    config: FrameConfig,
}

impl<C: ByteChannel> FrameWriter<C> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: C) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: C, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and send a payload.
    pub fn send_frame(&mut self, payload: &[u8], is_final: bool) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_frame(payload, is_final, &mut self.buf);
        self.inner.write_bytes(&self.buf)?;
        debug!(len = payload.len(), is_final, "frame sent");
        Ok(())
    }

    /// Send a single control byte outside any frame.
    pub fn send_control(&mut self, byte: u8) -> Result<()> {
        self.inner.write_byte(byte)?;
        debug!(control = control_name(byte), "control byte sent");
        Ok(())
    }

    /// Borrow the underlying channel.
    pub fn get_ref(&self) -> &C {
        &self.inner
    }

    /// Mutably borrow the underlying channel.
    pub fn get_mut(&mut self) -> &mut C {
        &mut self.inner
    }

    /// Consume the writer and return the inner channel.
    pub fn into_inner(self) -> C {
        self.inner
    }
}
