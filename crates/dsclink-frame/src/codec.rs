use bytes::{Buf, BufMut, Bytes, BytesMut};
use dsclink_transport::ByteChannel;
use tracing::warn;

use crate::error::{FrameError, Result};
use crate::escape::EscapeDecoder;

/// Data link escape: introduces every frame marker.
pub const DLE: u8 = 0x10;
/// Start of frame.
pub const STX: u8 = 0x02;
/// End of the last frame of a message.
pub const ETX: u8 = 0x03;
/// End of a frame that more frames follow.
pub const ETB: u8 = 0x17;

/// Payload header: category (1) + operation (1) + length (2 LE) = 4 bytes.
pub const HEADER_SIZE: usize = 4;

/// Default maximum payload size: 8 KiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 8 * 1024;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Unstuffed payload, header included.
    pub payload: Bytes,
    /// `false` when the sender marked the frame as a continuation.
    pub is_final: bool,
}

impl Frame {
    /// Create a new frame.
    pub fn new(payload: impl Into<Bytes>, is_final: bool) -> Self {
        Self {
            payload: payload.into(),
            is_final,
        }
    }

    /// Payload bytes after the 4-byte header.
    pub fn body(&self) -> &[u8] {
        self.payload.get(HEADER_SIZE..).unwrap_or(&[])
    }

    /// Length announced by header bytes 2..4, if the header is present.
    pub fn declared_length(&self) -> Option<usize> {
        match self.payload.get(2..HEADER_SIZE) {
            Some(&[lo, hi]) => Some(u16::from_le_bytes([lo, hi]) as usize),
            _ => None,
        }
    }
}

/// The end marker for a frame.
pub fn terminator(is_final: bool) -> u8 {
    if is_final {
        ETX
    } else {
        ETB
    }
}

/// XOR of every payload byte with the end marker.
pub fn checksum(payload: &[u8], terminator: u8) -> u8 {
    payload.iter().fold(terminator, |acc, byte| acc ^ byte)
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌─────────┬──────────────────────────┬─────────────┬──────────┐
/// │ DLE STX │ payload, DLE sent twice  │ DLE ETX|ETB │ checksum │
/// │ 10 02   │                          │ 10 03|17    │ (1B)     │
/// └─────────┴──────────────────────────┴─────────────┴──────────┘
/// ```
pub fn encode_frame(payload: &[u8], is_final: bool, dst: &mut BytesMut) {
    let marker = terminator(is_final);
    let stuffed = payload.iter().filter(|&&byte| byte == DLE).count();
    dst.reserve(payload.len() + stuffed + 5);

    dst.put_slice(&[DLE, STX]);
    // Each run ends with the DLE that needs doubling, if any.
    for run in payload.split_inclusive(|&byte| byte == DLE) {
        dst.put_slice(run);
        if run.last() == Some(&DLE) {
            dst.put_u8(DLE);
        }
    }
    dst.put_slice(&[DLE, marker, checksum(payload, marker)]);
}

/// Decode one frame from the front of a buffer of logical bytes.
///
/// The consumed bytes are removed from `src`. When the frame start is
/// missing or the buffer ends early the whole buffer is discarded, as the
/// stream decoder drains the line in the same situation.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Frame> {
    let (result, consumed) = {
        let mut source = SliceSource { buf: &src[..], pos: 0 };
        let result = read_frame_from(&mut source, max_payload);
        (result, source.pos)
    };
    src.advance(consumed);
    result
}

/// Configuration for the frame codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    /// Maximum payload size in bytes, header included. Default: 8 KiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Logical byte supply for the frame decoder.
pub(crate) trait ByteSource {
    fn next_byte(&mut self) -> Result<Option<u8>>;

    /// Throw away whatever is left so the next frame starts clean.
    fn discard_pending(&mut self) -> Result<()>;
}

impl<C: ByteChannel> ByteSource for EscapeDecoder<C> {
    fn next_byte(&mut self) -> Result<Option<u8>> {
        self.read_logical()
    }

    fn discard_pending(&mut self) -> Result<()> {
        self.drain().map(|_| ())
    }
}

struct SliceSource<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl ByteSource for SliceSource<'_> {
    fn next_byte(&mut self) -> Result<Option<u8>> {
        let byte = self.buf.get(self.pos).copied();
        if byte.is_some() {
            self.pos += 1;
        }
        Ok(byte)
    }

    fn discard_pending(&mut self) -> Result<()> {
        self.pos = self.buf.len();
        Ok(())
    }
}

pub(crate) fn read_frame_from<S: ByteSource>(src: &mut S, max_payload: usize) -> Result<Frame> {
    if src.next_byte()? != Some(DLE) || src.next_byte()? != Some(STX) {
        src.discard_pending()?;
        return Err(FrameError::BadStart);
    }

    let mut payload = BytesMut::with_capacity(max_payload.min(1024));
    let marker = loop {
        let byte = match src.next_byte()? {
            Some(DLE) => match src.next_byte()? {
                Some(marker @ (ETX | ETB)) => break marker,
                Some(DLE) => DLE,
                Some(other) => {
                    warn!(byte = other, "unstuffed DLE inside frame");
                    other
                }
                None => {
                    src.discard_pending()?;
                    return Err(FrameError::Truncated);
                }
            },
            Some(byte) => byte,
            None => {
                src.discard_pending()?;
                return Err(FrameError::Truncated);
            }
        };
        if payload.len() >= max_payload {
            src.discard_pending()?;
            return Err(FrameError::PayloadTooLarge {
                size: payload.len() + 1,
                max: max_payload,
            });
        }
        payload.put_u8(byte);
    };

    let expected = checksum(&payload, marker);
    let actual = src.next_byte()?;
    if actual != Some(expected) {
        return Err(FrameError::Checksum { expected, actual });
    }

    let frame = Frame {
        payload: payload.freeze(),
        is_final: marker == ETX,
    };
    let Some(declared) = frame.declared_length() else {
        return Err(FrameError::TooShort(frame.payload.len()));
    };
    let body = frame.body().len();
    if declared != body {
        return Err(FrameError::Length {
            declared,
            actual: body,
        });
    }
    Ok(frame)
}
