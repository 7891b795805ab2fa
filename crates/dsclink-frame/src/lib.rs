//! Frame layer for the camera line protocol.
//!
//! Two encodings are stacked on the raw line:
//! - the line discipline marks damaged bytes with an `FF 00` prefix and
//!   doubles literal `FF` bytes ([`escape`]);
//! - every message travels as `DLE STX payload DLE ETX|ETB CHK`, with each
//!   `DLE` inside the payload doubled ([`codec`]).
//!
//! The first four payload bytes are a header whose bytes 2..4 carry the
//! little-endian length of the rest, and the decoder checks it.

pub mod codec;
pub mod control;
pub mod error;
pub mod escape;
pub mod reader;
pub mod writer;

pub use codec::{
    checksum, decode_frame, encode_frame, terminator, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD,
    DLE, ETB, ETX, HEADER_SIZE, STX,
};
pub use control::{control_name, ACK, ENQ, EOT, NAK};
pub use error::{FrameError, Result};
pub use escape::{Decoded, EscapeDecoder, ESC};
pub use reader::FrameReader;
pub use writer::FrameWriter;
