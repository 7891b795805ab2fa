//! Command session for the camera line protocol.
//!
//! This is the layer applications talk to. A [`Session`] owns the byte
//! channel, performs the ENQ/ACK handshake, runs each [`Command`] through
//! the send/acknowledge/answer exchange with bounded retries, and collects
//! multi-frame answers. [`Camera`] wraps a session with typed calls for
//! the device's command set.

pub mod baud;
pub mod camera;
pub mod command;
#[cfg(unix)]
pub mod connector;
pub mod error;
pub mod session;

pub use baud::{negotiate, BaudCandidate, SpeedPreference, BAUD_CANDIDATES};
pub use camera::{picture_number, Camera, CommandSet, FlashMode, PictureInfo, UploadOutcome};
pub use command::{op, Command, CommandTimeouts, CATEGORY_CAMERA, CATEGORY_LINK};
#[cfg(unix)]
pub use connector::{open, open_with_config};
pub use error::{Phase, Result, SessionError};
pub use session::{Session, SessionConfig, MAX_ATTEMPTS, UPLOAD_CHUNK_SIZE};
