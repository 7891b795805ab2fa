use dsclink_transport::TransportError;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The stream did not start with `DLE STX`.
    #[error("missing frame start (expected DLE STX)")]
    BadStart,

    /// The line went quiet or reported an error before the frame ended.
    #[error("frame truncated")]
    Truncated,

    /// The trailing checksum byte does not match the payload.
    #[error("checksum mismatch (expected {expected:#04x}, got {})", display_byte(.actual))]
    Checksum { expected: u8, actual: Option<u8> },

    /// The header length field disagrees with the payload size.
    #[error("length mismatch (header says {declared} bytes, frame carries {actual})")]
    Length { declared: usize, actual: usize },

    /// The payload is shorter than its 4-byte header.
    #[error("payload too short for header ({0} bytes)")]
    TooShort(usize),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The underlying channel failed.
    #[error("frame transport error: {0}")]
    Transport(#[from] TransportError),
}

impl FrameError {
    /// Whether asking the sender to retransmit can fix this error.
    ///
    /// Everything except a channel failure is a damaged or incomplete frame.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FrameError::Transport(_))
    }
}

fn display_byte(byte: &Option<u8>) -> String {
    match byte {
        Some(b) => format!("{b:#04x}"),
        None => "nothing".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
