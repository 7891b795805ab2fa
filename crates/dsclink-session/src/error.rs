use std::fmt;

use dsclink_frame::FrameError;
use dsclink_transport::TransportError;

/// Which part of an exchange ran out of retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the device to acknowledge a command frame.
    Acknowledge,
    /// Receiving the frames of the answer.
    Response,
    /// Sending upload data frames.
    Upload,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Acknowledge => "command not acknowledged",
            Phase::Response => "no valid answer received",
            Phase::Upload => "data frame rejected",
        })
    }
}

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The handshake got no acknowledgement.
    #[error("the camera does not respond (no answer to {attempts} ENQ)")]
    DeviceUnresponsive { attempts: u32 },

    /// A command exhausted its retries.
    #[error("cannot complete command {operation:#04x}: {phase} after {attempts} attempts")]
    CommandExhausted {
        operation: u8,
        phase: Phase,
        attempts: u32,
    },

    /// The cancellation flag was raised at a checkpoint.
    #[error("interrupted during command {operation:#04x}")]
    Interrupted { operation: u8 },

    /// A previous fatal error left the link in an unknown state.
    #[error("session unusable after a fatal error")]
    Poisoned,

    /// The byte channel failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A frame could not be encoded.
    #[error("frame error: {0}")]
    Frame(FrameError),

    /// Reading upload data or writing answer data failed locally.
    #[error("local I/O error: {0}")]
    LocalIo(#[source] std::io::Error),

    /// The command cannot be represented on the wire.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// The answer was shorter or shaped differently than the command requires.
    #[error("malformed answer to command {operation:#04x}: {reason}")]
    MalformedResponse { operation: u8, reason: String },
}

impl SessionError {
    /// Whether the link can no longer be trusted after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            SessionError::DeviceUnresponsive { .. }
            | SessionError::CommandExhausted { .. }
            | SessionError::Interrupted { .. }
            | SessionError::Poisoned
            | SessionError::Transport(_)
            | SessionError::LocalIo(_) => true,
            SessionError::Frame(err) => !err.is_recoverable(),
            SessionError::InvalidCommand(_) | SessionError::MalformedResponse { .. } => false,
        }
    }

    /// The operation code the error is about, if any.
    pub fn operation(&self) -> Option<u8> {
        match self {
            SessionError::CommandExhausted { operation, .. }
            | SessionError::Interrupted { operation }
            | SessionError::MalformedResponse { operation, .. } => Some(*operation),
            _ => None,
        }
    }
}

impl From<FrameError> for SessionError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Transport(err) => SessionError::Transport(err),
            other => SessionError::Frame(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(SessionError::DeviceUnresponsive { attempts: 3 }.is_fatal());
        assert!(SessionError::Interrupted { operation: 0x02 }.is_fatal());
        assert!(SessionError::Transport(TransportError::Closed).is_fatal());
        assert!(!SessionError::InvalidCommand("too long".into()).is_fatal());
        assert!(!SessionError::Frame(FrameError::PayloadTooLarge { size: 9, max: 4 }).is_fatal());
    }

    #[test]
    fn frame_transport_errors_flatten() {
        let err: SessionError = FrameError::Transport(TransportError::Closed).into();
        assert!(matches!(err, SessionError::Transport(TransportError::Closed)));

        let err: SessionError = FrameError::BadStart.into();
        assert!(matches!(err, SessionError::Frame(FrameError::BadStart)));
    }

    #[test]
    fn diagnostic_names_operation() {
        let err = SessionError::CommandExhausted {
            operation: 0x27,
            phase: Phase::Acknowledge,
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "cannot complete command 0x27: command not acknowledged after 3 attempts"
        );
        assert_eq!(err.operation(), Some(0x27));
    }
}
