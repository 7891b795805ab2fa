use std::path::PathBuf;

/// Errors that can occur on the physical byte channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the device node.
    #[error("cannot open device {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to read or apply line settings.
    #[error("cannot configure line settings on {path}: {source}")]
    Configure {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The requested speed has no line-discipline equivalent.
    #[error("unsupported line speed {0} bps")]
    UnsupportedSpeed(u32),

    /// An I/O error occurred on the channel.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The channel has been closed.
    #[error("channel closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
