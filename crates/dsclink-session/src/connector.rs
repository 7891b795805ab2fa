use std::path::Path;

use dsclink_transport::{LinkConfig, SerialLink};
use tracing::debug;

use crate::error::Result;
use crate::session::{Session, SessionConfig};

/// Open a serial device at the baseline speed and get the camera's
/// attention.
pub fn open(path: impl AsRef<Path>) -> Result<Session<SerialLink>> {
    open_with_config(path, LinkConfig::default(), SessionConfig::default())
}

/// Open with explicit line and session settings.
///
/// The line settings in effect before the call are restored when the
/// returned session's link is dropped, including when the handshake fails.
pub fn open_with_config(
    path: impl AsRef<Path>,
    link_config: LinkConfig,
    session_config: SessionConfig,
) -> Result<Session<SerialLink>> {
    let speed = link_config.initial_speed;
    let link = SerialLink::open_with_config(path, link_config)?;
    debug!(path = %link.path().display(), speed, "link open");
    Session::connect(link, session_config)
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use dsclink_transport::TransportError;

    use super::*;
    use crate::error::SessionError;

    #[test]
    fn missing_device_reports_open_error() {
        let path = std::env::temp_dir().join(format!("dsclink-missing-{}", std::process::id()));
        let err = open(&path).unwrap_err();
        match err {
            SessionError::Transport(TransportError::Open { source, .. }) => {
                assert_eq!(source.kind(), ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
