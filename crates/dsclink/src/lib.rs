//! Talk to DS-7 / MX-700 family digital cameras over a serial line.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte channel abstraction and the termios serial link
//! - [`frame`]: line escaping and DLE-framed, checksummed packets
//! - [`session`]: handshake, command exchange, speed negotiation and the
//!   typed camera command set
//!
//! ```no_run
//! # fn main() -> Result<(), dsclink::SessionError> {
//! let mut session = dsclink::open("/dev/fujifilm")?;
//! session.set_preferred_speed(dsclink::SpeedPreference::Auto)?;
//! let mut camera = dsclink::Camera::new(session);
//! println!("{}", camera.camera_type()?);
//! camera.into_session().close()?;
//! # Ok(())
//! # }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use dsclink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use dsclink_frame::*;
}

/// Re-export session types.
pub mod session {
    pub use dsclink_session::*;
}

#[cfg(unix)]
pub use dsclink_session::{open, open_with_config};
pub use dsclink_session::{Camera, Command, Session, SessionConfig, SessionError, SpeedPreference};
