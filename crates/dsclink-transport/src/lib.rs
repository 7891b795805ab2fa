//! Byte channel abstraction over a serial line.
//!
//! This is the lowest layer of dsclink. It knows nothing about frames or
//! commands: it moves raw bytes with bounded waits and owns the line
//! settings of the device it opened.
//!
//! - [`ByteChannel`] is the contract the protocol layers are written against.
//! - [`SerialLink`] drives a real tty (Unix only).
//! - [`ScriptedChannel`] simulates a device in memory.

pub mod channel;
pub mod error;
pub mod memory;

#[cfg(unix)]
pub mod serial;

pub use channel::{ByteChannel, RawByte};
pub use error::{Result, TransportError};
pub use memory::ScriptedChannel;

#[cfg(unix)]
pub use serial::{LinkConfig, SerialLink, BASELINE_SPEED, SUPPORTED_SPEEDS};
