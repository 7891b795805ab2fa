use std::time::Duration;

use dsclink_frame::HEADER_SIZE;

use crate::error::{Result, SessionError};

/// Category byte of ordinary camera commands.
pub const CATEGORY_CAMERA: u8 = 0x00;
/// Category byte of link-management commands.
pub const CATEGORY_LINK: u8 = 0x01;

/// Operation codes understood by the camera.
pub mod op {
    pub const DOWNLOAD_PICTURE: u8 = 0x02;
    pub const SET_SPEED: u8 = 0x07;
    pub const VERSION_INFO: u8 = 0x09;
    pub const PICTURE_NAME: u8 = 0x0A;
    pub const PICTURE_COUNT: u8 = 0x0B;
    pub const UPLOAD_DATA: u8 = 0x0E;
    pub const UPLOAD_NAME: u8 = 0x0F;
    pub const PICTURE_SIZE: u8 = 0x17;
    pub const ERASE_PICTURE: u8 = 0x19;
    pub const FREE_MEMORY: u8 = 0x1B;
    pub const TAKE_PICTURE: u8 = 0x27;
    pub const CAMERA_TYPE: u8 = 0x29;
    pub const FLASH_MODE: u8 = 0x30;
    pub const SET_FLASH_MODE: u8 = 0x32;
    pub const CHARGE_FLASH: u8 = 0x34;
    pub const COMMAND_LIST: u8 = 0x4C;
    pub const PREVIEW_DATA: u8 = 0x62;
    pub const TAKE_PREVIEW: u8 = 0x64;
    pub const CAMERA_ID: u8 = 0x80;
    pub const SET_CAMERA_ID: u8 = 0x82;
    pub const DATE: u8 = 0x84;
    pub const SET_DATE: u8 = 0x86;
}

/// A command payload: category, operation, little-endian parameter
/// length, then the parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    bytes: Vec<u8>,
}

impl Command {
    /// Build a command with arbitrary parameters.
    pub fn new(category: u8, operation: u8, params: &[u8]) -> Result<Self> {
        let len = u16::try_from(params.len()).map_err(|_| {
            SessionError::InvalidCommand(format!(
                "{} parameter bytes do not fit the 16-bit length field",
                params.len()
            ))
        })?;
        Ok(Self::build(category, operation, len, params))
    }

    /// A command without parameters.
    pub fn simple(category: u8, operation: u8) -> Self {
        Self::build(category, operation, 0, &[])
    }

    /// A command with a single parameter byte.
    pub fn with_u8(category: u8, operation: u8, arg: u8) -> Self {
        Self::build(category, operation, 1, &[arg])
    }

    /// A command with a little-endian 16-bit parameter.
    pub fn with_u16(category: u8, operation: u8, arg: u16) -> Self {
        Self::build(category, operation, 2, &arg.to_le_bytes())
    }

    fn build(category: u8, operation: u8, len: u16, params: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + params.len());
        bytes.extend_from_slice(&[category, operation]);
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(params);
        Self { bytes }
    }

    pub fn category(&self) -> u8 {
        self.bytes[0]
    }

    pub fn operation(&self) -> u8 {
        self.bytes[1]
    }

    pub fn params(&self) -> &[u8] {
        &self.bytes[HEADER_SIZE..]
    }

    /// The full payload as sent inside the frame.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// How long the device may take to start answering a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTimeouts {
    /// Ordinary queries.
    pub short: Duration,
    /// Picture count and erase.
    pub medium: Duration,
    /// Shooting, flash charging and preview capture.
    pub long: Duration,
}

impl Default for CommandTimeouts {
    fn default() -> Self {
        Self {
            short: Duration::from_secs(1),
            medium: Duration::from_secs(2),
            long: Duration::from_secs(12),
        }
    }
}

impl CommandTimeouts {
    /// The answer timeout for an operation code.
    pub fn for_operation(&self, operation: u8) -> Duration {
        match operation {
            op::TAKE_PICTURE | op::CHARGE_FLASH | op::TAKE_PREVIEW => self.long,
            op::PICTURE_COUNT | op::ERASE_PICTURE => self.medium,
            _ => self.short,
        }
    }
}
