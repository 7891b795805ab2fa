use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use dsclink_transport::ByteChannel;
use tracing::{debug, warn};

use crate::command::{op, Command, CATEGORY_CAMERA};
use crate::error::{Result, SessionError};
use crate::session::Session;

/// Longest identifier the camera stores.
pub const MAX_ID_LEN: usize = 10;
/// Length of a `YYYYMMDDHHMMSS` date.
pub const DATE_LEN: usize = 14;
/// Uploaded pictures must carry a name of exactly this length.
pub const PICTURE_NAME_LEN: usize = 12;

/// Flash setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashMode {
    Off,
    On,
    Strobe,
    Auto,
    Other(u8),
}

impl FlashMode {
    pub fn code(self) -> u8 {
        match self {
            FlashMode::Off => 0,
            FlashMode::On => 1,
            FlashMode::Strobe => 2,
            FlashMode::Auto => 3,
            FlashMode::Other(code) => code,
        }
    }
}

impl From<u8> for FlashMode {
    fn from(code: u8) -> Self {
        match code {
            0 => FlashMode::Off,
            1 => FlashMode::On,
            2 => FlashMode::Strobe,
            3 => FlashMode::Auto,
            other => FlashMode::Other(other),
        }
    }
}

impl fmt::Display for FlashMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashMode::Off => f.write_str("off"),
            FlashMode::On => f.write_str("on"),
            FlashMode::Strobe => f.write_str("strobe"),
            FlashMode::Auto => f.write_str("auto"),
            FlashMode::Other(code) => write!(f, "unknown ({code})"),
        }
    }
}

impl FromStr for FlashMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "0" => Ok(FlashMode::Off),
            "on" | "1" => Ok(FlashMode::On),
            "strobe" | "2" => Ok(FlashMode::Strobe),
            "auto" | "3" => Ok(FlashMode::Auto),
            _ => Err(format!(
                "invalid flash mode '{s}': expected off, on, strobe or auto (0-3)"
            )),
        }
    }
}

/// Operation codes the camera reports as supported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSet {
    codes: Vec<u8>,
}

impl CommandSet {
    /// Parse the answer to the command-list query.
    pub fn from_answer(answer: &[u8]) -> Self {
        let mut codes = answer.to_vec();
        codes.sort_unstable();
        codes.dedup();
        Self { codes }
    }

    /// The empty set assumed for models without the command-list query.
    pub fn minimal() -> Self {
        Self::default()
    }

    pub fn supports(&self, operation: u8) -> bool {
        self.codes.binary_search(&operation).is_ok()
    }

    pub fn codes(&self) -> &[u8] {
        &self.codes
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// One picture stored in the camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureInfo {
    /// 1-based frame index used by the camera commands.
    pub index: u16,
    pub name: String,
    /// Number embedded in the name, e.g. 42 for `DSC00042.JPG`.
    pub number: Option<u32>,
    pub size: u32,
}

/// Extract the picture number from a camera file name.
pub fn picture_number(name: &str) -> Option<u32> {
    let digits: String = name
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Result of an upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Accepted { bytes: u64 },
    /// The camera refused the file name with this status.
    Rejected { status: u8 },
}

/// Typed access to the camera's command set.
pub struct Camera<C: ByteChannel> {
    session: Session<C>,
}

impl<C: ByteChannel> Camera<C> {
    pub fn new(session: Session<C>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session<C> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<C> {
        &mut self.session
    }

    pub fn into_session(self) -> Session<C> {
        self.session
    }

    pub fn version_info(&mut self) -> Result<String> {
        self.query_text(op::VERSION_INFO)
    }

    pub fn camera_type(&mut self) -> Result<String> {
        self.query_text(op::CAMERA_TYPE)
    }

    pub fn camera_id(&mut self) -> Result<String> {
        self.query_text(op::CAMERA_ID)
    }

    /// Store an identifier of at most [`MAX_ID_LEN`] bytes.
    pub fn set_camera_id(&mut self, id: &str) -> Result<()> {
        if id.len() > MAX_ID_LEN {
            return Err(SessionError::InvalidCommand(format!(
                "camera id '{id}' is longer than {MAX_ID_LEN} bytes"
            )));
        }
        let command = Command::new(CATEGORY_CAMERA, op::SET_CAMERA_ID, id.as_bytes())?;
        self.session.execute(&command)?;
        Ok(())
    }

    /// The camera clock as `YYYY/MM/DD HH:MM:SS`.
    pub fn date(&mut self) -> Result<String> {
        let answer = self.query(op::DATE)?;
        format_date(&answer).ok_or_else(|| malformed(op::DATE, &answer, DATE_LEN))
    }

    /// Set the camera clock from `YYYYMMDDHHMMSS`.
    pub fn set_date(&mut self, digits: &str) -> Result<()> {
        if digits.len() != DATE_LEN || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SessionError::InvalidCommand(format!(
                "date '{digits}' is not of the form YYYYMMDDHHMMSS"
            )));
        }
        let command = Command::new(CATEGORY_CAMERA, op::SET_DATE, digits.as_bytes())?;
        self.session.execute(&command)?;
        Ok(())
    }

    pub fn flash_mode(&mut self) -> Result<FlashMode> {
        let answer = self.query(op::FLASH_MODE)?;
        Ok(FlashMode::from(first_byte(op::FLASH_MODE, &answer)?))
    }

    /// Returns the camera's status byte.
    pub fn set_flash_mode(&mut self, mode: FlashMode) -> Result<u8> {
        let command = Command::with_u8(CATEGORY_CAMERA, op::SET_FLASH_MODE, mode.code());
        let answer = self.session.execute(&command)?;
        first_byte(op::SET_FLASH_MODE, &answer)
    }

    pub fn picture_count(&mut self) -> Result<u16> {
        let answer = self.query(op::PICTURE_COUNT)?;
        let bytes = fixed::<2>(op::PICTURE_COUNT, &answer, 0)?;
        Ok(u16::from_le_bytes(bytes))
    }

    pub fn picture_name(&mut self, index: u16) -> Result<String> {
        let answer = self.indexed(op::PICTURE_NAME, index)?;
        Ok(text(&answer))
    }

    pub fn picture_size(&mut self, index: u16) -> Result<u32> {
        let answer = self.indexed(op::PICTURE_SIZE, index)?;
        let bytes = fixed::<4>(op::PICTURE_SIZE, &answer, 0)?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Name, number and size of every stored picture.
    pub fn pictures(&mut self) -> Result<Vec<PictureInfo>> {
        let count = self.picture_count()?;
        let mut pictures = Vec::with_capacity(usize::from(count));
        for index in 1..=count {
            let name = self.picture_name(index)?;
            let size = self.picture_size(index)?;
            pictures.push(PictureInfo {
                index,
                number: picture_number(&name),
                name,
                size,
            });
        }
        debug!(count, "picture list read");
        Ok(pictures)
    }

    /// Trigger the shutter; returns the new frame number.
    pub fn take_picture(&mut self) -> Result<u32> {
        let answer = self.query(op::TAKE_PICTURE)?;
        let bytes = fixed::<4>(op::TAKE_PICTURE, &answer, 0)?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn charge_flash(&mut self, amount: u16) -> Result<u8> {
        let answer = self.indexed(op::CHARGE_FLASH, amount)?;
        first_byte(op::CHARGE_FLASH, &answer)
    }

    /// Erase a picture; returns the status byte, zero on success.
    pub fn erase_picture(&mut self, index: u16) -> Result<u8> {
        let answer = self.indexed(op::ERASE_PICTURE, index)?;
        first_byte(op::ERASE_PICTURE, &answer)
    }

    /// Free space in bytes.
    pub fn free_memory(&mut self) -> Result<u32> {
        let answer = self.query(op::FREE_MEMORY)?;
        let bytes = fixed::<4>(op::FREE_MEMORY, &answer, 1)?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn command_set(&mut self) -> Result<CommandSet> {
        let answer = self.query(op::COMMAND_LIST)?;
        Ok(CommandSet::from_answer(&answer))
    }

    /// Stream a picture into `sink`.
    pub fn download_picture<W: Write + ?Sized>(&mut self, index: u16, sink: &mut W) -> Result<u64> {
        let command = Command::with_u16(CATEGORY_CAMERA, op::DOWNLOAD_PICTURE, index);
        self.session.execute_into(&command, sink)
    }

    /// Capture a preview image and stream it into `sink`.
    pub fn capture_preview<W: Write + ?Sized>(&mut self, sink: &mut W) -> Result<u64> {
        self.query(op::TAKE_PREVIEW)?;
        let command = Command::simple(CATEGORY_CAMERA, op::PREVIEW_DATA);
        self.session.execute_into(&command, sink)
    }

    /// Announce a picture name, then stream its data.
    pub fn upload_picture<R: Read>(&mut self, name: &str, data: R) -> Result<UploadOutcome> {
        if name.len() != PICTURE_NAME_LEN {
            return Err(SessionError::InvalidCommand(format!(
                "upload name '{name}' must be exactly {PICTURE_NAME_LEN} bytes"
            )));
        }
        let command = Command::new(CATEGORY_CAMERA, op::UPLOAD_NAME, name.as_bytes())?;
        let answer = self.session.execute(&command)?;
        let status = first_byte(op::UPLOAD_NAME, &answer)?;
        if status != 0 {
            warn!(name, status, "camera refused upload");
            return Ok(UploadOutcome::Rejected { status });
        }
        let bytes = self.session.send_data(data)?;
        Ok(UploadOutcome::Accepted { bytes })
    }

    fn query(&mut self, operation: u8) -> Result<Vec<u8>> {
        self.session
            .execute(&Command::simple(CATEGORY_CAMERA, operation))
    }

    fn query_text(&mut self, operation: u8) -> Result<String> {
        Ok(text(&self.query(operation)?))
    }

    fn indexed(&mut self, operation: u8, arg: u16) -> Result<Vec<u8>> {
        self.session
            .execute(&Command::with_u16(CATEGORY_CAMERA, operation, arg))
    }
}

/// Decode a string answer, cut at the first NUL.
fn text(answer: &[u8]) -> String {
    let end = answer.iter().position(|&b| b == 0).unwrap_or(answer.len());
    String::from_utf8_lossy(&answer[..end]).into_owned()
}

fn format_date(answer: &[u8]) -> Option<String> {
    let field = |start: usize, len: usize| {
        answer
            .get(start..start + len)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    };
    Some(format!(
        "{}/{}/{} {}:{}:{}",
        field(0, 4)?,
        field(4, 2)?,
        field(6, 2)?,
        field(8, 2)?,
        field(10, 2)?,
        field(12, 2)?
    ))
}

fn fixed<const N: usize>(operation: u8, answer: &[u8], offset: usize) -> Result<[u8; N]> {
    answer
        .get(offset..offset + N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| malformed(operation, answer, offset + N))
}

fn first_byte(operation: u8, answer: &[u8]) -> Result<u8> {
    answer
        .first()
        .copied()
        .ok_or_else(|| malformed(operation, answer, 1))
}

fn malformed(operation: u8, answer: &[u8], needed: usize) -> SessionError {
    SessionError::MalformedResponse {
        operation,
        reason: format!("expected at least {needed} bytes, got {}", answer.len()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::BytesMut;
    use dsclink_frame::{encode_frame, ACK, NAK};
    use dsclink_transport::ScriptedChannel;

    use super::*;
    use crate::session::SessionConfig;

    trait Answers {
        /// Answer the next command with a single final frame.
        fn answer(self, operation: u8, body: &[u8]) -> Self;
    }

    impl Answers for ScriptedChannel {
        fn answer(self, operation: u8, body: &[u8]) -> Self {
            self.reply(acked(operation, body, true)).silent()
        }
    }

    fn acked(operation: u8, body: &[u8], is_final: bool) -> Vec<u8> {
        let mut payload = vec![0x00, operation];
        payload.extend_from_slice(&u16::try_from(body.len()).unwrap().to_le_bytes());
        payload.extend_from_slice(body);
        let mut out = BytesMut::new();
        encode_frame(&payload, is_final, &mut out);
        let mut reply = vec![ACK];
        reply.extend_from_slice(&out);
        reply
    }

    fn camera(chan: &mut ScriptedChannel) -> Camera<&mut ScriptedChannel> {
        let config = SessionConfig {
            quiescence: Duration::ZERO,
            ..SessionConfig::default()
        };
        Camera::new(Session::with_config(chan, config))
    }

    #[test]
    fn strings_stop_at_nul() {
        let mut chan = ScriptedChannel::new()
            .answer(op::CAMERA_TYPE, b"MX-700\0\0\0");
        assert_eq!(camera(&mut chan).camera_type().unwrap(), "MX-700");
    }

    #[test]
    fn date_is_formatted() {
        let mut chan = ScriptedChannel::new()
            .answer(op::DATE, b"19990222141301");
        assert_eq!(camera(&mut chan).date().unwrap(), "1999/02/22 14:13:01");
    }

    #[test]
    fn short_date_is_malformed() {
        let mut chan = ScriptedChannel::new()
            .answer(op::DATE, b"1999");
        let mut cam = camera(&mut chan);
        let err = cam.date().unwrap_err();
        assert!(matches!(
            err,
            SessionError::MalformedResponse {
                operation: op::DATE,
                ..
            }
        ));
        assert!(!cam.session().is_poisoned());
    }

    #[test]
    fn numeric_answers_are_little_endian() {
        let mut chan = ScriptedChannel::new()
            .answer(op::PICTURE_COUNT, &[0x2A, 0x01])
            .answer(op::PICTURE_SIZE, &[0x00, 0x10, 0x02, 0x00])
            .answer(op::FREE_MEMORY, &[0xFF, 0x00, 0x00, 0x10, 0x00])
            .answer(op::TAKE_PICTURE, &[0x07, 0x00, 0x00, 0x00]);
        let mut cam = camera(&mut chan);
        assert_eq!(cam.picture_count().unwrap(), 0x012A);
        assert_eq!(cam.picture_size(1).unwrap(), 0x0002_1000);
        assert_eq!(cam.free_memory().unwrap(), 0x0010_0000);
        assert_eq!(cam.take_picture().unwrap(), 7);
    }

    #[test]
    fn picture_listing() {
        let mut chan = ScriptedChannel::new()
            .answer(op::PICTURE_COUNT, &[0x02, 0x00])
            .answer(op::PICTURE_NAME, b"DSC00041.JPG")
            .answer(op::PICTURE_SIZE, &[0x10, 0x00, 0x00, 0x00])
            .answer(op::PICTURE_NAME, b"DSC00042.JPG")
            .answer(op::PICTURE_SIZE, &[0x20, 0x00, 0x00, 0x00]);
        let pictures = camera(&mut chan).pictures().unwrap();
        assert_eq!(pictures.len(), 2);
        assert_eq!(pictures[1].index, 2);
        assert_eq!(pictures[1].name, "DSC00042.JPG");
        assert_eq!(pictures[1].number, Some(42));
        assert_eq!(pictures[1].size, 0x20);
    }

    #[test]
    fn flash_mode_round_trip_through_device() {
        let mut chan = ScriptedChannel::new()
            .answer(op::FLASH_MODE, &[3])
            .answer(op::SET_FLASH_MODE, &[0]);
        let mut cam = camera(&mut chan);
        assert_eq!(cam.flash_mode().unwrap(), FlashMode::Auto);
        assert_eq!(cam.set_flash_mode(FlashMode::Strobe).unwrap(), 0);
    }

    #[test]
    fn command_set_is_sorted_and_queryable() {
        let mut chan = ScriptedChannel::new()
            .answer(op::COMMAND_LIST, &[0x4C, 0x02, 0x0B, 0x02]);
        let set = camera(&mut chan).command_set().unwrap();
        assert_eq!(set.codes(), &[0x02, 0x0B, 0x4C]);
        assert!(set.supports(op::PICTURE_COUNT));
        assert!(!set.supports(op::TAKE_PREVIEW));
        assert!(CommandSet::minimal().is_empty());
    }

    #[test]
    fn preview_captures_then_streams() {
        let mut chan = ScriptedChannel::new()
            .reply(acked(op::TAKE_PREVIEW, &[], true))
            .silent()
            .reply(acked(op::PREVIEW_DATA, b"YYCC", false))
            .reply(acked(op::PREVIEW_DATA, b"data", true)[1..].to_vec())
            .silent();
        let mut sink = Vec::new();
        let n = camera(&mut chan).capture_preview(&mut sink).unwrap();
        assert_eq!(n, 8);
        assert_eq!(sink, b"YYCCdata");
    }

    #[test]
    fn set_camera_id_checks_length() {
        let mut chan = ScriptedChannel::new().answer(op::SET_CAMERA_ID, &[]);
        let mut cam = camera(&mut chan);
        assert!(matches!(
            cam.set_camera_id("MUCH-TOO-LONG"),
            Err(SessionError::InvalidCommand(_))
        ));
        cam.set_camera_id("HOLIDAY").unwrap();
    }

    #[test]
    fn set_date_requires_fourteen_digits() {
        let mut chan = ScriptedChannel::new().answer(op::SET_DATE, &[]);
        let mut cam = camera(&mut chan);
        assert!(cam.set_date("1999-02-22").is_err());
        cam.set_date("19990222141301").unwrap();
    }

    #[test]
    fn upload_rejected_by_camera() {
        let mut chan = ScriptedChannel::new().answer(op::UPLOAD_NAME, &[0x01]);
        let outcome = camera(&mut chan)
            .upload_picture("DSC00001.JPG", &b"jpeg"[..])
            .unwrap();
        assert_eq!(outcome, UploadOutcome::Rejected { status: 1 });
    }

    #[test]
    fn upload_accepted_streams_data() {
        let mut chan = ScriptedChannel::new()
            .answer(op::UPLOAD_NAME, &[0x00])
            .reply(vec![NAK])
            .reply(vec![ACK]);
        let outcome = camera(&mut chan)
            .upload_picture("DSC00001.JPG", &b"jpeg"[..])
            .unwrap();
        assert_eq!(outcome, UploadOutcome::Accepted { bytes: 4 });
    }

    #[test]
    fn upload_name_must_be_twelve_bytes() {
        let mut chan = ScriptedChannel::new();
        let err = camera(&mut chan)
            .upload_picture("short.jpg", std::io::empty())
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidCommand(_)));
    }

    #[test]
    fn picture_numbers_from_names() {
        assert_eq!(picture_number("DSC00042.JPG"), Some(42));
        assert_eq!(picture_number("DSCF0007.JPG"), Some(7));
        assert_eq!(picture_number("README"), None);
    }

    #[test]
    fn flash_mode_parsing() {
        assert_eq!("Strobe".parse::<FlashMode>().unwrap(), FlashMode::Strobe);
        assert_eq!("0".parse::<FlashMode>().unwrap(), FlashMode::Off);
        assert!("bright".parse::<FlashMode>().is_err());
        assert_eq!(FlashMode::from(9).to_string(), "unknown (9)");
    }
}
