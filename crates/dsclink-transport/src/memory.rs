use std::collections::VecDeque;
use std::time::Duration;

use tracing::trace;

use crate::channel::{ByteChannel, RawByte};
use crate::error::{Result, TransportError};

/// In-memory device simulator.
///
/// Every call to [`ByteChannel::write_bytes`] is recorded and releases the
/// next queued reply into the input buffer, which mimics a device answering
/// each thing the host sends. Reads past the end of the input buffer report
/// [`RawByte::Timeout`] without waiting.
#[derive(Debug)]
pub struct ScriptedChannel {
    input: VecDeque<u8>,
    replies: VecDeque<Vec<u8>>,
    writes: Vec<Vec<u8>>,
    speed: u32,
    speed_changes: Vec<u32>,
    drains: usize,
    closed: bool,
}

impl Default for ScriptedChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedChannel {
    /// Create a silent channel at 9600 bps.
    pub fn new() -> Self {
        Self {
            input: VecDeque::new(),
            replies: VecDeque::new(),
            writes: Vec::new(),
            speed: 9600,
            speed_changes: Vec::new(),
            drains: 0,
            closed: false,
        }
    }

    /// Bytes that are already waiting on the line before the host writes.
    pub fn with_input(mut self, bytes: &[u8]) -> Self {
        self.push_input(bytes);
        self
    }

    /// Queue a reply released by the next unanswered write.
    pub fn reply(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.queue_reply(bytes);
        self
    }

    /// Queue a write that the device does not answer.
    pub fn silent(self) -> Self {
        self.reply(Vec::new())
    }

    pub fn queue_reply(&mut self, bytes: impl Into<Vec<u8>>) {
        self.replies.push_back(bytes.into());
    }

    pub fn push_input(&mut self, bytes: &[u8]) {
        self.input.extend(bytes.iter().copied());
    }

    /// Every buffer passed to `write_bytes`, in order.
    pub fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    /// All written bytes concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.writes.concat()
    }

    /// Speeds applied through `set_speed`, in order.
    pub fn speed_changes(&self) -> &[u32] {
        &self.speed_changes
    }

    /// Number of `drain_output` calls.
    pub fn drains(&self) -> usize {
        self.drains
    }

    /// Input bytes not yet consumed.
    pub fn pending_input(&self) -> usize {
        self.input.len()
    }

    /// Replies that were never released.
    pub fn unused_replies(&self) -> usize {
        self.replies.len()
    }

    /// Make every later write fail, as an unplugged cable would.
    pub fn close(&mut self) {
        self.closed = true;
    }
}

impl ByteChannel for ScriptedChannel {
    fn read_raw_byte(&mut self) -> Result<RawByte> {
        Ok(match self.input.pop_front() {
            Some(byte) => RawByte::Byte(byte),
            None => RawByte::Timeout,
        })
    }

    fn wait_for_input(&mut self, _timeout: Duration) -> Result<bool> {
        Ok(!self.input.is_empty())
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        trace!(len = buf.len(), "scripted write");
        self.writes.push(buf.to_vec());
        if let Some(reply) = self.replies.pop_front() {
            self.input.extend(reply);
        }
        Ok(())
    }

    fn drain_output(&mut self) -> Result<()> {
        self.drains += 1;
        Ok(())
    }

    fn set_speed(&mut self, bps: u32) -> Result<()> {
        self.speed = bps;
        self.speed_changes.push(bps);
        Ok(())
    }

    fn speed(&self) -> u32 {
        self.speed
    }
}
