use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dsclink_frame::{
    EscapeDecoder, Frame, FrameConfig, FrameReader, FrameWriter, ACK, ENQ, EOT, NAK,
};
use dsclink_transport::ByteChannel;
use tracing::{debug, error, trace, warn};

use crate::command::{op, Command, CommandTimeouts, CATEGORY_CAMERA};
use crate::error::{Phase, Result, SessionError};

/// Attempts allowed for the handshake and for each phase of an exchange.
pub const MAX_ATTEMPTS: u32 = 3;

/// Upload data is split into frames of at most this many bytes.
pub const UPLOAD_CHUNK_SIZE: usize = 512;

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Frame size limit for answers and commands.
    pub frame: FrameConfig,
    /// Answer timeouts per operation class.
    pub timeouts: CommandTimeouts,
    /// How long to wait for the device to accept an upload frame.
    pub upload_ack_timeout: Duration,
    /// Idle time after EOT so the device settles before the line changes.
    pub quiescence: Duration,
    /// Cancellation request, polled between answer frames and before
    /// upload continuation frames. Share it with a signal handler before
    /// connecting so an interrupt during the handshake is not lost.
    pub cancel: Arc<AtomicBool>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            timeouts: CommandTimeouts::default(),
            upload_ack_timeout: Duration::from_secs(1),
            quiescence: Duration::from_millis(50),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// A command session with one camera.
///
/// Every exchange is strictly half-duplex: send a command frame, wait for
/// ACK, then receive answer frames until one ends with ETX, acknowledging
/// each. Errors that leave the device in an unknown state poison the
/// session and every later call fails with [`SessionError::Poisoned`].
///
/// Dropping a session that was not [closed](Self::close) sends EOT on a
/// best-effort basis.
#[derive(Debug)]
pub struct Session<C: ByteChannel> {
    chan: C,
    config: SessionConfig,
    poisoned: bool,
    closed: bool,
}

impl<C: ByteChannel> Session<C> {
    /// Wrap a channel without talking to the device.
    pub fn new(chan: C) -> Self {
        Self::with_config(chan, SessionConfig::default())
    }

    pub fn with_config(chan: C, config: SessionConfig) -> Self {
        Self {
            chan,
            config,
            poisoned: false,
            closed: false,
        }
    }

    /// Wrap a channel and get the device's attention.
    pub fn connect(chan: C, config: SessionConfig) -> Result<Self> {
        let mut session = Self::with_config(chan, config);
        session.attention()?;
        Ok(session)
    }

    /// The flag that requests cancellation at the next checkpoint.
    ///
    /// Setting it from a signal handler or another thread stops multi-frame
    /// answers before the next ACK and uploads before the next data frame.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.config.cancel)
    }

    /// Use an externally owned cancellation flag.
    pub fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.config.cancel = flag;
    }

    fn cancel_requested(&self) -> bool {
        self.config.cancel.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current line speed in bits per second.
    pub fn speed(&self) -> u32 {
        self.chan.speed()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn get_ref(&self) -> &C {
        &self.chan
    }

    pub fn get_mut(&mut self) -> &mut C {
        &mut self.chan
    }

    /// Discard stale input, then send ENQ until the device answers ACK.
    pub fn attention(&mut self) -> Result<()> {
        self.guarded(Self::handshake)
    }

    /// Run a command and collect the whole answer.
    pub fn execute(&mut self, command: &Command) -> Result<Vec<u8>> {
        let mut answer = Vec::new();
        self.execute_into(command, &mut answer)?;
        Ok(answer)
    }

    /// Run a command and stream the answer into `sink` as frames arrive.
    ///
    /// Returns the number of answer bytes written.
    pub fn execute_into<W: Write + ?Sized>(&mut self, command: &Command, sink: &mut W) -> Result<u64> {
        self.guarded(|session| session.exchange(command, sink))
    }

    /// Run a command given as raw category, operation and parameters.
    pub fn execute_raw(&mut self, category: u8, operation: u8, params: &[u8]) -> Result<Vec<u8>> {
        let command = Command::new(category, operation, params)?;
        self.execute(&command)
    }

    /// Stream upload data to the device in continuation frames.
    ///
    /// The last chunk goes out as a final frame. Returns the number of
    /// bytes sent.
    pub fn send_data<R: Read>(&mut self, data: R) -> Result<u64> {
        self.guarded(|session| session.upload(data))
    }

    /// Send EOT, let the line settle and release the session.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    /// Send EOT at the current speed, then move the line to `bps` and
    /// regain the device's attention there.
    pub(crate) fn switch_speed(&mut self, bps: u32) -> Result<()> {
        let quiescence = self.config.quiescence;
        self.guarded(|session| {
            session.send_control(EOT)?;
            session.chan.drain_output()?;
            thread::sleep(quiescence);
            session.chan.set_speed(bps)?;
            session.handshake()
        })
    }

    fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.poisoned || self.closed {
            return Err(SessionError::Poisoned);
        }
        let result = f(self);
        if let Err(err) = &result {
            if err.is_fatal() {
                error!(error = %err, "session poisoned");
                self.poisoned = true;
            }
        }
        result
    }

    fn handshake(&mut self) -> Result<()> {
        self.drain_input()?;
        for attempt in 1..=MAX_ATTEMPTS {
            self.send_control(ENQ)?;
            match self.read_logical()? {
                Some(ACK) => {
                    debug!(attempt, "device acknowledged ENQ");
                    return Ok(());
                }
                reply => debug!(attempt, ?reply, "no ACK for ENQ"),
            }
        }
        Err(SessionError::DeviceUnresponsive {
            attempts: MAX_ATTEMPTS,
        })
    }

    fn exchange<W: Write + ?Sized>(&mut self, command: &Command, sink: &mut W) -> Result<u64> {
        let operation = command.operation();
        let timeout = self.config.timeouts.for_operation(operation);
        debug!(operation, params = command.params().len(), "issuing command");

        self.send_frame(command.as_bytes(), true)?;
        self.chan.wait_for_input(timeout)?;
        let mut failures = 0;
        loop {
            let reply = self.read_logical()?;
            if reply == Some(ACK) {
                break;
            }
            failures += 1;
            if failures >= MAX_ATTEMPTS {
                return Err(SessionError::CommandExhausted {
                    operation,
                    phase: Phase::Acknowledge,
                    attempts: failures,
                });
            }
            if reply == Some(NAK) {
                warn!(operation, attempt = failures, "command refused, resending");
                self.send_frame(command.as_bytes(), true)?;
                self.chan.wait_for_input(timeout)?;
            } else {
                warn!(operation, ?reply, "unexpected reply to command");
                self.drain_input()?;
                self.send_control(NAK)?;
            }
        }

        // One retry budget covers every frame of the answer.
        let mut failures = 0;
        let mut delivered = 0u64;
        loop {
            self.chan.wait_for_input(timeout)?;
            let frame = match self.read_frame() {
                Ok(frame) => frame,
                Err(err) if err.is_recoverable() => {
                    failures += 1;
                    if failures >= MAX_ATTEMPTS {
                        return Err(SessionError::CommandExhausted {
                            operation,
                            phase: Phase::Response,
                            attempts: failures,
                        });
                    }
                    warn!(operation, error = %err, "bad answer frame, requesting resend");
                    self.send_control(NAK)?;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            if !frame.is_final && self.cancel_requested() {
                return Err(SessionError::Interrupted { operation });
            }
            self.send_control(ACK)?;
            sink.write_all(frame.body()).map_err(SessionError::LocalIo)?;
            delivered += frame.body().len() as u64;
            if frame.is_final {
                debug!(operation, bytes = delivered, "answer complete");
                return Ok(delivered);
            }
        }
    }

    fn upload<R: Read>(&mut self, mut data: R) -> Result<u64> {
        let mut sent = 0u64;
        let mut current = read_chunk(&mut data)?;
        while !current.is_empty() {
            let next = read_chunk(&mut data)?;
            let is_final = next.is_empty();
            if !is_final && self.cancel_requested() {
                return Err(SessionError::Interrupted {
                    operation: op::UPLOAD_DATA,
                });
            }

            let command = Command::new(CATEGORY_CAMERA, op::UPLOAD_DATA, &current)?;
            let mut refusals = 0;
            loop {
                self.send_frame(command.as_bytes(), is_final)?;
                self.chan.wait_for_input(self.config.upload_ack_timeout)?;
                if self.read_logical()? != Some(NAK) {
                    break;
                }
                refusals += 1;
                if refusals >= MAX_ATTEMPTS {
                    return Err(SessionError::CommandExhausted {
                        operation: op::UPLOAD_DATA,
                        phase: Phase::Upload,
                        attempts: refusals,
                    });
                }
                warn!(sent, attempt = refusals, "upload frame refused, resending");
            }

            sent += current.len() as u64;
            trace!(sent, "upload progress");
            current = next;
        }
        Ok(sent)
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.send_control(EOT)?;
        self.chan.drain_output()?;
        thread::sleep(self.config.quiescence);
        debug!("session closed");
        Ok(())
    }

    fn send_frame(&mut self, payload: &[u8], is_final: bool) -> Result<()> {
        FrameWriter::with_config(&mut self.chan, self.config.frame).send_frame(payload, is_final)?;
        Ok(())
    }

    fn send_control(&mut self, byte: u8) -> Result<()> {
        FrameWriter::with_config(&mut self.chan, self.config.frame).send_control(byte)?;
        Ok(())
    }

    fn read_frame(&mut self) -> dsclink_frame::Result<Frame> {
        FrameReader::with_config(&mut self.chan, self.config.frame).read_frame()
    }

    fn read_logical(&mut self) -> Result<Option<u8>> {
        Ok(EscapeDecoder::new(&mut self.chan).read_logical()?)
    }

    fn drain_input(&mut self) -> Result<()> {
        EscapeDecoder::new(&mut self.chan).drain()?;
        Ok(())
    }
}

impl<C: ByteChannel> Drop for Session<C> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            debug!(error = %err, "EOT on drop failed");
        }
    }
}

/// Fill up to one upload chunk, stopping early only at end of input.
fn read_chunk<R: Read>(data: &mut R) -> Result<Vec<u8>> {
    let mut chunk = vec![0u8; UPLOAD_CHUNK_SIZE];
    let mut filled = 0;
    while filled < chunk.len() {
        match data.read(&mut chunk[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(SessionError::LocalIo(err)),
        }
    }
    chunk.truncate(filled);
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use dsclink_frame::{decode_frame, encode_frame, DEFAULT_MAX_PAYLOAD};
    use dsclink_transport::ScriptedChannel;

    use super::*;

    fn quiet() -> SessionConfig {
        SessionConfig {
            quiescence: Duration::ZERO,
            ..SessionConfig::default()
        }
    }

    /// An answer frame as the device would send it.
    fn answer(operation: u8, body: &[u8], is_final: bool) -> Vec<u8> {
        let len = u16::try_from(body.len()).unwrap();
        let mut payload = vec![0x00, operation];
        payload.extend_from_slice(&len.to_le_bytes());
        payload.extend_from_slice(body);
        let mut out = BytesMut::new();
        encode_frame(&payload, is_final, &mut out);
        out.to_vec()
    }

    fn acked(frame: Vec<u8>) -> Vec<u8> {
        let mut out = vec![ACK];
        out.extend(frame);
        out
    }

    fn sent_frame(bytes: &[u8]) -> dsclink_frame::Frame {
        decode_frame(&mut BytesMut::from(bytes), DEFAULT_MAX_PAYLOAD).unwrap()
    }

    /// Flip a bit in the first body byte so the checksum no longer matches.
    fn corrupted(mut frame: Vec<u8>) -> Vec<u8> {
        frame[6] ^= 0x01;
        frame
    }

    fn count_command() -> Command {
        Command::simple(CATEGORY_CAMERA, op::PICTURE_COUNT)
    }

    fn download_command() -> Command {
        Command::with_u16(CATEGORY_CAMERA, op::DOWNLOAD_PICTURE, 1)
    }

    #[test]
    fn handshake_first_attempt() {
        let mut chan = ScriptedChannel::new().reply(vec![ACK]);
        let mut session = Session::with_config(&mut chan, quiet());
        session.attention().unwrap();
        assert_eq!(session.get_ref().writes(), &[vec![ENQ]]);
    }

    #[test]
    fn handshake_ack_on_second_attempt() {
        let mut chan = ScriptedChannel::new().silent().reply(vec![ACK]);
        let mut session = Session::with_config(&mut chan, quiet());
        session.attention().unwrap();
        assert_eq!(session.get_ref().writes(), &[vec![ENQ], vec![ENQ]]);
        assert_eq!(session.get_ref().unused_replies(), 0);
        assert_eq!(session.get_ref().pending_input(), 0);
    }

    #[test]
    fn handshake_ack_on_third_attempt() {
        let mut chan = ScriptedChannel::new()
            .reply(vec![0x42])
            .silent()
            .reply(vec![ACK]);
        let mut session = Session::with_config(&mut chan, quiet());
        session.attention().unwrap();
        assert_eq!(session.get_ref().writes(), &[vec![ENQ], vec![ENQ], vec![ENQ]]);
    }

    #[test]
    fn handshake_discards_stale_input() {
        let mut chan = ScriptedChannel::new()
            .with_input(&[0x10, 0x02, 0x99])
            .reply(vec![ACK]);
        let mut session = Session::with_config(&mut chan, quiet());
        session.attention().unwrap();
        assert_eq!(session.get_ref().writes().len(), 1);
    }

    #[test]
    fn silent_device_is_unresponsive_after_three_enq() {
        let mut chan = ScriptedChannel::new();
        {
            let mut session = Session::with_config(&mut chan, quiet());
            let err = session.attention().unwrap_err();
            assert!(matches!(err, SessionError::DeviceUnresponsive { attempts: 3 }));
            assert!(session.is_poisoned());
            assert!(matches!(
                session.execute(&count_command()),
                Err(SessionError::Poisoned)
            ));
        }
        // Three ENQ, then EOT from drop.
        assert_eq!(chan.written(), vec![ENQ, ENQ, ENQ, EOT]);
    }

    #[test]
    fn single_frame_answer() {
        let mut chan = ScriptedChannel::new()
            .reply(acked(answer(op::PICTURE_COUNT, &[0x05, 0x00], true)))
            .silent();
        let mut session = Session::with_config(&mut chan, quiet());

        let body = session.execute(&count_command()).unwrap();
        assert_eq!(body, vec![0x05, 0x00]);

        let writes = session.get_ref().writes();
        assert_eq!(writes.len(), 2);
        let cmd = sent_frame(&writes[0]);
        assert!(cmd.is_final);
        assert_eq!(&cmd.payload[..], count_command().as_bytes());
        assert_eq!(writes[1], vec![ACK]);
    }

    #[test]
    fn multi_frame_answer_is_concatenated() {
        let mut chan = ScriptedChannel::new()
            .reply(acked(answer(op::DOWNLOAD_PICTURE, b"first-", false)))
            .reply(answer(op::DOWNLOAD_PICTURE, b"second-", false))
            .reply(answer(op::DOWNLOAD_PICTURE, b"third", true));
        let mut session = Session::with_config(&mut chan, quiet());

        let cmd = Command::with_u16(CATEGORY_CAMERA, op::DOWNLOAD_PICTURE, 1);
        let mut sink = Vec::new();
        let n = session.execute_into(&cmd, &mut sink).unwrap();

        assert_eq!(sink, b"first-second-third");
        assert_eq!(n, 18);
        let writes = session.get_ref().writes();
        assert_eq!(&writes[1..], &[vec![ACK], vec![ACK], vec![ACK]]);
        assert_eq!(session.get_ref().unused_replies(), 0);
    }

    #[test]
    fn nak_causes_identical_resend() {
        let mut chan = ScriptedChannel::new()
            .reply(vec![NAK])
            .reply(acked(answer(op::PICTURE_COUNT, &[0x01, 0x00], true)))
            .silent();
        let mut session = Session::with_config(&mut chan, quiet());

        assert_eq!(session.execute(&count_command()).unwrap(), vec![0x01, 0x00]);
        let writes = session.get_ref().writes();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0], writes[1]);
        assert_eq!(writes[2], vec![ACK]);
    }

    #[test]
    fn garbage_instead_of_ack_is_answered_with_nak() {
        let mut chan = ScriptedChannel::new()
            .reply(vec![0x42, 0x43])
            .reply(acked(answer(op::PICTURE_COUNT, &[0x02, 0x00], true)))
            .silent();
        let mut session = Session::with_config(&mut chan, quiet());

        assert_eq!(session.execute(&count_command()).unwrap(), vec![0x02, 0x00]);
        let writes = session.get_ref().writes();
        assert_eq!(&writes[1..], &[vec![NAK], vec![ACK]]);
    }

    #[test]
    fn acknowledge_phase_exhausts_after_three_refusals() {
        let mut chan = ScriptedChannel::new()
            .reply(vec![NAK])
            .reply(vec![NAK])
            .reply(vec![NAK]);
        let mut session = Session::with_config(&mut chan, quiet());

        let err = session.execute(&count_command()).unwrap_err();
        assert!(matches!(
            err,
            SessionError::CommandExhausted {
                operation: op::PICTURE_COUNT,
                phase: Phase::Acknowledge,
                attempts: 3,
            }
        ));
        assert_eq!(session.get_ref().writes().len(), 3);
        assert!(session.is_poisoned());
    }

    #[test]
    fn corrupted_answer_is_requested_again() {
        let mut bad = answer(op::PICTURE_COUNT, &[0x03, 0x00], true);
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        let mut chan = ScriptedChannel::new()
            .reply(acked(bad))
            .reply(answer(op::PICTURE_COUNT, &[0x03, 0x00], true))
            .silent();
        let mut session = Session::with_config(&mut chan, quiet());

        assert_eq!(session.execute(&count_command()).unwrap(), vec![0x03, 0x00]);
        let writes = session.get_ref().writes();
        assert_eq!(&writes[1..], &[vec![NAK], vec![ACK]]);
    }

    #[test]
    fn corrupted_continuation_is_requested_again() {
        let dl = op::DOWNLOAD_PICTURE;
        let mut chan = ScriptedChannel::new()
            .reply(acked(answer(dl, b"part-1-", false)))
            .reply(corrupted(answer(dl, b"part-2-", false)))
            .reply(answer(dl, b"part-2-", false))
            .reply(corrupted(answer(dl, b"part-3", true)))
            .reply(answer(dl, b"part-3", true))
            .silent();
        let mut session = Session::with_config(&mut chan, quiet());

        let body = session.execute(&download_command()).unwrap();
        assert_eq!(body, b"part-1-part-2-part-3");
        let writes = session.get_ref().writes();
        assert_eq!(
            &writes[1..],
            &[vec![ACK], vec![NAK], vec![ACK], vec![NAK], vec![ACK]]
        );
        assert_eq!(session.get_ref().unused_replies(), 0);
    }

    #[test]
    fn response_retry_budget_spans_all_frames() {
        let dl = op::DOWNLOAD_PICTURE;
        let mut chan = ScriptedChannel::new()
            .reply(acked(corrupted(answer(dl, b"part-1-", false))))
            .reply(answer(dl, b"part-1-", false))
            .reply(corrupted(answer(dl, b"part-2-", false)))
            .reply(answer(dl, b"part-2-", false))
            .reply(corrupted(answer(dl, b"part-3", true)));
        let mut session = Session::with_config(&mut chan, quiet());

        // No single frame failed more than once, yet the third failure ends
        // the exchange.
        let err = session.execute(&download_command()).unwrap_err();
        assert!(matches!(
            err,
            SessionError::CommandExhausted {
                operation: op::DOWNLOAD_PICTURE,
                phase: Phase::Response,
                attempts: 3,
            }
        ));
        let writes = session.get_ref().writes();
        assert_eq!(&writes[1..], &[vec![NAK], vec![ACK], vec![NAK], vec![ACK]]);
        assert!(session.is_poisoned());
    }

    #[test]
    fn response_phase_exhausts_after_three_bad_frames() {
        let mut chan = ScriptedChannel::new()
            .reply(vec![ACK, 0x00, 0x01])
            .reply(vec![0x55])
            .reply(vec![0x66]);
        let mut session = Session::with_config(&mut chan, quiet());

        let err = session.execute(&count_command()).unwrap_err();
        assert!(matches!(
            err,
            SessionError::CommandExhausted {
                phase: Phase::Response,
                ..
            }
        ));
        let writes = session.get_ref().writes();
        assert_eq!(&writes[1..], &[vec![NAK], vec![NAK]]);
        assert!(session.is_poisoned());
    }

    #[test]
    fn cancellation_stops_before_next_ack() {
        let mut chan = ScriptedChannel::new()
            .reply(acked(answer(op::DOWNLOAD_PICTURE, b"part", false)))
            .reply(answer(op::DOWNLOAD_PICTURE, b"rest", true));
        let mut session = Session::with_config(&mut chan, quiet());
        session.cancel_flag().store(true, Ordering::SeqCst);

        let cmd = Command::with_u16(CATEGORY_CAMERA, op::DOWNLOAD_PICTURE, 1);
        let err = session.execute(&cmd).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Interrupted {
                operation: op::DOWNLOAD_PICTURE
            }
        ));
        assert_eq!(session.get_ref().writes().len(), 1);
        assert!(session.is_poisoned());
    }

    #[test]
    fn cancel_flag_from_config_is_shared() {
        let flag = Arc::new(AtomicBool::new(false));
        let config = SessionConfig {
            cancel: Arc::clone(&flag),
            ..quiet()
        };
        let mut chan = ScriptedChannel::new()
            .reply(vec![ACK])
            .reply(acked(answer(op::DOWNLOAD_PICTURE, b"part", false)));
        let mut session = Session::connect(&mut chan, config).unwrap();
        assert!(Arc::ptr_eq(&session.cancel_flag(), &flag));

        flag.store(true, Ordering::SeqCst);
        let err = session.execute(&download_command()).unwrap_err();
        assert!(matches!(err, SessionError::Interrupted { .. }));
        // ENQ and the command; the continuation frame is never acknowledged.
        assert_eq!(session.get_ref().writes().len(), 2);
    }

    #[test]
    fn cancellation_ignored_for_final_frame() {
        let mut chan = ScriptedChannel::new()
            .reply(acked(answer(op::PICTURE_COUNT, &[0x04, 0x00], true)))
            .silent();
        let mut session = Session::with_config(&mut chan, quiet());
        session.cancel_flag().store(true, Ordering::SeqCst);

        assert_eq!(session.execute(&count_command()).unwrap(), vec![0x04, 0x00]);
    }

    #[test]
    fn raw_execute_builds_header() {
        let mut chan = ScriptedChannel::new()
            .reply(acked(answer(0x4C, &[0xAA], true)))
            .silent();
        let mut session = Session::with_config(&mut chan, quiet());

        assert_eq!(session.execute_raw(0x00, 0x4C, &[]).unwrap(), vec![0xAA]);
        let cmd = sent_frame(&session.get_ref().writes()[0]);
        assert_eq!(&cmd.payload[..], &[0x00, 0x4C, 0x00, 0x00]);
    }

    #[test]
    fn upload_splits_into_chunks() {
        let data: Vec<u8> = (0..1100u32).map(|i| (i % 251) as u8).collect();
        let mut chan = ScriptedChannel::new()
            .reply(vec![ACK])
            .reply(vec![ACK])
            .reply(vec![ACK]);
        let mut session = Session::with_config(&mut chan, quiet());

        assert_eq!(session.send_data(&data[..]).unwrap(), 1100);

        let frames: Vec<_> = session
            .get_ref()
            .writes()
            .iter()
            .map(|w| sent_frame(w))
            .collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(
            frames.iter().map(|f| f.is_final).collect::<Vec<_>>(),
            vec![false, false, true]
        );
        assert_eq!(&frames[0].payload[..4], &[0x00, op::UPLOAD_DATA, 0x00, 0x02]);
        assert_eq!(&frames[2].payload[..4], &[0x00, op::UPLOAD_DATA, 76, 0x00]);
        let joined: Vec<u8> = frames.iter().flat_map(|f| f.body().to_vec()).collect();
        assert_eq!(joined, data);
    }

    #[test]
    fn upload_resends_refused_frame() {
        let mut chan = ScriptedChannel::new().reply(vec![NAK]).reply(vec![ACK]);
        let mut session = Session::with_config(&mut chan, quiet());

        assert_eq!(session.send_data(&b"tiny"[..]).unwrap(), 4);
        let writes = session.get_ref().writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], writes[1]);
    }

    #[test]
    fn upload_gives_up_after_three_refusals() {
        let mut chan = ScriptedChannel::new()
            .reply(vec![NAK])
            .reply(vec![NAK])
            .reply(vec![NAK]);
        let mut session = Session::with_config(&mut chan, quiet());

        let err = session.send_data(&b"tiny"[..]).unwrap_err();
        assert!(matches!(
            err,
            SessionError::CommandExhausted {
                phase: Phase::Upload,
                ..
            }
        ));
    }

    #[test]
    fn upload_checks_cancellation_before_continuation_frames() {
        let mut chan = ScriptedChannel::new();
        let mut session = Session::with_config(&mut chan, quiet());
        session.cancel_flag().store(true, Ordering::SeqCst);

        let err = session.send_data(&vec![0u8; 600][..]).unwrap_err();
        assert!(matches!(err, SessionError::Interrupted { .. }));
        assert!(session.get_ref().writes().is_empty());
    }

    #[test]
    fn empty_upload_sends_nothing() {
        let mut chan = ScriptedChannel::new();
        let mut session = Session::with_config(&mut chan, quiet());
        assert_eq!(session.send_data(std::io::empty()).unwrap(), 0);
        assert!(session.get_ref().writes().is_empty());
    }

    #[test]
    fn close_sends_eot_once() {
        let mut chan = ScriptedChannel::new();
        Session::with_config(&mut chan, quiet()).close().unwrap();
        assert_eq!(chan.writes(), &[vec![EOT]]);
        assert_eq!(chan.drains(), 1);
    }

    #[test]
    fn transport_failure_poisons() {
        let mut chan = ScriptedChannel::new();
        chan.close();
        let mut session = Session::with_config(&mut chan, quiet());
        let err = session.execute(&count_command()).unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
        assert!(session.is_poisoned());
    }

    #[test]
    fn invalid_command_does_not_poison() {
        let mut chan = ScriptedChannel::new();
        let mut session = Session::with_config(&mut chan, quiet());
        let params = vec![0u8; 70_000];
        let err = session.execute_raw(0x00, 0x82, &params).unwrap_err();
        assert!(matches!(err, SessionError::InvalidCommand(_)));
        assert!(!session.is_poisoned());
    }
}
