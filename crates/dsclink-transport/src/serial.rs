use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::channel::{ByteChannel, RawByte};
use crate::error::{Result, TransportError};

/// Speed every device answers at after power-up.
pub const BASELINE_SPEED: u32 = 9600;

/// Speeds the line discipline can be switched to, fastest first.
pub const SUPPORTED_SPEEDS: [u32; 5] = [115_200, 57_600, 38_400, 19_200, BASELINE_SPEED];

const REFILL_SIZE: usize = 128;

/// Line parameters for a [`SerialLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Speed applied when the link is opened. Default: 9600 bps.
    pub initial_speed: u32,
    /// How long a single raw read may wait for a byte. Default: 100 ms.
    pub byte_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            initial_speed: BASELINE_SPEED,
            byte_timeout: Duration::from_millis(100),
        }
    }
}

/// A tty configured for the camera line protocol.
///
/// The line runs raw, 8 data bits, even parity, one stop bit, with parity
/// marking enabled so that damaged bytes reach the reader as `FF 00 x`
/// and a literal `FF` arrives doubled. The settings found at open time are
/// put back when the link is dropped.
pub struct SerialLink {
    file: File,
    path: PathBuf,
    saved: libc::termios,
    current: libc::termios,
    speed: u32,
    config: LinkConfig,
    buf: [u8; REFILL_SIZE],
    start: usize,
    end: usize,
}

impl SerialLink {
    /// Open `path` with the default line parameters.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, LinkConfig::default())
    }

    /// Open `path` and apply explicit line parameters.
    pub fn open_with_config(path: impl AsRef<Path>, config: LinkConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let speed_code = speed_constant(config.initial_speed)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(&path)
            .map_err(|source| TransportError::Open {
                path: path.clone(),
                source,
            })?;
        let fd = file.as_raw_fd();

        let saved = get_attrs(fd).map_err(|source| TransportError::Configure {
            path: path.clone(),
            source,
        })?;
        let mut current = saved;
        make_raw(&mut current);
        set_attr_speed(&mut current, speed_code).map_err(|source| TransportError::Configure {
            path: path.clone(),
            source,
        })?;
        set_attrs(fd, &current).map_err(|source| TransportError::Configure {
            path: path.clone(),
            source,
        })?;

        info!(?path, speed = config.initial_speed, "serial link open");

        Ok(Self {
            file,
            path,
            saved,
            current,
            speed: config.initial_speed,
            config,
            buf: [0u8; REFILL_SIZE],
            start: 0,
            end: 0,
        })
    }

    /// The device path this link was opened on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Line parameters in effect.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    fn buffered(&self) -> bool {
        self.start < self.end
    }
}

impl ByteChannel for SerialLink {
    fn read_raw_byte(&mut self) -> Result<RawByte> {
        if self.buffered() {
            let byte = self.buf[self.start];
            self.start += 1;
            return Ok(RawByte::Byte(byte));
        }

        loop {
            if !poll_readable(self.file.as_raw_fd(), self.config.byte_timeout)? {
                return Ok(RawByte::Timeout);
            }
            match self.file.read(&mut self.buf) {
                Ok(0) => return Ok(RawByte::Timeout),
                Ok(n) => {
                    self.start = 1;
                    self.end = n;
                    return Ok(RawByte::Byte(self.buf[0]));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn wait_for_input(&mut self, timeout: Duration) -> Result<bool> {
        if self.buffered() {
            return Ok(true);
        }
        if timeout.is_zero() {
            return Ok(false);
        }
        Ok(poll_readable(self.file.as_raw_fd(), timeout)?)
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < buf.len() {
            match self.file.write(&buf[offset..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        Ok(())
    }

    fn drain_output(&mut self) -> Result<()> {
        let fd = self.file.as_raw_fd();
        loop {
            // SAFETY: `fd` is an open descriptor owned by `self.file`.
            let rc = unsafe { libc::tcdrain(fd) };
            if rc == 0 {
                return Ok(());
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != ErrorKind::Interrupted {
                return Err(TransportError::Io(err));
            }
        }
    }

    fn set_speed(&mut self, bps: u32) -> Result<()> {
        let code = speed_constant(bps)?;
        let mut next = self.current;
        set_attr_speed(&mut next, code)?;
        set_attrs(self.file.as_raw_fd(), &next)?;
        self.current = next;
        self.speed = bps;
        debug!(path = ?self.path, speed = bps, "line speed changed");
        Ok(())
    }

    fn speed(&self) -> u32 {
        self.speed
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        if let Err(err) = set_attrs(self.file.as_raw_fd(), &self.saved) {
            warn!(path = ?self.path, %err, "failed to restore line settings");
        } else {
            debug!(path = ?self.path, "line settings restored");
        }
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("path", &self.path)
            .field("speed", &self.speed)
            .field("config", &self.config)
            .finish()
    }
}

/// Map a speed in bits per second to the termios constant.
pub fn speed_constant(bps: u32) -> Result<libc::speed_t> {
    let code = match bps {
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        other => return Err(TransportError::UnsupportedSpeed(other)),
    };
    Ok(code)
}

fn make_raw(t: &mut libc::termios) {
    t.c_iflag |= libc::PARMRK | libc::INPCK;
    t.c_iflag &= !(libc::BRKINT
        | libc::IGNBRK
        | libc::IGNPAR
        | libc::ISTRIP
        | libc::INLCR
        | libc::IGNCR
        | libc::ICRNL
        | libc::IXON
        | libc::IXOFF);
    t.c_oflag &= !libc::OPOST;
    t.c_cflag &= !(libc::CSIZE | libc::CSTOPB | libc::HUPCL | libc::PARODD);
    t.c_cflag |= libc::CLOCAL | libc::CREAD | libc::CS8 | libc::PARENB;
    t.c_lflag &= !(libc::ECHO
        | libc::ECHOE
        | libc::ECHOK
        | libc::ECHONL
        | libc::ICANON
        | libc::ISIG
        | libc::NOFLSH
        | libc::TOSTOP);
    t.c_cc[libc::VMIN] = 0;
    t.c_cc[libc::VTIME] = 1;
}

fn get_attrs(fd: RawFd) -> std::io::Result<libc::termios> {
    let mut attrs = MaybeUninit::<libc::termios>::uninit();
    // SAFETY: `attrs` points to writable storage sized for a termios and `fd`
    // is an open descriptor.
    let rc = unsafe { libc::tcgetattr(fd, attrs.as_mut_ptr()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: tcgetattr succeeded, so every field has been written.
    Ok(unsafe { attrs.assume_init() })
}

fn set_attrs(fd: RawFd, attrs: &libc::termios) -> std::io::Result<()> {
    // SAFETY: `attrs` is a valid termios and `fd` is an open descriptor.
    let rc = unsafe { libc::tcsetattr(fd, libc::TCSANOW, attrs) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn set_attr_speed(attrs: &mut libc::termios, code: libc::speed_t) -> std::io::Result<()> {
    let attrs: *mut libc::termios = attrs;
    // SAFETY: `attrs` comes from an exclusive borrow of a valid termios.
    if unsafe { libc::cfsetispeed(attrs, code) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::cfsetospeed(attrs, code) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Wait until `fd` is readable or `timeout` elapses, restarting on `EINTR`.
fn poll_readable(fd: RawFd, timeout: Duration) -> std::io::Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let millis = remaining.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: `pfd` is a single valid pollfd for the duration of the call.
        let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(rc > 0);
    }
}
