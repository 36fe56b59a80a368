use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// Serial line configuration.
#[derive(Debug, Clone, Copy)]
pub struct SerialConfig {
    /// Line speed in baud. Default: 57600, the rate the modem-side
    /// firmware ships with.
    pub baud: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self { baud: 57600 }
    }
}

/// A raw-mode serial device.
///
/// Opened read/write, no controlling terminal, 8N1, all line discipline
/// processing off (the protocol needs the byte stream untouched — a
/// cooked tty would eat the 0x00 frame delimiters).
pub struct SerialPort {
    file: File,
    path: PathBuf,
    /// Set when a VTIME-based read timeout is active. With `VMIN = 0` a
    /// timed-out `read(2)` returns 0 bytes, which is indistinguishable
    /// from EOF; this flag lets `read` report it as `TimedOut` instead.
    timed_reads: Arc<AtomicBool>,
}

impl SerialPort {
    /// Open and configure a serial device.
    pub fn open(path: impl AsRef<Path>, config: SerialConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let speed = baud_to_speed(config.baud)?;

        // O_NONBLOCK only for the open itself, so a dropped carrier line
        // cannot wedge us; cleared again below for timed blocking reads.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&path)
            .map_err(|e| TransportError::Open {
                path: path.clone(),
                source: e,
            })?;

        let fd = file.as_raw_fd();
        configure_raw(fd, speed).map_err(|e| TransportError::Configure {
            path: path.clone(),
            source: e,
        })?;

        info!(?path, baud = config.baud, "opened serial device");

        Ok(Self {
            file,
            path,
            timed_reads: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Set the read timeout via termios `VMIN`/`VTIME`.
    ///
    /// Granularity is a tenth of a second; sub-decisecond timeouts are
    /// rounded up to one decisecond.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        let fd = self.file.as_raw_fd();
        let mut tio = get_termios(fd).map_err(|e| TransportError::Configure {
            path: self.path.clone(),
            source: e,
        })?;

        match timeout {
            None => {
                tio.c_cc[libc::VMIN] = 1;
                tio.c_cc[libc::VTIME] = 0;
            }
            Some(timeout) => {
                let deciseconds = timeout.as_millis().div_ceil(100).clamp(1, 255) as libc::cc_t;
                tio.c_cc[libc::VMIN] = 0;
                tio.c_cc[libc::VTIME] = deciseconds;
            }
        }

        set_termios(fd, &tio).map_err(|e| TransportError::Configure {
            path: self.path.clone(),
            source: e,
        })?;
        self.timed_reads.store(timeout.is_some(), Ordering::SeqCst);
        debug!(path = ?self.path, ?timeout, "serial read timeout updated");
        Ok(())
    }

    /// Clone the port (dup the descriptor). Termios state is per-device,
    /// so a timeout set on either handle affects both.
    pub fn try_clone(&self) -> Result<Self> {
        let file = self.file.try_clone()?;
        Ok(Self {
            file,
            path: self.path.clone(),
            timed_reads: Arc::clone(&self.timed_reads),
        })
    }

    /// The device path this port was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Read for SerialPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read = self.file.read(buf)?;
        if read == 0 && self.timed_reads.load(Ordering::SeqCst) {
            return Err(std::io::Error::from(ErrorKind::TimedOut));
        }
        Ok(read)
    }
}

impl Write for SerialPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl std::fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPort").field("path", &self.path).finish()
    }
}

fn baud_to_speed(baud: u32) -> Result<libc::speed_t> {
    let speed = match baud {
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        other => return Err(TransportError::UnsupportedBaudRate(other)),
    };
    Ok(speed)
}

fn get_termios(fd: libc::c_int) -> std::io::Result<libc::termios> {
    // SAFETY: `tio` is a plain-old-data struct fully initialized by
    // tcgetattr on success; fd is an open descriptor owned by us.
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(tio)
    }
}

fn set_termios(fd: libc::c_int, tio: &libc::termios) -> std::io::Result<()> {
    // SAFETY: fd is open and `tio` points to a valid termios struct.
    let rc = unsafe { libc::tcsetattr(fd, libc::TCSANOW, tio) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn configure_raw(fd: libc::c_int, speed: libc::speed_t) -> std::io::Result<()> {
    // Drop O_NONBLOCK now that the device is open.
    // SAFETY: plain fcntl flag manipulation on an owned descriptor.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }

    let mut tio = get_termios(fd)?;

    // SAFETY: cfmakeraw/cfsetspeed only mutate the struct we pass in.
    unsafe {
        libc::cfmakeraw(&mut tio);
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }

    // 8N1, receiver on, ignore modem control lines.
    tio.c_cflag |= libc::CLOCAL | libc::CREAD;
    tio.c_cc[libc::VMIN] = 1;
    tio.c_cc[libc::VTIME] = 0;

    set_termios(fd, &tio)?;

    // Discard whatever was buffered before we configured the line.
    // SAFETY: fd is open.
    let rc = unsafe { libc::tcflush(fd, libc::TCIOFLUSH) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
