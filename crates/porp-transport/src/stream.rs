use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TransportError};

/// A connected full-duplex byte link — implements Read + Write.
///
/// This is the fundamental I/O type the protocol stack runs on. It wraps
/// a raw serial device, a Unix domain socket (e.g. a `socat` bridge to a
/// remote port), or one half of an in-process socketpair for tests.
pub struct LinkStream {
    inner: LinkStreamInner,
}

enum LinkStreamInner {
    #[cfg(unix)]
    Tty(crate::tty::SerialPort),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl Read for LinkStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkStreamInner::Tty(port) => port.read(buf),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for LinkStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkStreamInner::Tty(port) => port.write(buf),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            LinkStreamInner::Tty(port) => port.flush(),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.flush(),
        }
    }
}

impl LinkStream {
    /// Open a serial device with the given configuration.
    #[cfg(unix)]
    pub fn open_serial(path: impl AsRef<Path>, config: crate::tty::SerialConfig) -> Result<Self> {
        let port = crate::tty::SerialPort::open(path, config)?;
        Ok(Self {
            inner: LinkStreamInner::Tty(port),
        })
    }

    /// Connect to a Unix domain socket (serial bridge).
    #[cfg(unix)]
    pub fn connect_socket(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream =
            std::os::unix::net::UnixStream::connect(path).map_err(|e| TransportError::Open {
                path: path.to_path_buf(),
                source: e,
            })?;
        debug!(?path, "connected to unix socket bridge");
        Ok(Self::from_unix(stream))
    }

    /// Create a connected pair of in-process streams.
    ///
    /// Each end behaves like one side of a full-duplex serial link; used
    /// by the loopback test harness and the device emulator.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (a, b) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_unix(a), Self::from_unix(b)))
    }

    #[cfg(unix)]
    pub(crate) fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: LinkStreamInner::Unix(stream),
        }
    }

    /// Set the read timeout on the underlying stream.
    ///
    /// `None` means reads block until at least one byte arrives. Serial
    /// devices round the timeout up to a tenth of a second (termios
    /// `VTIME` granularity).
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Tty(port) => port.set_read_timeout(timeout),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
        }
    }

    /// Try to clone this stream (creates a new file descriptor).
    ///
    /// The clone shares the underlying link; a channel uses one handle
    /// for its background reader and the other for writes.
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Tty(port) => Ok(Self {
                inner: LinkStreamInner::Tty(port.try_clone()?),
            }),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => {
                let cloned = stream.try_clone()?;
                Ok(Self::from_unix(cloned))
            }
        }
    }

    /// Shut the link down, waking any blocked reader with EOF.
    ///
    /// On socket transports this is a real `shutdown(2)`; serial devices
    /// have no equivalent, so the channel's reader relies on its poll
    /// timeout to observe the shutdown flag instead.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Tty(_) => Ok(()),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream
                .shutdown(std::net::Shutdown::Both)
                .or_else(|e| match e.kind() {
                    std::io::ErrorKind::NotConnected => Ok(()),
                    _ => Err(e),
                })
                .map_err(Into::into),
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            LinkStreamInner::Tty(_) => "serial",
            #[cfg(unix)]
            LinkStreamInner::Unix(_) => "unix-socket",
        }
    }
}

impl std::fmt::Debug for LinkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkStream")
            .field("type", &self.transport_name())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn pair_is_full_duplex() {
        let (mut a, mut b) = LinkStream::pair().unwrap();

        a.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        b.write_all(b"pong").unwrap();
        a.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn clone_shares_the_link() {
        let (a, mut b) = LinkStream::pair().unwrap();
        let mut writer = a.try_clone().unwrap();

        writer.write_all(b"via-clone").unwrap();
        let mut buf = [0u8; 9];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"via-clone");
    }

    #[test]
    fn read_timeout_surfaces_as_would_block() {
        let (mut a, _b) = LinkStream::pair().unwrap();
        a.set_read_timeout(Some(Duration::from_millis(20))).unwrap();

        let mut buf = [0u8; 1];
        let err = a.read(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        ));
    }

    #[test]
    fn shutdown_wakes_blocked_reader() {
        let (mut a, b) = LinkStream::pair().unwrap();

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 1];
            a.read(&mut buf)
        });

        std::thread::sleep(Duration::from_millis(20));
        b.shutdown().unwrap();

        let read = handle.join().unwrap().unwrap();
        assert_eq!(read, 0, "shutdown should read as EOF");
    }

    #[test]
    fn connect_socket_missing_path_reports_open_error() {
        let err = LinkStream::connect_socket("/nonexistent/porp-bridge.sock").unwrap_err();
        assert!(matches!(err, TransportError::Open { .. }));
    }
}
