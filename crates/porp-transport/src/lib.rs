//! Byte-oriented link transport abstraction for PORP.
//!
//! Provides a unified interface over the byte streams a PORP channel can
//! run on:
//! - Serial devices (`/dev/ttyUSB0` and friends), opened in raw mode
//! - Unix domain sockets (handy for `socat`-style serial bridges)
//! - In-process socketpairs (loopback testing without hardware)
//!
//! This is the lowest layer of the stack. Everything else builds on top
//! of the [`LinkStream`] type provided here: the protocol only needs
//! `read` with a timeout, `write`, and the ability to split a full-duplex
//! stream into independent reader and writer handles via [`LinkStream::try_clone`].

pub mod error;
pub mod stream;

#[cfg(unix)]
pub mod tty;

pub use error::{Result, TransportError};
pub use stream::LinkStream;

#[cfg(unix)]
pub use tty::SerialConfig;
