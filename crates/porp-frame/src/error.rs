/// Errors that can occur while framing or decoding PORP traffic.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame was corrupted in transit: its COBS structure or PORP
    /// layout is internally inconsistent.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    /// A datagram's declared payload length disagrees with the bytes
    /// actually present. Surfaced explicitly; never silently truncated.
    #[error("datagram length mismatch (declared {declared}, available {available})")]
    LengthMismatch { declared: usize, available: usize },

    /// The payload exceeds what the wire format can carry.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    ///
    /// Read timeouts surface here as `WouldBlock`/`TimedOut` so a polling
    /// caller can tell an idle link from a dead one.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link reached EOF before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
