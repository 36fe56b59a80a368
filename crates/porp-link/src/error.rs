use bytes::Bytes;

/// Errors that can occur in channel and command operations.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] porp_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] porp_frame::FrameError),

    /// The channel was closed; the background reader is gone and no
    /// further frames can arrive.
    #[error("channel closed")]
    ChannelClosed,

    /// A command received no reply within its deadline.
    #[error("command timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A command reply matched neither the expected echo nor the bare
    /// ACK, and could not be decoded as the expected value reply.
    #[error("unexpected reply to command {command}: {reply:02x?}")]
    UnexpectedAck { command: u8, reply: Bytes },

    /// A value reply arrived without the attribute it should carry.
    #[error("reply missing attribute {0}")]
    MissingAttribute(u8),
}

pub type Result<T> = std::result::Result<T, LinkError>;
