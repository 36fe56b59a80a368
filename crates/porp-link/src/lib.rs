//! The PORP channel layer.
//!
//! This is the "just works" layer: open a [`Channel`] over a
//! [`porp_transport::LinkStream`] and a background reader continuously
//! splits, decodes, and classifies incoming frames into the two logical
//! queues — command responses and asynchronous datagrams. Send and
//! receive operations are synchronous with explicit timeouts; absence of
//! a reply is an ordinary value, not an error.
//!
//! On top of the channel, [`commands`] provides the typed device
//! configuration and telemetry command set (channel mode, receive gain,
//! coding mode, calibration, CW test tone, link quality).

pub mod channel;
pub mod commands;
pub mod error;

pub use channel::{Channel, LinkConfig, LinkStats};
pub use commands::{
    auto_calibrate, enable_rx_coding_mode, get_channel_mode, get_control_bits, get_rx_gain,
    get_rx_variance, get_threshold, get_version_info, query_channel_quality, set_channel_mode,
    set_control_bits, set_rx_gain, set_threshold, transmit_cw, transmit_off, ChannelQuality, Cmd,
};
pub use error::{LinkError, Result};
