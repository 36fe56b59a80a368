//! Typed device configuration and telemetry commands.
//!
//! Each helper builds the command frame, sends it over a [`Channel`],
//! and validates the reply. Setters and mode switches expect an
//! acknowledgement (either a bare ACK or an echo of the command id);
//! getters expect a zero-length datagram whose metadata carries the
//! value keyed by the command id.

use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use porp_frame::{decode_datagram, decode_metadata, encode_command, is_ack_for, AttrId, Attributes};

use crate::channel::Channel;
use crate::error::{LinkError, Result};

/// Default wait for a command reply.
pub const CMD_TIMEOUT: Duration = Duration::from_secs(1);

/// Calibration sweeps the gain range and can take several seconds.
pub const CALIBRATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Command identifiers understood by the modem firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cmd {
    GetVersionInfo = 32,
    TransmitCw = 33,
    TransmitOff = 34,
    AutoCalibrate = 35,
    GetThreshold = 36,
    SetThreshold = 37,
    GetChannelMode = 38,
    SetChannelMode = 39,
    GetRxGain = 40,
    SetRxGain = 41,
    GetRxVariance = 42,
    GetControlBits = 64,
    SetControlBits = 65,
    EnableRxCodingMode = 66,
    QueryChannelMode = 67,
}

impl Cmd {
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Map a raw command id byte back to a known command.
    pub fn from_raw(id: u8) -> Option<Self> {
        match id {
            32 => Some(Self::GetVersionInfo),
            33 => Some(Self::TransmitCw),
            34 => Some(Self::TransmitOff),
            35 => Some(Self::AutoCalibrate),
            36 => Some(Self::GetThreshold),
            37 => Some(Self::SetThreshold),
            38 => Some(Self::GetChannelMode),
            39 => Some(Self::SetChannelMode),
            40 => Some(Self::GetRxGain),
            41 => Some(Self::SetRxGain),
            42 => Some(Self::GetRxVariance),
            64 => Some(Self::GetControlBits),
            65 => Some(Self::SetControlBits),
            66 => Some(Self::EnableRxCodingMode),
            67 => Some(Self::QueryChannelMode),
            _ => None,
        }
    }
}

/// Link-quality figures reported by [`query_channel_quality`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelQuality {
    /// Mean symbol strength over the measurement window, 0.0 to 1.0.
    pub avg_strength: f64,
    /// Weakest symbol in the window, 0.0 to 1.0.
    pub min_strength: f64,
    /// Coding-layer error corrections since the last query.
    pub detected_errors: u64,
    /// Sync word of the active coding mode.
    pub coding_mode: u32,
}

/// Firmware identification string.
pub fn get_version_info(channel: &Channel) -> Result<String> {
    let raw = get_raw(channel, Cmd::GetVersionInfo)?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// Key up an unmodulated carrier at `khz` for hardware testing. The
/// firmware takes the frequency in hundred-hertz steps.
pub fn transmit_cw(channel: &Channel, khz: f64) -> Result<()> {
    let steps = (khz * 10.0).round() as u16;
    send_expect_ack(channel, Cmd::TransmitCw, &steps.to_le_bytes(), CMD_TIMEOUT)
}

/// Stop a carrier started with [`transmit_cw`].
pub fn transmit_off(channel: &Channel) -> Result<()> {
    send_expect_ack(channel, Cmd::TransmitOff, &[], CMD_TIMEOUT)
}

/// Run the receive-gain calibration sweep, optionally bounded to at
/// most `iterations` passes. Returns the number of iterations the
/// firmware needed to converge.
pub fn auto_calibrate(channel: &Channel, iterations: Option<u16>) -> Result<u64> {
    let args = iterations.map(u16::to_le_bytes);
    let frame = encode_command(
        Cmd::AutoCalibrate.id(),
        args.as_ref().map_or(&[][..], |bytes| bytes),
    )?;
    let reply = request(channel, &frame, CALIBRATE_TIMEOUT)?;
    let attrs = reply_attrs(&reply)?;
    attrs
        .uint(Cmd::AutoCalibrate.id())
        .ok_or(LinkError::MissingAttribute(Cmd::AutoCalibrate.id()))
}

pub fn get_threshold(channel: &Channel) -> Result<u16> {
    get_u16(channel, Cmd::GetThreshold)
}

pub fn set_threshold(channel: &Channel, value: u16) -> Result<()> {
    send_expect_ack(channel, Cmd::SetThreshold, &value.to_le_bytes(), CMD_TIMEOUT)
}

pub fn get_channel_mode(channel: &Channel) -> Result<u16> {
    get_u16(channel, Cmd::GetChannelMode)
}

pub fn set_channel_mode(channel: &Channel, mode: u16) -> Result<()> {
    send_expect_ack(channel, Cmd::SetChannelMode, &mode.to_le_bytes(), CMD_TIMEOUT)
}

pub fn get_rx_gain(channel: &Channel) -> Result<u16> {
    get_u16(channel, Cmd::GetRxGain)
}

pub fn set_rx_gain(channel: &Channel, gain: u16) -> Result<()> {
    send_expect_ack(channel, Cmd::SetRxGain, &gain.to_le_bytes(), CMD_TIMEOUT)
}

/// Demodulator noise estimate, in raw ADC units squared.
pub fn get_rx_variance(channel: &Channel) -> Result<u64> {
    let frame = encode_command(Cmd::GetRxVariance.id(), &[])?;
    let reply = request(channel, &frame, CMD_TIMEOUT)?;
    reply_attrs(&reply)?
        .uint(Cmd::GetRxVariance.id())
        .ok_or(LinkError::MissingAttribute(Cmd::GetRxVariance.id()))
}

pub fn get_control_bits(channel: &Channel) -> Result<u16> {
    get_u16(channel, Cmd::GetControlBits)
}

pub fn set_control_bits(channel: &Channel, bits: u16) -> Result<()> {
    send_expect_ack(channel, Cmd::SetControlBits, &bits.to_le_bytes(), CMD_TIMEOUT)
}

/// Switch the receiver into a coded mode identified by its sync word.
pub fn enable_rx_coding_mode(channel: &Channel, sync_word: u32) -> Result<()> {
    send_expect_ack(
        channel,
        Cmd::EnableRxCodingMode,
        &sync_word.to_le_bytes(),
        CMD_TIMEOUT,
    )
}

/// Read the receiver's link-quality counters.
pub fn query_channel_quality(channel: &Channel) -> Result<ChannelQuality> {
    let frame = encode_command(Cmd::QueryChannelMode.id(), &[])?;
    let reply = request(channel, &frame, CMD_TIMEOUT)?;
    let attrs = reply_attrs(&reply)?;
    let need = |id: AttrId| attrs.raw(id as u8).ok_or(LinkError::MissingAttribute(id as u8));
    need(AttrId::AvgStrength)?;
    need(AttrId::MinStrength)?;
    Ok(ChannelQuality {
        avg_strength: attrs.ratio(AttrId::AvgStrength as u8).unwrap_or(0.0),
        min_strength: attrs.ratio(AttrId::MinStrength as u8).unwrap_or(0.0),
        detected_errors: attrs.uint(AttrId::DetectedErrors as u8).unwrap_or(0),
        coding_mode: attrs.coding_word(AttrId::CodingMode as u8).unwrap_or(0),
    })
}

/// Send `frame` and turn an absent reply into [`LinkError::Timeout`].
fn request(channel: &Channel, frame: &[u8], timeout: Duration) -> Result<Bytes> {
    channel
        .send_packet(frame, timeout)?
        .ok_or(LinkError::Timeout(timeout))
}

fn send_expect_ack(channel: &Channel, cmd: Cmd, args: &[u8], timeout: Duration) -> Result<()> {
    let frame = encode_command(cmd.id(), args)?;
    let reply = request(channel, &frame, timeout)?;
    if is_ack_for(&reply, cmd.id()) {
        debug!(cmd = ?cmd, "acknowledged");
        Ok(())
    } else {
        Err(LinkError::UnexpectedAck {
            command: cmd.id(),
            reply,
        })
    }
}

/// A getter reply is a zero-length datagram carrying the value in its
/// metadata region, keyed by the command id.
fn reply_attrs(reply: &Bytes) -> Result<Attributes> {
    let datagram = decode_datagram(reply)?;
    Ok(decode_metadata(&datagram.metadata))
}

fn get_raw(channel: &Channel, cmd: Cmd) -> Result<Bytes> {
    let frame = encode_command(cmd.id(), &[])?;
    let reply = request(channel, &frame, CMD_TIMEOUT)?;
    reply_attrs(&reply)?
        .raw(cmd.id())
        .cloned()
        .ok_or(LinkError::MissingAttribute(cmd.id()))
}

fn get_u16(channel: &Channel, cmd: Cmd) -> Result<u16> {
    let raw = get_raw(channel, cmd)?;
    if raw.len() < 2 {
        return Err(LinkError::MissingAttribute(cmd.id()));
    }
    Ok(u16::from_le_bytes([raw[0], raw[1]]))
}

#[cfg(all(test, unix))]
mod tests {
    use porp_frame::{encode_metadata, FrameWriter, ACK};
    use porp_transport::LinkStream;

    use crate::channel::LinkConfig;

    use super::*;

    fn channel_and_peer() -> (Channel, FrameWriter<LinkStream>) {
        let (near, far) = LinkStream::pair().unwrap();
        let channel = Channel::open(near, LinkConfig::default()).unwrap();
        (channel, FrameWriter::new(far))
    }

    fn getter_reply(id: u8, value: &[u8]) -> Vec<u8> {
        let mut attrs = Attributes::new();
        attrs.insert(id, value.to_vec());
        let mut frame = vec![0x00]; // zero-length datagram
        frame.extend_from_slice(&encode_metadata(&attrs).unwrap());
        frame
    }

    #[test]
    fn setter_accepts_bare_ack() {
        let (channel, mut peer) = channel_and_peer();
        peer.send(&ACK).unwrap();
        set_threshold(&channel, 0x0203).unwrap();
    }

    #[test]
    fn setter_accepts_command_echo() {
        let (channel, mut peer) = channel_and_peer();
        peer.send(&[0x00, 0x01, Cmd::SetChannelMode.id()]).unwrap();
        set_channel_mode(&channel, 1).unwrap();
    }

    #[test]
    fn setter_rejects_wrong_echo() {
        let (channel, mut peer) = channel_and_peer();
        peer.send(&[0x00, 0x01, Cmd::SetRxGain.id()]).unwrap();
        let err = set_threshold(&channel, 1).unwrap_err();
        assert!(matches!(
            err,
            LinkError::UnexpectedAck { command, .. } if command == Cmd::SetThreshold.id()
        ));
    }

    #[test]
    fn getter_decodes_metadata_keyed_by_command_id() {
        let (channel, mut peer) = channel_and_peer();
        peer.send(&getter_reply(Cmd::GetThreshold.id(), &0x1234u16.to_le_bytes()))
            .unwrap();
        assert_eq!(get_threshold(&channel).unwrap(), 0x1234);
    }

    #[test]
    fn version_info_is_utf8() {
        let (channel, mut peer) = channel_and_peer();
        peer.send(&getter_reply(Cmd::GetVersionInfo.id(), b"fw 2.1.0"))
            .unwrap();
        assert_eq!(get_version_info(&channel).unwrap(), "fw 2.1.0");
    }

    #[test]
    fn quality_query_maps_all_four_attributes() {
        let (channel, mut peer) = channel_and_peer();
        let mut attrs = Attributes::new();
        attrs.insert_u16(AttrId::AvgStrength as u8, 0xFFFF);
        attrs.insert_u16(AttrId::MinStrength as u8, 0x8000);
        attrs.insert(AttrId::DetectedErrors as u8, vec![7, 0]);
        attrs.insert_u32(AttrId::CodingMode as u8, 0x1ACF_FC1D);
        let mut frame = vec![0x00];
        frame.extend_from_slice(&encode_metadata(&attrs).unwrap());
        peer.send(&frame).unwrap();

        let quality = query_channel_quality(&channel).unwrap();
        assert!((quality.avg_strength - 1.0).abs() < 1e-9);
        assert!((quality.min_strength - 0x8000 as f64 / 0xFFFF as f64).abs() < 1e-9);
        assert_eq!(quality.detected_errors, 7);
        assert_eq!(quality.coding_mode, 0x1ACF_FC1D);
    }

    #[test]
    fn quality_query_without_strengths_is_an_error() {
        let (channel, mut peer) = channel_and_peer();
        peer.send(&[0x00]).unwrap();
        let err = query_channel_quality(&channel).unwrap_err();
        assert!(matches!(err, LinkError::MissingAttribute(96)));
    }

    #[test]
    fn calibrate_bound_is_sent_as_little_endian_args() {
        use porp_frame::{decode_command, FrameReader};
        use porp_transport::LinkStream;

        let (near, far) = LinkStream::pair().unwrap();
        let channel = Channel::open(near, LinkConfig::default()).unwrap();
        let mut peer = FrameWriter::new(far.try_clone().unwrap());

        peer.send(&getter_reply(Cmd::AutoCalibrate.id(), &2u16.to_le_bytes()))
            .unwrap();
        assert_eq!(auto_calibrate(&channel, Some(0x0102)).unwrap(), 2);

        let mut reader = FrameReader::new(far);
        let sent = decode_command(&reader.read_frame().unwrap()).unwrap();
        assert_eq!(sent.id, Cmd::AutoCalibrate.id());
        assert_eq!(sent.args.as_ref(), &[0x02, 0x01]);
    }

    #[test]
    fn unbounded_calibrate_sends_no_args() {
        use porp_frame::{decode_command, FrameReader};
        use porp_transport::LinkStream;

        let (near, far) = LinkStream::pair().unwrap();
        let channel = Channel::open(near, LinkConfig::default()).unwrap();
        let mut peer = FrameWriter::new(far.try_clone().unwrap());

        peer.send(&getter_reply(Cmd::AutoCalibrate.id(), &3u16.to_le_bytes()))
            .unwrap();
        assert_eq!(auto_calibrate(&channel, None).unwrap(), 3);

        let mut reader = FrameReader::new(far);
        let sent = decode_command(&reader.read_frame().unwrap()).unwrap();
        assert_eq!(sent.id, Cmd::AutoCalibrate.id());
        assert!(sent.args.is_empty());
    }

    #[test]
    fn missing_reply_is_a_timeout() {
        let (channel, _peer) = channel_and_peer();
        // Nothing on the wire; CMD_TIMEOUT expires.
        let err = transmit_off(&channel).unwrap_err();
        assert!(matches!(err, LinkError::Timeout(_)));
    }
}
