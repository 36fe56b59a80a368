//! A scripted back-to-back device pair.
//!
//! Two emulated devices, each owning its side of a socket pair, wired
//! together by an in-process "air" link. Host code opens ordinary
//! channels over the returned streams and cannot tell the difference
//! from real hardware: commands are answered with the proper echo or
//! metadata reply, datagrams are acknowledged and forwarded to the
//! peer, and an optional hook corrupts forwarded payloads to exercise
//! the bit-error accounting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use porp_frame::{
    classify, decode_command, decode_datagram, encode_command, encode_datagram, encode_metadata,
    AttrId, Attributes, FrameClass, FrameError, FrameReader, FrameWriter, ACK,
};
use porp_link::{Cmd, LinkError, Result};
use porp_transport::{LinkStream, TransportError};

const EMULATOR_VERSION: &str = "porp-emul 0.3.0";

/// Mutates a forwarded payload in place.
pub type CorruptHook = Box<dyn FnMut(&mut Vec<u8>) + Send>;

/// Behavior knobs for [`EmulatedLink::spawn`].
pub struct EmulatorOptions {
    /// Applied to payloads traveling from device A to device B.
    pub corrupt_forward: Option<CorruptHook>,
    /// Attach strength/error attributes to forwarded datagrams, the way
    /// real firmware reports reception telemetry.
    pub attach_telemetry: bool,
    /// Reader poll interval inside each device thread.
    pub read_poll: Duration,
}

impl Default for EmulatorOptions {
    fn default() -> Self {
        Self {
            corrupt_forward: None,
            attach_telemetry: true,
            read_poll: Duration::from_millis(20),
        }
    }
}

/// Handle over the two running device threads. Stops them on drop.
pub struct EmulatedLink {
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl EmulatedLink {
    /// Spawn the pair. Returns the host-side streams of device A and
    /// device B, in that order.
    pub fn spawn(options: EmulatorOptions) -> Result<(LinkStream, LinkStream, EmulatedLink)> {
        let (host_a, dev_a) = LinkStream::pair()?;
        let (host_b, dev_b) = LinkStream::pair()?;
        let (air_ab_tx, air_ab_rx) = mpsc::channel();
        let (air_ba_tx, air_ba_rx) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));

        let handles = vec![
            spawn_device(
                "porp-emul-a",
                dev_a,
                air_ab_tx,
                air_ba_rx,
                options.corrupt_forward,
                options.attach_telemetry,
                options.read_poll,
                Arc::clone(&shutdown),
            )?,
            spawn_device(
                "porp-emul-b",
                dev_b,
                air_ba_tx,
                air_ab_rx,
                None,
                options.attach_telemetry,
                options.read_poll,
                Arc::clone(&shutdown),
            )?,
        ];

        Ok((host_a, host_b, EmulatedLink { shutdown, handles }))
    }

    /// Stop both devices and wait for their threads.
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for EmulatedLink {
    fn drop(&mut self) {
        self.halt();
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_device(
    name: &'static str,
    stream: LinkStream,
    air_tx: Sender<Vec<u8>>,
    air_rx: Receiver<Vec<u8>>,
    corrupt: Option<CorruptHook>,
    attach_telemetry: bool,
    read_poll: Duration,
    shutdown: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let reader_stream = stream.try_clone()?;
    reader_stream.set_read_timeout(Some(read_poll))?;
    let reader = FrameReader::new(reader_stream);
    let writer = FrameWriter::new(stream);

    std::thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            let mut device = Device {
                reader,
                writer,
                air_tx,
                air_rx,
                corrupt,
                attach_telemetry,
                state: DeviceState::default(),
            };
            if let Err(err) = device.run(&shutdown) {
                debug!(device = name, %err, "emulated device stopped");
            }
        })
        .map_err(|err| LinkError::Transport(TransportError::Io(err)))
}

struct DeviceState {
    threshold: u16,
    channel_mode: u16,
    rx_gain: u16,
    control_bits: u16,
    coding_mode: u32,
    rx_variance: u16,
    detected_errors: u16,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            threshold: 0x0200,
            channel_mode: 0,
            rx_gain: 0x0040,
            control_bits: 0,
            coding_mode: 0,
            rx_variance: 0x0208,
            detected_errors: 0,
        }
    }
}

struct Device {
    reader: FrameReader<LinkStream>,
    writer: FrameWriter<LinkStream>,
    air_tx: Sender<Vec<u8>>,
    air_rx: Receiver<Vec<u8>>,
    corrupt: Option<CorruptHook>,
    attach_telemetry: bool,
    state: DeviceState,
}

impl Device {
    fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }
            match self.reader.read_frame() {
                Ok(frame) => match classify(&frame) {
                    Some(FrameClass::Response) => self.handle_command(&frame)?,
                    Some(FrameClass::Datagram) => self.handle_datagram(&frame)?,
                    None => {}
                },
                Err(FrameError::Io(err))
                    if matches!(
                        err.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) => {}
                Err(FrameError::ConnectionClosed) => return Ok(()),
                Err(err) => {
                    warn!(%err, "emulated device dropped a frame");
                    continue;
                }
            }
            self.deliver_air()?;
        }
    }

    /// Frames heard on the host port go to the peer over the air; the
    /// host gets an immediate ACK either way.
    fn handle_datagram(&mut self, frame: &[u8]) -> Result<()> {
        self.writer.send(&ACK)?;
        let datagram = match decode_datagram(frame) {
            Ok(datagram) => datagram,
            Err(err) => {
                warn!(%err, "emulated device refused a datagram");
                return Ok(());
            }
        };
        let mut payload = datagram.data.to_vec();
        if let Some(hook) = self.corrupt.as_mut() {
            hook(&mut payload);
        }
        // Peer gone means the pair is shutting down.
        let _ = self.air_tx.send(payload);
        Ok(())
    }

    /// Payloads that arrived over the air become datagrams on the host
    /// port, with reception telemetry when enabled.
    fn deliver_air(&mut self) -> Result<()> {
        while let Ok(payload) = self.air_rx.try_recv() {
            let mut frame = encode_datagram(&payload)?;
            if self.attach_telemetry {
                let mut attrs = Attributes::new();
                attrs.insert_u16(AttrId::AvgStrength as u8, 0xF332);
                attrs.insert_u16(AttrId::MinStrength as u8, 0xC000);
                attrs.insert_u16(AttrId::DetectedErrors as u8, self.state.detected_errors);
                frame.extend_from_slice(&encode_metadata(&attrs)?);
            }
            self.writer.send(&frame)?;
        }
        Ok(())
    }

    fn handle_command(&mut self, frame: &[u8]) -> Result<()> {
        let command = match decode_command(frame) {
            Ok(command) => command,
            Err(err) => {
                warn!(%err, "emulated device refused a command");
                return Ok(());
            }
        };
        let state = &mut self.state;
        let reply = match Cmd::from_raw(command.id) {
            Some(Cmd::GetVersionInfo) => getter_reply(command.id, EMULATOR_VERSION.as_bytes())?,
            Some(Cmd::TransmitCw) | Some(Cmd::TransmitOff) => echo(command.id)?,
            Some(Cmd::AutoCalibrate) => {
                state.rx_gain = 0x0055;
                // Converges in three passes unless bounded below that.
                let ran = if command.args.is_empty() {
                    3u16
                } else {
                    arg_u16(&command.args).min(3)
                };
                getter_reply(command.id, &ran.to_le_bytes())?
            }
            Some(Cmd::GetThreshold) => getter_reply(command.id, &state.threshold.to_le_bytes())?,
            Some(Cmd::SetThreshold) => {
                state.threshold = arg_u16(&command.args);
                echo(command.id)?
            }
            Some(Cmd::GetChannelMode) => {
                getter_reply(command.id, &state.channel_mode.to_le_bytes())?
            }
            Some(Cmd::SetChannelMode) => {
                state.channel_mode = arg_u16(&command.args);
                echo(command.id)?
            }
            Some(Cmd::GetRxGain) => getter_reply(command.id, &state.rx_gain.to_le_bytes())?,
            Some(Cmd::SetRxGain) => {
                state.rx_gain = arg_u16(&command.args);
                echo(command.id)?
            }
            Some(Cmd::GetRxVariance) => getter_reply(command.id, &state.rx_variance.to_le_bytes())?,
            Some(Cmd::GetControlBits) => {
                getter_reply(command.id, &state.control_bits.to_le_bytes())?
            }
            Some(Cmd::SetControlBits) => {
                state.control_bits = arg_u16(&command.args);
                echo(command.id)?
            }
            Some(Cmd::EnableRxCodingMode) => {
                state.coding_mode = arg_u32(&command.args);
                echo(command.id)?
            }
            Some(Cmd::QueryChannelMode) => {
                let mut attrs = Attributes::new();
                attrs.insert_u16(AttrId::AvgStrength as u8, 0xF332);
                attrs.insert_u16(AttrId::MinStrength as u8, 0xC000);
                attrs.insert_u16(AttrId::DetectedErrors as u8, state.detected_errors);
                attrs.insert_u32(AttrId::CodingMode as u8, state.coding_mode);
                let mut frame = vec![0x00];
                frame.extend_from_slice(&encode_metadata(&attrs)?);
                frame
            }
            None => ACK.to_vec(),
        };
        self.writer.send(&reply)?;
        Ok(())
    }
}

fn echo(id: u8) -> Result<Vec<u8>> {
    Ok(encode_command(id, &[])?)
}

/// A getter reply: zero-length datagram with the value keyed by the
/// command id.
fn getter_reply(id: u8, value: &[u8]) -> Result<Vec<u8>> {
    let mut attrs = Attributes::new();
    attrs.insert(id, value.to_vec());
    let mut frame = vec![0x00];
    frame.extend_from_slice(&encode_metadata(&attrs)?);
    Ok(frame)
}

fn arg_u16(args: &[u8]) -> u16 {
    match args {
        [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
        [lo] => u16::from(*lo),
        [] => 0,
    }
}

fn arg_u32(args: &[u8]) -> u32 {
    let mut bytes = [0u8; 4];
    for (slot, byte) in bytes.iter_mut().zip(args) {
        *slot = *byte;
    }
    u32::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_decoding_tolerates_short_args() {
        assert_eq!(arg_u16(&[]), 0);
        assert_eq!(arg_u16(&[7]), 7);
        assert_eq!(arg_u16(&[0x34, 0x12]), 0x1234);
        assert_eq!(arg_u32(&[0x1D, 0xFC, 0xCF, 0x1A]), 0x1ACF_FC1D);
        assert_eq!(arg_u32(&[0x1D]), 0x1D);
    }

    #[test]
    fn getter_reply_is_a_zero_length_datagram() {
        let frame = getter_reply(36, &[0x00, 0x02]).unwrap();
        let datagram = decode_datagram(&frame).unwrap();
        assert!(datagram.data.is_empty());
        let attrs = porp_frame::decode_metadata(&datagram.metadata);
        assert_eq!(attrs.uint(36), Some(0x0200));
    }
}
