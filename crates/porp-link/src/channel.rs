use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use porp_frame::{
    dispatch, encode_datagram, FrameError, FrameReader, FrameSink, FrameWriter, DEFAULT_MAX_FRAME,
};
use porp_transport::{LinkStream, TransportError};

use crate::error::{LinkError, Result};

/// Channel behavior configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// How often the background reader wakes to check for shutdown when
    /// the link is idle. Bounds how long `close` can take.
    pub read_poll: Duration,
    /// Largest frame accepted in either direction.
    pub max_frame_size: usize,
    /// Queue bound for each of the two frame queues.
    ///
    /// `None` keeps the original unbounded-FIFO behavior: a consumer
    /// that stops draining lets memory grow without limit. `Some(n)`
    /// drops (and counts) frames once `n` are queued — there is no way
    /// to backpressure a serial peer, so dropping is the honest
    /// hardening option.
    pub queue_depth: Option<usize>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            read_poll: Duration::from_millis(100),
            max_frame_size: DEFAULT_MAX_FRAME,
            queue_depth: None,
        }
    }
}

/// Counters for one channel's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub responses: u64,
    pub datagrams: u64,
    /// Malformed, oversized, or queue-overflow frames dropped.
    pub discarded: u64,
}

#[derive(Default)]
struct StatsInner {
    sent: AtomicU64,
    received: AtomicU64,
    responses: AtomicU64,
    datagrams: AtomicU64,
    discarded: AtomicU64,
}

/// A PORP channel over one full-duplex link.
///
/// Owns the transport, a named background reader thread, and the two
/// frame queues. The reader is the only producer; the queues are drained
/// only through [`Channel::send_packet`] / [`Channel::recv_incoming`] /
/// [`Channel::recv_response`]. Safe for one concurrent sender plus one
/// concurrent receiver; this protocol has no per-command correlation id,
/// so multiple simultaneous senders on one channel are out of scope.
pub struct Channel {
    writer: Mutex<FrameWriter<LinkStream>>,
    responses: Mutex<Receiver<Bytes>>,
    incoming: Mutex<Receiver<Bytes>>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<StatsInner>,
    reader: Option<JoinHandle<()>>,
}

impl Channel {
    /// Open a channel: clone the stream, start the background reader,
    /// keep the writer half.
    pub fn open(stream: LinkStream, config: LinkConfig) -> Result<Self> {
        let reader_stream = stream.try_clone()?;
        reader_stream.set_read_timeout(Some(config.read_poll))?;

        let (resp_tx, resp_rx) = make_queue(config.queue_depth);
        let (in_tx, in_rx) = make_queue(config.queue_depth);
        let shutdown = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(StatsInner::default());

        let sink = QueueSink {
            responses: resp_tx,
            incoming: in_tx,
            stats: Arc::clone(&stats),
        };
        let frame_reader = FrameReader::with_max_frame(reader_stream, config.max_frame_size);

        let reader = std::thread::Builder::new()
            .name("porp-reader".into())
            .spawn({
                let shutdown = Arc::clone(&shutdown);
                let stats = Arc::clone(&stats);
                move || reader_loop(frame_reader, sink, shutdown, stats)
            })
            .map_err(|err| LinkError::Transport(TransportError::Io(err)))?;

        Ok(Self {
            writer: Mutex::new(FrameWriter::with_max_frame(stream, config.max_frame_size)),
            responses: Mutex::new(resp_rx),
            incoming: Mutex::new(in_rx),
            shutdown,
            stats,
            reader: Some(reader),
        })
    }

    /// Write one decoded frame to the link (COBS + delimiter applied),
    /// without waiting for any reply.
    pub fn write_frame(&self, frame: &[u8]) -> Result<()> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(LinkError::ChannelClosed);
        }
        lock(&self.writer).send(frame)?;
        self.stats.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Send a frame and wait up to `timeout` for the next frame on the
    /// response queue.
    ///
    /// `Ok(None)` means no acknowledgement arrived in time — the frame
    /// may still have been delivered. Replies correlate to sends in
    /// strict FIFO order, so keep at most one command in flight.
    pub fn send_packet(&self, frame: &[u8], timeout: Duration) -> Result<Option<Bytes>> {
        self.write_frame(frame)?;
        self.pop(&self.responses, timeout)
    }

    /// Encode `payload` as a datagram and [`Channel::send_packet`] it.
    pub fn send_datagram(&self, payload: &[u8], timeout: Duration) -> Result<Option<Bytes>> {
        let frame = encode_datagram(payload)?;
        self.send_packet(&frame, timeout)
    }

    /// Wait up to `timeout` for the next asynchronous datagram frame.
    pub fn recv_incoming(&self, timeout: Duration) -> Result<Option<Bytes>> {
        self.pop(&self.incoming, timeout)
    }

    /// Wait up to `timeout` for the next response frame without sending
    /// anything first.
    pub fn recv_response(&self, timeout: Duration) -> Result<Option<Bytes>> {
        self.pop(&self.responses, timeout)
    }

    /// Snapshot of the channel counters.
    pub fn stats(&self) -> LinkStats {
        LinkStats {
            frames_sent: self.stats.sent.load(Ordering::Relaxed),
            frames_received: self.stats.received.load(Ordering::Relaxed),
            responses: self.stats.responses.load(Ordering::Relaxed),
            datagrams: self.stats.datagrams.load(Ordering::Relaxed),
            discarded: self.stats.discarded.load(Ordering::Relaxed),
        }
    }

    /// Stop the reader and shut the link down. Idempotent; also run on
    /// drop. Pending and future pops fail with
    /// [`LinkError::ChannelClosed`] rather than hanging.
    pub fn close(&mut self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wake a blocked reader where the transport supports it
        // (sockets read EOF); serial readers notice the flag on their
        // next poll tick.
        {
            let writer = lock(&self.writer);
            if let Err(err) = writer.get_ref().shutdown() {
                debug!(%err, "link shutdown during close");
            }
        }
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
        debug!("channel closed");
    }

    fn pop(&self, queue: &Mutex<Receiver<Bytes>>, timeout: Duration) -> Result<Option<Bytes>> {
        let receiver = lock(queue);
        match receiver.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => {
                if self.shutdown.load(Ordering::SeqCst) {
                    Err(LinkError::ChannelClosed)
                } else {
                    Ok(None)
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(LinkError::ChannelClosed),
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("closed", &self.shutdown.load(Ordering::SeqCst))
            .field("stats", &self.stats())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum QueueTx {
    Unbounded(Sender<Bytes>),
    Bounded(SyncSender<Bytes>),
}

impl QueueTx {
    /// Returns `false` when the consuming side is gone.
    fn push(&self, frame: Bytes, stats: &StatsInner) -> bool {
        match self {
            Self::Unbounded(tx) => tx.send(frame).is_ok(),
            Self::Bounded(tx) => match tx.try_send(frame) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    stats.discarded.fetch_add(1, Ordering::Relaxed);
                    warn!("frame queue full; dropping frame");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            },
        }
    }
}

fn make_queue(depth: Option<usize>) -> (QueueTx, Receiver<Bytes>) {
    match depth {
        None => {
            let (tx, rx) = mpsc::channel();
            (QueueTx::Unbounded(tx), rx)
        }
        Some(depth) => {
            let (tx, rx) = mpsc::sync_channel(depth);
            (QueueTx::Bounded(tx), rx)
        }
    }
}

struct QueueSink {
    responses: QueueTx,
    incoming: QueueTx,
    stats: Arc<StatsInner>,
}

impl FrameSink for QueueSink {
    fn on_response(&self, frame: Bytes) -> bool {
        self.stats.responses.fetch_add(1, Ordering::Relaxed);
        self.responses.push(frame, &self.stats)
    }

    fn on_datagram(&self, frame: Bytes) -> bool {
        self.stats.datagrams.fetch_add(1, Ordering::Relaxed);
        self.incoming.push(frame, &self.stats)
    }
}

fn reader_loop(
    mut reader: FrameReader<LinkStream>,
    sink: QueueSink,
    shutdown: Arc<AtomicBool>,
    stats: Arc<StatsInner>,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match reader.read_frame() {
            Ok(frame) => {
                stats.received.fetch_add(1, Ordering::Relaxed);
                if !dispatch(&sink, frame) {
                    debug!("queue consumers gone; reader stopping");
                    break;
                }
            }
            Err(FrameError::Io(err))
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                continue; // idle poll tick
            }
            Err(FrameError::ConnectionClosed) => {
                debug!("link at EOF; reader stopping");
                break;
            }
            Err(FrameError::Io(err)) => {
                warn!(%err, "reader I/O error; stopping");
                break;
            }
            Err(err) => {
                // Malformed or oversized frame: drop it, keep reading.
                stats.discarded.fetch_add(1, Ordering::Relaxed);
                debug!(%err, "frame dropped");
            }
        }
    }
}
