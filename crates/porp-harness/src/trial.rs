//! Bit-error trials over a pair of channels.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use porp_frame::{decode_datagram, ACK};
use porp_link::{query_channel_quality, set_channel_mode, Channel, Result};

use crate::count_bit_errors;
use crate::pattern::PayloadPattern;

/// One trial run: a pattern pushed through a channel mode.
#[derive(Debug, Clone)]
pub struct TrialConfig {
    pub pattern: PayloadPattern,
    /// Maximum number of payloads to send.
    pub limit: usize,
    /// Channel mode to select on both devices before the run, when set.
    pub channel_mode: Option<u16>,
    /// How long to wait for the datagram acknowledgement.
    pub send_timeout: Duration,
    /// How long to wait for the forwarded datagram at the far end.
    pub recv_timeout: Duration,
    pub seed: u64,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            pattern: PayloadPattern::Words,
            limit: 100,
            channel_mode: None,
            send_timeout: Duration::from_secs(2),
            recv_timeout: Duration::from_secs(5),
            seed: 0,
        }
    }
}

/// Tally of one or more trial runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrialReport {
    /// Payloads delivered byte-identical.
    pub successes: u64,
    /// Payloads refused, damaged in flight, or undecodable on arrival.
    pub failures: u64,
    /// Payloads with no acknowledgement or no delivery in time.
    pub timeouts: u64,
    /// Flipped bits across all damaged payloads (common-prefix only).
    pub bit_errors: u64,
    /// Damaged payloads whose length also changed.
    pub length_mismatches: u64,
}

impl TrialReport {
    pub fn merge(&mut self, other: &TrialReport) {
        self.successes += other.successes;
        self.failures += other.failures;
        self.timeouts += other.timeouts;
        self.bit_errors += other.bit_errors;
        self.length_mismatches += other.length_mismatches;
    }

    pub fn attempts(&self) -> u64 {
        self.successes + self.failures + self.timeouts
    }

    pub fn is_clean(&self) -> bool {
        self.failures == 0 && self.timeouts == 0
    }
}

/// Run one trial: send every payload of the pattern through `src` and
/// compare what `dst` delivers.
pub fn run_trial(src: &Channel, dst: &Channel, config: &TrialConfig) -> Result<TrialReport> {
    if let Some(mode) = config.channel_mode {
        set_channel_mode(src, mode)?;
        set_channel_mode(dst, mode)?;
        // The mode switch retrains the receiver; confirm the device is
        // answering again before spending payloads on it.
        let quality = query_channel_quality(dst)?;
        debug!(mode, ?quality, "channel mode selected");
    }

    let payloads = config.pattern.payloads(config.limit, config.seed);
    info!(
        pattern = config.pattern.name(),
        count = payloads.len(),
        "trial starting"
    );

    let mut report = TrialReport::default();
    for (index, payload) in payloads.iter().enumerate() {
        match src.send_datagram(payload, config.send_timeout)? {
            None => {
                warn!(index, "no acknowledgement");
                report.timeouts += 1;
                continue;
            }
            Some(reply) if reply.as_ref() != ACK.as_slice() => {
                warn!(index, reply = ?reply.as_ref(), "unexpected acknowledgement");
                report.failures += 1;
                continue;
            }
            Some(_) => {}
        }

        let Some(frame) = dst.recv_incoming(config.recv_timeout)? else {
            warn!(index, "acknowledged but never delivered");
            report.timeouts += 1;
            continue;
        };
        let datagram = match decode_datagram(&frame) {
            Ok(datagram) => datagram,
            Err(err) => {
                warn!(index, %err, "undecodable delivery");
                report.failures += 1;
                continue;
            }
        };

        if datagram.data.as_ref() == payload.as_slice() {
            report.successes += 1;
        } else {
            let bits = count_bit_errors(payload, &datagram.data);
            warn!(
                index,
                sent = payload.len(),
                got = datagram.data.len(),
                bits,
                "payload damaged in flight"
            );
            report.failures += 1;
            report.bit_errors += u64::from(bits);
            if datagram.data.len() != payload.len() {
                report.length_mismatches += 1;
            }
        }
    }

    info!(?report, "trial finished");
    Ok(report)
}
