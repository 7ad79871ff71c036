//! Process-wide protocol counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Track typewire metrics without external dependencies.
pub(crate) struct Metrics;

static FRAMES_SENT: AtomicU64 = AtomicU64::new(0);
static FRAMES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static BYTES_SENT: AtomicU64 = AtomicU64::new(0);
static BYTES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static ENVELOPES_ROUTED: AtomicU64 = AtomicU64::new(0);
static CALLBACKS_DISPATCHED: AtomicU64 = AtomicU64::new(0);
static ERROR_COUNT: AtomicU64 = AtomicU64::new(0);
static ACTIVE_CONNECTIONS: AtomicU64 = AtomicU64::new(0);
static SEND_LATENCY_SAMPLES: AtomicU64 = AtomicU64::new(0);
static SEND_LATENCY_TOTAL_NS: AtomicU64 = AtomicU64::new(0);
static SEND_LATENCY_MAX_NS: AtomicU64 = AtomicU64::new(0);

const NANOSECONDS_PER_MICROSECOND: u128 = 1_000;

struct DiscardCounters {
    undecodable: AtomicU64,
    not_envelope: AtomicU64,
    unclaimed: AtomicU64,
}

static DISCARDS: DiscardCounters = DiscardCounters::new();

impl DiscardCounters {
    const fn new() -> Self {
        Self {
            undecodable: AtomicU64::new(0),
            not_envelope: AtomicU64::new(0),
            unclaimed: AtomicU64::new(0),
        }
    }

    fn increment(&self, reason: DiscardReason) {
        match reason {
            DiscardReason::Undecodable => self.undecodable.fetch_add(1, Ordering::Relaxed),
            DiscardReason::NotEnvelope => self.not_envelope.fetch_add(1, Ordering::Relaxed),
            DiscardReason::Unclaimed => self.unclaimed.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// Why an inbound frame was dropped without reaching a callback.
#[derive(Clone, Copy, Debug)]
pub(crate) enum DiscardReason {
    /// Unknown type code or a body that did not parse.
    Undecodable,
    /// A plain value; the dispatcher only routes envelopes.
    NotEnvelope,
    /// No callback registered for the (correlation id, type code) pair.
    Unclaimed,
}

/// Direction of frame flow for counting.
#[derive(Clone, Copy)]
pub(crate) enum FrameDirection {
    Sent,
    Received,
}

impl Metrics {
    #[inline]
    pub(crate) fn record_frame(direction: FrameDirection, len: usize) {
        let len = len as u64;
        match direction {
            FrameDirection::Sent => {
                FRAMES_SENT.fetch_add(1, Ordering::Relaxed);
                BYTES_SENT.fetch_add(len, Ordering::Relaxed);
            }
            FrameDirection::Received => {
                FRAMES_RECEIVED.fetch_add(1, Ordering::Relaxed);
                BYTES_RECEIVED.fetch_add(len, Ordering::Relaxed);
            }
        }
    }

    #[inline]
    pub(crate) fn record_discard(reason: DiscardReason) {
        DISCARDS.increment(reason);
    }

    #[inline]
    pub(crate) fn record_routed(callbacks: usize) {
        ENVELOPES_ROUTED.fetch_add(1, Ordering::Relaxed);
        CALLBACKS_DISPATCHED.fetch_add(callbacks as u64, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_error() {
        ERROR_COUNT.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_connection_open() {
        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_connection_close() {
        ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_send_latency(duration: Duration) {
        let nanos = duration.as_nanos().try_into().unwrap_or(u64::MAX);

        SEND_LATENCY_SAMPLES.fetch_add(1, Ordering::Relaxed);
        SEND_LATENCY_TOTAL_NS.fetch_add(nanos, Ordering::Relaxed);
        update_max(&SEND_LATENCY_MAX_NS, nanos);
    }
}

fn update_max(target: &AtomicU64, candidate: u64) {
    let mut current = target.load(Ordering::Relaxed);
    while candidate > current {
        match target.compare_exchange_weak(
            current,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return,
            Err(old) => current = old,
        }
    }
}

/// Read the current counters.
#[must_use]
pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        frames_sent: FRAMES_SENT.load(Ordering::Relaxed),
        frames_received: FRAMES_RECEIVED.load(Ordering::Relaxed),
        bytes_sent: BYTES_SENT.load(Ordering::Relaxed),
        bytes_received: BYTES_RECEIVED.load(Ordering::Relaxed),
        discarded_undecodable: DISCARDS.undecodable.load(Ordering::Relaxed),
        discarded_not_envelope: DISCARDS.not_envelope.load(Ordering::Relaxed),
        discarded_unclaimed: DISCARDS.unclaimed.load(Ordering::Relaxed),
        envelopes_routed: ENVELOPES_ROUTED.load(Ordering::Relaxed),
        callbacks_dispatched: CALLBACKS_DISPATCHED.load(Ordering::Relaxed),
        total_errors: ERROR_COUNT.load(Ordering::Relaxed),
        active_connections: ACTIVE_CONNECTIONS.load(Ordering::Relaxed),
        send_latency_samples: SEND_LATENCY_SAMPLES.load(Ordering::Relaxed),
        send_latency_total_ns: SEND_LATENCY_TOTAL_NS.load(Ordering::Relaxed),
        send_latency_max_ns: SEND_LATENCY_MAX_NS.load(Ordering::Relaxed),
    }
}

/// Lightweight snapshot of critical counters.
#[allow(missing_docs)]
#[derive(Default, Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub discarded_undecodable: u64,
    pub discarded_not_envelope: u64,
    pub discarded_unclaimed: u64,
    pub envelopes_routed: u64,
    pub callbacks_dispatched: u64,
    pub total_errors: u64,
    pub active_connections: u64,
    pub send_latency_samples: u64,
    pub send_latency_total_ns: u64,
    pub send_latency_max_ns: u64,
}

impl MetricsSnapshot {
    /// Average time spent writing one timed frame, in microseconds.
    ///
    /// Only client sends are timed; [`StreamWriter`](crate::StreamWriter)
    /// frames count towards `frames_sent` but not towards the average.
    #[must_use]
    pub fn avg_send_latency_us(&self) -> Option<u64> {
        if self.send_latency_samples == 0 {
            return None;
        }

        let total_ns = u128::from(self.send_latency_total_ns);
        let samples = u128::from(self.send_latency_samples);
        Some((total_ns / (samples * NANOSECONDS_PER_MICROSECOND)) as u64)
    }

    /// Frames dropped for any reason.
    #[must_use]
    pub const fn total_discarded(&self) -> u64 {
        self.discarded_undecodable + self.discarded_not_envelope + self.discarded_unclaimed
    }
}
