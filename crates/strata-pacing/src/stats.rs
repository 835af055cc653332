//! # Pacer Statistics
//!
//! Cumulative counters kept by the pacer plus the snapshot the task-queue
//! driver publishes after every tick. Snapshots serialize to JSON.

use std::time::Duration;

use quanta::Instant;
use serde::Serialize;

// ─── Counters ───────────────────────────────────────────────────────────────

/// Monotonic counters owned by the pacer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PacerCounters {
    /// Media packets handed to the router successfully.
    pub packets_sent: u64,
    /// Media bytes sent (excludes padding).
    pub bytes_sent: u64,
    /// Padding bytes sent, keep-alives included.
    pub padding_bytes_sent: u64,
    /// Packets dropped: permanent send failures, or inserted before any
    /// pacing rate was set.
    pub packets_dropped: u64,
    /// Transient send failures; the packet stayed queued.
    pub transient_failures: u64,
    /// Probe clusters that reached their byte and packet minimums.
    pub probe_clusters_completed: u64,
}

impl PacerCounters {
    /// Share of sent bytes that were padding.
    pub fn padding_ratio(&self) -> f64 {
        let total = self.bytes_sent + self.padding_bytes_sent;
        if total == 0 {
            0.0
        } else {
            self.padding_bytes_sent as f64 / total as f64
        }
    }
}

// ─── Snapshot ───────────────────────────────────────────────────────────────

/// Point-in-time view of the pacer, safe to read from any thread.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PacerStats {
    pub queue_size_packets: usize,
    pub queue_size_bytes: usize,
    /// Time to drain the queue at the current pacing rate.
    pub expected_queue_time_ms: u64,
    /// Age of the oldest queued packet.
    pub queue_in_ms: u64,
    pub average_queue_time_ms: u64,
    /// First send, in ms since the pacer was created.
    pub first_sent_packet_ms: Option<u64>,
    #[serde(skip)]
    pub first_sent_packet_time: Option<Instant>,
    pub pacing_rate_bps: u32,
    pub outstanding_bytes: usize,
    pub paused: bool,
    pub congested: bool,
    pub probing: bool,
    #[serde(flatten)]
    pub counters: PacerCounters,
}

/// Whole milliseconds, saturating.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
