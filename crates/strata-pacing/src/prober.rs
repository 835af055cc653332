//! # Bitrate Prober
//!
//! Shapes deliberate bursts ("probe clusters") so the bandwidth estimator
//! can measure capacity above the current send rate. A cluster asks for at
//! least `min_probes` packets and `min_bytes` bytes sent at the cluster's
//! bitrate; the prober tells the pacer when the next probe is due and which
//! cluster it belongs to.
//!
//! ```text
//!   Disabled ──enable──▶ Inactive ──packet ≥ min size──▶ Active
//!                           ▲                               │
//!                           └──── new cluster ── Suspended ◀┘ (clusters done
//!                                                              or probe late)
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use quanta::Instant;
use tracing::{debug, info, warn};

use crate::config::ProberConfig;
use crate::packet::ProbeClusterInfo;

/// Packets smaller than this never kick off a probe.
const MIN_PROBE_PACKET_SIZE: usize = 200;

/// Spacing used to size a single probe burst.
const MIN_PROBE_DELTA_MS: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbingState {
    /// Probing is turned off; clusters are ignored.
    Disabled,
    /// Clusters may be pending, waiting for a large enough packet.
    Inactive,
    /// A cluster is being sent.
    Active,
    /// All clusters sent (or the last probe ran late).
    Suspended,
}

#[derive(Debug, Clone)]
struct ProbeCluster {
    info: ProbeClusterInfo,
    sent_probes: u32,
    sent_bytes: usize,
    created_at: Instant,
    started_at: Option<Instant>,
}

/// Probe cluster scheduler.
#[derive(Debug)]
pub struct BitrateProber {
    state: ProbingState,
    clusters: VecDeque<ProbeCluster>,
    /// When the next probe in the current cluster is due. `None` means "now".
    next_probe_time: Option<Instant>,
    config: ProberConfig,
    total_probe_count: u64,
    total_failed_probe_count: u64,
    completed_clusters: u64,
}

impl BitrateProber {
    pub fn new(config: ProberConfig) -> Self {
        BitrateProber {
            state: ProbingState::Inactive,
            clusters: VecDeque::new(),
            next_probe_time: None,
            config,
            total_probe_count: 0,
            total_failed_probe_count: 0,
            completed_clusters: 0,
        }
    }

    pub fn set_enabled(&mut self, enable: bool) {
        if enable {
            if self.state == ProbingState::Disabled {
                self.state = ProbingState::Inactive;
                info!("bandwidth probing enabled");
            }
        } else {
            self.state = ProbingState::Disabled;
            info!("bandwidth probing disabled");
        }
    }

    pub fn state(&self) -> ProbingState {
        self.state
    }

    pub fn is_probing(&self) -> bool {
        self.state == ProbingState::Active
    }

    /// Called for every packet entering the pacer. A large enough packet
    /// starts a pending cluster.
    pub fn on_incoming_packet(&mut self, packet_size: usize) {
        if self.state == ProbingState::Inactive
            && !self.clusters.is_empty()
            && packet_size >= self.recommended_min_probe_size().min(MIN_PROBE_PACKET_SIZE)
        {
            self.next_probe_time = None;
            self.state = ProbingState::Active;
        }
    }

    pub fn create_probe_cluster(&mut self, bitrate_bps: u32, now: Instant, cluster_id: i32) {
        if self.state == ProbingState::Disabled {
            debug!(cluster_id, "probing disabled, ignoring probe cluster");
            return;
        }
        if bitrate_bps == 0 {
            warn!(cluster_id, "ignoring probe cluster with zero bitrate");
            return;
        }

        self.total_probe_count += 1;
        let timeout = Duration::from_millis(self.config.cluster_timeout_ms);
        while let Some(front) = self.clusters.front() {
            if now.saturating_duration_since(front.created_at) <= timeout {
                break;
            }
            debug!(cluster_id = front.info.id, "probe cluster timed out");
            self.clusters.pop_front();
            self.total_failed_probe_count += 1;
        }

        let min_bytes =
            (u64::from(bitrate_bps) * self.config.min_probe_duration_ms / 8000) as usize;
        self.clusters.push_back(ProbeCluster {
            info: ProbeClusterInfo {
                id: cluster_id,
                send_bitrate_bps: bitrate_bps,
                min_probes: self.config.min_probe_packets,
                min_bytes,
            },
            sent_probes: 0,
            sent_bytes: 0,
            created_at: now,
            started_at: None,
        });

        info!(
            cluster_id,
            bitrate_bps,
            min_bytes,
            min_probes = self.config.min_probe_packets,
            "probe cluster created"
        );

        if self.state != ProbingState::Active {
            self.state = ProbingState::Inactive;
        }
    }

    /// Time until the next probe should go out, or `None` when not probing.
    pub fn time_until_next_probe(&mut self, now: Instant) -> Option<Duration> {
        if self.state != ProbingState::Active || self.clusters.is_empty() {
            return None;
        }

        let Some(next) = self.next_probe_time else {
            return Some(Duration::ZERO);
        };

        let max_delay = Duration::from_millis(self.config.max_probe_delay_ms);
        if now > next + max_delay {
            warn!(
                late_us = now.saturating_duration_since(next).as_micros() as u64,
                "probe cluster running late, suspending"
            );
            self.state = ProbingState::Suspended;
            self.next_probe_time = None;
            return None;
        }

        Some(next.saturating_duration_since(now))
    }

    /// Cluster the next probe belongs to.
    pub fn current_cluster(&self) -> Option<ProbeClusterInfo> {
        self.clusters.front().map(|c| c.info)
    }

    /// Bytes that should go out in one probe burst to keep the cluster's
    /// spacing at the probe delta.
    pub fn recommended_min_probe_size(&self) -> usize {
        self.clusters
            .front()
            .map(|c| {
                (u64::from(c.info.send_bitrate_bps) * 2 * MIN_PROBE_DELTA_MS / 8000) as usize
            })
            .unwrap_or(0)
    }

    /// Record that `bytes` were sent for the current cluster.
    pub fn probe_sent(&mut self, now: Instant, bytes: usize) {
        if bytes == 0 {
            return;
        }
        let Some(cluster) = self.clusters.front_mut() else {
            return;
        };

        let started_at = *cluster.started_at.get_or_insert(now);
        cluster.sent_bytes += bytes;
        cluster.sent_probes += 1;
        self.next_probe_time = Self::next_probe_time(cluster, started_at);

        if cluster.sent_bytes >= cluster.info.min_bytes
            && cluster.sent_probes >= cluster.info.min_probes
        {
            debug!(
                cluster_id = cluster.info.id,
                sent_bytes = cluster.sent_bytes,
                sent_probes = cluster.sent_probes,
                "probe cluster complete"
            );
            self.clusters.pop_front();
            self.completed_clusters += 1;
        }

        if self.clusters.is_empty() {
            self.state = ProbingState::Suspended;
        }
    }

    fn next_probe_time(cluster: &ProbeCluster, started_at: Instant) -> Option<Instant> {
        let bitrate = u64::from(cluster.info.send_bitrate_bps);
        if bitrate == 0 {
            return None;
        }
        // Send time of the bytes so far at the cluster bitrate.
        let delta_us = (cluster.sent_bytes as u64 * 8 * 1_000_000 + bitrate / 2) / bitrate;
        Some(started_at + Duration::from_micros(delta_us))
    }

    pub fn pending_clusters(&self) -> usize {
        self.clusters.len()
    }

    pub fn total_probe_count(&self) -> u64 {
        self.total_probe_count
    }

    pub fn total_failed_probe_count(&self) -> u64 {
        self.total_failed_probe_count
    }

    pub fn completed_clusters(&self) -> u64 {
        self.completed_clusters
    }
}
