//! # Pacer
//!
//! Synchronous scheduling core. Combines the round-robin queue, the media
//! and padding budgets, the bitrate prober and an externally supplied
//! congestion window into a single [`Pacer::process_packets`] step.
//!
//! The pacer never blocks and never spawns anything; it is driven by
//! whoever owns it (see [`crate::task_queue::TaskQueuePacer`]) and tells
//! that driver when it next needs to run.
//!
//! Per tick:
//!
//! ```text
//!   keep-alive?  ──▶ 1 byte of padding every 500 ms while paused/congested
//!   paused?      ──▶ stop
//!   refill       ──▶ media + padding budgets, at most 30 ms worth
//!   send loop    ──▶ pop while budget (or probe) and window allow
//!   padding      ──▶ queue drained: top up probe or padding budget
//!   probe        ──▶ report bytes to the prober
//! ```

use std::cell::Cell;
use std::time::Duration;

use quanta::{Clock, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::budget::IntervalBudget;
use crate::config::PacerConfig;
use crate::packet::{PacedPacketInfo, PacketKind, PacketRouter, RtpPacket, SendResult};
use crate::prober::BitrateProber;
use crate::queue::{QueuedPacket, RoundRobinPacketQueue};
use crate::stats::{duration_ms, PacerCounters, PacerStats};

/// Keep-alive spacing while paused or congested; also the idle wake-up.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(500);

/// Budget refill per tick is capped at this many ms.
const MAX_INTERVAL_MS: i64 = 30;

/// Elapsed time between ticks is clamped to this.
const MAX_ELAPSED_MS: i64 = 2000;

enum SendStep {
    Sent(usize),
    Dropped,
    Blocked,
}

/// Outbound packet pacer.
pub struct Pacer {
    clock: Clock,
    router: Box<dyn PacketRouter>,

    drain_large_queues: bool,
    send_padding_if_silent: bool,
    pace_audio: bool,
    reference_padding: bool,
    min_packet_limit: Duration,
    queue_time_limit: Duration,
    account_for_audio: bool,

    start_time: Instant,
    /// Latest clock reading; time never goes backwards for the pacer.
    last_timestamp: Cell<Instant>,
    paused: bool,
    media_budget: IntervalBudget,
    padding_budget: IntervalBudget,
    prober: BitrateProber,
    probing_send_failure: bool,

    pacing_rate_bps: u32,
    rates_set: bool,

    time_last_process: Instant,
    last_send_time: Instant,
    first_sent_packet_time: Option<Instant>,

    queue: RoundRobinPacketQueue,
    packet_counter: u64,

    congestion_window_bytes: Option<usize>,
    outstanding_bytes: usize,

    counters: PacerCounters,
}

impl Pacer {
    pub fn new(config: PacerConfig, router: Box<dyn PacketRouter>, clock: Clock) -> Self {
        let now = clock.now();
        let mut prober = BitrateProber::new(config.prober.clone());
        if !config.probing_enabled {
            prober.set_enabled(false);
        }
        Pacer {
            clock,
            router,
            drain_large_queues: config.drain_large_queues,
            send_padding_if_silent: config.send_padding_if_silent,
            pace_audio: config.pace_audio,
            reference_padding: config.reference_padding,
            min_packet_limit: config.min_packet_limit,
            queue_time_limit: config.queue_time_limit,
            account_for_audio: config.account_for_audio,
            start_time: now,
            last_timestamp: Cell::new(now),
            paused: false,
            media_budget: IntervalBudget::new(0),
            padding_budget: IntervalBudget::new(0),
            prober,
            probing_send_failure: false,
            pacing_rate_bps: 0,
            rates_set: false,
            time_last_process: now,
            last_send_time: now,
            first_sent_packet_time: None,
            queue: RoundRobinPacketQueue::new(now),
            packet_counter: 0,
            congestion_window_bytes: None,
            outstanding_bytes: 0,
            counters: PacerCounters::default(),
        }
    }

    fn now(&self) -> Instant {
        let now = self.clock.now().max(self.last_timestamp.get());
        self.last_timestamp.set(now);
        now
    }

    // ─── Setters ────────────────────────────────────────────────────────

    /// Must be called once before packets can be sent. The media rate takes
    /// effect on the next tick.
    pub fn set_pacing_rates(&mut self, pacing_rate_bps: u32, padding_rate_bps: u32) {
        self.pacing_rate_bps = pacing_rate_bps;
        self.padding_budget.set_target_rate_kbps(padding_rate_bps / 1000);
        self.rates_set = true;
        debug!(pacing_rate_bps, padding_rate_bps, "pacing rates updated");
    }

    pub fn set_congestion_window(&mut self, congestion_window_bytes: Option<usize>) {
        self.congestion_window_bytes = congestion_window_bytes;
    }

    pub fn update_outstanding_data(&mut self, outstanding_bytes: usize) {
        self.outstanding_bytes = outstanding_bytes;
    }

    /// Only meaningful before the first packet is queued.
    pub fn set_probing_enabled(&mut self, enabled: bool) {
        if self.packet_counter > 0 {
            warn!(enabled, "probing toggled after packets were queued");
        }
        self.prober.set_enabled(enabled);
    }

    pub fn create_probe_cluster(&mut self, bitrate_bps: u32, cluster_id: i32) {
        let now = self.now();
        self.prober.create_probe_cluster(bitrate_bps, now, cluster_id);
    }

    pub fn pause(&mut self) {
        if !self.paused {
            info!("pacer paused");
        }
        self.paused = true;
        let now = self.now();
        self.queue.set_pause_state(true, now);
    }

    pub fn resume(&mut self) {
        if self.paused {
            info!("pacer resumed");
        }
        self.paused = false;
        let now = self.now();
        self.queue.set_pause_state(false, now);
    }

    pub fn set_queue_time_limit(&mut self, limit: Duration) {
        self.queue_time_limit = limit;
    }

    pub fn set_account_for_audio(&mut self, account_for_audio: bool) {
        self.account_for_audio = account_for_audio;
    }

    // ─── Enqueue ────────────────────────────────────────────────────────

    fn accept_packet(&mut self, ssrc: u32, sequence_number: u16) -> bool {
        debug_assert!(
            self.rates_set,
            "set_pacing_rates must be called before packets are queued"
        );
        if !self.rates_set {
            error!(ssrc, sequence_number, "no pacing rate set, dropping packet");
            self.counters.packets_dropped += 1;
            return false;
        }
        true
    }

    /// Queue a packet the router holds; it is sent back by reference via
    /// [`PacketRouter::time_to_send_packet`].
    pub fn insert_packet(
        &mut self,
        kind: PacketKind,
        ssrc: u32,
        sequence_number: u16,
        capture_time: Instant,
        size: usize,
        retransmission: bool,
    ) {
        if !self.accept_packet(ssrc, sequence_number) {
            return;
        }
        let now = self.now();
        self.prober.on_incoming_packet(size);
        let order = self.packet_counter;
        self.packet_counter += 1;
        self.queue.push(
            kind,
            ssrc,
            sequence_number,
            capture_time,
            now,
            size,
            retransmission,
            order,
        );
    }

    /// Queue a packet the pacer takes ownership of; it is handed back via
    /// [`PacketRouter::send_packet`].
    pub fn enqueue_packet(&mut self, packet: RtpPacket) {
        if !self.accept_packet(packet.ssrc, packet.sequence_number) {
            return;
        }
        let now = self.now();
        self.prober.on_incoming_packet(packet.size());
        let order = self.packet_counter;
        self.packet_counter += 1;
        self.queue.push_owned(packet.kind, now, order, packet);
    }

    // ─── Processing ─────────────────────────────────────────────────────

    /// Send whatever the budgets, congestion window and prober allow right
    /// now. Can be called early without harm.
    pub fn process_packets(&mut self) {
        let now = self.now();
        let elapsed_ms = self.update_time_and_get_elapsed_ms(now);

        if self.should_send_keepalive(now) {
            let sent = self.send_padding(1, &PacedPacketInfo::default());
            trace!(sent, "keep-alive padding");
            self.on_padding_sent(now, sent);
        }

        if self.paused {
            return;
        }

        if elapsed_ms > 0 {
            let mut target_rate_kbps = self.pacing_rate_bps / 1000;
            let queue_size_bytes = self.queue.size_in_bytes();
            if queue_size_bytes > 0 {
                self.queue.update_queue_time(now);
                if self.drain_large_queues {
                    // Rate at which the average queued packet still leaves
                    // within the queue-time limit.
                    let avg_time_left_ms = duration_ms(self.queue_time_limit)
                        .saturating_sub(duration_ms(self.queue.average_queue_time()))
                        .max(1);
                    let min_rate_needed_kbps = (queue_size_bytes as u64 * 8 / avg_time_left_ms)
                        .min(u64::from(u32::MAX)) as u32;
                    if min_rate_needed_kbps > target_rate_kbps {
                        trace!(
                            min_rate_needed_kbps,
                            target_rate_kbps,
                            "raising media rate to drain queue"
                        );
                        target_rate_kbps = min_rate_needed_kbps;
                    }
                }
            }
            self.media_budget.set_target_rate_kbps(target_rate_kbps);
            self.update_budget_with_elapsed_time(elapsed_ms);
        }

        let is_probing = self.prober.is_probing();
        let (pacing_info, recommended_probe_size) = match self.prober.current_cluster() {
            Some(cluster) if is_probing => (
                PacedPacketInfo::probe(cluster),
                Some(self.prober.recommended_min_probe_size()),
            ),
            _ => (PacedPacketInfo::default(), None),
        };

        let mut bytes_sent = 0;
        while !self.paused {
            match self.send_next_packet(now, &pacing_info) {
                SendStep::Sent(bytes) => {
                    bytes_sent += bytes;
                    if recommended_probe_size.is_some_and(|size| bytes_sent > size) {
                        break;
                    }
                }
                SendStep::Dropped => {}
                SendStep::Blocked => break,
            }
        }

        if self.queue.is_empty() && !self.is_congested() && self.packet_counter > 0 {
            // Never pad before a media packet went out.
            let padding_needed = match recommended_probe_size {
                Some(size) => size.saturating_sub(bytes_sent),
                None => self.padding_budget.bytes_remaining(),
            };
            if padding_needed > 0 {
                let sent = self.send_padding(padding_needed, &pacing_info);
                bytes_sent += sent;
                self.on_padding_sent(now, sent);
            }
        }

        if is_probing {
            self.probing_send_failure = bytes_sent == 0;
            if !self.probing_send_failure {
                self.prober.probe_sent(now, bytes_sent);
                self.counters.probe_clusters_completed = self.prober.completed_clusters();
            }
        }
    }

    fn send_next_packet(&mut self, now: Instant, pacing_info: &PacedPacketInfo) -> SendStep {
        let budget_exhausted =
            self.media_budget.bytes_remaining() == 0 && !pacing_info.is_probe();
        let congested = self.is_congested();
        let window = self.congestion_window_bytes;
        let outstanding = self.outstanding_bytes;
        let pace_audio = self.pace_audio;

        let Some(pending) = self.queue.begin_pop() else {
            return SendStep::Blocked;
        };
        let packet = pending.packet();
        let apply_pacing = !packet.kind.is_audio() || pace_audio;
        let window_full = congested
            || window.is_some_and(|w| outstanding > 0 && outstanding + packet.size > w);
        if apply_pacing && (window_full || budget_exhausted) {
            pending.cancel();
            return SendStep::Blocked;
        }

        if packet.is_owned() {
            let popped = pending.finalize();
            let Some(rtp_packet) = popped.packet else {
                warn!(ssrc = popped.info.ssrc, "owned packet payload missing, dropping");
                self.counters.packets_dropped += 1;
                return SendStep::Dropped;
            };
            self.router.send_packet(rtp_packet, pacing_info);
            self.on_packet_sent(now, &popped.info);
            return SendStep::Sent(popped.info.size);
        }

        let result = self.router.time_to_send_packet(
            packet.ssrc,
            packet.sequence_number,
            packet.capture_time,
            packet.retransmission,
            pacing_info,
        );
        match result {
            SendResult::Success => {
                let popped = pending.finalize();
                self.on_packet_sent(now, &popped.info);
                SendStep::Sent(popped.info.size)
            }
            SendResult::TransientFailure => {
                trace!(
                    ssrc = packet.ssrc,
                    sequence = packet.sequence_number,
                    "transient send failure, retrying next tick"
                );
                pending.cancel();
                self.counters.transient_failures += 1;
                SendStep::Blocked
            }
            SendResult::PermanentFailure => {
                let popped = pending.finalize();
                warn!(
                    ssrc = popped.info.ssrc,
                    sequence = popped.info.sequence_number,
                    "permanent send failure, dropping packet"
                );
                self.counters.packets_dropped += 1;
                SendStep::Dropped
            }
        }
    }

    fn send_padding(&mut self, bytes: usize, pacing_info: &PacedPacketInfo) -> usize {
        if self.reference_padding {
            return self.router.time_to_send_padding(bytes, pacing_info);
        }
        let mut sent = 0;
        for packet in self.router.generate_padding(bytes) {
            sent += packet.size();
            self.router.send_packet(packet, pacing_info);
        }
        sent
    }

    fn on_packet_sent(&mut self, now: Instant, packet: &QueuedPacket) {
        if self.first_sent_packet_time.is_none() {
            self.first_sent_packet_time = Some(now);
        }
        self.outstanding_bytes += packet.size;
        if !packet.kind.is_audio() || self.account_for_audio {
            self.media_budget.use_budget(packet.size);
            self.padding_budget.use_budget(packet.size);
        }
        self.last_send_time = now;
        self.counters.packets_sent += 1;
        self.counters.bytes_sent += packet.size as u64;
    }

    fn on_padding_sent(&mut self, now: Instant, bytes: usize) {
        if bytes > 0 {
            self.outstanding_bytes += bytes;
            self.media_budget.use_budget(bytes);
            self.padding_budget.use_budget(bytes);
            self.counters.padding_bytes_sent += bytes as u64;
        }
        self.last_send_time = now;
    }

    fn update_time_and_get_elapsed_ms(&mut self, now: Instant) -> i64 {
        let elapsed = now.saturating_duration_since(self.time_last_process);
        self.time_last_process = now;
        let elapsed_ms = ((elapsed.as_micros() + 500) / 1000).min(i64::MAX as u128) as i64;
        if elapsed_ms > MAX_ELAPSED_MS {
            warn!(elapsed_ms, "pacer tick late, clamping elapsed time");
            return MAX_ELAPSED_MS;
        }
        elapsed_ms
    }

    fn update_budget_with_elapsed_time(&mut self, elapsed_ms: i64) {
        let delta_ms = elapsed_ms.min(MAX_INTERVAL_MS);
        self.media_budget.increase_budget(delta_ms);
        self.padding_budget.increase_budget(delta_ms);
    }

    fn should_send_keepalive(&self, now: Instant) -> bool {
        (self.send_padding_if_silent || self.paused || self.is_congested())
            && now.saturating_duration_since(self.last_send_time) >= KEEPALIVE_INTERVAL
            // Padding before the first media packet confuses timestamps.
            && self.packet_counter > 0
    }

    // ─── Scheduling ─────────────────────────────────────────────────────

    /// Delay until `process_packets` should run again, ignoring budget.
    pub fn time_until_next_process(&mut self) -> Duration {
        let since_process = self.now().saturating_duration_since(self.time_last_process);
        if self.paused {
            return KEEPALIVE_INTERVAL.saturating_sub(since_process);
        }
        if let Some(probe) = self.time_until_next_probe() {
            return probe;
        }
        self.min_packet_limit.saturating_sub(since_process)
    }

    /// Delay until the next probe is due, `None` when not probing. A probe
    /// that was due but could not be sent is not reported as due again.
    pub fn time_until_next_probe(&mut self) -> Option<Duration> {
        if !self.prober.is_probing() {
            return None;
        }
        let now = self.now();
        match self.prober.time_until_next_probe(now) {
            Some(delay) if !delay.is_zero() || !self.probing_send_failure => Some(delay),
            _ => None,
        }
    }

    /// Delay until there is something to send: media budget out of debt,
    /// padding due, or keep-alive due.
    pub fn time_until_available_budget(&self) -> Duration {
        let now = self.now();
        if self.paused {
            let since_process = now.saturating_duration_since(self.time_last_process);
            return KEEPALIVE_INTERVAL.saturating_sub(since_process);
        }
        let until_keepalive =
            KEEPALIVE_INTERVAL.saturating_sub(now.saturating_duration_since(self.last_send_time));
        if self.queue.is_empty() {
            if self.padding_budget.target_rate_kbps() > 0
                && self.packet_counter > 0
                && !self.is_congested()
            {
                return self.min_packet_limit;
            }
            return until_keepalive;
        }
        if self.is_congested() {
            return until_keepalive;
        }

        let rate_kbps = match self.media_budget.target_rate_kbps() {
            0 => self.pacing_rate_bps / 1000,
            kbps => kbps,
        };
        if rate_kbps == 0 {
            return KEEPALIVE_INTERVAL;
        }
        let debt_us = self.media_budget.debt() as u64 * 8 * 1000 / u64::from(rate_kbps);
        // A tick interval above the refill cap raises the cap with it.
        let max_wait = Duration::from_millis(MAX_INTERVAL_MS as u64).max(self.min_packet_limit);
        Duration::from_micros(debt_us).clamp(self.min_packet_limit, max_wait)
    }

    // ─── Read-only ──────────────────────────────────────────────────────

    /// Age of the oldest queued packet.
    pub fn queue_in(&self) -> Duration {
        match self.queue.oldest_enqueue_time() {
            Some(oldest) => self.now().saturating_duration_since(oldest),
            None => Duration::ZERO,
        }
    }

    pub fn queue_size_packets(&self) -> usize {
        self.queue.size_in_packets()
    }

    pub fn queue_size_bytes(&self) -> usize {
        self.queue.size_in_bytes()
    }

    /// Time to drain the queue at the pacing rate, ignoring priorities.
    /// Producers should back off once this exceeds the queue-time limit.
    pub fn expected_queue_time(&self) -> Duration {
        let bytes = self.queue.size_in_bytes() as u64;
        let rate_kbps = u64::from(self.pacing_rate_bps / 1000);
        if bytes == 0 {
            return Duration::ZERO;
        }
        if rate_kbps == 0 {
            return Duration::MAX;
        }
        Duration::from_millis(bytes * 8 / rate_kbps)
    }

    pub fn first_sent_packet_time(&self) -> Option<Instant> {
        self.first_sent_packet_time
    }

    pub fn average_queue_time(&self) -> Duration {
        self.queue.average_queue_time()
    }

    pub fn oldest_enqueue_time(&self) -> Option<Instant> {
        self.queue.oldest_enqueue_time()
    }

    pub fn is_probing(&self) -> bool {
        self.prober.is_probing()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Outstanding data has reached the congestion window.
    pub fn is_congested(&self) -> bool {
        self.congestion_window_bytes
            .is_some_and(|window| self.outstanding_bytes >= window)
    }

    pub fn pacing_rate_bps(&self) -> u32 {
        self.pacing_rate_bps
    }

    pub fn queue_time_limit(&self) -> Duration {
        self.queue_time_limit
    }

    pub fn counters(&self) -> PacerCounters {
        self.counters
    }

    pub fn stats(&self) -> PacerStats {
        PacerStats {
            queue_size_packets: self.queue_size_packets(),
            queue_size_bytes: self.queue_size_bytes(),
            expected_queue_time_ms: duration_ms(self.expected_queue_time()),
            queue_in_ms: duration_ms(self.queue_in()),
            average_queue_time_ms: duration_ms(self.average_queue_time()),
            first_sent_packet_ms: self
                .first_sent_packet_time
                .map(|t| duration_ms(t.saturating_duration_since(self.start_time))),
            first_sent_packet_time: self.first_sent_packet_time,
            pacing_rate_bps: self.pacing_rate_bps,
            outstanding_bytes: self.outstanding_bytes,
            paused: self.paused,
            congested: self.is_congested(),
            probing: self.is_probing(),
            counters: self.counters,
        }
    }
}
