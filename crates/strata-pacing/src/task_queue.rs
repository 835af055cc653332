//! # Task-Queue Pacer
//!
//! Thread-safe driver around [`Pacer`]. The pacer lives on a
//! [`SerialExecutor`] worker; every public call is marshalled onto it, so
//! producers on any thread can insert packets while the pacer itself stays
//! single-threaded.
//!
//! After each tick the worker asks the pacer how long it may sleep and posts
//! one delayed re-invocation. When work shows up earlier (first packet in an
//! empty queue, congestion relief, new rates, resume, new probe cluster) the
//! pacer is processed right away and the delayed task that is still pending
//! turns into a no-op when it fires.
//!
//! While a probe cluster is in flight the prober owns the cadence: only
//! probe-timer ticks process packets.
//!
//! Readers on other threads get a [`PacerStats`] snapshot refreshed at the
//! end of every tick and after every enqueue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use quanta::{Clock, Instant};
use tracing::{debug, trace};

use crate::config::PacerConfig;
use crate::error::ExecutorError;
use crate::executor::{SerialExecutor, TaskScope};
use crate::pacer::Pacer;
use crate::packet::{PacketKind, PacketRouter, RtpPacket};
use crate::stats::PacerStats;

type Scope = TaskScope<PacerTask>;

/// Worker-side state.
struct PacerTask {
    pacer: Pacer,
    clock: Clock,
    started: bool,
    probe_started: bool,
    next_scheduled_process: Option<Instant>,
    /// Identifies the one delayed tick that is still live.
    schedule_token: u64,
    stats: Arc<Mutex<PacerStats>>,
    shutdown: Arc<AtomicBool>,
}

impl PacerTask {
    fn maybe_process_packets(&mut self, scope: &mut Scope, is_probe: bool) {
        if self.shutdown.load(Ordering::Acquire) || !self.started {
            return;
        }
        // While probing, only the probe timer may tick.
        if self.probe_started && !is_probe {
            return;
        }

        self.pacer.process_packets();

        let time_until_probe = self.pacer.time_until_next_probe();
        let time_to_next_process =
            time_until_probe.unwrap_or_else(|| self.pacer.time_until_available_budget());
        self.probe_started = time_until_probe.is_some();

        let now = self.clock.now();
        if self.next_scheduled_process.is_some_and(|t| t <= now) {
            self.next_scheduled_process = None;
        }

        let next_process = now + time_to_next_process;
        let reschedule = self.probe_started
            || self
                .next_scheduled_process
                .map_or(true, |scheduled| scheduled > next_process);
        if reschedule {
            self.next_scheduled_process = Some(next_process);
            self.schedule_token += 1;
            let token = self.schedule_token;
            trace!(
                delay_us = time_to_next_process.as_micros() as u64,
                probe = self.probe_started,
                "next pacer tick scheduled"
            );
            scope.post_delayed(time_to_next_process, move |task, scope| {
                task.on_scheduled_process(scope, token);
            });
        }

        self.publish_stats();
    }

    fn on_scheduled_process(&mut self, scope: &mut Scope, token: u64) {
        if token != self.schedule_token {
            // Superseded by an earlier tick.
            return;
        }
        let is_probe = self.probe_started;
        self.maybe_process_packets(scope, is_probe);
    }

    fn after_enqueue(&mut self, scope: &mut Scope) {
        if self.pacer.queue_size_packets() == 1 {
            self.maybe_process_packets(scope, false);
        }
        self.publish_stats();
    }

    fn publish_stats(&self) {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner()) = self.pacer.stats();
    }
}

/// [`Pacer`] driven by its own serial executor thread.
pub struct TaskQueuePacer {
    executor: SerialExecutor<PacerTask>,
    stats: Arc<Mutex<PacerStats>>,
    shutdown: Arc<AtomicBool>,
}

impl TaskQueuePacer {
    /// Spawns the pacer thread. Nothing is sent until
    /// [`TaskQueuePacer::ensure_started`] is called.
    pub fn new(
        config: PacerConfig,
        router: Box<dyn PacketRouter>,
        clock: Clock,
    ) -> Result<Self, ExecutorError> {
        let pacer = Pacer::new(config, router, clock.clone());
        let stats = Arc::new(Mutex::new(pacer.stats()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let task = PacerTask {
            pacer,
            clock: clock.clone(),
            started: false,
            probe_started: false,
            next_scheduled_process: None,
            schedule_token: 0,
            stats: Arc::clone(&stats),
            shutdown: Arc::clone(&shutdown),
        };
        let executor = SerialExecutor::spawn("strata-pacer", clock, task)?;
        Ok(TaskQueuePacer {
            executor,
            stats,
            shutdown,
        })
    }

    fn run_on_owner<F>(&self, f: F) -> Result<(), ExecutorError>
    where
        F: FnOnce(&mut PacerTask, &mut Scope) + Send + 'static,
    {
        self.executor.post(f)
    }

    /// Start ticking. Idempotent.
    pub fn ensure_started(&self) -> Result<(), ExecutorError> {
        self.run_on_owner(|task, scope| {
            if task.started {
                return;
            }
            debug!("pacer started");
            task.started = true;
            task.maybe_process_packets(scope, false);
        })
    }

    // ─── Configuration ──────────────────────────────────────────────────

    pub fn set_pacing_rates(
        &self,
        pacing_rate_bps: u32,
        padding_rate_bps: u32,
    ) -> Result<(), ExecutorError> {
        self.run_on_owner(move |task, scope| {
            task.pacer.set_pacing_rates(pacing_rate_bps, padding_rate_bps);
            task.maybe_process_packets(scope, false);
        })
    }

    pub fn set_congestion_window(
        &self,
        window_bytes: Option<usize>,
    ) -> Result<(), ExecutorError> {
        self.run_on_owner(move |task, scope| {
            let was_congested = task.pacer.is_congested();
            task.pacer.set_congestion_window(window_bytes);
            if was_congested && !task.pacer.is_congested() {
                task.maybe_process_packets(scope, false);
            }
        })
    }

    pub fn update_outstanding_data(
        &self,
        outstanding_bytes: usize,
    ) -> Result<(), ExecutorError> {
        self.run_on_owner(move |task, scope| {
            let was_congested = task.pacer.is_congested();
            task.pacer.update_outstanding_data(outstanding_bytes);
            if was_congested && !task.pacer.is_congested() {
                task.maybe_process_packets(scope, false);
            }
        })
    }

    pub fn set_probing_enabled(&self, enabled: bool) -> Result<(), ExecutorError> {
        self.run_on_owner(move |task, _| task.pacer.set_probing_enabled(enabled))
    }

    pub fn create_probe_cluster(
        &self,
        bitrate_bps: u32,
        cluster_id: i32,
    ) -> Result<(), ExecutorError> {
        self.run_on_owner(move |task, scope| {
            task.pacer.create_probe_cluster(bitrate_bps, cluster_id);
            task.maybe_process_packets(scope, false);
        })
    }

    pub fn pause(&self) -> Result<(), ExecutorError> {
        self.run_on_owner(|task, _| {
            task.pacer.pause();
            task.publish_stats();
        })
    }

    pub fn resume(&self) -> Result<(), ExecutorError> {
        self.run_on_owner(|task, scope| {
            task.pacer.resume();
            task.maybe_process_packets(scope, false);
        })
    }

    pub fn set_queue_time_limit(&self, limit: Duration) -> Result<(), ExecutorError> {
        self.run_on_owner(move |task, _| task.pacer.set_queue_time_limit(limit))
    }

    pub fn set_account_for_audio(&self, account_for_audio: bool) -> Result<(), ExecutorError> {
        self.run_on_owner(move |task, _| task.pacer.set_account_for_audio(account_for_audio))
    }

    // ─── Packets ────────────────────────────────────────────────────────

    pub fn insert_packet(
        &self,
        kind: PacketKind,
        ssrc: u32,
        sequence_number: u16,
        capture_time: Instant,
        size: usize,
        retransmission: bool,
    ) -> Result<(), ExecutorError> {
        self.run_on_owner(move |task, scope| {
            task.pacer.insert_packet(
                kind,
                ssrc,
                sequence_number,
                capture_time,
                size,
                retransmission,
            );
            task.after_enqueue(scope);
        })
    }

    pub fn enqueue_packet(&self, packet: RtpPacket) -> Result<(), ExecutorError> {
        self.run_on_owner(move |task, scope| {
            task.pacer.enqueue_packet(packet);
            task.after_enqueue(scope);
        })
    }

    /// Block until every call made so far has been applied.
    pub fn flush(&self) -> Result<(), ExecutorError> {
        self.executor.invoke(|_| ())
    }

    // ─── Snapshot reads ─────────────────────────────────────────────────

    pub fn stats(&self) -> PacerStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn expected_queue_time(&self) -> Duration {
        Duration::from_millis(self.stats().expected_queue_time_ms)
    }

    pub fn queue_size_packets(&self) -> usize {
        self.stats().queue_size_packets
    }

    pub fn queue_size_bytes(&self) -> usize {
        self.stats().queue_size_bytes
    }

    pub fn queue_in(&self) -> Duration {
        Duration::from_millis(self.stats().queue_in_ms)
    }

    pub fn first_sent_packet_time(&self) -> Option<Instant> {
        self.stats().first_sent_packet_time
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop ticking and join the pacer thread. Idempotent.
    pub fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            debug!("pacer shutting down");
        }
        self.executor.shutdown();
    }
}

impl Drop for TaskQueuePacer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
