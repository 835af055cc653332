//! # Round-Robin Packet Queue
//!
//! Holds every packet the pacer has not sent yet and decides which one goes
//! next. Ordering, strongest rule first:
//!
//! 1. **Tier**: `Audio < Retransmission < Video < Redundancy < Padding`.
//! 2. **Deficit round-robin**: within a tier, the stream that has sent the
//!    fewest bytes goes first. A stream's byte counter is never allowed to
//!    lag more than [`MAX_LEADING_BYTES`] behind the busiest stream, so a
//!    slow or returning stream gets at most about one packet of head start.
//! 3. **FIFO**: inside a stream, retransmissions first, then `enqueue_order`.
//!
//! Each stream keeps its own heap; the global schedule index holds one entry
//! per stream whose heap is non-empty, keyed by `(tier, bytes sent)`.
//!
//! ```text
//!   schedule: (0, 1400) → ssrc 11     streams: 11 → [A A]
//!             (2,  900) → ssrc 22                  22 → [V V R]
//!             (2, 2300) → ssrc 33                  33 → [V]
//! ```
//!
//! Popping is a two-phase transaction: [`RoundRobinPacketQueue::begin_pop`]
//! hands out a [`PendingPop`] guard which is either finalized (packet gone,
//! counters updated) or cancelled (heap restored exactly). Dropping the
//! guard cancels.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::time::Duration;

use quanta::Instant;
use slab::Slab;

use crate::packet::{PacketKind, RtpPacket};

/// Max bytes a stream may trail the busiest stream by.
pub const MAX_LEADING_BYTES: usize = 1400;

// ─── Queued Packet ──────────────────────────────────────────────────────────

/// Bookkeeping for one queued packet.
///
/// For owned packets the payload sits in the queue's slab and is handed back
/// on finalize; referenced packets only carry identifiers.
#[derive(Debug, Clone)]
pub struct QueuedPacket {
    pub kind: PacketKind,
    pub ssrc: u32,
    pub sequence_number: u16,
    pub capture_time: Instant,
    pub enqueue_time: Instant,
    pub size: usize,
    pub retransmission: bool,
    pub enqueue_order: u64,
    /// Slab key of the owned payload.
    owned: Option<usize>,
    /// Start of the span counted towards queue time.
    accounted_since: Instant,
    /// Total pause time at enqueue; subtracted again on pop.
    paused_before_enqueue: Duration,
}

impl QueuedPacket {
    pub fn priority(&self) -> u8 {
        self.kind.priority()
    }

    pub fn is_owned(&self) -> bool {
        self.owned.is_some()
    }
}

// Heap order: greater pops first.
impl Ord for QueuedPacket {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority()
            .cmp(&self.priority())
            .then(self.retransmission.cmp(&other.retransmission))
            .then(other.enqueue_order.cmp(&self.enqueue_order))
    }
}

impl PartialOrd for QueuedPacket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedPacket {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedPacket {}

/// A finalized pop: the bookkeeping plus the payload if the queue owned it.
#[derive(Debug)]
pub struct PoppedPacket {
    pub info: QueuedPacket,
    pub packet: Option<RtpPacket>,
}

// ─── Streams ────────────────────────────────────────────────────────────────

/// Position in the schedule index. `seq` keeps equal `(tier, bytes)` keys in
/// insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ScheduleKey {
    priority: u8,
    bytes: usize,
    seq: u64,
}

#[derive(Debug)]
struct Stream {
    /// Bytes sent, clamped to trail the busiest stream by at most
    /// `MAX_LEADING_BYTES`.
    bytes: usize,
    packets: BinaryHeap<QueuedPacket>,
    /// `Some` iff `packets` is non-empty.
    scheduled: Option<ScheduleKey>,
}

impl Stream {
    fn new() -> Self {
        Stream {
            bytes: 0,
            packets: BinaryHeap::new(),
            scheduled: None,
        }
    }
}

fn schedule(
    index: &mut BTreeMap<ScheduleKey, u32>,
    next_seq: &mut u64,
    priority: u8,
    bytes: usize,
    ssrc: u32,
) -> ScheduleKey {
    let key = ScheduleKey {
        priority,
        bytes,
        seq: *next_seq,
    };
    *next_seq += 1;
    index.insert(key, ssrc);
    key
}

// ─── Queue ──────────────────────────────────────────────────────────────────

/// Multi-stream priority queue with bounded cross-stream unfairness.
#[derive(Debug)]
pub struct RoundRobinPacketQueue {
    streams: HashMap<u32, Stream>,
    schedule: BTreeMap<ScheduleKey, u32>,
    next_schedule_seq: u64,
    /// Payloads of owned packets.
    packets: Slab<RtpPacket>,
    /// Multiset of enqueue times.
    enqueue_times: BTreeMap<Instant, usize>,
    size_packets: usize,
    size_bytes: usize,
    max_bytes: usize,
    time_last_updated: Instant,
    queue_time_sum: Duration,
    pause_time_sum: Duration,
    paused: bool,
}

impl RoundRobinPacketQueue {
    pub fn new(start_time: Instant) -> Self {
        RoundRobinPacketQueue {
            streams: HashMap::new(),
            schedule: BTreeMap::new(),
            next_schedule_seq: 0,
            packets: Slab::new(),
            enqueue_times: BTreeMap::new(),
            size_packets: 0,
            size_bytes: 0,
            max_bytes: MAX_LEADING_BYTES,
            time_last_updated: start_time,
            queue_time_sum: Duration::ZERO,
            pause_time_sum: Duration::ZERO,
            paused: false,
        }
    }

    /// Queue a packet whose payload lives in the caller's packet history.
    #[allow(clippy::too_many_arguments)]
    pub fn push(
        &mut self,
        kind: PacketKind,
        ssrc: u32,
        sequence_number: u16,
        capture_time: Instant,
        enqueue_time: Instant,
        size: usize,
        retransmission: bool,
        enqueue_order: u64,
    ) {
        self.push_info(QueuedPacket {
            kind,
            ssrc,
            sequence_number,
            capture_time,
            enqueue_time,
            size,
            retransmission,
            enqueue_order,
            owned: None,
            accounted_since: enqueue_time,
            paused_before_enqueue: Duration::ZERO,
        });
    }

    /// Queue a packet and take ownership of its payload.
    pub fn push_owned(
        &mut self,
        kind: PacketKind,
        enqueue_time: Instant,
        enqueue_order: u64,
        packet: RtpPacket,
    ) {
        let info = QueuedPacket {
            kind,
            ssrc: packet.ssrc,
            sequence_number: packet.sequence_number,
            capture_time: packet.capture_time,
            enqueue_time,
            size: packet.size(),
            retransmission: kind == PacketKind::Retransmission,
            enqueue_order,
            owned: None,
            accounted_since: enqueue_time,
            paused_before_enqueue: Duration::ZERO,
        };
        let key = self.packets.insert(packet);
        self.push_info(QueuedPacket {
            owned: Some(key),
            ..info
        });
    }

    fn push_info(&mut self, mut info: QueuedPacket) {
        self.update_queue_time(info.enqueue_time);
        info.accounted_since = info.enqueue_time.max(self.time_last_updated);
        info.paused_before_enqueue = self.pause_time_sum;
        *self.enqueue_times.entry(info.enqueue_time).or_insert(0) += 1;

        let priority = info.priority();
        let floor = self.max_bytes.saturating_sub(MAX_LEADING_BYTES);
        let stream = self.streams.entry(info.ssrc).or_insert_with(Stream::new);
        match stream.scheduled {
            None => {
                // A stream returning from idle starts at most one packet ahead.
                stream.bytes = stream.bytes.max(floor);
                stream.scheduled = Some(schedule(
                    &mut self.schedule,
                    &mut self.next_schedule_seq,
                    priority,
                    stream.bytes,
                    info.ssrc,
                ));
            }
            Some(key) if priority < key.priority => {
                self.schedule.remove(&key);
                stream.scheduled = Some(schedule(
                    &mut self.schedule,
                    &mut self.next_schedule_seq,
                    priority,
                    stream.bytes,
                    info.ssrc,
                ));
            }
            Some(_) => {}
        }

        self.size_packets += 1;
        self.size_bytes += info.size;
        stream.packets.push(info);
    }

    /// Take the next packet out of its stream heap without committing.
    ///
    /// Returns `None` when the queue is empty.
    pub fn begin_pop(&mut self) -> Option<PendingPop<'_>> {
        let (&key, &ssrc) = self.schedule.first_key_value()?;
        let Some(stream) = self.streams.get_mut(&ssrc) else {
            panic!("scheduled ssrc {ssrc} has no stream");
        };
        assert_eq!(stream.scheduled, Some(key), "schedule index out of sync");
        let Some(packet) = stream.packets.pop() else {
            panic!("scheduled ssrc {ssrc} has an empty heap");
        };
        Some(PendingPop {
            queue: self,
            ssrc,
            packet: Some(packet),
        })
    }

    /// Pop the next packet only if `accept` approves it.
    pub fn try_pop<F>(&mut self, accept: F) -> Option<PoppedPacket>
    where
        F: FnOnce(&QueuedPacket) -> bool,
    {
        let pending = self.begin_pop()?;
        if accept(pending.packet()) {
            Some(pending.finalize())
        } else {
            pending.cancel();
            None
        }
    }

    fn cancel_pop(&mut self, ssrc: u32, packet: QueuedPacket) {
        let Some(stream) = self.streams.get_mut(&ssrc) else {
            panic!("cancelled pop for unknown ssrc {ssrc}");
        };
        stream.packets.push(packet);
    }

    fn finalize_pop(&mut self, ssrc: u32, info: QueuedPacket) -> PoppedPacket {
        // Non-paused time this packet contributed to the queue-time integral.
        let paused_while_queued = self
            .pause_time_sum
            .saturating_sub(info.paused_before_enqueue);
        let queued = self
            .time_last_updated
            .saturating_duration_since(info.accounted_since)
            .saturating_sub(paused_while_queued);
        self.queue_time_sum = self.queue_time_sum.saturating_sub(queued);

        match self.enqueue_times.get_mut(&info.enqueue_time) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.enqueue_times.remove(&info.enqueue_time);
            }
            None => panic!("enqueue time missing for ssrc {ssrc}"),
        }

        let packet = info.owned.and_then(|key| self.packets.try_remove(key));

        self.size_bytes -= info.size;
        self.size_packets -= 1;
        if self.size_packets == 0 {
            debug_assert_eq!(self.queue_time_sum, Duration::ZERO);
            self.queue_time_sum = Duration::ZERO;
        }

        let Some(stream) = self.streams.get_mut(&ssrc) else {
            panic!("finalized pop for unknown ssrc {ssrc}");
        };
        let Some(key) = stream.scheduled.take() else {
            panic!("finalized pop for unscheduled ssrc {ssrc}");
        };
        self.schedule.remove(&key);

        let floor = self.max_bytes.saturating_sub(MAX_LEADING_BYTES);
        stream.bytes = (stream.bytes + info.size).max(floor);
        self.max_bytes = self.max_bytes.max(stream.bytes);

        if let Some(top) = stream.packets.peek() {
            stream.scheduled = Some(schedule(
                &mut self.schedule,
                &mut self.next_schedule_seq,
                top.priority(),
                stream.bytes,
                ssrc,
            ));
        }

        PoppedPacket { info, packet }
    }

    pub fn is_empty(&self) -> bool {
        assert_eq!(
            self.schedule.is_empty(),
            self.size_packets == 0,
            "schedule index and packet count disagree"
        );
        self.schedule.is_empty()
    }

    pub fn size_in_packets(&self) -> usize {
        self.size_packets
    }

    pub fn size_in_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Number of streams currently in the schedule index.
    pub fn scheduled_streams(&self) -> usize {
        self.schedule.len()
    }

    /// Clamped bytes-sent counter of a stream, if it was ever seen.
    pub fn stream_bytes(&self, ssrc: u32) -> Option<usize> {
        self.streams.get(&ssrc).map(|s| s.bytes)
    }

    pub fn oldest_enqueue_time(&self) -> Option<Instant> {
        if self.is_empty() {
            return None;
        }
        self.enqueue_times.keys().next().copied()
    }

    /// Integrate queue time up to `now`. Time paused is tracked separately
    /// and never counted.
    pub fn update_queue_time(&mut self, now: Instant) {
        if now <= self.time_last_updated {
            return;
        }
        let delta = now.saturating_duration_since(self.time_last_updated);
        if self.paused {
            self.pause_time_sum += delta;
        } else {
            self.queue_time_sum += delta * self.size_packets as u32;
        }
        self.time_last_updated = now;
    }

    pub fn set_pause_state(&mut self, paused: bool, now: Instant) {
        if self.paused == paused {
            return;
        }
        self.update_queue_time(now);
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Mean non-paused time the currently queued packets have waited.
    pub fn average_queue_time(&self) -> Duration {
        if self.is_empty() {
            return Duration::ZERO;
        }
        self.queue_time_sum / self.size_packets as u32
    }
}

// ─── Pending Pop ────────────────────────────────────────────────────────────

/// A packet taken off its stream heap but not yet committed.
///
/// The queue stays mutably borrowed until the pop is finalized or cancelled,
/// so nothing else can be pushed or popped in between.
pub struct PendingPop<'a> {
    queue: &'a mut RoundRobinPacketQueue,
    ssrc: u32,
    packet: Option<QueuedPacket>,
}

impl PendingPop<'_> {
    pub fn packet(&self) -> &QueuedPacket {
        match &self.packet {
            Some(packet) => packet,
            None => unreachable!("pending pop already resolved"),
        }
    }

    /// Put the packet back; the queue is left exactly as before.
    pub fn cancel(mut self) {
        if let Some(packet) = self.packet.take() {
            self.queue.cancel_pop(self.ssrc, packet);
        }
    }

    /// Commit the pop, returning the payload if the queue owned it.
    pub fn finalize(mut self) -> PoppedPacket {
        match self.packet.take() {
            Some(packet) => self.queue.finalize_pop(self.ssrc, packet),
            None => unreachable!("pending pop already resolved"),
        }
    }
}

impl Drop for PendingPop<'_> {
    fn drop(&mut self) {
        if let Some(packet) = self.packet.take() {
            self.queue.cancel_pop(self.ssrc, packet);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use quanta::{Clock, Mock};
    use std::sync::Arc;

    struct Fixture {
        clock: Clock,
        mock: Arc<Mock>,
        queue: RoundRobinPacketQueue,
        order: u64,
    }

    impl Fixture {
        fn new() -> Self {
            let (clock, mock) = Clock::mock();
            let queue = RoundRobinPacketQueue::new(clock.now());
            Fixture {
                clock,
                mock,
                queue,
                order: 0,
            }
        }

        fn push(&mut self, kind: PacketKind, ssrc: u32, seq: u16, size: usize) {
            let now = self.clock.now();
            self.order += 1;
            self.queue.push(
                kind,
                ssrc,
                seq,
                now,
                now,
                size,
                kind == PacketKind::Retransmission,
                self.order,
            );
        }

        fn pop(&mut self) -> QueuedPacket {
            self.queue.begin_pop().expect("queue not empty").finalize().info
        }

        fn advance(&self, ms: u64) {
            self.mock.increment(Duration::from_millis(ms));
        }
    }

    // ─── Ordering ───────────────────────────────────────────────────────

    #[test]
    fn audio_before_video_regardless_of_push_order() {
        let mut f = Fixture::new();
        f.push(PacketKind::Video, 1, 1, 100);
        f.push(PacketKind::Audio, 1, 2, 100);
        assert_eq!(f.pop().kind, PacketKind::Audio);
        assert_eq!(f.pop().kind, PacketKind::Video);
        assert!(f.queue.is_empty());
    }

    #[test]
    fn tiers_across_streams() {
        let mut f = Fixture::new();
        f.push(PacketKind::Audio, 1, 1, 100);
        f.push(PacketKind::Video, 2, 1, 100);
        f.push(PacketKind::Retransmission, 2, 2, 100);

        let order: Vec<(PacketKind, u32)> = (0..3)
            .map(|_| {
                let p = f.pop();
                (p.kind, p.ssrc)
            })
            .collect();
        assert_eq!(
            order,
            vec![
                (PacketKind::Audio, 1),
                (PacketKind::Retransmission, 2),
                (PacketKind::Video, 2),
            ]
        );
    }

    #[test]
    fn fifo_within_stream() {
        let mut f = Fixture::new();
        for seq in 0..10 {
            f.push(PacketKind::Video, 5, seq, 500);
        }
        for seq in 0..10 {
            assert_eq!(f.pop().sequence_number, seq);
        }
    }

    #[test]
    fn retransmission_flag_breaks_ties_in_tier() {
        let mut f = Fixture::new();
        let now = f.clock.now();
        f.queue.push(PacketKind::Video, 1, 1, now, now, 100, false, 1);
        f.queue.push(PacketKind::Video, 1, 2, now, now, 100, true, 2);
        assert_eq!(f.pop().sequence_number, 2);
        assert_eq!(f.pop().sequence_number, 1);
    }

    #[test]
    fn higher_tier_packet_reschedules_stream() {
        let mut f = Fixture::new();
        f.push(PacketKind::Video, 1, 1, 100);
        f.push(PacketKind::Redundancy, 2, 1, 100);
        f.push(PacketKind::Padding, 1, 2, 100);
        // Stream 2 upgraded from redundancy to audio.
        f.push(PacketKind::Audio, 2, 2, 100);
        assert_eq!(f.pop().ssrc, 2);
        assert_eq!(f.pop().kind, PacketKind::Video);
        assert_eq!(f.pop().kind, PacketKind::Redundancy);
        assert_eq!(f.pop().kind, PacketKind::Padding);
    }

    // ─── Fairness ───────────────────────────────────────────────────────

    #[test]
    fn equal_streams_alternate() {
        let mut f = Fixture::new();
        for seq in 0..20 {
            f.push(PacketKind::Video, 1, seq, 1000);
        }
        for seq in 0..20 {
            f.push(PacketKind::Video, 2, seq, 1000);
        }
        let mut last = 0;
        for _ in 0..40 {
            let ssrc = f.pop().ssrc;
            assert_ne!(ssrc, last, "same stream popped twice in a row");
            last = ssrc;
            let a = f.queue.stream_bytes(1).unwrap();
            let b = f.queue.stream_bytes(2).unwrap();
            assert!(a.abs_diff(b) <= MAX_LEADING_BYTES);
        }
    }

    #[test]
    fn returning_stream_leads_by_at_most_one_packet() {
        let mut f = Fixture::new();
        for seq in 0..20 {
            f.push(PacketKind::Video, 1, seq, 1000);
        }
        for _ in 0..20 {
            f.pop();
        }
        assert_eq!(f.queue.stream_bytes(1), Some(20_000));

        for seq in 0..5 {
            f.push(PacketKind::Video, 1, 100 + seq, 1000);
        }
        for seq in 0..5 {
            f.push(PacketKind::Video, 2, seq, 1000);
        }
        let order: Vec<u32> = (0..3).map(|_| f.pop().ssrc).collect();
        assert_eq!(order, vec![2, 2, 1]);
    }

    // ─── Two-phase pop ──────────────────────────────────────────────────

    #[test]
    fn cancel_restores_state() {
        let mut f = Fixture::new();
        f.push(PacketKind::Video, 1, 1, 300);
        f.push(PacketKind::Audio, 2, 1, 200);
        f.push(PacketKind::Video, 1, 2, 400);

        let pending = f.queue.begin_pop().unwrap();
        assert_eq!(pending.packet().kind, PacketKind::Audio);
        pending.cancel();

        assert_eq!(f.queue.size_in_packets(), 3);
        assert_eq!(f.queue.size_in_bytes(), 900);
        let order: Vec<(u32, u16)> = (0..3)
            .map(|_| {
                let p = f.pop();
                (p.ssrc, p.sequence_number)
            })
            .collect();
        assert_eq!(order, vec![(2, 1), (1, 1), (1, 2)]);
    }

    #[test]
    fn dropping_pending_pop_cancels() {
        let mut f = Fixture::new();
        f.push(PacketKind::Video, 1, 7, 300);
        {
            let _pending = f.queue.begin_pop().unwrap();
        }
        assert_eq!(f.queue.size_in_packets(), 1);
        assert_eq!(f.pop().sequence_number, 7);
    }

    #[test]
    fn try_pop_respects_predicate() {
        let mut f = Fixture::new();
        f.push(PacketKind::Video, 1, 1, 1200);
        assert!(f.queue.try_pop(|p| p.size < 1000).is_none());
        assert_eq!(f.queue.size_in_packets(), 1);

        let popped = f.queue.try_pop(|p| p.size <= 1200).unwrap();
        assert_eq!(popped.info.sequence_number, 1);
        assert!(f.queue.is_empty());
        assert!(f.queue.try_pop(|_| true).is_none());
    }

    #[test]
    fn owned_payload_returned_on_finalize() {
        let mut f = Fixture::new();
        let now = f.clock.now();
        let packet = RtpPacket::new(
            PacketKind::Video,
            9,
            42,
            now,
            Bytes::from_static(&[1u8; 640]),
        );
        f.queue.push_owned(PacketKind::Video, now, 1, packet);
        assert_eq!(f.queue.size_in_bytes(), 640);

        let popped = f.queue.begin_pop().unwrap().finalize();
        assert!(popped.info.is_owned());
        let packet = popped.packet.expect("owned payload");
        assert_eq!(packet.sequence_number, 42);
        assert_eq!(packet.payload.len(), 640);
        assert!(f.queue.packets.is_empty());
    }

    #[test]
    fn sizes_and_index_track_pushes() {
        let mut f = Fixture::new();
        assert!(f.queue.is_empty());
        assert_eq!(f.queue.scheduled_streams(), 0);
        f.push(PacketKind::Video, 1, 1, 100);
        f.push(PacketKind::Video, 2, 1, 250);
        f.push(PacketKind::Video, 2, 2, 50);
        assert_eq!(f.queue.size_in_packets(), 3);
        assert_eq!(f.queue.size_in_bytes(), 400);
        assert_eq!(f.queue.scheduled_streams(), 2);

        f.pop();
        f.pop();
        f.pop();
        assert_eq!(f.queue.size_in_bytes(), 0);
        assert_eq!(f.queue.scheduled_streams(), 0);
        assert!(f.queue.is_empty());
    }

    // ─── Queue time ─────────────────────────────────────────────────────

    #[test]
    fn oldest_enqueue_time_tracks_front() {
        let mut f = Fixture::new();
        assert_eq!(f.queue.oldest_enqueue_time(), None);
        let t0 = f.clock.now();
        f.push(PacketKind::Video, 1, 1, 100);
        f.advance(10);
        f.push(PacketKind::Audio, 1, 2, 100);
        assert_eq!(f.queue.oldest_enqueue_time(), Some(t0));

        // Audio (newer) leaves first; the oldest stays.
        f.pop();
        assert_eq!(f.queue.oldest_enqueue_time(), Some(t0));
        f.pop();
        assert_eq!(f.queue.oldest_enqueue_time(), None);
    }

    #[test]
    fn average_queue_time() {
        let mut f = Fixture::new();
        f.push(PacketKind::Video, 1, 1, 100);
        f.advance(10);
        f.push(PacketKind::Video, 1, 2, 100);
        f.advance(10);
        f.queue.update_queue_time(f.clock.now());
        // 20 ms + 10 ms over two packets.
        assert_eq!(f.queue.average_queue_time(), Duration::from_millis(15));

        f.pop();
        assert_eq!(f.queue.average_queue_time(), Duration::from_millis(10));
        f.pop();
        assert_eq!(f.queue.average_queue_time(), Duration::ZERO);
    }

    #[test]
    fn paused_time_not_counted() {
        let mut f = Fixture::new();
        f.push(PacketKind::Video, 1, 1, 100);
        f.advance(10);
        f.push(PacketKind::Video, 1, 2, 100);
        f.advance(10);
        f.queue.update_queue_time(f.clock.now());
        let before = f.queue.average_queue_time();

        f.queue.set_pause_state(true, f.clock.now());
        assert!(f.queue.is_paused());
        f.advance(100);
        f.queue.update_queue_time(f.clock.now());
        assert_eq!(f.queue.average_queue_time(), before);

        f.queue.set_pause_state(false, f.clock.now());
        // First packet waited 20 ms unpaused; the other one 10 ms.
        f.pop();
        assert_eq!(f.queue.average_queue_time(), Duration::from_millis(10));
    }

    #[test]
    fn push_while_paused_excludes_pause() {
        let mut f = Fixture::new();
        f.queue.set_pause_state(true, f.clock.now());
        f.advance(50);
        f.push(PacketKind::Video, 1, 1, 100);
        f.advance(50);
        f.queue.set_pause_state(false, f.clock.now());
        f.advance(5);
        f.queue.update_queue_time(f.clock.now());
        assert_eq!(f.queue.average_queue_time(), Duration::from_millis(5));
        f.pop();
        assert_eq!(f.queue.average_queue_time(), Duration::ZERO);
    }
}
