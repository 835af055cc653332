//! Hot-path benchmarks for the pacer.
//!
//! Covers the per-packet work done on every tick: queue push/pop across
//! several streams and tiers, and a full `process_packets` drain.
//!
//! Run with: cargo bench --package strata-pacing --bench queue_hotpath

use std::time::Duration;

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use quanta::{Clock, Instant};
use strata_pacing::packet::{PacedPacketInfo, PacketKind, PacketRouter, RtpPacket, SendResult};
use strata_pacing::queue::RoundRobinPacketQueue;
use strata_pacing::{Pacer, PacerConfig};

const KINDS: [PacketKind; 3] = [PacketKind::Audio, PacketKind::Video, PacketKind::Redundancy];

struct NullRouter;

impl PacketRouter for NullRouter {
    fn time_to_send_packet(
        &mut self,
        _ssrc: u32,
        _sequence_number: u16,
        _capture_time: Instant,
        _retransmission: bool,
        _pacing_info: &PacedPacketInfo,
    ) -> SendResult {
        SendResult::Success
    }

    fn send_packet(&mut self, packet: RtpPacket, _pacing_info: &PacedPacketInfo) {
        black_box(packet);
    }

    fn generate_padding(&mut self, _bytes: usize) -> Vec<RtpPacket> {
        Vec::new()
    }

    fn time_to_send_padding(&mut self, bytes: usize, _pacing_info: &PacedPacketInfo) -> usize {
        bytes
    }
}

// ─── Queue ──────────────────────────────────────────────────────────────────

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");
    let (clock, _mock) = Clock::mock();

    for &streams in &[1u32, 8, 64] {
        group.throughput(Throughput::Elements(1024));
        group.bench_function(format!("push_pop_1024_{streams}_streams"), |b| {
            let mut queue = RoundRobinPacketQueue::new(clock.now());
            b.iter(|| {
                let now = clock.now();
                for i in 0..1024u64 {
                    let ssrc = (i as u32) % streams;
                    let kind = KINDS[(i % 3) as usize];
                    queue.push(kind, ssrc, i as u16, now, now, 1200, false, i);
                }
                while let Some(pending) = queue.begin_pop() {
                    black_box(pending.finalize());
                }
            });
        });
    }

    group.bench_function("begin_cancel", |b| {
        let mut queue = RoundRobinPacketQueue::new(clock.now());
        let now = clock.now();
        for i in 0..256u64 {
            queue.push(PacketKind::Video, (i % 8) as u32, i as u16, now, now, 1200, false, i);
        }
        b.iter(|| {
            if let Some(pending) = queue.begin_pop() {
                black_box(pending.packet().size);
                pending.cancel();
            }
        });
    });

    group.finish();
}

// ─── Pacer ──────────────────────────────────────────────────────────────────

fn bench_pacer_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("pacer");
    group.throughput(Throughput::Elements(512));

    group.bench_function("drain_512_packets", |b| {
        let (clock, mock) = Clock::mock();
        let mut pacer = Pacer::new(PacerConfig::default(), Box::new(NullRouter), clock.clone());
        // High enough that one 5 ms tick covers the whole batch.
        pacer.set_pacing_rates(2_000_000_000, 0);
        let mut seq = 0u16;
        b.iter(|| {
            for i in 0..512u32 {
                seq = seq.wrapping_add(1);
                pacer.insert_packet(PacketKind::Video, i % 4, seq, clock.now(), 1200, false);
            }
            mock.increment(Duration::from_millis(5));
            pacer.process_packets();
            black_box(pacer.queue_size_packets());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_queue, bench_pacer_drain);
criterion_main!(benches);
