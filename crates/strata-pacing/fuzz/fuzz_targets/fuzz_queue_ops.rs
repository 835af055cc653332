#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use quanta::Clock;
use std::time::Duration;
use strata_pacing::packet::{PacketKind, RtpPacket};
use strata_pacing::queue::RoundRobinPacketQueue;

const KINDS: [PacketKind; 5] = [
    PacketKind::Audio,
    PacketKind::Retransmission,
    PacketKind::Video,
    PacketKind::Redundancy,
    PacketKind::Padding,
];

/// Drive the round-robin queue with an arbitrary op stream.
///
/// Every 4-byte chunk is one op: push (referenced or owned), pop, cancelled
/// pop, pause toggle or clock advance. After each op the size counters must
/// agree with the schedule index, and they must never panic.
fuzz_target!(|data: &[u8]| {
    let (clock, mock) = Clock::mock();
    let mut queue = RoundRobinPacketQueue::new(clock.now());
    let mut order = 0u64;
    let mut bytes = 0usize;
    let mut paused = false;

    for chunk in data.chunks_exact(4) {
        let (op, a, b, c) = (chunk[0] % 6, chunk[1], chunk[2], chunk[3]);
        let kind = KINDS[usize::from(a) % KINDS.len()];
        let ssrc = u32::from(b % 8);
        let size = usize::from(c) * 8 + 1;
        match op {
            0 => {
                order += 1;
                let now = clock.now();
                queue.push(kind, ssrc, b.into(), now, now, size, a & 0x80 != 0, order);
                bytes += size;
            }
            1 => {
                order += 1;
                let now = clock.now();
                let payload = Bytes::from(vec![0u8; size]);
                let packet = RtpPacket::new(kind, ssrc, c.into(), now, payload);
                queue.push_owned(kind, now, order, packet);
                bytes += size;
            }
            2 => {
                if let Some(pending) = queue.begin_pop() {
                    let popped = pending.finalize();
                    bytes -= popped.info.size;
                    assert_eq!(popped.info.is_owned(), popped.packet.is_some());
                }
            }
            3 => {
                if let Some(pending) = queue.begin_pop() {
                    pending.cancel();
                }
            }
            4 => {
                paused = !paused;
                queue.set_pause_state(paused, clock.now());
            }
            _ => {
                mock.increment(Duration::from_millis(u64::from(c)));
                queue.update_queue_time(clock.now());
            }
        }

        assert_eq!(queue.size_in_bytes(), bytes);
        assert_eq!(queue.is_empty(), queue.size_in_packets() == 0);
        assert_eq!(queue.is_empty(), queue.scheduled_streams() == 0);
    }
});
