//! # Packets and the Send Collaborator
//!
//! Types shared between the queue, the pacer and the network-injection layer
//! that actually puts bytes on the wire. The pacer never touches sockets; it
//! calls back into a [`PacketRouter`] when a packet is due.

use bytes::Bytes;
use quanta::Instant;
use serde::Serialize;

// ─── Packet Kind ────────────────────────────────────────────────────────────

/// Media class of a queued packet.
///
/// The declaration order is the scheduling tier order: lower tiers are sent
/// first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[repr(u8)]
pub enum PacketKind {
    /// Always ahead of everything else; latency is audible.
    Audio = 0,
    /// Re-sends of already numbered packets, ahead of fresh media.
    Retransmission = 1,
    /// Regular video media.
    Video = 2,
    /// FEC / redundancy. Useful but droppable.
    Redundancy = 3,
    /// Only exists to keep the bandwidth estimate up.
    Padding = 4,
}

impl PacketKind {
    /// Scheduling tier, `0` is the most urgent.
    pub fn priority(self) -> u8 {
        self as u8
    }

    pub fn is_audio(self) -> bool {
        self == PacketKind::Audio
    }
}

// ─── Owned Packet ───────────────────────────────────────────────────────────

/// An assembled RTP packet whose memory is handed to the pacer.
///
/// Framing is done upstream; the pacer only needs the identifiers, the
/// capture time and the on-wire size.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub kind: PacketKind,
    pub ssrc: u32,
    pub sequence_number: u16,
    pub capture_time: Instant,
    pub payload: Bytes,
    /// Trailing RTP padding bytes, counted against the budget.
    pub padding_size: usize,
}

impl RtpPacket {
    pub fn new(
        kind: PacketKind,
        ssrc: u32,
        sequence_number: u16,
        capture_time: Instant,
        payload: Bytes,
    ) -> Self {
        RtpPacket {
            kind,
            ssrc,
            sequence_number,
            capture_time,
            payload,
            padding_size: 0,
        }
    }

    /// A payload-less padding packet of `padding_size` bytes.
    pub fn padding(
        ssrc: u32,
        sequence_number: u16,
        capture_time: Instant,
        padding_size: usize,
    ) -> Self {
        RtpPacket {
            kind: PacketKind::Padding,
            ssrc,
            sequence_number,
            capture_time,
            payload: Bytes::new(),
            padding_size,
        }
    }

    /// Bytes charged to the pacing budget for this packet.
    pub fn size(&self) -> usize {
        self.payload.len() + self.padding_size
    }

    pub fn is_retransmission(&self) -> bool {
        self.kind == PacketKind::Retransmission
    }
}

// ─── Pacing Info ────────────────────────────────────────────────────────────

/// Probe cluster a packet is sent on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeClusterInfo {
    pub id: i32,
    pub send_bitrate_bps: u32,
    pub min_probes: u32,
    pub min_bytes: usize,
}

/// Context handed to the router with every send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PacedPacketInfo {
    /// `Some` while the packet is part of a bandwidth probe.
    pub probe_cluster: Option<ProbeClusterInfo>,
}

impl PacedPacketInfo {
    pub fn probe(cluster: ProbeClusterInfo) -> Self {
        PacedPacketInfo {
            probe_cluster: Some(cluster),
        }
    }

    pub fn is_probe(&self) -> bool {
        self.probe_cluster.is_some()
    }
}

// ─── Send Result ────────────────────────────────────────────────────────────

/// Outcome of asking the router to send a referenced packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    Success,
    /// Transport temporarily unavailable. The packet stays queued for the next tick.
    TransientFailure,
    /// The stream is gone or the packet is unknown. The packet is dropped.
    PermanentFailure,
}

// ─── Router ─────────────────────────────────────────────────────────────────

/// Network-injection layer the pacer calls when it is time to send.
///
/// Implementations must not call back into the pacer.
pub trait PacketRouter: Send {
    /// Send a packet the pacer only holds a reference to (by SSRC and
    /// sequence number); the payload lives in the caller's history.
    fn time_to_send_packet(
        &mut self,
        ssrc: u32,
        sequence_number: u16,
        capture_time: Instant,
        retransmission: bool,
        pacing_info: &PacedPacketInfo,
    ) -> SendResult;

    /// Send a packet the pacer owned. Fire-and-forget.
    fn send_packet(&mut self, packet: RtpPacket, pacing_info: &PacedPacketInfo);

    /// Build padding packets totalling roughly `bytes`; they are passed back
    /// through [`PacketRouter::send_packet`].
    fn generate_padding(&mut self, bytes: usize) -> Vec<RtpPacket>;

    /// Referenced-mode padding: send up to `bytes` of padding directly and
    /// return how much went out.
    fn time_to_send_padding(&mut self, bytes: usize, pacing_info: &PacedPacketInfo) -> usize;
}

impl<R: PacketRouter + ?Sized> PacketRouter for Box<R> {
    fn time_to_send_packet(
        &mut self,
        ssrc: u32,
        sequence_number: u16,
        capture_time: Instant,
        retransmission: bool,
        pacing_info: &PacedPacketInfo,
    ) -> SendResult {
        (**self).time_to_send_packet(
            ssrc,
            sequence_number,
            capture_time,
            retransmission,
            pacing_info,
        )
    }

    fn send_packet(&mut self, packet: RtpPacket, pacing_info: &PacedPacketInfo) {
        (**self).send_packet(packet, pacing_info)
    }

    fn generate_padding(&mut self, bytes: usize) -> Vec<RtpPacket> {
        (**self).generate_padding(bytes)
    }

    fn time_to_send_padding(&mut self, bytes: usize, pacing_info: &PacedPacketInfo) -> usize {
        (**self).time_to_send_padding(bytes, pacing_info)
    }
}
