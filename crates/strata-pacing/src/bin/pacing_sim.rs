//! Pacing simulator
//!
//! Feeds synthetic video (and optionally audio) streams through a
//! [`TaskQueuePacer`] in real time and prints what left the pacer.
//!
//! - Loads an optional TOML pacer config
//! - Frames are split into MTU-sized owned packets
//! - Optional probe cluster at start-up
//! - Prints the final stats snapshot as JSON

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use quanta::{Clock, Instant};
use serde::Serialize;
use strata_pacing::packet::{PacedPacketInfo, PacketKind, PacketRouter, RtpPacket, SendResult};
use strata_pacing::{PacerConfig, TaskQueuePacer};
use tracing::{debug, info, trace};
use tracing_subscriber::EnvFilter;

const MTU_PAYLOAD: usize = 1200;
const AUDIO_SSRC: u32 = 1;
const AUDIO_PACKET_BYTES: usize = 160;
const AUDIO_INTERVAL: Duration = Duration::from_millis(20);
const PADDING_SSRC: u32 = 0xFFFF;

/// Run synthetic media through the Strata pacer.
#[derive(Parser, Debug)]
#[command(name = "pacing-sim", about = "Strata pacer simulator")]
struct Cli {
    /// Pacer config file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pacing rate in kbps.
    #[arg(long, default_value_t = 2500)]
    rate_kbps: u32,

    /// Padding rate in kbps.
    #[arg(long, default_value_t = 0)]
    padding_kbps: u32,

    /// Number of video streams.
    #[arg(long, default_value_t = 2)]
    streams: u32,

    /// Per-stream video bitrate in kbps.
    #[arg(long, default_value_t = 800)]
    video_kbps: u32,

    /// Video frame rate.
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Also send a 64 kbps audio stream.
    #[arg(long, default_value_t = false)]
    audio: bool,

    /// Start with a probe cluster at this bitrate (kbps).
    #[arg(long)]
    probe_kbps: Option<u32>,

    /// Simulation length in seconds.
    #[arg(long, default_value_t = 5)]
    duration_secs: u64,
}

#[derive(Debug, Default, Clone, Serialize)]
struct StreamTotals {
    packets: u64,
    bytes: u64,
    probe_packets: u64,
}

#[derive(Debug, Default, Serialize)]
struct SimLog {
    streams: BTreeMap<u32, StreamTotals>,
    padding_bytes: u64,
}

/// Router that "sends" by tallying per-stream totals.
struct TallyRouter {
    clock: Clock,
    log: Arc<Mutex<SimLog>>,
    padding_seq: u16,
}

impl TallyRouter {
    fn record(&self, ssrc: u32, size: usize, pacing_info: &PacedPacketInfo) {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        let totals = log.streams.entry(ssrc).or_default();
        totals.packets += 1;
        totals.bytes += size as u64;
        if pacing_info.is_probe() {
            totals.probe_packets += 1;
        }
    }
}

impl PacketRouter for TallyRouter {
    fn time_to_send_packet(
        &mut self,
        ssrc: u32,
        sequence_number: u16,
        _capture_time: Instant,
        _retransmission: bool,
        _pacing_info: &PacedPacketInfo,
    ) -> SendResult {
        // Everything is enqueued owned; a referenced packet is unknown here.
        debug!(ssrc, sequence_number, "unknown referenced packet");
        SendResult::PermanentFailure
    }

    fn send_packet(&mut self, packet: RtpPacket, pacing_info: &PacedPacketInfo) {
        trace!(
            ssrc = packet.ssrc,
            seq = packet.sequence_number,
            size = packet.size(),
            probe = pacing_info.is_probe(),
            "sent"
        );
        if packet.kind == PacketKind::Padding {
            let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
            log.padding_bytes += packet.size() as u64;
            return;
        }
        self.record(packet.ssrc, packet.size(), pacing_info);
    }

    fn generate_padding(&mut self, bytes: usize) -> Vec<RtpPacket> {
        let mut packets = Vec::new();
        let mut remaining = bytes;
        while remaining > 0 {
            let size = remaining.min(MTU_PAYLOAD);
            self.padding_seq = self.padding_seq.wrapping_add(1);
            packets.push(RtpPacket::padding(
                PADDING_SSRC,
                self.padding_seq,
                self.clock.now(),
                size,
            ));
            remaining -= size;
        }
        packets
    }

    fn time_to_send_padding(&mut self, bytes: usize, _pacing_info: &PacedPacketInfo) -> usize {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        log.padding_bytes += bytes as u64;
        bytes
    }
}

struct VideoSource {
    ssrc: u32,
    seq: u16,
    frame_bytes: usize,
}

impl VideoSource {
    fn frame(&mut self, capture_time: Instant) -> Vec<RtpPacket> {
        let mut packets = Vec::new();
        let mut remaining = self.frame_bytes.max(1);
        while remaining > 0 {
            let size = remaining.min(MTU_PAYLOAD);
            self.seq = self.seq.wrapping_add(1);
            packets.push(RtpPacket::new(
                PacketKind::Video,
                self.ssrc,
                self.seq,
                capture_time,
                Bytes::from(vec![0u8; size]),
            ));
            remaining -= size;
        }
        packets
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<PacerConfig> {
    let Some(path) = path else {
        return Ok(PacerConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading pacer config {}", path.display()))?;
    PacerConfig::from_toml_str(&text)
        .with_context(|| format!("parsing pacer config {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let fps = cli.fps.max(1);
    let frame_interval = Duration::from_secs(1) / fps;
    let frame_bytes = (u64::from(cli.video_kbps) * 1000 / 8 / u64::from(fps)) as usize;

    info!(
        rate_kbps = cli.rate_kbps,
        streams = cli.streams,
        video_kbps = cli.video_kbps,
        fps,
        audio = cli.audio,
        "pacing-sim starting"
    );

    let clock = Clock::new();
    let log = Arc::new(Mutex::new(SimLog::default()));
    let router = TallyRouter {
        clock: clock.clone(),
        log: Arc::clone(&log),
        padding_seq: 0,
    };
    let pacer = TaskQueuePacer::new(config, Box::new(router), clock.clone())
        .context("starting pacer")?;
    pacer.set_pacing_rates(cli.rate_kbps * 1000, cli.padding_kbps * 1000)?;
    if let Some(probe_kbps) = cli.probe_kbps {
        pacer.create_probe_cluster(probe_kbps * 1000, 1)?;
    }
    pacer.ensure_started()?;

    let mut sources: Vec<VideoSource> = (0..cli.streams)
        .map(|i| VideoSource {
            ssrc: 100 + i,
            seq: 0,
            frame_bytes,
        })
        .collect();
    let mut audio_seq = 0u16;

    let start = clock.now();
    let end = start + Duration::from_secs(cli.duration_secs);
    let mut next_frame = start;
    let mut next_audio = start;
    let mut peak_queue_ms = 0u64;

    while clock.now() < end {
        let now = clock.now();
        if now >= next_frame {
            for source in &mut sources {
                for packet in source.frame(now) {
                    pacer.enqueue_packet(packet)?;
                }
            }
            next_frame += frame_interval;
        }
        if cli.audio && now >= next_audio {
            audio_seq = audio_seq.wrapping_add(1);
            pacer.enqueue_packet(RtpPacket::new(
                PacketKind::Audio,
                AUDIO_SSRC,
                audio_seq,
                now,
                Bytes::from(vec![0u8; AUDIO_PACKET_BYTES]),
            ))?;
            next_audio += AUDIO_INTERVAL;
        }

        let stats = pacer.stats();
        peak_queue_ms = peak_queue_ms.max(stats.expected_queue_time_ms);

        let wake = if cli.audio { next_frame.min(next_audio) } else { next_frame };
        thread::sleep(wake.saturating_duration_since(clock.now()));
    }

    pacer.flush()?;
    let stats = pacer.stats();
    pacer.shutdown();

    info!(
        packets_sent = stats.counters.packets_sent,
        queued = stats.queue_size_packets,
        peak_queue_ms,
        "pacing-sim finished"
    );

    let log = log.lock().unwrap_or_else(|e| e.into_inner());
    let report = serde_json::json!({
        "pacer": stats,
        "streams": log.streams,
        "padding_bytes": log.padding_bytes,
        "peak_expected_queue_time_ms": peak_queue_ms,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("serializing report")?
    );
    Ok(())
}
