//! # strata-pacing
//!
//! Outbound packet pacer for Strata media senders.
//!
//! Decides when and in what order already-assembled packets leave the
//! sender: a target send rate with bounded burst headroom, an external
//! congestion window, fairness across streams and deliberate probe bursts
//! for the bandwidth estimator.
//!
//! ## Crate structure
//!
//! - [`packet`]: Packet kinds, owned packets, and the [`packet::PacketRouter`] send hooks
//! - [`budget`]: Interval byte budget (token bucket)
//! - [`prober`]: Probe cluster scheduling
//! - [`queue`]: Round-robin multi-stream priority queue
//! - [`pacer`]: Synchronous pacing core
//! - [`executor`]: Serial run-on-owner executor with delayed tasks
//! - [`task_queue`]: Thread-safe pacer driven by its own executor
//! - [`stats`]: Counters and published snapshots
//! - [`config`]: TOML-backed pacer configuration
//! - [`error`]: Error types

pub mod budget;
pub mod config;
pub mod error;
pub mod executor;
pub mod pacer;
pub mod packet;
pub mod prober;
pub mod queue;
pub mod stats;
pub mod task_queue;

pub use config::PacerConfig;
pub use pacer::Pacer;
pub use packet::{PacedPacketInfo, PacketKind, PacketRouter, RtpPacket, SendResult};
pub use task_queue::TaskQueuePacer;
