//! # Pacer Configuration
//!
//! TOML-facing [`PacerConfigInput`] (every field optional) and the resolved
//! [`PacerConfig`] the pacer is built from. `resolve()` fills defaults,
//! checks the config version and rejects out-of-range values.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const CONFIG_VERSION: u32 = 1;

/// Expected max pacer delay. When the expected queue time exceeds this,
/// producers should back off (drop frames) rather than keep feeding the
/// queue; the pacer may exceed its target rate to keep the limit.
pub const MAX_QUEUE_LENGTH: Duration = Duration::from_millis(2000);

// ─── TOML input ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PacerConfigInput {
    pub version: u32,
    pub drain_large_queues: Option<bool>,
    pub send_padding_if_silent: Option<bool>,
    pub pace_audio: Option<bool>,
    pub account_for_audio: Option<bool>,
    pub min_packet_limit_ms: Option<u64>,
    pub queue_time_limit_ms: Option<u64>,
    pub reference_padding: Option<bool>,
    pub probing_enabled: Option<bool>,
    pub prober: ProberConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProberConfigInput {
    pub min_probe_packets: Option<u32>,
    pub min_probe_duration_ms: Option<u64>,
    pub max_probe_delay_ms: Option<u64>,
    pub cluster_timeout_ms: Option<u64>,
}

// ─── Resolved config ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProberConfig {
    /// A cluster is complete only after this many probes...
    pub min_probe_packets: u32,
    /// ...and after `bitrate × min_probe_duration` bytes.
    pub min_probe_duration_ms: u64,
    /// A probe later than this suspends probing.
    pub max_probe_delay_ms: u64,
    /// Clusters that never started are dropped after this long.
    pub cluster_timeout_ms: u64,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            min_probe_packets: 5,
            min_probe_duration_ms: 15,
            max_probe_delay_ms: 3,
            cluster_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacerConfig {
    pub version: u32,
    /// Raise the media rate so the average queued packet still meets the
    /// queue-time limit.
    pub drain_large_queues: bool,
    /// Send keep-alive padding every 500 ms even when not congested.
    pub send_padding_if_silent: bool,
    /// Subject audio to the media budget and congestion window.
    pub pace_audio: bool,
    /// Charge audio bytes to the budget.
    pub account_for_audio: bool,
    /// Normal tick spacing, also the budget refill granularity.
    pub min_packet_limit: Duration,
    pub queue_time_limit: Duration,
    /// Padding through `time_to_send_padding` instead of generated packets.
    pub reference_padding: bool,
    pub probing_enabled: bool,
    pub prober: ProberConfig,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            drain_large_queues: true,
            send_padding_if_silent: false,
            pace_audio: false,
            account_for_audio: false,
            min_packet_limit: Duration::from_millis(5),
            queue_time_limit: MAX_QUEUE_LENGTH,
            reference_padding: true,
            probing_enabled: true,
            prober: ProberConfig::default(),
        }
    }
}

impl PacerConfigInput {
    pub fn resolve(self) -> Result<PacerConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let defaults = PacerConfig::default();

        let min_packet_limit_ms = self
            .min_packet_limit_ms
            .unwrap_or(defaults.min_packet_limit.as_millis() as u64);
        if !(1..=100).contains(&min_packet_limit_ms) {
            return Err(ConfigError::OutOfRange {
                field: "min_packet_limit_ms",
                value: min_packet_limit_ms,
            });
        }

        let queue_time_limit_ms = self
            .queue_time_limit_ms
            .unwrap_or(defaults.queue_time_limit.as_millis() as u64);
        if queue_time_limit_ms == 0 {
            return Err(ConfigError::OutOfRange {
                field: "queue_time_limit_ms",
                value: queue_time_limit_ms,
            });
        }

        let prober_defaults = ProberConfig::default();
        let prober = ProberConfig {
            min_probe_packets: self
                .prober
                .min_probe_packets
                .unwrap_or(prober_defaults.min_probe_packets)
                .max(1),
            min_probe_duration_ms: self
                .prober
                .min_probe_duration_ms
                .unwrap_or(prober_defaults.min_probe_duration_ms),
            max_probe_delay_ms: self
                .prober
                .max_probe_delay_ms
                .unwrap_or(prober_defaults.max_probe_delay_ms),
            cluster_timeout_ms: self
                .prober
                .cluster_timeout_ms
                .unwrap_or(prober_defaults.cluster_timeout_ms),
        };

        Ok(PacerConfig {
            version,
            drain_large_queues: self
                .drain_large_queues
                .unwrap_or(defaults.drain_large_queues),
            send_padding_if_silent: self
                .send_padding_if_silent
                .unwrap_or(defaults.send_padding_if_silent),
            pace_audio: self.pace_audio.unwrap_or(defaults.pace_audio),
            account_for_audio: self
                .account_for_audio
                .unwrap_or(defaults.account_for_audio),
            min_packet_limit: Duration::from_millis(min_packet_limit_ms),
            queue_time_limit: Duration::from_millis(queue_time_limit_ms),
            reference_padding: self
                .reference_padding
                .unwrap_or(defaults.reference_padding),
            probing_enabled: self.probing_enabled.unwrap_or(defaults.probing_enabled),
            prober,
        })
    }
}

impl PacerConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(PacerConfig::default());
        }
        let parsed: PacerConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_default() {
        let cfg = PacerConfig::from_toml_str("   \n").unwrap();
        assert_eq!(cfg, PacerConfig::default());
    }

    #[test]
    fn defaults_match_expected_values() {
        let cfg = PacerConfig::default();
        assert!(cfg.drain_large_queues);
        assert!(!cfg.pace_audio);
        assert!(cfg.reference_padding);
        assert_eq!(cfg.min_packet_limit, Duration::from_millis(5));
        assert_eq!(cfg.queue_time_limit, MAX_QUEUE_LENGTH);
        assert_eq!(cfg.prober.min_probe_packets, 5);
    }

    #[test]
    fn partial_toml_overrides_fields() {
        let toml = r#"
            pace_audio = true
            min_packet_limit_ms = 10
            queue_time_limit_ms = 500

            [prober]
            min_probe_packets = 8
        "#;
        let cfg = PacerConfig::from_toml_str(toml).unwrap();
        assert!(cfg.pace_audio);
        assert_eq!(cfg.min_packet_limit, Duration::from_millis(10));
        assert_eq!(cfg.queue_time_limit, Duration::from_millis(500));
        assert_eq!(cfg.prober.min_probe_packets, 8);
        // Untouched values keep their defaults.
        assert!(cfg.drain_large_queues);
        assert_eq!(cfg.prober.min_probe_duration_ms, 15);
    }

    #[test]
    fn unsupported_version_rejected() {
        let err = PacerConfig::from_toml_str("version = 7").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedVersion(7)));
    }

    #[test]
    fn invalid_toml_rejected() {
        let err = PacerConfig::from_toml_str("pace_audio = = true").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn out_of_range_tick_rejected() {
        let err = PacerConfig::from_toml_str("min_packet_limit_ms = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                field: "min_packet_limit_ms",
                ..
            }
        ));
    }

    #[test]
    fn zero_probe_packets_clamped() {
        let cfg = PacerConfig::from_toml_str("[prober]\nmin_probe_packets = 0").unwrap();
        assert_eq!(cfg.prober.min_probe_packets, 1);
    }
}
