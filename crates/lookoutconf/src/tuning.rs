//! Tuning knobs for the live engine.
//!
//! These seed the runtime components. The defaults are the values the
//! operator console has always shipped with; override them only when a
//! deployment's network or detector behaves differently.

use serde::{Deserialize, Serialize};

/// Media transport negotiation and recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// No decoded frame within this window after an attempt starts => retry.
    #[serde(default = "TransportConfig::default_first_frame_timeout_ms")]
    pub first_frame_timeout_ms: u64,

    /// Upper bound on waiting for local address gathering.
    #[serde(default = "TransportConfig::default_gather_timeout_ms")]
    pub gather_timeout_ms: u64,

    /// First reconnect delay.
    #[serde(default = "TransportConfig::default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,

    /// Multiplier applied per consecutive failure.
    #[serde(default = "TransportConfig::default_reconnect_growth")]
    pub reconnect_growth: f64,

    /// Ceiling for a single reconnect delay.
    #[serde(default = "TransportConfig::default_reconnect_cap_ms")]
    pub reconnect_cap_ms: u64,

    /// Consecutive failures before the long reset delay kicks in.
    #[serde(default = "TransportConfig::default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Long delay used once fast attempts are exhausted.
    #[serde(default = "TransportConfig::default_reconnect_reset_ms")]
    pub reconnect_reset_ms: u64,

    /// Timeout for each handshake HTTP request.
    #[serde(default = "TransportConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl TransportConfig {
    fn default_first_frame_timeout_ms() -> u64 {
        8_000
    }

    fn default_gather_timeout_ms() -> u64 {
        500
    }

    fn default_reconnect_base_ms() -> u64 {
        2_000
    }

    fn default_reconnect_growth() -> f64 {
        1.5
    }

    fn default_reconnect_cap_ms() -> u64 {
        15_000
    }

    fn default_max_reconnect_attempts() -> u32 {
        8
    }

    fn default_reconnect_reset_ms() -> u64 {
        30_000
    }

    fn default_request_timeout_ms() -> u64 {
        10_000
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            first_frame_timeout_ms: Self::default_first_frame_timeout_ms(),
            gather_timeout_ms: Self::default_gather_timeout_ms(),
            reconnect_base_ms: Self::default_reconnect_base_ms(),
            reconnect_growth: Self::default_reconnect_growth(),
            reconnect_cap_ms: Self::default_reconnect_cap_ms(),
            max_reconnect_attempts: Self::default_max_reconnect_attempts(),
            reconnect_reset_ms: Self::default_reconnect_reset_ms(),
            request_timeout_ms: Self::default_request_timeout_ms(),
        }
    }
}

/// Detection feed subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Websocket URL template; `{session}` is replaced with the session id.
    #[serde(default = "ChannelConfig::default_detections_url")]
    pub detections_url: String,

    /// Fixed delay before re-opening an uncleanly closed subscription.
    #[serde(default = "ChannelConfig::default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Ask the detector to run identity tracking server-side.
    #[serde(default = "ChannelConfig::default_true")]
    pub track: bool,

    /// Ask the detector to loop file-backed sources.
    #[serde(default = "ChannelConfig::default_true", rename = "loop")]
    pub looping: bool,
}

impl ChannelConfig {
    fn default_detections_url() -> String {
        "ws://127.0.0.1:8000/sessions/{session}/detections".to_string()
    }

    fn default_reconnect_delay_ms() -> u64 {
        3_000
    }

    fn default_true() -> bool {
        true
    }

    /// Feed URL for one session.
    pub fn url_for(&self, session: &str) -> String {
        self.detections_url.replace("{session}", session)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            detections_url: Self::default_detections_url(),
            reconnect_delay_ms: Self::default_reconnect_delay_ms(),
            track: true,
            looping: true,
        }
    }
}

/// Identity tracker hysteresis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Max centroid displacement (source pixels) still treated as the same object.
    #[serde(default = "TrackerConfig::default_match_distance_px")]
    pub match_distance_px: f64,

    /// Consecutive matches before an identity is shown.
    #[serde(default = "TrackerConfig::default_min_streak")]
    pub min_streak: u32,

    /// Consecutive misses an identity survives.
    #[serde(default = "TrackerConfig::default_max_missed")]
    pub max_missed: u32,
}

impl TrackerConfig {
    fn default_match_distance_px() -> f64 {
        60.0
    }

    fn default_min_streak() -> u32 {
        3
    }

    fn default_max_missed() -> u32 {
        6
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            match_distance_px: Self::default_match_distance_px(),
            min_streak: Self::default_min_streak(),
            max_missed: Self::default_max_missed(),
        }
    }
}

/// Display clock and latency accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Samples kept for p50/p95 latency.
    #[serde(default = "ClockConfig::default_latency_window")]
    pub latency_window: usize,

    /// Detections waiting for the display clock to catch up.
    #[serde(default = "ClockConfig::default_pending_cap")]
    pub pending_cap: usize,

    /// Tracked frames retained for display-time lookup.
    #[serde(default = "ClockConfig::default_history_cap")]
    pub history_cap: usize,

    /// Render tick interval.
    #[serde(default = "ClockConfig::default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl ClockConfig {
    fn default_latency_window() -> usize {
        200
    }

    fn default_pending_cap() -> usize {
        300
    }

    fn default_history_cap() -> usize {
        120
    }

    fn default_tick_interval_ms() -> u64 {
        100
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            latency_window: Self::default_latency_window(),
            pending_cap: Self::default_pending_cap(),
            history_cap: Self::default_history_cap(),
            tick_interval_ms: Self::default_tick_interval_ms(),
        }
    }
}
