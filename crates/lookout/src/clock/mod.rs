//! Display clock and latency reconciliation.
//!
//! Video and detections arrive on different paths with different delays.
//! For each session the aligner keeps the newest `(source timestamp, wall
//! time)` sample per stream and projects it forward with elapsed wall time,
//! so clocks advance smoothly between network updates:
//!
//! ```text
//! projected = sample.source_timestamp_ms + (now_ms - sample.observed_at_ms)
//! ```
//!
//! The video display clock prefers the playback position and falls back to
//! raw frame timestamps. Detections follow the video clock whenever video is
//! present, otherwise their own projected clock.
//!
//! Display latency is measured by queueing `(source_ts, arrival)` for each
//! detection frame and, once the detection display clock reaches `source_ts`,
//! recording `now - arrival` in a bounded window.
//!
//! `ClockState` is a plain value: every mutation takes `self` and returns the
//! next state.

mod history;

pub use history::{Annotation, FrameHistory, VisibleFrame};

use std::collections::{HashMap, VecDeque};

use lookoutconf::ClockConfig;
use serde::Serialize;

/// A timestamp observed at a wall-clock instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSample {
    pub source_timestamp_ms: f64,
    pub observed_at_ms: f64,
}

impl ClockSample {
    pub fn new(source_timestamp_ms: f64, observed_at_ms: f64) -> Self {
        Self {
            source_timestamp_ms,
            observed_at_ms,
        }
    }

    pub fn project(&self, now_ms: f64) -> f64 {
        self.source_timestamp_ms + (now_ms - self.observed_at_ms)
    }
}

/// Queue and window bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockParams {
    pub pending_cap: usize,
    pub latency_window: usize,
}

impl Default for ClockParams {
    fn default() -> Self {
        Self {
            pending_cap: 300,
            latency_window: 200,
        }
    }
}

impl From<&ClockConfig> for ClockParams {
    fn from(config: &ClockConfig) -> Self {
        Self {
            pending_cap: config.pending_cap,
            latency_window: config.latency_window,
        }
    }
}

/// Latency percentiles over the current window, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub samples: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct SessionClock {
    detection: Option<ClockSample>,
    frame: Option<ClockSample>,
    playback: Option<ClockSample>,
    pending: VecDeque<ClockSample>,
    window: VecDeque<f64>,
}

impl SessionClock {
    fn video_clock(&self, now_ms: f64) -> Option<f64> {
        self.playback
            .or(self.frame)
            .map(|sample| sample.project(now_ms))
    }

    fn detection_clock(&self, now_ms: f64) -> Option<f64> {
        self.video_clock(now_ms)
            .or_else(|| self.detection.map(|sample| sample.project(now_ms)))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClockState {
    params: ClockParams,
    sessions: HashMap<String, SessionClock>,
}

impl ClockState {
    pub fn new(params: ClockParams) -> Self {
        Self {
            params,
            sessions: HashMap::new(),
        }
    }

    /// A detections frame for `source_ts` arrived at `now_ms`.
    pub fn record_detection(mut self, session: &str, source_ts: f64, now_ms: f64) -> Self {
        let cap = self.params.pending_cap;
        let clock = self.sessions.entry(session.to_string()).or_default();
        let sample = ClockSample::new(source_ts, now_ms);
        clock.detection = Some(sample);
        clock.pending.push_back(sample);
        while clock.pending.len() > cap {
            clock.pending.pop_front();
        }
        self
    }

    /// A decoded video frame carried `source_ts`.
    pub fn record_frame_timestamp(mut self, session: &str, source_ts: f64, now_ms: f64) -> Self {
        let clock = self.sessions.entry(session.to_string()).or_default();
        clock.frame = Some(ClockSample::new(source_ts, now_ms));
        self
    }

    /// The player reported its playback position.
    pub fn record_playback_position(mut self, session: &str, position_ms: f64, now_ms: f64) -> Self {
        let clock = self.sessions.entry(session.to_string()).or_default();
        clock.playback = Some(ClockSample::new(position_ms, now_ms));
        self
    }

    /// Move every pending sample the detection clock has reached into the
    /// latency window.
    pub fn tick(mut self, session: &str, now_ms: f64) -> Self {
        let window_cap = self.params.latency_window;
        let Some(clock) = self.sessions.get_mut(session) else {
            return self;
        };
        let Some(display) = clock.detection_clock(now_ms) else {
            return self;
        };

        // Arrival order is not source order after a feed restart, so scan all
        let mut remaining = VecDeque::with_capacity(clock.pending.len());
        for sample in clock.pending.drain(..) {
            if sample.source_timestamp_ms <= display {
                clock.window.push_back((now_ms - sample.observed_at_ms).max(0.0));
            } else {
                remaining.push_back(sample);
            }
        }
        clock.pending = remaining;
        while clock.window.len() > window_cap {
            clock.window.pop_front();
        }
        self
    }

    /// Drop everything known about a session.
    pub fn forget(mut self, session: &str) -> Self {
        self.sessions.remove(session);
        self
    }

    pub fn video_display_clock(&self, session: &str, now_ms: f64) -> Option<f64> {
        self.sessions.get(session)?.video_clock(now_ms)
    }

    pub fn detection_display_clock(&self, session: &str, now_ms: f64) -> Option<f64> {
        self.sessions.get(session)?.detection_clock(now_ms)
    }

    pub fn pending_len(&self, session: &str) -> usize {
        self.sessions.get(session).map_or(0, |c| c.pending.len())
    }

    pub fn latency(&self, session: &str) -> LatencyStats {
        let Some(clock) = self.sessions.get(session) else {
            return LatencyStats::default();
        };
        let mut sorted: Vec<f64> = clock.window.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        LatencyStats {
            p50_ms: nearest_rank(&sorted, 50.0),
            p95_ms: nearest_rank(&sorted, 95.0),
            samples: sorted.len(),
        }
    }
}

/// Nearest-rank percentile over an ascending slice.
pub fn nearest_rank(sorted: &[f64], percentile: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = ((percentile / 100.0) * sorted.len() as f64).ceil() as usize;
    let index = rank.clamp(1, sorted.len()) - 1;
    Some(sorted[index])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_advances_with_wall_time() {
        let sample = ClockSample::new(1_000.0, 50.0);
        assert_eq!(sample.project(50.0), 1_000.0);
        assert_eq!(sample.project(250.0), 1_200.0);
    }

    #[test]
    fn test_playback_position_wins_over_frame_timestamp() {
        let clock = ClockState::default()
            .record_frame_timestamp("alpha", 5_000.0, 100.0)
            .record_playback_position("alpha", 4_800.0, 120.0);
        assert_eq!(clock.video_display_clock("alpha", 220.0), Some(4_900.0));
    }

    #[test]
    fn test_frame_timestamp_when_no_playback() {
        let clock = ClockState::default().record_frame_timestamp("alpha", 5_000.0, 100.0);
        assert_eq!(clock.video_display_clock("alpha", 140.0), Some(5_040.0));
    }

    #[test]
    fn test_detection_clock_follows_video_when_present() {
        let clock = ClockState::default().record_detection("alpha", 9_000.0, 0.0);
        assert_eq!(clock.detection_display_clock("alpha", 10.0), Some(9_010.0));
        assert_eq!(clock.video_display_clock("alpha", 10.0), None);

        let clock = clock.record_frame_timestamp("alpha", 8_500.0, 10.0);
        assert_eq!(clock.detection_display_clock("alpha", 20.0), Some(8_510.0));
    }

    #[test]
    fn test_sessions_are_independent() {
        let clock = ClockState::default()
            .record_frame_timestamp("alpha", 1_000.0, 0.0)
            .record_detection("bravo", 7.0, 0.0);
        assert_eq!(clock.video_display_clock("bravo", 0.0), None);
        assert_eq!(clock.detection_display_clock("missing", 0.0), None);

        let clock = clock.forget("alpha");
        assert_eq!(clock.video_display_clock("alpha", 0.0), None);
    }

    #[test]
    fn test_latency_measured_when_video_catches_up() {
        // Detection for source 2000 arrives at wall 100, video is behind
        let clock = ClockState::default()
            .record_detection("alpha", 2_000.0, 100.0)
            .record_frame_timestamp("alpha", 1_800.0, 100.0)
            .tick("alpha", 150.0);
        assert_eq!(clock.pending_len("alpha"), 1);
        assert_eq!(clock.latency("alpha").samples, 0);

        // Video reaches 2000 at wall 300
        let clock = clock.tick("alpha", 300.0);
        assert_eq!(clock.pending_len("alpha"), 0);
        let stats = clock.latency("alpha");
        assert_eq!(stats.samples, 1);
        assert_eq!(stats.p50_ms, Some(200.0));
        assert_eq!(stats.p95_ms, Some(200.0));
    }

    #[test]
    fn test_pending_queue_drops_oldest() {
        let params = ClockParams {
            pending_cap: 3,
            latency_window: 200,
        };
        let mut clock = ClockState::new(params);
        for i in 0..5 {
            clock = clock.record_detection("alpha", 10_000.0 + i as f64, 0.0);
        }
        assert_eq!(clock.pending_len("alpha"), 3);
    }

    #[test]
    fn test_latency_window_bounded() {
        let params = ClockParams {
            pending_cap: 300,
            latency_window: 4,
        };
        let mut clock = ClockState::new(params);
        for i in 0..10 {
            let now = i as f64 * 10.0;
            clock = clock.record_detection("alpha", now, now).tick("alpha", now + i as f64);
        }
        let stats = clock.latency("alpha");
        assert_eq!(stats.samples, 4);
        // Window holds the last four latencies: 6, 7, 8, 9
        assert_eq!(stats.p50_ms, Some(7.0));
        assert_eq!(stats.p95_ms, Some(9.0));
    }

    #[test]
    fn test_nearest_rank() {
        let values: Vec<f64> = (1..=20).map(f64::from).collect();
        assert_eq!(nearest_rank(&values, 50.0), Some(10.0));
        assert_eq!(nearest_rank(&values, 95.0), Some(19.0));
        assert_eq!(nearest_rank(&[42.0], 95.0), Some(42.0));
        assert_eq!(nearest_rank(&[], 50.0), None);
    }
}
