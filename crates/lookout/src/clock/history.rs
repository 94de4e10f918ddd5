//! Bounded history of displayed detection frames.
//!
//! Detections usually arrive ahead of the video they describe. The renderer
//! keeps the last few tracker outputs and draws the one matching the display
//! clock instead of the newest.

use std::collections::VecDeque;

use serde::Serialize;

use crate::channel::VesselInfo;
use crate::tracker::RawDetection;

/// One visible detection with its fused identity, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub detection: RawDetection,
    pub vessel: Option<VesselInfo>,
}

/// Tracker output for one source frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisibleFrame {
    pub frame_index: u64,
    pub source_timestamp_ms: f64,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameHistory {
    cap: usize,
    frames: VecDeque<VisibleFrame>,
}

impl Default for FrameHistory {
    fn default() -> Self {
        Self::new(120)
    }
}

impl FrameHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            frames: VecDeque::new(),
        }
    }

    pub fn push(mut self, frame: VisibleFrame) -> Self {
        self.frames.push_back(frame);
        while self.frames.len() > self.cap {
            self.frames.pop_front();
        }
        self
    }

    pub fn clear(mut self) -> Self {
        self.frames.clear();
        self
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn latest(&self) -> Option<&VisibleFrame> {
        self.frames.back()
    }

    /// Newest frame at or before `display_ts`, or the oldest retained frame
    /// when the display clock predates everything.
    pub fn frame_at(&self, display_ts: f64) -> Option<&VisibleFrame> {
        self.frames
            .iter()
            .rev()
            .find(|f| f.source_timestamp_ms <= display_ts)
            .or_else(|| self.frames.front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(index: u64, ts: f64) -> VisibleFrame {
        VisibleFrame {
            frame_index: index,
            source_timestamp_ms: ts,
            annotations: Vec::new(),
        }
    }

    #[test]
    fn test_frame_at_picks_newest_not_after_clock() {
        let history = FrameHistory::default()
            .push(frame(0, 0.0))
            .push(frame(1, 40.0))
            .push(frame(2, 80.0));

        assert_eq!(history.frame_at(79.9).map(|f| f.frame_index), Some(1));
        assert_eq!(history.frame_at(80.0).map(|f| f.frame_index), Some(2));
        assert_eq!(history.frame_at(1_000.0).map(|f| f.frame_index), Some(2));
    }

    #[test]
    fn test_frame_at_falls_back_to_oldest() {
        let history = FrameHistory::default().push(frame(7, 500.0)).push(frame(8, 540.0));
        assert_eq!(history.frame_at(10.0).map(|f| f.frame_index), Some(7));
        assert!(FrameHistory::default().frame_at(10.0).is_none());
    }

    #[test]
    fn test_cap_drops_oldest() {
        let mut history = FrameHistory::new(120);
        for i in 0..130 {
            history = history.push(frame(i, i as f64));
        }
        assert_eq!(history.len(), 120);
        assert_eq!(history.frame_at(0.0).map(|f| f.frame_index), Some(10));
        assert_eq!(history.latest().map(|f| f.frame_index), Some(129));
    }
}
