//! Online identity tracking with appearance/disappearance hysteresis.
//!
//! The detector reports every frame independently, so a boat that is really
//! sitting still flickers in and out and jitters a few pixels. This module
//! associates each frame's boxes with the identities carried from previous
//! frames (greedy nearest centroid, per class) and only exposes identities
//! that have been confirmed for a few frames, holding them through short
//! dropouts.
//!
//! The tracker is a pure transform: the caller owns the previous
//! `Vec<TrackedIdentity>` and threads it through successive `update` calls.

use lookoutconf::TrackerConfig;
use serde::{Deserialize, Serialize};

/// One bounding box from one frame, in native source-resolution pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub confidence: f64,
    pub class: String,
    /// Server-side identity, when the detector tracks on its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_hint: Option<String>,
}

impl RawDetection {
    pub fn centroid(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// An identity carried across frames.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedIdentity {
    /// Latest matched detection (held unchanged while missed).
    pub detection: RawDetection,
    /// Consecutive frames this identity was matched. Always >= 1.
    pub streak: u32,
    /// Consecutive frames without a match.
    pub missed: u32,
}

/// Matching and hysteresis thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerParams {
    pub match_distance_px: f64,
    pub min_streak: u32,
    pub max_missed: u32,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            match_distance_px: 60.0,
            min_streak: 3,
            max_missed: 6,
        }
    }
}

impl From<&TrackerConfig> for TrackerParams {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            match_distance_px: config.match_distance_px,
            min_streak: config.min_streak,
            max_missed: config.max_missed,
        }
    }
}

/// Result of one tracker step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerOutput {
    /// Feed this back into the next `update`.
    pub tracking_state: Vec<TrackedIdentity>,
    /// Confirmed identities to draw for this frame.
    pub visible_detections: Vec<RawDetection>,
}

/// Advance tracking by one frame.
pub fn update(
    previous: &[TrackedIdentity],
    detections: &[RawDetection],
    params: &TrackerParams,
) -> TrackerOutput {
    let mut used = vec![false; previous.len()];
    let mut tracking_state = Vec::with_capacity(previous.len() + detections.len());

    for detection in detections {
        let (cx, cy) = detection.centroid();

        let best = previous
            .iter()
            .enumerate()
            .filter(|(i, tracked)| !used[*i] && tracked.detection.class == detection.class)
            .map(|(i, tracked)| {
                let (px, py) = tracked.detection.centroid();
                (i, (cx - px).hypot(cy - py))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1));

        match best {
            Some((i, distance)) if distance <= params.match_distance_px => {
                used[i] = true;
                tracking_state.push(TrackedIdentity {
                    detection: detection.clone(),
                    streak: previous[i].streak.saturating_add(1),
                    missed: 0,
                });
            }
            _ => tracking_state.push(TrackedIdentity {
                detection: detection.clone(),
                streak: 1,
                missed: 0,
            }),
        }
    }

    for (tracked, _) in previous.iter().zip(&used).filter(|(_, used)| !**used) {
        let missed = tracked.missed.saturating_add(1);
        if missed <= params.max_missed {
            tracking_state.push(TrackedIdentity {
                detection: tracked.detection.clone(),
                streak: tracked.streak,
                missed,
            });
        }
    }

    let visible_detections = tracking_state
        .iter()
        .filter(|t| t.streak >= params.min_streak && t.missed <= params.max_missed)
        .map(|t| t.detection.clone())
        .collect();

    TrackerOutput {
        tracking_state,
        visible_detections,
    }
}
