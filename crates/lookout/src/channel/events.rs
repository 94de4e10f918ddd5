//! Wire format of the detection feed.
//!
//! Every message is a JSON object tagged by `type`:
//!
//! ```json
//! {"type": "ready", "width": 1920, "height": 1080, "fps": 25}
//! {"type": "detections", "frame_index": 42, "timestamp_ms": 1680.0, "fps": 25,
//!  "vessels": [{"detection": {"x": 1, "y": 2, "width": 30, "height": 12,
//!               "confidence": 0.8, "class": "boat"},
//!               "vessel": {"mmsi": 257000000, "name": "SKARV"}}]}
//! {"type": "complete"}
//! {"type": "error", "message": "source ended"}
//! ```

use serde::{Deserialize, Deserializer, Serialize};

use crate::tracker::RawDetection;

/// One message from the feed, as decoded off the wire.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    Ready {
        width: u32,
        height: u32,
        #[serde(default)]
        fps: f64,
    },
    Detections {
        frame_index: u64,
        timestamp_ms: f64,
        #[serde(default)]
        fps: f64,
        #[serde(default)]
        vessels: Vec<VesselEntry>,
    },
    Complete,
    Error {
        #[serde(default)]
        message: String,
    },
}

impl FeedMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// A detection plus whatever AIS identity the backend fused onto it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselEntry {
    pub detection: RawDetection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vessel: Option<VesselInfo>,
}

/// AIS identity metadata. Fields the engine doesn't interpret are kept in
/// `extra` so the renderer can still show them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VesselInfo {
    #[serde(default, deserialize_with = "string_or_number")]
    pub mmsi: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub callsign: Option<String>,
    #[serde(default)]
    pub ship_type: Option<String>,
    #[serde(default)]
    pub speed_knots: Option<f64>,
    #[serde(default)]
    pub course_deg: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// MMSI shows up both as a JSON number and as a string depending on the source
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// One decoded detections frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionFrame {
    pub frame_index: u64,
    pub source_timestamp_ms: f64,
    pub fps: f64,
    pub vessels: Vec<VesselEntry>,
}

impl DetectionFrame {
    pub fn detections(&self) -> Vec<RawDetection> {
        self.vessels.iter().map(|v| v.detection.clone()).collect()
    }
}

/// Typed events emitted by a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Ready { width: u32, height: u32, fps: f64 },
    Detections(DetectionFrame),
    Complete,
    Error(String),
}

impl From<FeedMessage> for ChannelEvent {
    fn from(message: FeedMessage) -> Self {
        match message {
            FeedMessage::Ready { width, height, fps } => ChannelEvent::Ready { width, height, fps },
            FeedMessage::Detections {
                frame_index,
                timestamp_ms,
                fps,
                vessels,
            } => ChannelEvent::Detections(DetectionFrame {
                frame_index,
                source_timestamp_ms: timestamp_ms,
                fps,
                vessels,
            }),
            FeedMessage::Complete => ChannelEvent::Complete,
            FeedMessage::Error { message } => ChannelEvent::Error(message),
        }
    }
}

/// A channel event stamped with the subscription generation that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    pub generation: u64,
    pub event: ChannelEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_detections_with_vessel() {
        let text = r#"{
            "type": "detections",
            "frame_index": 42,
            "timestamp_ms": 1680.5,
            "fps": 25,
            "vessels": [
                {"detection": {"x": 1, "y": 2, "width": 30, "height": 12,
                               "confidence": 0.8, "class": "boat"},
                 "vessel": {"mmsi": 257000000, "name": "SKARV", "flag": "NO"}},
                {"detection": {"x": 400, "y": 20, "width": 10, "height": 10,
                               "confidence": 0.4, "class": "buoy", "identity_hint": "t7"}}
            ]
        }"#;

        let event = ChannelEvent::from(FeedMessage::parse(text).unwrap());
        let ChannelEvent::Detections(frame) = event else {
            panic!("expected detections, got {event:?}");
        };
        assert_eq!(frame.frame_index, 42);
        assert_eq!(frame.source_timestamp_ms, 1680.5);
        assert_eq!(frame.vessels.len(), 2);

        let vessel = frame.vessels[0].vessel.as_ref().unwrap();
        assert_eq!(vessel.mmsi.as_deref(), Some("257000000"));
        assert_eq!(vessel.name.as_deref(), Some("SKARV"));
        assert_eq!(vessel.extra.get("flag"), Some(&serde_json::json!("NO")));

        assert!(frame.vessels[1].vessel.is_none());
        assert_eq!(frame.vessels[1].detection.identity_hint.as_deref(), Some("t7"));
        assert_eq!(frame.detections()[1].class, "buoy");
    }

    #[test]
    fn test_parse_control_messages() {
        assert_eq!(
            FeedMessage::parse(r#"{"type":"ready","width":1920,"height":1080,"fps":30}"#).unwrap(),
            FeedMessage::Ready { width: 1920, height: 1080, fps: 30.0 }
        );
        assert_eq!(FeedMessage::parse(r#"{"type":"complete"}"#).unwrap(), FeedMessage::Complete);
        assert_eq!(
            ChannelEvent::from(FeedMessage::parse(r#"{"type":"error","message":"gone"}"#).unwrap()),
            ChannelEvent::Error("gone".to_string())
        );
    }

    #[test]
    fn test_unknown_type_is_error() {
        assert!(FeedMessage::parse(r#"{"type":"progress","pct":3}"#).is_err());
        assert!(FeedMessage::parse("not json").is_err());
    }

    #[test]
    fn test_empty_vessels_default() {
        let msg = FeedMessage::parse(r#"{"type":"detections","frame_index":0,"timestamp_ms":0}"#)
            .unwrap();
        assert!(matches!(msg, FeedMessage::Detections { ref vessels, .. } if vessels.is_empty()));
    }
}
