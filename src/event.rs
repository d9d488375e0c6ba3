// src/event.rs
//! Observation model shared by the server and the dashboard.
//!
//! `RawEvent` is the tolerant wire shape (every field optional, legacy payload
//! names accepted); `Event` is the normalized value everything downstream
//! works with. The only way to obtain an `Event` is `RawEvent::into_event`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A coordinate pair reported by the sensor. A missing axis reads as 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    /// Placeholder used by the server when the sensor sent no fix.
    pub const SENTINEL: Location = Location { lat: 0.0, lng: 0.0 };

    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::SENTINEL
    }
}

/// One frame/detection observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Encoded image (usually a base64 data URL); `None` for metadata-only events.
    #[serde(rename = "data")]
    pub payload: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(rename = "detections")]
    pub detection_count: u32,
    pub location: Location,
}

impl Event {
    /// True when at least one subject was detected.
    pub fn is_detection(&self) -> bool {
        self.detection_count > 0
    }

    /// Copy without the image, for metadata round-trips.
    pub fn without_payload(&self) -> Event {
        Event {
            payload: None,
            ..self.clone()
        }
    }
}

/// Event as received over the wire; any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_data: Option<String>,
    /// Older sensor builds publish the image under `data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_int",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<i64>,
    #[serde(
        default,
        deserialize_with = "lenient_int",
        skip_serializing_if = "Option::is_none"
    )]
    pub detections: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

/// Integer field as sensors actually send it: fractional numbers truncate,
/// numeric strings parse, anything else reads as absent.
fn lenient_int<'de, D>(de: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let truncate = |f: f64| f.is_finite().then(|| f.trunc() as i64);
    Ok(match Option::<Value>::deserialize(de)? {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().and_then(truncate)),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().and_then(truncate),
        _ => None,
    })
}

impl RawEvent {
    /// Parse a JSON message body.
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// First non-empty payload, `frameData` preferred over `data`.
    pub fn payload(&self) -> Option<&str> {
        self.frame_data
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.data.as_deref().filter(|s| !s.is_empty()))
    }

    /// Normalize into an `Event`.
    ///
    /// A missing or zero timestamp becomes `now_ms`, missing detections become
    /// 0 (negative counts clamp to 0) and a missing location becomes `fallback`.
    pub fn into_event(self, now_ms: i64, fallback: Location) -> Event {
        let payload = self.payload().map(str::to_owned);
        let timestamp = self.timestamp.filter(|t| *t > 0).unwrap_or(now_ms);
        let detection_count = self
            .detections
            .unwrap_or(0)
            .clamp(0, i64::from(u32::MAX)) as u32;

        Event {
            payload,
            timestamp,
            detection_count,
            location: self.location.unwrap_or(fallback),
        }
    }
}
