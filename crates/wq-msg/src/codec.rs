//! ---
//! wq_section: "02-messaging-data-model"
//! wq_subsection: "module"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Reading model and frame codec for the telemetry link."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
//! Frame codec for the telemetry stream.
//!
//! Frames are flat JSON objects. A frame spans from the first `{` in the
//! buffer to the first `}` after it; nested objects are not part of the
//! protocol. Values are accepted either as JSON numbers or as numeric strings,
//! since both encodings are still in circulation.

use serde::de::{Deserializer, Error as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::types::{ReadingSet, ReadingUpdate};
use crate::Result;

/// Default cap on bytes retained between reads before the ingest buffer is discarded.
pub const DEFAULT_MAX_INGEST_BYTES: usize = 4096;

const FRAME_OPEN: u8 = b'{';
const FRAME_CLOSE: u8 = b'}';

/// Encoding used when writing frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WireFormat {
    /// `{"tur":42.00,"tmp":21.50,"pH":7.20}`
    #[default]
    Bare,
    /// `{"tur":"42.00", "tmp":"21.50", "pH":"7.20"}`, understood by older monitors.
    Quoted,
}

impl std::str::FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bare" => Ok(WireFormat::Bare),
            "quoted" => Ok(WireFormat::Quoted),
            other => Err(format!("unknown wire format: {}", other)),
        }
    }
}

/// Encode a reading set as a single frame using two-decimal fixed point.
pub fn encode(readings: &ReadingSet, format: WireFormat) -> String {
    match format {
        WireFormat::Bare => format!(
            "{{\"tur\":{:.2},\"tmp\":{:.2},\"pH\":{:.2}}}",
            readings.turbidity(),
            readings.temperature(),
            readings.ph()
        ),
        WireFormat::Quoted => format!(
            "{{\"tur\":\"{:.2}\", \"tmp\":\"{:.2}\", \"pH\":\"{:.2}\"}}",
            readings.turbidity(),
            readings.temperature(),
            readings.ph()
        ),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireNumber {
    Number(f64),
    Text(String),
}

fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match Option::<WireNumber>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(WireNumber::Number(value)) => value,
        Some(WireNumber::Text(text)) => text
            .trim()
            .parse::<f64>()
            .map_err(|err| D::Error::custom(format!("invalid numeric string {:?}: {}", text, err)))?,
    };
    if value.is_finite() {
        Ok(Some(value))
    } else {
        Err(D::Error::custom(format!("non-finite value {}", value)))
    }
}

#[derive(Deserialize)]
struct WireReading {
    #[serde(default, deserialize_with = "lenient_number")]
    tur: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    tmp: Option<f64>,
    #[serde(default, rename = "pH", deserialize_with = "lenient_number")]
    ph: Option<f64>,
}

/// Parse one candidate frame (the bytes from `{` to `}` inclusive).
pub fn decode_frame(candidate: &[u8]) -> Result<ReadingUpdate> {
    let wire: WireReading = serde_json::from_slice(candidate)?;
    Ok(ReadingUpdate {
        turbidity: wire.tur,
        temperature: wire.tmp,
        ph: wire.ph,
    })
}

/// Outcome of feeding bytes into a [`FrameDecoder`].
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeEvent {
    /// A candidate frame parsed successfully.
    Reading(ReadingUpdate),
    /// A candidate frame was extracted but did not parse; it has been dropped.
    Malformed {
        /// The rejected candidate, lossily decoded for diagnostics.
        candidate: String,
        /// Parser error description.
        error: String,
    },
    /// The retained remainder exceeded the buffer cap and was discarded.
    Overflow {
        /// Number of bytes thrown away.
        discarded: usize,
    },
}

/// Running counters kept by a decoder across feeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Frames decoded successfully.
    pub frames: u64,
    /// Candidates that failed to parse.
    pub malformed: u64,
    /// Bytes skipped in front of a frame opener.
    pub skipped_bytes: u64,
    /// Times the retained remainder was discarded for exceeding the cap.
    pub overflows: u64,
}

/// Ingest buffer turning a fragmented byte stream into decoded frames.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    limit: usize,
    stats: DecoderStats,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Decoder with the default retention cap.
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_INGEST_BYTES)
    }

    /// Decoder retaining at most `limit` unresolved bytes between feeds.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit: limit.max(1),
            stats: DecoderStats::default(),
        }
    }

    /// Append received bytes and extract every complete frame.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<DecodeEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some((start, end)) = self.next_span() {
            let candidate: Vec<u8> = self.buffer.drain(..=end).skip(start).collect();
            if start > 0 {
                trace!(skipped = start, "discarded bytes ahead of frame");
                self.stats.skipped_bytes += start as u64;
            }
            match decode_frame(&candidate) {
                Ok(update) => {
                    self.stats.frames += 1;
                    events.push(DecodeEvent::Reading(update));
                }
                Err(err) => {
                    self.stats.malformed += 1;
                    let candidate = String::from_utf8_lossy(&candidate).into_owned();
                    debug!(%candidate, error = %err, "dropping malformed frame");
                    events.push(DecodeEvent::Malformed {
                        candidate,
                        error: err.to_string(),
                    });
                }
            }
        }

        if self.buffer.len() > self.limit {
            let discarded = self.buffer.len();
            self.buffer.clear();
            self.stats.overflows += 1;
            events.push(DecodeEvent::Overflow { discarded });
        }
        events
    }

    fn next_span(&self) -> Option<(usize, usize)> {
        let start = self.buffer.iter().position(|&b| b == FRAME_OPEN)?;
        let close = self.buffer[start..].iter().position(|&b| b == FRAME_CLOSE)?;
        Some((start, start + close))
    }

    /// Bytes retained for the next feed.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop everything retained; used when the connection goes away.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Configured retention cap.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Counters accumulated since construction.
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readings(events: &[DecodeEvent]) -> Vec<ReadingUpdate> {
        events
            .iter()
            .filter_map(|event| match event {
                DecodeEvent::Reading(update) => Some(*update),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn bare_encoding_uses_two_decimals() {
        let set = ReadingSet::new(42.0, 21.5, 7.2).unwrap();
        assert_eq!(
            encode(&set, WireFormat::Bare),
            r#"{"tur":42.00,"tmp":21.50,"pH":7.20}"#
        );
    }

    #[test]
    fn quoted_encoding_matches_legacy_layout() {
        let set = ReadingSet::new(70.0, 23.0, 8.0).unwrap();
        assert_eq!(
            encode(&set, WireFormat::Quoted),
            r#"{"tur":"70.00", "tmp":"23.00", "pH":"8.00"}"#
        );
    }

    #[test]
    fn decode_accepts_numbers_and_numeric_strings() {
        let quoted = decode_frame(br#"{"tur":"42.00", "tmp":"21.50", "pH":"7.20"}"#).unwrap();
        let bare = decode_frame(br#"{"tur":42.00,"tmp":21.5,"pH":7.20}"#).unwrap();
        assert_eq!(quoted, bare);
        let integer = decode_frame(br#"{"pH":7}"#).unwrap();
        assert_eq!(integer.ph, Some(7.0));
    }

    #[test]
    fn decode_leaves_absent_fields_empty() {
        let update = decode_frame(br#"{"tmp":"-1.00","extra":true}"#).unwrap();
        assert_eq!(update.turbidity, None);
        assert_eq!(update.temperature, Some(-1.0));
        assert_eq!(update.ph, None);
    }

    #[test]
    fn decode_rejects_non_finite_strings() {
        assert!(decode_frame(br#"{"tur":"NaN"}"#).is_err());
        assert!(decode_frame(br#"{"tmp":"inf"}"#).is_err());
        assert!(decode_frame(br#"{"pH":"seven"}"#).is_err());
    }

    #[test]
    fn garbage_around_a_frame_is_skipped() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.feed(br#"junk before {"tur":"5.00"} trailing junk"#);
        assert_eq!(
            readings(&events),
            vec![ReadingUpdate {
                turbidity: Some(5.0),
                ..Default::default()
            }]
        );
        assert_eq!(decoder.stats().skipped_bytes, "junk before ".len() as u64);
    }

    #[test]
    fn partial_frame_is_retained_until_completed() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.feed(br#"{"tur":"3.00"}{"tur":"1"#);
        assert_eq!(readings(&events).len(), 1);
        assert_eq!(decoder.pending(), br#"{"tur":"1"#);

        let events = decoder.feed(br#"2.0"}"#);
        assert_eq!(
            readings(&events),
            vec![ReadingUpdate {
                turbidity: Some(12.0),
                ..Default::default()
            }]
        );
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn malformed_candidate_is_dropped_and_decoding_continues() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.feed(br#"{"tur":oops}{"pH":"6.50"}"#);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], DecodeEvent::Malformed { candidate, .. } if candidate == r#"{"tur":oops}"#));
        assert_eq!(
            events[1],
            DecodeEvent::Reading(ReadingUpdate {
                ph: Some(6.5),
                ..Default::default()
            })
        );
        assert_eq!(decoder.stats().malformed, 1);
        assert_eq!(decoder.stats().frames, 1);
    }

    #[test]
    fn nested_object_splits_at_first_closing_brace() {
        let mut decoder = FrameDecoder::new();
        let events = decoder.feed(br#"{"tur":{"v":1}}"#);
        assert!(matches!(events[0], DecodeEvent::Malformed { .. }));
        assert_eq!(decoder.pending(), b"}");
    }

    #[test]
    fn oversized_remainder_is_discarded() {
        let mut decoder = FrameDecoder::with_limit(16);
        let events = decoder.feed(b"no frame opener in this chunk at all");
        assert_eq!(events, vec![DecodeEvent::Overflow { discarded: 36 }]);
        assert!(decoder.pending().is_empty());

        let events = decoder.feed(br#"{"pH":"7.00"}"#);
        assert_eq!(readings(&events).len(), 1);
        assert_eq!(decoder.stats().overflows, 1);
    }

    #[test]
    fn complete_frames_are_decoded_before_the_cap_applies() {
        let mut decoder = FrameDecoder::with_limit(8);
        let events = decoder.feed(br#"{"tur":1}{"tur":2}{"tur":3}"#);
        assert_eq!(readings(&events).len(), 3);
        assert!(decoder.pending().is_empty());
    }

    #[test]
    fn wire_format_parses_from_str() {
        assert_eq!("Quoted".parse::<WireFormat>().unwrap(), WireFormat::Quoted);
        assert!("binary".parse::<WireFormat>().is_err());
    }
}
