//! Turns whatever a backend returned into one piece of generated text.
//!
//! Backends never hand back ad-hoc objects: each adapter converts its native
//! reply into a [`RawResponse`], and this module is the only place that knows
//! how to pull text out of the variants.

use futures_util::{Stream, StreamExt};
use log::{debug, warn};
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use crate::core::config::PlausibilityConfig;
use crate::core::error::LlmError;
use crate::services::classify::ErrorClassifier;
use crate::utils::text::char_len;

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

pub enum RawResponse {
    Text(String),
    /// An undecoded body; may turn out to be JSON.
    Bytes(Vec<u8>),
    Json(Value),
    Events(EventStream),
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawResponse::Text(s) => f.debug_tuple("Text").field(&s.len()).finish(),
            RawResponse::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            RawResponse::Json(_) => f.write_str("Json(..)"),
            RawResponse::Events(_) => f.write_str("Events(..)"),
        }
    }
}

/// One discrete event of a streaming reply.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Completion(String),
    Text(String),
    Chunk(Vec<u8>),
    Json(Value),
    /// Anything else the backend emitted, in its string form.
    Other(String),
}

/// Keys that carry generated text, in priority order.
const COMPLETION_KEYS: &[&str] = &[
    "completion",
    "content",
    "text",
    "outputText",
    "output_text",
    "generation",
    "output",
    "results",
    "delta",
    "body",
];

/// Fragments that mark trace or debug metadata rather than generated text.
const DEBUG_MARKERS: &[&str] = &[
    "\"trace\"",
    "'trace'",
    "object at 0x",
    "eventstream",
    "botocore",
    "requestid",
    "x-amzn",
];

const MAX_REPLACEMENT_RATIO: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct Plausibility {
    pub min_chars: usize,
    pub markers: Vec<String>,
}

impl Default for Plausibility {
    fn default() -> Self {
        Self::from(&PlausibilityConfig::default())
    }
}

impl From<&PlausibilityConfig> for Plausibility {
    fn from(config: &PlausibilityConfig) -> Self {
        Self {
            min_chars: config.min_chars.max(1),
            markers: config.markers.clone(),
        }
    }
}

impl Plausibility {
    pub fn accepts(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() || replacement_ratio(text) > MAX_REPLACEMENT_RATIO {
            return false;
        }
        self.markers.iter().any(|m| text.contains(m.as_str())) || char_len(text) >= self.min_chars
    }
}

fn replacement_ratio(text: &str) -> f64 {
    let total = char_len(text);
    if total == 0 {
        return 0.0;
    }
    let bad = text.chars().filter(|c| *c == char::REPLACEMENT_CHARACTER).count();
    bad as f64 / total as f64
}

/// Lossy UTF-8 decoding; `None` when the bytes are mostly garbage.
pub fn decode_bytes(bytes: &[u8]) -> Option<String> {
    decode_lossy(bytes).filter(|s| !s.trim().is_empty())
}

/// Like [`decode_bytes`] but keeps whitespace-only text, which matters for
/// stream fragments such as a lone `"\n"`.
fn decode_lossy(bytes: &[u8]) -> Option<String> {
    let decoded = String::from_utf8_lossy(bytes).into_owned();
    if decoded.is_empty() || replacement_ratio(&decoded) > MAX_REPLACEMENT_RATIO {
        None
    } else {
        Some(decoded)
    }
}

fn looks_like_debug(s: &str) -> bool {
    let lower = s.to_lowercase();
    DEBUG_MARKERS.iter().any(|m| lower.contains(m))
}

fn as_byte_array(items: &[Value]) -> Option<Vec<u8>> {
    if items.is_empty() {
        return None;
    }
    items
        .iter()
        .map(|v| v.as_u64().filter(|n| *n <= 255).map(|n| n as u8))
        .collect()
}

/// Only objects and arrays are treated as structured payloads; a bare `2024`
/// or `"quoted"` chunk is text that happens to parse.
fn parse_structured(bytes: &[u8]) -> Option<Value> {
    serde_json::from_slice::<Value>(bytes)
        .ok()
        .filter(|v| v.is_object() || v.is_array())
}

/// Extracts generated text from a JSON reply, or `None` if nothing usable is there.
pub fn extract_text(value: &Value) -> Option<String> {
    extract(value, false)
}

/// Per-fragment extraction: whitespace-only text is kept.
fn extract_fragment(value: &Value) -> Option<String> {
    extract(value, true)
}

fn extract(value: &Value, keep_blank: bool) -> Option<String> {
    let usable = |s: &str| if keep_blank { !s.is_empty() } else { !s.trim().is_empty() };
    match value {
        Value::String(s) if usable(s.as_str()) => Some(s.clone()),
        Value::Array(items) => {
            if let Some(bytes) = as_byte_array(items) {
                return if keep_blank { decode_lossy(&bytes) } else { decode_bytes(&bytes) };
            }
            let joined: String = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(block) => {
                        let is_text = block
                            .get("type")
                            .and_then(Value::as_str)
                            .map_or(true, |t| t == "text" || t == "text_delta");
                        if is_text {
                            extract(item, keep_blank)
                        } else {
                            None
                        }
                    }
                    _ => None,
                })
                .collect();
            usable(joined.as_str()).then_some(joined)
        }
        Value::Object(map) => COMPLETION_KEYS.iter().find_map(|key| {
            let inner = map.get(*key)?;
            match (*key, inner) {
                // gateway envelopes carry the model reply as an encoded JSON string
                ("body", Value::String(s)) => match serde_json::from_str::<Value>(s) {
                    Ok(parsed) => extract(&parsed, keep_blank),
                    Err(_) => extract(inner, keep_blank),
                },
                _ => extract(inner, keep_blank),
            }
        }),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct ResponseNormalizer {
    plausibility: Plausibility,
    stream_timeout: Duration,
    classifier: ErrorClassifier,
}

impl Default for ResponseNormalizer {
    fn default() -> Self {
        Self::new(Plausibility::default(), Duration::from_secs(60), ErrorClassifier::default())
    }
}

impl ResponseNormalizer {
    pub fn new(plausibility: Plausibility, stream_timeout: Duration, classifier: ErrorClassifier) -> Self {
        Self {
            plausibility,
            stream_timeout,
            classifier,
        }
    }

    pub async fn normalize(&self, raw: RawResponse) -> Result<String, LlmError> {
        debug!("Normalizing response: {:?}", raw);
        let text = match raw {
            RawResponse::Text(s) => Some(s),
            RawResponse::Json(value) => self.from_json(&value)?,
            RawResponse::Bytes(bytes) => self.from_bytes(&bytes)?,
            RawResponse::Events(stream) => self.drain(stream).await?,
        };

        match text {
            Some(t) if self.plausibility.accepts(&t) => Ok(t.trim().to_string()),
            Some(t) => Err(LlmError::no_content(format!(
                "reply failed plausibility check ({} chars)",
                char_len(&t)
            ))),
            None => Err(LlmError::no_content("no extraction path produced text")),
        }
    }

    fn check_error_payload(&self, value: &Value) -> Result<(), LlmError> {
        match self.classifier.classify_error_payload(value) {
            Some(err) => {
                warn!("Response carried an error payload: {}", err);
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn from_json(&self, value: &Value) -> Result<Option<String>, LlmError> {
        self.check_error_payload(value)?;
        Ok(extract_text(value))
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<Option<String>, LlmError> {
        match parse_structured(bytes) {
            Some(value) => self.from_json(&value),
            None => Ok(decode_bytes(bytes)),
        }
    }

    /// Text carried by one stream event. Whitespace-only fragments are kept so
    /// line breaks between deltas survive the join.
    fn event_text(&self, event: StreamEvent) -> Result<Option<String>, LlmError> {
        match event {
            StreamEvent::Completion(s) | StreamEvent::Text(s) => Ok(Some(s)),
            StreamEvent::Chunk(bytes) => match parse_structured(&bytes) {
                Some(value) => {
                    self.check_error_payload(&value)?;
                    Ok(extract_fragment(&value))
                }
                None => Ok(decode_lossy(&bytes)),
            },
            StreamEvent::Json(value) => {
                self.check_error_payload(&value)?;
                Ok(extract_fragment(&value))
            }
            StreamEvent::Other(s) if looks_like_debug(&s) => {
                debug!("Skipping trace-like stream event");
                Ok(None)
            }
            StreamEvent::Other(s) => Ok(Some(s)),
        }
    }

    /// Collects event fragments in arrival order, bounded by the stream timeout.
    async fn drain(&self, mut stream: EventStream) -> Result<Option<String>, LlmError> {
        let deadline = tokio::time::Instant::now() + self.stream_timeout;
        let mut fragments: Vec<String> = Vec::new();
        let mut events = 0usize;

        loop {
            match tokio::time::timeout_at(deadline, stream.next()).await {
                Err(_) => {
                    warn!(
                        "Stream drain hit the {:?} timeout after {} events",
                        self.stream_timeout, events
                    );
                    if fragments.is_empty() {
                        return Err(LlmError::Transient("stream drain timed out".to_string()));
                    }
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(e),
                Ok(Some(Ok(event))) => {
                    events += 1;
                    if let Some(text) = self.event_text(event)? {
                        fragments.push(text);
                    }
                }
            }
        }

        debug!("Drained {} events into {} fragments", events, fragments.len());
        let joined = fragments.concat();
        Ok((!joined.is_empty()).then_some(joined))
    }
}
