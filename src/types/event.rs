//! Provider events
//!
//! Events arrive as JSON objects from the provider's activity feed. Only
//! `failed` events are decoded into a typed payload; every other kind keeps
//! just its name. The raw JSON is always retained so that re-encoding an
//! event reproduces exactly what the provider sent, including fields this
//! crate does not model.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Errors decoding a stored or delivered event
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event payload is not a JSON object")]
    NotAnObject,

    #[error("missing or empty field: {0}")]
    MissingField(&'static str),

    #[error("invalid {kind} payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure severity as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The provider gave up on the recipient
    #[default]
    Permanent,
    /// The provider will retry delivery
    Temporary,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Permanent => write!(f, "permanent"),
            Severity::Temporary => write!(f, "temporary"),
            Severity::Unknown => write!(f, "unknown"),
        }
    }
}

/// SMTP envelope of the failed message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, deserialize_with = "null_as_default")]
    pub sender: String,
}

/// Delivery status reported by the receiving MTA
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryStatus {
    /// SMTP reply code, e.g. 550
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u32>,

    /// RFC 3463 enhanced status code, e.g. "5.1.1"
    #[serde(
        rename = "enhanced-code",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub enhanced_code: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,

    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub description: String,
}

/// Subset of the original message headers kept by the provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageHeaders {
    #[serde(default, deserialize_with = "null_as_default")]
    pub subject: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub from: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub to: String,

    #[serde(rename = "message-id", default, deserialize_with = "null_as_default")]
    pub message_id: String,
}

/// Original message metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    #[serde(default, deserialize_with = "null_as_default")]
    pub headers: MessageHeaders,
}

/// Payload of a `failed` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    /// Address the provider failed to deliver to
    pub recipient: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub severity: Severity,

    /// Provider classification, e.g. "bounce", "suppress-bounce"
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "String::is_empty"
    )]
    pub reason: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub envelope: Envelope,

    #[serde(rename = "delivery-status", default, deserialize_with = "null_as_default")]
    pub delivery_status: DeliveryStatus,

    #[serde(default, deserialize_with = "null_as_default")]
    pub message: MessageInfo,
}

impl Failure {
    /// Create a failure payload with only the recipient and envelope sender set
    pub fn new(recipient: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            severity: Severity::Permanent,
            reason: String::new(),
            envelope: Envelope {
                sender: sender.into(),
            },
            delivery_status: DeliveryStatus::default(),
            message: MessageInfo::default(),
        }
    }

    /// Set the SMTP status code and message
    pub fn with_status(mut self, code: u32, message: impl Into<String>) -> Self {
        self.delivery_status.code = Some(code);
        self.delivery_status.message = message.into();
        self
    }

    /// Set the severity
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Set the original message headers
    pub fn with_headers(mut self, headers: MessageHeaders) -> Self {
        self.message.headers = headers;
        self
    }
}

/// Event kinds, discriminated by the provider's `event` field
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Accepted,
    Rejected,
    Delivered,
    Failed(Failure),
    Opened,
    Clicked,
    Unsubscribed,
    Complained,
    Stored,
    /// Any kind this crate does not know; the raw payload is kept on the event
    Unknown(String),
}

impl EventKind {
    fn from_payload(name: &str, raw: &Value) -> Result<Self, DecodeError> {
        let kind = match name {
            "accepted" => EventKind::Accepted,
            "rejected" => EventKind::Rejected,
            "delivered" => EventKind::Delivered,
            "failed" => {
                let failure = Failure::deserialize(raw).map_err(|source| DecodeError::Payload {
                    kind: name.to_string(),
                    source,
                })?;
                EventKind::Failed(failure)
            }
            "opened" => EventKind::Opened,
            "clicked" => EventKind::Clicked,
            "unsubscribed" => EventKind::Unsubscribed,
            "complained" => EventKind::Complained,
            "stored" => EventKind::Stored,
            other => EventKind::Unknown(other.to_string()),
        };
        Ok(kind)
    }

    /// Provider name of this kind
    pub fn name(&self) -> &str {
        match self {
            EventKind::Accepted => "accepted",
            EventKind::Rejected => "rejected",
            EventKind::Delivered => "delivered",
            EventKind::Failed(_) => "failed",
            EventKind::Opened => "opened",
            EventKind::Clicked => "clicked",
            EventKind::Unsubscribed => "unsubscribed",
            EventKind::Complained => "complained",
            EventKind::Stored => "stored",
            EventKind::Unknown(name) => name,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// An immutable event from the provider's activity feed
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Provider-assigned unique id, used as the store key
    pub id: String,

    /// Seconds since the Unix epoch, with fractional part
    pub timestamp: f64,

    pub kind: EventKind,

    raw: Value,
}

impl Event {
    /// Decode an event from its JSON bytes
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let raw: Value = serde_json::from_slice(data)?;
        Self::from_value(raw)
    }

    /// Decode an event from an already parsed JSON value
    pub fn from_value(raw: Value) -> Result<Self, DecodeError> {
        let object = raw.as_object().ok_or(DecodeError::NotAnObject)?;

        let id = object
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or(DecodeError::MissingField("id"))?
            .to_string();
        let name = object
            .get("event")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or(DecodeError::MissingField("event"))?;
        let timestamp = object
            .get("timestamp")
            .and_then(Value::as_f64)
            .unwrap_or_default();

        let kind = EventKind::from_payload(name, &raw)?;

        Ok(Self {
            id,
            timestamp,
            kind,
            raw,
        })
    }

    /// Encode the event as pretty JSON
    ///
    /// The provider's original payload is written back unchanged.
    pub fn encode(&self) -> Vec<u8> {
        format!("{:#}", self.raw).into_bytes()
    }

    /// Build a `failed` event
    pub fn failed(id: impl Into<String>, timestamp: f64, failure: Failure) -> Self {
        let id = id.into();
        let mut raw = json!(failure);
        if let Value::Object(object) = &mut raw {
            object.insert("id".to_string(), json!(id));
            object.insert("event".to_string(), json!("failed"));
            object.insert("timestamp".to_string(), json!(timestamp));
        }

        Self {
            id,
            timestamp,
            kind: EventKind::Failed(failure),
            raw,
        }
    }

    /// Build an event with no payload
    ///
    /// `failed` gets an empty failure payload so the event still decodes
    /// from its own encoding.
    pub fn other(id: impl Into<String>, timestamp: f64, name: &str) -> Self {
        if name == "failed" {
            return Self::failed(id, timestamp, Failure::new("", ""));
        }

        let id = id.into();
        let raw = json!({
            "id": id,
            "event": name,
            "timestamp": timestamp,
        });
        let kind = EventKind::from_payload(name, &raw)
            .unwrap_or_else(|_| EventKind::Unknown(name.to_string()));

        Self {
            id,
            timestamp,
            kind,
            raw,
        }
    }

    /// Provider name of the event kind
    pub fn name(&self) -> &str {
        self.kind.name()
    }

    /// The failure payload, if this is a `failed` event
    pub fn failure(&self) -> Option<&Failure> {
        match &self.kind {
            EventKind::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Raw JSON payload as received
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Event time, `None` if the timestamp is out of range
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        let secs = self.timestamp.floor();
        let nanos = ((self.timestamp - secs) * 1e9) as u32;
        Utc.timestamp_opt(secs as i64, nanos).single()
    }
}

/// Treat an explicit JSON `null` like a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
