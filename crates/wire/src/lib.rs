//! simgate Wire Protocol Types
//!
//! This crate defines the Protobuf messages exchanged between a remote agent
//! and the Session Server. Both sides MUST depend on this crate so the schema
//! stays identical.
//!
//! # Message Shape
//!
//! Every message, request and response alike, is an [`Envelope`]: a
//! `(tag, value)` pair.
//!
//! - Requests: `tag` is the command name, `value` the command payload.
//! - Responses: `tag` is `"ok"` or `"error"`, `value` the body or a
//!   human-readable error string.
//!
//! [`Value`] is a small dynamic value tree (bool, int, float, text, numeric
//! array, list, map). Arrays carry `f32` data packed verbatim, so observations
//! round-trip bit-exactly.
//!
//! Envelopes travel in length-prefixed frames, see [`framing`].

#![deny(unsafe_code)]

pub mod framing;

use std::collections::BTreeMap;

use prost::Message;
use value::Kind;

pub use framing::{
    DEFAULT_MAX_FRAME_LEN, HEADER_LEN, read_envelope, read_frame, write_envelope, write_frame,
};

// ============================================================================
// Tags
// ============================================================================

/// Response tag for success.
pub const STATUS_OK: &str = "ok";

/// Response tag for failure.
pub const STATUS_ERROR: &str = "error";

/// Built-in command names.
pub const CMD_RESET: &str = "reset";
pub const CMD_STEP: &str = "step";
pub const CMD_CLOSE: &str = "close";

// ============================================================================
// Errors
// ============================================================================

/// Encoding, decoding and framing failures.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed message: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("Stream ended inside a frame ({read} of {expected} bytes)")]
    Truncated { read: usize, expected: usize },
    #[error("Frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },
    #[error("Expected {expected}, got {actual}")]
    UnexpectedValue {
        expected: &'static str,
        actual: String,
    },
}

impl WireError {
    /// True when the byte stream can no longer be trusted and the connection
    /// must be abandoned.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Truncated { .. } | Self::FrameTooLarge { .. }
        )
    }

    fn unexpected(expected: &'static str, actual: Option<&Value>) -> Self {
        Self::UnexpectedValue {
            expected,
            actual: actual.map_or("none", Value::kind_name).to_string(),
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// The `(tag, value)` pair carried by every frame.
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    /// Command name (requests) or status (responses).
    #[prost(string, tag = "1")]
    pub tag: String,

    /// Payload or body. Absent means `None`.
    #[prost(message, optional, tag = "2")]
    pub value: Option<Value>,
}

/// Dynamically typed payload.
///
/// A `Value` whose `kind` is unset is equivalent to an absent value.
#[derive(Clone, PartialEq, Message)]
pub struct Value {
    #[prost(oneof = "value::Kind", tags = "1, 2, 3, 4, 5, 6, 7")]
    pub kind: Option<value::Kind>,
}

pub mod value {
    /// Variants of [`super::Value`].
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(bool, tag = "1")]
        Bool(bool),
        #[prost(sint64, tag = "2")]
        Int(i64),
        #[prost(double, tag = "3")]
        Float(f64),
        #[prost(string, tag = "4")]
        Text(String),
        #[prost(message, tag = "5")]
        Array(super::Array),
        #[prost(message, tag = "6")]
        List(super::List),
        #[prost(message, tag = "7")]
        Map(super::Map),
    }
}

/// Dense row-major `f32` array.
#[derive(Clone, PartialEq, Message)]
pub struct Array {
    #[prost(uint64, repeated, tag = "1")]
    pub shape: Vec<u64>,

    #[prost(float, repeated, tag = "2")]
    pub data: Vec<f32>,
}

/// Ordered sequence of values.
#[derive(Clone, PartialEq, Message)]
pub struct List {
    #[prost(message, repeated, tag = "1")]
    pub items: Vec<Value>,
}

/// String-keyed mapping.
#[derive(Clone, PartialEq, Message)]
pub struct Map {
    #[prost(btree_map = "string, message", tag = "1")]
    pub entries: BTreeMap<String, Value>,
}

// ============================================================================
// Value Helpers
// ============================================================================

impl Value {
    fn of(kind: Kind) -> Self {
        Self { kind: Some(kind) }
    }

    pub fn boolean(b: bool) -> Self {
        Self::of(Kind::Bool(b))
    }

    pub fn int(i: i64) -> Self {
        Self::of(Kind::Int(i))
    }

    pub fn float(f: f64) -> Self {
        Self::of(Kind::Float(f))
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::of(Kind::Text(s.into()))
    }

    /// One-dimensional array.
    pub fn vector(data: Vec<f32>) -> Self {
        Self::of(Kind::Array(Array {
            shape: vec![data.len() as u64],
            data,
        }))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Self::of(Kind::List(List { items }))
    }

    pub fn map(entries: BTreeMap<String, Value>) -> Self {
        Self::of(Kind::Map(Map { entries }))
    }

    /// Short name of the variant, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            None => "none",
            Some(Kind::Bool(_)) => "bool",
            Some(Kind::Int(_)) => "int",
            Some(Kind::Float(_)) => "float",
            Some(Kind::Text(_)) => "text",
            Some(Kind::Array(_)) => "array",
            Some(Kind::List(_)) => "list",
            Some(Kind::Map(_)) => "map",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.kind {
            Some(Kind::Bool(b)) => Some(b),
            _ => None,
        }
    }

    /// Numeric value widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self.kind {
            Some(Kind::Float(f)) => Some(f),
            Some(Kind::Int(i)) => Some(i as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.kind {
            Some(Kind::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match &self.kind {
            Some(Kind::List(l)) => Some(&l.items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match &self.kind {
            Some(Kind::Map(m)) => Some(&m.entries),
            _ => None,
        }
    }

    /// Flatten a numeric array, or a list of numbers, into `f32` values.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>, WireError> {
        match &self.kind {
            Some(Kind::Array(array)) => {
                let expected = array
                    .shape
                    .iter()
                    .try_fold(1u64, |acc, &d| acc.checked_mul(d));
                if expected != Some(array.data.len() as u64) {
                    return Err(WireError::UnexpectedValue {
                        expected: "array whose shape matches its data",
                        actual: format!(
                            "shape {:?} with {} values",
                            array.shape,
                            array.data.len()
                        ),
                    });
                }
                Ok(array.data.clone())
            }
            Some(Kind::List(list)) => list
                .items
                .iter()
                .map(|item| {
                    item.as_f64()
                        .map(|f| f as f32)
                        .ok_or_else(|| WireError::unexpected("number", Some(item)))
                })
                .collect(),
            _ => Err(WireError::unexpected("numeric array or list", Some(self))),
        }
    }
}

// ============================================================================
// Envelope Helpers
// ============================================================================

impl Envelope {
    pub fn new(tag: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            tag: tag.into(),
            value,
        }
    }

    /// Successful response.
    pub fn ok(value: Option<Value>) -> Self {
        Self::new(STATUS_OK, value)
    }

    /// Failed response carrying a human-readable message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(STATUS_ERROR, Some(Value::text(message)))
    }

    pub fn is_ok(&self) -> bool {
        self.tag == STATUS_OK
    }

    /// Payload, treating an unset `kind` as absent.
    pub fn payload(&self) -> Option<&Value> {
        self.value.as_ref().filter(|v| v.kind.is_some())
    }

    /// Message of an error response.
    pub fn error_message(&self) -> Option<&str> {
        if self.tag == STATUS_ERROR {
            self.payload().and_then(Value::as_text)
        } else {
            None
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(Self::decode(bytes)?)
    }
}

// ============================================================================
// Step Reply
// ============================================================================

/// Typed view of a successful `step` body.
///
/// On the wire this is the list
/// `[observation, reward, terminated, truncated, info, diagnostic]`.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReply {
    pub observation: Vec<f32>,
    pub reward: f64,
    pub terminated: bool,
    /// Always false: the backend does not separate truncation from termination.
    pub truncated: bool,
    pub info: BTreeMap<String, Value>,
    pub diagnostic: String,
}

impl From<StepReply> for Value {
    fn from(reply: StepReply) -> Self {
        Value::list(vec![
            Value::vector(reply.observation),
            Value::float(reply.reward),
            Value::boolean(reply.terminated),
            Value::boolean(reply.truncated),
            Value::map(reply.info),
            Value::text(reply.diagnostic),
        ])
    }
}

impl TryFrom<&Value> for StepReply {
    type Error = WireError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        let [obs, reward, terminated, truncated, info, diagnostic] = value
            .as_list()
            .ok_or_else(|| WireError::unexpected("step result list", Some(value)))?
        else {
            return Err(WireError::UnexpectedValue {
                expected: "6-element step result",
                actual: format!("{} elements", value.as_list().map_or(0, <[Value]>::len)),
            });
        };

        Ok(Self {
            observation: obs.to_f32_vec()?,
            reward: reward
                .as_f64()
                .ok_or_else(|| WireError::unexpected("float reward", Some(reward)))?,
            terminated: terminated
                .as_bool()
                .ok_or_else(|| WireError::unexpected("bool terminated", Some(terminated)))?,
            truncated: truncated
                .as_bool()
                .ok_or_else(|| WireError::unexpected("bool truncated", Some(truncated)))?,
            info: info
                .as_map()
                .cloned()
                .ok_or_else(|| WireError::unexpected("info map", Some(info)))?,
            diagnostic: diagnostic
                .as_text()
                .map(str::to_string)
                .ok_or_else(|| WireError::unexpected("diagnostic text", Some(diagnostic)))?,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_envelope_roundtrip() {
        let msg = Envelope::new(CMD_STEP, Some(Value::vector(vec![0.1, -0.25, 3.0e-7])));
        let decoded = Envelope::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(msg, decoded);
        assert_eq!(decoded.tag, "step");
    }

    #[test]
    fn test_absent_and_empty_value_are_none() {
        let absent = Envelope::new(CMD_RESET, None);
        let empty = Envelope::new(CMD_RESET, Some(Value { kind: None }));
        assert!(absent.payload().is_none());
        assert!(empty.payload().is_none());
    }

    #[test]
    fn test_observation_bits_preserved() {
        let data = vec![f32::MIN_POSITIVE, -0.0, 1.0 / 3.0, f32::MAX, 1e-38];
        let msg = Envelope::ok(Some(Value::vector(data.clone())));
        let decoded = Envelope::from_bytes(&msg.to_bytes()).unwrap();
        let out = decoded.payload().unwrap().to_f32_vec().unwrap();
        let bits = |v: &[f32]| v.iter().map(|f| f.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&out), bits(&data));
    }

    #[test]
    fn test_to_f32_vec_from_number_list() {
        let list = Value::list(vec![Value::float(0.5), Value::int(-2)]);
        assert_eq!(list.to_f32_vec().unwrap(), vec![0.5, -2.0]);
    }

    #[test]
    fn test_to_f32_vec_rejects_non_numeric() {
        let list = Value::list(vec![Value::float(0.5), Value::text("x")]);
        let err = list.to_f32_vec().unwrap_err();
        assert_eq!(err.to_string(), "Expected number, got text");

        assert!(Value::int(123).to_f32_vec().is_err());
    }

    #[test]
    fn test_to_f32_vec_rejects_inconsistent_shape() {
        let bad = Value {
            kind: Some(Kind::Array(Array {
                shape: vec![2, 2],
                data: vec![1.0, 2.0, 3.0],
            })),
        };
        assert!(bad.to_f32_vec().is_err());
    }

    #[test]
    fn test_to_f32_vec_rejects_overflowing_shape() {
        for shape in [vec![u64::MAX, 2], vec![1 << 32, 1 << 32, 7]] {
            let huge = Value {
                kind: Some(Kind::Array(Array {
                    shape,
                    data: vec![],
                })),
            };
            assert!(matches!(
                huge.to_f32_vec(),
                Err(WireError::UnexpectedValue { .. })
            ));
        }
    }

    #[test]
    fn test_error_envelope_message() {
        let msg = Envelope::error("Unknown command: foo");
        assert!(!msg.is_ok());
        assert_eq!(msg.error_message(), Some("Unknown command: foo"));
        assert_eq!(Envelope::ok(None).error_message(), None);
    }

    #[test]
    fn test_step_reply_value_layout() {
        let reply = StepReply {
            observation: vec![1.0, 2.0],
            reward: -0.5,
            terminated: false,
            truncated: false,
            info: BTreeMap::new(),
            diagnostic: "0.5000 kg".to_string(),
        };
        let value = Value::from(reply.clone());
        let items = value.as_list().unwrap();
        assert_eq!(items.len(), 6);
        assert_eq!(items[1].as_f64(), Some(-0.5));
        assert_eq!(items[3].as_bool(), Some(false));
        assert_eq!(items[4].as_map().map(BTreeMap::len), Some(0));

        let back = StepReply::try_from(&value).unwrap();
        assert_eq!(back, reply);
    }

    #[test]
    fn test_step_reply_rejects_short_list() {
        let value = Value::list(vec![Value::vector(vec![]), Value::float(0.0)]);
        let err = StepReply::try_from(&value).unwrap_err();
        assert!(err.to_string().contains("6-element"));
    }

    #[test]
    fn test_transport_fault_classification() {
        assert!(WireError::Truncated { read: 1, expected: 4 }.is_transport_fault());
        assert!(WireError::FrameTooLarge { len: 10, max: 5 }.is_transport_fault());
        let decode = Envelope::from_bytes(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(!decode.is_transport_fault());
    }
}
