//! Signaling message envelope
//!
//! Every frame is a flat JSON object with a mandatory `type` tag. All other
//! fields are optional and are left out of the encoded form when absent:
//!
//! ```text
//! {"type":"offer","target":"host-mbp","payload":{"type":"offer","sdp":"v=0..."}}
//! {"type":"offer","from":"controller-ab12cd34","payload":{...},"timestamp":1700000000000}
//! ```

use super::CodecError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;
use std::fmt;

/// Message type tag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageType {
    Register,
    Registered,
    ListHosts,
    Hosts,
    HostsUpdated,
    Offer,
    Answer,
    IceCandidate,
    Ping,
    Pong,
    Error,
    HostDisconnected,
    /// Tag not understood by this build; kept verbatim for diagnostics
    Unknown(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Register => "register",
            MessageType::Registered => "registered",
            MessageType::ListHosts => "list-hosts",
            MessageType::Hosts => "hosts",
            MessageType::HostsUpdated => "hosts-updated",
            MessageType::Offer => "offer",
            MessageType::Answer => "answer",
            MessageType::IceCandidate => "ice-candidate",
            MessageType::Ping => "ping",
            MessageType::Pong => "pong",
            MessageType::Error => "error",
            MessageType::HostDisconnected => "host-disconnected",
            MessageType::Unknown(tag) => tag,
        }
    }

    /// Offer, answer and ICE candidates are relayed between endpoints.
    pub fn is_negotiation(&self) -> bool {
        matches!(
            self,
            MessageType::Offer | MessageType::Answer | MessageType::IceCandidate
        )
    }
}

impl From<&str> for MessageType {
    fn from(tag: &str) -> Self {
        match tag {
            "register" => MessageType::Register,
            "registered" => MessageType::Registered,
            "list-hosts" => MessageType::ListHosts,
            "hosts" => MessageType::Hosts,
            "hosts-updated" => MessageType::HostsUpdated,
            "offer" => MessageType::Offer,
            "answer" => MessageType::Answer,
            "ice-candidate" => MessageType::IceCandidate,
            "ping" => MessageType::Ping,
            "pong" => MessageType::Pong,
            "error" => MessageType::Error,
            "host-disconnected" => MessageType::HostDisconnected,
            other => MessageType::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MessageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(MessageType::from(tag.as_str()))
    }
}

/// Declared endpoint role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    Host,
    #[default]
    Controller,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Controller => "controller",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    /// Anything other than `"host"` registers as a controller.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let role = String::deserialize(deserializer)?;
        Ok(if role == "host" { Role::Host } else { Role::Controller })
    }
}

/// Host roster entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub id: String,
    pub online: bool,
}

impl HostInfo {
    pub fn new(id: impl Into<String>, online: bool) -> Self {
        Self { id: id.into(), online }
    }
}

/// Opaque negotiation payload, kept as the exact JSON text it arrived as.
#[derive(Debug, Clone)]
pub struct Payload(Box<RawValue>);

impl Payload {
    /// Serialize a typed value into a payload
    pub fn from_value<T: Serialize>(value: &T) -> Result<Self, CodecError> {
        serde_json::value::to_raw_value(value)
            .map(Payload)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Wrap already-encoded JSON text
    pub fn from_json(json: &str) -> Result<Self, CodecError> {
        RawValue::from_string(json.to_string())
            .map(Payload)
            .map_err(|e| CodecError::Payload(e.to_string()))
    }

    /// Decode the payload into a typed view
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        serde_json::from_str(self.0.get()).map_err(|e| CodecError::Payload(e.to_string()))
    }

    pub fn as_str(&self) -> &str {
        self.0.get()
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Box::<RawValue>::deserialize(deserializer).map(Payload)
    }
}

/// Signaling message envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Older clients send `clientType`
    #[serde(default, alias = "clientType", skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<Vec<HostInfo>>,

    #[serde(rename = "hostId", default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,

    #[serde(rename = "message", default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Just enough of a frame to recover its tag when the full decode fails.
#[derive(Deserialize)]
struct TypeProbe {
    #[serde(rename = "type")]
    kind: MessageType,
}

impl Message {
    /// Bare message of the given type
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            id: None,
            role: None,
            from: None,
            target: None,
            payload: None,
            list: None,
            host_id: None,
            text: None,
            timestamp: None,
        }
    }

    pub fn register(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: Some(id.into()),
            role: Some(role),
            ..Self::new(MessageType::Register)
        }
    }

    pub fn registered(id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: Some(id.into()),
            timestamp: Some(timestamp),
            ..Self::new(MessageType::Registered)
        }
    }

    pub fn list_hosts() -> Self {
        Self::new(MessageType::ListHosts)
    }

    pub fn hosts(list: Vec<HostInfo>) -> Self {
        Self {
            list: Some(list),
            ..Self::new(MessageType::Hosts)
        }
    }

    pub fn hosts_updated(list: Vec<HostInfo>) -> Self {
        Self {
            list: Some(list),
            ..Self::new(MessageType::HostsUpdated)
        }
    }

    /// Outbound negotiation message addressed to `target`
    pub fn signal(kind: MessageType, target: impl Into<String>, payload: Payload) -> Self {
        Self {
            target: Some(target.into()),
            payload: Some(payload),
            ..Self::new(kind)
        }
    }

    /// Negotiation message as delivered by the relay
    pub fn relayed(kind: MessageType, from: impl Into<String>, payload: Option<Payload>, timestamp: i64) -> Self {
        Self {
            from: Some(from.into()),
            payload,
            timestamp: Some(timestamp),
            ..Self::new(kind)
        }
    }

    pub fn ping() -> Self {
        Self::new(MessageType::Ping)
    }

    pub fn pong() -> Self {
        Self::new(MessageType::Pong)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::new(MessageType::Error)
        }
    }

    pub fn host_disconnected(host_id: impl Into<String>) -> Self {
        Self {
            host_id: Some(host_id.into()),
            ..Self::new(MessageType::HostDisconnected)
        }
    }

    /// Serialize to JSON text
    pub fn to_json(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Parse a text frame
    pub fn from_json(json: &str) -> Result<Self, CodecError> {
        Self::from_slice(json.as_bytes())
    }

    /// Parse a text or binary frame
    pub fn from_slice(data: &[u8]) -> Result<Self, CodecError> {
        match serde_json::from_slice::<Message>(data) {
            Ok(message) => Ok(message),
            Err(e) => match serde_json::from_slice::<TypeProbe>(data) {
                Ok(probe) => Err(CodecError::Invalid {
                    kind: probe.kind,
                    reason: e.to_string(),
                }),
                Err(_) => Err(CodecError::Malformed(e.to_string())),
            },
        }
    }
}
