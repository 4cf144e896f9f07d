//! Channel frames: the units crossing the host channel boundary.
//!
//! Outbound traffic is a [`CallFrame`]: a method identity plus an ordered
//! argument list. Inbound traffic is an [`InboundFrame`]: a header that may
//! carry the [`CallToken`] of the call it answers, and an ordered list of
//! [`EventFrame`]s keyed by command name.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque token correlating one outbound call with its single reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallToken(pub String);

impl CallToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for CallToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An invocation of a host service method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallFrame {
    /// Method identity, e.g. `nodeIKernelGroupService/getGroupList`
    pub method: String,

    /// Ordered argument list, passed to the host untouched
    #[serde(default)]
    pub args: Vec<Value>,

    /// Present when the caller expects a reply tagged with this token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<CallToken>,
}

impl CallFrame {
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            args,
            token: None,
        }
    }

    pub fn with_token(mut self, token: CallToken) -> Self {
        self.token = Some(token);
        self
    }
}

/// A single event pushed by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    #[serde(rename = "cmdName")]
    pub command: String,

    #[serde(default)]
    pub payload: Value,
}

impl EventFrame {
    pub fn new(command: impl Into<String>, payload: Value) -> Self {
        Self {
            command: command.into(),
            payload,
        }
    }

    /// The positional payload fields of this event.
    ///
    /// An array payload is a multi-field event; anything else is one field.
    pub fn fields(&self) -> Vec<Value> {
        match &self.payload {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        }
    }

    /// Decode the positional fields into a typed payload.
    ///
    /// A single field decodes directly into `T`; multiple fields decode as a
    /// JSON array, so tuple types describe multi-field events.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let mut fields = self.fields();
        if fields.len() == 1 {
            if let Some(single) = fields.pop() {
                // Fall back to the array form so `(T,)` also works for one field.
                return serde_json::from_value::<T>(single.clone())
                    .or_else(|_| serde_json::from_value::<T>(Value::Array(vec![single])));
            }
        }
        serde_json::from_value(Value::Array(fields))
    }
}

/// Header of an inbound frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameHeader {
    /// Host-side channel or service name that produced the frame
    #[serde(rename = "eventName", default)]
    pub channel: String,

    /// Token of the call this frame answers, if any
    #[serde(rename = "callbackId", default, skip_serializing_if = "Option::is_none")]
    pub token: Option<CallToken>,
}

/// One inbound delivery from the host: `(header, events)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    pub header: FrameHeader,

    #[serde(default)]
    pub events: Vec<EventFrame>,
}

impl InboundFrame {
    /// A plain event delivery with no call token.
    pub fn events(channel: impl Into<String>, events: Vec<EventFrame>) -> Self {
        Self {
            header: FrameHeader {
                channel: channel.into(),
                token: None,
            },
            events,
        }
    }

    /// A reply to the call identified by `token`.
    pub fn reply(channel: impl Into<String>, token: CallToken, events: Vec<EventFrame>) -> Self {
        Self {
            header: FrameHeader {
                channel: channel.into(),
                token: Some(token),
            },
            events,
        }
    }

    /// Frames produced by the host's own logging service carry no useful traffic.
    pub fn is_logger(&self) -> bool {
        self.header.channel.starts_with(crate::commands::LOGGER_CHANNEL_PREFIX)
    }
}
