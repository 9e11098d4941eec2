//! Gateway wire envelopes.
//!
//! Outbound requests are serialized from [`OutboundRequest`]. Inbound text is
//! decoded into [`InboundMessage`]; a `janus` value outside [`MessageKind`]
//! is rejected as malformed rather than guessed at.

use crate::errors::GatewayError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Plugin the client attaches to
pub const STREAMING_PLUGIN: &str = "janus.plugin.streaming";

/// WebSocket sub-protocol spoken by the gateway
pub const GATEWAY_SUBPROTOCOL: &str = "janus-protocol";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Create,
    Attach,
    Message,
    Keepalive,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundRequest {
    pub janus: Command,
    /// Stamped by the correlator just before transmission.
    pub transaction: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl OutboundRequest {
    fn bare(janus: Command) -> Self {
        Self {
            janus,
            transaction: String::new(),
            session_id: None,
            handle_id: None,
            plugin: None,
            body: None,
        }
    }

    pub fn create_session() -> Self {
        Self::bare(Command::Create)
    }

    pub fn attach(session_id: u64, plugin: &str) -> Self {
        Self {
            session_id: Some(session_id),
            plugin: Some(plugin.to_string()),
            ..Self::bare(Command::Attach)
        }
    }

    pub fn plugin_message(session_id: u64, handle_id: u64, body: Value) -> Self {
        Self {
            session_id: Some(session_id),
            handle_id: Some(handle_id),
            body: Some(body),
            ..Self::bare(Command::Message)
        }
    }

    pub fn keepalive(session_id: u64) -> Self {
        Self {
            session_id: Some(session_id),
            ..Self::bare(Command::Keepalive)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Success,
    Error,
    Ack,
    Event,
    Webrtcup,
    Hangup,
    Media,
    Slowlink,
    Trickle,
    Detached,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IdData {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PluginData {
    #[serde(default)]
    pub plugin: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundMessage {
    pub janus: MessageKind,
    pub transaction: Option<String>,
    pub session_id: Option<u64>,
    pub sender: Option<u64>,
    pub data: Option<IdData>,
    pub plugindata: Option<PluginData>,
    pub error: Option<ErrorBody>,
    pub reason: Option<String>,
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        serde_json::from_str(text).map_err(|e| GatewayError::MalformedMessage(e.to_string()))
    }

    /// Completes a request: success, error, or an event carrying a plugin result.
    pub fn is_terminal(&self) -> bool {
        match self.janus {
            MessageKind::Success | MessageKind::Error => true,
            MessageKind::Event => self.plugindata.is_some(),
            _ => false,
        }
    }

    /// Converts an `error` envelope into a protocol error.
    pub fn into_result(self) -> Result<Self, GatewayError> {
        if self.janus != MessageKind::Error {
            return Ok(self);
        }
        let body = self.error.unwrap_or(ErrorBody {
            code: 0,
            reason: "unspecified gateway error".to_string(),
        });
        Err(GatewayError::ProtocolError {
            code: body.code,
            reason: body.reason,
        })
    }

    /// The `data.id` carried by create/attach responses.
    pub fn data_id(&self) -> Option<u64> {
        self.data.as_ref().map(|d| d.id)
    }

    pub fn plugin_payload(&self) -> Option<&Value> {
        self.plugindata.as_ref().map(|p| &p.data)
    }
}
