//! Streaming-plugin mountpoint requests.
//!
//! Builds the create/info/destroy bodies and interprets the plugin payloads
//! that come back. Creation asks the gateway to pick every port (value 0);
//! the real ports are read from a follow-up info query.

use crate::errors::GatewayError;
use crate::gateway::link::GatewayLink;
use crate::gateway::protocol::{InboundMessage, OutboundRequest};
use crate::types::{MountpointMode, MountpointPorts, StreamSettings};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const STATUS_CREATED: &str = "created";
const STATUS_INFO: &str = "info";

/// Everything needed to create one mountpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountpointRequest {
    pub id: u64,
    pub mode: MountpointMode,
    pub settings: StreamSettings,
}

impl MountpointRequest {
    pub fn new(mode: MountpointMode, settings: StreamSettings) -> Self {
        Self {
            id: new_mountpoint_id(),
            mode,
            settings,
        }
    }

    pub fn create_body(&self) -> Value {
        let mut body = json!({
            "request": "create",
            "type": "rtp",
            "id": self.id,
            "name": self.settings.name,
            "description": self.settings.description,
            "permanent": false,
            "audio": false,
            "data": true,
            "dataport": 0,
            "datatype": "binary",
        });

        match self.mode {
            MountpointMode::AvData => {
                if let Some(fields) = body.as_object_mut() {
                    fields.insert("video".into(), json!(true));
                    fields.insert("videoport".into(), json!(0));
                    fields.insert("videortcpport".into(), json!(0));
                    fields.insert("videopt".into(), json!(self.settings.video_payload_type));
                    fields.insert("videocodec".into(), json!(self.settings.video_codec));
                    fields.insert("videofmtp".into(), json!(self.settings.video_fmtp));
                    fields.insert("videobufferkf".into(), json!(true));
                }
            }
            MountpointMode::DataOnly => {
                if let Some(fields) = body.as_object_mut() {
                    fields.insert("video".into(), json!(false));
                }
            }
        }
        body
    }
}

/// Fresh numeric mountpoint id, unique per client run.
pub fn new_mountpoint_id() -> u64 {
    // Keep it in 31 bits so gateways that store ids as signed ints accept it.
    let id = (uuid::Uuid::new_v4().as_u128() & 0x7fff_ffff) as u64;
    id.max(1)
}

pub fn info_body(stream_id: u64) -> Value {
    json!({ "request": "info", "id": stream_id })
}

pub fn destroy_body(stream_id: u64) -> Value {
    json!({ "request": "destroy", "id": stream_id, "permanent": false })
}

#[derive(Debug, Deserialize)]
struct StreamingPayload {
    streaming: Option<String>,
    error: Option<String>,
    error_code: Option<i64>,
    stream: Option<StreamRef>,
    info: Option<MountpointInfo>,
}

#[derive(Debug, Deserialize)]
struct StreamRef {
    id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct MountpointInfo {
    #[serde(default)]
    media: Vec<MediaDescriptor>,
}

#[derive(Debug, Deserialize)]
struct MediaDescriptor {
    #[serde(rename = "type")]
    kind: String,
    port: Option<u16>,
}

fn streaming_payload(message: &InboundMessage) -> Result<StreamingPayload, GatewayError> {
    let payload = message
        .plugin_payload()
        .ok_or_else(|| GatewayError::SetupError("response carries no plugin data".to_string()))?;
    serde_json::from_value(payload.clone()).map_err(|e| {
        GatewayError::SetupError(format!("unexpected streaming plugin payload: {}", e))
    })
}

fn plugin_failure(payload: &StreamingPayload, doing: &str) -> GatewayError {
    let reason = payload
        .error
        .clone()
        .or_else(|| payload.streaming.clone())
        .unwrap_or_else(|| "no reason given".to_string());
    match payload.error_code {
        Some(code) => GatewayError::SetupError(format!("{} failed ({}): {}", doing, code, reason)),
        None => GatewayError::SetupError(format!("{} failed: {}", doing, reason)),
    }
}

/// Stream id from a create response; falls back to `requested_id` if the gateway omits it.
pub fn interpret_created(message: &InboundMessage, requested_id: u64) -> Result<u64, GatewayError> {
    let payload = streaming_payload(message)?;
    if payload.streaming.as_deref() != Some(STATUS_CREATED) {
        return Err(plugin_failure(&payload, "mountpoint creation"));
    }
    Ok(payload
        .stream
        .and_then(|s| s.id)
        .unwrap_or(requested_id))
}

/// Assigned ports from an info response. Missing media entries leave ports unset.
pub fn interpret_info(message: &InboundMessage) -> Result<MountpointPorts, GatewayError> {
    let payload = streaming_payload(message)?;
    if payload.error.is_some() || payload.streaming.as_deref() != Some(STATUS_INFO) {
        return Err(plugin_failure(&payload, "mountpoint info"));
    }

    let mut ports = MountpointPorts::default();
    for media in payload.info.map(|i| i.media).unwrap_or_default() {
        match media.kind.as_str() {
            "video" if ports.video.is_none() => ports.video = media.port,
            "data" if ports.data.is_none() => ports.data = media.port,
            _ => {}
        }
    }
    ports.video_control = ports.video.and_then(|p| p.checked_add(1));
    Ok(ports)
}

/// Create the mountpoint and return its stream id.
pub async fn create(
    link: &GatewayLink,
    session_id: u64,
    handle_id: u64,
    request: &MountpointRequest,
    timeout: Duration,
) -> Result<u64, GatewayError> {
    let response = link
        .request(
            OutboundRequest::plugin_message(session_id, handle_id, request.create_body()),
            timeout,
        )
        .await?;
    let stream_id = interpret_created(&response, request.id)?;
    log::info!(
        "Created {} mountpoint {} ('{}')",
        request.mode.as_str(),
        stream_id,
        request.settings.name
    );
    Ok(stream_id)
}

pub async fn query_ports(
    link: &GatewayLink,
    session_id: u64,
    handle_id: u64,
    stream_id: u64,
    timeout: Duration,
) -> Result<MountpointPorts, GatewayError> {
    let response = link
        .request(
            OutboundRequest::plugin_message(session_id, handle_id, info_body(stream_id)),
            timeout,
        )
        .await?;
    interpret_info(&response)
}

/// Best-effort destroy. Callers log the error and carry on.
pub async fn destroy(
    link: &GatewayLink,
    session_id: u64,
    handle_id: u64,
    stream_id: u64,
    timeout: Duration,
) -> Result<(), GatewayError> {
    let response = link
        .request(
            OutboundRequest::plugin_message(session_id, handle_id, destroy_body(stream_id)),
            timeout,
        )
        .await
        .map_err(|e| GatewayError::TeardownError(format!("destroy mountpoint {}: {}", stream_id, e)))?;

    let payload = streaming_payload(&response)
        .map_err(|e| GatewayError::TeardownError(e.to_string()))?;
    if let Some(reason) = payload.error {
        return Err(GatewayError::TeardownError(format!(
            "destroy mountpoint {}: {}",
            stream_id, reason
        )));
    }
    log::info!("Destroyed mountpoint {}", stream_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin_response(data: Value) -> InboundMessage {
        let text = json!({
            "janus": "success",
            "transaction": "4",
            "plugindata": { "plugin": "janus.plugin.streaming", "data": data }
        })
        .to_string();
        InboundMessage::parse(&text).unwrap()
    }

    #[test]
    fn test_data_only_body_omits_video_fields() {
        let request = MountpointRequest::new(MountpointMode::DataOnly, StreamSettings::default());
        let body = request.create_body();
        assert_eq!(body["video"], json!(false));
        assert_eq!(body["audio"], json!(false));
        assert_eq!(body["dataport"], json!(0));
        assert_eq!(body["datatype"], json!("binary"));
        for field in ["videoport", "videortcpport", "videopt", "videofmtp", "videobufferkf"] {
            assert!(body.get(field).is_none(), "unexpected {}", field);
        }
    }

    #[test]
    fn test_av_data_body_requests_auto_ports() {
        let request = MountpointRequest::new(MountpointMode::AvData, StreamSettings::default());
        let body = request.create_body();
        assert_eq!(body["video"], json!(true));
        assert_eq!(body["videoport"], json!(0));
        assert_eq!(body["videortcpport"], json!(0));
        assert_eq!(body["videopt"], json!(96));
        assert_eq!(body["videobufferkf"], json!(true));
        assert_eq!(body["dataport"], json!(0));
        assert_eq!(body["id"], json!(request.id));
    }

    #[test]
    fn test_created_falls_back_to_requested_id() {
        let response = plugin_response(json!({ "streaming": "created", "create": "ok" }));
        assert_eq!(interpret_created(&response, 77).unwrap(), 77);

        let response = plugin_response(json!({ "streaming": "created", "stream": { "id": 12 } }));
        assert_eq!(interpret_created(&response, 77).unwrap(), 12);
    }

    #[test]
    fn test_creation_error_carries_reason() {
        let response = plugin_response(json!({
            "streaming": "event",
            "error_code": 456,
            "error": "Can't bind to port"
        }));
        let err = interpret_created(&response, 1).unwrap_err();
        match err {
            GatewayError::SetupError(msg) => assert!(msg.contains("Can't bind to port")),
            other => panic!("expected setup error, got {:?}", other),
        }
    }

    #[test]
    fn test_info_with_data_only_leaves_video_unset() {
        let response = plugin_response(json!({
            "streaming": "info",
            "info": { "id": 5, "media": [ { "type": "data", "port": 5002 } ] }
        }));
        let ports = interpret_info(&response).unwrap();
        assert_eq!(ports.data, Some(5002));
        assert_eq!(ports.video, None);
        assert_eq!(ports.video_control, None);
    }

    #[test]
    fn test_info_derives_video_control_port() {
        let response = plugin_response(json!({
            "streaming": "info",
            "info": { "media": [
                { "type": "video", "port": 6004, "mid": "v" },
                { "type": "data", "port": 6010 }
            ] }
        }));
        let ports = interpret_info(&response).unwrap();
        assert_eq!(ports.video, Some(6004));
        assert_eq!(ports.video_control, Some(6005));
        assert_eq!(ports.data, Some(6010));
    }

    #[test]
    fn test_mountpoint_ids_are_positive() {
        for _ in 0..100 {
            let id = new_mountpoint_id();
            assert!(id >= 1 && id <= 0x7fff_ffff);
        }
    }
}
