//! Response envelopes, error → status mapping, query flags and the signed
//! peer authentication path.

use crate::context::NodeContext;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use denaro_peers::envelope::{
    verify_envelope, Envelope, HDR_NODE_ID, HDR_PUBKEY, HDR_SIGNATURE, HDR_TIMESTAMP, HDR_VERSION,
};
use denaro_peers::PeerEvent;
use denaro_types::{ApiResponse, NodeError};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// HTTP status for an error kind. Validation failures are the caller's
/// fault; infrastructure failures are ours.
pub fn status_for(err: &NodeError) -> StatusCode {
    match err {
        NodeError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        NodeError::PeerUnauthenticated(_) => StatusCode::UNAUTHORIZED,
        NodeError::PeerBanned => StatusCode::FORBIDDEN,
        NodeError::SyncInProgress | NodeError::StorageUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        NodeError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        NodeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        NodeError::BlockTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::BAD_REQUEST,
    }
}

pub fn ok_json<T: Serialize>(result: T) -> Response {
    Json(ApiResponse::ok(result)).into_response()
}

/// Pretty rendering when the `pretty` flag is present.
pub fn ok_json_pretty<T: Serialize>(result: T, pretty: bool) -> Response {
    if !pretty {
        return ok_json(result);
    }
    match serde_json::to_string_pretty(&ApiResponse::ok(result)) {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "application/json")],
            body,
        )
            .into_response(),
        Err(e) => fail(&NodeError::Internal(e.to_string())),
    }
}

pub fn fail(err: &NodeError) -> Response {
    (status_for(err), Json(ApiResponse::<()>::err(err))).into_response()
}

/// Presence-only boolean query flags: `?pretty` ≡ `?pretty=true`.
pub fn flag(params: &HashMap<String, String>, name: &str) -> bool {
    match params.get(name).map(String::as_str) {
        Some("false") | Some("0") => false,
        Some(_) => true,
        None => false,
    }
}

/// Rate-limit key: authenticated peers by node id, everyone else by IP.
pub fn rate_key(headers: &HeaderMap, addr: &SocketAddr) -> String {
    headers
        .get(HDR_NODE_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| addr.ip().to_string())
}

fn header(headers: &HeaderMap, name: &str) -> Result<String, NodeError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| NodeError::PeerUnauthenticated(format!("missing {name} header")))
}

/// Authenticate a signed peer request and register the caller in the
/// registry. Returns the verified node id.
pub fn authenticate(
    ctx: &NodeContext,
    headers: &HeaderMap,
    method: &str,
    path: &str,
    body: &[u8],
) -> Result<String, NodeError> {
    let now = unix_now();
    let envelope = Envelope {
        node_id: header(headers, HDR_NODE_ID)?,
        pubkey: header(headers, HDR_PUBKEY)?,
        node_version: header(headers, HDR_VERSION)?,
        timestamp: header(headers, HDR_TIMESTAMP)?
            .parse()
            .map_err(|_| NodeError::PeerUnauthenticated("timestamp is not a number".into()))?,
        signature: header(headers, HDR_SIGNATURE)?,
    };
    if ctx.peers.is_banned(&envelope.node_id, now) {
        return Err(NodeError::PeerBanned);
    }
    let node_id = verify_envelope(&envelope, method, path, body, now).map_err(|e| {
        ctx.peers
            .record_event(&envelope.node_id, PeerEvent::MalformedEnvelope, now);
        e
    })?;

    // A verified caller becomes (or refreshes) a registry entry; a peer
    // advertising a callback URL is treated as public.
    let advertised = headers
        .get("x-peer-url")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let is_public = advertised.is_some();
    ctx.peers.upsert(
        &node_id,
        &envelope.pubkey,
        advertised,
        is_public,
        &envelope.node_version,
        now,
    );
    ctx.peers.touch(&node_id, now);
    Ok(node_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&NodeError::RateLimited),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_for(&NodeError::PeerUnauthenticated("x".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status_for(&NodeError::PoWInvalid), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&NodeError::StorageUnavailable("down".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_flags_are_presence_only() {
        let mut params = HashMap::new();
        params.insert("pretty".to_string(), String::new());
        assert!(flag(&params, "pretty"));
        assert!(!flag(&params, "show_banned"));
        params.insert("debug".to_string(), "false".to_string());
        assert!(!flag(&params, "debug"));
    }
}
