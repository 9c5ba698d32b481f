//! The outbound peer client.
//!
//! Thin typed wrapper over a shared `reqwest` client. Peer-only calls are
//! signed with the node identity; public reads go out bare.

use crate::wire::{BlockMsg, BlockResult, HandshakeResult, StatusResult};
use denaro_peers::envelope::{
    sign_request, HDR_NODE_ID, HDR_PUBKEY, HDR_SIGNATURE, HDR_TIMESTAMP, HDR_VERSION,
};
use denaro_peers::NodeIdentity;
use denaro_types::{ApiResponse, NodeError};
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct PeerClient {
    base: String,
    http: reqwest::Client,
    identity: Arc<NodeIdentity>,
    /// Advertised in signed requests so the peer can call back.
    self_url: Option<String>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn transport_error(err: reqwest::Error) -> NodeError {
    if err.is_timeout() {
        NodeError::Timeout
    } else {
        NodeError::Internal(format!("peer unreachable: {err}"))
    }
}

fn unwrap_envelope<T>(envelope: ApiResponse<T>) -> Result<T, NodeError> {
    if envelope.ok {
        envelope
            .result
            .ok_or_else(|| NodeError::Internal("peer sent ok without result".into()))
    } else {
        let detail = envelope
            .error
            .map(|e| format!("{}: {}", e.code, e.message))
            .unwrap_or_else(|| "unspecified".into());
        Err(NodeError::Internal(format!("peer error: {detail}")))
    }
}

impl PeerClient {
    pub fn new(
        base: impl Into<String>,
        http: reqwest::Client,
        identity: Arc<NodeIdentity>,
        self_url: Option<String>,
    ) -> PeerClient {
        PeerClient {
            base: base.into().trim_end_matches('/').to_string(),
            http,
            identity,
            self_url,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    async fn get<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T, NodeError> {
        let response = self
            .http
            .get(format!("{}{}", self.base, path_and_query))
            .send()
            .await
            .map_err(transport_error)?;
        let envelope: ApiResponse<T> = response.json().await.map_err(transport_error)?;
        unwrap_envelope(envelope)
    }

    fn signed_headers(&self, method: &str, path: &str, body: &[u8]) -> HeaderMap {
        let envelope = sign_request(&self.identity, method, path, body, unix_now());
        let mut headers = HeaderMap::new();
        let pairs = [
            (HDR_NODE_ID, envelope.node_id),
            (HDR_PUBKEY, envelope.pubkey),
            (HDR_VERSION, envelope.node_version),
            (HDR_TIMESTAMP, envelope.timestamp.to_string()),
            (HDR_SIGNATURE, envelope.signature),
        ];
        for (name, value) in pairs {
            if let Ok(value) = value.parse() {
                headers.insert(name, value);
            }
        }
        if let Some(url) = &self.self_url {
            if let Ok(value) = url.parse() {
                headers.insert("x-peer-url", value);
            }
        }
        headers
    }

    async fn signed_post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, NodeError> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| NodeError::Internal(format!("request serialisation: {e}")))?;
        let headers = self.signed_headers("POST", path, &bytes);
        let response = self
            .http
            .post(format!("{}{}", self.base, path))
            .headers(headers)
            .header("content-type", "application/json")
            .body(bytes)
            .send()
            .await
            .map_err(transport_error)?;
        let envelope: ApiResponse<T> = response.json().await.map_err(transport_error)?;
        unwrap_envelope(envelope)
    }

    async fn signed_get<T: DeserializeOwned>(&self, path: &str) -> Result<T, NodeError> {
        let headers = self.signed_headers("GET", path, b"");
        let response = self
            .http
            .get(format!("{}{}", self.base, path))
            .headers(headers)
            .send()
            .await
            .map_err(transport_error)?;
        let envelope: ApiResponse<T> = response.json().await.map_err(transport_error)?;
        unwrap_envelope(envelope)
    }

    pub async fn get_status(&self) -> Result<StatusResult, NodeError> {
        self.get("/get_status").await
    }

    pub async fn handshake(&self) -> Result<HandshakeResult, NodeError> {
        self.signed_get("/handshake/challenge").await
    }

    pub async fn get_block(&self, height: u64) -> Result<BlockResult, NodeError> {
        self.get(&format!("/get_block?id={height}")).await
    }

    pub async fn get_blocks(&self, offset: u64, limit: u64) -> Result<Vec<BlockMsg>, NodeError> {
        self.get(&format!("/get_blocks?offset={offset}&limit={limit}"))
            .await
    }

    pub async fn push_block(&self, block: &BlockMsg) -> Result<String, NodeError> {
        self.signed_post("/push_block", block).await
    }

    pub async fn push_blocks(&self, blocks: &[BlockMsg]) -> Result<String, NodeError> {
        self.signed_post("/push_blocks", &blocks).await
    }

    pub async fn push_tx(&self, tx_hex: &str) -> Result<String, NodeError> {
        self.signed_post(
            "/push_tx",
            &serde_json::json!({ "tx_hex": tx_hex }),
        )
        .await
    }

    pub async fn get_mempool_hashes(&self) -> Result<Vec<String>, NodeError> {
        self.signed_post("/get_mempool_hashes", &serde_json::json!({}))
            .await
    }

    pub async fn get_transactions_by_hash(
        &self,
        hashes: &[String],
    ) -> Result<Vec<String>, NodeError> {
        self.signed_post(
            "/get_transactions_by_hash",
            &serde_json::json!({ "hashes": hashes }),
        )
        .await
    }
}
