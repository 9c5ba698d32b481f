//! Signed peer endpoints. Every handler authenticates the envelope before
//! touching any state; validation failures feed the reputation score.

use crate::context::NodeContext;
use crate::http::helpers::{authenticate, fail, ok_json, unix_now};
use crate::http::public::{outcome_response, process_block_submission, SubmitBlockBody};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use denaro_chain::{BlockOutcome, BlockPayload};
use denaro_peers::PeerEvent;
use denaro_protocol::Transaction;
use denaro_storage::PendingOrder;
use denaro_sync::wire::{BlockMsg, HandshakeResult};
use denaro_types::constants::{MAX_TX_FETCH_LIMIT, NODE_VERSION};
use denaro_types::{hash_from_hex, hash_to_hex, NodeError};
use rand::RngCore;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

type Ctx = State<Arc<NodeContext>>;

fn peer_limited(ctx: &NodeContext, node_id: &str) -> bool {
    !ctx.limits.peer.check(node_id)
}

pub async fn push_block(State(ctx): Ctx, headers: HeaderMap, body: Bytes) -> Response {
    let sender = match authenticate(&ctx, &headers, "POST", "/push_block", &body) {
        Ok(sender) => sender,
        Err(e) => return fail(&e),
    };
    if peer_limited(&ctx, &sender) {
        return fail(&NodeError::RateLimited);
    }
    let parsed: SubmitBlockBody = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            ctx.peers
                .record_event(&sender, PeerEvent::InvalidPayload, unix_now());
            return fail(&NodeError::MalformedInput(e.to_string()));
        }
    };
    match process_block_submission(&ctx, &parsed, Some(sender.clone())).await {
        Ok(outcome) => {
            if matches!(outcome, BlockOutcome::Applied | BlockOutcome::Reorg { .. }) {
                ctx.peers
                    .record_event(&sender, PeerEvent::ValidPayload, unix_now());
            }
            outcome_response(outcome)
        }
        Err(e) => {
            if e.is_validation() {
                ctx.peers
                    .record_event(&sender, PeerEvent::InvalidPayload, unix_now());
            }
            fail(&e)
        }
    }
}

pub async fn push_blocks(State(ctx): Ctx, headers: HeaderMap, body: Bytes) -> Response {
    let sender = match authenticate(&ctx, &headers, "POST", "/push_blocks", &body) {
        Ok(sender) => sender,
        Err(e) => return fail(&e),
    };
    if peer_limited(&ctx, &sender) {
        return fail(&NodeError::RateLimited);
    }
    let batch: Vec<BlockMsg> = match serde_json::from_slice(&body) {
        Ok(batch) => batch,
        Err(e) => {
            ctx.peers
                .record_event(&sender, PeerEvent::InvalidPayload, unix_now());
            return fail(&NodeError::MalformedInput(e.to_string()));
        }
    };
    let mut payloads = Vec::with_capacity(batch.len());
    for msg in batch {
        let mut transactions = Vec::with_capacity(msg.txs.len());
        for tx_hex in &msg.txs {
            match Transaction::from_hex(tx_hex) {
                Ok(tx) => transactions.push(tx),
                Err(e) => {
                    ctx.peers
                        .record_event(&sender, PeerEvent::InvalidPayload, unix_now());
                    return fail(&e);
                }
            }
        }
        payloads.push(BlockPayload {
            content_hex: msg.block_content,
            transactions,
        });
    }
    let outcome = ctx.chain.submit_blocks(payloads, unix_now()).await;
    match outcome.error {
        None => {
            info!(peer = %sender, accepted = outcome.accepted, "bulk submission complete");
            ctx.peers
                .record_event(&sender, PeerEvent::ValidPayload, unix_now());
            ok_json(serde_json::json!({ "accepted": outcome.accepted }))
        }
        Some(e) => {
            if e.is_validation() {
                ctx.peers
                    .record_event(&sender, PeerEvent::InvalidPayload, unix_now());
            }
            fail(&e)
        }
    }
}

#[derive(Debug, Deserialize)]
struct PushTxBody {
    tx_hex: String,
}

pub async fn push_tx(State(ctx): Ctx, headers: HeaderMap, body: Bytes) -> Response {
    let sender = match authenticate(&ctx, &headers, "POST", "/push_tx", &body) {
        Ok(sender) => sender,
        Err(e) => return fail(&e),
    };
    if peer_limited(&ctx, &sender) {
        return fail(&NodeError::RateLimited);
    }
    let parsed: PushTxBody = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => return fail(&NodeError::MalformedInput(e.to_string())),
    };
    let tx = match Transaction::from_hex(&parsed.tx_hex) {
        Ok(tx) => tx,
        Err(e) => {
            ctx.peers
                .record_event(&sender, PeerEvent::InvalidPayload, unix_now());
            return fail(&e);
        }
    };
    match ctx.chain.admit_transaction(&tx, unix_now()).await {
        Ok(()) => {
            ctx.peers
                .record_event(&sender, PeerEvent::ValidPayload, unix_now());
            let sync = ctx.sync.clone();
            let skip = Some(sender);
            tokio::spawn(async move {
                sync.propagate_tx(parsed.tx_hex, skip).await;
            });
            ok_json("transaction accepted")
        }
        Err(e) => {
            if e.is_validation() {
                ctx.peers
                    .record_event(&sender, PeerEvent::InvalidPayload, unix_now());
            }
            fail(&e)
        }
    }
}

pub async fn get_mempool_hashes(State(ctx): Ctx, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(e) = authenticate(&ctx, &headers, "POST", "/get_mempool_hashes", &body) {
        return fail(&e);
    }
    match ctx.store.list_pending(PendingOrder::OldestFirst).await {
        Ok(pending) => ok_json(
            pending
                .iter()
                .map(|p| hash_to_hex(&p.tx_hash))
                .collect::<Vec<_>>(),
        ),
        Err(e) => fail(&e.into()),
    }
}

#[derive(Debug, Deserialize)]
struct TxFetchBody {
    hashes: Vec<String>,
}

pub async fn get_transactions_by_hash(
    State(ctx): Ctx,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let sender = match authenticate(&ctx, &headers, "POST", "/get_transactions_by_hash", &body) {
        Ok(sender) => sender,
        Err(e) => return fail(&e),
    };
    let parsed: TxFetchBody = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => return fail(&NodeError::MalformedInput(e.to_string())),
    };
    if parsed.hashes.len() > MAX_TX_FETCH_LIMIT {
        ctx.peers
            .record_event(&sender, PeerEvent::ProtocolViolation, unix_now());
        return fail(&NodeError::InvalidStructure(format!(
            "at most {MAX_TX_FETCH_LIMIT} hashes per request"
        )));
    }
    let mut hashes = Vec::with_capacity(parsed.hashes.len());
    for raw in &parsed.hashes {
        match hash_from_hex(raw) {
            Some(hash) => hashes.push(hash),
            None => {
                ctx.peers
                    .record_event(&sender, PeerEvent::InvalidPayload, unix_now());
                return fail(&NodeError::MalformedInput("bad transaction hash".into()));
            }
        }
    }
    match ctx.store.get_pending_by_hashes(&hashes).await {
        Ok(found) => ok_json(found.into_iter().map(|p| p.tx_hex).collect::<Vec<_>>()),
        Err(e) => fail(&e.into()),
    }
}

/// Server side of the handshake: hand out a nonce along with our identity
/// and chain state. The caller's identity arrives in its envelope.
pub async fn handshake_challenge(State(ctx): Ctx, headers: HeaderMap) -> Response {
    if let Err(e) = authenticate(&ctx, &headers, "GET", "/handshake/challenge", b"") {
        return fail(&e);
    }
    let tip = match ctx.store.get_tip().await {
        Ok(tip) => tip,
        Err(e) => return fail(&e.into()),
    };
    let mut challenge = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut challenge);
    ok_json(HandshakeResult {
        challenge: hex::encode(challenge),
        node_id: ctx.identity.node_id().to_string(),
        pubkey: ctx.identity.pubkey_hex().to_string(),
        url: ctx.config.self_url.clone(),
        is_public: ctx.is_public(),
        node_version: NODE_VERSION.to_string(),
        height: tip.as_ref().map(|b| b.id).unwrap_or(0),
        last_block_hash: tip.map(|b| hash_to_hex(&b.hash)),
    })
}
