//! Public, unsigned endpoints.

use crate::context::NodeContext;
use crate::http::helpers::{
    fail, flag, ok_json, ok_json_pretty, rate_key, unix_now,
};
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use denaro_chain::BlockOutcome;
use denaro_protocol::Transaction;
use denaro_storage::PendingOrder;
use denaro_sync::wire::{BlockMsg, BlockResult, BlockSummary, StatusResult};
use denaro_types::constants::{MAX_BLOCKS_PER_SUBMISSION, NODE_VERSION};
use denaro_types::{hash_from_hex, hash_to_hex, NodeError};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

type Ctx = State<Arc<NodeContext>>;
type Params = Query<HashMap<String, String>>;

const GITHUB_REPOSITORY: &str = "https://github.com/denaro-coin/denaro";

pub async fn root(State(ctx): Ctx) -> Response {
    ok_json(serde_json::json!({
        "node_version": NODE_VERSION,
        "github_repository": GITHUB_REPOSITORY,
        "api_docs": ctx.config.api_docs_url(),
    }))
}

pub async fn get_status(State(ctx): Ctx) -> Response {
    let tip = match ctx.store.get_tip().await {
        Ok(tip) => tip,
        Err(e) => return fail(&e.into()),
    };
    ok_json(StatusResult {
        node_id: ctx.identity.node_id().to_string(),
        pubkey: ctx.identity.pubkey_hex().to_string(),
        url: ctx.config.self_url.clone(),
        is_public: ctx.is_public(),
        node_version: NODE_VERSION.to_string(),
        height: tip.as_ref().map(|b| b.id).unwrap_or(0),
        last_block_hash: tip.map(|b| hash_to_hex(&b.hash)),
        uptime_seconds: ctx.uptime_seconds(),
    })
}

pub async fn get_peers(
    State(ctx): Ctx,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Params,
    headers: HeaderMap,
) -> Response {
    if !ctx.limits.public_read.check(&rate_key(&headers, &addr)) {
        return fail(&NodeError::RateLimited);
    }
    let now = unix_now();
    let only_public = flag(&params, "public");
    let only_private = flag(&params, "private");
    let show_banned = flag(&params, "show_banned");

    let mut peers = ctx.peers.all();
    peers.retain(|p| {
        let banned = p.banned_until.map_or(false, |until| until > now);
        if banned && !show_banned {
            return false;
        }
        if only_public && !only_private && !p.is_public {
            return false;
        }
        if only_private && !only_public && p.is_public {
            return false;
        }
        true
    });
    peers.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));

    let public_count = peers.iter().filter(|p| p.is_public).count();
    let listed: Vec<serde_json::Value> = peers
        .iter()
        .map(|p| {
            serde_json::json!({
                "node_id": p.node_id,
                "is_public": p.is_public,
                // Private peers stay unroutable to strangers.
                "url": if p.is_public { p.url.clone() } else { None },
                "node_version": p.node_version,
                "reputation_score": p.reputation_score,
                "last_seen": p.last_seen,
                "banned_until": p.banned_until,
            })
        })
        .collect();

    let mut result = serde_json::json!({ "peers": listed });
    if flag(&params, "show_stats") {
        result["stats"] = serde_json::json!({
            "count": peers.len(),
            "public": public_count,
            "private": peers.len() - public_count,
        });
    }
    ok_json_pretty(result, flag(&params, "pretty"))
}

pub async fn get_block(
    State(ctx): Ctx,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Params,
    headers: HeaderMap,
) -> Response {
    if !ctx.limits.public_read.check(&rate_key(&headers, &addr)) {
        return fail(&NodeError::RateLimited);
    }
    let record = if let Some(raw) = params.get("id") {
        let Ok(height) = raw.parse::<u64>() else {
            return fail(&NodeError::MalformedInput("id must be a height".into()));
        };
        ctx.store.get_block_by_height(height).await
    } else if let Some(raw) = params.get("hash") {
        let Some(hash) = hash_from_hex(raw) else {
            return fail(&NodeError::MalformedInput("bad block hash".into()));
        };
        ctx.store.get_block_by_hash(&hash).await
    } else {
        return fail(&NodeError::MalformedInput(
            "either id or hash is required".into(),
        ));
    };
    let record = match record {
        Ok(Some(record)) => record,
        Ok(None) => return fail(&NodeError::MalformedInput("block not found".into())),
        Err(e) => return fail(&e.into()),
    };
    let transactions = match ctx.store.get_block_transactions(&record.hash).await {
        Ok(txs) => txs.into_iter().map(|t| t.tx_hex).collect(),
        Err(e) => return fail(&e.into()),
    };
    ok_json_pretty(
        BlockResult {
            block: BlockSummary::from_record(&record),
            transactions,
        },
        flag(&params, "pretty"),
    )
}

pub async fn get_blocks(
    State(ctx): Ctx,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Params,
    headers: HeaderMap,
) -> Response {
    if !ctx.limits.public_read.check(&rate_key(&headers, &addr)) {
        return fail(&NodeError::RateLimited);
    }
    let offset: u64 = match params.get("offset").map(|r| r.parse()) {
        Some(Ok(v)) => v,
        _ => return fail(&NodeError::MalformedInput("offset is required".into())),
    };
    let limit: u64 = match params.get("limit").map(|r| r.parse()) {
        Some(Ok(v)) if v >= 1 => v,
        _ => return fail(&NodeError::MalformedInput("limit is required".into())),
    };
    if limit > MAX_BLOCKS_PER_SUBMISSION as u64 {
        return fail(&NodeError::MalformedInput(format!(
            "limit capped at {MAX_BLOCKS_PER_SUBMISSION}"
        )));
    }
    let records = match ctx.store.get_block_range(offset, offset + limit - 1).await {
        Ok(records) => records,
        Err(e) => return fail(&e.into()),
    };
    let mut blocks = Vec::with_capacity(records.len());
    for record in records {
        let txs = match ctx.store.get_block_transactions(&record.hash).await {
            Ok(txs) => txs,
            Err(e) => return fail(&e.into()),
        };
        blocks.push(BlockMsg {
            id: record.id,
            block_content: record.content,
            // The coinbase is reconstructed by the receiving node.
            txs: txs
                .into_iter()
                .filter(|t| !t.inputs_addresses.is_empty())
                .map(|t| t.tx_hex)
                .collect(),
        });
    }
    ok_json_pretty(blocks, flag(&params, "pretty"))
}

pub async fn get_transaction(
    State(ctx): Ctx,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Params,
    headers: HeaderMap,
) -> Response {
    if !ctx.limits.public_read.check(&rate_key(&headers, &addr)) {
        return fail(&NodeError::RateLimited);
    }
    let Some(hash) = params.get("hash").and_then(|raw| hash_from_hex(raw)) else {
        return fail(&NodeError::MalformedInput("bad transaction hash".into()));
    };
    match ctx.store.get_transaction(&hash).await {
        Ok(Some(tx)) => ok_json_pretty(
            serde_json::json!({
                "tx_hash": hash_to_hex(&tx.tx_hash),
                "block_hash": hash_to_hex(&tx.block_hash),
                "tx_hex": tx.tx_hex,
                "inputs_addresses": tx.inputs_addresses,
                "outputs_addresses": tx.outputs_addresses,
                "outputs_amounts": tx.outputs_amounts
                    .iter()
                    .map(|a| a.to_string())
                    .collect::<Vec<_>>(),
                "fees": tx.fees.to_string(),
                "time_received": tx.time_received,
            }),
            flag(&params, "pretty"),
        ),
        Ok(None) => fail(&NodeError::MalformedInput("transaction not found".into())),
        Err(e) => fail(&e.into()),
    }
}

pub async fn get_mining_info(
    State(ctx): Ctx,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Params,
    headers: HeaderMap,
) -> Response {
    if !ctx.limits.public_read.check(&rate_key(&headers, &addr)) {
        return fail(&NodeError::RateLimited);
    }
    let info = match ctx.chain.mining_info().await {
        Ok(info) => info,
        Err(e) => return fail(&e),
    };
    ok_json_pretty(
        serde_json::json!({
            "difficulty": info.difficulty.as_f64(),
            "last_block": info.last_block.as_ref().map(BlockSummary::from_record),
            "pending_transactions": info.pending.iter().map(Transaction::to_hex).collect::<Vec<_>>(),
            "pending_transactions_hashes": info.pending_hashes.iter().map(hash_to_hex).collect::<Vec<_>>(),
            "merkle_root": hash_to_hex(&info.merkle_root),
        }),
        flag(&params, "pretty"),
    )
}

pub async fn get_pending_transactions(
    State(ctx): Ctx,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Params,
    headers: HeaderMap,
) -> Response {
    if !ctx.limits.public_read.check(&rate_key(&headers, &addr)) {
        return fail(&NodeError::RateLimited);
    }
    match ctx.store.list_pending(PendingOrder::FeeDesc).await {
        Ok(pending) => ok_json_pretty(
            pending
                .into_iter()
                .take(1024)
                .map(|p| p.tx_hex)
                .collect::<Vec<_>>(),
            flag(&params, "pretty"),
        ),
        Err(e) => fail(&e.into()),
    }
}

pub async fn get_address_info(
    State(ctx): Ctx,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Params,
    headers: HeaderMap,
) -> Response {
    if !ctx.limits.public_read.check(&rate_key(&headers, &addr)) {
        return fail(&NodeError::RateLimited);
    }
    let Some(address) = params.get("address") else {
        return fail(&NodeError::MalformedInput("address is required".into()));
    };
    if !denaro_crypto::is_valid_address(address) {
        return fail(&NodeError::MalformedInput("invalid address format".into()));
    }
    let outputs = match ctx.store.get_unspent_for_address(address).await {
        Ok(outputs) => outputs,
        Err(e) => return fail(&e.into()),
    };
    let balance: denaro_types::Amount = outputs.iter().map(|o| o.amount).sum();
    let spendable: Vec<serde_json::Value> = outputs
        .iter()
        .map(|o| {
            serde_json::json!({
                "tx_hash": hash_to_hex(&o.outpoint.tx_hash),
                "index": o.outpoint.index,
                "amount": o.amount.to_string(),
            })
        })
        .collect();
    let mut result = serde_json::json!({
        "balance": balance.to_string(),
        "spendable_outputs": spendable,
    });
    if flag(&params, "show_pending") {
        match ctx.store.list_pending(PendingOrder::OldestFirst).await {
            Ok(pending) => {
                let involved: Vec<String> = pending
                    .into_iter()
                    .filter(|p| p.inputs_addresses.iter().any(|a| a == address))
                    .map(|p| p.tx_hex)
                    .collect();
                result["pending_transactions"] = serde_json::json!(involved);
            }
            Err(e) => return fail(&e.into()),
        }
    }
    ok_json_pretty(result, flag(&params, "pretty"))
}

pub async fn sync_blockchain(State(ctx): Ctx, Query(params): Params) -> Response {
    if ctx.sync.is_syncing() {
        return fail(&NodeError::SyncInProgress);
    }
    let node_id = params.get("node_id").cloned();
    let sync = ctx.sync.clone();
    tokio::spawn(async move {
        if let Err(e) = sync.sync_with(node_id).await {
            info!(error = %e, "requested sync failed");
        }
    });
    ok_json("synchronisation started")
}

#[derive(Debug, Deserialize)]
pub struct SubmitBlockBody {
    #[serde(default)]
    pub id: Option<u64>,
    pub block_content: String,
    #[serde(default)]
    pub txs: Vec<String>,
}

/// Decode the tx list of a submission: full hex payloads inline, 64-char
/// strings are references into the pending pool.
pub async fn decode_submission_txs(
    ctx: &NodeContext,
    txs: &[String],
) -> Result<Vec<Transaction>, NodeError> {
    let mut inline = Vec::new();
    let mut refs = Vec::new();
    for entry in txs {
        if entry.len() == 64 {
            refs.push(
                hash_from_hex(entry)
                    .ok_or_else(|| NodeError::MalformedInput("bad transaction ref".into()))?,
            );
        } else {
            inline.push(Transaction::from_hex(entry)?);
        }
    }
    if !refs.is_empty() {
        inline.extend(ctx.chain.hydrate_tx_refs(&refs).await?);
    }
    Ok(inline)
}

/// Shared submission path for miners and authenticated peers.
pub async fn process_block_submission(
    ctx: &Arc<NodeContext>,
    body: &SubmitBlockBody,
    skip_propagation_to: Option<String>,
) -> Result<BlockOutcome, NodeError> {
    let transactions = decode_submission_txs(ctx, &body.txs).await?;
    let tx_hexes: Vec<String> = transactions.iter().map(Transaction::to_hex).collect();
    let outcome = ctx
        .chain
        .submit_block(&body.block_content, transactions, unix_now())
        .await?;
    if matches!(outcome, BlockOutcome::Applied | BlockOutcome::Reorg { .. }) {
        let height = ctx.chain.height().await.unwrap_or_default();
        let msg = BlockMsg {
            id: height,
            block_content: body.block_content.clone(),
            txs: tx_hexes,
        };
        let sync = ctx.sync.clone();
        tokio::spawn(async move {
            sync.propagate_block(msg, skip_propagation_to).await;
        });
    }
    Ok(outcome)
}

pub fn outcome_response(outcome: BlockOutcome) -> Response {
    match outcome {
        BlockOutcome::Applied => ok_json("block accepted"),
        BlockOutcome::Reorg { depth } => {
            ok_json(format!("block accepted, reorganised {depth} blocks"))
        }
        BlockOutcome::SideChain => fail(&NodeError::SideChainAccepted),
        BlockOutcome::Stale => fail(&NodeError::Stale),
    }
}

pub async fn submit_block(
    State(ctx): Ctx,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !ctx.limits.submit.check(&rate_key(&headers, &addr)) {
        return fail(&NodeError::RateLimited);
    }
    let parsed: SubmitBlockBody = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => return fail(&NodeError::MalformedInput(e.to_string())),
    };
    match process_block_submission(&ctx, &parsed, None).await {
        Ok(outcome) => {
            if let Some(id) = parsed.id {
                info!(id, from = %addr.ip(), "miner submission processed");
            }
            outcome_response(outcome)
        }
        Err(e) => fail(&e),
    }
}

#[derive(Debug, Deserialize)]
struct SubmitTxBody {
    tx_hex: String,
}

pub async fn submit_tx(
    State(ctx): Ctx,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !ctx.limits.submit.check(&rate_key(&headers, &addr)) {
        return fail(&NodeError::RateLimited);
    }
    let parsed: SubmitTxBody = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => return fail(&NodeError::MalformedInput(e.to_string())),
    };
    let tx = match Transaction::from_hex(&parsed.tx_hex) {
        Ok(tx) => tx,
        Err(e) => return fail(&e),
    };
    match ctx.chain.admit_transaction(&tx, unix_now()).await {
        Ok(()) => {
            let sync = ctx.sync.clone();
            tokio::spawn(async move {
                sync.propagate_tx(parsed.tx_hex, None).await;
            });
            ok_json("transaction accepted")
        }
        Err(e) => fail(&e),
    }
}
