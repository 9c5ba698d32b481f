//! The HTTP surface.

pub mod helpers;
pub mod peer;
pub mod public;

use crate::context::NodeContext;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tracing::debug;

/// Request/response logging, gated by the LOG_INCLUDE_* keys.
async fn log_requests(State(ctx): State<Arc<NodeContext>>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    if ctx.config.log.include_request_content {
        debug!(%method, %uri, "request");
    }
    let started = std::time::Instant::now();
    let response = next.run(req).await;
    if ctx.config.log.include_response_content {
        debug!(
            %method,
            %uri,
            status = %response.status(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "response"
        );
    }
    response
}

/// All routes of the node, public and signed-peer.
pub fn router(ctx: Arc<NodeContext>) -> Router {
    Router::new()
        // Public, unsigned, rate-limited.
        .route("/", get(public::root))
        .route("/get_status", get(public::get_status))
        .route("/get_peers", get(public::get_peers).post(public::get_peers))
        .route("/get_block", get(public::get_block))
        .route("/get_blocks", get(public::get_blocks))
        .route("/get_transaction", get(public::get_transaction))
        .route("/get_mining_info", get(public::get_mining_info))
        .route("/get_pending_transactions", get(public::get_pending_transactions))
        .route("/get_address_info", get(public::get_address_info))
        .route("/sync_blockchain", get(public::sync_blockchain))
        .route("/submit_block", post(public::submit_block))
        .route("/submit_tx", post(public::submit_tx))
        // Signed peer endpoints.
        .route("/push_block", post(peer::push_block))
        .route("/push_blocks", post(peer::push_blocks))
        .route("/push_tx", post(peer::push_tx))
        .route("/get_mempool_hashes", post(peer::get_mempool_hashes))
        .route("/get_transactions_by_hash", post(peer::get_transactions_by_hash))
        .route("/handshake/challenge", get(peer::handshake_challenge))
        .layer(middleware::from_fn_with_state(ctx.clone(), log_requests))
        .with_state(ctx)
}
