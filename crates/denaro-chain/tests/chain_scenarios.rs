//! End-to-end consensus scenarios over the in-memory store: genesis,
//! linear growth, fork choice with reorganisation and rollback, schedule
//! enforcement and supply accounting.
//!
//! The genesis difficulty is scaled down to 1.0 so blocks can be mined
//! inline; every other rule runs at production settings.

use denaro_chain::{BlockOutcome, BlockPayload, ChainEngine, ChainParams};
use denaro_crypto::{Keypair, PublicKey, Signature};
use denaro_ledger::Ledger;
use denaro_protocol::{
    block_hash, check_pow, merkle_root, BlockContent, Transaction, TxInput, TxOutput, TX_VERSION,
};
use denaro_storage::{ChainStore, MemoryStore};
use denaro_types::constants::{GENESIS_PREVIOUS_HASH, MAX_SUPPLY, SMALLEST};
use denaro_types::{hash_from_hex, hash_to_hex, Amount, Difficulty, Hash, NodeError, OutPoint};
use std::sync::Arc;

const NOW: u64 = 2_000_000_000;

fn keypair(seed: u8) -> Keypair {
    Keypair::from_bytes(&[seed; 32]).unwrap()
}

fn test_engine() -> (ChainEngine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let ledger = Ledger::new(store.clone() as Arc<dyn ChainStore>);
    let params = ChainParams {
        start_difficulty: Difficulty::from_tenths(10),
        ..ChainParams::default()
    };
    (
        ChainEngine::new(store.clone() as Arc<dyn ChainStore>, ledger, params),
        store,
    )
}

/// Search nonces until the proof-of-work predicate holds.
fn mine(
    previous_hash_hex: &str,
    miner: &PublicKey,
    transactions: &[Transaction],
    timestamp: u32,
    difficulty: Difficulty,
) -> (String, Hash) {
    let tx_hashes: Vec<Hash> = transactions.iter().map(Transaction::hash).collect();
    let mut content = BlockContent {
        previous_hash: hash_from_hex(previous_hash_hex).unwrap(),
        miner: *miner,
        merkle_root: merkle_root(&tx_hashes),
        timestamp,
        difficulty,
        nonce: 0,
    };
    loop {
        let bytes = content.encode();
        let hash = block_hash(&bytes);
        if check_pow(&hash_to_hex(&hash), previous_hash_hex, difficulty) {
            return (hex::encode(bytes), hash);
        }
        content.nonce += 1;
    }
}

fn spend(owner: &Keypair, outpoint: OutPoint, recipient: PublicKey, units: u64) -> Transaction {
    let mut tx = Transaction {
        version: TX_VERSION,
        inputs: vec![TxInput {
            tx_hash: outpoint.tx_hash,
            index: outpoint.index,
            signature: Signature([0u8; 64]),
        }],
        outputs: vec![TxOutput {
            recipient,
            amount: Amount::from_units(units).unwrap(),
        }],
        message: None,
    };
    let digest = tx.signing_digest();
    tx.inputs[0].signature = owner.sign(&digest);
    tx
}

async fn genesis(engine: &ChainEngine, miner: &Keypair) -> Hash {
    let (content, hash) = mine(
        GENESIS_PREVIOUS_HASH,
        &miner.public_key(),
        &[],
        1_000_000,
        Difficulty::from_tenths(10),
    );
    assert_eq!(
        engine.submit_block(&content, vec![], NOW).await.unwrap(),
        BlockOutcome::Applied
    );
    hash
}

#[tokio::test]
async fn test_genesis_accept() {
    let (engine, store) = test_engine();
    let miner = keypair(1);
    genesis(&engine, &miner).await;

    let tip = store.get_tip().await.unwrap().unwrap();
    assert_eq!(tip.id, 1);
    assert_eq!(tip.reward, Amount::from_coins(64).unwrap());
    assert_eq!(
        store.get_supply().await.unwrap(),
        Amount::from_coins(64).unwrap()
    );
}

#[tokio::test]
async fn test_linear_extend_and_supply() {
    let (engine, store) = test_engine();
    let miner = keypair(1);
    let g = genesis(&engine, &miner).await;

    let (content, _) = mine(
        &hash_to_hex(&g),
        &miner.public_key(),
        &[],
        1_000_100,
        Difficulty::from_tenths(10),
    );
    assert_eq!(
        engine.submit_block(&content, vec![], NOW).await.unwrap(),
        BlockOutcome::Applied
    );
    assert_eq!(engine.height().await.unwrap(), 2);
    assert_eq!(
        store.get_supply().await.unwrap(),
        Amount::from_coins(128).unwrap()
    );
    assert!(store.get_supply().await.unwrap().units() <= MAX_SUPPLY * SMALLEST);
}

#[tokio::test]
async fn test_resubmission_is_stale() {
    let (engine, _) = test_engine();
    let miner = keypair(1);
    let (content, _) = mine(
        GENESIS_PREVIOUS_HASH,
        &miner.public_key(),
        &[],
        1_000_000,
        Difficulty::from_tenths(10),
    );
    assert_eq!(
        engine.submit_block(&content, vec![], NOW).await.unwrap(),
        BlockOutcome::Applied
    );
    assert_eq!(
        engine.submit_block(&content, vec![], NOW).await.unwrap(),
        BlockOutcome::Stale
    );
}

#[tokio::test]
async fn test_orphan_rejected() {
    let (engine, _) = test_engine();
    let miner = keypair(1);
    genesis(&engine, &miner).await;
    let unknown_parent = hash_to_hex(&[0xAB; 32]);
    let (content, _) = mine(
        &unknown_parent,
        &miner.public_key(),
        &[],
        1_000_100,
        Difficulty::from_tenths(10),
    );
    assert_eq!(
        engine.submit_block(&content, vec![], NOW).await,
        Err(NodeError::OrphanBlock)
    );
}

#[tokio::test]
async fn test_bad_difficulty_rejected_and_chain_unchanged() {
    let (engine, store) = test_engine();
    let miner = keypair(1);
    let g = genesis(&engine, &miner).await;

    let (content, _) = mine(
        &hash_to_hex(&g),
        &miner.public_key(),
        &[],
        1_000_100,
        Difficulty::from_tenths(20),
    );
    match engine.submit_block(&content, vec![], NOW).await {
        Err(NodeError::BadDifficulty { expected, got }) => {
            assert_eq!(expected, "1.0");
            assert_eq!(got, "2.0");
        }
        other => panic!("expected BadDifficulty, got {other:?}"),
    }
    assert_eq!(store.get_tip().await.unwrap().unwrap().id, 1);
}

#[tokio::test]
async fn test_future_timestamp_rejected() {
    let (engine, _) = test_engine();
    let miner = keypair(1);
    let g = genesis(&engine, &miner).await;
    // Version-0 rules allow 600 seconds of future skew.
    let (content, _) = mine(
        &hash_to_hex(&g),
        &miner.public_key(),
        &[],
        (NOW + 601) as u32,
        Difficulty::from_tenths(10),
    );
    assert!(matches!(
        engine.submit_block(&content, vec![], NOW).await,
        Err(NodeError::InvalidStructure(_))
    ));
}

#[tokio::test]
async fn test_reorg_adopts_heavier_branch_and_returns_transactions() {
    let (engine, store) = test_engine();
    let miner = keypair(1);
    let g = genesis(&engine, &miner).await;

    // Find the genesis coinbase output so A2 can spend it.
    let genesis_txs = store.get_block_transactions(&g).await.unwrap();
    let coinbase_hash = genesis_txs[0].tx_hash;
    let outpoint = OutPoint {
        tx_hash: coinbase_hash,
        index: 0,
    };
    let payment = spend(&miner, outpoint, keypair(2).public_key(), 10 * SMALLEST);

    // A2 extends the tip and carries the payment.
    let (a2, _) = mine(
        &hash_to_hex(&g),
        &miner.public_key(),
        std::slice::from_ref(&payment),
        1_000_100,
        Difficulty::from_tenths(10),
    );
    assert_eq!(
        engine
            .submit_block(&a2, vec![payment.clone()], NOW)
            .await
            .unwrap(),
        BlockOutcome::Applied
    );

    // B2 forks from genesis: equal work, first-observed wins.
    let (b2, b2_hash) = mine(
        &hash_to_hex(&g),
        &keypair(3).public_key(),
        &[],
        1_000_101,
        Difficulty::from_tenths(10),
    );
    assert_eq!(
        engine.submit_block(&b2, vec![], NOW).await.unwrap(),
        BlockOutcome::SideChain
    );
    assert_ne!(store.get_tip().await.unwrap().unwrap().hash, b2_hash);

    // B3 tips the scales.
    let (b3, b3_hash) = mine(
        &hash_to_hex(&b2_hash),
        &keypair(3).public_key(),
        &[],
        1_000_102,
        Difficulty::from_tenths(10),
    );
    assert_eq!(
        engine.submit_block(&b3, vec![], NOW).await.unwrap(),
        BlockOutcome::Reorg { depth: 1 }
    );

    let tip = store.get_tip().await.unwrap().unwrap();
    assert_eq!(tip.hash, b3_hash);
    assert_eq!(tip.id, 3);
    // A2's payment is orphaned, still valid on the new chain, and back in
    // the pool; its input is unspent again until it confirms.
    assert!(store.get_pending(&payment.hash()).await.unwrap().is_some());
    assert_eq!(store.get_unspent_outputs(&[outpoint]).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_reorg_restores_original_chain() {
    let (engine, store) = test_engine();
    let miner = keypair(1);
    let g = genesis(&engine, &miner).await;

    let (a2, a2_hash) = mine(
        &hash_to_hex(&g),
        &miner.public_key(),
        &[],
        1_000_100,
        Difficulty::from_tenths(10),
    );
    engine.submit_block(&a2, vec![], NOW).await.unwrap();

    let (b2, b2_hash) = mine(
        &hash_to_hex(&g),
        &keypair(3).public_key(),
        &[],
        1_000_101,
        Difficulty::from_tenths(10),
    );
    assert_eq!(
        engine.submit_block(&b2, vec![], NOW).await.unwrap(),
        BlockOutcome::SideChain
    );

    // B3 carries a transaction spending an output nobody has ever seen, so
    // the reorg fails mid-application and the original chain comes back.
    let ghost = spend(
        &keypair(4),
        OutPoint {
            tx_hash: [0xEE; 32],
            index: 0,
        },
        keypair(5).public_key(),
        SMALLEST,
    );
    let (b3, _) = mine(
        &hash_to_hex(&b2_hash),
        &keypair(3).public_key(),
        std::slice::from_ref(&ghost),
        1_000_102,
        Difficulty::from_tenths(10),
    );
    assert!(matches!(
        engine.submit_block(&b3, vec![ghost], NOW).await,
        Err(NodeError::UnknownInput(_))
    ));

    let tip = store.get_tip().await.unwrap().unwrap();
    assert_eq!(tip.id, 2);
    assert_eq!(tip.hash, a2_hash);
}

#[tokio::test]
async fn test_deterministic_outcome_across_nodes() {
    let miner = keypair(1);
    let (content, _) = mine(
        GENESIS_PREVIOUS_HASH,
        &miner.public_key(),
        &[],
        1_000_000,
        Difficulty::from_tenths(10),
    );
    for _ in 0..2 {
        let (engine, _) = test_engine();
        assert_eq!(
            engine.submit_block(&content, vec![], NOW).await.unwrap(),
            BlockOutcome::Applied
        );
    }
}

#[tokio::test]
async fn test_bulk_submission_commits_prefix() {
    let (engine, _) = test_engine();
    let miner = keypair(1);

    // Build a three-block chain offline.
    let mut payloads = Vec::new();
    let mut prev = GENESIS_PREVIOUS_HASH.to_string();
    for i in 0..3u32 {
        let (content, hash) = mine(
            &prev,
            &miner.public_key(),
            &[],
            1_000_000 + i,
            Difficulty::from_tenths(10),
        );
        payloads.push(BlockPayload {
            content_hex: content,
            transactions: vec![],
        });
        prev = hash_to_hex(&hash);
    }
    let outcome = engine.submit_blocks(payloads.clone(), NOW).await;
    assert_eq!(outcome.accepted, 3);
    assert!(outcome.error.is_none());
    assert_eq!(engine.height().await.unwrap(), 3);

    // A shuffled batch is rejected as non-contiguous before any commit.
    let (engine2, _) = test_engine();
    let shuffled = vec![payloads[1].clone(), payloads[0].clone()];
    let outcome = engine2.submit_blocks(shuffled, NOW).await;
    assert_eq!(outcome.accepted, 0);
    assert!(outcome.error.is_some());
}

#[tokio::test]
async fn test_every_committed_block_satisfies_predicate() {
    let (engine, store) = test_engine();
    let miner = keypair(1);
    let g = genesis(&engine, &miner).await;
    let (b2, _) = mine(
        &hash_to_hex(&g),
        &miner.public_key(),
        &[],
        1_000_100,
        Difficulty::from_tenths(10),
    );
    engine.submit_block(&b2, vec![], NOW).await.unwrap();

    let blocks = store.get_block_range(1, 2).await.unwrap();
    for pair in blocks.windows(2) {
        assert!(check_pow(
            &hash_to_hex(&pair[1].hash),
            &hash_to_hex(&pair[0].hash),
            pair[1].difficulty
        ));
    }
}

#[tokio::test]
async fn test_mining_info_reports_difficulty_and_template() {
    let (engine, _) = test_engine();
    let miner = keypair(1);
    genesis(&engine, &miner).await;
    let info = engine.mining_info().await.unwrap();
    assert_eq!(info.difficulty, Difficulty::from_tenths(10));
    assert_eq!(info.last_block.unwrap().id, 1);
    assert!(info.pending.is_empty());
    assert_eq!(info.merkle_root, merkle_root(&[]));
}
