//! State-machine tests over the in-memory store: admission conflicts,
//! apply/undo symmetry, eviction, garbage collection and templates.

use denaro_crypto::{Keypair, PublicKey, Signature};
use denaro_ledger::Ledger;
use denaro_protocol::{Transaction, TxInput, TxOutput, TX_VERSION};
use denaro_storage::{ChainStore, MemoryStore, StoreOp};
use denaro_types::{Amount, BlockRecord, Difficulty, NodeError, OutPoint, UtxoEntry};
use std::sync::Arc;

fn keypair(seed: u8) -> Keypair {
    Keypair::from_bytes(&[seed; 32]).unwrap()
}

fn block_record(id: u64, tag: u8, reward_coins: u64) -> BlockRecord {
    BlockRecord {
        id,
        hash: [tag; 32],
        content: "00".into(),
        miner_address: "miner".into(),
        nonce: 0,
        difficulty: Difficulty::from_tenths(10),
        reward: Amount::from_coins(reward_coins).unwrap(),
        timestamp: 1_000 + id,
    }
}

/// Seed height 1 with a coinbase paying 64 coins to `miner`.
async fn seed_chain(store: &Arc<MemoryStore>, miner: &Keypair) -> Transaction {
    let record = block_record(1, 0x01, 64);
    let coinbase = Transaction::coinbase(
        miner.public_key(),
        Amount::from_coins(64).unwrap(),
        record.hash,
    );
    store
        .apply(vec![
            StoreOp::InsertBlock(record.clone()),
            StoreOp::InsertTransactions(vec![denaro_types::TxRecord {
                block_hash: record.hash,
                tx_hash: coinbase.hash(),
                tx_hex: coinbase.to_hex(),
                inputs_addresses: vec![],
                outputs_addresses: vec![coinbase.outputs[0].address()],
                outputs_amounts: vec![coinbase.outputs[0].amount],
                fees: Amount::ZERO,
                time_received: 0,
            }]),
            StoreOp::CreateOutput(UtxoEntry {
                tx_hash: coinbase.hash(),
                index: 0,
                address: coinbase.outputs[0].address(),
            }),
        ])
        .await
        .unwrap();
    coinbase
}

fn spend(
    owner: &Keypair,
    outpoint: OutPoint,
    payments: &[(PublicKey, u64)],
) -> Transaction {
    let mut tx = Transaction {
        version: TX_VERSION,
        inputs: vec![TxInput {
            tx_hash: outpoint.tx_hash,
            index: outpoint.index,
            signature: Signature([0u8; 64]),
        }],
        outputs: payments
            .iter()
            .map(|(recipient, units)| TxOutput {
                recipient: *recipient,
                amount: Amount::from_units(*units).unwrap(),
            })
            .collect(),
        message: None,
    };
    let digest = tx.signing_digest();
    for input in &mut tx.inputs {
        input.signature = owner.sign(&digest);
    }
    tx
}

#[tokio::test]
async fn test_admission_and_double_spend_rejection() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Ledger::new(store.clone() as Arc<dyn ChainStore>);
    let miner = keypair(1);
    let coinbase = seed_chain(&store, &miner).await;
    let outpoint = OutPoint {
        tx_hash: coinbase.hash(),
        index: 0,
    };

    let bob = keypair(2).public_key();
    let t1 = spend(&miner, outpoint, &[(bob, 10_000_000)]);
    ledger.admit_pending(&t1, 100).await.unwrap();

    // Same outpoint again: the reservation wins.
    let t2 = spend(&miner, outpoint, &[(bob, 20_000_000)]);
    match ledger.admit_pending(&t2, 101).await {
        Err(NodeError::DoubleSpend(conflicted)) => assert_eq!(conflicted, outpoint),
        other => panic!("expected double spend, got {other:?}"),
    }

    // Re-submitting the same transaction is rejected too.
    assert!(ledger.admit_pending(&t1, 102).await.is_err());
}

#[tokio::test]
async fn test_child_may_spend_pending_parent() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Ledger::new(store.clone() as Arc<dyn ChainStore>);
    let miner = keypair(1);
    let coinbase = seed_chain(&store, &miner).await;

    let alice = keypair(3);
    let parent = spend(
        &miner,
        OutPoint {
            tx_hash: coinbase.hash(),
            index: 0,
        },
        &[(alice.public_key(), 5_000_000)],
    );
    ledger.admit_pending(&parent, 100).await.unwrap();

    let child = spend(
        &alice,
        OutPoint {
            tx_hash: parent.hash(),
            index: 0,
        },
        &[(keypair(4).public_key(), 4_000_000)],
    );
    ledger.admit_pending(&child, 101).await.unwrap();
    assert_eq!(store.count_pending().await.unwrap(), 2);
}

#[tokio::test]
async fn test_apply_block_moves_value_and_clears_pool() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Ledger::new(store.clone() as Arc<dyn ChainStore>);
    let miner = keypair(1);
    let coinbase = seed_chain(&store, &miner).await;
    let outpoint = OutPoint {
        tx_hash: coinbase.hash(),
        index: 0,
    };

    let bob = keypair(2);
    // 64 coins in, 63 out: 1 coin fee.
    let tx = spend(&miner, outpoint, &[(bob.public_key(), 63_000_000)]);
    ledger.admit_pending(&tx, 100).await.unwrap();

    let record = block_record(2, 0x02, 64);
    let applied = ledger
        .apply_block(&record, &miner.public_key(), &[tx.clone()], 200)
        .await
        .unwrap();
    assert_eq!(applied.total_fees, Amount::from_coins(1).unwrap());
    assert_eq!(
        applied.coinbase.outputs[0].amount,
        Amount::from_coins(65).unwrap()
    );

    // The consumed output is gone, the new ones exist, the pool is empty.
    assert!(store.get_unspent_outputs(&[outpoint]).await.unwrap().is_empty());
    let new_out = OutPoint {
        tx_hash: tx.hash(),
        index: 0,
    };
    assert_eq!(store.get_unspent_outputs(&[new_out]).await.unwrap().len(), 1);
    assert_eq!(store.count_pending().await.unwrap(), 0);
    assert!(store.reserved_outpoints(&[outpoint]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_apply_then_undo_restores_state() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Ledger::new(store.clone() as Arc<dyn ChainStore>);
    let miner = keypair(1);
    let coinbase = seed_chain(&store, &miner).await;
    let outpoint = OutPoint {
        tx_hash: coinbase.hash(),
        index: 0,
    };

    let supply_before = store.get_supply().await.unwrap();
    let utxo_before = store.get_unspent_outputs(&[outpoint]).await.unwrap();

    let tx = spend(&miner, outpoint, &[(keypair(2).public_key(), 60_000_000)]);
    let record = block_record(2, 0x02, 64);
    ledger
        .apply_block(&record, &miner.public_key(), &[tx.clone()], 200)
        .await
        .unwrap();

    let orphaned = ledger.undo_block(&record).await.unwrap();
    assert_eq!(orphaned.len(), 1);
    assert_eq!(orphaned[0].hash(), tx.hash());

    assert_eq!(store.get_supply().await.unwrap(), supply_before);
    assert_eq!(
        store.get_unspent_outputs(&[outpoint]).await.unwrap(),
        utxo_before
    );
    assert_eq!(store.get_tip().await.unwrap().unwrap().id, 1);
}

#[tokio::test]
async fn test_block_rejects_double_spend_within_block() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Ledger::new(store.clone() as Arc<dyn ChainStore>);
    let miner = keypair(1);
    let coinbase = seed_chain(&store, &miner).await;
    let outpoint = OutPoint {
        tx_hash: coinbase.hash(),
        index: 0,
    };

    let a = spend(&miner, outpoint, &[(keypair(2).public_key(), 1_000_000)]);
    let b = spend(&miner, outpoint, &[(keypair(3).public_key(), 2_000_000)]);
    let record = block_record(2, 0x02, 64);
    let result = ledger
        .apply_block(&record, &miner.public_key(), &[a, b], 200)
        .await;
    assert!(matches!(result, Err(NodeError::DoubleSpend(_))));
    // Nothing committed.
    assert_eq!(store.get_tip().await.unwrap().unwrap().id, 1);
}

#[tokio::test]
async fn test_eviction_prefers_higher_fee_payer() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Ledger::with_pool_limit(store.clone() as Arc<dyn ChainStore>, 1);
    let miner = keypair(1);
    let coinbase = seed_chain(&store, &miner).await;

    // Two spendable outputs are needed; split the coinbase first via a block.
    let alice = keypair(2);
    let splitter = spend(
        &miner,
        OutPoint {
            tx_hash: coinbase.hash(),
            index: 0,
        },
        &[
            (alice.public_key(), 30_000_000),
            (alice.public_key(), 30_000_000),
        ],
    );
    let record = block_record(2, 0x02, 64);
    ledger
        .apply_block(&record, &miner.public_key(), &[splitter.clone()], 50)
        .await
        .unwrap();

    let cheap = spend(
        &alice,
        OutPoint {
            tx_hash: splitter.hash(),
            index: 0,
        },
        &[(keypair(5).public_key(), 29_999_000)],
    );
    ledger.admit_pending(&cheap, 100).await.unwrap();

    // Higher fee per byte displaces the only resident.
    let rich = spend(
        &alice,
        OutPoint {
            tx_hash: splitter.hash(),
            index: 1,
        },
        &[(keypair(5).public_key(), 25_000_000)],
    );
    ledger.admit_pending(&rich, 101).await.unwrap();
    assert_eq!(store.count_pending().await.unwrap(), 1);
    assert!(store.get_pending(&rich.hash()).await.unwrap().is_some());
    assert!(store.get_pending(&cheap.hash()).await.unwrap().is_none());

    // A newcomer cheaper than the resident is turned away.
    let pauper = spend(
        &alice,
        OutPoint {
            tx_hash: splitter.hash(),
            index: 0,
        },
        &[(keypair(6).public_key(), 29_999_999)],
    );
    assert!(matches!(
        ledger.admit_pending(&pauper, 102).await,
        Err(NodeError::MempoolFull)
    ));
}

#[tokio::test]
async fn test_template_orders_parents_first_and_caps_conflicts() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Ledger::new(store.clone() as Arc<dyn ChainStore>);
    let miner = keypair(1);
    let coinbase = seed_chain(&store, &miner).await;

    let alice = keypair(2);
    let parent = spend(
        &miner,
        OutPoint {
            tx_hash: coinbase.hash(),
            index: 0,
        },
        &[(alice.public_key(), 10_000_000)],
    );
    ledger.admit_pending(&parent, 100).await.unwrap();
    let child = spend(
        &alice,
        OutPoint {
            tx_hash: parent.hash(),
            index: 0,
        },
        &[(keypair(3).public_key(), 1_000_000)],
    );
    ledger.admit_pending(&child, 101).await.unwrap();

    let template = ledger.build_template().await.unwrap();
    let position = |h: denaro_types::Hash| {
        template
            .hashes
            .iter()
            .position(|x| *x == h)
            .expect("selected")
    };
    assert!(position(parent.hash()) < position(child.hash()));
    assert_eq!(template.transactions.len(), 2);
    assert!(template.total_hex_size > 0);
}

#[tokio::test]
async fn test_gc_drops_conflicting_and_dependent_pending() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Ledger::new(store.clone() as Arc<dyn ChainStore>);
    let miner = keypair(1);
    let coinbase = seed_chain(&store, &miner).await;
    let outpoint = OutPoint {
        tx_hash: coinbase.hash(),
        index: 0,
    };

    let alice = keypair(2);
    let parent = spend(&miner, outpoint, &[(alice.public_key(), 10_000_000)]);
    ledger.admit_pending(&parent, 100).await.unwrap();
    let child = spend(
        &alice,
        OutPoint {
            tx_hash: parent.hash(),
            index: 0,
        },
        &[(keypair(3).public_key(), 9_000_000)],
    );
    ledger.admit_pending(&child, 101).await.unwrap();

    // The funding output vanishes underneath the pool (spent by a block this
    // node applied without the pending parent in it).
    store
        .apply(vec![StoreOp::SpendOutput(outpoint)])
        .await
        .unwrap();

    let removed = ledger.gc_pending().await.unwrap();
    assert_eq!(removed, 2, "parent and its dependent child are both gone");
    assert_eq!(store.count_pending().await.unwrap(), 0);
}
