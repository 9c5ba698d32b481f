//! Transaction validation against a UTXO snapshot.
//!
//! The pipeline runs structural checks, input resolution, signature
//! verification, value conservation and amount-range checks, in that order,
//! and reports the first failure.

use crate::transaction::Transaction;
use denaro_crypto::PublicKey;
use denaro_types::constants::MAX_TX_DATA_SIZE;
use denaro_types::{Amount, NodeError, OutPoint};
use std::collections::{HashMap, HashSet};

/// A referenced output resolved from the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedOutput {
    pub owner: PublicKey,
    pub amount: Amount,
}

/// A point-in-time view of spendable outputs.
pub trait UtxoView {
    fn resolve(&self, outpoint: &OutPoint) -> Option<ResolvedOutput>;
}

impl UtxoView for HashMap<OutPoint, ResolvedOutput> {
    fn resolve(&self, outpoint: &OutPoint) -> Option<ResolvedOutput> {
        self.get(outpoint).copied()
    }
}

/// Validate a non-coinbase transaction; returns the implied fee.
pub fn validate_transaction(tx: &Transaction, view: &dyn UtxoView) -> Result<Amount, NodeError> {
    // Structural.
    if tx.inputs.is_empty() {
        return Err(NodeError::InvalidStructure(
            "transaction has no inputs".into(),
        ));
    }
    if tx.outputs.is_empty() {
        return Err(NodeError::InvalidStructure(
            "transaction has no outputs".into(),
        ));
    }
    if tx.inputs.len() > 255 || tx.outputs.len() > 255 {
        return Err(NodeError::InvalidStructure(
            "more than 255 inputs or outputs".into(),
        ));
    }
    if tx.hex_size() > MAX_TX_DATA_SIZE {
        return Err(NodeError::BlockTooLarge {
            size: tx.hex_size(),
            limit: MAX_TX_DATA_SIZE,
        });
    }
    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if !seen.insert(input.outpoint()) {
            return Err(NodeError::DoubleSpend(input.outpoint()));
        }
    }

    // Amount range: zero-value outputs are unspendable dust slots.
    if tx.outputs.iter().any(|o| o.amount.is_zero()) {
        return Err(NodeError::AmountOutOfRange);
    }

    // Resolution and signatures.
    let digest = tx.signing_digest();
    let mut input_sum = Amount::ZERO;
    for input in &tx.inputs {
        let outpoint = input.outpoint();
        let resolved = view
            .resolve(&outpoint)
            .ok_or(NodeError::UnknownInput(outpoint))?;
        resolved
            .owner
            .verify(&digest, &input.signature)
            .map_err(|_| NodeError::SignatureInvalid)?;
        input_sum = input_sum
            .checked_add(resolved.amount)
            .ok_or(NodeError::AmountOutOfRange)?;
    }

    // Conservation.
    let output_sum = Amount::checked_sum(tx.outputs.iter().map(|o| o.amount))
        .ok_or(NodeError::AmountOutOfRange)?;
    input_sum
        .checked_sub(output_sum)
        .ok_or(NodeError::InsufficientFunds {
            inputs: input_sum,
            outputs: output_sum,
        })
}

/// Validate the minting transaction of a block.
pub fn validate_coinbase(tx: &Transaction, expected: Amount) -> Result<(), NodeError> {
    if !tx.inputs.is_empty() {
        return Err(NodeError::InvalidStructure("coinbase has inputs".into()));
    }
    if tx.outputs.len() != 1 {
        return Err(NodeError::InvalidStructure(
            "coinbase must have exactly one output".into(),
        ));
    }
    let got = tx.outputs[0].amount;
    if got != expected {
        return Err(NodeError::BadReward { expected, got });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TxInput, TxOutput, TX_VERSION};
    use denaro_crypto::{Keypair, Signature};

    fn keypair(seed: u8) -> Keypair {
        Keypair::from_bytes(&[seed; 32]).unwrap()
    }

    fn funded_view(owner: &Keypair, amount: u64) -> (HashMap<OutPoint, ResolvedOutput>, OutPoint) {
        let outpoint = OutPoint {
            tx_hash: [0x55; 32],
            index: 0,
        };
        let mut view = HashMap::new();
        view.insert(
            outpoint,
            ResolvedOutput {
                owner: owner.public_key(),
                amount: Amount::from_units(amount).unwrap(),
            },
        );
        (view, outpoint)
    }

    fn spend(owner: &Keypair, outpoint: OutPoint, out_units: u64) -> Transaction {
        let mut tx = Transaction {
            version: TX_VERSION,
            inputs: vec![TxInput {
                tx_hash: outpoint.tx_hash,
                index: outpoint.index,
                signature: Signature([0u8; 64]),
            }],
            outputs: vec![TxOutput {
                recipient: keypair(9).public_key(),
                amount: Amount::from_units(out_units).unwrap(),
            }],
            message: None,
        };
        let digest = tx.signing_digest();
        for input in &mut tx.inputs {
            input.signature = owner.sign(&digest);
        }
        tx
    }

    #[test]
    fn test_valid_spend_yields_fee() {
        let owner = keypair(1);
        let (view, outpoint) = funded_view(&owner, 1_000_000);
        let tx = spend(&owner, outpoint, 900_000);
        assert_eq!(
            validate_transaction(&tx, &view).unwrap(),
            Amount::from_units(100_000).unwrap()
        );
    }

    #[test]
    fn test_unknown_input() {
        let owner = keypair(1);
        let (view, outpoint) = funded_view(&owner, 1_000_000);
        let mut tx = spend(&owner, outpoint, 900_000);
        tx.inputs[0].tx_hash = [0xEE; 32];
        assert!(matches!(
            validate_transaction(&tx, &view),
            Err(NodeError::UnknownInput(_))
        ));
    }

    #[test]
    fn test_wrong_key_fails_signature() {
        let owner = keypair(1);
        let intruder = keypair(2);
        let (view, outpoint) = funded_view(&owner, 1_000_000);
        let tx = spend(&intruder, outpoint, 900_000);
        assert_eq!(
            validate_transaction(&tx, &view),
            Err(NodeError::SignatureInvalid)
        );
    }

    #[test]
    fn test_overspend_is_insufficient_funds() {
        let owner = keypair(1);
        let (view, outpoint) = funded_view(&owner, 1_000);
        let tx = spend(&owner, outpoint, 2_000);
        assert!(matches!(
            validate_transaction(&tx, &view),
            Err(NodeError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_duplicate_input_rejected() {
        let owner = keypair(1);
        let (view, outpoint) = funded_view(&owner, 1_000_000);
        let mut tx = spend(&owner, outpoint, 900_000);
        let dup = tx.inputs[0].clone();
        tx.inputs.push(dup);
        let digest = tx.signing_digest();
        for input in &mut tx.inputs {
            input.signature = owner.sign(&digest);
        }
        assert!(matches!(
            validate_transaction(&tx, &view),
            Err(NodeError::DoubleSpend(_))
        ));
    }

    #[test]
    fn test_zero_output_rejected() {
        let owner = keypair(1);
        let (view, outpoint) = funded_view(&owner, 1_000_000);
        let mut tx = spend(&owner, outpoint, 900_000);
        tx.outputs[0].amount = Amount::ZERO;
        assert_eq!(
            validate_transaction(&tx, &view),
            Err(NodeError::AmountOutOfRange)
        );
    }

    #[test]
    fn test_coinbase_rules() {
        let reward = Amount::from_coins(64).unwrap();
        let cb = Transaction::coinbase(keypair(3).public_key(), reward, [0xCB; 32]);
        assert!(validate_coinbase(&cb, reward).is_ok());
        assert!(matches!(
            validate_coinbase(&cb, Amount::from_coins(32).unwrap()),
            Err(NodeError::BadReward { .. })
        ));
        let owner = keypair(1);
        let (_, outpoint) = funded_view(&owner, 1_000);
        let not_cb = spend(&owner, outpoint, 500);
        assert!(validate_coinbase(&not_cb, reward).is_err());
    }
}
