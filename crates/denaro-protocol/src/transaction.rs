//! Canonical transaction encoding.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! version      u8   (currently 1)
//! n_inputs     u8
//!   tx_hash    32 bytes
//!   index      u8
//!   signature  64 bytes (r ‖ s)
//! n_outputs    u8
//!   pubkey     33 bytes (SEC1 compressed)
//!   amount     u64 (smallest units)
//! msg_flag     u8   (0 or 1)
//!   msg_len    u16, msg bytes        (only when msg_flag = 1)
//! ```
//!
//! The signing preimage is the same layout with every signature omitted;
//! the reference hash is SHA-256 of the full encoding.

use denaro_crypto::{address_from_pubkey, sha256, PublicKey, Signature};
use denaro_types::constants::MAX_TX_DATA_SIZE;
use denaro_types::{Amount, Hash, NodeError, OutPoint};

pub const TX_VERSION: u8 = 1;

/// Upper bound on the optional message payload.
pub const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    pub tx_hash: Hash,
    pub index: u8,
    pub signature: Signature,
}

impl TxInput {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            tx_hash: self.tx_hash,
            index: self.index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub recipient: PublicKey,
    pub amount: Amount,
}

impl TxOutput {
    pub fn address(&self) -> String {
        address_from_pubkey(&self.recipient)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: u8,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub message: Option<Vec<u8>>,
}

impl Transaction {
    /// The special minting transaction of a block: no inputs, one output.
    /// Carries the block hash in the message so every coinbase is unique.
    pub fn coinbase(recipient: PublicKey, amount: Amount, block_hash: Hash) -> Transaction {
        Transaction {
            version: TX_VERSION,
            inputs: Vec::new(),
            outputs: vec![TxOutput { recipient, amount }],
            message: Some(block_hash.to_vec()),
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        self.encode_inner(true)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.encode())
    }

    /// Encoded size in hex characters, the unit of all block size limits.
    pub fn hex_size(&self) -> usize {
        self.encode().len() * 2
    }

    /// The digest every input signature commits to.
    pub fn signing_digest(&self) -> Hash {
        sha256(&self.encode_inner(false))
    }

    /// The canonical reference hash.
    pub fn hash(&self) -> Hash {
        sha256(&self.encode())
    }

    fn encode_inner(&self, with_signatures: bool) -> Vec<u8> {
        debug_assert!(self.inputs.len() <= u8::MAX as usize);
        debug_assert!(self.outputs.len() <= u8::MAX as usize);
        let mut out = Vec::with_capacity(4 + self.inputs.len() * 97 + self.outputs.len() * 41);
        out.push(self.version);
        out.push(self.inputs.len() as u8);
        for input in &self.inputs {
            out.extend_from_slice(&input.tx_hash);
            out.push(input.index);
            if with_signatures {
                out.extend_from_slice(input.signature.as_bytes());
            }
        }
        out.push(self.outputs.len() as u8);
        for output in &self.outputs {
            out.extend_from_slice(output.recipient.as_bytes());
            out.extend_from_slice(&output.amount.units().to_le_bytes());
        }
        match &self.message {
            None => out.push(0),
            Some(msg) => {
                debug_assert!(msg.len() <= MAX_MESSAGE_LEN);
                out.push(1);
                out.extend_from_slice(&(msg.len() as u16).to_le_bytes());
                out.extend_from_slice(msg);
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Transaction, NodeError> {
        let mut cursor = Cursor::new(bytes);
        let version = cursor.take_u8()?;
        if version != TX_VERSION {
            return Err(NodeError::MalformedInput(format!(
                "unsupported transaction version {version}"
            )));
        }
        let n_inputs = cursor.take_u8()?;
        let mut inputs = Vec::with_capacity(n_inputs as usize);
        for _ in 0..n_inputs {
            let tx_hash = cursor.take_hash()?;
            let index = cursor.take_u8()?;
            let signature = Signature::from_slice(cursor.take(64)?)
                .map_err(|e| NodeError::MalformedInput(e.to_string()))?;
            inputs.push(TxInput {
                tx_hash,
                index,
                signature,
            });
        }
        let n_outputs = cursor.take_u8()?;
        let mut outputs = Vec::with_capacity(n_outputs as usize);
        for _ in 0..n_outputs {
            let recipient = PublicKey::from_slice(cursor.take(33)?)
                .map_err(|e| NodeError::MalformedInput(e.to_string()))?;
            let units = u64::from_le_bytes(cursor.take(8)?.try_into().expect("8 bytes"));
            let amount = Amount::from_units(units).ok_or(NodeError::AmountOutOfRange)?;
            outputs.push(TxOutput { recipient, amount });
        }
        let message = match cursor.take_u8()? {
            0 => None,
            1 => {
                let len = u16::from_le_bytes(cursor.take(2)?.try_into().expect("2 bytes"));
                Some(cursor.take(len as usize)?.to_vec())
            }
            flag => {
                return Err(NodeError::MalformedInput(format!(
                    "bad message flag {flag}"
                )))
            }
        };
        cursor.expect_end()?;
        Ok(Transaction {
            version,
            inputs,
            outputs,
            message,
        })
    }

    pub fn from_hex(s: &str) -> Result<Transaction, NodeError> {
        if s.len() > MAX_TX_DATA_SIZE {
            return Err(NodeError::BlockTooLarge {
                size: s.len(),
                limit: MAX_TX_DATA_SIZE,
            });
        }
        let bytes = hex::decode(s)
            .map_err(|_| NodeError::MalformedInput("transaction is not hex".into()))?;
        Transaction::decode(&bytes)
    }

    /// Outpoints this transaction consumes.
    pub fn spent_outpoints(&self) -> Vec<OutPoint> {
        self.inputs.iter().map(TxInput::outpoint).collect()
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], NodeError> {
        if self.pos + n > self.bytes.len() {
            return Err(NodeError::MalformedInput("truncated transaction".into()));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, NodeError> {
        Ok(self.take(1)?[0])
    }

    fn take_hash(&mut self) -> Result<Hash, NodeError> {
        Ok(self.take(32)?.try_into().expect("32 bytes"))
    }

    fn expect_end(&self) -> Result<(), NodeError> {
        if self.pos != self.bytes.len() {
            return Err(NodeError::MalformedInput(
                "trailing bytes after transaction".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use denaro_crypto::Keypair;
    use denaro_types::hash_to_hex;

    fn keypair(seed: u8) -> Keypair {
        Keypair::from_bytes(&[seed; 32]).unwrap()
    }

    fn sample_tx() -> Transaction {
        let sender = keypair(1);
        let recipient = keypair(2).public_key();
        let mut tx = Transaction {
            version: TX_VERSION,
            inputs: vec![TxInput {
                tx_hash: [0x11; 32],
                index: 0,
                signature: Signature([0u8; 64]),
            }],
            outputs: vec![TxOutput {
                recipient,
                amount: Amount::from_coins(3).unwrap(),
            }],
            message: Some(b"hi".to_vec()),
        };
        let digest = tx.signing_digest();
        tx.inputs[0].signature = sender.sign(&digest);
        tx
    }

    #[test]
    fn test_roundtrip() {
        let tx = sample_tx();
        let decoded = Transaction::decode(&tx.encode()).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(Transaction::from_hex(&tx.to_hex()).unwrap(), tx);
    }

    #[test]
    fn test_coinbase_roundtrip() {
        let cb = Transaction::coinbase(
            keypair(3).public_key(),
            Amount::from_coins(64).unwrap(),
            [0x77; 32],
        );
        assert!(cb.is_coinbase());
        assert_eq!(Transaction::decode(&cb.encode()).unwrap(), cb);
    }

    #[test]
    fn test_coinbase_hash_tracks_block() {
        let recipient = keypair(3).public_key();
        let amount = Amount::from_coins(64).unwrap();
        let a = Transaction::coinbase(recipient, amount, [1; 32]);
        let b = Transaction::coinbase(recipient, amount, [2; 32]);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_signing_digest_excludes_signatures() {
        let mut tx = sample_tx();
        let digest = tx.signing_digest();
        let hash = tx.hash();
        tx.inputs[0].signature = Signature([0xAA; 64]);
        assert_eq!(tx.signing_digest(), digest);
        assert_ne!(tx.hash(), hash, "reference hash must cover signatures");
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let bytes = sample_tx().encode();
        for cut in [0, 1, 5, bytes.len() - 1] {
            assert!(matches!(
                Transaction::decode(&bytes[..cut]),
                Err(NodeError::MalformedInput(_))
            ));
        }
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut bytes = sample_tx().encode();
        bytes.push(0);
        assert!(matches!(
            Transaction::decode(&bytes),
            Err(NodeError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_decode_rejects_bad_version() {
        let mut bytes = sample_tx().encode();
        bytes[0] = 9;
        assert!(Transaction::decode(&bytes).is_err());
    }

    #[test]
    fn test_hash_is_hex_of_full_encoding() {
        let tx = sample_tx();
        assert_eq!(hash_to_hex(&tx.hash()).len(), 64);
        assert_eq!(tx.hash(), sha256(&tx.encode()));
    }
}
