//! Transaction structure
//!
//! UTXO-based transactions with ed25519 signature envelopes. Two fixed
//! byte layouts hang off a transaction and must never change, because
//! they define network identity:
//!
//! - the identity bytes (inputs, outputs, nanosecond timestamp, sender,
//!   recipient) hashed into the transaction id, and
//! - the signed material (`from, to, amount, nonce, fee, gas_used,
//!   gas_price, data`) covered by the sender's signature.

use serde::{Deserialize, Serialize};

use crate::constants::COINBASE_TAG;
use crate::crypto::{hash_bytes, Address, Hash};

/// A transaction input referencing a previous output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Id of the transaction that created the output being spent
    pub prev_tx_id: Hash,
    /// Index of the output within that transaction
    pub index: u32,
    /// Per-input signature material (unused when the envelope on the
    /// transaction covers all inputs, which is the Kalon default)
    #[serde(default)]
    pub signature: Vec<u8>,
}

/// A transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Recipient address
    pub owner: Address,
    /// Amount in micro-KALON
    pub amount: u64,
}

/// A complete transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender address; the zero address marks a coinbase
    pub from: Address,
    /// Primary recipient address
    pub to: Address,
    /// Declared transfer amount in micro-KALON
    pub amount: u64,
    /// Sender-chosen sequence number
    pub nonce: u64,
    /// Declared fee in micro-KALON
    pub fee: u64,
    /// Gas consumed (treated as 1 when left at 0)
    pub gas_used: u64,
    /// Price per gas unit in micro-KALON
    pub gas_price: u64,
    /// Arbitrary payload; carries the coinbase tag on reward transactions
    #[serde(default)]
    pub data: Vec<u8>,
    /// Signature envelope (`pubkey ‖ sig`), empty on coinbase and on
    /// unsigned drafts
    #[serde(default)]
    pub signature: Vec<u8>,
    /// Spent outputs
    #[serde(default)]
    pub inputs: Vec<TxInput>,
    /// Created outputs
    pub outputs: Vec<TxOutput>,
    /// Creation time in nanoseconds since the Unix epoch. Nanosecond
    /// precision keeps two coinbases paying the same miner distinct.
    pub timestamp_nanos: u64,
}

impl Transaction {
    /// Create the coinbase transaction paying `amount` to `miner`
    pub fn coinbase(miner: Address, amount: u64, timestamp_nanos: u64) -> Self {
        Transaction {
            from: Address::zero(),
            to: miner,
            amount,
            nonce: 0,
            fee: 0,
            gas_used: 0,
            gas_price: 0,
            data: COINBASE_TAG.to_vec(),
            signature: Vec::new(),
            inputs: Vec::new(),
            outputs: vec![TxOutput {
                owner: miner,
                amount,
            }],
            timestamp_nanos,
        }
    }

    /// Whether this is a coinbase transaction
    pub fn is_coinbase(&self) -> bool {
        self.from.is_zero()
            && self.inputs.is_empty()
            && !self.outputs.is_empty()
            && self.signature.is_empty()
    }

    /// Canonical identity bytes: inputs, outputs, timestamp, from, to
    fn identity_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(
            self.inputs.len() * 36 + self.outputs.len() * 28 + 48,
        );

        for input in &self.inputs {
            bytes.extend_from_slice(&input.prev_tx_id.0);
            bytes.extend_from_slice(&input.index.to_be_bytes());
        }

        for output in &self.outputs {
            bytes.extend_from_slice(&output.owner.0);
            bytes.extend_from_slice(&output.amount.to_be_bytes());
        }

        bytes.extend_from_slice(&self.timestamp_nanos.to_be_bytes());
        bytes.extend_from_slice(&self.from.0);
        bytes.extend_from_slice(&self.to.0);

        bytes
    }

    /// The transaction id
    pub fn id(&self) -> Hash {
        hash_bytes(&self.identity_bytes())
    }

    /// The material covered by the sender's signature. The signature
    /// itself is excluded.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(88 + self.data.len());
        bytes.extend_from_slice(&self.from.0);
        bytes.extend_from_slice(&self.to.0);
        bytes.extend_from_slice(&self.amount.to_be_bytes());
        bytes.extend_from_slice(&self.nonce.to_be_bytes());
        bytes.extend_from_slice(&self.fee.to_be_bytes());
        bytes.extend_from_slice(&self.gas_used.to_be_bytes());
        bytes.extend_from_slice(&self.gas_price.to_be_bytes());
        bytes.extend_from_slice(&self.data);
        bytes
    }

    /// Sum of output amounts
    pub fn output_sum(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }
}
