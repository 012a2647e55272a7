//! Block and transaction validation
//!
//! Pure functions over the candidate block, its parent, and the current
//! UTXO set. Validation never mutates state; the engine applies a block
//! only after every check here has passed.

use thiserror::Error;

use crate::constants::{COINBASE_TAG, MAX_FUTURE_DRIFT_SECS, MICRO_PER_COIN};
use crate::consensus::{calculate_difficulty, check_proof_of_work, miner_reward};
use crate::crypto::{compute_merkle_root, verify_envelope, Hash};
use crate::node::GenesisConfig;
use crate::storage::UtxoSet;
use crate::validation::Transaction;

/// Validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("parent mismatch: expected {expected}, got {got}")]
    ParentMismatch { expected: Hash, got: Hash },
    #[error("invalid height: expected {expected}, got {got}")]
    WrongHeight { expected: u64, got: u64 },
    #[error("timestamp {got} before parent timestamp {parent}")]
    TimestampBeforeParent { got: u64, parent: u64 },
    #[error("timestamp {got} too far in the future (now {now})")]
    TimestampInFuture { got: u64, now: u64 },
    #[error("difficulty mismatch: expected {expected}, got {got}")]
    WrongDifficulty { expected: u64, got: u64 },
    #[error("merkle root does not match transactions")]
    MerkleMismatch,
    #[error("transaction count mismatch: header says {header}, body has {body}")]
    TxCountMismatch { header: u32, body: usize },
    #[error("proof of work does not meet the target for difficulty {0}")]
    InvalidProofOfWork(u64),
    #[error("first transaction of a block must be the coinbase")]
    MissingCoinbase,
    #[error("coinbase must pay the miner reward in a single output")]
    MalformedCoinbase,
    #[error("coinbase pays {got}, expected miner reward {expected}")]
    WrongCoinbaseAmount { expected: u64, got: u64 },
    #[error("transaction {tx_id}: amount must be positive")]
    ZeroAmount { tx_id: Hash },
    #[error("transaction {tx_id}: fee {fee} below minimum {min}")]
    FeeTooLow { tx_id: Hash, fee: u64, min: u64 },
    #[error("transaction {tx_id}: fee {fee} below gas cost {gas_cost}")]
    FeeBelowGasCost {
        tx_id: Hash,
        fee: u64,
        gas_cost: u64,
    },
    #[error("transaction {tx_id}: missing signature")]
    MissingSignature { tx_id: Hash },
    #[error("transaction {tx_id}: signature does not verify")]
    BadSignature { tx_id: Hash },
    #[error("transaction {tx_id}: input {prev}:{index} is unknown or already spent")]
    UnknownInput {
        tx_id: Hash,
        prev: Hash,
        index: u32,
    },
    #[error("transaction {tx_id}: input {prev}:{index} is not owned by the sender")]
    ForeignInput {
        tx_id: Hash,
        prev: Hash,
        index: u32,
    },
    #[error("transaction {tx_id}: inputs {inputs} below outputs {outputs} plus fee {fee}")]
    InsufficientInputs {
        tx_id: Hash,
        inputs: u64,
        outputs: u64,
        fee: u64,
    },
}

/// Minimum declared fee in micro-KALON
pub fn min_tx_fee(config: &GenesisConfig) -> u64 {
    (config.network_fee.base_tx_fee * MICRO_PER_COIN as f64) as u64
}

/// Effective fee of a non-coinbase transaction: input sum minus output
/// sum, resolved against the current UTXO set. Excess input beyond the
/// declared fee counts as additional fee.
pub fn effective_fee(tx: &Transaction, utxos: &UtxoSet) -> u64 {
    let input_sum: u64 = tx
        .inputs
        .iter()
        .filter_map(|input| utxos.get(&input.prev_tx_id, input.index))
        .filter(|utxo| !utxo.spent)
        .map(|utxo| utxo.amount)
        .sum();
    input_sum.saturating_sub(tx.output_sum())
}

/// Aggregate effective fees of a set of pending transactions
pub fn total_fees(txs: &[Transaction], utxos: &UtxoSet) -> u64 {
    txs.iter()
        .filter(|tx| !tx.is_coinbase())
        .map(|tx| effective_fee(tx, utxos))
        .sum()
}

/// Validate a single non-coinbase transaction against the UTXO set
pub fn validate_transaction(
    config: &GenesisConfig,
    tx: &Transaction,
    utxos: &UtxoSet,
) -> Result<(), ValidationError> {
    let tx_id = tx.id();

    if tx.amount == 0 {
        return Err(ValidationError::ZeroAmount { tx_id });
    }

    let min = min_tx_fee(config);
    if tx.fee < min {
        return Err(ValidationError::FeeTooLow {
            tx_id,
            fee: tx.fee,
            min,
        });
    }

    let gas_used = if tx.gas_used == 0 { 1 } else { tx.gas_used };
    let gas_cost = gas_used.saturating_mul(tx.gas_price);
    if tx.fee < gas_cost {
        return Err(ValidationError::FeeBelowGasCost {
            tx_id,
            fee: tx.fee,
            gas_cost,
        });
    }

    if tx.signature.is_empty() {
        return Err(ValidationError::MissingSignature { tx_id });
    }
    if !verify_envelope(&tx.from, &tx.signing_bytes(), &tx.signature) {
        return Err(ValidationError::BadSignature { tx_id });
    }

    let mut input_sum: u64 = 0;
    for input in &tx.inputs {
        let utxo = utxos
            .get(&input.prev_tx_id, input.index)
            .filter(|u| !u.spent)
            .ok_or(ValidationError::UnknownInput {
                tx_id,
                prev: input.prev_tx_id,
                index: input.index,
            })?;

        if utxo.owner != tx.from {
            return Err(ValidationError::ForeignInput {
                tx_id,
                prev: input.prev_tx_id,
                index: input.index,
            });
        }

        input_sum = input_sum.saturating_add(utxo.amount);
    }

    let output_sum = tx.output_sum();
    if input_sum < output_sum.saturating_add(tx.fee) {
        return Err(ValidationError::InsufficientInputs {
            tx_id,
            inputs: input_sum,
            outputs: output_sum,
            fee: tx.fee,
        });
    }

    Ok(())
}

/// Validate the coinbase of a non-genesis block: first transaction, a
/// single output paying the computed miner reward (base plus fee share)
/// to the header's miner, tagged as a block reward.
fn validate_coinbase(
    config: &GenesisConfig,
    block: &crate::consensus::Block,
    utxos: &UtxoSet,
) -> Result<(), ValidationError> {
    let coinbase = block.transactions.first().ok_or(ValidationError::MissingCoinbase)?;
    if !coinbase.is_coinbase() || coinbase.data != COINBASE_TAG {
        return Err(ValidationError::MissingCoinbase);
    }
    if coinbase.outputs.len() != 1 || coinbase.outputs[0].owner != block.header.miner {
        return Err(ValidationError::MalformedCoinbase);
    }

    let fees = total_fees(&block.transactions[1..], utxos);
    let expected = miner_reward(config, block.header.height, fees).miner;
    let got = coinbase.outputs[0].amount;
    if got != expected {
        return Err(ValidationError::WrongCoinbaseAmount { expected, got });
    }

    Ok(())
}

/// Validate a candidate block against its parent and the current UTXO
/// set. `recent_timestamps` feed the difficulty rule; `now_secs` bounds
/// the future drift.
pub fn validate_block(
    config: &GenesisConfig,
    block: &crate::consensus::Block,
    parent: &crate::consensus::Block,
    utxos: &UtxoSet,
    recent_timestamps: &[u64],
    now_secs: u64,
) -> Result<(), ValidationError> {
    let header = &block.header;

    let expected_parent = parent.hash();
    if header.parent_id != expected_parent {
        return Err(ValidationError::ParentMismatch {
            expected: expected_parent,
            got: header.parent_id,
        });
    }

    let expected_height = parent.header.height + 1;
    if header.height != expected_height {
        return Err(ValidationError::WrongHeight {
            expected: expected_height,
            got: header.height,
        });
    }

    if header.timestamp < parent.header.timestamp {
        return Err(ValidationError::TimestampBeforeParent {
            got: header.timestamp,
            parent: parent.header.timestamp,
        });
    }
    if header.timestamp > now_secs + MAX_FUTURE_DRIFT_SECS {
        return Err(ValidationError::TimestampInFuture {
            got: header.timestamp,
            now: now_secs,
        });
    }

    let expected_difficulty = calculate_difficulty(
        config,
        header.height,
        parent.header.difficulty,
        recent_timestamps,
    );
    if header.difficulty != expected_difficulty {
        return Err(ValidationError::WrongDifficulty {
            expected: expected_difficulty,
            got: header.difficulty,
        });
    }

    let tx_ids: Vec<Hash> = block.transactions.iter().map(|tx| tx.id()).collect();
    if compute_merkle_root(&tx_ids) != header.merkle_root {
        return Err(ValidationError::MerkleMismatch);
    }

    if header.tx_count as usize != block.transactions.len() {
        return Err(ValidationError::TxCountMismatch {
            header: header.tx_count,
            body: block.transactions.len(),
        });
    }

    if !check_proof_of_work(config, &block.hash(), header.difficulty) {
        return Err(ValidationError::InvalidProofOfWork(header.difficulty));
    }

    validate_coinbase(config, block, utxos)?;

    for tx in &block.transactions[1..] {
        validate_transaction(config, tx, utxos)?;
    }

    Ok(())
}
