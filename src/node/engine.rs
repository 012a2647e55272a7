//! Chain engine
//!
//! The single mutable authority of a node. Owns the applied chain, the
//! UTXO set, the mempool, the event bus, and the durable block store;
//! every external collaborator (RPC, miner, wallet, P2P) goes through
//! the narrow facade defined here.
//!
//! `submit_block` is the only state transition. It runs under the
//! engine's writer lock: validate, apply UTXO changes with an undo
//! journal, prune the mempool, append, persist, emit. Observers never
//! see a partially applied block.

use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;

use crate::consensus::{
    calculate_difficulty, miner_reward, total_fees, validate_block, validate_transaction, Block,
    BlockHeader, ValidationError,
};
use crate::constants::MAX_RECENT_BLOCKS;
use crate::crypto::{compute_merkle_root, Address, Hash, SIGNATURE_ENVELOPE_LEN};
use crate::node::{create_genesis_block, GenesisConfig};
use crate::node::events::{ChainEvent, EventBus, TOPIC_BLOCK_ADDED, TOPIC_TRANSACTION_ADDED};
use crate::storage::{BlockStore, Mempool, StoreError, Utxo, UtxoSet};
use crate::validation::{Transaction, TxInput, TxOutput};

/// Engine errors, grouped by the failure taxonomy the facade exposes
#[derive(Debug, Error)]
pub enum ChainError {
    /// Structurally invalid input rejected before validation
    #[error("malformed input: {0}")]
    Malformed(String),
    /// Consensus validation failed; no state was changed
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// An input referenced a missing or already-spent UTXO during
    /// apply; all partial changes were rolled back
    #[error("double spend of {tx_id}:{index}")]
    DoubleSpend { tx_id: Hash, index: u32 },
    /// The sender cannot cover amount plus fee
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },
    /// The persistence layer failed
    #[error(transparent)]
    Storage(#[from] StoreError),
    /// A never-expected invariant violation
    #[error("logic fault: {0}")]
    LogicFault(String),
}

/// A chain tip reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TipRef {
    pub id: Hash,
    pub height: u64,
}

/// Header-level view of an applied block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSummary {
    pub id: Hash,
    pub height: u64,
    pub parent_id: Hash,
    pub timestamp: u64,
    pub difficulty: u64,
    pub nonce: u64,
    pub merkle_root: Hash,
    pub tx_count: u32,
    pub network_fee: u64,
    pub treasury_fee: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub miner: Option<Address>,
}

impl From<&Block> for BlockSummary {
    fn from(block: &Block) -> Self {
        let header = &block.header;
        BlockSummary {
            id: block.hash(),
            height: header.height,
            parent_id: header.parent_id,
            timestamp: header.timestamp,
            difficulty: header.difficulty,
            nonce: header.nonce,
            merkle_root: header.merkle_root,
            tx_count: header.tx_count,
            network_fee: header.network_fee,
            treasury_fee: header.treasury_fee,
            miner: if header.miner.is_zero() {
                None
            } else {
                Some(header.miner)
            },
        }
    }
}

/// In-memory chain core guarded by the engine's reader/writer lock
#[derive(Debug, Default)]
struct ChainCore {
    blocks: Vec<Block>,
    index: HashMap<Hash, usize>,
}

impl ChainCore {
    fn best(&self) -> &Block {
        self.blocks.last().expect("chain core holds at least genesis")
    }

    fn push(&mut self, block: Block) {
        self.index.insert(block.hash(), self.blocks.len());
        self.blocks.push(block);
    }

    /// Timestamps of the most recent blocks in chain order, parent last
    fn recent_timestamps(&self, window: usize) -> Vec<u64> {
        let start = self.blocks.len().saturating_sub(window);
        self.blocks[start..].iter().map(|b| b.header.timestamp).collect()
    }

    fn clear(&mut self) {
        self.blocks.clear();
        self.index.clear();
    }
}

/// Undo journal entry for a single UTXO mutation inside one block apply
enum UtxoChange {
    Spent(Hash, u32),
    Added(Hash, u32),
}

/// The chain engine
pub struct ChainEngine {
    config: GenesisConfig,
    core: RwLock<ChainCore>,
    utxos: UtxoSet,
    mempool: Mempool,
    events: EventBus,
    store: Box<dyn BlockStore>,
}

impl ChainEngine {
    /// Open an engine over a block store.
    ///
    /// A non-empty store is replayed from height 0 to rebuild the UTXO
    /// set. A store that cannot be read or replayed is discarded with a
    /// prominent warning and the chain restarts from genesis.
    pub fn open(config: GenesisConfig, store: Box<dyn BlockStore>) -> Result<Self, ChainError> {
        let engine = ChainEngine {
            config,
            core: RwLock::new(ChainCore::default()),
            utxos: UtxoSet::new(),
            mempool: Mempool::new(),
            events: EventBus::new(),
            store,
        };

        let stored_best = match engine.store.best_block() {
            Ok(best) => best,
            Err(e) => {
                log::error!(
                    "block store unreadable at startup, DISCARDING durable chain state: {}",
                    e
                );
                engine.store.clear()?;
                None
            }
        };

        match stored_best {
            Some(best) => {
                let best_height = best.header.height;
                if let Err(e) = engine.replay_stored_chain(best_height) {
                    log::error!(
                        "stored chain failed to rebuild ({}); DISCARDING durable state and \
                         restarting from genesis",
                        e
                    );
                    engine.reset_in_memory();
                    engine.store.clear()?;
                    engine.bootstrap_genesis();
                } else {
                    log::info!(
                        "chain {} restored from storage at height {}",
                        engine.config.chain_id,
                        best_height
                    );
                }
            }
            None => engine.bootstrap_genesis(),
        }

        Ok(engine)
    }

    /// Replay stored blocks 0..=best to rebuild in-memory state
    fn replay_stored_chain(&self, best_height: u64) -> Result<(), ChainError> {
        let mut core = self.lock_write()?;

        for height in 0..=best_height {
            let block = self
                .store
                .block_by_height(height)?
                .ok_or_else(|| {
                    ChainError::LogicFault(format!("stored chain is missing height {}", height))
                })?;

            if height == 0 {
                if !block.is_genesis() {
                    return Err(ChainError::LogicFault(
                        "stored height 0 is not a genesis block".to_string(),
                    ));
                }
            } else {
                let parent = core.best();
                if block.header.parent_id != parent.hash()
                    || block.header.height != parent.header.height + 1
                {
                    return Err(ChainError::LogicFault(format!(
                        "stored block at height {} does not link to its parent",
                        height
                    )));
                }
            }

            self.apply_transactions(&block)?;
            core.push(block);
        }

        Ok(())
    }

    fn reset_in_memory(&self) {
        if let Ok(mut core) = self.core.write() {
            core.clear();
        }
        self.utxos.clear();
        self.mempool.clear();
    }

    /// Build, apply and persist the deterministic genesis block
    fn bootstrap_genesis(&self) {
        let genesis = create_genesis_block(&self.config);
        let id = genesis.hash();

        if let Ok(mut core) = self.core.write() {
            core.push(genesis.clone());
        }
        if let Err(e) = self.store.store_block(&genesis) {
            log::error!("failed to persist genesis block {}: {}", id, e);
        }

        log::info!(
            "chain {} initialized from genesis, block id {}",
            self.config.chain_id,
            id
        );
    }

    fn lock_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, ChainCore>, ChainError> {
        self.core
            .write()
            .map_err(|_| ChainError::LogicFault("chain lock poisoned".to_string()))
    }

    fn lock_read(&self) -> Result<std::sync::RwLockReadGuard<'_, ChainCore>, ChainError> {
        self.core
            .read()
            .map_err(|_| ChainError::LogicFault("chain lock poisoned".to_string()))
    }

    /// Spend inputs and create outputs for every transaction in the
    /// block, journaling each mutation. A spend failure rolls the
    /// journal back and reports the double spend; the UTXO set is left
    /// exactly as before the call.
    fn apply_transactions(&self, block: &Block) -> Result<(), ChainError> {
        let block_id = block.hash();
        let mut journal: Vec<UtxoChange> = Vec::new();

        for tx in &block.transactions {
            let tx_id = tx.id();

            for input in &tx.inputs {
                if !self.utxos.spend(&input.prev_tx_id, input.index) {
                    self.rollback(&journal);
                    return Err(ChainError::DoubleSpend {
                        tx_id: input.prev_tx_id,
                        index: input.index,
                    });
                }
                journal.push(UtxoChange::Spent(input.prev_tx_id, input.index));
            }

            for (index, output) in tx.outputs.iter().enumerate() {
                let index = index as u32;
                self.utxos
                    .add(tx_id, index, output.amount, output.owner, block_id);
                journal.push(UtxoChange::Added(tx_id, index));
            }
        }

        Ok(())
    }

    fn rollback(&self, journal: &[UtxoChange]) {
        for change in journal.iter().rev() {
            match change {
                UtxoChange::Spent(tx_id, index) => self.utxos.unspend(tx_id, *index),
                UtxoChange::Added(tx_id, index) => self.utxos.remove(tx_id, *index),
            }
        }
    }

    /// Validate and apply a mined block. All-or-nothing with respect
    /// to in-memory state; a persistence failure after the in-memory
    /// apply is logged, never propagated.
    pub fn submit_block(&self, block: Block) -> Result<TipRef, ChainError> {
        let mut core = self.lock_write()?;

        let parent = core.best().clone();
        if parent.header.height == u64::MAX {
            return Err(ChainError::LogicFault("chain height overflow".to_string()));
        }

        let recent = core.recent_timestamps(self.config.difficulty.window as usize);
        validate_block(
            &self.config,
            &block,
            &parent,
            &self.utxos,
            &recent,
            now_secs(),
        )?;

        self.apply_transactions(&block)?;

        for tx in &block.transactions {
            self.mempool.remove(&tx.id());
        }

        let id = block.hash();
        let height = block.header.height;
        core.push(block.clone());

        if let Err(e) = self.store.store_block(&block) {
            log::error!(
                "failed to persist block {} at height {}; durable state now lags memory: {}",
                id,
                height,
                e
            );
        }

        self.events
            .publish(TOPIC_BLOCK_ADDED, ChainEvent::BlockAdded { block, height });
        log::info!("block {} applied at height {}", id, height);

        Ok(TipRef { id, height })
    }

    /// Build a candidate block for a miner: coinbase paying the miner
    /// share of reward and fees, followed by the mempool snapshot,
    /// nonce zeroed. Never mutates state; the miner iterates the nonce
    /// and calls [`submit_block`](Self::submit_block).
    pub fn build_template(&self, miner: Address) -> Result<Block, ChainError> {
        let core = self.lock_read()?;
        let parent = core.best();

        let height = parent.header.height + 1;
        let recent = core.recent_timestamps(self.config.difficulty.window as usize);
        let difficulty = calculate_difficulty(&self.config, height, parent.header.difficulty, &recent);

        let pending = self.mempool.snapshot();
        let fees = total_fees(&pending, &self.utxos);
        let split = miner_reward(&self.config, height, fees);

        let now = now_nanos();
        let timestamp = (now / 1_000_000_000).max(parent.header.timestamp);

        let coinbase = Transaction::coinbase(miner, split.miner, now);
        let mut transactions = Vec::with_capacity(pending.len() + 1);
        transactions.push(coinbase);
        transactions.extend(pending);

        let tx_ids: Vec<Hash> = transactions.iter().map(|tx| tx.id()).collect();
        let header = BlockHeader {
            parent_id: parent.hash(),
            height,
            timestamp,
            difficulty,
            miner,
            nonce: 0,
            merkle_root: compute_merkle_root(&tx_ids),
            tx_count: transactions.len() as u32,
            network_fee: split.miner,
            treasury_fee: split.treasury,
        };

        Ok(Block::new(header, transactions))
    }

    /// Validate a pending transaction and admit it to the mempool
    pub fn submit_transaction(&self, tx: Transaction) -> Result<Hash, ChainError> {
        if tx.is_coinbase() {
            return Err(ChainError::Malformed(
                "coinbase transactions cannot be submitted".to_string(),
            ));
        }
        if tx.inputs.is_empty() || tx.outputs.is_empty() {
            return Err(ChainError::Malformed(
                "transaction needs at least one input and one output".to_string(),
            ));
        }
        if !tx.signature.is_empty() && tx.signature.len() != SIGNATURE_ENVELOPE_LEN {
            return Err(ChainError::Malformed(format!(
                "signature envelope must be {} bytes",
                SIGNATURE_ENVELOPE_LEN
            )));
        }

        let _core = self.lock_read()?;
        validate_transaction(&self.config, &tx, &self.utxos)?;

        let id = tx.id();
        self.mempool.add(tx.clone());
        drop(_core);

        self.events
            .publish(TOPIC_TRANSACTION_ADDED, ChainEvent::TransactionAdded(tx));
        log::info!("transaction {} admitted to mempool", id);

        Ok(id)
    }

    /// Select UTXOs and construct an unsigned transfer with change back
    /// to the sender. Signing is the wallet's responsibility.
    pub fn create_transaction(
        &self,
        from: Address,
        to: Address,
        amount: u64,
        fee: u64,
    ) -> Result<Transaction, ChainError> {
        let needed = amount
            .checked_add(fee)
            .ok_or_else(|| ChainError::Malformed("amount plus fee overflows".to_string()))?;

        let _core = self.lock_read()?;
        let available = self.utxos.utxos_for(&from);
        let have: u64 = available.iter().map(|u| u.amount).sum();
        if have < needed {
            return Err(ChainError::InsufficientFunds { have, need: needed });
        }

        let mut inputs = Vec::new();
        let mut selected: u64 = 0;
        for utxo in available {
            if selected >= needed {
                break;
            }
            selected += utxo.amount;
            inputs.push(TxInput {
                prev_tx_id: utxo.tx_id,
                index: utxo.index,
                signature: Vec::new(),
            });
        }

        let mut outputs = vec![TxOutput { owner: to, amount }];
        let change = selected - needed;
        if change > 0 {
            outputs.push(TxOutput {
                owner: from,
                amount: change,
            });
        }

        Ok(Transaction {
            from,
            to,
            amount,
            nonce: 0,
            fee,
            gas_used: 1,
            gas_price: fee,
            data: Vec::new(),
            signature: Vec::new(),
            inputs,
            outputs,
            timestamp_nanos: now_nanos(),
        })
    }

    /// Current chain height
    pub fn height(&self) -> u64 {
        match self.lock_read() {
            Ok(core) => core.best().header.height,
            Err(_) => 0,
        }
    }

    /// Id and height of the best block
    pub fn best_block(&self) -> Result<TipRef, ChainError> {
        let core = self.lock_read()?;
        let best = core.best();
        Ok(TipRef {
            id: best.hash(),
            height: best.header.height,
        })
    }

    /// Summaries of the most recent blocks, newest first. `limit` is
    /// capped at 100.
    pub fn recent_blocks(&self, limit: u32) -> Result<Vec<BlockSummary>, ChainError> {
        let limit = limit.min(MAX_RECENT_BLOCKS).max(1) as usize;
        let core = self.lock_read()?;
        Ok(core
            .blocks
            .iter()
            .rev()
            .take(limit)
            .map(BlockSummary::from)
            .collect())
    }

    /// Balance of an address in micro-KALON
    pub fn balance(&self, address: &Address) -> Result<u64, ChainError> {
        let _core = self.lock_read()?;
        Ok(self.utxos.balance(address))
    }

    /// Unspent outputs owned by an address
    pub fn utxos(&self, address: &Address) -> Result<Vec<Utxo>, ChainError> {
        let _core = self.lock_read()?;
        Ok(self.utxos.utxos_for(address))
    }

    /// Fetch an applied block by id
    pub fn block_by_id(&self, id: &Hash) -> Result<Option<Block>, ChainError> {
        let core = self.lock_read()?;
        Ok(core.index.get(id).map(|&pos| core.blocks[pos].clone()))
    }

    /// Fetch an applied block by height
    pub fn block_by_height(&self, height: u64) -> Result<Option<Block>, ChainError> {
        let core = self.lock_read()?;
        Ok(core.blocks.get(height as usize).cloned())
    }

    /// Number of pending transactions
    pub fn mempool_len(&self) -> usize {
        self.mempool.len()
    }

    /// Pending transactions snapshot
    pub fn mempool_snapshot(&self) -> Vec<Transaction> {
        self.mempool.snapshot()
    }

    /// Subscribe to an engine topic
    pub fn subscribe(&self, topic: &str) -> Receiver<ChainEvent> {
        self.events.subscribe(topic)
    }

    /// The genesis configuration this engine runs under
    pub fn config(&self) -> &GenesisConfig {
        &self.config
    }

    /// Flush and release the durable store
    pub fn close(&self) -> Result<(), ChainError> {
        self.store.close()?;
        Ok(())
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

fn now_secs() -> u64 {
    now_nanos() / 1_000_000_000
}
