//! UTXO set
//!
//! The authoritative ledger of unspent transaction outputs, keyed by
//! `(creating tx id, output index)`. Entries carry a monotonic spent
//! flag instead of being deleted, so the engine can undo a partial
//! block application and roll back a whole block by its creating block
//! id. Internally synchronized; the engine's writer lock additionally
//! serializes whole-block mutation sequences, so aggregate reads only
//! ever observe state between block applications.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::crypto::{Address, Hash};

/// Key for UTXO lookup: (tx id, output index)
pub type UtxoKey = (Hash, u32);

/// An unspent transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Id of the transaction that created this output
    pub tx_id: Hash,
    /// Index of the output in that transaction
    pub index: u32,
    /// Amount in micro-KALON
    pub amount: u64,
    /// Owner address
    pub owner: Address,
    /// Id of the block that created this output
    pub block_id: Hash,
    /// Whether the output has been consumed on the best chain
    pub spent: bool,
}

/// Set of all transaction outputs, spent and unspent
#[derive(Debug, Default)]
pub struct UtxoSet {
    inner: RwLock<HashMap<UtxoKey, Utxo>>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a new unspent entry.
    ///
    /// Re-inserting an existing key is an engine bug: panics in debug
    /// builds, logs and refuses the overwrite in release builds.
    pub fn add(&self, tx_id: Hash, index: u32, amount: u64, owner: Address, block_id: Hash) {
        let mut utxos = match self.inner.write() {
            Ok(guard) => guard,
            Err(_) => {
                log::error!("failed to acquire write lock on UTXO set");
                return;
            }
        };

        let key = (tx_id, index);
        if utxos.contains_key(&key) {
            debug_assert!(false, "UTXO {}:{} inserted twice", tx_id, index);
            log::error!("logic fault: UTXO {}:{} inserted twice, keeping original", tx_id, index);
            return;
        }

        utxos.insert(
            key,
            Utxo {
                tx_id,
                index,
                amount,
                owner,
                block_id,
                spent: false,
            },
        );
    }

    /// Mark an entry spent. Returns true only when a previously
    /// unspent entry was found.
    pub fn spend(&self, tx_id: &Hash, index: u32) -> bool {
        let mut utxos = match self.inner.write() {
            Ok(guard) => guard,
            Err(_) => {
                log::error!("failed to acquire write lock on UTXO set");
                return false;
            }
        };

        match utxos.get_mut(&(*tx_id, index)) {
            Some(utxo) if !utxo.spent => {
                utxo.spent = true;
                true
            }
            _ => false,
        }
    }

    /// Undo a `spend` inside a failed block application
    pub(crate) fn unspend(&self, tx_id: &Hash, index: u32) {
        let mut utxos = match self.inner.write() {
            Ok(guard) => guard,
            Err(_) => {
                log::error!("failed to acquire write lock on UTXO set");
                return;
            }
        };

        if let Some(utxo) = utxos.get_mut(&(*tx_id, index)) {
            utxo.spent = false;
        }
    }

    /// Undo an `add` inside a failed block application
    pub(crate) fn remove(&self, tx_id: &Hash, index: u32) {
        let mut utxos = match self.inner.write() {
            Ok(guard) => guard,
            Err(_) => {
                log::error!("failed to acquire write lock on UTXO set");
                return;
            }
        };

        utxos.remove(&(*tx_id, index));
    }

    /// Fetch an entry (spent or unspent)
    pub fn get(&self, tx_id: &Hash, index: u32) -> Option<Utxo> {
        match self.inner.read() {
            Ok(utxos) => utxos.get(&(*tx_id, index)).cloned(),
            Err(_) => {
                log::error!("failed to acquire read lock on UTXO set");
                None
            }
        }
    }

    /// Whether an unspent entry exists under the key
    pub fn contains_unspent(&self, tx_id: &Hash, index: u32) -> bool {
        self.get(tx_id, index).map(|u| !u.spent).unwrap_or(false)
    }

    /// All currently unspent entries for an owner. Order unspecified.
    pub fn utxos_for(&self, owner: &Address) -> Vec<Utxo> {
        match self.inner.read() {
            Ok(utxos) => utxos
                .values()
                .filter(|u| !u.spent && u.owner == *owner)
                .cloned()
                .collect(),
            Err(_) => {
                log::error!("failed to acquire read lock on UTXO set");
                Vec::new()
            }
        }
    }

    /// Total unspent amount held by an owner
    pub fn balance(&self, owner: &Address) -> u64 {
        match self.inner.read() {
            Ok(utxos) => utxos
                .values()
                .filter(|u| !u.spent && u.owner == *owner)
                .map(|u| u.amount)
                .sum(),
            Err(_) => {
                log::error!("failed to acquire read lock on UTXO set");
                0
            }
        }
    }

    /// Drop every entry created by a block, spent or not. Rollback
    /// path only.
    pub fn remove_by_creating_block(&self, block_id: &Hash) {
        let mut utxos = match self.inner.write() {
            Ok(guard) => guard,
            Err(_) => {
                log::error!("failed to acquire write lock on UTXO set");
                return;
            }
        };

        utxos.retain(|_, utxo| utxo.block_id != *block_id);
    }

    /// Drop every entry. Used only when startup reconstruction
    /// abandons a half-rebuilt state.
    pub(crate) fn clear(&self) {
        match self.inner.write() {
            Ok(mut utxos) => utxos.clear(),
            Err(_) => {
                log::error!("failed to acquire write lock on UTXO set");
            }
        }
    }

    /// Number of tracked entries, spent included
    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(utxos) => utxos.len(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
