//! Mempool
//!
//! Validated-but-unmined transactions, keyed by transaction id. The
//! pool enforces no fee or eviction policy; the engine prunes it on
//! every block application.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::crypto::Hash;
use crate::validation::Transaction;

/// Pool of pending transactions
#[derive(Debug, Default)]
pub struct Mempool {
    inner: RwLock<HashMap<Hash, Transaction>>,
}

impl Mempool {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn add(&self, tx: Transaction) {
        match self.inner.write() {
            Ok(mut pool) => {
                pool.insert(tx.id(), tx);
            }
            Err(_) => {
                log::error!("failed to acquire write lock on mempool");
            }
        }
    }

    pub fn remove(&self, tx_id: &Hash) {
        match self.inner.write() {
            Ok(mut pool) => {
                pool.remove(tx_id);
            }
            Err(_) => {
                log::error!("failed to acquire write lock on mempool");
            }
        }
    }

    pub fn contains(&self, tx_id: &Hash) -> bool {
        match self.inner.read() {
            Ok(pool) => pool.contains_key(tx_id),
            Err(_) => {
                log::error!("failed to acquire read lock on mempool");
                false
            }
        }
    }

    /// A consistent list of the current pending transactions
    pub fn snapshot(&self) -> Vec<Transaction> {
        match self.inner.read() {
            Ok(pool) => pool.values().cloned().collect(),
            Err(_) => {
                log::error!("failed to acquire read lock on mempool");
                Vec::new()
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(pool) => pool.len(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        match self.inner.write() {
            Ok(mut pool) => {
                pool.clear();
            }
            Err(_) => {
                log::error!("failed to acquire write lock on mempool");
            }
        }
    }
}
