//! Durable block storage
//!
//! The engine persists through the narrow [`BlockStore`] contract:
//! blocks are retrievable by id and by height, and a best-block pointer
//! tracks the highest stored block. `store_block` makes the block
//! durable before it moves the pointer, so a crash between the two
//! writes can never leave the pointer dangling.
//!
//! Two implementations: [`SledBlockStore`] over an embedded sled
//! database for production, [`MemoryBlockStore`] for tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use sled::{Db, Tree};
use thiserror::Error;

use crate::consensus::Block;
use crate::crypto::Hash;

const BEST_BLOCK_KEY: &str = "best_block";

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("store lock poisoned")]
    Poisoned,
}

/// Contract for durable block storage
pub trait BlockStore: Send + Sync {
    /// Persist a block and advance the best pointer iff the block's
    /// height exceeds the stored best. The block must be durably
    /// retrievable before the pointer moves.
    fn store_block(&self, block: &Block) -> Result<(), StoreError>;

    /// Fetch a block by id; absent blocks are `Ok(None)`
    fn block_by_id(&self, id: &Hash) -> Result<Option<Block>, StoreError>;

    /// Fetch a block by height; absent heights are `Ok(None)`
    fn block_by_height(&self, height: u64) -> Result<Option<Block>, StoreError>;

    /// The block under the best pointer, if any
    fn best_block(&self) -> Result<Option<Block>, StoreError>;

    /// Height of the stored best block, or zero when empty
    fn block_count(&self) -> Result<u64, StoreError>;

    /// Discard all stored blocks and the best pointer. Used only when
    /// startup reconstruction finds the store corrupt.
    fn clear(&self) -> Result<(), StoreError>;

    /// Flush and release
    fn close(&self) -> Result<(), StoreError>;
}

fn encode_block(block: &Block) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(block).map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode_block(bytes: &[u8]) -> Result<Block, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Codec(e.to_string()))
}

/// Sled-backed block store
#[derive(Debug, Clone)]
pub struct SledBlockStore {
    db: Db,
    by_id: Tree,
    by_height: Tree,
    meta: Tree,
}

impl SledBlockStore {
    /// Open or create the database under `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let by_id = db.open_tree("blocks_by_id")?;
        let by_height = db.open_tree("blocks_by_height")?;
        let meta = db.open_tree("meta")?;

        Ok(Self {
            db,
            by_id,
            by_height,
            meta,
        })
    }
}

impl BlockStore for SledBlockStore {
    fn store_block(&self, block: &Block) -> Result<(), StoreError> {
        let id = block.hash();
        let payload = encode_block(block)?;

        self.by_id.insert(id.0, payload.clone())?;
        self.by_height
            .insert(block.header.height.to_be_bytes(), payload)?;
        // the block must be durable before the pointer moves
        self.db.flush()?;

        let best_height = match self.best_block()? {
            Some(best) => Some(best.header.height),
            None => None,
        };
        if best_height.map_or(true, |h| block.header.height > h) {
            self.meta.insert(BEST_BLOCK_KEY, id.0.as_ref())?;
            self.db.flush()?;
        }

        Ok(())
    }

    fn block_by_id(&self, id: &Hash) -> Result<Option<Block>, StoreError> {
        match self.by_id.get(id.0)? {
            Some(bytes) => Ok(Some(decode_block(&bytes)?)),
            None => Ok(None),
        }
    }

    fn block_by_height(&self, height: u64) -> Result<Option<Block>, StoreError> {
        match self.by_height.get(height.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode_block(&bytes)?)),
            None => Ok(None),
        }
    }

    fn best_block(&self) -> Result<Option<Block>, StoreError> {
        let pointer = match self.meta.get(BEST_BLOCK_KEY)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        if pointer.len() != 32 {
            return Err(StoreError::Codec(format!(
                "best-block pointer has {} bytes, expected 32",
                pointer.len()
            )));
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(&pointer);

        self.block_by_id(&Hash(id))
    }

    fn block_count(&self) -> Result<u64, StoreError> {
        Ok(self
            .best_block()?
            .map(|block| block.header.height)
            .unwrap_or(0))
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.by_id.clear()?;
        self.by_height.clear()?;
        self.meta.clear()?;
        self.db.flush()?;
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    by_id: HashMap<Hash, Vec<u8>>,
    by_height: HashMap<u64, Vec<u8>>,
    best: Option<Hash>,
}

/// In-memory block store for tests and ephemeral nodes
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockStore for MemoryBlockStore {
    fn store_block(&self, block: &Block) -> Result<(), StoreError> {
        let id = block.hash();
        let payload = encode_block(block)?;

        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        inner.by_id.insert(id, payload.clone());
        inner.by_height.insert(block.header.height, payload);

        let best_height = match inner.best {
            Some(best_id) => inner
                .by_id
                .get(&best_id)
                .map(|bytes| decode_block(bytes))
                .transpose()?
                .map(|b| b.header.height),
            None => None,
        };
        if best_height.map_or(true, |h| block.header.height > h) {
            inner.best = Some(id);
        }

        Ok(())
    }

    fn block_by_id(&self, id: &Hash) -> Result<Option<Block>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        inner.by_id.get(id).map(|bytes| decode_block(bytes)).transpose()
    }

    fn block_by_height(&self, height: u64) -> Result<Option<Block>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        inner
            .by_height
            .get(&height)
            .map(|bytes| decode_block(bytes))
            .transpose()
    }

    fn best_block(&self) -> Result<Option<Block>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        match inner.best {
            Some(id) => inner.by_id.get(&id).map(|bytes| decode_block(bytes)).transpose(),
            None => Ok(None),
        }
    }

    fn block_count(&self) -> Result<u64, StoreError> {
        Ok(self
            .best_block()?
            .map(|block| block.header.height)
            .unwrap_or(0))
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        *inner = MemoryInner::default();
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
