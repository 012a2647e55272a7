//! Merkle tree implementation
//!
//! Computes the transaction merkle root committed in block headers.

use super::{hash_pair, Hash};

/// Compute the merkle root of a list of transaction ids.
///
/// Zero hashes yield the zero root; a single hash is its own root; odd
/// levels duplicate their last element.
pub fn compute_merkle_root(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return Hash::zero();
    }

    if hashes.len() == 1 {
        return hashes[0];
    }

    let mut current_level: Vec<Hash> = hashes.to_vec();

    while current_level.len() > 1 {
        if current_level.len() % 2 == 1 {
            current_level.push(*current_level.last().expect("level is non-empty"));
        }

        let mut next_level = Vec::with_capacity(current_level.len() / 2);
        for chunk in current_level.chunks(2) {
            next_level.push(hash_pair(&chunk[0], &chunk[1]));
        }

        current_level = next_level;
    }

    current_level[0]
}
