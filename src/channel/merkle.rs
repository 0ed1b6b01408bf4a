use crate::types::Hash;
use sha3::{Digest, Keccak256};

/// Root of a binary Keccak-256 tree over `leaves`.
///
/// Leaves are sorted first, so the root only depends on the set of active
/// transfers and not on the order they were created in. An odd node at the
/// end of a level is promoted unchanged. The empty set has the zero root.
pub fn merkle_root(leaves: impl IntoIterator<Item = Hash>) -> Hash {
    let mut level: Vec<Hash> = leaves.into_iter().collect();
    if level.is_empty() {
        return Hash::ZERO;
    }
    level.sort_unstable();

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [l, r] => hash_pair(l, r),
                _ => pair[0],
            })
            .collect();
    }
    level[0]
}

fn hash_pair(l: &Hash, r: &Hash) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(l.0);
    hasher.update(r.0);
    Hash(hasher.finalize().into())
}
