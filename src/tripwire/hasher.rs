//! WF-014: BLAKE3 content hashing for installed payloads.

use crate::core::types::FileTree;

/// Hash a byte buffer. Returns `"blake3:{hex}"`.
pub fn hash_bytes(data: &[u8]) -> String {
    format!("blake3:{}", blake3::hash(data).to_hex())
}

/// Hash a file tree (sorted paths, relative paths included in hash).
pub fn hash_tree(tree: &FileTree) -> String {
    let mut hasher = blake3::Hasher::new();
    for (rel, data) in tree.iter() {
        hasher.update(rel.as_bytes());
        hasher.update(b"\0");
        hasher.update(hash_bytes(data).as_bytes());
        hasher.update(b"\n");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}
