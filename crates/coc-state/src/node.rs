//! # Trie Nodes
//!
//! The four node kinds of a Modified Merkle-Patricia Trie, with the RLP
//! encoding used for node hashing. Node identity is
//! `keccak256(rlp_encode(node))`; the empty node hashes to the all-zero
//! sentinel so an empty trie has a stable root.

use sha3::{Digest, Keccak256};

use shared_types::{Hash32, EMPTY_TRIE_ROOT};

use crate::nibbles::Nibbles;

/// One node of the state trie.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrieNode {
    /// Null reference.
    Empty,

    /// Terminal node: remaining path + value.
    Leaf { path: Nibbles, value: Vec<u8> },

    /// Shared-prefix node pointing at a single child.
    Extension { path: Nibbles, child: Hash32 },

    /// 16-way branch; `value` is set when a key terminates here.
    Branch {
        children: Box<[Option<Hash32>; 16]>,
        value: Option<Vec<u8>>,
    },
}

impl TrieNode {
    /// RLP encoding for hashing.
    pub fn rlp_encode(&self) -> Vec<u8> {
        match self {
            TrieNode::Empty => vec![0x80],

            TrieNode::Leaf { path, value } => {
                rlp_list(&[path.encode_hex_prefix(true), value.clone()])
            }

            TrieNode::Extension { path, child } => {
                rlp_list(&[path.encode_hex_prefix(false), child.0.to_vec()])
            }

            TrieNode::Branch { children, value } => {
                let mut items: Vec<Vec<u8>> = Vec::with_capacity(17);
                for child in children.iter() {
                    match child {
                        Some(hash) => items.push(hash.0.to_vec()),
                        None => items.push(Vec::new()),
                    }
                }
                items.push(value.clone().unwrap_or_default());
                rlp_list(&items)
            }
        }
    }

    /// keccak256 of the RLP encoding.
    pub fn hash(&self) -> Hash32 {
        if matches!(self, TrieNode::Empty) {
            return EMPTY_TRIE_ROOT;
        }
        let mut hasher = Keccak256::new();
        hasher.update(self.rlp_encode());
        Hash32(hasher.finalize().into())
    }
}

/// RLP-encode a byte string.
pub fn rlp_bytes(data: &[u8]) -> Vec<u8> {
    if data.len() == 1 && data[0] < 0x80 {
        vec![data[0]]
    } else if data.len() < 56 {
        let mut result = Vec::with_capacity(data.len() + 1);
        result.push(0x80 + data.len() as u8);
        result.extend_from_slice(data);
        result
    } else {
        let len_bytes = minimal_be(data.len());
        let mut result = Vec::with_capacity(data.len() + len_bytes.len() + 1);
        result.push(0xb7 + len_bytes.len() as u8);
        result.extend_from_slice(&len_bytes);
        result.extend_from_slice(data);
        result
    }
}

/// RLP-encode a list of byte strings.
pub fn rlp_list(items: &[Vec<u8>]) -> Vec<u8> {
    let encoded: Vec<Vec<u8>> = items.iter().map(|i| rlp_bytes(i)).collect();
    let total: usize = encoded.iter().map(Vec::len).sum();

    let mut result = Vec::with_capacity(total + 9);
    if total < 56 {
        result.push(0xc0 + total as u8);
    } else {
        let len_bytes = minimal_be(total);
        result.push(0xf7 + len_bytes.len() as u8);
        result.extend_from_slice(&len_bytes);
    }
    for item in encoded {
        result.extend(item);
    }
    result
}

fn minimal_be(len: usize) -> Vec<u8> {
    let bytes = len.to_be_bytes();
    let start = bytes
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(bytes.len() - 1);
    bytes[start..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_node_has_sentinel_hash() {
        assert_eq!(TrieNode::Empty.hash(), EMPTY_TRIE_ROOT);
    }

    #[test]
    fn rlp_single_small_byte_is_itself() {
        assert_eq!(rlp_bytes(&[0x42]), vec![0x42]);
    }

    #[test]
    fn rlp_short_string_prefix() {
        assert_eq!(rlp_bytes(b"dog"), vec![0x83, b'd', b'o', b'g']);
    }

    #[test]
    fn rlp_long_string_prefix() {
        let data = vec![7u8; 60];
        let encoded = rlp_bytes(&data);
        assert_eq!(encoded[0], 0xb8);
        assert_eq!(encoded[1], 60);
        assert_eq!(encoded.len(), 62);
    }

    #[test]
    fn leaf_hash_depends_on_path_and_value() {
        let leaf = TrieNode::Leaf {
            path: Nibbles(vec![1, 2]),
            value: b"v".to_vec(),
        };
        let other_path = TrieNode::Leaf {
            path: Nibbles(vec![1, 3]),
            value: b"v".to_vec(),
        };
        let other_value = TrieNode::Leaf {
            path: Nibbles(vec![1, 2]),
            value: b"w".to_vec(),
        };
        assert_ne!(leaf.hash(), other_path.hash());
        assert_ne!(leaf.hash(), other_value.hash());
    }

    #[test]
    fn branch_children_change_hash() {
        let mut children: Box<[Option<Hash32>; 16]> = Box::new(Default::default());
        let empty_branch = TrieNode::Branch {
            children: children.clone(),
            value: None,
        };
        children[3] = Some(Hash32([1u8; 32]));
        let full_branch = TrieNode::Branch {
            children,
            value: None,
        };
        assert_ne!(empty_branch.hash(), full_branch.hash());
    }
}
