//! # Trie Construction
//!
//! Builds a Merkle-Patricia commitment from a flat set of key/value pairs.
//! The state store keeps accounts and storage slots as flat records and
//! rebuilds the trie on commit, so construction here is a pure function:
//! sorted entries in, root hash and node set out.

use std::collections::HashMap;

use shared_types::{Hash32, EMPTY_TRIE_ROOT};

use crate::nibbles::Nibbles;
use crate::node::TrieNode;

/// Build a trie over `entries` (raw key bytes -> value).
///
/// Keys are hashed to nibble paths by the caller (accounts use
/// keccak256(address), storage uses keccak256(slot)), so paths here are
/// equal-length and collision-free. Returns the root hash and every node
/// keyed by its hash.
pub fn build_trie(entries: &[(Vec<u8>, Vec<u8>)]) -> (Hash32, HashMap<Hash32, TrieNode>) {
    let mut nodes = HashMap::new();
    if entries.is_empty() {
        return (EMPTY_TRIE_ROOT, nodes);
    }
    let mut paths: Vec<(Nibbles, Vec<u8>)> = entries
        .iter()
        .map(|(k, v)| (Nibbles::from_bytes(k), v.clone()))
        .collect();
    paths.sort_by(|a, b| a.0 .0.cmp(&b.0 .0));
    paths.dedup_by(|a, b| a.0 == b.0);

    let root = build_node(&paths, 0, &mut nodes);
    (root, nodes)
}

/// Recursively build the subtree covering `entries`, all of which agree on
/// the first `depth` nibbles.
fn build_node(
    entries: &[(Nibbles, Vec<u8>)],
    depth: usize,
    nodes: &mut HashMap<Hash32, TrieNode>,
) -> Hash32 {
    if entries.is_empty() {
        return EMPTY_TRIE_ROOT;
    }

    if entries.len() == 1 {
        let (path, value) = &entries[0];
        let node = TrieNode::Leaf {
            path: path.slice(depth),
            value: value.clone(),
        };
        return intern(node, nodes);
    }

    // Longest prefix shared by every entry beyond `depth`.
    let first = &entries[0].0;
    let mut common = first.len() - depth;
    for (path, _) in &entries[1..] {
        let shared = first
            .slice(depth)
            .common_prefix_len(&path.slice(depth));
        common = common.min(shared);
    }

    if common > 0 {
        let child = build_branch(entries, depth + common, nodes);
        let node = TrieNode::Extension {
            path: first.slice_range(depth, depth + common),
            child,
        };
        return intern(node, nodes);
    }

    build_branch(entries, depth, nodes)
}

fn build_branch(
    entries: &[(Nibbles, Vec<u8>)],
    depth: usize,
    nodes: &mut HashMap<Hash32, TrieNode>,
) -> Hash32 {
    let mut children: Box<[Option<Hash32>; 16]> = Box::new(Default::default());
    let mut branch_value: Option<Vec<u8>> = None;

    let mut start = 0;
    while start < entries.len() {
        let (path, value) = &entries[start];
        if path.len() == depth {
            // Key terminates exactly at this branch.
            branch_value = Some(value.clone());
            start += 1;
            continue;
        }
        let nibble = path.at(depth);
        let mut end = start + 1;
        while end < entries.len()
            && entries[end].0.len() > depth
            && entries[end].0.at(depth) == nibble
        {
            end += 1;
        }
        let child = build_node(&entries[start..end], depth + 1, nodes);
        children[nibble as usize] = Some(child);
        start = end;
    }

    intern(
        TrieNode::Branch {
            children,
            value: branch_value,
        },
        nodes,
    )
}

fn intern(node: TrieNode, nodes: &mut HashMap<Hash32, TrieNode>) -> Hash32 {
    let hash = node.hash();
    nodes.insert(hash, node);
    hash
}
