//! # Key Scheme
//!
//! One flat namespace, prefix per logical index. Prefix scans return keys in
//! lexicographic order, so anything that needs height ordering within a scan
//! sorts numerically after the fact.

use shared_types::{Address, Hash32};

/// `b:<decimal height>` -> serialized block.
pub fn block(height: u64) -> Vec<u8> {
    format!("b:{height}").into_bytes()
}

/// `h:<hash>` -> decimal height.
pub fn height_of(hash: &Hash32) -> Vec<u8> {
    format!("h:{}", hash.to_hex()).into_bytes()
}

/// `m:latest-block` -> serialized latest block.
pub fn latest_block() -> Vec<u8> {
    b"m:latest-block".to_vec()
}

/// `l:<height>` -> indexed logs for the block at that height.
pub fn logs(height: u64) -> Vec<u8> {
    format!("l:{height}").into_bytes()
}

/// `tx:<hash>` -> raw bytes + receipt.
pub fn tx(hash: &Hash32) -> Vec<u8> {
    format!("tx:{}", hash.to_hex()).into_bytes()
}

/// `addr-tx:<address>:<height>:<txIndex>` -> tx hash.
pub fn addr_tx(address: &Address, height: u64, tx_index: u32) -> Vec<u8> {
    format!("addr-tx:{}:{height}:{tx_index}", address.to_hex()).into_bytes()
}

/// Prefix for scanning one address's transactions.
pub fn addr_tx_prefix(address: &Address) -> Vec<u8> {
    format!("addr-tx:{}:", address.to_hex()).into_bytes()
}

/// `contract:<address>` -> deployment record.
pub fn contract(address: &Address) -> Vec<u8> {
    format!("contract:{}", address.to_hex()).into_bytes()
}

/// `n:<hash>` -> confirmation timestamp. The transaction replay registry.
pub fn nonce(hash: &Hash32) -> Vec<u8> {
    format!("n:{}", hash.to_hex()).into_bytes()
}

/// `meta:stateRoot` -> committed state root, persisted across restarts.
pub fn state_root_meta() -> Vec<u8> {
    b"meta:stateRoot".to_vec()
}

/// `st:<node hash>` -> state trie node.
pub fn trie_node(hash: &Hash32) -> Vec<u8> {
    format!("st:{}", hash.to_hex()).into_bytes()
}

/// `code:<code hash>` -> contract bytecode.
pub fn code(hash: &Hash32) -> Vec<u8> {
    format!("code:{}", hash.to_hex()).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_do_not_collide() {
        let h = Hash32([7u8; 32]);
        let a = Address([7u8; 20]);
        let keys = [
            block(7),
            height_of(&h),
            latest_block(),
            logs(7),
            tx(&h),
            addr_tx(&a, 7, 0),
            contract(&a),
            nonce(&h),
            state_root_meta(),
            trie_node(&h),
            code(&h),
        ];
        for (i, k1) in keys.iter().enumerate() {
            for (j, k2) in keys.iter().enumerate() {
                if i != j {
                    assert_ne!(k1, k2);
                }
            }
        }
    }
}
