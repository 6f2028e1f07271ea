//! # EIP-191 Signing and Address Recovery
//!
//! Every message the node signs goes through the Ethereum signed-message
//! prefix (`"\x19Ethereum Signed Message:\n" || len || msg`) before hashing,
//! so protocol signatures can never collide with transaction signatures.
//!
//! Signatures are 65 bytes (`r || s || v`) rendered as `0x`-hex; `v` is the
//! Ethereum-convention recovery byte (27/28). Verification recovers the
//! signer's address and compares, so no public key ever travels on the wire.

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use zeroize::Zeroize;

use shared_types::{Address, Hash32};

use crate::errors::CryptoError;

/// Apply the EIP-191 prefix and return the keccak-256 digest to sign.
pub fn prefixed_digest(message: &[u8]) -> Hash32 {
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n");
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    Hash32(hasher.finalize().into())
}

/// Derive the 20-byte address from a verifying key.
fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    // Uncompressed SEC1 is 0x04 || x || y; the address is the last 20 bytes
    // of keccak256(x || y).
    let mut hasher = Keccak256::new();
    hasher.update(&point.as_bytes()[1..]);
    let digest: [u8; 32] = hasher.finalize().into();
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&digest[12..]);
    Address(addr)
}

/// The node's signing identity.
///
/// Wraps a secp256k1 key loaded from the 32-byte `node-key` file. The node
/// id is the lowercase hex rendering of the derived address.
pub struct NodeSigner {
    signing_key: SigningKey,
    address: Address,
}

impl NodeSigner {
    /// Build a signer from raw private-key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_bytes((&bytes).into()).map_err(|_| CryptoError::InvalidPrivateKey)?;
        let address = address_of(signing_key.verifying_key());
        Ok(Self {
            signing_key,
            address,
        })
    }

    /// Build a signer from a `0x`-prefixed hex private key (the `node-key`
    /// file format).
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let stripped = s.trim().strip_prefix("0x").unwrap_or(s.trim());
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(stripped, &mut bytes)
            .map_err(|_| CryptoError::InvalidPrivateKey)?;
        let signer = Self::from_bytes(bytes);
        bytes.zeroize();
        signer
    }

    /// Generate a random signer (tests and key provisioning).
    pub fn random() -> Self {
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        let address = address_of(signing_key.verifying_key());
        Self {
            signing_key,
            address,
        }
    }

    /// The signer's address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// The node id: the lowercase hex address.
    pub fn node_id(&self) -> String {
        self.address.to_hex()
    }

    /// Sign a UTF-8 message, returning the 65-byte `0x`-hex signature.
    pub fn sign(&self, message: &str) -> Result<String, CryptoError> {
        self.sign_bytes(message.as_bytes())
    }

    /// Sign raw bytes with the EIP-191 prefix applied.
    pub fn sign_bytes(&self, message: &[u8]) -> Result<String, CryptoError> {
        let digest = prefixed_digest(message);
        let (sig, recid): (Signature, RecoveryId) = self
            .signing_key
            .sign_prehash_recoverable(digest.as_bytes())
            .map_err(|_| CryptoError::SigningFailed)?;
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&sig.to_bytes());
        out[64] = 27 + recid.to_byte();
        Ok(format!("0x{}", hex::encode(out)))
    }

    /// Export the private key as `0x`-hex (the `node-key` file format).
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.signing_key.to_bytes()))
    }
}

impl Drop for NodeSigner {
    fn drop(&mut self) {
        let mut bytes: [u8; 32] = self.signing_key.to_bytes().into();
        bytes.zeroize();
    }
}

impl std::fmt::Debug for NodeSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose key material through Debug.
        f.debug_struct("NodeSigner")
            .field("address", &self.address)
            .finish()
    }
}

/// Recover the signing address from a message and a 65-byte hex signature.
pub fn recover_address(message: &str, signature: &str) -> Result<Address, CryptoError> {
    recover_address_bytes(message.as_bytes(), signature)
}

/// Byte-message variant of [`recover_address`].
pub fn recover_address_bytes(message: &[u8], signature: &str) -> Result<Address, CryptoError> {
    let stripped = signature.strip_prefix("0x").unwrap_or(signature);
    let raw = hex::decode(stripped)
        .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
    if raw.len() != 65 {
        return Err(CryptoError::MalformedSignature(format!(
            "expected 65 bytes, got {}",
            raw.len()
        )));
    }
    let sig = Signature::from_slice(&raw[..64])
        .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
    // Accept both the raw recovery id (0/1) and the Ethereum v (27/28).
    let v = raw[64];
    let recid_byte = if v >= 27 { v - 27 } else { v };
    let recid = RecoveryId::from_byte(recid_byte)
        .ok_or_else(|| CryptoError::MalformedSignature(format!("recovery byte {v}")))?;

    let digest = prefixed_digest(message);
    let key = VerifyingKey::recover_from_prehash(digest.as_bytes(), &sig, recid)
        .map_err(|_| CryptoError::RecoveryFailed)?;
    Ok(address_of(&key))
}

/// Verify that `signature` over `message` recovers to `expected`.
pub fn verify_signer(message: &str, signature: &str, expected: &Address) -> bool {
    matches!(recover_address(message, signature), Ok(addr) if addr == *expected)
}
