//! Keccak256 hashing for signatures and state packing.
//!
//! ```text
//! personal_message_hash(m) = keccak256("\x19Ethereum Signed Message:\n" || len(m) || m)
//! request_digest(payload) = keccak256(compact_json(payload))
//! ```

use sha3::{Digest, Keccak256};

use permitpool_core::error::Result;

/// EIP-191 version 0x45 prefix.
const PERSONAL_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";

/// Computes Keccak256 hash.
///
/// Note: Keccak256 is NOT SHA3-256. They use different padding.
pub fn keccak256(input: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    Digest::update(&mut hasher, input);
    hasher.finalize().into()
}

/// Hash signed by an EIP-191 personal signature over `message`.
pub fn personal_message_hash(message: impl AsRef<[u8]>) -> [u8; 32] {
    let message = message.as_ref();
    let mut hasher = Keccak256::new();
    Digest::update(&mut hasher, PERSONAL_MESSAGE_PREFIX.as_bytes());
    Digest::update(&mut hasher, message.len().to_string().as_bytes());
    Digest::update(&mut hasher, message);
    hasher.finalize().into()
}

/// Digest a session key signs for a protocol request payload.
pub fn request_digest(payload: &serde_json::Value) -> Result<[u8; 32]> {
    let bytes = serde_json::to_vec(payload)?;
    Ok(keccak256(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keccak256() {
        let hash = keccak256(b"hello");

        // Known test vector
        let expected =
            hex::decode("1c8aff950685c2ed4bc3174f3472287b56d9517b9c948127319a09a7a36deac8").unwrap();
        assert_eq!(hash.as_slice(), expected.as_slice());
    }

    #[test]
    fn test_personal_message_hash_matches_ethers() {
        let ours = personal_message_hash("chal-123");
        let theirs = ethers::utils::hash_message("chal-123");
        assert_eq!(ours, theirs.0);
    }

    #[test]
    fn test_request_digest() {
        let a = request_digest(&json!([1, "transfer", {"a": 2, "b": 1}, 5])).unwrap();
        let b = request_digest(&json!([1, "transfer", {"a": 2, "b": 1}, 5])).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, keccak256(br#"[1,"transfer",{"a":2,"b":1},5]"#));

        let c = request_digest(&json!([2, "transfer", {"a": 2, "b": 1}, 5])).unwrap();
        assert_ne!(a, c);
    }
}
