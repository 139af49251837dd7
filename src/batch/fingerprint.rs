use sha2::{Digest, Sha256};

/// Hex characters kept from the digest.
pub const FINGERPRINT_LEN: usize = 16;

/// Stable short digest of prompt content, used to find an artifact produced
/// for the same content under any prompt id.
pub fn fingerprint(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_LEN);
    hex
}
