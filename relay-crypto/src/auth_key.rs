//! The long-lived authorization key and its derived identifiers.

use crate::sha1;

/// A 256-byte authorization key with its pre-computed SHA-1 identifiers.
///
/// The *key id* (the SHA-1 tail) names the key in every encrypted envelope;
/// the *aux hash* (the SHA-1 head) only appears in the handshake's
/// new-nonce-hash computations.
#[derive(Clone)]
pub struct AuthKey {
    data: [u8; 256],
    aux_hash: [u8; 8],
    key_id: [u8; 8],
}

impl AuthKey {
    /// Wrap the raw 256-byte DH output.
    pub fn from_bytes(data: [u8; 256]) -> Self {
        let digest = sha1!(&data);
        let mut aux_hash = [0u8; 8];
        aux_hash.copy_from_slice(&digest[..8]);
        let mut key_id = [0u8; 8];
        key_id.copy_from_slice(&digest[12..]);
        Self { data, aux_hash, key_id }
    }

    /// The raw key material.
    pub fn bytes(&self) -> &[u8; 256] {
        &self.data
    }

    /// The 8-byte envelope key id (last 8 bytes of SHA-1 of the key).
    pub fn key_id(&self) -> [u8; 8] {
        self.key_id
    }

    /// The 8-byte aux hash (first 8 bytes of SHA-1 of the key).
    pub fn aux_hash(&self) -> [u8; 8] {
        self.aux_hash
    }

    /// Compute `new_nonce_hash{number}` for the final handshake answer.
    pub fn new_nonce_hash(&self, new_nonce: &[u8; 32], number: u8) -> [u8; 16] {
        let digest = sha1!(new_nonce, [number], self.aux_hash);
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest[4..]);
        out
    }
}

impl std::fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthKey(id={:#018x})", u64::from_le_bytes(self.key_id))
    }
}

impl PartialEq for AuthKey {
    fn eq(&self, other: &Self) -> bool {
        self.key_id == other.key_id
    }
}
