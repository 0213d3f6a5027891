//! Cryptographic primitives for the relay RPC protocol.
//!
//! Provides:
//! - AES-256-IGE encryption/decryption
//! - `sha1!` / `sha256!` hash macros
//! - Pollard-rho factorization for the handshake's `pq` step
//! - Raw RSA (no OAEP) with computed key fingerprints
//! - [`AuthKey`] — the 256-byte session key and its identifiers
//! - Message-key and AES key/IV derivation for the encrypted envelope
//! - Nonce-derived keys for the handshake's encrypted answer
//! - Miller–Rabin safe-prime validation

#![deny(unsafe_code)]

pub mod aes;
mod auth_key;
mod factorize;
pub mod prime;
pub mod rsa;
mod sha;

pub use auth_key::AuthKey;
pub use factorize::factorize;

/// Which peer produced the message being keyed.
///
/// The derivation reads the authorization key at different offsets for each
/// direction, so a captured client frame cannot be replayed as a server frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    /// Messages sent by the client.
    Client,
    /// Messages sent by the server.
    Server,
}

impl Side {
    fn offset(self) -> usize {
        match self {
            Side::Client => 0,
            Side::Server => 8,
        }
    }

    /// The opposite direction.
    pub fn other(self) -> Side {
        match self {
            Side::Client => Side::Server,
            Side::Server => Side::Client,
        }
    }
}

/// Derive the 16-byte message key from the unpadded plaintext.
///
/// `msg_key = sha1(plaintext)[4..20]`.
pub fn message_key(plaintext: &[u8]) -> [u8; 16] {
    let digest = crate::sha1!(plaintext);
    digest[4..].try_into().unwrap()
}

/// Derive the AES key and IV for one envelope from `msg_key` and the
/// authorization key (four SHA-1 passes).
pub fn derive_aes(auth_key: &AuthKey, msg_key: &[u8; 16], side: Side) -> ([u8; 32], [u8; 32]) {
    let k = auth_key.bytes();
    let x = side.offset();

    let a = crate::sha1!(msg_key, &k[x..x + 32]);
    let b = crate::sha1!(&k[32 + x..48 + x], msg_key, &k[48 + x..64 + x]);
    let c = crate::sha1!(&k[64 + x..96 + x], msg_key);
    let d = crate::sha1!(msg_key, &k[96 + x..128 + x]);

    let mut key = [0u8; 32];
    key[..8].copy_from_slice(&a[..8]);
    key[8..20].copy_from_slice(&b[8..]);
    key[20..].copy_from_slice(&c[4..16]);

    let mut iv = [0u8; 32];
    iv[..12].copy_from_slice(&a[8..]);
    iv[12..20].copy_from_slice(&b[..8]);
    iv[20..24].copy_from_slice(&c[16..]);
    iv[24..].copy_from_slice(&d[..8]);

    (key, iv)
}

/// Derive the AES key and IV that protect the handshake's DH answer from the
/// two nonces exchanged in the clear.
pub fn dh_answer_key(server_nonce: &[u8; 16], new_nonce: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let h1 = crate::sha1!(new_nonce, server_nonce);
    let h2 = crate::sha1!(server_nonce, new_nonce);
    let h3 = crate::sha1!(new_nonce, new_nonce);

    let mut key = [0u8; 32];
    key[..20].copy_from_slice(&h1);
    key[20..].copy_from_slice(&h2[..12]);

    let mut iv = [0u8; 32];
    iv[..8].copy_from_slice(&h2[12..]);
    iv[8..28].copy_from_slice(&h3);
    iv[28..].copy_from_slice(&new_nonce[..4]);

    (key, iv)
}

/// Fill `buf` with cryptographically strong random bytes.
pub fn random_bytes(buf: &mut [u8]) {
    getrandom::getrandom(buf).expect("getrandom failed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> AuthKey {
        AuthKey::from_bytes(core::array::from_fn(|i| (i * 7 % 256) as u8))
    }

    #[test]
    fn sides_derive_different_keys() {
        let msg_key = [0xabu8; 16];
        let (ck, civ) = derive_aes(&test_key(), &msg_key, Side::Client);
        let (sk, siv) = derive_aes(&test_key(), &msg_key, Side::Server);
        assert_ne!(ck, sk);
        assert_ne!(civ, siv);
    }

    #[test]
    fn derivation_is_deterministic() {
        let msg_key = message_key(b"some plaintext header");
        let first = derive_aes(&test_key(), &msg_key, Side::Client);
        let second = derive_aes(&test_key(), &msg_key, Side::Client);
        assert_eq!(first, second);
    }

    #[test]
    fn message_key_is_sha1_tail() {
        let data = b"payload";
        let digest = crate::sha1!(data);
        assert_eq!(message_key(data), digest[4..]);
    }

    #[test]
    fn answer_key_uses_all_nonce_bytes() {
        let server_nonce = [1u8; 16];
        let new_nonce = [2u8; 32];
        let (_, iv) = dh_answer_key(&server_nonce, &new_nonce);
        assert_eq!(&iv[28..], &new_nonce[..4]);

        let mut other = new_nonce;
        other[31] ^= 0xff;
        assert_ne!(dh_answer_key(&server_nonce, &new_nonce).0, dh_answer_key(&server_nonce, &other).0);
    }
}
