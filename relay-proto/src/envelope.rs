//! Plaintext and encrypted message envelopes.
//!
//! The plaintext envelope only carries the handshake; everything after key
//! exchange travels in the encrypted envelope:
//!
//! ```text
//! auth_key_id (8) | msg_key (16) | aes_ige( salt | session_id | msg_id |
//!                                           seq_no | length | body | padding )
//! ```
//!
//! `msg_key` is derived from the unpadded plaintext; padding is 0..=15 random
//! bytes up to the AES block boundary. Both directions are implemented so
//! test harnesses can speak the server's side.

use std::fmt;

use relay_crypto::{aes, derive_aes, message_key, random_bytes, AuthKey, Side};

/// Fixed part of the encrypted plaintext: salt + session + msg_id + seq + len.
const HEADER_LEN: usize = 8 + 8 + 8 + 4 + 4;
/// Fixed part of the ciphertext frame: key id + msg_key.
const PREFIX_LEN: usize = 8 + 16;

/// Errors from envelope decoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The frame is too short to carry an envelope.
    TooShort,
    /// The ciphertext is not block-aligned.
    Misaligned,
    /// The frame names a different authorization key.
    KeyIdMismatch,
    /// The message key does not match the decrypted plaintext.
    MessageKeyMismatch,
    /// A plaintext frame carried a non-zero key id.
    NotPlaintext,
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "frame too short"),
            Self::Misaligned => write!(f, "ciphertext not block-aligned"),
            Self::KeyIdMismatch => write!(f, "auth_key_id mismatch"),
            Self::MessageKeyMismatch => write!(f, "msg_key mismatch"),
            Self::NotPlaintext => write!(f, "expected auth_key_id = 0"),
        }
    }
}

impl std::error::Error for EnvelopeError {}

/// A decoded inbound envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Server salt echoed in the frame.
    pub salt: i64,
    /// Session id the frame addresses.
    pub session_id: i64,
    /// Message id of the (outermost) payload.
    pub msg_id: i64,
    /// Sequence number of the payload.
    pub seq_no: i32,
    /// The payload bytes.
    pub body: Vec<u8>,
}

// ── Plaintext ─────────────────────────────────────────────────────────────────

/// Pack a handshake payload into the plaintext envelope.
pub fn pack_plain(msg_id: i64, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 8 + 4 + body.len());
    out.extend_from_slice(&0i64.to_le_bytes());
    out.extend_from_slice(&msg_id.to_le_bytes());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    out
}

/// Unpack a plaintext envelope, returning `(msg_id, body)`.
pub fn unpack_plain(frame: &[u8]) -> Result<(i64, Vec<u8>), EnvelopeError> {
    if frame.len() < 20 {
        return Err(EnvelopeError::TooShort);
    }
    if frame[..8] != [0u8; 8] {
        return Err(EnvelopeError::NotPlaintext);
    }
    let msg_id = i64::from_le_bytes(frame[8..16].try_into().unwrap());
    let len = u32::from_le_bytes(frame[16..20].try_into().unwrap()) as usize;
    if frame.len() < 20 + len {
        return Err(EnvelopeError::TooShort);
    }
    Ok((msg_id, frame[20..20 + len].to_vec()))
}

// ── Encrypted ─────────────────────────────────────────────────────────────────

/// Encrypt a payload into a wire-ready frame.
///
/// `side` is the peer doing the sending; clients pass [`Side::Client`].
pub fn pack_encrypted(
    auth_key: &AuthKey,
    salt: i64,
    session_id: i64,
    msg_id: i64,
    seq_no: i32,
    body: &[u8],
    side: Side,
) -> Vec<u8> {
    let mut plain = Vec::with_capacity(HEADER_LEN + body.len() + 16);
    plain.extend_from_slice(&salt.to_le_bytes());
    plain.extend_from_slice(&session_id.to_le_bytes());
    plain.extend_from_slice(&msg_id.to_le_bytes());
    plain.extend_from_slice(&seq_no.to_le_bytes());
    plain.extend_from_slice(&(body.len() as u32).to_le_bytes());
    plain.extend_from_slice(body);

    let msg_key = message_key(&plain);

    let pad = (16 - plain.len() % 16) % 16;
    if pad > 0 {
        let mut padding = [0u8; 16];
        random_bytes(&mut padding[..pad]);
        plain.extend_from_slice(&padding[..pad]);
    }

    let (key, iv) = derive_aes(auth_key, &msg_key, side);
    aes::ige_encrypt(&mut plain, &key, &iv);

    let mut out = Vec::with_capacity(PREFIX_LEN + plain.len());
    out.extend_from_slice(&auth_key.key_id());
    out.extend_from_slice(&msg_key);
    out.extend_from_slice(&plain);
    out
}

/// Decrypt a wire frame sent by `sender`.
pub fn unpack_encrypted(
    auth_key: &AuthKey,
    frame: &[u8],
    sender: Side,
) -> Result<Envelope, EnvelopeError> {
    if frame.len() < PREFIX_LEN + HEADER_LEN {
        return Err(EnvelopeError::TooShort);
    }
    if (frame.len() - PREFIX_LEN) % 16 != 0 {
        return Err(EnvelopeError::Misaligned);
    }
    if frame[..8] != auth_key.key_id() {
        return Err(EnvelopeError::KeyIdMismatch);
    }
    let msg_key: [u8; 16] = frame[8..24].try_into().unwrap();

    let (key, iv) = derive_aes(auth_key, &msg_key, sender);
    let mut plain = frame[PREFIX_LEN..].to_vec();
    aes::ige_decrypt(&mut plain, &key, &iv);

    let salt = i64::from_le_bytes(plain[..8].try_into().unwrap());
    let session_id = i64::from_le_bytes(plain[8..16].try_into().unwrap());
    let msg_id = i64::from_le_bytes(plain[16..24].try_into().unwrap());
    let seq_no = i32::from_le_bytes(plain[24..28].try_into().unwrap());
    let len = u32::from_le_bytes(plain[28..32].try_into().unwrap()) as usize;

    if HEADER_LEN + len > plain.len() {
        return Err(EnvelopeError::TooShort);
    }
    if message_key(&plain[..HEADER_LEN + len]) != msg_key {
        return Err(EnvelopeError::MessageKeyMismatch);
    }

    plain.truncate(HEADER_LEN + len);
    let body = plain.split_off(HEADER_LEN);
    Ok(Envelope { salt, session_id, msg_id, seq_no, body })
}
