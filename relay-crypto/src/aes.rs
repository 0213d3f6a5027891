//! AES-256 in Infinite Garble Extension (IGE) mode.
//!
//! IGE chains both the previous ciphertext and the previous plaintext block
//! into each block operation; the 32-byte IV is split into the initial
//! ciphertext half (first 16 bytes) and the initial plaintext half (last 16).

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;

const BLOCK: usize = 16;

fn xor_into(dst: &mut [u8; BLOCK], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
}

/// Encrypt `data` in place. `data.len()` must be a multiple of 16.
pub fn ige_encrypt(data: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    assert_eq!(data.len() % BLOCK, 0, "IGE input must be block-aligned");
    let cipher = Aes256::new(GenericArray::from_slice(key));

    let mut prev_cipher: [u8; BLOCK] = iv[..BLOCK].try_into().unwrap();
    let mut prev_plain: [u8; BLOCK] = iv[BLOCK..].try_into().unwrap();

    for chunk in data.chunks_exact_mut(BLOCK) {
        let plain: [u8; BLOCK] = chunk.try_into().unwrap();
        let mut block = plain;
        xor_into(&mut block, &prev_cipher);
        cipher.encrypt_block(GenericArray::from_mut_slice(&mut block));
        xor_into(&mut block, &prev_plain);
        chunk.copy_from_slice(&block);
        prev_cipher = block;
        prev_plain = plain;
    }
}

/// Decrypt `data` in place. `data.len()` must be a multiple of 16.
pub fn ige_decrypt(data: &mut [u8], key: &[u8; 32], iv: &[u8; 32]) {
    assert_eq!(data.len() % BLOCK, 0, "IGE input must be block-aligned");
    let cipher = Aes256::new(GenericArray::from_slice(key));

    let mut prev_cipher: [u8; BLOCK] = iv[..BLOCK].try_into().unwrap();
    let mut prev_plain: [u8; BLOCK] = iv[BLOCK..].try_into().unwrap();

    for chunk in data.chunks_exact_mut(BLOCK) {
        let encrypted: [u8; BLOCK] = chunk.try_into().unwrap();
        let mut block = encrypted;
        xor_into(&mut block, &prev_plain);
        cipher.decrypt_block(GenericArray::from_mut_slice(&mut block));
        xor_into(&mut block, &prev_cipher);
        chunk.copy_from_slice(&block);
        prev_cipher = encrypted;
        prev_plain = block;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; 32] {
        core::array::from_fn(|i| i as u8)
    }

    fn iv() -> [u8; 32] {
        core::array::from_fn(|i| (0x80 + i) as u8)
    }

    #[test]
    fn roundtrip() {
        let original: Vec<u8> = (0u8..64).collect();
        let mut data = original.clone();
        ige_encrypt(&mut data, &key(), &iv());
        assert_ne!(data, original);
        ige_decrypt(&mut data, &key(), &iv());
        assert_eq!(data, original);
    }

    #[test]
    fn blocks_are_chained() {
        // Two identical plaintext blocks must not encrypt identically.
        let mut data = vec![0x42u8; 32];
        ige_encrypt(&mut data, &key(), &iv());
        assert_ne!(data[..16], data[16..]);
    }

    #[test]
    fn iv_matters() {
        let mut a = vec![7u8; 16];
        let mut b = vec![7u8; 16];
        let mut other_iv = iv();
        other_iv[0] ^= 1;
        ige_encrypt(&mut a, &key(), &iv());
        ige_encrypt(&mut b, &key(), &other_iv);
        assert_ne!(a, b);
    }
}
