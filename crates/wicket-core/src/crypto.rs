//! AES-derived keystream used to obfuscate the raw 8-byte user/IP tokens
//! that would otherwise sit in the clear inside the log file.
//!
//! # Scheme
//!
//! The forum salt (16 bytes, derived from the startup secret) is the AES-128
//! key. The IV block is `timestamp(4) || topic_id(4) || post_id(2)`,
//! zero-padded to the 16-byte block size. Encrypting that block with the
//! salt key yields a 16-byte keystream; its first 8 bytes are XORed with the
//! raw token to produce the on-disk form. XOR is self-inverse, so the same
//! operation recovers the raw token given the post's timestamp, topic ID,
//! and post ID — which always travel alongside the token in the same
//! record.
//!
//! An earlier design considered keying the IV by `(user, long_id)` instead;
//! this module implements the `(timestamp, topic_id, post_id)` variant,
//! since that is the one the data model's on-disk field description names
//! directly. See `DESIGN.md` for the resolution of this choice.

use aes::Aes128;
use aes::cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};

/// Computes the 8-byte keystream mask for a post identified by
/// `(created_at, topic_id, post_id)` under `salt`.
#[must_use]
pub fn post_token_mask(salt: &[u8; 16], created_at: u32, topic_id: u32, post_id: u16) -> [u8; 8] {
    let mut block = [0u8; 16];
    block[0..4].copy_from_slice(&created_at.to_be_bytes());
    block[4..8].copy_from_slice(&topic_id.to_be_bytes());
    block[8..10].copy_from_slice(&post_id.to_be_bytes());

    let cipher = Aes128::new(GenericArray::from_slice(salt));
    let mut ga = GenericArray::clone_from_slice(&block);
    cipher.encrypt_block(&mut ga);

    let mut mask = [0u8; 8];
    mask.copy_from_slice(&ga[0..8]);
    mask
}

/// XORs `token` with the keystream derived from `(salt, created_at,
/// topic_id, post_id)`. The same call obfuscates a raw token for storage and
/// recovers it on replay.
#[must_use]
pub fn xor_token(
    token: [u8; 8],
    salt: &[u8; 16],
    created_at: u32,
    topic_id: u32,
    post_id: u16,
) -> [u8; 8] {
    let mask = post_token_mask(salt, created_at, topic_id, post_id);
    let mut out = token;
    for i in 0..8 {
        out[i] ^= mask[i];
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn xor_is_self_inverse() {
        let salt = [9u8; 16];
        let raw = [1, 2, 3, 4, 5, 6, 7, 8];
        let obfuscated = xor_token(raw, &salt, 1_700_000_000, 42, 7);
        let recovered = xor_token(obfuscated, &salt, 1_700_000_000, 42, 7);
        assert_eq!(raw, recovered);
        assert_ne!(raw, obfuscated);
    }

    #[test]
    fn different_posts_get_different_masks() {
        let salt = [1u8; 16];
        let a = post_token_mask(&salt, 100, 1, 1);
        let b = post_token_mask(&salt, 100, 1, 2);
        assert_ne!(a, b);
    }
}
