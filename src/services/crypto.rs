//! Envelope encryption for backup artifacts.
//!
//! A 32-byte key is derived from the configured key material with Argon2id,
//! then the plaintext is sealed with AES-256-GCM using a fresh random 16-byte
//! IV. The envelope layout is IV(16) ‖ auth tag(16) ‖ ciphertext, so offsets
//! are fixed and decryption never needs out-of-band framing.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::OsRng;
use aes_gcm::{aes::Aes256, AeadInPlace, AesGcm, KeyInit, Nonce, Tag};
use argon2::Argon2;
use zeroize::Zeroizing;

use crate::error::{BackupError, Result};

/// AES-256-GCM with the 16-byte IV the artifact format mandates.
type EnvelopeCipher = AesGcm<Aes256, U16>;

pub const IV_LEN: usize = 16;
pub const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Fixed derivation salt. Every envelope ever written used this literal, so
/// changing it (or going per-artifact) requires a migration of existing
/// artifacts first.
const KDF_SALT: &[u8] = b"durability-backup-kdf-v1";

fn derive_key(key_material: &str) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    Argon2::default()
        .hash_password_into(key_material.as_bytes(), KDF_SALT, key.as_mut())
        .map_err(|e| BackupError::Crypto(format!("key derivation failed: {e}")))?;
    Ok(key)
}

pub fn encrypt(plaintext: &[u8], key_material: &str) -> Result<Vec<u8>> {
    let key = derive_key(key_material)?;
    let cipher = EnvelopeCipher::new_from_slice(key.as_ref())
        .map_err(|e| BackupError::Crypto(format!("failed to create cipher: {e}")))?;

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buffer)
        .map_err(|e| BackupError::Crypto(format!("encryption failed: {e}")))?;

    let mut envelope = Vec::with_capacity(IV_LEN + TAG_LEN + buffer.len());
    envelope.extend_from_slice(&iv);
    envelope.extend_from_slice(tag.as_slice());
    envelope.extend_from_slice(&buffer);
    Ok(envelope)
}

/// Opens an envelope. Truncated input or an authentication-tag mismatch is an
/// integrity failure; partial plaintext is never returned.
pub fn decrypt(envelope: &[u8], key_material: &str) -> Result<Vec<u8>> {
    if envelope.len() < IV_LEN + TAG_LEN {
        return Err(BackupError::Integrity(format!(
            "envelope truncated: {} bytes, expected at least {}",
            envelope.len(),
            IV_LEN + TAG_LEN
        )));
    }

    let key = derive_key(key_material)?;
    let cipher = EnvelopeCipher::new_from_slice(key.as_ref())
        .map_err(|e| BackupError::Crypto(format!("failed to create cipher: {e}")))?;

    let (iv, rest) = envelope.split_at(IV_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(iv),
            b"",
            &mut buffer,
            Tag::from_slice(tag),
        )
        .map_err(|_| {
            BackupError::Integrity(
                "authentication tag mismatch: wrong key or tampered artifact".into(),
            )
        })?;
    Ok(buffer)
}
