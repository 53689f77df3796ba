//! Payload encryption.
//!
//! ChaCha20-Poly1305 AEAD with a random 12-byte nonce prefixed to the
//! ciphertext. Key agreement belongs to the external handshake engine; this
//! module only applies the transform to payload bytes under a key the
//! caller supplies.

use crate::error::{Result, TransportError};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

/// Key length in bytes
pub const KEY_LEN: usize = 32;

/// Nonce length in bytes, prefixed to every sealed payload
pub const NONCE_LEN: usize = 12;

/// Encrypt `plaintext`, returning `nonce || ciphertext`.
///
/// # Errors
/// `InvalidState` if the cipher fails.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce_bytes: [u8; NONCE_LEN] = rand::random();
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| TransportError::InvalidState("encryption failed".into()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a `nonce || ciphertext` payload produced by [`seal`].
///
/// # Errors
/// `AccessDenied` when the input is truncated or the authentication tag
/// does not verify; forged and corrupted payloads are indistinguishable
/// here.
pub fn open(key: &[u8; KEY_LEN], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(TransportError::AccessDenied);
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| TransportError::AccessDenied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = [0x42u8; KEY_LEN];
        let sealed = seal(&key, b"confidential").unwrap();
        assert_ne!(&sealed[NONCE_LEN..], b"confidential");
        assert_eq!(open(&key, &sealed).unwrap(), b"confidential");
    }

    #[test]
    fn wrong_key_denied() {
        let sealed = seal(&[1u8; KEY_LEN], b"payload").unwrap();
        assert!(matches!(
            open(&[2u8; KEY_LEN], &sealed),
            Err(TransportError::AccessDenied)
        ));
    }

    #[test]
    fn tampered_ciphertext_denied() {
        let key = [9u8; KEY_LEN];
        let mut sealed = seal(&key, b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(open(&key, &sealed), Err(TransportError::AccessDenied)));
    }

    #[test]
    fn truncated_input_denied() {
        assert!(matches!(
            open(&[0u8; KEY_LEN], &[1, 2, 3]),
            Err(TransportError::AccessDenied)
        ));
    }
}
