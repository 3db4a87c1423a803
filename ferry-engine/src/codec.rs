//! Authenticated chunk encryption
//!
//! Uses ChaCha20-Poly1305 with a 96-bit nonce built deterministically from
//! the chunk's sequence index: the index occupies the low-order 8 bytes in
//! big-endian, the remaining 4 bytes are zero. (key, nonce) pairs are
//! unique because every transfer derives a fresh key and the sender assigns
//! strictly increasing indices starting at zero.
//!
//! Decryption authenticates before releasing any plaintext; a failure is
//! unrecoverable for the transfer. Corrupted ciphertext is never partially
//! accepted.

use chacha20poly1305::{
    ChaCha20Poly1305, KeyInit, Nonce,
    aead::Aead,
};

use crate::keys::TransferKey;

/// Nonce size for ChaCha20-Poly1305 (96 bits / 12 bytes)
const NONCE_SIZE: usize = 12;

/// Seals and opens the chunks of a single transfer
pub struct ChunkCipher {
    cipher: ChaCha20Poly1305,
}

impl ChunkCipher {
    /// Create a cipher bound to one transfer's derived key
    pub fn new(key: &TransferKey) -> Self {
        let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
        Self { cipher }
    }

    /// Build the deterministic nonce for a chunk index
    fn nonce_for(index: u64) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[4..].copy_from_slice(&index.to_be_bytes());
        nonce
    }

    /// Encrypt one plaintext chunk under its sequence index
    pub fn seal(&self, index: u64, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce_bytes = Self::nonce_for(index);
        let nonce = Nonce::from_slice(&nonce_bytes);
        self.cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Decrypt and authenticate one chunk received at `index`
    ///
    /// Fails if the ciphertext was tampered with, if the key is wrong, or
    /// if the chunk was sealed under a different index.
    pub fn open(&self, index: u64, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce_bytes = Self::nonce_for(index);
        let nonce = Nonce::from_slice(&nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

/// Errors that can occur during chunk encryption
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Encryption failed (should not happen with valid input)
    EncryptionFailed,
    /// Decryption failed: tampered ciphertext, wrong key, or wrong index
    AuthenticationFailed,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoError::EncryptionFailed => write!(f, "chunk encryption failed"),
            CryptoError::AuthenticationFailed => write!(f, "chunk authentication failed"),
        }
    }
}

impl std::error::Error for CryptoError {}
