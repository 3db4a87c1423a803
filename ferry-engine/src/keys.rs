//! Per-transfer key derivation
//!
//! Both peers hold the same pre-shared secret, distributed out of band by
//! the login layer. A transfer-specific 256-bit key is derived from it with
//! HKDF-SHA256, using the transfer id as the info parameter, so no two
//! transfers ever encrypt under the same key. The derivation introduces no
//! new randomness; the pre-shared secret is the sole entropy source.

use std::fmt;

use hkdf::Hkdf;
use sha2::Sha256;
use uuid::Uuid;

/// Salt used for HKDF key derivation
const KDF_SALT: &[u8] = b"ferry-transfer-v1";

/// Pre-shared key material, as returned by a [`SecretProvider`]
#[derive(Clone)]
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    /// Wrap raw pre-shared key material
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Get the raw key material
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret({} bytes)", self.0.len())
    }
}

/// Source of the pre-shared secret
///
/// Injected by the host. Returns `None` when no secret has been
/// configured, in which case a transfer fails before any negotiation
/// signal is sent.
pub trait SecretProvider: Send + Sync {
    /// The current pre-shared key material, or `None` if absent
    fn shared_secret(&self) -> Option<SharedSecret>;
}

/// A derived, single-transfer symmetric key
#[derive(Clone)]
pub struct TransferKey([u8; 32]);

impl TransferKey {
    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for TransferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransferKey(..)")
    }
}

/// Derive the symmetric key for one transfer
///
/// Deterministic: both peers derive the same key from the same secret and
/// transfer id, with no key exchange on the wire.
pub fn derive_transfer_key(secret: &SharedSecret, transfer_id: &Uuid) -> TransferKey {
    let hkdf = Hkdf::<Sha256>::new(Some(KDF_SALT), secret.as_bytes());
    let mut key = [0u8; 32];
    hkdf.expand(transfer_id.as_bytes(), &mut key)
        .expect("32 bytes is a valid output length for HKDF-SHA256");
    TransferKey(key)
}
