//! Host key pair distributed to plugins during the handshake.
//!
//! Each [`PluginManager`](crate::PluginManager) owns one [`HostKeyPair`]. The
//! public half is handed to every spawned plugin; the private half never
//! leaves the host and is used to sign messages the plugin can verify.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

/// Length in bytes of the encoded public key.
pub const PUBLIC_KEY_LENGTH: usize = ed25519_dalek::PUBLIC_KEY_LENGTH;

/// Ed25519 key pair held by the control plane.
///
/// # Example
///
/// ```
/// use pulse_control::HostKeyPair;
///
/// let keys = HostKeyPair::generate();
/// let signature = keys.sign(b"hello");
/// assert!(keys.verify(b"hello", &signature));
/// ```
pub struct HostKeyPair {
    signing_key: SigningKey,
}

impl HostKeyPair {
    /// Generates a fresh key pair from the operating system RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Rebuilds a key pair from a 32 byte secret seed.
    #[must_use]
    pub fn from_secret_bytes(secret: &[u8; ed25519_dalek::SECRET_KEY_LENGTH]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(secret),
        }
    }

    /// Returns the public key handed to plugins.
    #[must_use]
    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Returns the encoded public key.
    #[must_use]
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        self.public_key().to_bytes()
    }

    /// Signs `payload` with the private key.
    #[must_use]
    pub fn sign(&self, payload: &[u8]) -> Signature {
        self.signing_key.sign(payload)
    }

    /// Checks `signature` against `payload` using the public key.
    #[must_use]
    pub fn verify(&self, payload: &[u8], signature: &Signature) -> bool {
        self.public_key().verify(payload, signature).is_ok()
    }
}

impl std::fmt::Debug for HostKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostKeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}
