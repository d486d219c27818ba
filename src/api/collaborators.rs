//! Contracts of the external collaborators the core depends on.
//!
//! Cryptography, the HTTP API, blob download and user prompts live outside
//! this crate. Hosts implement these traits and hand them to the normalizer,
//! the attachment resolver, the provisioning session and the registrar.

use async_trait::async_trait;
use rand::{Rng, RngCore};
use zeroize::Zeroizing;

use super::types::{KeyPair, ProvisionMessage};
use crate::storage::StorageError;

// ═══════════════════════════════════════════════════════════════
// ERROR TYPES
// ═══════════════════════════════════════════════════════════════

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Crypto error: {0}")]
pub struct CryptoError(pub String);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Transport error: {0}")]
pub struct TransportError(pub String);

/// The local user declined a confirmation prompt.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Rejected by the user")]
pub struct Rejected;

// ═══════════════════════════════════════════════════════════════
// CRYPTO
// ═══════════════════════════════════════════════════════════════

#[async_trait]
pub trait Decryptor: Send + Sync {
    /// Decrypt and authenticate an attachment blob.
    async fn decrypt_attachment(
        &self,
        ciphertext: Vec<u8>,
        key: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt a provisioning envelope with the session's private key and
    /// decode the account bundle inside it.
    async fn decrypt_provisioning_envelope(
        &self,
        envelope: &[u8],
        private_key: &[u8],
    ) -> Result<ProvisionMessage, CryptoError>;
}

/// Opaque prekey material ready to upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreKeyUpload(pub Vec<u8>);

#[async_trait]
pub trait KeyGenerator: Send + Sync {
    /// Generate a Curve25519 key pair.
    fn generate_key_pair(&self) -> Result<KeyPair, CryptoError>;

    /// Generate and locally persist a fresh batch of prekeys.
    async fn generate_pre_keys(&self) -> Result<PreKeyUpload, CryptoError>;

    /// Random bytes from the operating system generator.
    fn random_bytes(&self, len: usize) -> Zeroizing<Vec<u8>> {
        let mut bytes = Zeroizing::new(vec![0u8; len]);
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        bytes
    }

    /// Registration id: 14 bits, never zero.
    fn registration_id(&self) -> u16 {
        rand::rngs::OsRng.gen_range(1..=0x3fff)
    }
}

// ═══════════════════════════════════════════════════════════════
// TRANSPORT
// ═══════════════════════════════════════════════════════════════

#[async_trait]
pub trait BlobFetcher: Send + Sync {
    /// Download the ciphertext stored under `attachment_id`.
    async fn fetch(&self, attachment_id: u64) -> Result<Vec<u8>, TransportError>;
}

/// Parameters of the code confirmation call that registers this device.
pub struct ConfirmCodeRequest {
    pub number: String,
    pub code: String,
    pub password: Zeroizing<String>,
    pub signaling_key: Zeroizing<Vec<u8>>,
    pub registration_id: u16,
    pub single_device: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmCodeResponse {
    pub device_id: u32,
}

#[async_trait]
pub trait RegistrationApi: Send + Sync {
    async fn confirm_code(
        &self,
        request: ConfirmCodeRequest,
    ) -> Result<ConfirmCodeResponse, TransportError>;

    async fn register_keys(&self, keys: PreKeyUpload) -> Result<(), TransportError>;
}

// ═══════════════════════════════════════════════════════════════
// LOCAL STATE AND USER
// ═══════════════════════════════════════════════════════════════

pub trait LocalIdentity: Send + Sync {
    /// Number of the account registered on this device, if any.
    fn account_identifier(&self) -> Result<Option<String>, StorageError>;
}

#[async_trait]
pub trait ProvisioningPrompt: Send + Sync {
    /// Present the linking URI, typically as a QR code.
    fn show_link(&self, uri: &str);

    /// Ask the user to approve linking this device to `number`.
    ///
    /// Blocks the handshake until the user answers. No timeout is applied.
    async fn confirm_number(&self, number: &str) -> Result<(), Rejected>;
}
