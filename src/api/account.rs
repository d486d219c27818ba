//! Account bootstrapping.
//!
//! Persists identity key material and locally generated secrets, registers
//! the device with the service, and uploads the first batch of prekeys.
//! Security-critical: every secret is held in zeroizing containers.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use zeroize::Zeroizing;

use super::collaborators::{
    ConfirmCodeRequest, CryptoError, KeyGenerator, LocalIdentity, RegistrationApi, TransportError,
};
use super::config::RegistrationConfig;
use super::types::{Account, KeyPair};
use crate::storage::{
    IDENTITY_KEY_LABEL, NUMBER_ID_LABEL, PASSWORD_LABEL, REGISTRATION_DONE_LABEL,
    REGISTRATION_ID_LABEL, SIGNALING_KEY_LABEL, Storage, StorageError, read_val, write_val,
};
use crate::utils::{encode_number, is_number_sane, redact, unencode_number};

// ═══════════════════════════════════════════════════════════════
// ERROR TYPE
// ═══════════════════════════════════════════════════════════════

#[derive(thiserror::Error, Debug)]
pub enum RegistrationError {
    #[error("Invalid number")]
    InvalidNumber,
    #[error("Registration storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Registration request failed: {0}")]
    Api(#[from] TransportError),
    #[error("Key generation failed: {0}")]
    KeyGeneration(#[from] CryptoError),
}

// ═══════════════════════════════════════════════════════════════
// BOOTSTRAPPER CONTRACT
// ═══════════════════════════════════════════════════════════════

#[async_trait]
pub trait AccountBootstrapper: Send + Sync {
    /// Register this device for `number`.
    ///
    /// `code` is the SMS/voice verification code on a primary device and the
    /// provisioning code on a linked one.
    async fn create_account(
        &self,
        number: &str,
        code: &str,
        identity_key_pair: KeyPair,
        primary_device: bool,
    ) -> Result<Account, RegistrationError>;
}

// ═══════════════════════════════════════════════════════════════
// ACCOUNT STORE
// ═══════════════════════════════════════════════════════════════

/// Serializable identity key pair (private + public).
#[derive(serde::Serialize, serde::Deserialize, zeroize::Zeroize, zeroize::ZeroizeOnDrop)]
struct StoredKeyPair {
    public: Vec<u8>,
    private: Vec<u8>,
}

/// Account state persisted on this device.
#[derive(Clone)]
pub struct AccountStore {
    storage: Arc<dyn Storage>,
}

impl AccountStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Encoded device address (`number.deviceId`), once registered.
    pub fn number_id(&self) -> Result<Option<String>, StorageError> {
        read_val(self.storage.as_ref(), NUMBER_ID_LABEL, b"")
    }

    pub fn device_id(&self) -> Result<Option<u32>, StorageError> {
        Ok(self
            .number_id()?
            .and_then(|encoded| unencode_number(&encoded).1))
    }

    pub fn registration_id(&self) -> Result<Option<u16>, StorageError> {
        read_val(self.storage.as_ref(), REGISTRATION_ID_LABEL, b"")
    }

    pub fn is_registered(&self) -> Result<bool, StorageError> {
        Ok(read_val::<bool>(self.storage.as_ref(), REGISTRATION_DONE_LABEL, b"")?.unwrap_or(false))
    }

    pub fn identity_key_pair(&self) -> Result<Option<KeyPair>, StorageError> {
        let stored: Option<StoredKeyPair> =
            read_val(self.storage.as_ref(), IDENTITY_KEY_LABEL, b"")?;
        Ok(stored.map(|mut kp| {
            KeyPair::new(
                std::mem::take(&mut kp.public),
                std::mem::take(&mut kp.private),
            )
        }))
    }

    fn put_identity_key_pair(&self, key_pair: &KeyPair) -> Result<(), StorageError> {
        let stored = StoredKeyPair {
            public: key_pair.public_key.clone(),
            private: key_pair.private_key.clone(),
        };
        write_val(self.storage.as_ref(), IDENTITY_KEY_LABEL, b"", &stored)
    }

    fn put_secret(&self, label: &[u8], value: &impl serde::Serialize) -> Result<(), StorageError> {
        write_val(self.storage.as_ref(), label, b"", value)
    }

    fn set_number_and_device_id(&self, number: &str, device_id: u32) -> Result<(), StorageError> {
        write_val(
            self.storage.as_ref(),
            NUMBER_ID_LABEL,
            b"",
            &encode_number(number, device_id),
        )
    }
}

impl LocalIdentity for AccountStore {
    fn account_identifier(&self) -> Result<Option<String>, StorageError> {
        Ok(self
            .number_id()?
            .map(|encoded| unencode_number(&encoded).0.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════
// REGISTRAR
// ═══════════════════════════════════════════════════════════════

/// [`AccountBootstrapper`] backed by the registration API.
pub struct Registrar {
    config: RegistrationConfig,
    store: AccountStore,
    api: Arc<dyn RegistrationApi>,
    keys: Arc<dyn KeyGenerator>,
}

impl Registrar {
    pub fn new(
        config: RegistrationConfig,
        storage: Arc<dyn Storage>,
        api: Arc<dyn RegistrationApi>,
        keys: Arc<dyn KeyGenerator>,
    ) -> Self {
        Self {
            config,
            store: AccountStore::new(storage),
            api,
            keys,
        }
    }

    pub fn store(&self) -> &AccountStore {
        &self.store
    }

    /// Register a primary device with a fresh identity key pair.
    pub async fn register_single_device(
        &self,
        number: &str,
        verification_code: &str,
    ) -> Result<Account, RegistrationError> {
        let identity_key_pair = self.keys.generate_key_pair()?;
        self.create_account(number, verification_code, identity_key_pair, true)
            .await
    }
}

#[async_trait]
impl AccountBootstrapper for Registrar {
    async fn create_account(
        &self,
        number: &str,
        code: &str,
        identity_key_pair: KeyPair,
        primary_device: bool,
    ) -> Result<Account, RegistrationError> {
        if !is_number_sane(number) {
            return Err(RegistrationError::InvalidNumber);
        }

        self.store.put_identity_key_pair(&identity_key_pair)?;

        let signaling_key = self.keys.random_bytes(self.config.signaling_key_len);
        self.store.put_secret(SIGNALING_KEY_LABEL, &*signaling_key)?;

        let password_bytes = self.keys.random_bytes(self.config.password_len);
        let password = Zeroizing::new(STANDARD_NO_PAD.encode(&*password_bytes));
        self.store.put_secret(PASSWORD_LABEL, &*password)?;

        let registration_id = self.keys.registration_id();
        self.store.put_secret(REGISTRATION_ID_LABEL, &registration_id)?;

        let response = self
            .api
            .confirm_code(ConfirmCodeRequest {
                number: number.to_string(),
                code: code.to_string(),
                password,
                signaling_key,
                registration_id,
                single_device: primary_device,
            })
            .await?;
        self.store
            .set_number_and_device_id(number, response.device_id)?;

        let pre_keys = self.keys.generate_pre_keys().await?;
        self.api.register_keys(pre_keys).await?;
        self.store.put_secret(REGISTRATION_DONE_LABEL, &true)?;

        log::info!(
            "Registered device {} for {} (primary: {})",
            response.device_id,
            redact(number),
            primary_device
        );
        Ok(Account {
            number: number.to_string(),
            device_id: response.device_id,
            registration_id,
        })
    }
}
