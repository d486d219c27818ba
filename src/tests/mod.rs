pub mod attachments_tests;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::api::account::{AccountBootstrapper, RegistrationError};
use crate::api::attachments::AttachmentResolver;
use crate::api::collaborators::{
    BlobFetcher, ConfirmCodeRequest, ConfirmCodeResponse, CryptoError, Decryptor, KeyGenerator,
    LocalIdentity, PreKeyUpload, ProvisioningPrompt, Rejected, RegistrationApi, TransportError,
};
use crate::api::groups::StoredGroups;
use crate::api::normalizer::EnvelopeNormalizer;
use crate::api::provisioning::Responder;
use crate::api::types::{Account, AttachmentPointer, KeyPair, ProvisionMessage};
use crate::storage::{MemoryStorage, Storage, StorageError};

pub const ALICE: &str = "+14155550001";
pub const BOB: &str = "+14155550002";
pub const CAROL: &str = "+14155550003";
pub const DAVE: &str = "+14155550004";

pub const PROVISION_ENVELOPE: &[u8] = b"sealed-provision-envelope";

pub fn members(list: &[&str]) -> Vec<String> {
    list.iter().map(|m| m.to_string()).collect()
}

pub fn sorted(mut list: Vec<String>) -> Vec<String> {
    list.sort();
    list
}

// ═══════════════════════════════════════════════════════════════
// IDENTITY
// ═══════════════════════════════════════════════════════════════

pub struct FixedIdentity(pub Option<String>);

impl LocalIdentity for FixedIdentity {
    fn account_identifier(&self) -> Result<Option<String>, StorageError> {
        Ok(self.0.clone())
    }
}

/// Backend whose every call fails, like a disk that went away.
pub struct OfflineStorage;

impl Storage for OfflineStorage {
    fn get(&self, _key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Err(StorageError::Backend("disk offline".to_string()))
    }

    fn put(&self, _key: Vec<u8>, _value: Vec<u8>) -> Result<(), StorageError> {
        Err(StorageError::Backend("disk offline".to_string()))
    }

    fn remove(&self, _key: &[u8]) -> Result<(), StorageError> {
        Err(StorageError::Backend("disk offline".to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════
// BLOBS AND CRYPTO
// ═══════════════════════════════════════════════════════════════

/// Blob store whose ciphertexts are the plaintext XORed with the key's first byte.
#[derive(Default)]
pub struct InMemoryBlobs {
    blobs: Mutex<HashMap<u64, Vec<u8>>>,
    unavailable: Mutex<HashSet<u64>>,
    fetches: Mutex<Vec<u64>>,
}

impl InMemoryBlobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: u64, plaintext: &[u8], key: u8) {
        self.blobs.lock().insert(id, xor(plaintext, key));
    }

    pub fn make_unavailable(&self, id: u64) {
        self.unavailable.lock().insert(id);
    }

    pub fn fetches(&self) -> Vec<u64> {
        self.fetches.lock().clone()
    }
}

#[async_trait]
impl BlobFetcher for InMemoryBlobs {
    async fn fetch(&self, attachment_id: u64) -> Result<Vec<u8>, TransportError> {
        self.fetches.lock().push(attachment_id);
        if self.unavailable.lock().contains(&attachment_id) {
            return Err(TransportError("404".to_string()));
        }
        self.blobs
            .lock()
            .get(&attachment_id)
            .cloned()
            .ok_or_else(|| TransportError("missing".to_string()))
    }
}

fn xor(bytes: &[u8], key: u8) -> Vec<u8> {
    bytes.iter().map(|b| b ^ key).collect()
}

pub fn pointer(id: u64, key: u8) -> AttachmentPointer {
    AttachmentPointer::new(id, vec![key; 32])
}

pub fn session_key_pair() -> KeyPair {
    KeyPair::new(vec![0x05, 0xfb, 0xff, 0x3e], vec![0x11; 32])
}

pub fn identity_key_pair() -> KeyPair {
    KeyPair::new(vec![0x05, 0x01, 0x02], vec![0x22; 32])
}

/// Decryptor that only opens [`PROVISION_ENVELOPE`] with the session private key.
pub struct TestDecryptor {
    pub number: String,
}

impl TestDecryptor {
    pub fn new(number: &str) -> Self {
        Self {
            number: number.to_string(),
        }
    }
}

#[async_trait]
impl Decryptor for TestDecryptor {
    async fn decrypt_attachment(
        &self,
        ciphertext: Vec<u8>,
        key: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        match key.first() {
            Some(k) if *k != 0 => Ok(xor(&ciphertext, *k)),
            _ => Err(CryptoError("bad mac".to_string())),
        }
    }

    async fn decrypt_provisioning_envelope(
        &self,
        envelope: &[u8],
        private_key: &[u8],
    ) -> Result<ProvisionMessage, CryptoError> {
        if envelope != PROVISION_ENVELOPE || private_key != session_key_pair().private_key {
            return Err(CryptoError("bad envelope".to_string()));
        }
        Ok(ProvisionMessage {
            number: self.number.clone(),
            provisioning_code: "123456".to_string(),
            identity_key_pair: identity_key_pair(),
        })
    }
}

pub struct TestKeys;

#[async_trait]
impl KeyGenerator for TestKeys {
    fn generate_key_pair(&self) -> Result<KeyPair, CryptoError> {
        Ok(session_key_pair())
    }

    async fn generate_pre_keys(&self) -> Result<PreKeyUpload, CryptoError> {
        Ok(PreKeyUpload(vec![0x50, 0x4b]))
    }
}

// ═══════════════════════════════════════════════════════════════
// REGISTRATION
// ═══════════════════════════════════════════════════════════════

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedConfirm {
    pub number: String,
    pub code: String,
    pub password: String,
    pub signaling_key: Vec<u8>,
    pub registration_id: u16,
    pub single_device: bool,
}

#[derive(Default)]
pub struct InMemoryApi {
    pub device_id: u32,
    pub fail_confirm: bool,
    confirms: Mutex<Vec<RecordedConfirm>>,
    uploads: Mutex<Vec<PreKeyUpload>>,
}

impl InMemoryApi {
    pub fn new(device_id: u32) -> Self {
        Self {
            device_id,
            ..Self::default()
        }
    }

    pub fn confirms(&self) -> Vec<RecordedConfirm> {
        self.confirms.lock().clone()
    }

    pub fn uploads(&self) -> Vec<PreKeyUpload> {
        self.uploads.lock().clone()
    }
}

#[async_trait]
impl RegistrationApi for InMemoryApi {
    async fn confirm_code(
        &self,
        request: ConfirmCodeRequest,
    ) -> Result<ConfirmCodeResponse, TransportError> {
        self.confirms.lock().push(RecordedConfirm {
            number: request.number.clone(),
            code: request.code.clone(),
            password: request.password.to_string(),
            signaling_key: request.signaling_key.to_vec(),
            registration_id: request.registration_id,
            single_device: request.single_device,
        });
        if self.fail_confirm {
            return Err(TransportError("403".to_string()));
        }
        Ok(ConfirmCodeResponse {
            device_id: self.device_id,
        })
    }

    async fn register_keys(&self, keys: PreKeyUpload) -> Result<(), TransportError> {
        self.uploads.lock().push(keys);
        Ok(())
    }
}

/// Bootstrapper that records its calls instead of registering.
#[derive(Default)]
pub struct RecordingBootstrapper {
    pub fail: bool,
    calls: Mutex<Vec<(String, String, bool)>>,
}

impl RecordingBootstrapper {
    pub fn calls(&self) -> Vec<(String, String, bool)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl AccountBootstrapper for RecordingBootstrapper {
    async fn create_account(
        &self,
        number: &str,
        code: &str,
        identity_key_pair: KeyPair,
        primary_device: bool,
    ) -> Result<Account, RegistrationError> {
        assert_eq!(identity_key_pair, crate::tests::identity_key_pair());
        self.calls
            .lock()
            .push((number.to_string(), code.to_string(), primary_device));
        if self.fail {
            return Err(RegistrationError::Api(TransportError("409".to_string())));
        }
        Ok(Account {
            number: number.to_string(),
            device_id: 2,
            registration_id: 42,
        })
    }
}

// ═══════════════════════════════════════════════════════════════
// PROMPT AND SOCKET
// ═══════════════════════════════════════════════════════════════

pub struct ScriptedPrompt {
    approve: bool,
    links: Mutex<Vec<String>>,
    confirmations: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn approving() -> Self {
        Self::new(true)
    }

    pub fn rejecting() -> Self {
        Self::new(false)
    }

    fn new(approve: bool) -> Self {
        Self {
            approve,
            links: Mutex::new(Vec::new()),
            confirmations: Mutex::new(Vec::new()),
        }
    }

    pub fn links(&self) -> Vec<String> {
        self.links.lock().clone()
    }

    pub fn confirmations(&self) -> Vec<String> {
        self.confirmations.lock().clone()
    }
}

#[async_trait]
impl ProvisioningPrompt for ScriptedPrompt {
    fn show_link(&self, uri: &str) {
        self.links.lock().push(uri.to_string());
    }

    async fn confirm_number(&self, number: &str) -> Result<(), Rejected> {
        self.confirmations.lock().push(number.to_string());
        if self.approve { Ok(()) } else { Err(Rejected) }
    }
}

pub type Responses = Arc<Mutex<Vec<(String, u16, String)>>>;

/// Records `(path, status, message)` for every answered request.
pub struct RecordingResponder {
    path: String,
    responses: Responses,
}

impl Responder for RecordingResponder {
    fn respond(self: Box<Self>, status: u16, message: &str) {
        self.responses
            .lock()
            .push((self.path.clone(), status, message.to_string()));
    }
}

pub fn request(
    responses: &Responses,
    verb: &str,
    path: &str,
    body: &[u8],
) -> crate::api::provisioning::IncomingRequest {
    crate::api::provisioning::IncomingRequest::new(
        verb,
        path,
        body.to_vec(),
        RecordingResponder {
            path: path.to_string(),
            responses: responses.clone(),
        },
    )
}

// ═══════════════════════════════════════════════════════════════
// NORMALIZER HARNESS
// ═══════════════════════════════════════════════════════════════

pub struct Harness {
    pub normalizer: EnvelopeNormalizer,
    pub groups: Arc<StoredGroups>,
    pub blobs: Arc<InMemoryBlobs>,
}

pub fn harness(local: Option<&str>) -> Harness {
    let groups = Arc::new(StoredGroups::new(Arc::new(MemoryStorage::new())));
    let blobs = Arc::new(InMemoryBlobs::new());
    let resolver = AttachmentResolver::new(blobs.clone(), Arc::new(TestDecryptor::new(ALICE)));
    let normalizer = EnvelopeNormalizer::new(
        Arc::new(FixedIdentity(local.map(str::to_string))),
        groups.clone(),
        resolver,
    );
    Harness {
        normalizer,
        groups,
        blobs,
    }
}
