//! sealed_inbox - post-decryption layer of an end-to-end encrypted messaging client.
//!
//! Validates and canonicalizes decrypted envelopes (flags, group membership,
//! attachments) and runs the provisioning handshake that links a new device
//! to an existing account. Cryptography, transport and durable storage are
//! collaborators supplied by the host.

mod storage;
mod utils;

pub mod api;

#[cfg(test)]
mod tests;

pub use api::account::{AccountBootstrapper, AccountStore, Registrar, RegistrationError};
pub use api::attachments::{AttachmentResolver, FetchError};
pub use api::groups::{GroupStateStore, GroupStoreError, StoredGroups};
pub use api::normalizer::{EnvelopeNormalizer, NormalizationError};
pub use api::provisioning::{
    IncomingRequest, ProvisioningError, ProvisioningSession, ProvisioningState, Responder,
    register_second_device,
};
pub use storage::{MemoryStorage, Storage, StorageError};
pub use utils::{encode_number, is_number_sane, unencode_number};
