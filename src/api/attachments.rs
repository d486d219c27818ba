//! Attachment materialization: download the ciphertext, decrypt it, store the
//! plaintext on the pointer.

use std::sync::Arc;

use super::collaborators::{BlobFetcher, CryptoError, Decryptor, TransportError};
use super::types::AttachmentPointer;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The pointer already carries data. Resolution is single-shot.
    #[error("Attachment {0} is already resolved")]
    AlreadyResolved(u64),
    #[error("Failed to download attachment {id}: {source}")]
    Download { id: u64, source: TransportError },
    #[error("Failed to decrypt attachment {id}: {source}")]
    Decrypt { id: u64, source: CryptoError },
}

/// Fetches and decrypts attachments.
///
/// Failures are reported to the caller and never retried here.
#[derive(Clone)]
pub struct AttachmentResolver {
    fetcher: Arc<dyn BlobFetcher>,
    decryptor: Arc<dyn Decryptor>,
}

impl AttachmentResolver {
    pub fn new(fetcher: Arc<dyn BlobFetcher>, decryptor: Arc<dyn Decryptor>) -> Self {
        Self { fetcher, decryptor }
    }

    /// Resolve one attachment in place.
    ///
    /// # Precondition
    /// `attachment.data` must be empty. A pointer is resolved at most once;
    /// a second call fails with [`FetchError::AlreadyResolved`] and leaves the
    /// existing data untouched.
    pub async fn resolve(&self, attachment: &mut AttachmentPointer) -> Result<(), FetchError> {
        let id = attachment.id;
        if attachment.is_resolved() {
            return Err(FetchError::AlreadyResolved(id));
        }
        let ciphertext = self
            .fetcher
            .fetch(id)
            .await
            .map_err(|source| FetchError::Download { id, source })?;
        let plaintext = self
            .decryptor
            .decrypt_attachment(ciphertext, attachment.key.as_slice())
            .await
            .map_err(|source| FetchError::Decrypt { id, source })?;
        log::debug!("Resolved attachment {} ({} bytes)", id, plaintext.len());
        attachment.data = Some(plaintext);
        Ok(())
    }
}
