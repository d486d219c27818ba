use std::sync::Arc;

use crate::api::attachments::{AttachmentResolver, FetchError};
use crate::api::collaborators::{CryptoError, TransportError};
use crate::tests::{ALICE, InMemoryBlobs, TestDecryptor, pointer};

fn resolver(blobs: &Arc<InMemoryBlobs>) -> AttachmentResolver {
    AttachmentResolver::new(blobs.clone(), Arc::new(TestDecryptor::new(ALICE)))
}

#[tokio::test]
async fn resolve_downloads_and_decrypts() {
    let blobs = Arc::new(InMemoryBlobs::new());
    blobs.insert(3, b"voice note", 0x5a);
    let mut attachment = pointer(3, 0x5a);

    resolver(&blobs).resolve(&mut attachment).await.unwrap();

    assert_eq!(attachment.data.as_deref(), Some(&b"voice note"[..]));
    assert_eq!(blobs.fetches(), vec![3]);
}

#[tokio::test]
async fn resolved_pointer_is_not_fetched_again() {
    let blobs = Arc::new(InMemoryBlobs::new());
    blobs.insert(3, b"voice note", 0x5a);
    let resolver = resolver(&blobs);
    let mut attachment = pointer(3, 0x5a);
    resolver.resolve(&mut attachment).await.unwrap();

    let err = resolver.resolve(&mut attachment).await.unwrap_err();

    assert_eq!(err, FetchError::AlreadyResolved(3));
    assert_eq!(attachment.data.as_deref(), Some(&b"voice note"[..]));
    assert_eq!(blobs.fetches(), vec![3]);
}

#[tokio::test]
async fn download_failure_leaves_pointer_empty() {
    let blobs = Arc::new(InMemoryBlobs::new());
    blobs.make_unavailable(9);
    let mut attachment = pointer(9, 1);

    let err = resolver(&blobs).resolve(&mut attachment).await.unwrap_err();

    assert_eq!(
        err,
        FetchError::Download {
            id: 9,
            source: TransportError("404".to_string()),
        }
    );
    assert!(!attachment.is_resolved());
}

#[tokio::test]
async fn decrypt_failure_is_reported() {
    let blobs = Arc::new(InMemoryBlobs::new());
    blobs.insert(4, b"tampered", 1);
    let mut attachment = pointer(4, 0);

    let err = resolver(&blobs).resolve(&mut attachment).await.unwrap_err();

    assert_eq!(
        err,
        FetchError::Decrypt {
            id: 4,
            source: CryptoError("bad mac".to_string()),
        }
    );
    assert!(!attachment.is_resolved());
}
