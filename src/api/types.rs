//! Shared value types: decrypted messages, group contexts, attachments and
//! account key material.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Message flag bitset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MessageFlags(u32);

impl MessageFlags {
    /// The sender closed the session with us.
    pub const END_SESSION: MessageFlags = MessageFlags(1);

    pub const fn empty() -> Self {
        MessageFlags(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        MessageFlags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: MessageFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Canonical group identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(Vec<u8>);

impl GroupId {
    pub fn from_slice(bytes: &[u8]) -> Self {
        GroupId(bytes.to_vec())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for GroupId {
    fn from(bytes: Vec<u8>) -> Self {
        GroupId(bytes)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// Intent carried by a group context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupContextType {
    /// Create the group, or add members / change name / change avatar.
    CreateOrUpdate,
    /// Ordinary message to the group. Carries only the id.
    Deliver,
    /// The sender leaves the group.
    Quit,
    /// Wire value this client does not understand.
    Unknown(u32),
}

impl From<u32> for GroupContextType {
    fn from(value: u32) -> Self {
        match value {
            1 => GroupContextType::CreateOrUpdate,
            2 => GroupContextType::Deliver,
            3 => GroupContextType::Quit,
            other => GroupContextType::Unknown(other),
        }
    }
}

impl From<GroupContextType> for u32 {
    fn from(value: GroupContextType) -> Self {
        match value {
            GroupContextType::CreateOrUpdate => 1,
            GroupContextType::Deliver => 2,
            GroupContextType::Quit => 3,
            GroupContextType::Unknown(other) => other,
        }
    }
}

/// Reference to an attachment held by the remote blob store.
///
/// `data` stays `None` until the attachment resolver has fetched and
/// decrypted the blob. It is written exactly once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachmentPointer {
    pub id: u64,
    pub key: AttachmentKey,
    pub data: Option<Vec<u8>>,
}

impl AttachmentPointer {
    pub fn new(id: u64, key: Vec<u8>) -> Self {
        Self {
            id,
            key: AttachmentKey::new(key),
            data: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.data.is_some()
    }
}

/// Symmetric key material for one attachment.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AttachmentKey(Vec<u8>);

impl AttachmentKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        AttachmentKey(bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for AttachmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttachmentKey({} bytes)", self.0.len())
    }
}

/// Group-membership intent attached to a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupContext {
    /// Group identifier as received. Canonicalized by the normalizer.
    pub id: Vec<u8>,
    pub kind: GroupContextType,
    /// Full membership, meaningful for `CreateOrUpdate` only.
    pub members: Vec<String>,
    pub name: Option<String>,
    pub avatar: Option<AttachmentPointer>,
    /// Members that joined with this update. Computed, never supplied.
    pub added: Vec<String>,
}

impl GroupContext {
    pub fn new(id: Vec<u8>, kind: GroupContextType) -> Self {
        Self {
            id,
            kind,
            members: Vec::new(),
            name: None,
            avatar: None,
            added: Vec::new(),
        }
    }

    pub fn group_id(&self) -> GroupId {
        GroupId::from_slice(&self.id)
    }
}

/// Result of decrypting one envelope.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecryptedMessage {
    pub flags: Option<MessageFlags>,
    /// Present when the message was synced from another device of this account.
    pub sync_source: Option<String>,
    pub body: Option<String>,
    pub attachments: Vec<AttachmentPointer>,
    pub group: Option<GroupContext>,
}

/// Asymmetric key pair. The private half is zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
}

impl KeyPair {
    pub fn new(public_key: Vec<u8>, private_key: Vec<u8>) -> Self {
        Self {
            public_key,
            private_key,
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &hex::encode(&self.public_key))
            .finish_non_exhaustive()
    }
}

/// Account bundle transferred from the primary device during provisioning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisionMessage {
    pub number: String,
    pub provisioning_code: String,
    pub identity_key_pair: KeyPair,
}

/// A registered account on this device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub number: String,
    pub device_id: u32,
    pub registration_id: u16,
}
