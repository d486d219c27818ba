//! Decrypted envelope normalizer.
//!
//! Takes a freshly decrypted message and its sender, validates flags and
//! group semantics, applies group membership changes, and materializes every
//! referenced attachment before handing the message back in canonical form.
//!
//! A message performs at most one action. Once that action is identified the
//! remaining fields are cleared or ignored.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;

use super::attachments::{AttachmentResolver, FetchError};
use super::collaborators::LocalIdentity;
use super::groups::{GroupStateStore, GroupStoreError};
use super::types::{
    AttachmentPointer, DecryptedMessage, GroupContext, GroupContextType, GroupId, MessageFlags,
};
use crate::storage::StorageError;
use crate::utils::{is_number_sane, redact};

// ═══════════════════════════════════════════════════════════════
// ERROR TYPE
// ═══════════════════════════════════════════════════════════════

#[derive(thiserror::Error, Debug)]
pub enum NormalizationError {
    #[error("Got sync context on a message not sent by this account")]
    ForeignSyncContext,
    #[error("Got a sync end-session message")]
    InvalidSyncEndSession,
    #[error("Unknown flags in message: {0:#x}")]
    UnknownFlags(u32),
    #[error("Got message for unknown group {0}")]
    UnknownGroup(GroupId),
    #[error("Sender is not a member of group {0}")]
    SenderNotMember(GroupId),
    #[error("Invalid member identifier in group update")]
    InvalidMemberIdentifier(String),
    #[error("Attempted to remove members from group {0} with an update")]
    IllegalMemberRemoval(GroupId),
    #[error("Stored membership of group {0} does not match the update")]
    MembershipMismatch(GroupId),
    #[error("Unknown group message type {0}")]
    UnknownGroupMessageType(u32),
    #[error("Attachment resolution failed: {0}")]
    AttachmentResolutionFailed(#[source] FetchError),
    #[error("Failed to read the local account identity: {0}")]
    LocalIdentity(#[source] StorageError),
    #[error(transparent)]
    Store(#[from] GroupStoreError),
}

impl NormalizationError {
    /// True when the failure points at local state rather than at the sender.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            NormalizationError::MembershipMismatch(_)
                | NormalizationError::LocalIdentity(_)
                | NormalizationError::Store(_)
        )
    }
}

/// What the group step decided about the rest of the message.
enum GroupAction {
    Continue {
        resolve_avatar: bool,
        strip_content: bool,
    },
    Drop,
}

// ═══════════════════════════════════════════════════════════════
// NORMALIZER
// ═══════════════════════════════════════════════════════════════

pub struct EnvelopeNormalizer {
    identity: Arc<dyn LocalIdentity>,
    groups: Arc<dyn GroupStateStore>,
    attachments: AttachmentResolver,
}

impl EnvelopeNormalizer {
    pub fn new(
        identity: Arc<dyn LocalIdentity>,
        groups: Arc<dyn GroupStateStore>,
        attachments: AttachmentResolver,
    ) -> Self {
        Self {
            identity,
            groups,
            attachments,
        }
    }

    /// Validate and canonicalize a decrypted message from `source`.
    ///
    /// Returns `Ok(None)` when the message has no user-visible effect and
    /// must be dropped. Group state is committed before any attachment is
    /// fetched, and is not rolled back if an attachment later fails.
    pub async fn normalize(
        &self,
        message: DecryptedMessage,
        source: &str,
    ) -> Result<Option<DecryptedMessage>, NormalizationError> {
        let result = self.process(message, source).await;
        match &result {
            Err(e) if e.is_internal() => {
                log::error!("Internal error normalizing message from {}: {}", redact(source), e)
            }
            Err(e) => log::warn!("Rejected message from {}: {}", redact(source), e),
            Ok(None) => log::debug!("Dropped no-op group update from {}", redact(source)),
            Ok(Some(_)) => {}
        }
        result
    }

    async fn process(
        &self,
        mut message: DecryptedMessage,
        source: &str,
    ) -> Result<Option<DecryptedMessage>, NormalizationError> {
        let flags = *message.flags.get_or_insert(MessageFlags::empty());

        if message.sync_source.is_some() {
            let local = self
                .identity
                .account_identifier()
                .map_err(NormalizationError::LocalIdentity)?;
            if local.as_deref() != Some(source) {
                return Err(NormalizationError::ForeignSyncContext);
            }
        }

        if flags.contains(MessageFlags::END_SESSION) {
            message.body = None;
            message.attachments.clear();
            message.group = None;
            if message.sync_source.is_some() {
                // Session teardown is local-only and is never synced.
                return Err(NormalizationError::InvalidSyncEndSession);
            }
            return Ok(Some(message));
        }
        if !flags.is_empty() {
            return Err(NormalizationError::UnknownFlags(flags.bits()));
        }

        let mut resolve_avatar = false;
        if let Some(group) = message.group.as_mut() {
            match self.apply_group(group, source)? {
                GroupAction::Drop => return Ok(None),
                GroupAction::Continue {
                    resolve_avatar: avatar,
                    strip_content,
                } => {
                    resolve_avatar = avatar;
                    if strip_content {
                        message.body = None;
                        message.attachments.clear();
                    }
                }
            }
        }

        let mut pending: Vec<&mut AttachmentPointer> = Vec::new();
        if resolve_avatar {
            if let Some(avatar) = message.group.as_mut().and_then(|g| g.avatar.as_mut()) {
                pending.push(avatar);
            }
        }
        pending.extend(message.attachments.iter_mut());

        try_join_all(pending.into_iter().map(|a| self.attachments.resolve(a)))
            .await
            .map_err(NormalizationError::AttachmentResolutionFailed)?;

        Ok(Some(message))
    }

    /// Apply the group context to the store and canonicalize it.
    fn apply_group(
        &self,
        group: &mut GroupContext,
        source: &str,
    ) -> Result<GroupAction, NormalizationError> {
        let group_id = group.group_id();

        let existing = match self.groups.get_members(&group_id)? {
            Some(existing) => existing,
            None => {
                if group.kind != GroupContextType::CreateOrUpdate {
                    return Err(NormalizationError::UnknownGroup(group_id));
                }
                if self.groups.create_group(&group.members, &group_id)? {
                    group.added = unique(&group.members);
                    return Ok(GroupAction::Continue {
                        resolve_avatar: group.avatar.is_some(),
                        strip_content: false,
                    });
                }
                // Another message created the group first; treat this one as an update.
                self.groups
                    .get_members(&group_id)?
                    .ok_or_else(|| NormalizationError::UnknownGroup(group_id.clone()))?
            }
        };

        if !existing.iter().any(|m| m == source) {
            return Err(NormalizationError::SenderNotMember(group_id));
        }

        match group.kind {
            GroupContextType::CreateOrUpdate => {
                if let Some(invalid) = group.members.iter().find(|m| !is_number_sane(m)) {
                    return Err(NormalizationError::InvalidMemberIdentifier(invalid.clone()));
                }
                // Quit is the only way to leave a group.
                if existing.iter().any(|m| !group.members.contains(m)) {
                    return Err(NormalizationError::IllegalMemberRemoval(group_id));
                }

                let added: Vec<String> = unique(&group.members)
                    .into_iter()
                    .filter(|m| !existing.contains(m))
                    .collect();
                let updated = self.groups.add_members(&group_id, &added)?;
                if as_set(&updated) != as_set(&group.members) {
                    return Err(NormalizationError::MembershipMismatch(group_id));
                }
                group.added = added;

                if group.avatar.is_none() && group.added.is_empty() && group.name.is_none() {
                    return Ok(GroupAction::Drop);
                }
                Ok(GroupAction::Continue {
                    resolve_avatar: group.avatar.is_some(),
                    strip_content: true,
                })
            }
            GroupContextType::Quit => {
                self.groups.remove_member(&group_id, source)?;
                log::info!("{} left group {}", redact(source), group_id);
                // Quit also gets the deliver canonicalization.
                strip_to_routing(group);
                Ok(GroupAction::Continue {
                    resolve_avatar: false,
                    strip_content: true,
                })
            }
            GroupContextType::Deliver => {
                strip_to_routing(group);
                Ok(GroupAction::Continue {
                    resolve_avatar: false,
                    strip_content: false,
                })
            }
            GroupContextType::Unknown(value) => {
                Err(NormalizationError::UnknownGroupMessageType(value))
            }
        }
    }
}

/// Reduce a group context to the id needed for routing.
fn strip_to_routing(group: &mut GroupContext) {
    group.name = None;
    group.members.clear();
    group.avatar = None;
    group.added.clear();
}

fn unique(members: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(members.len());
    members
        .iter()
        .filter(|m| seen.insert(m.as_str()))
        .cloned()
        .collect()
}

fn as_set(members: &[String]) -> HashSet<&str> {
    members.iter().map(String::as_str).collect()
}
