//! Group membership records.
//!
//! A record exists for a group id once a create-or-update has been accepted
//! for it. Membership grows through [`GroupStateStore::add_members`] and
//! shrinks through [`GroupStateStore::remove_member`]; there is no other
//! mutation path.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::types::GroupId;
use crate::storage::{GROUP_LABEL, Storage, StorageError, read_val, write_val};

#[derive(thiserror::Error, Debug)]
pub enum GroupStoreError {
    #[error("Group storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Group {0} does not exist")]
    UnknownGroup(GroupId),
}

/// Authoritative group-id → membership mapping.
///
/// Every mutation is atomic per group id: two concurrent read-modify-write
/// sequences on the same group never interleave.
pub trait GroupStateStore: Send + Sync {
    fn get_members(&self, group_id: &GroupId) -> Result<Option<Vec<String>>, GroupStoreError>;

    /// Create the record unless one already exists.
    ///
    /// Returns `false`, leaving the existing record untouched, when the group
    /// is already known.
    fn create_group(
        &self,
        members: &[String],
        group_id: &GroupId,
    ) -> Result<bool, GroupStoreError>;

    /// Add `members` and return the resulting membership.
    fn add_members(
        &self,
        group_id: &GroupId,
        members: &[String],
    ) -> Result<Vec<String>, GroupStoreError>;

    fn remove_member(&self, group_id: &GroupId, member: &str) -> Result<(), GroupStoreError>;
}

/// [`GroupStateStore`] persisted through a [`Storage`] backend.
pub struct StoredGroups {
    storage: Arc<dyn Storage>,
    locks: Mutex<HashMap<GroupId, Arc<Mutex<()>>>>,
}

impl StoredGroups {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run `op` while holding the lock of `group_id`.
    ///
    /// Lock entries only live while some caller holds them.
    fn with_group_lock<T>(
        &self,
        group_id: &GroupId,
        op: impl FnOnce() -> Result<T, GroupStoreError>,
    ) -> Result<T, GroupStoreError> {
        let lock = self
            .locks
            .lock()
            .entry(group_id.clone())
            .or_default()
            .clone();
        let result = {
            let _guard = lock.lock();
            op()
        };
        let mut locks = self.locks.lock();
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(group_id);
        }
        result
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.locks.lock().len()
    }

    fn load(&self, group_id: &GroupId) -> Result<Option<Vec<String>>, GroupStoreError> {
        Ok(read_val(self.storage.as_ref(), GROUP_LABEL, group_id.as_slice())?)
    }

    fn save(&self, group_id: &GroupId, members: &[String]) -> Result<(), GroupStoreError> {
        Ok(write_val(
            self.storage.as_ref(),
            GROUP_LABEL,
            group_id.as_slice(),
            &members,
        )?)
    }
}

fn push_unique(members: &mut Vec<String>, candidates: &[String]) {
    for candidate in candidates {
        if !members.contains(candidate) {
            members.push(candidate.clone());
        }
    }
}

impl GroupStateStore for StoredGroups {
    fn get_members(&self, group_id: &GroupId) -> Result<Option<Vec<String>>, GroupStoreError> {
        self.load(group_id)
    }

    fn create_group(
        &self,
        members: &[String],
        group_id: &GroupId,
    ) -> Result<bool, GroupStoreError> {
        self.with_group_lock(group_id, || {
            if self.load(group_id)?.is_some() {
                log::debug!("Group {} already exists", group_id);
                return Ok(false);
            }
            let mut record = Vec::with_capacity(members.len());
            push_unique(&mut record, members);
            self.save(group_id, &record)?;
            log::debug!("Created group {} with {} members", group_id, record.len());
            Ok(true)
        })
    }

    fn add_members(
        &self,
        group_id: &GroupId,
        members: &[String],
    ) -> Result<Vec<String>, GroupStoreError> {
        self.with_group_lock(group_id, || {
            let mut record = self
                .load(group_id)?
                .ok_or_else(|| GroupStoreError::UnknownGroup(group_id.clone()))?;
            push_unique(&mut record, members);
            self.save(group_id, &record)?;
            Ok(record)
        })
    }

    fn remove_member(&self, group_id: &GroupId, member: &str) -> Result<(), GroupStoreError> {
        self.with_group_lock(group_id, || {
            let Some(mut record) = self.load(group_id)? else {
                return Ok(());
            };
            record.retain(|m| m != member);
            self.save(group_id, &record)
        })
    }
}
