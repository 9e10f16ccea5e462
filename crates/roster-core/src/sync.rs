//! Contract with the external directory services a group is connected to.

use std::collections::BTreeMap;

use async_trait::async_trait;
use roster_storage::{CompanyId, Group, MemberRole, UserId};
use thiserror::Error;
use tracing::warn;

use crate::resolver::ResolvedUser;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipChange {
    Added { user_id: UserId, role: MemberRole },
    /// The user stays in the group with a different effective role.
    RoleChanged { user_id: UserId, role: MemberRole },
    Removed { user_id: UserId },
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("integration error: {0}")]
    Integration(String),
}

/// Pushes effective membership changes to an external group.
#[async_trait]
pub trait DirectorySync: Send + Sync {
    async fn apply_membership_change(
        &self,
        company_id: &CompanyId,
        external_group_ref: &str,
        change: &MembershipChange,
    ) -> Result<(), SyncError>;
}

/// Used when no integrations are wired in.
pub struct NoopDirectorySync;

#[async_trait]
impl DirectorySync for NoopDirectorySync {
    async fn apply_membership_change(
        &self,
        _company_id: &CompanyId,
        _external_group_ref: &str,
        _change: &MembershipChange,
    ) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Changes between two flattened user sets of one group: additions first,
/// then role changes, then removals.
pub fn diff_users(
    before: &BTreeMap<UserId, ResolvedUser>,
    after: &BTreeMap<UserId, ResolvedUser>,
) -> Vec<MembershipChange> {
    let mut added = Vec::new();
    let mut role_changed = Vec::new();
    for u in after.values() {
        match before.get(&u.user_id) {
            None => added.push(MembershipChange::Added {
                user_id: u.user_id,
                role: u.role,
            }),
            Some(prev) if prev.role != u.role => role_changed.push(MembershipChange::RoleChanged {
                user_id: u.user_id,
                role: u.role,
            }),
            Some(_) => {}
        }
    }
    let removed = before
        .keys()
        .filter(|id| !after.contains_key(id))
        .map(|id| MembershipChange::Removed { user_id: *id });
    added.into_iter().chain(role_changed).chain(removed).collect()
}

/// Send every change to every external group the group is associated with.
/// Failures are logged and never undo the membership change.
pub async fn push_changes(sync: &dyn DirectorySync, group: &Group, changes: &[MembershipChange]) {
    if changes.is_empty() {
        return;
    }
    for (slug, external_ref) in &group.associated_accounts {
        for change in changes {
            if let Err(e) = sync
                .apply_membership_change(&group.company_id, external_ref, change)
                .await
            {
                warn!(
                    group_id = %group.id,
                    integration = %slug,
                    error = %e,
                    "directory sync failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use roster_storage::{DepartmentId, GroupId, GroupStatus};
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<(String, MembershipChange)>>,
        fail: bool,
    }

    #[async_trait]
    impl DirectorySync for Recording {
        async fn apply_membership_change(
            &self,
            _company_id: &CompanyId,
            external_group_ref: &str,
            change: &MembershipChange,
        ) -> Result<(), SyncError> {
            self.calls
                .lock()
                .unwrap()
                .push((external_group_ref.to_string(), *change));
            if self.fail {
                return Err(SyncError::Integration("rate limited".into()));
            }
            Ok(())
        }
    }

    fn resolved(user_id: UserId, role: MemberRole) -> (UserId, ResolvedUser) {
        (
            user_id,
            ResolvedUser {
                user_id,
                role,
                is_subgroup_member: false,
            },
        )
    }

    #[test]
    fn diff_reports_additions_role_changes_and_removals() {
        let (u1, u2, u3) = (
            UserId(Uuid::new_v4()),
            UserId(Uuid::new_v4()),
            UserId(Uuid::new_v4()),
        );
        let before = BTreeMap::from([resolved(u1, MemberRole::Member), resolved(u2, MemberRole::Member)]);
        let after = BTreeMap::from([resolved(u2, MemberRole::Admin), resolved(u3, MemberRole::Viewer)]);

        let changes = diff_users(&before, &after);
        assert_eq!(
            changes,
            vec![
                MembershipChange::Added {
                    user_id: u3,
                    role: MemberRole::Viewer
                },
                MembershipChange::RoleChanged {
                    user_id: u2,
                    role: MemberRole::Admin
                },
                MembershipChange::Removed { user_id: u1 },
            ]
        );
    }

    #[test]
    fn unchanged_users_produce_no_changes() {
        let user = UserId(Uuid::new_v4());
        let before = BTreeMap::from([resolved(user, MemberRole::Admin)]);
        let after = BTreeMap::from([(
            user,
            ResolvedUser {
                user_id: user,
                role: MemberRole::Admin,
                is_subgroup_member: true,
            },
        )]);

        assert!(diff_users(&before, &after).is_empty());
    }

    #[tokio::test]
    async fn push_calls_once_per_change_per_external_ref_and_swallows_errors() {
        let group = Group {
            id: GroupId(Uuid::new_v4()),
            company_id: CompanyId(Uuid::new_v4()),
            department_id: DepartmentId(Uuid::new_v4()),
            name: "Synced".into(),
            search_key: "synced".into(),
            status: GroupStatus::Active,
            color: None,
            associated_accounts: BTreeMap::from([
                ("github".to_string(), "team-42".to_string()),
                ("slack".to_string(), "C0FFEE".to_string()),
            ]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let sync = Recording {
            fail: true,
            ..Recording::default()
        };
        let changes = [
            MembershipChange::Removed {
                user_id: UserId(Uuid::new_v4()),
            },
            MembershipChange::Removed {
                user_id: UserId(Uuid::new_v4()),
            },
        ];

        push_changes(&sync, &group, &changes).await;
        assert_eq!(sync.calls.lock().unwrap().len(), 4);
    }
}
