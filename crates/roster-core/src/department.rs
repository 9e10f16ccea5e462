//! Maintenance of the derived department membership index.
//!
//! A `(department, user)` record exists exactly when some active group of the
//! department reaches the user. Reconciliation counts every qualifying group
//! of the user, so a record is only dropped with its last qualifying path.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use roster_storage::{
    keys, CompanyId, DepartmentId, DepartmentMembership, GroupId, Item, OperationId, UserId,
    WriteRequest,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::chunk::BatchWriter;
use crate::context::ResolutionContext;
use crate::resolver::Resolver;
use crate::CoreError;

/// Index records to insert and delete.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DepartmentDelta {
    pub to_add: BTreeSet<(DepartmentId, UserId)>,
    pub to_remove: BTreeSet<(DepartmentId, UserId)>,
}

impl DepartmentDelta {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    pub fn merge(&mut self, other: DepartmentDelta) {
        self.to_add.extend(other.to_add);
        self.to_remove.extend(other.to_remove);
    }

    pub fn writes(&self, company_id: CompanyId) -> Vec<WriteRequest> {
        let adds = self.to_add.iter().map(|(department, user)| {
            WriteRequest::Put(Item::DepartmentMember(DepartmentMembership::new(
                *department,
                company_id,
                *user,
            )))
        });
        let removes = self
            .to_remove
            .iter()
            .map(|(department, user)| WriteRequest::Delete(keys::department_member_key(department, user)));
        adds.chain(removes).collect()
    }
}

/// Async mutexes keyed by `(department, user)`.
#[derive(Clone, Default)]
pub struct KeyLocks {
    inner: Arc<DashMap<(DepartmentId, UserId), Arc<Mutex<()>>>>,
}

/// Guards for a set of pairs; dropping it releases them.
pub struct PairGuards {
    guards: Vec<OwnedMutexGuard<()>>,
    locks: KeyLocks,
}

impl Drop for PairGuards {
    fn drop(&mut self) {
        self.guards.clear();
        self.locks.prune();
    }
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every pair, in sorted order so concurrent callers cannot deadlock.
    pub async fn lock_all(&self, pairs: &BTreeSet<(DepartmentId, UserId)>) -> PairGuards {
        let mut guards = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let mutex = self
                .inner
                .entry(*pair)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            guards.push(mutex.lock_owned().await);
        }
        PairGuards {
            guards,
            locks: self.clone(),
        }
    }

    /// Drop entries nobody holds or waits on.
    fn prune(&self) {
        self.inner.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[derive(Clone, Default)]
pub struct DepartmentIndex {
    locks: KeyLocks,
}

impl DepartmentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locks(&self) -> &KeyLocks {
        &self.locks
    }

    /// Compute the delta for `users` across `departments` without writing.
    pub async fn reconcile(
        &self,
        resolver: &Resolver,
        ctx: &mut ResolutionContext,
        company_id: CompanyId,
        departments: &BTreeSet<DepartmentId>,
        users: &BTreeSet<UserId>,
        excluded: Option<GroupId>,
    ) -> Result<DepartmentDelta, CoreError> {
        let _guards = self.locks.lock_all(&pairs(departments, users)).await;
        self.compute(resolver, ctx, company_id, departments, users, excluded)
            .await
    }

    /// Commit a previously computed delta.
    pub async fn apply(
        &self,
        writer: &BatchWriter,
        operation_id: OperationId,
        company_id: CompanyId,
        delta: &DepartmentDelta,
    ) -> Result<(), CoreError> {
        if delta.is_empty() {
            return Ok(());
        }
        writer.commit(operation_id, delta.writes(company_id)).await?;
        info!(
            operation_id = %operation_id,
            added = delta.to_add.len(),
            removed = delta.to_remove.len(),
            "department index updated"
        );
        Ok(())
    }

    /// Reconcile and apply while holding the pair locks across read, decide
    /// and write.
    #[allow(clippy::too_many_arguments)]
    pub async fn reconcile_and_apply(
        &self,
        resolver: &Resolver,
        writer: &BatchWriter,
        ctx: &mut ResolutionContext,
        operation_id: OperationId,
        company_id: CompanyId,
        departments: &BTreeSet<DepartmentId>,
        users: &BTreeSet<UserId>,
        excluded: Option<GroupId>,
    ) -> Result<DepartmentDelta, CoreError> {
        if departments.is_empty() || users.is_empty() {
            return Ok(DepartmentDelta::default());
        }
        let _guards = self.locks.lock_all(&pairs(departments, users)).await;
        // Reads must see whatever a previous holder of these locks wrote.
        ctx.invalidate();
        let delta = self
            .compute(resolver, ctx, company_id, departments, users, excluded)
            .await?;
        self.apply(writer, operation_id, company_id, &delta).await?;
        Ok(delta)
    }

    async fn compute(
        &self,
        resolver: &Resolver,
        ctx: &mut ResolutionContext,
        company_id: CompanyId,
        departments: &BTreeSet<DepartmentId>,
        users: &BTreeSet<UserId>,
        excluded: Option<GroupId>,
    ) -> Result<DepartmentDelta, CoreError> {
        let mut delta = DepartmentDelta::default();
        let mut qualifying: HashMap<DepartmentId, usize> = HashMap::new();

        for user in users {
            let reach = resolver
                .groups_containing_user(ctx, company_id, *user, excluded)
                .await?;
            qualifying.clear();
            for group in reach.iter().filter_map(|g| ctx.group(g)) {
                *qualifying.entry(group.department_id).or_default() += 1;
            }

            for department in departments {
                let exists = resolver
                    .store()
                    .get_item(&keys::department_member_key(department, user))
                    .await?
                    .is_some();
                let count = qualifying.get(department).copied().unwrap_or(0);
                match (count > 0, exists) {
                    (true, false) => {
                        delta.to_add.insert((*department, *user));
                    }
                    (false, true) => {
                        delta.to_remove.insert((*department, *user));
                    }
                    _ => {}
                }
                debug!(
                    department_id = %department,
                    user_id = %user,
                    qualifying_groups = count,
                    exists,
                    "reconciled department membership"
                );
            }
        }
        Ok(delta)
    }
}

fn pairs(
    departments: &BTreeSet<DepartmentId>,
    users: &BTreeSet<UserId>,
) -> BTreeSet<(DepartmentId, UserId)> {
    departments
        .iter()
        .flat_map(|d| users.iter().map(move |u| (*d, *u)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use roster_storage::{EdgeStore, MemberRole, MemberType};
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn lock_all_serializes_the_same_pair() {
        let locks = KeyLocks::new();
        let pair = (DepartmentId(Uuid::new_v4()), UserId(Uuid::new_v4()));
        let set = BTreeSet::from([pair]);

        let held = locks.lock_all(&set).await;
        let blocked = tokio::time::timeout(Duration::from_millis(30), locks.lock_all(&set)).await;
        assert!(blocked.is_err(), "second lock must wait for the first");

        drop(held);
        let again = tokio::time::timeout(Duration::from_millis(100), locks.lock_all(&set)).await;
        assert!(again.is_ok());
        drop(again);
        assert!(locks.is_empty(), "released entries are pruned");
    }

    #[test]
    fn delta_writes_put_and_delete() {
        let company = CompanyId(Uuid::new_v4());
        let d = DepartmentId(Uuid::new_v4());
        let (u1, u2) = (UserId(Uuid::new_v4()), UserId(Uuid::new_v4()));
        let delta = DepartmentDelta {
            to_add: BTreeSet::from([(d, u1)]),
            to_remove: BTreeSet::from([(d, u2)]),
        };
        let writes = delta.writes(company);
        assert_eq!(writes.len(), 2);
        assert!(matches!(writes[0], WriteRequest::Put(Item::DepartmentMember(_))));
        assert_eq!(
            writes[1],
            WriteRequest::Delete(keys::department_member_key(&d, &u2))
        );
    }

    #[tokio::test]
    async fn record_survives_until_last_qualifying_group() {
        let fx = Fixture::new();
        let dept = fx.department().await;
        let g1 = fx.group(dept, "G1").await;
        let g2 = fx.group(dept, "G2").await;
        let user = fx.user().await;
        fx.add_user(g1, user, MemberRole::Member).await;
        fx.add_user(g2, user, MemberRole::Member).await;

        let service = fx.service();
        let mut ctx = ResolutionContext::new();
        let departments = BTreeSet::from([dept]);
        let users = BTreeSet::from([user]);
        let index = DepartmentIndex::new();

        let delta = index
            .reconcile_and_apply(
                service.resolver(),
                service.writer(),
                &mut ctx,
                OperationId::new(),
                fx.company,
                &departments,
                &users,
                None,
            )
            .await
            .unwrap();
        assert_eq!(delta.to_add, BTreeSet::from([(dept, user)]));

        // Excluding one of the two groups still leaves a qualifying path.
        let delta = index
            .reconcile(service.resolver(), &mut ctx, fx.company, &departments, &users, Some(g1))
            .await
            .unwrap();
        assert!(delta.is_empty());

        fx.store
            .batch_write(&[WriteRequest::Delete(keys::edge_key(
                &g2,
                MemberType::User,
                &user.0,
            ))])
            .await
            .unwrap();
        let delta = index
            .reconcile_and_apply(
                service.resolver(),
                service.writer(),
                &mut ctx,
                OperationId::new(),
                fx.company,
                &departments,
                &users,
                Some(g1),
            )
            .await
            .unwrap();
        assert_eq!(delta.to_remove, BTreeSet::from([(dept, user)]));
        assert!(fx
            .store
            .get_item(&keys::department_member_key(&dept, &user))
            .await
            .unwrap()
            .is_none());
    }
}
