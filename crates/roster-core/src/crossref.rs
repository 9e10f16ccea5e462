//! Finding which groups nest a given group.
//!
//! The store has no reverse index for `GROUP` edges, so the default finder
//! scans every group of the company. Anything that keeps a maintained
//! reverse index can replace it behind [`CrossReferenceFinder`].

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use roster_storage::{
    keys, CompanyId, EdgeStatus, EdgeStore, GroupId, GroupStatus, IndexQuery, Item, Query,
    StoreError,
};
use tracing::debug;

/// Child group -> groups holding a live `GROUP` edge to it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReverseAdjacency {
    parents: HashMap<GroupId, BTreeSet<GroupId>>,
}

impl ReverseAdjacency {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, child: GroupId, parent: GroupId) {
        self.parents.entry(child).or_default().insert(parent);
    }

    pub fn parents(&self, child: &GroupId) -> impl Iterator<Item = GroupId> + '_ {
        self.parents.get(child).into_iter().flatten().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}

#[async_trait::async_trait]
pub trait CrossReferenceFinder: Send + Sync {
    async fn reverse_adjacency(&self, company_id: &CompanyId)
        -> Result<ReverseAdjacency, StoreError>;
}

/// Full company scan over every non-deleted group's `GROUP` edges.
pub struct CompanySweep {
    store: Arc<dyn EdgeStore>,
    concurrency: usize,
}

impl CompanySweep {
    pub fn new(store: Arc<dyn EdgeStore>, concurrency: usize) -> Self {
        Self {
            store,
            concurrency: concurrency.max(1),
        }
    }
}

#[async_trait::async_trait]
impl CrossReferenceFinder for CompanySweep {
    async fn reverse_adjacency(
        &self,
        company_id: &CompanyId,
    ) -> Result<ReverseAdjacency, StoreError> {
        let groups: Vec<GroupId> = self
            .store
            .query_index(&IndexQuery::CompanyGroups {
                company_id: *company_id,
                search_prefix: None,
            })
            .await?
            .into_iter()
            .filter_map(Item::into_group)
            .filter(|g| g.status != GroupStatus::Deleted)
            .map(|g| g.id)
            .collect();

        let store = &self.store;
        let edge_lists: Vec<Vec<Item>> = futures::stream::iter(groups.iter().copied())
            .map(|group_id| async move {
                store
                    .query(
                        &Query::partition(keys::group_pk(&group_id))
                            .sort_prefix(keys::PREFIX_GROUP)
                            .status_in(EdgeStatus::LIVE.iter().map(EdgeStatus::as_str)),
                    )
                    .await
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;

        let mut adjacency = ReverseAdjacency::new();
        for edge in edge_lists.into_iter().flatten().filter_map(Item::into_edge) {
            adjacency.insert(GroupId(edge.member_id), edge.group_id);
        }
        debug!(
            company_id = %company_id,
            groups = groups.len(),
            "swept company for group references"
        );
        Ok(adjacency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use roster_storage::{DepartmentId, Group, MemberRef, MembershipEdge};
    use roster_store_memory::MemoryStore;
    use uuid::Uuid;

    fn group(company: CompanyId, status: GroupStatus) -> Group {
        Group {
            id: GroupId(Uuid::new_v4()),
            company_id: company,
            department_id: DepartmentId(Uuid::new_v4()),
            name: "g".into(),
            search_key: "g".into(),
            status,
            color: None,
            associated_accounts: Default::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn nest(parent: &Group, child: &Group) -> Item {
        Item::GroupMember(MembershipEdge::new(
            parent.id,
            parent.company_id,
            MemberRef::Group(child.id),
            None,
        ))
    }

    #[tokio::test]
    async fn sweep_builds_reverse_edges() {
        let store = Arc::new(MemoryStore::new());
        let company = CompanyId(Uuid::new_v4());
        let a = group(company, GroupStatus::Active);
        let b = group(company, GroupStatus::Inactive);
        let gone = group(company, GroupStatus::Deleted);
        let child = group(company, GroupStatus::Active);

        store
            .seed([
                Item::Group(a.clone()),
                Item::Group(b.clone()),
                Item::Group(gone.clone()),
                Item::Group(child.clone()),
                nest(&a, &child),
                nest(&b, &child),
                nest(&gone, &child),
            ])
            .await;

        let sweep = CompanySweep::new(store, 4);
        let adjacency = sweep.reverse_adjacency(&company).await.unwrap();
        let parents: BTreeSet<GroupId> = adjacency.parents(&child.id).collect();

        // Deleted owners are skipped; inactive ones are still reported.
        assert_eq!(parents, BTreeSet::from([a.id, b.id]));
        assert_eq!(adjacency.parents(&a.id).count(), 0);
    }
}
