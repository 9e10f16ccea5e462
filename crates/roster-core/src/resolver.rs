//! Transitive membership resolution over the nested group graph.
//!
//! The graph lives in a flat table and may contain cycles, so every walk is
//! an explicit frontier + visited-set fixpoint rather than recursion. Fetches
//! inside one pass run concurrently; a pass completes before the next starts.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use roster_storage::{
    keys, CompanyId, DepartmentId, EdgeStatus, EdgeStore, Group, GroupId, IndexQuery, Item,
    MemberRef, MemberRole, MemberType, MembershipEdge, Query, StoreError, UserId,
};
use tracing::debug;

use crate::context::ResolutionContext;
use crate::crossref::{CrossReferenceFinder, ReverseAdjacency};
use crate::CoreError;

/// A user reached from a group, with the strongest role found on any path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedUser {
    pub user_id: UserId,
    pub role: MemberRole,
    /// Reached through at least one nested group.
    pub is_subgroup_member: bool,
}

/// Full membership picture of one group.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    pub group_id: GroupId,
    pub direct_users: Vec<MembershipEdge>,
    /// The group's own `GROUP` edges.
    pub subgroup_edges: Vec<MembershipEdge>,
    pub owners: Vec<MembershipEdge>,
    /// Every active group reachable through nesting.
    pub subgroups: BTreeSet<GroupId>,
    pub transitive_users: BTreeMap<UserId, ResolvedUser>,
}

impl Resolution {
    fn empty(group_id: GroupId) -> Self {
        Self {
            group_id,
            direct_users: Vec::new(),
            subgroup_edges: Vec::new(),
            owners: Vec::new(),
            subgroups: BTreeSet::new(),
            transitive_users: BTreeMap::new(),
        }
    }

    pub fn user_ids(&self) -> BTreeSet<UserId> {
        self.transitive_users.keys().copied().collect()
    }

    /// All direct edges of the group, users first, then subgroups, then owners.
    pub fn direct_edges(&self) -> impl Iterator<Item = &MembershipEdge> {
        self.direct_users
            .iter()
            .chain(self.subgroup_edges.iter())
            .chain(self.owners.iter())
    }

    fn merge_user(&mut self, edge: &MembershipEdge, via_subgroup: bool) {
        let user_id = UserId(edge.member_id);
        let role = edge.role.unwrap_or_default();
        self.transitive_users
            .entry(user_id)
            .and_modify(|u| {
                u.role = u.role.max(role);
                u.is_subgroup_member |= via_subgroup;
            })
            .or_insert(ResolvedUser {
                user_id,
                role,
                is_subgroup_member: via_subgroup,
            });
    }
}

pub struct Resolver {
    store: Arc<dyn EdgeStore>,
    crossref: Arc<dyn CrossReferenceFinder>,
    concurrency: usize,
}

impl Resolver {
    pub fn new(
        store: Arc<dyn EdgeStore>,
        crossref: Arc<dyn CrossReferenceFinder>,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            crossref,
            concurrency: concurrency.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn EdgeStore> {
        &self.store
    }

    /// Load group records not yet in the context.
    pub async fn load_groups(
        &self,
        ctx: &mut ResolutionContext,
        ids: &[GroupId],
    ) -> Result<(), StoreError> {
        let missing: BTreeSet<GroupId> = ids.iter().copied().filter(|id| !ctx.has_group(id)).collect();
        if missing.is_empty() {
            return Ok(());
        }
        let store = &self.store;
        let fetched: Vec<(GroupId, Option<Group>)> = futures::stream::iter(missing)
            .map(|id| async move {
                let item = store.get_item(&keys::group_key(&id)).await?;
                Ok::<_, StoreError>((id, item.and_then(Item::into_group)))
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;
        for (id, group) in fetched {
            ctx.insert_group(id, group);
        }
        Ok(())
    }

    pub async fn group(
        &self,
        ctx: &mut ResolutionContext,
        id: GroupId,
    ) -> Result<Option<Group>, StoreError> {
        self.load_groups(ctx, &[id]).await?;
        Ok(ctx.group(&id).cloned())
    }

    /// Load the live edges of groups not yet in the context.
    pub async fn load_edges(
        &self,
        ctx: &mut ResolutionContext,
        ids: &[GroupId],
    ) -> Result<(), StoreError> {
        let missing: BTreeSet<GroupId> = ids.iter().copied().filter(|id| !ctx.has_edges(id)).collect();
        if missing.is_empty() {
            return Ok(());
        }
        let store = &self.store;
        let fetched: Vec<(GroupId, Vec<MembershipEdge>)> = futures::stream::iter(missing)
            .map(|id| async move {
                let items = store
                    .query(
                        &Query::partition(keys::group_pk(&id))
                            .status_in(EdgeStatus::LIVE.iter().map(EdgeStatus::as_str)),
                    )
                    .await?;
                let edges = items.into_iter().filter_map(Item::into_edge).collect();
                Ok::<_, StoreError>((id, edges))
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;
        for (id, edges) in fetched {
            ctx.insert_edges(id, edges);
        }
        Ok(())
    }

    /// Live direct edges of one group.
    pub async fn direct_edges(
        &self,
        ctx: &mut ResolutionContext,
        id: GroupId,
    ) -> Result<Arc<Vec<MembershipEdge>>, StoreError> {
        self.load_edges(ctx, &[id]).await?;
        Ok(ctx.edges(&id).unwrap_or_default())
    }

    /// Direct users, reachable subgroups, flattened users and owners of a group.
    pub async fn resolve_members(
        &self,
        ctx: &mut ResolutionContext,
        group_id: GroupId,
    ) -> Result<Resolution, StoreError> {
        let root = self.direct_edges(ctx, group_id).await?;
        let mut resolution = Resolution::empty(group_id);
        for edge in root.iter() {
            match edge.member_type {
                MemberType::User => resolution.direct_users.push(edge.clone()),
                MemberType::Group => resolution.subgroup_edges.push(edge.clone()),
                MemberType::Owner => resolution.owners.push(edge.clone()),
            }
        }

        let mut seen = BTreeSet::from([group_id]);
        let mut frontier: Vec<GroupId> = resolution
            .subgroup_edges
            .iter()
            .map(|e| GroupId(e.member_id))
            .filter(|id| seen.insert(*id))
            .collect();
        let mut passes = 0usize;

        while !frontier.is_empty() {
            passes += 1;
            self.load_groups(ctx, &frontier).await?;
            frontier.retain(|id| ctx.is_active(id));
            self.load_edges(ctx, &frontier).await?;

            let mut next = Vec::new();
            for id in &frontier {
                resolution.subgroups.insert(*id);
                let Some(edges) = ctx.edges(id) else { continue };
                for edge in edges.iter().filter(|e| e.member_type == MemberType::Group) {
                    let child = GroupId(edge.member_id);
                    if seen.insert(child) {
                        next.push(child);
                    }
                }
            }
            frontier = next;
        }

        for edge in root.iter().filter(|e| e.member_type == MemberType::User) {
            resolution.merge_user(edge, false);
        }
        for sub in &resolution.subgroups.clone() {
            let Some(edges) = ctx.edges(sub) else { continue };
            for edge in edges.iter().filter(|e| e.member_type == MemberType::User) {
                resolution.merge_user(edge, true);
            }
        }

        debug!(
            group_id = %group_id,
            passes,
            subgroups = resolution.subgroups.len(),
            users = resolution.transitive_users.len(),
            "resolved group members"
        );
        Ok(resolution)
    }

    /// Users reached by a set of members: users directly, and everyone under
    /// active member groups. Owners never count.
    pub async fn users_of(
        &self,
        ctx: &mut ResolutionContext,
        members: &[MemberRef],
    ) -> Result<BTreeSet<UserId>, StoreError> {
        let mut users = BTreeSet::new();
        for &member in members {
            match member {
                MemberRef::User(user_id) => {
                    users.insert(user_id);
                }
                MemberRef::Group(group_id) => {
                    if self.group(ctx, group_id).await?.is_some_and(|g| g.is_active()) {
                        let resolution = self.resolve_members(ctx, group_id).await?;
                        users.extend(resolution.transitive_users.into_keys());
                    }
                }
                MemberRef::Owner(_) => {}
            }
        }
        Ok(users)
    }

    pub async fn reverse_adjacency(
        &self,
        ctx: &mut ResolutionContext,
        company_id: CompanyId,
    ) -> Result<Arc<ReverseAdjacency>, CoreError> {
        if let Some(adjacency) = ctx.reverse(&company_id) {
            return Ok(adjacency);
        }
        let adjacency = Arc::new(
            self.crossref
                .reverse_adjacency(&company_id)
                .await
                .map_err(CoreError::CrossReferenceSweep)?,
        );
        ctx.insert_reverse(company_id, adjacency.clone());
        Ok(adjacency)
    }

    /// Active groups reaching `start` through nesting, walking only through
    /// active groups and never through `excluded`. `start` itself is not
    /// included.
    async fn climb(
        &self,
        ctx: &mut ResolutionContext,
        reverse: &ReverseAdjacency,
        start: &BTreeSet<GroupId>,
        excluded: Option<GroupId>,
    ) -> Result<BTreeSet<GroupId>, StoreError> {
        let mut seen = start.clone();
        let mut found = BTreeSet::new();
        let mut frontier: Vec<GroupId> = start.iter().copied().collect();

        while !frontier.is_empty() {
            let candidates: Vec<GroupId> = frontier
                .iter()
                .flat_map(|g| reverse.parents(g))
                .filter(|p| seen.insert(*p))
                .collect();
            self.load_groups(ctx, &candidates).await?;
            frontier = candidates
                .into_iter()
                .filter(|p| Some(*p) != excluded && ctx.is_active(p))
                .collect();
            found.extend(frontier.iter().copied());
        }
        Ok(found)
    }

    /// Active groups that nest `group`, directly or transitively.
    pub async fn ancestors(
        &self,
        ctx: &mut ResolutionContext,
        group: &Group,
    ) -> Result<BTreeSet<GroupId>, CoreError> {
        let reverse = self.reverse_adjacency(ctx, group.company_id).await?;
        Ok(self
            .climb(ctx, &reverse, &BTreeSet::from([group.id]), None)
            .await?)
    }

    /// The group's own department plus the departments of its active ancestors.
    pub async fn affected_departments(
        &self,
        ctx: &mut ResolutionContext,
        group: &Group,
    ) -> Result<BTreeSet<DepartmentId>, CoreError> {
        let mut departments = BTreeSet::from([group.department_id]);
        for ancestor in self.ancestors(ctx, group).await? {
            if let Some(g) = ctx.group(&ancestor) {
                departments.insert(g.department_id);
            }
        }
        Ok(departments)
    }

    /// Every active group that reaches the user, directly or through nesting.
    /// `excluded` is treated as if it were inactive.
    pub async fn groups_containing_user(
        &self,
        ctx: &mut ResolutionContext,
        company_id: CompanyId,
        user_id: UserId,
        excluded: Option<GroupId>,
    ) -> Result<BTreeSet<GroupId>, CoreError> {
        let direct: Vec<GroupId> = self
            .store
            .query_index(&IndexQuery::UserEdges {
                company_id,
                user_id,
            })
            .await?
            .into_iter()
            .filter_map(Item::into_edge)
            .filter(|e| e.status.is_live())
            .map(|e| e.group_id)
            .collect();
        self.load_groups(ctx, &direct).await?;

        let start: BTreeSet<GroupId> = direct
            .into_iter()
            .filter(|g| Some(*g) != excluded && ctx.is_active(g))
            .collect();
        if start.is_empty() {
            return Ok(start);
        }

        let reverse = self.reverse_adjacency(ctx, company_id).await?;
        let mut reach = self.climb(ctx, &reverse, &start, excluded).await?;
        reach.extend(start);
        Ok(reach)
    }
}
