use std::collections::HashMap;
use std::sync::Arc;

use roster_storage::{CompanyId, Group, GroupId, MembershipEdge};

use crate::crossref::ReverseAdjacency;

/// Read cache scoped to one lifecycle operation.
///
/// Holds group records, live edge lists and reverse adjacency fetched while
/// the operation runs. Nothing outlives the operation, and every write the
/// operation commits must be followed by [`ResolutionContext::invalidate`].
#[derive(Debug, Default)]
pub struct ResolutionContext {
    groups: HashMap<GroupId, Option<Group>>,
    edges: HashMap<GroupId, Arc<Vec<MembershipEdge>>>,
    reverse: HashMap<CompanyId, Arc<ReverseAdjacency>>,
}

impl ResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&mut self) {
        self.groups.clear();
        self.edges.clear();
        self.reverse.clear();
    }

    /// `None` when the group was never loaded or does not exist.
    pub fn group(&self, id: &GroupId) -> Option<&Group> {
        self.groups.get(id).and_then(Option::as_ref)
    }

    pub fn is_active(&self, id: &GroupId) -> bool {
        self.group(id).is_some_and(Group::is_active)
    }

    pub(crate) fn has_group(&self, id: &GroupId) -> bool {
        self.groups.contains_key(id)
    }

    pub(crate) fn insert_group(&mut self, id: GroupId, group: Option<Group>) {
        self.groups.insert(id, group);
    }

    pub(crate) fn edges(&self, id: &GroupId) -> Option<Arc<Vec<MembershipEdge>>> {
        self.edges.get(id).cloned()
    }

    pub(crate) fn has_edges(&self, id: &GroupId) -> bool {
        self.edges.contains_key(id)
    }

    pub(crate) fn insert_edges(&mut self, id: GroupId, edges: Vec<MembershipEdge>) {
        self.edges.insert(id, Arc::new(edges));
    }

    pub(crate) fn reverse(&self, company_id: &CompanyId) -> Option<Arc<ReverseAdjacency>> {
        self.reverse.get(company_id).cloned()
    }

    pub(crate) fn insert_reverse(&mut self, company_id: CompanyId, adjacency: Arc<ReverseAdjacency>) {
        self.reverse.insert(company_id, adjacency);
    }
}
