//! Group lifecycle operations.
//!
//! Each operation validates everything it can before its first write, so
//! `NotFound` and `Validation` errors leave the store untouched. After the
//! writes it reconciles the department index and returns an
//! [`OperationOutcome`] carrying events and an audit entry for the caller.

pub mod branch;
pub mod clone;
pub mod create;
pub mod delete;
pub mod members;
pub mod merge;
pub mod update;

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use roster_audit::AuditEvent;
use roster_events::MembershipEvent;
use roster_storage::{
    keys, CompanyId, Department, DepartmentId, Group, GroupId, GroupStatus, Item, MemberRef,
    MemberSpec, MembershipEdge, OperationId, RecordStatus, UserId,
};
use uuid::Uuid;

use crate::context::ResolutionContext;
use crate::department::DepartmentDelta;
use crate::outcome::{department_events, OperationOutcome};
use crate::resolver::ResolvedUser;
use crate::sync::{diff_users, push_changes};
use crate::{CoreError, GroupService};

#[derive(Clone, Debug)]
pub struct CreateGroupRequest {
    pub company_id: CompanyId,
    pub department_id: DepartmentId,
    pub name: String,
    pub color: Option<String>,
    pub associated_accounts: BTreeMap<String, String>,
    pub members: Vec<MemberSpec>,
    pub actor: Option<UserId>,
}

/// Fields left as `None` are not changed.
#[derive(Clone, Debug)]
pub struct UpdateGroupRequest {
    pub company_id: CompanyId,
    pub group_id: GroupId,
    pub name: Option<String>,
    pub color: Option<String>,
    pub associated_accounts: Option<BTreeMap<String, String>>,
    pub department_id: Option<DepartmentId>,
    pub actor: Option<UserId>,
}

#[derive(Clone, Debug)]
pub struct AddMembersRequest {
    pub company_id: CompanyId,
    pub group_id: GroupId,
    pub members: Vec<MemberSpec>,
    pub actor: Option<UserId>,
}

#[derive(Clone, Debug)]
pub struct RemoveMembersRequest {
    pub company_id: CompanyId,
    pub group_id: GroupId,
    pub members: Vec<MemberRef>,
    pub actor: Option<UserId>,
}

/// A role on a moved user replaces the role it had in the source group.
#[derive(Clone, Debug)]
pub struct MoveMembersRequest {
    pub company_id: CompanyId,
    pub source_group_id: GroupId,
    pub target_group_id: GroupId,
    pub members: Vec<MemberSpec>,
    pub actor: Option<UserId>,
}

#[derive(Clone, Debug)]
pub struct CloneGroupRequest {
    pub company_id: CompanyId,
    pub source_group_id: GroupId,
    /// Defaults to the source name, de-duplicated.
    pub name: Option<String>,
    pub department_id: Option<DepartmentId>,
    /// Also copy integration connections and associated accounts.
    pub copy_integrations: bool,
    pub actor: Option<UserId>,
}

#[derive(Clone, Debug)]
pub struct MergeGroupsRequest {
    pub company_id: CompanyId,
    pub retain_group_id: GroupId,
    pub remove_group_id: GroupId,
    /// When set, only these members end up in the retained group. Listing
    /// the removed group keeps it alive as a subgroup.
    pub retained_members: Option<Vec<MemberSpec>>,
    pub actor: Option<UserId>,
}

#[derive(Clone, Debug)]
pub struct BranchGroupRequest {
    pub company_id: CompanyId,
    pub source_group_id: GroupId,
    pub name: String,
    pub department_id: Option<DepartmentId>,
    /// Duplicated into the new group.
    pub copy_members: Vec<MemberRef>,
    /// Taken out of the source and put into the new group.
    pub move_members: Vec<MemberRef>,
    pub actor: Option<UserId>,
}

#[derive(Clone, Debug)]
pub struct DeleteGroupRequest {
    pub company_id: CompanyId,
    pub group_id: GroupId,
    pub actor: Option<UserId>,
}

/// A group of the company that has not been retired by a merge.
pub(crate) async fn require_group(
    service: &GroupService,
    ctx: &mut ResolutionContext,
    company_id: CompanyId,
    group_id: GroupId,
) -> Result<Group, CoreError> {
    match service.resolver().group(ctx, group_id).await? {
        Some(group) if group.company_id == company_id && group.status != GroupStatus::Deleted => {
            Ok(group)
        }
        _ => Err(CoreError::not_found("group", group_id)),
    }
}

pub(crate) async fn require_active_group(
    service: &GroupService,
    ctx: &mut ResolutionContext,
    company_id: CompanyId,
    group_id: GroupId,
) -> Result<Group, CoreError> {
    let group = require_group(service, ctx, company_id, group_id).await?;
    if !group.is_active() {
        return Err(CoreError::validation(format!("group {group_id} is not active")));
    }
    Ok(group)
}

pub(crate) async fn require_department(
    service: &GroupService,
    company_id: CompanyId,
    department_id: DepartmentId,
) -> Result<Department, CoreError> {
    let department = service
        .store()
        .get_item(&keys::department_key(&department_id))
        .await?
        .and_then(Item::into_department)
        .filter(|d| d.company_id == company_id)
        .ok_or_else(|| CoreError::not_found("department", department_id))?;
    if department.status != RecordStatus::Active {
        return Err(CoreError::validation(format!(
            "department {department_id} is not active"
        )));
    }
    Ok(department)
}

async fn require_company_member(
    service: &GroupService,
    company_id: CompanyId,
    user_id: UserId,
) -> Result<(), CoreError> {
    match service
        .store()
        .get_item(&keys::company_member_key(&company_id, &user_id))
        .await?
    {
        Some(Item::CompanyMember(m)) if m.status == RecordStatus::Active => Ok(()),
        _ => Err(CoreError::not_found("user", user_id)),
    }
}

/// Check members about to be written under `owner`.
pub(crate) async fn validate_members(
    service: &GroupService,
    ctx: &mut ResolutionContext,
    company_id: CompanyId,
    owner: Option<GroupId>,
    members: &[MemberSpec],
) -> Result<(), CoreError> {
    let mut seen = HashSet::new();
    for spec in members {
        if !seen.insert(spec.member) {
            return Err(CoreError::validation(format!("duplicate member {}", spec.member)));
        }
        match spec.member {
            MemberRef::Group(group_id) => {
                if Some(group_id) == owner {
                    return Err(CoreError::validation(format!(
                        "group {group_id} cannot contain itself"
                    )));
                }
                require_active_group(service, ctx, company_id, group_id).await?;
            }
            MemberRef::User(user_id) | MemberRef::Owner(user_id) => {
                require_company_member(service, company_id, user_id).await?;
            }
        }
    }
    Ok(())
}

/// Live direct edges of a group keyed by member.
pub(crate) async fn direct_edges_by_member(
    service: &GroupService,
    ctx: &mut ResolutionContext,
    group_id: GroupId,
) -> Result<HashMap<MemberRef, MembershipEdge>, CoreError> {
    Ok(service
        .resolver()
        .direct_edges(ctx, group_id)
        .await?
        .iter()
        .map(|e| (e.member_ref(), e.clone()))
        .collect())
}

/// Look up the edges of members that must be direct members of `group_id`.
pub(crate) fn require_direct_members(
    edges: &HashMap<MemberRef, MembershipEdge>,
    group_id: GroupId,
    members: impl IntoIterator<Item = MemberRef>,
) -> Result<Vec<MembershipEdge>, CoreError> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    for member in members {
        if !seen.insert(member) {
            return Err(CoreError::validation(format!("duplicate member {member}")));
        }
        let edge = edges
            .get(&member)
            .ok_or_else(|| CoreError::not_found("member", format!("{member} in group {group_id}")))?;
        found.push(edge.clone());
    }
    Ok(found)
}

pub(crate) fn member_refs(members: &[MemberSpec]) -> Vec<MemberRef> {
    members.iter().map(|m| m.member).collect()
}

pub(crate) fn edge_refs<'a>(edges: impl IntoIterator<Item = &'a MembershipEdge>) -> Vec<MemberRef> {
    edges.into_iter().map(MembershipEdge::member_ref).collect()
}

pub(crate) fn new_group(
    company_id: CompanyId,
    department_id: DepartmentId,
    name: String,
    color: Option<String>,
    associated_accounts: BTreeMap<String, String>,
) -> Group {
    let now = Utc::now();
    Group {
        id: GroupId(Uuid::new_v4()),
        company_id,
        department_id,
        search_key: keys::search_key(&name),
        name,
        status: GroupStatus::Active,
        color,
        associated_accounts,
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn require_name(name: &str) -> Result<&str, CoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::validation("group name must not be empty"));
    }
    Ok(name)
}

/// Push the difference between two flattened user sets of `group` to its
/// external directories.
pub(crate) async fn sync_group(
    service: &GroupService,
    group: &Group,
    before: &BTreeMap<UserId, ResolvedUser>,
    after: &BTreeMap<UserId, ResolvedUser>,
) {
    if group.associated_accounts.is_empty() {
        return;
    }
    push_changes(service.directory_sync(), group, &diff_users(before, after)).await;
}

pub(crate) fn finish(
    operation_id: OperationId,
    company_id: CompanyId,
    group: Option<Group>,
    department_delta: DepartmentDelta,
    mut events: Vec<MembershipEvent>,
    audit: AuditEvent,
) -> OperationOutcome {
    events.extend(department_events(operation_id, &department_delta));
    OperationOutcome {
        operation_id,
        company_id,
        group,
        department_delta,
        events,
        audit,
    }
}
