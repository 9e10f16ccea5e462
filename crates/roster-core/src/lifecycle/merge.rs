use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use roster_audit::{AuditAction, AuditEvent};
use roster_events::{EventType, MembershipEvent};
use roster_storage::{
    keys, GroupId, GroupStatus, Item, MemberRef, MemberType, MembershipEdge, OperationId,
    WriteRequest,
};
use serde_json::json;
use tracing::info;

use super::{finish, require_active_group, sync_group, validate_members, MergeGroupsRequest};
use crate::context::ResolutionContext;
use crate::department::DepartmentDelta;
use crate::outcome::OperationOutcome;
use crate::{CoreError, GroupService};

/// Fold `remove` into `retain`.
///
/// The retained group ends up with the union of both groups' direct edges,
/// keeping the strongest role per user. Every other group's reference to
/// the removed group is deleted and the removed group is retired, unless an
/// explicit retained member list names it, in which case it survives as a
/// subgroup of the retained group.
pub async fn merge_groups(
    service: &GroupService,
    req: MergeGroupsRequest,
) -> Result<OperationOutcome, CoreError> {
    let operation_id = OperationId::new();
    let mut ctx = ResolutionContext::new();
    let company_id = req.company_id;

    if req.retain_group_id == req.remove_group_id {
        return Err(CoreError::validation("cannot merge a group into itself"));
    }
    let retain = require_active_group(service, &mut ctx, company_id, req.retain_group_id).await?;
    let remove = require_active_group(service, &mut ctx, company_id, req.remove_group_id).await?;
    if let Some(list) = &req.retained_members {
        validate_members(service, &mut ctx, company_id, Some(retain.id), list).await?;
    }

    let resolver = service.resolver();
    let retain_before = resolver.resolve_members(&mut ctx, retain.id).await?;
    let remove_before = resolver.resolve_members(&mut ctx, remove.id).await?;

    let union = union_edges(
        retain.id,
        remove.id,
        retain_before.direct_edges().chain(remove_before.direct_edges()),
    );
    let relisted = req
        .retained_members
        .as_ref()
        .is_some_and(|list| list.iter().any(|m| m.member == MemberRef::Group(remove.id)));

    let merged: BTreeMap<MemberRef, MembershipEdge> = match &req.retained_members {
        None => union,
        Some(list) => {
            let mut kept = BTreeMap::new();
            for spec in list {
                let edge = match union.get(&spec.member) {
                    Some(edge) => {
                        let mut edge = edge.clone();
                        if edge.member_type == MemberType::User && spec.role.is_some() {
                            edge.role = spec.role;
                        }
                        edge
                    }
                    None if spec.member == MemberRef::Group(remove.id) => {
                        MembershipEdge::new(retain.id, company_id, spec.member, None)
                    }
                    None => {
                        return Err(CoreError::validation(format!(
                            "{} is not a member of either group",
                            spec.member
                        )))
                    }
                };
                kept.insert(spec.member, edge);
            }
            kept
        }
    };

    let mut departments = resolver.affected_departments(&mut ctx, &retain).await?;
    departments.extend(resolver.affected_departments(&mut ctx, &remove).await?);

    let cross_references: Vec<GroupId> = if relisted {
        Vec::new()
    } else {
        resolver
            .reverse_adjacency(&mut ctx, company_id)
            .await?
            .parents(&remove.id)
            .filter(|p| *p != retain.id && *p != remove.id)
            .collect()
    };

    let now = Utc::now();
    let mut retained_group = retain.clone();
    retained_group.updated_at = now;
    let mut writes: Vec<WriteRequest> = retain_before
        .direct_edges()
        .map(|e| WriteRequest::Delete(e.key()))
        .collect();
    if !relisted {
        writes.extend(remove_before.direct_edges().map(|e| WriteRequest::Delete(e.key())));
        writes.extend(
            cross_references
                .iter()
                .map(|p| WriteRequest::Delete(keys::edge_key(p, MemberType::Group, &remove.id.0))),
        );
        let mut retired = remove.clone();
        retired.status = GroupStatus::Deleted;
        retired.updated_at = now;
        writes.push(WriteRequest::Put(Item::Group(retired)));
    }
    writes.extend(merged.values().cloned().map(|e| WriteRequest::Put(Item::GroupMember(e))));
    writes.push(WriteRequest::Put(Item::Group(retained_group.clone())));
    service.commit(&mut ctx, operation_id, writes).await?;

    // Absorbed users may now reach departments above the retained group.
    let needs_reconcile = departments != BTreeSet::from([retain.department_id])
        || !cross_references.is_empty()
        || req.retained_members.is_some();
    let delta = if needs_reconcile {
        let users: BTreeSet<_> = retain_before
            .user_ids()
            .into_iter()
            .chain(remove_before.user_ids())
            .collect();
        service
            .index()
            .reconcile_and_apply(
                service.resolver(),
                service.writer(),
                &mut ctx,
                operation_id,
                company_id,
                &departments,
                &users,
                None,
            )
            .await?
    } else {
        DepartmentDelta::default()
    };

    let retain_after = service.resolver().resolve_members(&mut ctx, retain.id).await?;
    sync_group(service, &retain, &retain_before.transitive_users, &retain_after.transitive_users).await;
    if !relisted {
        sync_group(service, &remove, &remove_before.transitive_users, &BTreeMap::new()).await;
    }

    info!(
        operation_id = %operation_id,
        retain_group_id = %retain.id,
        remove_group_id = %remove.id,
        edges = merged.len(),
        cross_references = cross_references.len(),
        retired = !relisted,
        "groups merged"
    );

    let mut events = vec![MembershipEvent::group(
        EventType::GroupUpdated,
        operation_id,
        retain.id,
    )];
    let previous: BTreeMap<MemberRef, &MembershipEdge> = retain_before
        .direct_edges()
        .map(|e| (e.member_ref(), e))
        .collect();
    for (member, edge) in &merged {
        let event_type = match previous.get(member) {
            None => EventType::MemberAdded,
            Some(old) if old.role != edge.role => EventType::MemberRoleChanged,
            Some(_) => continue,
        };
        events.push(MembershipEvent::member(event_type, operation_id, retain.id, *member, edge.role));
    }
    for (member, edge) in previous.iter().filter(|(m, _)| !merged.contains_key(m)) {
        events.push(MembershipEvent::member(
            EventType::MemberRemoved,
            operation_id,
            retain.id,
            *member,
            edge.role,
        ));
    }
    for parent in &cross_references {
        events.push(MembershipEvent::member(
            EventType::MemberRemoved,
            operation_id,
            *parent,
            MemberRef::Group(remove.id),
            None,
        ));
    }
    if !relisted {
        events.push(MembershipEvent::group(EventType::GroupRetired, operation_id, remove.id));
    }

    let audit = AuditEvent::builder(operation_id, &company_id, AuditAction::GroupMerge)
        .actor(req.actor.as_ref())
        .group(&retain.id)
        .department_id(Some(&retain.department_id))
        .details(json!({
            "removed_group_id": remove.id.0,
            "retired": !relisted,
            "edges": merged.len(),
            "cross_references_removed": cross_references.len(),
        }))
        .build();
    Ok(finish(operation_id, company_id, Some(retained_group), delta, events, audit))
}

/// Re-own every edge under `retain`, keeping the strongest role per member.
/// Edges naming either group are dropped.
fn union_edges<'a>(
    retain: GroupId,
    remove: GroupId,
    edges: impl Iterator<Item = &'a MembershipEdge>,
) -> BTreeMap<MemberRef, MembershipEdge> {
    let mut union: BTreeMap<MemberRef, MembershipEdge> = BTreeMap::new();
    for edge in edges {
        let member = edge.member_ref();
        if member == MemberRef::Group(retain) || member == MemberRef::Group(remove) {
            continue;
        }
        union
            .entry(member)
            .and_modify(|kept| kept.role = kept.role.max(edge.role))
            .or_insert_with(|| edge.reowned(retain));
    }
    union
}
