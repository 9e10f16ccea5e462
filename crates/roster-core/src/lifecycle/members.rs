//! Live membership mutations. Deferred jobs replay these.

use roster_audit::{AuditAction, AuditEvent};
use roster_events::{EventType, MembershipEvent};
use roster_storage::{
    CompanyId, Group, GroupId, Item, MemberRef, MemberSpec, MemberType, MembershipEdge,
    OperationId, WriteRequest,
};
use serde_json::json;
use tracing::info;

use super::{
    direct_edges_by_member, edge_refs, finish, member_refs, require_active_group, require_direct_members, require_group,
    sync_group, validate_members, AddMembersRequest, MoveMembersRequest, RemoveMembersRequest,
};
use crate::context::ResolutionContext;
use crate::department::DepartmentDelta;
use crate::outcome::OperationOutcome;
use crate::{CoreError, GroupService};

/// Validation shared by [`add_members`] and scheduled add jobs.
pub(crate) async fn check_add(
    service: &GroupService,
    ctx: &mut ResolutionContext,
    company_id: CompanyId,
    group_id: GroupId,
    members: &[MemberSpec],
) -> Result<Group, CoreError> {
    if members.is_empty() {
        return Err(CoreError::validation("no members given"));
    }
    let group = require_active_group(service, ctx, company_id, group_id).await?;
    validate_members(service, ctx, company_id, Some(group_id), members).await?;
    Ok(group)
}

/// Validation shared by [`remove_members`] and scheduled remove jobs.
pub(crate) async fn check_remove(
    service: &GroupService,
    ctx: &mut ResolutionContext,
    company_id: CompanyId,
    group_id: GroupId,
    members: &[MemberRef],
) -> Result<(Group, Vec<MembershipEdge>), CoreError> {
    if members.is_empty() {
        return Err(CoreError::validation("no members given"));
    }
    let group = require_group(service, ctx, company_id, group_id).await?;
    let edges = direct_edges_by_member(service, ctx, group_id).await?;
    let removed = require_direct_members(&edges, group_id, members.iter().copied())?;
    Ok((group, removed))
}

/// Validation shared by [`move_members`] and scheduled move jobs.
pub(crate) async fn check_move(
    service: &GroupService,
    ctx: &mut ResolutionContext,
    company_id: CompanyId,
    source_id: GroupId,
    target_id: GroupId,
    members: &[MemberSpec],
) -> Result<(Group, Group, Vec<MembershipEdge>), CoreError> {
    if source_id == target_id {
        return Err(CoreError::validation("source and target group are the same"));
    }
    if members.is_empty() {
        return Err(CoreError::validation("no members given"));
    }
    let source = require_active_group(service, ctx, company_id, source_id).await?;
    let target = require_active_group(service, ctx, company_id, target_id).await?;
    let edges = direct_edges_by_member(service, ctx, source_id).await?;
    let moved = require_direct_members(&edges, source_id, members.iter().map(|m| m.member))?;
    validate_members(service, ctx, company_id, Some(target_id), members).await?;
    Ok((source, target, moved))
}

pub async fn add_members(
    service: &GroupService,
    req: AddMembersRequest,
) -> Result<OperationOutcome, CoreError> {
    let operation_id = OperationId::new();
    let mut ctx = ResolutionContext::new();
    let company_id = req.company_id;

    let group = check_add(service, &mut ctx, company_id, req.group_id, &req.members).await?;
    let before = service.resolver().resolve_members(&mut ctx, group.id).await?;
    let existing = direct_edges_by_member(service, &mut ctx, group.id).await?;

    let mut writes = Vec::new();
    let mut events = Vec::new();
    for spec in &req.members {
        let edge = MembershipEdge::new(group.id, company_id, spec.member, spec.role);
        let event_type = match existing.get(&spec.member) {
            None => EventType::MemberAdded,
            Some(current) if current.member_type == MemberType::User && current.role != edge.role => {
                EventType::MemberRoleChanged
            }
            Some(_) => continue,
        };
        events.push(MembershipEvent::member(
            event_type,
            operation_id,
            group.id,
            spec.member,
            edge.role,
        ));
        writes.push(WriteRequest::Put(Item::GroupMember(edge)));
    }

    let mut delta = DepartmentDelta::default();
    if !writes.is_empty() {
        service.commit(&mut ctx, operation_id, writes).await?;
        let users = service
            .resolver()
            .users_of(&mut ctx, &member_refs(&req.members))
            .await?;
        let departments = service.resolver().affected_departments(&mut ctx, &group).await?;
        delta = service
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
            .await?;
        let after = service.resolver().resolve_members(&mut ctx, group.id).await?;
        sync_group(service, &group, &before.transitive_users, &after.transitive_users).await;
    }

    info!(
        operation_id = %operation_id,
        group_id = %group.id,
        changed = events.len(),
        "members added"
    );
    let audit = AuditEvent::builder(operation_id, &company_id, AuditAction::GroupMemberAdd)
        .actor(req.actor.as_ref())
        .group(&group.id)
        .department_id(Some(&group.department_id))
        .details(json!({ "members": member_labels(req.members.iter().map(|m| m.member)) }))
        .build();
    Ok(finish(operation_id, company_id, Some(group), delta, events, audit))
}

pub async fn remove_members(
    service: &GroupService,
    req: RemoveMembersRequest,
) -> Result<OperationOutcome, CoreError> {
    let operation_id = OperationId::new();
    let mut ctx = ResolutionContext::new();
    let company_id = req.company_id;

    let (group, removed) =
        check_remove(service, &mut ctx, company_id, req.group_id, &req.members).await?;
    let before = service.resolver().resolve_members(&mut ctx, group.id).await?;
    // Who the removed members reach has to be known before the edges go.
    let users = service
        .resolver()
        .users_of(&mut ctx, &edge_refs(&removed))
        .await?;
    let departments = service.resolver().affected_departments(&mut ctx, &group).await?;

    let writes = removed.iter().map(|e| WriteRequest::Delete(e.key())).collect();
    service.commit(&mut ctx, operation_id, writes).await?;

    let delta = service
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
        .await?;
    let after = service.resolver().resolve_members(&mut ctx, group.id).await?;
    sync_group(service, &group, &before.transitive_users, &after.transitive_users).await;

    info!(
        operation_id = %operation_id,
        group_id = %group.id,
        removed = removed.len(),
        "members removed"
    );
    let events = removed
        .iter()
        .map(|e| {
            MembershipEvent::member(EventType::MemberRemoved, operation_id, group.id, e.member_ref(), e.role)
        })
        .collect();
    let audit = AuditEvent::builder(operation_id, &company_id, AuditAction::GroupMemberRemove)
        .actor(req.actor.as_ref())
        .group(&group.id)
        .department_id(Some(&group.department_id))
        .details(json!({ "members": member_labels(req.members.iter().copied()) }))
        .build();
    Ok(finish(operation_id, company_id, Some(group), delta, events, audit))
}

/// Take members out of one group and put them into another in one commit.
pub async fn move_members(
    service: &GroupService,
    req: MoveMembersRequest,
) -> Result<OperationOutcome, CoreError> {
    let operation_id = OperationId::new();
    let mut ctx = ResolutionContext::new();
    let company_id = req.company_id;

    let (source, target, moved) = check_move(
        service,
        &mut ctx,
        company_id,
        req.source_group_id,
        req.target_group_id,
        &req.members,
    )
    .await?;
    let source_before = service.resolver().resolve_members(&mut ctx, source.id).await?;
    let target_before = service.resolver().resolve_members(&mut ctx, target.id).await?;
    let users = service
        .resolver()
        .users_of(&mut ctx, &edge_refs(&moved))
        .await?;
    let mut departments = service.resolver().affected_departments(&mut ctx, &source).await?;
    departments.extend(service.resolver().affected_departments(&mut ctx, &target).await?);

    let mut writes = Vec::with_capacity(moved.len() * 2);
    let mut events = Vec::with_capacity(moved.len() * 2);
    for (edge, spec) in moved.iter().zip(&req.members) {
        let mut placed = edge.reowned(target.id);
        if placed.member_type == MemberType::User {
            placed.role = spec.role.or(edge.role);
        }
        events.push(MembershipEvent::member(
            EventType::MemberRemoved,
            operation_id,
            source.id,
            edge.member_ref(),
            edge.role,
        ));
        events.push(MembershipEvent::member(
            EventType::MemberAdded,
            operation_id,
            target.id,
            placed.member_ref(),
            placed.role,
        ));
        writes.push(WriteRequest::Delete(edge.key()));
        writes.push(WriteRequest::Put(Item::GroupMember(placed)));
    }
    service.commit(&mut ctx, operation_id, writes).await?;

    let delta = service
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
        .await?;
    let source_after = service.resolver().resolve_members(&mut ctx, source.id).await?;
    let target_after = service.resolver().resolve_members(&mut ctx, target.id).await?;
    sync_group(service, &source, &source_before.transitive_users, &source_after.transitive_users).await;
    sync_group(service, &target, &target_before.transitive_users, &target_after.transitive_users).await;

    info!(
        operation_id = %operation_id,
        source_group_id = %source.id,
        target_group_id = %target.id,
        moved = moved.len(),
        "members moved"
    );
    let audit = AuditEvent::builder(operation_id, &company_id, AuditAction::GroupMemberMove)
        .actor(req.actor.as_ref())
        .group(&source.id)
        .department_id(Some(&source.department_id))
        .details(json!({
            "target_group_id": target.id.0,
            "members": member_labels(req.members.iter().map(|m| m.member)),
        }))
        .build();
    Ok(finish(operation_id, company_id, Some(target), delta, events, audit))
}

fn member_labels(members: impl Iterator<Item = MemberRef>) -> Vec<String> {
    members.map(|m| m.to_string()).collect()
}
