use std::collections::{BTreeMap, BTreeSet};

use roster_audit::{AuditAction, AuditEvent};
use roster_events::{EventType, MembershipEvent};
use roster_storage::{Item, MembershipEdge, OperationId, WriteRequest};
use serde_json::json;
use tracing::info;

use super::{
    direct_edges_by_member, edge_refs, finish, new_group, require_active_group, require_department,
    require_direct_members, require_name, sync_group, BranchGroupRequest,
};
use crate::context::ResolutionContext;
use crate::department::DepartmentDelta;
use crate::naming::unique_name;
use crate::outcome::OperationOutcome;
use crate::{CoreError, GroupService};

/// Split a new group off `source`: copied members end up in both groups,
/// moved members only in the new one.
pub async fn branch_group(
    service: &GroupService,
    req: BranchGroupRequest,
) -> Result<OperationOutcome, CoreError> {
    let operation_id = OperationId::new();
    let mut ctx = ResolutionContext::new();
    let company_id = req.company_id;

    let desired = require_name(&req.name)?;
    let source = require_active_group(service, &mut ctx, company_id, req.source_group_id).await?;
    let department_id = match req.department_id {
        Some(d) if d != source.department_id => {
            require_department(service, company_id, d).await?;
            d
        }
        _ => source.department_id,
    };

    let edges = direct_edges_by_member(service, &mut ctx, source.id).await?;
    let mut picked = require_direct_members(
        &edges,
        source.id,
        req.copy_members.iter().chain(&req.move_members).copied(),
    )?;
    let moved: Vec<MembershipEdge> = picked.split_off(req.copy_members.len());
    let copied = picked;

    let name = unique_name(service.store().as_ref(), company_id, desired, None).await?;
    let source_departments = service
        .resolver()
        .affected_departments(&mut ctx, &source)
        .await?;
    let source_before = service.resolver().resolve_members(&mut ctx, source.id).await?;
    let users = service
        .resolver()
        .users_of(&mut ctx, &edge_refs(copied.iter().chain(&moved)))
        .await?;

    let group = new_group(
        company_id,
        department_id,
        name,
        source.color.clone(),
        BTreeMap::new(),
    );
    let mut writes = vec![WriteRequest::Put(Item::Group(group.clone()))];
    writes.extend(
        copied
            .iter()
            .map(|e| WriteRequest::Put(Item::GroupMember(e.reowned(group.id)))),
    );
    for edge in &moved {
        writes.push(WriteRequest::Delete(edge.key()));
        writes.push(WriteRequest::Put(Item::GroupMember(edge.reowned(group.id))));
    }
    service.commit(&mut ctx, operation_id, writes).await?;

    // Same single department on both sides means nobody's department changes.
    let delta = if source_departments != BTreeSet::from([department_id]) {
        let mut departments = source_departments;
        departments.insert(department_id);
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

    if !moved.is_empty() {
        let source_after = service.resolver().resolve_members(&mut ctx, source.id).await?;
        sync_group(service, &source, &source_before.transitive_users, &source_after.transitive_users)
            .await;
    }

    info!(
        operation_id = %operation_id,
        source_group_id = %source.id,
        group_id = %group.id,
        copied = copied.len(),
        moved = moved.len(),
        "group branched"
    );

    let mut events = vec![MembershipEvent::group(
        EventType::GroupCreated,
        operation_id,
        group.id,
    )];
    events.extend(copied.iter().chain(&moved).map(|e| {
        MembershipEvent::member(EventType::MemberAdded, operation_id, group.id, e.member_ref(), e.role)
    }));
    events.extend(moved.iter().map(|e| {
        MembershipEvent::member(EventType::MemberRemoved, operation_id, source.id, e.member_ref(), e.role)
    }));
    let audit = AuditEvent::builder(operation_id, &company_id, AuditAction::GroupBranch)
        .actor(req.actor.as_ref())
        .group(&group.id)
        .department_id(Some(&department_id))
        .details(json!({
            "source_group_id": source.id.0,
            "copied": copied.len(),
            "moved": moved.len(),
        }))
        .build();
    Ok(finish(operation_id, company_id, Some(group), delta, events, audit))
}
