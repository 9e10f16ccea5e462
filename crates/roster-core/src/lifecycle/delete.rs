use std::collections::BTreeMap;

use chrono::Utc;
use roster_audit::{AuditAction, AuditEvent};
use roster_events::{EventType, MembershipEvent};
use roster_storage::{
    keys, GroupId, GroupStatus, Item, MemberRef, MemberType, OperationId, WriteRequest,
};
use serde_json::json;
use tracing::info;

use super::{finish, require_group, sync_group, DeleteGroupRequest};
use crate::context::ResolutionContext;
use crate::outcome::OperationOutcome;
use crate::{CoreError, GroupService};

/// Soft-delete a group. Its own edges stay so it can be restored, but every
/// other group's reference to it is removed.
pub async fn delete_group(
    service: &GroupService,
    req: DeleteGroupRequest,
) -> Result<OperationOutcome, CoreError> {
    let operation_id = OperationId::new();
    let mut ctx = ResolutionContext::new();
    let company_id = req.company_id;

    let group = require_group(service, &mut ctx, company_id, req.group_id).await?;
    if !group.is_active() {
        return Err(CoreError::validation(format!(
            "group {} is already inactive",
            group.id
        )));
    }

    let resolver = service.resolver();
    let before = resolver.resolve_members(&mut ctx, group.id).await?;
    let departments = resolver.affected_departments(&mut ctx, &group).await?;
    let parents: Vec<GroupId> = resolver
        .reverse_adjacency(&mut ctx, company_id)
        .await?
        .parents(&group.id)
        .filter(|p| *p != group.id)
        .collect();

    let mut deleted = group.clone();
    deleted.status = GroupStatus::Inactive;
    deleted.updated_at = Utc::now();
    let mut writes = vec![WriteRequest::Put(Item::Group(deleted.clone()))];
    writes.extend(
        parents
            .iter()
            .map(|p| WriteRequest::Delete(keys::edge_key(p, MemberType::Group, &group.id.0))),
    );
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
            &before.user_ids(),
            Some(group.id),
        )
        .await?;
    sync_group(service, &group, &before.transitive_users, &BTreeMap::new()).await;

    info!(
        operation_id = %operation_id,
        group_id = %group.id,
        cross_references = parents.len(),
        removed = delta.to_remove.len(),
        "group deleted"
    );

    let mut events = vec![MembershipEvent::group(
        EventType::GroupDeleted,
        operation_id,
        group.id,
    )];
    events.extend(parents.iter().map(|p| {
        MembershipEvent::member(
            EventType::MemberRemoved,
            operation_id,
            *p,
            MemberRef::Group(group.id),
            None,
        )
    }));
    let audit = AuditEvent::builder(operation_id, &company_id, AuditAction::GroupDelete)
        .actor(req.actor.as_ref())
        .group(&group.id)
        .department_id(Some(&group.department_id))
        .details(json!({ "cross_references_removed": parents.len() }))
        .build();
    Ok(finish(operation_id, company_id, Some(deleted), delta, events, audit))
}
