use std::collections::{BTreeMap, BTreeSet};

use roster_audit::{AuditAction, AuditEvent};
use roster_events::{EventType, MembershipEvent};
use roster_storage::{Item, MembershipEdge, OperationId, WriteRequest};
use serde_json::json;
use tracing::info;

use super::{
    finish, member_refs, new_group, require_department, require_name, sync_group, validate_members,
    CreateGroupRequest,
};
use crate::context::ResolutionContext;
use crate::naming::unique_name;
use crate::outcome::OperationOutcome;
use crate::{CoreError, GroupService};

pub async fn create_group(
    service: &GroupService,
    req: CreateGroupRequest,
) -> Result<OperationOutcome, CoreError> {
    let operation_id = OperationId::new();
    let mut ctx = ResolutionContext::new();
    let company_id = req.company_id;

    let desired = require_name(&req.name)?;
    require_department(service, company_id, req.department_id).await?;
    validate_members(service, &mut ctx, company_id, None, &req.members).await?;
    let name = unique_name(service.store().as_ref(), company_id, desired, None).await?;

    let group = new_group(
        company_id,
        req.department_id,
        name,
        req.color,
        req.associated_accounts,
    );
    let edges: Vec<MembershipEdge> = req
        .members
        .iter()
        .map(|spec| MembershipEdge::new(group.id, company_id, spec.member, spec.role))
        .collect();

    let mut writes = vec![WriteRequest::Put(Item::Group(group.clone()))];
    writes.extend(edges.iter().cloned().map(|e| WriteRequest::Put(Item::GroupMember(e))));
    service.commit(&mut ctx, operation_id, writes).await?;

    let users = service
        .resolver()
        .users_of(&mut ctx, &member_refs(&req.members))
        .await?;
    let delta = service
        .index()
        .reconcile_and_apply(
            service.resolver(),
            service.writer(),
            &mut ctx,
            operation_id,
            company_id,
            &BTreeSet::from([group.department_id]),
            &users,
            None,
        )
        .await?;

    let after = service.resolver().resolve_members(&mut ctx, group.id).await?;
    sync_group(service, &group, &BTreeMap::new(), &after.transitive_users).await;

    info!(
        operation_id = %operation_id,
        group_id = %group.id,
        members = edges.len(),
        "group created"
    );

    let mut events = vec![MembershipEvent::group(
        EventType::GroupCreated,
        operation_id,
        group.id,
    )];
    events.extend(edges.iter().map(|e| {
        MembershipEvent::member(EventType::MemberAdded, operation_id, group.id, e.member_ref(), e.role)
    }));
    let audit = AuditEvent::builder(operation_id, &company_id, AuditAction::GroupCreate)
        .actor(req.actor.as_ref())
        .group(&group.id)
        .department_id(Some(&group.department_id))
        .details(json!({ "name": group.name, "members": edges.len() }))
        .build();

    Ok(finish(operation_id, company_id, Some(group), delta, events, audit))
}
