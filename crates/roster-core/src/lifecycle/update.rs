use chrono::Utc;
use roster_audit::{AuditAction, AuditEvent};
use roster_events::{EventType, MembershipEvent};
use roster_storage::{keys, CompanyId, Group, Item, OperationId, UserId, WriteRequest};
use serde_json::{json, Map, Value};
use tracing::info;

use super::{finish, require_department, require_group, require_name, UpdateGroupRequest};
use crate::context::ResolutionContext;
use crate::department::DepartmentDelta;
use crate::naming::unique_name;
use crate::outcome::OperationOutcome;
use crate::{CoreError, GroupService};

/// Rename, recolor, re-associate or move a group to another department.
pub async fn update_group(
    service: &GroupService,
    req: UpdateGroupRequest,
) -> Result<OperationOutcome, CoreError> {
    let operation_id = OperationId::new();
    let mut ctx = ResolutionContext::new();
    let company_id = req.company_id;
    let actor = req.actor;

    let current = require_group(service, &mut ctx, company_id, req.group_id).await?;
    let mut updated = current.clone();
    let mut changed = Map::new();

    if let Some(name) = req.name.as_deref() {
        let desired = require_name(name)?;
        if desired != current.name {
            let name = unique_name(service.store().as_ref(), company_id, desired, Some(current.id))
                .await?;
            changed.insert("name".into(), json!({ "from": current.name, "to": name }));
            updated.search_key = keys::search_key(&name);
            updated.name = name;
        }
    }
    if let Some(color) = req.color {
        if current.color.as_deref() != Some(color.as_str()) {
            changed.insert("color".into(), json!(color));
            updated.color = Some(color);
        }
    }
    if let Some(accounts) = req.associated_accounts {
        if accounts != current.associated_accounts {
            changed.insert("associated_accounts".into(), json!(accounts.keys().collect::<Vec<_>>()));
            updated.associated_accounts = accounts;
        }
    }
    let moving = matches!(req.department_id, Some(d) if d != current.department_id);
    if let Some(department_id) = req.department_id.filter(|_| moving) {
        require_department(service, company_id, department_id).await?;
        changed.insert(
            "department_id".into(),
            json!({ "from": current.department_id.0, "to": department_id.0 }),
        );
        updated.department_id = department_id;
    }

    let mut delta = DepartmentDelta::default();
    if changed.is_empty() {
        let audit = audit_entry(operation_id, company_id, actor, &current, changed);
        return Ok(finish(operation_id, company_id, Some(current), delta, Vec::new(), audit));
    }

    // Inactive groups reach nobody, so only an active group's move matters.
    let reconcile = moving && current.is_active();
    let mut departments = if reconcile {
        service.resolver().affected_departments(&mut ctx, &current).await?
    } else {
        Default::default()
    };

    updated.updated_at = Utc::now();
    service
        .commit(
            &mut ctx,
            operation_id,
            vec![WriteRequest::Put(Item::Group(updated.clone()))],
        )
        .await?;

    if reconcile {
        departments.extend(service.resolver().affected_departments(&mut ctx, &updated).await?);
        let users = service
            .resolver()
            .resolve_members(&mut ctx, updated.id)
            .await?
            .user_ids();
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
    }

    info!(
        operation_id = %operation_id,
        group_id = %updated.id,
        fields = changed.len(),
        "group updated"
    );

    let events = vec![MembershipEvent::group(
        EventType::GroupUpdated,
        operation_id,
        updated.id,
    )];
    let audit = audit_entry(operation_id, company_id, actor, &updated, changed);
    Ok(finish(operation_id, company_id, Some(updated), delta, events, audit))
}

fn audit_entry(
    operation_id: OperationId,
    company_id: CompanyId,
    actor: Option<UserId>,
    group: &Group,
    changed: Map<String, Value>,
) -> AuditEvent {
    AuditEvent::builder(operation_id, &company_id, AuditAction::GroupUpdate)
        .actor(actor.as_ref())
        .group(&group.id)
        .department_id(Some(&group.department_id))
        .details(Value::Object(changed))
        .build()
}
