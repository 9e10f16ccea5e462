use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use roster_audit::{AuditAction, AuditEvent};
use roster_events::{EventType, MembershipEvent};
use roster_storage::{
    keys, GroupIntegration, Item, MembershipEdge, OperationId, Query, WriteRequest,
};
use serde_json::json;
use tracing::info;

use super::{finish, new_group, require_department, require_group, sync_group, CloneGroupRequest};
use crate::context::ResolutionContext;
use crate::naming::unique_name;
use crate::outcome::OperationOutcome;
use crate::{CoreError, GroupService};

/// Copy a group and its direct edges. Nested groups are referenced by the
/// copy, not duplicated.
pub async fn clone_group(
    service: &GroupService,
    req: CloneGroupRequest,
) -> Result<OperationOutcome, CoreError> {
    let operation_id = OperationId::new();
    let mut ctx = ResolutionContext::new();
    let company_id = req.company_id;

    let source = require_group(service, &mut ctx, company_id, req.source_group_id).await?;
    let department_id = match req.department_id {
        Some(d) if d != source.department_id => {
            require_department(service, company_id, d).await?;
            d
        }
        _ => source.department_id,
    };
    let desired = req.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
    let name = unique_name(
        service.store().as_ref(),
        company_id,
        desired.unwrap_or(&source.name),
        None,
    )
    .await?;

    let accounts = if req.copy_integrations {
        source.associated_accounts.clone()
    } else {
        BTreeMap::new()
    };
    let group = new_group(company_id, department_id, name, source.color.clone(), accounts);

    let edges: Vec<MembershipEdge> = service
        .resolver()
        .direct_edges(&mut ctx, source.id)
        .await?
        .iter()
        .map(|e| e.reowned(group.id))
        .collect();

    let integrations: Vec<GroupIntegration> = if req.copy_integrations {
        service
            .store()
            .query(&Query::partition(keys::group_pk(&source.id)).sort_prefix(keys::PREFIX_INTEGRATION))
            .await?
            .into_iter()
            .filter_map(Item::into_integration)
            .map(|i| GroupIntegration {
                group_id: group.id,
                connected_at: Utc::now(),
                ..i
            })
            .collect()
    } else {
        Vec::new()
    };

    let mut writes = vec![WriteRequest::Put(Item::Group(group.clone()))];
    writes.extend(edges.iter().cloned().map(|e| WriteRequest::Put(Item::GroupMember(e))));
    writes.extend(
        integrations
            .iter()
            .cloned()
            .map(|i| WriteRequest::Put(Item::GroupIntegration(i))),
    );
    service.commit(&mut ctx, operation_id, writes).await?;

    let after = service.resolver().resolve_members(&mut ctx, group.id).await?;
    let delta = service
        .index()
        .reconcile_and_apply(
            service.resolver(),
            service.writer(),
            &mut ctx,
            operation_id,
            company_id,
            &BTreeSet::from([department_id]),
            &after.user_ids(),
            None,
        )
        .await?;
    sync_group(service, &group, &BTreeMap::new(), &after.transitive_users).await;

    info!(
        operation_id = %operation_id,
        source_group_id = %source.id,
        group_id = %group.id,
        edges = edges.len(),
        integrations = integrations.len(),
        "group cloned"
    );

    let mut events = vec![MembershipEvent::group(
        EventType::GroupCreated,
        operation_id,
        group.id,
    )];
    events.extend(edges.iter().map(|e| {
        MembershipEvent::member(EventType::MemberAdded, operation_id, group.id, e.member_ref(), e.role)
    }));
    let audit = AuditEvent::builder(operation_id, &company_id, AuditAction::GroupClone)
        .actor(req.actor.as_ref())
        .group(&group.id)
        .department_id(Some(&department_id))
        .details(json!({
            "source_group_id": source.id.0,
            "edges": edges.len(),
            "integrations": integrations.len(),
        }))
        .build();
    Ok(finish(operation_id, company_id, Some(group), delta, events, audit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use roster_storage::{EdgeStore, GroupId, MemberRole};

    fn request(fx: &Fixture, source: GroupId) -> CloneGroupRequest {
        CloneGroupRequest {
            company_id: fx.company,
            source_group_id: source,
            name: None,
            department_id: None,
            copy_integrations: false,
            actor: None,
        }
    }

    #[tokio::test]
    async fn clone_copies_direct_edges_without_expanding() {
        let fx = Fixture::new();
        let eng = fx.department().await;
        let ops = fx.department().await;
        let source = fx.group(eng, "Source").await;
        let sub = fx.group(eng, "Sub").await;
        let direct = fx.user().await;
        let nested = fx.user().await;
        fx.add_user(source, direct, MemberRole::Admin).await;
        fx.add_user(sub, nested, MemberRole::Member).await;
        fx.nest(source, sub).await;
        let service = fx.service();

        let mut req = request(&fx, source);
        req.department_id = Some(ops);
        let outcome = service.clone_group(req).await.unwrap();
        let copy = outcome.group.clone().unwrap();

        assert_eq!(copy.name, "Source (1)");
        assert_eq!(copy.department_id, ops);
        let resolution = service.resolve_members(fx.company, copy.id).await.unwrap();
        assert_eq!(resolution.direct_users.len(), 1);
        assert_eq!(resolution.subgroups, BTreeSet::from([sub]));
        assert_eq!(
            outcome.department_delta.to_add,
            BTreeSet::from([(ops, direct), (ops, nested)])
        );
        // The subgroup itself was not duplicated.
        let sub_edges = service.resolve_members(fx.company, sub).await.unwrap();
        assert_eq!(sub_edges.direct_users.len(), 1);
    }

    #[tokio::test]
    async fn integrations_copied_on_request() {
        let fx = Fixture::new();
        let dept = fx.department().await;
        let source = fx.group(dept, "Connected").await;
        fx.store
            .seed([Item::GroupIntegration(GroupIntegration {
                group_id: source,
                company_id: fx.company,
                slug: "github".into(),
                external_ref: "team-7".into(),
                connected_at: Utc::now(),
            })])
            .await;

        let mut req = request(&fx, source);
        req.copy_integrations = true;
        req.name = Some("Connected copy".into());
        let outcome = fx.service().clone_group(req).await.unwrap();
        let copy = outcome.group.unwrap();

        let copied = fx
            .store
            .get_item(&keys::integration_key(&copy.id, "github"))
            .await
            .unwrap()
            .and_then(Item::into_integration)
            .unwrap();
        assert_eq!(copied.external_ref, "team-7");
        assert_eq!(copy.name, "Connected copy");
    }
}
