//! Failure paths: store errors, partial writes and pre-write validation.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::TestHarness;
use roster_config::EngineConfig;
use roster_core::{
    AddMembersRequest, CoreError, CreateGroupRequest, CrossReferenceFinder, DeleteGroupRequest,
    GroupService, MergeGroupsRequest, ReverseAdjacency,
};
use roster_storage::{
    CompanyId, GroupId, GroupStatus, MemberRole, MemberSpec, MockEdgeStore, StoreError, UserId,
};
use uuid::Uuid;

/// Reverse lookup that always fails, as a throttled company scan would.
struct UnavailableFinder;

#[async_trait]
impl CrossReferenceFinder for UnavailableFinder {
    async fn reverse_adjacency(
        &self,
        _company_id: &CompanyId,
    ) -> Result<ReverseAdjacency, StoreError> {
        Err(StoreError::Backend("scan throttled".into()))
    }
}

fn add_request(company_id: CompanyId, group_id: GroupId) -> AddMembersRequest {
    AddMembersRequest {
        company_id,
        group_id,
        members: vec![MemberSpec::user(UserId(Uuid::new_v4()), MemberRole::Member)],
        actor: None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Mocked store
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_missing_group_fails_before_any_write() {
    let mut store = MockEdgeStore::new();
    store.expect_get_item().returning(|_| Ok(None));
    store.expect_query().returning(|_| Ok(Vec::new()));
    store.expect_query_index().returning(|_| Ok(Vec::new()));
    store.expect_batch_write().times(0);
    let service = GroupService::new(Arc::new(store), &EngineConfig::default());

    let err = service
        .add_members(add_request(CompanyId(Uuid::new_v4()), GroupId(Uuid::new_v4())))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::NotFound { entity: "group", .. }));
    assert!(err.is_pre_write());
}

#[tokio::test]
async fn test_store_read_error_propagates() {
    let mut store = MockEdgeStore::new();
    store
        .expect_get_item()
        .returning(|_| Err(StoreError::Backend("connection reset".into())));
    store.expect_batch_write().times(0);
    let service = GroupService::new(Arc::new(store), &EngineConfig::default());

    let err = service
        .add_members(add_request(CompanyId(Uuid::new_v4()), GroupId(Uuid::new_v4())))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Store(StoreError::Backend(_))));
    assert!(!err.is_pre_write());
}

// ═══════════════════════════════════════════════════════════════════════════
// Batch failures
// ═══════════════════════════════════════════════════════════════════════════

fn no_retry_config() -> EngineConfig {
    EngineConfig {
        batch_max_retries: 0,
        batch_retry_backoff_ms: 1,
        ..EngineConfig::default()
    }
}

#[tokio::test]
async fn test_partial_write_reports_committed_batches() {
    let h = TestHarness::with_config(no_retry_config());
    let dept = h.department("Everyone").await;
    let users = h.users(60).await;
    h.store.fail_batches_after(1, usize::MAX);

    let err = h
        .service()
        .create_group(CreateGroupRequest {
            company_id: h.company,
            department_id: dept,
            name: "Everyone".into(),
            color: None,
            associated_accounts: Default::default(),
            members: users
                .iter()
                .map(|u| MemberSpec::user(*u, MemberRole::Member))
                .collect(),
            actor: None,
        })
        .await
        .unwrap_err();

    match err {
        CoreError::PartialWrite {
            committed_batches,
            total_batches,
            ..
        } => {
            assert_eq!(committed_batches, 1);
            assert_eq!(total_batches, 3);
        }
        other => panic!("expected partial write, got {other:?}"),
    }
    assert_eq!(h.store.committed_batches(), vec![25]);
}

#[tokio::test]
async fn test_transient_batch_failure_is_retried() {
    let h = TestHarness::with_config(EngineConfig {
        batch_max_retries: 2,
        batch_retry_backoff_ms: 1,
        ..EngineConfig::default()
    });
    let dept = h.department("Support").await;
    let group = h.group(dept, "Tier 1").await;
    let user = h.user().await;
    h.store.fail_batches_after(0, 2);

    h.service()
        .add_members(AddMembersRequest {
            company_id: h.company,
            group_id: group,
            members: vec![MemberSpec::user(user, MemberRole::Member)],
            actor: None,
        })
        .await
        .unwrap();

    assert!(h.is_indexed(dept, user).await);
}

// ═══════════════════════════════════════════════════════════════════════════
// Cross-reference lookups
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_failed_reverse_lookup_aborts_delete_and_merge() {
    let h = TestHarness::new();
    let dept = h.department("Support").await;
    let retain = h.group(dept, "Tier 1").await;
    let remove = h.group(dept, "Tier 2").await;
    let user = h.user().await;
    h.add_user(remove, user, MemberRole::Member).await;
    let service = h
        .service()
        .with_cross_reference_finder(Arc::new(UnavailableFinder));

    let err = service
        .delete_group(DeleteGroupRequest {
            company_id: h.company,
            group_id: remove,
            actor: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::CrossReferenceSweep(StoreError::Backend(_))));

    let err = service
        .merge_groups(MergeGroupsRequest {
            company_id: h.company,
            retain_group_id: retain,
            remove_group_id: remove,
            retained_members: None,
            actor: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::CrossReferenceSweep(_)));

    assert!(h.store.committed_batches().is_empty());
    assert_eq!(h.group_status(remove).await, GroupStatus::Active);
}

// ═══════════════════════════════════════════════════════════════════════════
// Validation
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_unknown_user_aborts_without_writes() {
    let h = TestHarness::new();
    let dept = h.department("Support").await;
    let group = h.group(dept, "Tier 1").await;
    let before = h.store.len().await;

    let err = h
        .service()
        .add_members(add_request(h.company, group))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::NotFound { entity: "user", .. }));
    assert_eq!(h.store.len().await, before);
    assert!(h.store.committed_batches().is_empty());
}

#[tokio::test]
async fn test_group_of_another_company_is_not_found() {
    let h = TestHarness::new();
    let other = TestHarness {
        store: h.store.clone(),
        company: CompanyId(Uuid::new_v4()),
        config: EngineConfig::default(),
    };
    let dept = other.department("Elsewhere").await;
    let foreign = other.group(dept, "Foreign").await;
    let user = h.user().await;

    let err = h
        .service()
        .add_members(AddMembersRequest {
            company_id: h.company,
            group_id: foreign,
            members: vec![MemberSpec::user(user, MemberRole::Member)],
            actor: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::NotFound { entity: "group", .. }));
}
