//! Deferred jobs, concurrent writers and outcome draining.

mod common;

use std::sync::Arc;

use chrono::NaiveDate;
use common::TestHarness;
use futures::StreamExt;
use roster_audit::{AuditAction, AuditLog, AuditLogFilter};
use roster_core::{
    AddMembersRequest, DeleteGroupRequest, OutcomeDrain, RemoveMembersRequest, ScheduleJobRequest,
};
use roster_events::{EventBus, EventType};
use roster_events_memory::MemoryEventBus;
use roster_storage::{JobKind, MemberRef, MemberRole, MemberSpec};
use roster_store_memory::MemoryAuditLog;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 6, d).unwrap()
}

// ═══════════════════════════════════════════════════════════════════════════
// Sweeps
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_job_is_processed_exactly_once() {
    let h = TestHarness::new();
    let dept = h.department("Finance").await;
    let group = h.group(dept, "Payroll").await;
    let user = h.user().await;
    let service = h.service();

    let (job, _) = service
        .schedule_job(
            ScheduleJobRequest {
                company_id: h.company,
                scheduled_for: day(3),
                kind: JobKind::Add,
                group_id: group,
                target_group_id: None,
                members: vec![MemberSpec::user(user, MemberRole::Member)],
                actor: None,
            },
            day(1),
        )
        .await
        .unwrap();

    let first = service.run_sweep(day(4)).await.unwrap();
    assert_eq!(first.processed, vec![job.id]);
    assert_eq!(first.audit.len(), 1);
    assert!(h.is_indexed(dept, user).await);

    let second = service.run_sweep(day(5)).await.unwrap();
    assert!(second.processed.is_empty());
    assert!(second.failed.is_empty());
}

#[tokio::test]
async fn test_failed_job_stays_pending() {
    let h = TestHarness::new();
    let dept = h.department("Finance").await;
    let group = h.group(dept, "Payroll").await;
    let user = h.user().await;
    let service = h.service();

    let (job, _) = service
        .schedule_job(
            ScheduleJobRequest {
                company_id: h.company,
                scheduled_for: day(3),
                kind: JobKind::Add,
                group_id: group,
                target_group_id: None,
                members: vec![MemberSpec::user(user, MemberRole::Member)],
                actor: None,
            },
            day(1),
        )
        .await
        .unwrap();
    service
        .delete_group(DeleteGroupRequest {
            company_id: h.company,
            group_id: group,
            actor: None,
        })
        .await
        .unwrap();

    for today in [day(3), day(4)] {
        let report = service.run_sweep(today).await.unwrap();
        assert!(report.processed.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, job.id);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Concurrency
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_agree_on_index() {
    let h = TestHarness::new();
    let dept = h.department("Engineering").await;
    let g1 = h.group(dept, "G1").await;
    let g2 = h.group(dept, "G2").await;
    let user = h.user().await;
    let service = Arc::new(h.service());

    let add = |group| {
        let service = service.clone();
        let company_id = h.company;
        tokio::spawn(async move {
            service
                .add_members(AddMembersRequest {
                    company_id,
                    group_id: group,
                    members: vec![MemberSpec::user(user, MemberRole::Member)],
                    actor: None,
                })
                .await
        })
    };
    let (a, b) = tokio::join!(add(g1), add(g2));
    a.unwrap().unwrap();
    b.unwrap().unwrap();
    assert!(h.is_indexed(dept, user).await);

    let remove = |group| {
        let service = service.clone();
        let company_id = h.company;
        tokio::spawn(async move {
            service
                .remove_members(RemoveMembersRequest {
                    company_id,
                    group_id: group,
                    members: vec![MemberRef::User(user)],
                    actor: None,
                })
                .await
        })
    };
    let (a, b) = tokio::join!(remove(g1), remove(g2));
    a.unwrap().unwrap();
    b.unwrap().unwrap();
    assert!(!h.is_indexed(dept, user).await);
}

// ═══════════════════════════════════════════════════════════════════════════
// Outbox
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_drained_outcome_reaches_bus_and_audit_log() {
    let h = TestHarness::new();
    let dept = h.department("Legal").await;
    let group = h.group(dept, "Counsel").await;
    let user = h.user().await;
    let bus = Arc::new(MemoryEventBus::new());
    let audit = Arc::new(MemoryAuditLog::new());
    let drain = OutcomeDrain::new(bus.clone(), audit.clone());
    let mut stream = bus.subscribe(&h.company).await.unwrap();

    let outcome = h
        .service()
        .add_members(AddMembersRequest {
            company_id: h.company,
            group_id: group,
            members: vec![MemberSpec::user(user, MemberRole::Member)],
            actor: None,
        })
        .await
        .unwrap();
    drain.drain(&outcome).await;

    let mut seen = Vec::new();
    for _ in 0..outcome.events.len() {
        seen.push(stream.next().await.unwrap().event_type);
    }
    assert!(seen.contains(&EventType::MemberAdded));
    assert!(seen.contains(&EventType::DepartmentMemberAdded));

    let entries = audit
        .query(AuditLogFilter::new().company_id(h.company))
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::GroupMemberAdd);
}
