//! Deferred membership changes.
//!
//! A scheduled job stores the member list of an add, remove or move and is
//! replayed through the live operation once its date arrives. Replays run
//! one at a time. A job that fails stays `PENDING` and is retried by the next
//! sweep; a `DONE` job is never picked up again.
//!
//! A job whose change is already in the store is marked `DONE` without a
//! second replay. This covers a replay that committed but whose `DONE` write
//! failed.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use roster_audit::{AuditAction, AuditEvent, AuditResult};
use roster_storage::{
    CompanyId, CronJob, GroupId, IndexQuery, Item, JobId, JobKind, JobStatus, MemberRef,
    MemberSpec, MemberType, MembershipEdge, OperationId, UserId, WriteRequest,
};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::ResolutionContext;
use crate::department::DepartmentDelta;
use crate::lifecycle::members::{check_add, check_move, check_remove};
use crate::lifecycle::{
    direct_edges_by_member, AddMembersRequest, MoveMembersRequest, RemoveMembersRequest,
};
use crate::outcome::{failure_result, OperationOutcome};
use crate::{CoreError, GroupService};

#[derive(Clone, Debug)]
pub struct ScheduleJobRequest {
    pub company_id: CompanyId,
    pub scheduled_for: NaiveDate,
    pub kind: JobKind,
    pub group_id: GroupId,
    /// Required for `Move`.
    pub target_group_id: Option<GroupId>,
    pub members: Vec<MemberSpec>,
    pub actor: Option<UserId>,
}

#[derive(Debug, Default)]
pub struct SweepReport {
    pub processed: Vec<JobId>,
    pub failed: Vec<(JobId, String)>,
    pub outcomes: Vec<OperationOutcome>,
    /// One `job.process` entry per job looked at.
    pub audit: Vec<AuditEvent>,
}

impl SweepReport {
    fn fail(&mut self, job: &CronJob, operation_id: OperationId, error: &CoreError, reason: String) {
        self.audit.push(process_audit(
            job,
            operation_id,
            failure_result(error),
            Some(reason.clone()),
        ));
        self.failed.push((job.id, reason));
    }
}

pub async fn schedule_job(
    service: &GroupService,
    req: ScheduleJobRequest,
    today: NaiveDate,
) -> Result<(CronJob, OperationOutcome), CoreError> {
    let operation_id = OperationId::new();
    let mut ctx = ResolutionContext::new();
    let company_id = req.company_id;

    if req.scheduled_for < today {
        return Err(CoreError::validation(format!(
            "scheduled date {} is in the past",
            req.scheduled_for
        )));
    }
    let group = match req.kind {
        JobKind::Add => {
            if req.target_group_id.is_some() {
                return Err(CoreError::validation("only move jobs take a target group"));
            }
            check_add(service, &mut ctx, company_id, req.group_id, &req.members).await?
        }
        JobKind::Remove => {
            if req.target_group_id.is_some() {
                return Err(CoreError::validation("only move jobs take a target group"));
            }
            let members: Vec<_> = req.members.iter().map(|m| m.member).collect();
            check_remove(service, &mut ctx, company_id, req.group_id, &members)
                .await?
                .0
        }
        JobKind::Move => {
            let target = req
                .target_group_id
                .ok_or_else(|| CoreError::validation("move jobs need a target group"))?;
            check_move(service, &mut ctx, company_id, req.group_id, target, &req.members)
                .await?
                .0
        }
    };

    let job = CronJob {
        id: JobId(Uuid::new_v4()),
        company_id,
        scheduled_for: req.scheduled_for,
        kind: req.kind,
        group_id: req.group_id,
        target_group_id: req.target_group_id,
        members: req.members,
        status: JobStatus::Pending,
        created_by: req.actor,
        created_at: Utc::now(),
        processed_at: None,
    };
    service
        .commit(
            &mut ctx,
            operation_id,
            vec![WriteRequest::Put(Item::CronJob(job.clone()))],
        )
        .await?;

    info!(
        operation_id = %operation_id,
        job_id = %job.id,
        kind = job.kind.as_str(),
        scheduled_for = %job.scheduled_for,
        "membership change scheduled"
    );
    let audit = AuditEvent::builder(operation_id, &company_id, AuditAction::JobSchedule)
        .actor(job.created_by.as_ref())
        .resource("job", job.id.to_string())
        .department_id(Some(&group.department_id))
        .details(json!({
            "kind": job.kind.as_str(),
            "group_id": job.group_id.0,
            "scheduled_for": job.scheduled_for.to_string(),
            "members": job.members.len(),
        }))
        .build();
    let outcome = OperationOutcome {
        operation_id,
        company_id,
        group: Some(group),
        department_delta: DepartmentDelta::default(),
        events: Vec::new(),
        audit,
    };
    Ok((job, outcome))
}

pub async fn run_sweep(service: &GroupService, today: NaiveDate) -> Result<SweepReport, CoreError> {
    let jobs: Vec<CronJob> = service
        .store()
        .query_index(&IndexQuery::PendingJobs {
            due_on_or_before: today,
        })
        .await?
        .into_iter()
        .filter_map(Item::into_job)
        .filter(|j| j.status == JobStatus::Pending)
        .collect();

    let mut report = SweepReport::default();
    for job in jobs {
        let replayed = match already_applied(service, &job).await {
            Ok(true) => {
                info!(job_id = %job.id, kind = job.kind.as_str(), "job already applied");
                Ok(None)
            }
            Ok(false) => replay(service, &job).await.map(Some),
            Err(e) => Err(e),
        };
        let outcome = match replayed {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(job_id = %job.id, kind = job.kind.as_str(), error = %e, "job failed, left pending");
                report.fail(&job, OperationId::new(), &e, e.to_string());
                continue;
            }
        };

        let operation_id = outcome
            .as_ref()
            .map_or_else(OperationId::new, |o| o.operation_id);
        if let Err(e) = mark_done(service, &job, operation_id).await {
            warn!(
                job_id = %job.id,
                kind = job.kind.as_str(),
                error = %e,
                "job applied but not marked done"
            );
            report.fail(&job, operation_id, &e, format!("applied, not marked done: {e}"));
            report.outcomes.extend(outcome);
            continue;
        }

        info!(job_id = %job.id, kind = job.kind.as_str(), "job processed");
        report
            .audit
            .push(process_audit(&job, operation_id, AuditResult::Success, None));
        report.processed.push(job.id);
        report.outcomes.extend(outcome);
    }

    info!(
        due_on_or_before = %today,
        processed = report.processed.len(),
        failed = report.failed.len(),
        "sweep finished"
    );
    Ok(report)
}

/// Whether the store already reflects the job: added members hold their
/// role, removed members are gone, moved members sit only in the target.
async fn already_applied(service: &GroupService, job: &CronJob) -> Result<bool, CoreError> {
    let mut ctx = ResolutionContext::new();
    let source = direct_edges_by_member(service, &mut ctx, job.group_id).await?;
    let applied = match job.kind {
        JobKind::Add => job.members.iter().all(|m| holds(&source, m)),
        JobKind::Remove => job.members.iter().all(|m| !source.contains_key(&m.member)),
        JobKind::Move => {
            let Some(target_id) = job.target_group_id else {
                return Ok(false);
            };
            let target = direct_edges_by_member(service, &mut ctx, target_id).await?;
            job.members
                .iter()
                .all(|m| !source.contains_key(&m.member) && holds(&target, m))
        }
    };
    Ok(applied)
}

fn holds(edges: &HashMap<MemberRef, MembershipEdge>, spec: &MemberSpec) -> bool {
    edges
        .get(&spec.member)
        .is_some_and(|e| e.member_type != MemberType::User || e.role == spec.role)
}

async fn replay(service: &GroupService, job: &CronJob) -> Result<OperationOutcome, CoreError> {
    match job.kind {
        JobKind::Add => {
            service
                .add_members(AddMembersRequest {
                    company_id: job.company_id,
                    group_id: job.group_id,
                    members: job.members.clone(),
                    actor: job.created_by,
                })
                .await
        }
        JobKind::Remove => {
            service
                .remove_members(RemoveMembersRequest {
                    company_id: job.company_id,
                    group_id: job.group_id,
                    members: job.members.iter().map(|m| m.member).collect(),
                    actor: job.created_by,
                })
                .await
        }
        JobKind::Move => {
            let target = job
                .target_group_id
                .ok_or_else(|| CoreError::validation("move job without a target group"))?;
            service
                .move_members(MoveMembersRequest {
                    company_id: job.company_id,
                    source_group_id: job.group_id,
                    target_group_id: target,
                    members: job.members.clone(),
                    actor: job.created_by,
                })
                .await
        }
    }
}

async fn mark_done(
    service: &GroupService,
    job: &CronJob,
    operation_id: OperationId,
) -> Result<(), CoreError> {
    let done = CronJob {
        status: JobStatus::Done,
        processed_at: Some(Utc::now()),
        ..job.clone()
    };
    service
        .writer()
        .commit(operation_id, vec![WriteRequest::Put(Item::CronJob(done))])
        .await?;
    Ok(())
}

fn process_audit(
    job: &CronJob,
    operation_id: OperationId,
    result: AuditResult,
    reason: Option<String>,
) -> AuditEvent {
    let builder = AuditEvent::builder(operation_id, &job.company_id, AuditAction::JobProcess)
        .actor(job.created_by.as_ref())
        .resource("job", job.id.to_string())
        .result(result)
        .details(json!({
            "kind": job.kind.as_str(),
            "group_id": job.group_id.0,
            "scheduled_for": job.scheduled_for.to_string(),
        }));
    match reason {
        Some(reason) => builder.reason(reason).build(),
        None => builder.build(),
    }
}
