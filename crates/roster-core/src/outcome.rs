//! Operation results and delivery of their side effects.
//!
//! Lifecycle operations never publish events or write audit entries
//! themselves. They return them in an [`OperationOutcome`] and the caller
//! drains it once the operation has finished.

use std::sync::Arc;

use roster_audit::{AuditAction, AuditEvent, AuditLog, AuditResult};
use roster_events::{EventBus, EventType, MembershipEvent};
use roster_storage::{CompanyId, Group, MemberRef, OperationId, UserId};
use tracing::warn;

use crate::department::DepartmentDelta;
use crate::CoreError;

#[derive(Clone, Debug)]
pub struct OperationOutcome {
    pub operation_id: OperationId,
    pub company_id: CompanyId,
    /// The group the operation created or changed, as written.
    pub group: Option<Group>,
    pub department_delta: DepartmentDelta,
    pub events: Vec<MembershipEvent>,
    pub audit: AuditEvent,
}

impl OperationOutcome {
    pub fn events_of(&self, event_type: EventType) -> impl Iterator<Item = &MembershipEvent> {
        self.events.iter().filter(move |e| e.event_type == event_type)
    }
}

/// One event per department record added or removed.
pub fn department_events(operation_id: OperationId, delta: &DepartmentDelta) -> Vec<MembershipEvent> {
    let added = delta.to_add.iter().map(|(department, user)| {
        MembershipEvent::department(
            EventType::DepartmentMemberAdded,
            operation_id,
            *department,
            MemberRef::User(*user),
        )
    });
    let removed = delta.to_remove.iter().map(|(department, user)| {
        MembershipEvent::department(
            EventType::DepartmentMemberRemoved,
            operation_id,
            *department,
            MemberRef::User(*user),
        )
    });
    added.chain(removed).collect()
}

pub(crate) fn failure_result(error: &CoreError) -> AuditResult {
    match error {
        CoreError::NotFound { .. } => AuditResult::NotFound,
        CoreError::Validation(_) => AuditResult::InvalidRequest,
        CoreError::PartialWrite { .. } => AuditResult::Partial,
        CoreError::CrossReferenceSweep(_) | CoreError::Store(_) => AuditResult::Error,
    }
}

/// Delivers outcomes to the event bus and the audit log.
#[derive(Clone)]
pub struct OutcomeDrain {
    events: Arc<dyn EventBus>,
    audit: Arc<dyn AuditLog>,
}

impl OutcomeDrain {
    pub fn new(events: Arc<dyn EventBus>, audit: Arc<dyn AuditLog>) -> Self {
        Self { events, audit }
    }

    pub async fn drain(&self, outcome: &OperationOutcome) {
        for event in &outcome.events {
            if let Err(e) = self.events.publish(&outcome.company_id, event.clone()).await {
                warn!(
                    operation_id = %outcome.operation_id,
                    error = %e,
                    "failed to publish membership event"
                );
            }
        }
        self.record(outcome.audit.clone()).await;
    }

    /// Audit a failed operation.
    pub async fn record_failure(
        &self,
        operation_id: OperationId,
        company_id: &CompanyId,
        action: AuditAction,
        actor: Option<&UserId>,
        error: &CoreError,
    ) {
        let event = AuditEvent::builder(operation_id, company_id, action)
            .actor(actor)
            .result(failure_result(error))
            .reason(error.to_string())
            .build();
        self.record(event).await;
    }

    pub async fn record(&self, event: AuditEvent) {
        let operation_id = event.operation_id;
        if let Err(e) = self.audit.record(event).await {
            warn!(operation_id = %operation_id, error = %e, "failed to record audit event");
        }
    }
}
