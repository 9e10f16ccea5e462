//! Audit logging abstraction for roster.
//!
//! Defines the `AuditLog` trait for persisting audit events and the types
//! representing auditable group lifecycle actions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roster_storage::{CompanyId, DepartmentId, GroupId, OperationId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for an audit log entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditLogId(pub Uuid);

impl AuditLogId {
    /// Generate a new audit log ID using UUID v7 (time-ordered)
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for AuditLogId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AuditLogId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Categories of auditable actions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    GroupCreate,
    GroupUpdate,
    GroupClone,
    GroupMerge,
    GroupBranch,
    GroupDelete,
    GroupMemberAdd,
    GroupMemberRemove,
    GroupMemberMove,
    JobSchedule,
    JobProcess,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::GroupCreate => "group.create",
            AuditAction::GroupUpdate => "group.update",
            AuditAction::GroupClone => "group.clone",
            AuditAction::GroupMerge => "group.merge",
            AuditAction::GroupBranch => "group.branch",
            AuditAction::GroupDelete => "group.delete",
            AuditAction::GroupMemberAdd => "group.member_add",
            AuditAction::GroupMemberRemove => "group.member_remove",
            AuditAction::GroupMemberMove => "group.member_move",
            AuditAction::JobSchedule => "job.schedule",
            AuditAction::JobProcess => "job.process",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "group.create" => Ok(AuditAction::GroupCreate),
            "group.update" => Ok(AuditAction::GroupUpdate),
            "group.clone" => Ok(AuditAction::GroupClone),
            "group.merge" => Ok(AuditAction::GroupMerge),
            "group.branch" => Ok(AuditAction::GroupBranch),
            "group.delete" => Ok(AuditAction::GroupDelete),
            "group.member_add" => Ok(AuditAction::GroupMemberAdd),
            "group.member_remove" => Ok(AuditAction::GroupMemberRemove),
            "group.member_move" => Ok(AuditAction::GroupMemberMove),
            "job.schedule" => Ok(AuditAction::JobSchedule),
            "job.process" => Ok(AuditAction::JobProcess),
            _ => Err(format!("Unknown audit action: {}", s)),
        }
    }
}

/// Result of an audited operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    /// Some batches committed before a failure.
    Partial,
    NotFound,
    InvalidRequest,
    Error,
}

impl std::fmt::Display for AuditResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditResult::Success => "success",
            AuditResult::Partial => "partial",
            AuditResult::NotFound => "not_found",
            AuditResult::InvalidRequest => "invalid_request",
            AuditResult::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// An audit log entry representing a single auditable operation.
///
/// Uses raw UUIDs for serialization compatibility. Use the builder
/// to construct events from typed IDs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: AuditLogId,
    pub timestamp: DateTime<Utc>,
    /// Lifecycle operation this entry belongs to
    pub operation_id: Uuid,
    /// Acting user; `None` for the sweeper and other system actors
    pub actor_id: Option<Uuid>,
    pub action: AuditAction,
    pub company_id: Uuid,
    /// Type of resource affected (e.g. "group", "job")
    pub resource_type: String,
    pub resource_id: String,
    pub group_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub result: AuditResult,
    pub reason: Option<String>,
    /// Additional details as JSON (member lists, merge sources, counts)
    pub details: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn builder(
        operation_id: OperationId,
        company_id: &CompanyId,
        action: AuditAction,
    ) -> AuditEventBuilder {
        AuditEventBuilder::new(operation_id, company_id, action)
    }

    pub fn get_actor_id(&self) -> Option<UserId> {
        self.actor_id.map(UserId)
    }

    pub fn get_group_id(&self) -> Option<GroupId> {
        self.group_id.map(GroupId)
    }
}

/// Builder for constructing audit events
pub struct AuditEventBuilder {
    operation_id: Uuid,
    company_id: Uuid,
    action: AuditAction,
    actor_id: Option<Uuid>,
    resource_type: String,
    resource_id: String,
    group_id: Option<Uuid>,
    department_id: Option<Uuid>,
    result: AuditResult,
    reason: Option<String>,
    details: Option<serde_json::Value>,
}

impl AuditEventBuilder {
    pub fn new(operation_id: OperationId, company_id: &CompanyId, action: AuditAction) -> Self {
        Self {
            operation_id: operation_id.0,
            company_id: company_id.0,
            action,
            actor_id: None,
            resource_type: String::new(),
            resource_id: String::new(),
            group_id: None,
            department_id: None,
            result: AuditResult::Success,
            reason: None,
            details: None,
        }
    }

    pub fn actor(mut self, actor_id: Option<&UserId>) -> Self {
        self.actor_id = actor_id.map(|u| u.0);
        self
    }

    pub fn resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = resource_type.into();
        self.resource_id = resource_id.into();
        self
    }

    /// Sets both the group context and the resource to this group.
    pub fn group(mut self, group_id: &GroupId) -> Self {
        self.group_id = Some(group_id.0);
        self.resource("group", group_id.to_string())
    }

    pub fn department_id(mut self, department_id: Option<&DepartmentId>) -> Self {
        self.department_id = department_id.map(|d| d.0);
        self
    }

    pub fn result(mut self, result: AuditResult) -> Self {
        self.result = result;
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn build(self) -> AuditEvent {
        AuditEvent {
            id: AuditLogId::new(),
            timestamp: Utc::now(),
            operation_id: self.operation_id,
            actor_id: self.actor_id,
            action: self.action,
            company_id: self.company_id,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            group_id: self.group_id,
            department_id: self.department_id,
            result: self.result,
            reason: self.reason,
            details: self.details,
        }
    }
}

/// Filter for querying audit logs
#[derive(Clone, Debug, Default)]
pub struct AuditLogFilter {
    pub company_id: Option<CompanyId>,
    pub group_id: Option<GroupId>,
    pub actor_id: Option<UserId>,
    pub action: Option<AuditAction>,
    pub result: Option<AuditResult>,
    /// Start timestamp (inclusive)
    pub from: Option<DateTime<Utc>>,
    /// End timestamp (exclusive)
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl AuditLogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn company_id(mut self, company_id: CompanyId) -> Self {
        self.company_id = Some(company_id);
        self
    }

    pub fn group_id(mut self, group_id: GroupId) -> Self {
        self.group_id = Some(group_id);
        self
    }

    pub fn actor_id(mut self, actor_id: UserId) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn result(mut self, result: AuditResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn from(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: DateTime<Utc>) -> Self {
        self.to = Some(to);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Whether an event passes every predicate (ignores limit/offset).
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.company_id.is_none_or(|c| c.0 == event.company_id)
            && self.group_id.is_none_or(|g| Some(g.0) == event.group_id)
            && self.actor_id.is_none_or(|a| Some(a.0) == event.actor_id)
            && self.action.is_none_or(|a| a == event.action)
            && self.result.is_none_or(|r| r == event.result)
            && self.from.is_none_or(|from| event.timestamp >= from)
            && self.to.is_none_or(|to| event.timestamp < to)
    }
}

/// Error type for audit log operations
#[derive(Debug, Error)]
pub enum AuditLogError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("audit log not found: {0}")]
    NotFound(AuditLogId),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

/// Trait for audit log persistence.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Record an audit event.
    ///
    /// Failures should be logged by the caller but never fail the
    /// operation being audited.
    async fn record(&self, event: AuditEvent) -> Result<(), AuditLogError>;

    /// Events matching the filter, newest first.
    async fn query(&self, filter: AuditLogFilter) -> Result<Vec<AuditEvent>, AuditLogError>;

    async fn get(&self, id: AuditLogId) -> Result<AuditEvent, AuditLogError>;

    async fn count(&self, filter: AuditLogFilter) -> Result<u64, AuditLogError>;
}
