//! Event bus abstraction for roster membership change notifications.
//!
//! Lifecycle operations emit one [`MembershipEvent`] per visible change after
//! their writes commit. Downstream consumers (directory sync workers, search
//! indexers, notification fan-out) subscribe per company:
//! - Memory (single process, tokio broadcast channels)
//! - anything else that can carry serialized events between replicas

use async_trait::async_trait;
use chrono::Utc;
use futures::Stream;
use roster_storage::{CompanyId, DepartmentId, GroupId, MemberRef, MemberRole, OperationId};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;

/// Type of membership change
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    GroupCreated,
    GroupUpdated,
    GroupDeleted,
    /// The group was absorbed by a merge and retired.
    GroupRetired,
    MemberAdded,
    MemberRemoved,
    /// An existing user edge was rewritten with a different role.
    MemberRoleChanged,
    DepartmentMemberAdded,
    DepartmentMemberRemoved,
}

/// A single observable membership change
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MembershipEvent {
    pub event_type: EventType,
    pub operation_id: OperationId,
    pub group_id: Option<GroupId>,
    pub department_id: Option<DepartmentId>,
    pub member: Option<MemberRef>,
    pub role: Option<MemberRole>,
    /// Unix seconds.
    pub timestamp: i64,
}

impl MembershipEvent {
    pub fn group(event_type: EventType, operation_id: OperationId, group_id: GroupId) -> Self {
        Self {
            event_type,
            operation_id,
            group_id: Some(group_id),
            department_id: None,
            member: None,
            role: None,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn member(
        event_type: EventType,
        operation_id: OperationId,
        group_id: GroupId,
        member: MemberRef,
        role: Option<MemberRole>,
    ) -> Self {
        Self {
            member: Some(member),
            role,
            ..Self::group(event_type, operation_id, group_id)
        }
    }

    pub fn department(
        event_type: EventType,
        operation_id: OperationId,
        department_id: DepartmentId,
        member: MemberRef,
    ) -> Self {
        Self {
            event_type,
            operation_id,
            group_id: None,
            department_id: Some(department_id),
            member: Some(member),
            role: None,
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// Error type for event bus operations
#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("backend error: {0}")]
    Backend(String),
}

/// Stream of membership events
pub type EventStream = Pin<Box<dyn Stream<Item = MembershipEvent> + Send>>;

/// Event bus trait for publishing and subscribing to membership events.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event to all watchers of this company.
    ///
    /// Called after the operation's writes have committed.
    async fn publish(
        &self,
        company_id: &CompanyId,
        event: MembershipEvent,
    ) -> Result<(), EventBusError>;

    /// Subscribe to membership events for a company.
    ///
    /// The stream continues until dropped.
    async fn subscribe(&self, company_id: &CompanyId) -> Result<EventStream, EventBusError>;
}
