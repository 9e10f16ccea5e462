//! Deferred membership change records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{CompanyId, GroupId, JobId, MemberSpec, UserId};
use crate::keys::{self, ItemKey};

/// What a deferred job does when it comes due.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    Add,
    Remove,
    /// Move members from `group_id` into `target_group_id`.
    Move,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Add => "ADD",
            JobKind::Remove => "REMOVE",
            JobKind::Move => "MOVE",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Done,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Done => "DONE",
        }
    }
}

/// A membership mutation scheduled for a future date.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CronJob {
    pub id: JobId,
    pub company_id: CompanyId,
    pub scheduled_for: NaiveDate,
    pub kind: JobKind,
    pub group_id: GroupId,
    pub target_group_id: Option<GroupId>,
    pub members: Vec<MemberSpec>,
    pub status: JobStatus,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl CronJob {
    pub fn key(&self) -> ItemKey {
        keys::job_key(self.scheduled_for, &self.id)
    }
}
