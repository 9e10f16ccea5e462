//! Department, derived department membership and company membership records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CompanyId, DepartmentId, UserId};
use crate::keys::{self, ItemKey};

/// Status shared by departments and company members.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Active,
    Inactive,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "ACTIVE",
            RecordStatus::Inactive => "INACTIVE",
        }
    }
}

/// Department record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Department {
    pub id: DepartmentId,
    pub company_id: CompanyId,
    pub name: String,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

impl Department {
    pub fn key(&self) -> ItemKey {
        keys::department_key(&self.id)
    }
}

/// Materialized "user is reachable from department" record.
///
/// Derived data: it must exist exactly when some active group of the
/// department reaches the user, directly or through nested groups.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepartmentMembership {
    pub department_id: DepartmentId,
    pub company_id: CompanyId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl DepartmentMembership {
    pub fn new(department_id: DepartmentId, company_id: CompanyId, user_id: UserId) -> Self {
        Self {
            department_id,
            company_id,
            user_id,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> ItemKey {
        keys::department_member_key(&self.department_id, &self.user_id)
    }
}

/// A user's membership of a company.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompanyMember {
    pub company_id: CompanyId,
    pub user_id: UserId,
    pub email: Option<String>,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

impl CompanyMember {
    pub fn key(&self) -> ItemKey {
        keys::company_member_key(&self.company_id, &self.user_id)
    }
}
