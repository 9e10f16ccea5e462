//! Single-table key layout.
//!
//! Every record lives under a partition key (`pk`) and a sort key (`sk`):
//!
//! | record               | pk                         | sk                                  |
//! |----------------------|----------------------------|-------------------------------------|
//! | group                | `GROUP#<id>`               | `META`                              |
//! | membership edge      | `GROUP#<owner>`            | `USER#<id>` `GROUP#<id>` `OWNER#<id>` |
//! | group integration    | `GROUP#<id>`               | `INTEGRATION#<slug>`                |
//! | department           | `DEPARTMENT#<id>`          | `META`                              |
//! | department member    | `DEPARTMENT#<id>`          | `USER#<id>`                         |
//! | company member       | `COMPANY#<id>`             | `USER#<id>`                         |
//! | deferred job         | `JOB#<yyyy-mm-dd>#<id>`    | `JOB#GROUP_MEMBERS`                 |

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{CompanyId, DepartmentId, GroupId, JobId, MemberType, UserId};

pub const PREFIX_USER: &str = "USER#";
pub const PREFIX_GROUP: &str = "GROUP#";
pub const PREFIX_OWNER: &str = "OWNER#";
pub const PREFIX_DEPARTMENT: &str = "DEPARTMENT#";
pub const PREFIX_COMPANY: &str = "COMPANY#";
pub const PREFIX_INTEGRATION: &str = "INTEGRATION#";
pub const PREFIX_JOB: &str = "JOB#";

pub const META_SORT_KEY: &str = "META";
pub const JOB_SORT_KEY: &str = "JOB#GROUP_MEMBERS";

/// Composite primary key of a stored item.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub pk: String,
    pub sk: String,
}

impl ItemKey {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.pk, self.sk)
    }
}

pub fn group_pk(id: &GroupId) -> String {
    format!("{PREFIX_GROUP}{}", id.0)
}

pub fn department_pk(id: &DepartmentId) -> String {
    format!("{PREFIX_DEPARTMENT}{}", id.0)
}

pub fn company_pk(id: &CompanyId) -> String {
    format!("{PREFIX_COMPANY}{}", id.0)
}

pub fn user_sk(id: &UserId) -> String {
    format!("{PREFIX_USER}{}", id.0)
}

pub fn integration_sk(slug: &str) -> String {
    format!("{PREFIX_INTEGRATION}{slug}")
}

/// Sort-key prefix used for edges of the given member type.
pub fn member_prefix(member_type: MemberType) -> &'static str {
    match member_type {
        MemberType::User => PREFIX_USER,
        MemberType::Group => PREFIX_GROUP,
        MemberType::Owner => PREFIX_OWNER,
    }
}

pub fn member_sk(member_type: MemberType, member_id: &Uuid) -> String {
    format!("{}{}", member_prefix(member_type), member_id)
}

pub fn job_pk(date: NaiveDate, id: &JobId) -> String {
    format!("{PREFIX_JOB}{}#{}", date.format("%Y-%m-%d"), id.0)
}

pub fn group_key(id: &GroupId) -> ItemKey {
    ItemKey::new(group_pk(id), META_SORT_KEY)
}

pub fn department_key(id: &DepartmentId) -> ItemKey {
    ItemKey::new(department_pk(id), META_SORT_KEY)
}

pub fn edge_key(group_id: &GroupId, member_type: MemberType, member_id: &Uuid) -> ItemKey {
    ItemKey::new(group_pk(group_id), member_sk(member_type, member_id))
}

pub fn department_member_key(department_id: &DepartmentId, user_id: &UserId) -> ItemKey {
    ItemKey::new(department_pk(department_id), user_sk(user_id))
}

pub fn company_member_key(company_id: &CompanyId, user_id: &UserId) -> ItemKey {
    ItemKey::new(company_pk(company_id), user_sk(user_id))
}

pub fn integration_key(group_id: &GroupId, slug: &str) -> ItemKey {
    ItemKey::new(group_pk(group_id), integration_sk(slug))
}

pub fn job_key(date: NaiveDate, id: &JobId) -> ItemKey {
    ItemKey::new(job_pk(date, id), JOB_SORT_KEY)
}

/// Lowercased, trimmed form of a display name used for uniqueness scans.
pub fn search_key(name: &str) -> String {
    name.trim().to_lowercase()
}
