//! The stored item envelope and write requests.

use serde::{Deserialize, Serialize};

use super::{
    CompanyId, CompanyMember, CronJob, Department, DepartmentMembership, Group, GroupIntegration,
    MembershipEdge,
};
use crate::keys::ItemKey;

/// Every record kind the table holds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Item {
    Group(Group),
    Department(Department),
    GroupMember(MembershipEdge),
    GroupIntegration(GroupIntegration),
    DepartmentMember(DepartmentMembership),
    CompanyMember(CompanyMember),
    CronJob(CronJob),
}

impl Item {
    pub fn key(&self) -> ItemKey {
        match self {
            Item::Group(g) => g.key(),
            Item::Department(d) => d.key(),
            Item::GroupMember(e) => e.key(),
            Item::GroupIntegration(i) => i.key(),
            Item::DepartmentMember(m) => m.key(),
            Item::CompanyMember(m) => m.key(),
            Item::CronJob(j) => j.key(),
        }
    }

    /// Status label used by status-filtered queries. Records without a
    /// lifecycle report `None` and never match a status filter.
    pub fn status_label(&self) -> Option<&'static str> {
        match self {
            Item::Group(g) => Some(g.status.as_str()),
            Item::Department(d) => Some(d.status.as_str()),
            Item::GroupMember(e) => Some(e.status.as_str()),
            Item::CompanyMember(m) => Some(m.status.as_str()),
            Item::CronJob(j) => Some(j.status.as_str()),
            Item::GroupIntegration(_) | Item::DepartmentMember(_) => None,
        }
    }

    pub fn company_id(&self) -> CompanyId {
        match self {
            Item::Group(g) => g.company_id,
            Item::Department(d) => d.company_id,
            Item::GroupMember(e) => e.company_id,
            Item::GroupIntegration(i) => i.company_id,
            Item::DepartmentMember(m) => m.company_id,
            Item::CompanyMember(m) => m.company_id,
            Item::CronJob(j) => j.company_id,
        }
    }

    pub fn into_group(self) -> Option<Group> {
        match self {
            Item::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn into_department(self) -> Option<Department> {
        match self {
            Item::Department(d) => Some(d),
            _ => None,
        }
    }

    pub fn into_edge(self) -> Option<MembershipEdge> {
        match self {
            Item::GroupMember(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_integration(self) -> Option<GroupIntegration> {
        match self {
            Item::GroupIntegration(i) => Some(i),
            _ => None,
        }
    }

    pub fn into_department_member(self) -> Option<DepartmentMembership> {
        match self {
            Item::DepartmentMember(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_job(self) -> Option<CronJob> {
        match self {
            Item::CronJob(j) => Some(j),
            _ => None,
        }
    }
}

/// A single put or delete inside a batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WriteRequest {
    Put(Item),
    Delete(ItemKey),
}

impl WriteRequest {
    pub fn key(&self) -> ItemKey {
        match self {
            WriteRequest::Put(item) => item.key(),
            WriteRequest::Delete(key) => key.clone(),
        }
    }
}

impl From<Item> for WriteRequest {
    fn from(item: Item) -> Self {
        WriteRequest::Put(item)
    }
}
