//! Group, membership edge and integration records.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CompanyId, DepartmentId, GroupId, ParseLabelError, UserId};
use crate::keys::{self, ItemKey};

/// Group lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupStatus {
    Active,
    /// Soft-deleted; may be restored.
    Inactive,
    /// Retired after being absorbed by a merge.
    Deleted,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupStatus::Active => "ACTIVE",
            GroupStatus::Inactive => "INACTIVE",
            GroupStatus::Deleted => "DELETED",
        }
    }
}

impl FromStr for GroupStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(GroupStatus::Active),
            "INACTIVE" => Ok(GroupStatus::Inactive),
            "DELETED" => Ok(GroupStatus::Deleted),
            _ => Err(ParseLabelError::new("group status", s)),
        }
    }
}

/// Group record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub company_id: CompanyId,
    pub department_id: DepartmentId,
    pub name: String,
    /// Lowercased name, scanned by prefix to keep names unique per company.
    pub search_key: String,
    pub status: GroupStatus,
    pub color: Option<String>,
    /// Integration slug -> external group reference in that system.
    #[serde(default)]
    pub associated_accounts: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    pub fn key(&self) -> ItemKey {
        keys::group_key(&self.id)
    }

    pub fn is_active(&self) -> bool {
        self.status == GroupStatus::Active
    }
}

/// Kind of member an edge points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberType {
    User,
    /// Nested group (subgroup).
    Group,
    Owner,
}

impl MemberType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberType::User => "USER",
            MemberType::Group => "GROUP",
            MemberType::Owner => "OWNER",
        }
    }
}

impl FromStr for MemberType {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(MemberType::User),
            "GROUP" => Ok(MemberType::Group),
            "OWNER" => Ok(MemberType::Owner),
            _ => Err(ParseLabelError::new("member type", s)),
        }
    }
}

/// Edge status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeStatus {
    Active,
    Pending,
    Default,
    Deleted,
}

impl EdgeStatus {
    /// Statuses that count as membership when resolving a group.
    pub const LIVE: [EdgeStatus; 3] = [EdgeStatus::Active, EdgeStatus::Pending, EdgeStatus::Default];

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeStatus::Active => "ACTIVE",
            EdgeStatus::Pending => "PENDING",
            EdgeStatus::Default => "DEFAULT",
            EdgeStatus::Deleted => "DELETED",
        }
    }

    pub fn is_live(&self) -> bool {
        !matches!(self, EdgeStatus::Deleted)
    }
}

impl FromStr for EdgeStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(EdgeStatus::Active),
            "PENDING" => Ok(EdgeStatus::Pending),
            "DEFAULT" => Ok(EdgeStatus::Default),
            "DELETED" => Ok(EdgeStatus::Deleted),
            _ => Err(ParseLabelError::new("edge status", s)),
        }
    }
}

/// Role of a user inside a group.
///
/// Variants are declared lowest first so the derived `Ord` gives the
/// conflict-resolution precedence `Admin > Member > Viewer`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberRole {
    Viewer,
    Member,
    Admin,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Viewer => "VIEWER",
            MemberRole::Member => "MEMBER",
            MemberRole::Admin => "ADMIN",
        }
    }
}

impl Default for MemberRole {
    fn default() -> Self {
        MemberRole::Member
    }
}

impl FromStr for MemberRole {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VIEWER" => Ok(MemberRole::Viewer),
            "MEMBER" => Ok(MemberRole::Member),
            "ADMIN" => Ok(MemberRole::Admin),
            _ => Err(ParseLabelError::new("member role", s)),
        }
    }
}

/// Typed reference to whatever an edge points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "member_type", content = "member_id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberRef {
    User(UserId),
    Group(GroupId),
    Owner(UserId),
}

impl MemberRef {
    pub fn member_type(&self) -> MemberType {
        match self {
            MemberRef::User(_) => MemberType::User,
            MemberRef::Group(_) => MemberType::Group,
            MemberRef::Owner(_) => MemberType::Owner,
        }
    }

    pub fn raw_id(&self) -> Uuid {
        match self {
            MemberRef::User(id) | MemberRef::Owner(id) => id.0,
            MemberRef::Group(id) => id.0,
        }
    }

    pub fn from_parts(member_type: MemberType, member_id: Uuid) -> Self {
        match member_type {
            MemberType::User => MemberRef::User(UserId(member_id)),
            MemberType::Group => MemberRef::Group(GroupId(member_id)),
            MemberType::Owner => MemberRef::Owner(UserId(member_id)),
        }
    }
}

impl std::fmt::Display for MemberRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.member_type().as_str(), self.raw_id())
    }
}

/// A member as supplied by a caller of a membership mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberSpec {
    pub member: MemberRef,
    /// Only meaningful for user members; defaults to `Member`.
    #[serde(default)]
    pub role: Option<MemberRole>,
}

impl MemberSpec {
    pub fn user(id: UserId, role: MemberRole) -> Self {
        Self {
            member: MemberRef::User(id),
            role: Some(role),
        }
    }

    pub fn group(id: GroupId) -> Self {
        Self {
            member: MemberRef::Group(id),
            role: None,
        }
    }

    pub fn owner(id: UserId) -> Self {
        Self {
            member: MemberRef::Owner(id),
            role: None,
        }
    }
}

/// Directed membership edge (owning group -> member).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MembershipEdge {
    pub group_id: GroupId,
    pub company_id: CompanyId,
    pub member_id: Uuid,
    pub member_type: MemberType,
    pub status: EdgeStatus,
    /// Set for user edges only.
    pub role: Option<MemberRole>,
    pub created_at: DateTime<Utc>,
}

impl MembershipEdge {
    pub fn new(
        group_id: GroupId,
        company_id: CompanyId,
        member: MemberRef,
        role: Option<MemberRole>,
    ) -> Self {
        let role = match member {
            MemberRef::User(_) => Some(role.unwrap_or_default()),
            _ => None,
        };
        Self {
            group_id,
            company_id,
            member_id: member.raw_id(),
            member_type: member.member_type(),
            status: EdgeStatus::Active,
            role,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> ItemKey {
        keys::edge_key(&self.group_id, self.member_type, &self.member_id)
    }

    pub fn member_ref(&self) -> MemberRef {
        MemberRef::from_parts(self.member_type, self.member_id)
    }

    /// Same member and role, re-owned by another group.
    pub fn reowned(&self, group_id: GroupId) -> Self {
        Self {
            group_id,
            created_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Connection between a group and an external integration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupIntegration {
    pub group_id: GroupId,
    pub company_id: CompanyId,
    pub slug: String,
    pub external_ref: String,
    pub connected_at: DateTime<Utc>,
}

impl GroupIntegration {
    pub fn key(&self) -> ItemKey {
        keys::integration_key(&self.group_id, &self.slug)
    }
}
