//! Shared setup for roster-core integration tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use roster_config::EngineConfig;
use roster_core::GroupService;
use roster_storage::{
    keys, CompanyId, CompanyMember, Department, DepartmentId, DepartmentMembership, EdgeStore,
    Group, GroupId, GroupStatus, Item, MemberRef, MemberRole, MembershipEdge, RecordStatus,
    UserId,
};
use roster_store_memory::MemoryStore;
use uuid::Uuid;

/// One company on a fresh in-memory store.
pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub company: CompanyId,
    pub config: EngineConfig,
}

#[allow(dead_code)]
impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            company: CompanyId(Uuid::new_v4()),
            config,
        }
    }

    pub fn service(&self) -> GroupService {
        GroupService::new(self.store.clone(), &self.config)
    }

    pub async fn department(&self, name: &str) -> DepartmentId {
        let id = DepartmentId(Uuid::new_v4());
        self.store
            .seed([Item::Department(Department {
                id,
                company_id: self.company,
                name: name.to_string(),
                status: RecordStatus::Active,
                created_at: Utc::now(),
            })])
            .await;
        id
    }

    pub async fn user(&self) -> UserId {
        let user_id = UserId(Uuid::new_v4());
        self.store
            .seed([Item::CompanyMember(CompanyMember {
                company_id: self.company,
                user_id,
                email: Some(format!("{}@example.com", user_id)),
                status: RecordStatus::Active,
                created_at: Utc::now(),
            })])
            .await;
        user_id
    }

    pub async fn users(&self, n: usize) -> Vec<UserId> {
        let mut users = Vec::with_capacity(n);
        for _ in 0..n {
            users.push(self.user().await);
        }
        users
    }

    pub async fn group(&self, department: DepartmentId, name: &str) -> GroupId {
        let id = GroupId(Uuid::new_v4());
        self.store
            .seed([Item::Group(Group {
                id,
                company_id: self.company,
                department_id: department,
                name: name.to_string(),
                search_key: keys::search_key(name),
                status: GroupStatus::Active,
                color: None,
                associated_accounts: BTreeMap::new(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })])
            .await;
        id
    }

    pub async fn add_user(&self, group: GroupId, user: UserId, role: MemberRole) {
        self.store
            .seed([Item::GroupMember(MembershipEdge::new(
                group,
                self.company,
                MemberRef::User(user),
                Some(role),
            ))])
            .await;
    }

    pub async fn nest(&self, parent: GroupId, child: GroupId) {
        self.store
            .seed([Item::GroupMember(MembershipEdge::new(
                parent,
                self.company,
                MemberRef::Group(child),
                None,
            ))])
            .await;
    }

    /// Seed an index record directly, as if an earlier operation wrote it.
    pub async fn index(&self, department: DepartmentId, user: UserId) {
        self.store
            .seed([Item::DepartmentMember(DepartmentMembership::new(
                department,
                self.company,
                user,
            ))])
            .await;
    }

    pub async fn is_indexed(&self, department: DepartmentId, user: UserId) -> bool {
        self.store
            .get_item(&keys::department_member_key(&department, &user))
            .await
            .expect("store read")
            .is_some()
    }

    pub async fn group_status(&self, group: GroupId) -> GroupStatus {
        self.store
            .get_item(&keys::group_key(&group))
            .await
            .expect("store read")
            .and_then(Item::into_group)
            .expect("group exists")
            .status
    }
}
