//! Seeding helpers shared by unit tests.

use std::sync::Arc;

use chrono::Utc;
use roster_config::EngineConfig;
use roster_storage::{
    keys, CompanyId, CompanyMember, Department, DepartmentId, Group, GroupId, GroupStatus, Item,
    MemberRef, MemberRole, MembershipEdge, RecordStatus, UserId,
};
use roster_store_memory::MemoryStore;
use uuid::Uuid;

use crate::GroupService;

pub(crate) struct Fixture {
    pub store: Arc<MemoryStore>,
    pub company: CompanyId,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            company: CompanyId(Uuid::new_v4()),
        }
    }

    pub fn service(&self) -> GroupService {
        GroupService::new(self.store.clone(), &EngineConfig::default())
    }

    pub async fn department(&self) -> DepartmentId {
        let department = Department {
            id: DepartmentId(Uuid::new_v4()),
            company_id: self.company,
            name: "Engineering".into(),
            status: RecordStatus::Active,
            created_at: Utc::now(),
        };
        let id = department.id;
        self.store.seed([Item::Department(department)]).await;
        id
    }

    pub async fn user(&self) -> UserId {
        let user_id = UserId(Uuid::new_v4());
        self.store
            .seed([Item::CompanyMember(CompanyMember {
                company_id: self.company,
                user_id,
                email: None,
                status: RecordStatus::Active,
                created_at: Utc::now(),
            })])
            .await;
        user_id
    }

    pub async fn group(&self, department: DepartmentId, name: &str) -> GroupId {
        self.group_with_status(department, name, GroupStatus::Active)
            .await
    }

    pub async fn group_with_status(
        &self,
        department: DepartmentId,
        name: &str,
        status: GroupStatus,
    ) -> GroupId {
        let group = Group {
            id: GroupId(Uuid::new_v4()),
            company_id: self.company,
            department_id: department,
            name: name.to_string(),
            search_key: keys::search_key(name),
            status,
            color: None,
            associated_accounts: Default::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let id = group.id;
        self.store.seed([Item::Group(group)]).await;
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
}
