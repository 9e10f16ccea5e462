use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use roster_config::EngineConfig;
use roster_storage::{
    keys, CompanyId, CronJob, Department, DepartmentId, EdgeStore, Group, GroupId, IndexQuery,
    Item, OperationId, Query, UserId, WriteRequest,
};

use crate::chunk::{BatchWriter, CommitReport};
use crate::context::ResolutionContext;
use crate::crossref::{CompanySweep, CrossReferenceFinder};
use crate::department::DepartmentIndex;
use crate::jobs::{self, ScheduleJobRequest, SweepReport};
use crate::lifecycle::{
    self, AddMembersRequest, BranchGroupRequest, CloneGroupRequest, CreateGroupRequest,
    DeleteGroupRequest, MergeGroupsRequest, MoveMembersRequest, RemoveMembersRequest,
    UpdateGroupRequest,
};
use crate::outcome::OperationOutcome;
use crate::resolver::{Resolution, Resolver};
use crate::sync::{DirectorySync, NoopDirectorySync};
use crate::CoreError;

/// Entry point for every membership read and lifecycle operation.
pub struct GroupService {
    store: Arc<dyn EdgeStore>,
    resolver: Resolver,
    index: DepartmentIndex,
    writer: BatchWriter,
    sync: Arc<dyn DirectorySync>,
    concurrency: usize,
}

impl GroupService {
    pub fn new(store: Arc<dyn EdgeStore>, config: &EngineConfig) -> Self {
        let concurrency = config.resolve_concurrency;
        let crossref: Arc<dyn CrossReferenceFinder> =
            Arc::new(CompanySweep::new(store.clone(), concurrency));
        Self {
            resolver: Resolver::new(store.clone(), crossref, concurrency),
            index: DepartmentIndex::new(),
            writer: BatchWriter::new(store.clone(), config),
            sync: Arc::new(NoopDirectorySync),
            store,
            concurrency,
        }
    }

    /// Replace the company-wide scan used for reverse lookups.
    pub fn with_cross_reference_finder(mut self, crossref: Arc<dyn CrossReferenceFinder>) -> Self {
        self.resolver = Resolver::new(self.store.clone(), crossref, self.concurrency);
        self
    }

    pub fn with_directory_sync(mut self, sync: Arc<dyn DirectorySync>) -> Self {
        self.sync = sync;
        self
    }

    pub fn store(&self) -> &Arc<dyn EdgeStore> {
        &self.store
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn writer(&self) -> &BatchWriter {
        &self.writer
    }

    pub fn index(&self) -> &DepartmentIndex {
        &self.index
    }

    pub(crate) fn directory_sync(&self) -> &dyn DirectorySync {
        self.sync.as_ref()
    }

    /// Commit writes and drop everything the context has cached.
    pub(crate) async fn commit(
        &self,
        ctx: &mut ResolutionContext,
        operation_id: OperationId,
        writes: Vec<WriteRequest>,
    ) -> Result<CommitReport, CoreError> {
        let report = self.writer.commit(operation_id, writes).await;
        ctx.invalidate();
        report
    }

    pub async fn get_group(
        &self,
        company_id: CompanyId,
        group_id: GroupId,
    ) -> Result<Group, CoreError> {
        let mut ctx = ResolutionContext::new();
        lifecycle::require_group(self, &mut ctx, company_id, group_id).await
    }

    pub async fn resolve_members(
        &self,
        company_id: CompanyId,
        group_id: GroupId,
    ) -> Result<Resolution, CoreError> {
        let mut ctx = ResolutionContext::new();
        lifecycle::require_group(self, &mut ctx, company_id, group_id).await?;
        Ok(self.resolver.resolve_members(&mut ctx, group_id).await?)
    }

    pub async fn groups_containing_user(
        &self,
        company_id: CompanyId,
        user_id: UserId,
    ) -> Result<BTreeSet<GroupId>, CoreError> {
        let mut ctx = ResolutionContext::new();
        self.resolver
            .groups_containing_user(&mut ctx, company_id, user_id, None)
            .await
    }

    /// Departments of a company in any status.
    pub async fn departments(&self, company_id: CompanyId) -> Result<Vec<Department>, CoreError> {
        Ok(self
            .store
            .query_index(&IndexQuery::CompanyDepartments { company_id })
            .await?
            .into_iter()
            .filter_map(Item::into_department)
            .collect())
    }

    /// Users the department index currently lists under a department.
    pub async fn department_members(
        &self,
        company_id: CompanyId,
        department_id: DepartmentId,
    ) -> Result<BTreeSet<UserId>, CoreError> {
        let department = self
            .store
            .get_item(&keys::department_key(&department_id))
            .await?
            .and_then(Item::into_department)
            .filter(|d| d.company_id == company_id)
            .ok_or_else(|| CoreError::not_found("department", department_id))?;
        let records = self
            .store
            .query(
                &Query::partition(keys::department_pk(&department.id))
                    .sort_prefix(keys::PREFIX_USER),
            )
            .await?;
        Ok(records
            .into_iter()
            .filter_map(Item::into_department_member)
            .map(|m| m.user_id)
            .collect())
    }

    pub async fn create_group(&self, req: CreateGroupRequest) -> Result<OperationOutcome, CoreError> {
        lifecycle::create::create_group(self, req).await
    }

    pub async fn update_group(&self, req: UpdateGroupRequest) -> Result<OperationOutcome, CoreError> {
        lifecycle::update::update_group(self, req).await
    }

    pub async fn add_members(&self, req: AddMembersRequest) -> Result<OperationOutcome, CoreError> {
        lifecycle::members::add_members(self, req).await
    }

    pub async fn remove_members(
        &self,
        req: RemoveMembersRequest,
    ) -> Result<OperationOutcome, CoreError> {
        lifecycle::members::remove_members(self, req).await
    }

    pub async fn move_members(&self, req: MoveMembersRequest) -> Result<OperationOutcome, CoreError> {
        lifecycle::members::move_members(self, req).await
    }

    pub async fn clone_group(&self, req: CloneGroupRequest) -> Result<OperationOutcome, CoreError> {
        lifecycle::clone::clone_group(self, req).await
    }

    pub async fn merge_groups(&self, req: MergeGroupsRequest) -> Result<OperationOutcome, CoreError> {
        lifecycle::merge::merge_groups(self, req).await
    }

    pub async fn branch_group(&self, req: BranchGroupRequest) -> Result<OperationOutcome, CoreError> {
        lifecycle::branch::branch_group(self, req).await
    }

    pub async fn delete_group(&self, req: DeleteGroupRequest) -> Result<OperationOutcome, CoreError> {
        lifecycle::delete::delete_group(self, req).await
    }

    /// Store a deferred membership change to be replayed on `req.scheduled_for`.
    pub async fn schedule_job(
        &self,
        req: ScheduleJobRequest,
        today: NaiveDate,
    ) -> Result<(CronJob, OperationOutcome), CoreError> {
        jobs::schedule_job(self, req, today).await
    }

    /// Replay every pending job due on or before `today`.
    pub async fn run_sweep(&self, today: NaiveDate) -> Result<SweepReport, CoreError> {
        jobs::run_sweep(self, today).await
    }
}
