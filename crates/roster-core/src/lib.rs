//! Nested group membership engine.
//!
//! Groups may contain users, owners and other groups. Membership is resolved
//! transitively, and a per-department index of who belongs to which
//! department is kept in step with every lifecycle operation.

pub mod chunk;
pub mod context;
pub mod crossref;
pub mod department;
mod error;
pub mod jobs;
pub mod lifecycle;
pub mod naming;
pub mod outcome;
pub mod resolver;
mod service;
pub mod sync;

#[cfg(test)]
mod testing;

pub use chunk::{BatchWriter, CommitReport};
pub use context::ResolutionContext;
pub use crossref::{CompanySweep, CrossReferenceFinder, ReverseAdjacency};
pub use department::{DepartmentDelta, DepartmentIndex};
pub use error::CoreError;
pub use jobs::{ScheduleJobRequest, SweepReport};
pub use lifecycle::{
    AddMembersRequest, BranchGroupRequest, CloneGroupRequest, CreateGroupRequest,
    DeleteGroupRequest, MergeGroupsRequest, MoveMembersRequest, RemoveMembersRequest,
    UpdateGroupRequest,
};
pub use outcome::{OperationOutcome, OutcomeDrain};
pub use resolver::{Resolution, ResolvedUser, Resolver};
pub use service::GroupService;
pub use sync::{DirectorySync, MembershipChange, NoopDirectorySync, SyncError};
