//! The EdgeStore trait that backends implement.

use chrono::NaiveDate;

use crate::keys::ItemKey;
use crate::types::*;
use crate::StoreError;

/// Partition query: every item under `partition`, optionally narrowed to a
/// sort-key prefix and a set of status labels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    pub partition: String,
    pub sort_prefix: Option<String>,
    /// Empty means "any status".
    pub status_in: Vec<String>,
}

impl Query {
    pub fn partition(pk: impl Into<String>) -> Self {
        Self {
            partition: pk.into(),
            sort_prefix: None,
            status_in: Vec::new(),
        }
    }

    pub fn sort_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sort_prefix = Some(prefix.into());
        self
    }

    pub fn status_in<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.status_in = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Whether an item found under this query's partition passes its filters.
    pub fn matches(&self, key: &ItemKey, item: &Item) -> bool {
        if key.pk != self.partition {
            return false;
        }
        if let Some(prefix) = &self.sort_prefix {
            if !key.sk.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if self.status_in.is_empty() {
            return true;
        }
        item.status_label()
            .is_some_and(|label| self.status_in.iter().any(|s| s == label))
    }
}

/// Secondary index lookups.
///
/// There is deliberately no "which groups contain group X" index: finding
/// the owners of a subgroup edge requires a company-wide scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexQuery {
    /// Groups of a company in any status, optionally by search-key prefix.
    CompanyGroups {
        company_id: CompanyId,
        search_prefix: Option<String>,
    },
    /// `USER` edges pointing at a user, across every group of the company.
    UserEdges { company_id: CompanyId, user_id: UserId },
    CompanyDepartments { company_id: CompanyId },
    /// Pending deferred jobs scheduled on or before the given day, oldest first.
    PendingJobs { due_on_or_before: NaiveDate },
}

/// The storage trait `roster-core` depends on.
///
/// Reads are eventually consistent with respect to concurrent writers and a
/// batch is atomic only within itself.
#[cfg_attr(feature = "test-support", mockall::automock)]
#[async_trait::async_trait]
pub trait EdgeStore: Send + Sync {
    /// Point read.
    async fn get_item(&self, key: &ItemKey) -> Result<Option<Item>, StoreError>;

    /// All items of one partition matching the query filters, in sort-key order.
    async fn query(&self, query: &Query) -> Result<Vec<Item>, StoreError>;

    /// Secondary index lookup.
    async fn query_index(&self, query: &IndexQuery) -> Result<Vec<Item>, StoreError>;

    /// Apply up to [`crate::BATCH_LIMIT`] puts/deletes as one unit.
    ///
    /// Backends reject oversized batches with [`StoreError::BatchTooLarge`]
    /// and batches that touch one key twice with [`StoreError::DuplicateKey`].
    async fn batch_write(&self, writes: &[WriteRequest]) -> Result<(), StoreError>;
}
