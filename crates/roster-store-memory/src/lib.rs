//! In-process backends: an [`EdgeStore`] over a sorted map and an
//! [`AuditLog`] over a vector.
//!
//! Used by tests, local development and the sweeper binary (which persists the
//! table as a JSON snapshot between runs).

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use roster_storage::{
    EdgeStore, IndexQuery, Item, ItemKey, JobStatus, MemberType, Query, StoreError, WriteRequest,
    BATCH_LIMIT,
};
use tokio::sync::RwLock;

mod audit;

pub use audit::MemoryAuditLog;

/// Injected failure: once `after_committed` batches have succeeded, the next
/// `attempts` batch calls fail with a backend error.
#[derive(Clone, Copy, Debug)]
struct FaultPlan {
    after_committed: usize,
    attempts: usize,
}

#[derive(Default)]
struct BatchStats {
    /// Size of every committed batch, in commit order.
    committed: Vec<usize>,
    fault: Option<FaultPlan>,
}

/// In-memory single-table store.
#[derive(Default)]
pub struct MemoryStore {
    items: RwLock<BTreeMap<ItemKey, Item>>,
    stats: Mutex<BatchStats>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert items directly, bypassing batch limits.
    pub async fn seed<I: IntoIterator<Item = Item>>(&self, items: I) {
        let mut map = self.items.write().await;
        for item in items {
            map.insert(item.key(), item);
        }
    }

    /// Every stored item in key order.
    pub async fn items(&self) -> Vec<Item> {
        self.items.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Make batch calls fail after `after_committed` successful batches, for
    /// `attempts` consecutive calls.
    pub fn fail_batches_after(&self, after_committed: usize, attempts: usize) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.fault = Some(FaultPlan {
            after_committed,
            attempts,
        });
    }

    pub fn clear_faults(&self) {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).fault = None;
    }

    /// Sizes of all committed batches so far.
    pub fn committed_batches(&self) -> Vec<usize> {
        self.stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .committed
            .clone()
    }

    /// Load a store from a JSON snapshot written by [`MemoryStore::save_snapshot`].
    /// A missing file yields an empty store.
    pub async fn load_snapshot<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let store = Self::new();
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no snapshot found, starting empty");
                return Ok(store);
            }
            Err(e) => return Err(StoreError::Backend(e.to_string())),
        };
        let items: Vec<Item> =
            serde_json::from_str(&contents).map_err(|e| StoreError::Backend(e.to_string()))?;
        tracing::debug!(path = %path.display(), items = items.len(), "loaded snapshot");
        store.seed(items).await;
        Ok(store)
    }

    pub async fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<(), StoreError> {
        let path = path.as_ref();
        let items = self.items().await;
        let json =
            serde_json::to_string_pretty(&items).map_err(|e| StoreError::Backend(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        std::fs::write(path, json).map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn check_fault(&self) -> Result<(), StoreError> {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        let committed = stats.committed.len();
        if let Some(plan) = stats.fault.as_mut() {
            if committed >= plan.after_committed && plan.attempts > 0 {
                plan.attempts -= 1;
                return Err(StoreError::Backend("injected batch failure".into()));
            }
        }
        Ok(())
    }

    fn record_commit(&self, size: usize) {
        self.stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .committed
            .push(size);
    }
}

#[async_trait::async_trait]
impl EdgeStore for MemoryStore {
    async fn get_item(&self, key: &ItemKey) -> Result<Option<Item>, StoreError> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Item>, StoreError> {
        let items = self.items.read().await;
        let start = ItemKey::new(query.partition.clone(), String::new());
        Ok(items
            .range(start..)
            .take_while(|(k, _)| k.pk == query.partition)
            .filter(|(k, v)| query.matches(k, v))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn query_index(&self, query: &IndexQuery) -> Result<Vec<Item>, StoreError> {
        let items = self.items.read().await;
        let found: Vec<Item> = match query {
            IndexQuery::CompanyGroups {
                company_id,
                search_prefix,
            } => {
                let mut groups: Vec<Item> = items
                    .values()
                    .filter(|item| match item {
                        Item::Group(g) => {
                            g.company_id == *company_id
                                && search_prefix
                                    .as_deref()
                                    .is_none_or(|p| g.search_key.starts_with(p))
                        }
                        _ => false,
                    })
                    .cloned()
                    .collect();
                groups.sort_by(|a, b| match (a, b) {
                    (Item::Group(a), Item::Group(b)) => a.search_key.cmp(&b.search_key),
                    _ => std::cmp::Ordering::Equal,
                });
                groups
            }
            IndexQuery::UserEdges {
                company_id,
                user_id,
            } => items
                .values()
                .filter(|item| match item {
                    Item::GroupMember(e) => {
                        e.company_id == *company_id
                            && e.member_type == MemberType::User
                            && e.member_id == user_id.0
                    }
                    _ => false,
                })
                .cloned()
                .collect(),
            IndexQuery::CompanyDepartments { company_id } => items
                .values()
                .filter(|item| matches!(item, Item::Department(d) if d.company_id == *company_id))
                .cloned()
                .collect(),
            // Job partitions embed the date, so key order is date order.
            IndexQuery::PendingJobs { due_on_or_before } => items
                .values()
                .filter(|item| match item {
                    Item::CronJob(j) => {
                        j.status == JobStatus::Pending && j.scheduled_for <= *due_on_or_before
                    }
                    _ => false,
                })
                .cloned()
                .collect(),
        };
        Ok(found)
    }

    async fn batch_write(&self, writes: &[WriteRequest]) -> Result<(), StoreError> {
        if writes.len() > BATCH_LIMIT {
            return Err(StoreError::BatchTooLarge {
                size: writes.len(),
                limit: BATCH_LIMIT,
            });
        }
        let mut seen = HashSet::with_capacity(writes.len());
        for write in writes {
            let key = write.key();
            if !seen.insert(key.clone()) {
                return Err(StoreError::DuplicateKey(key));
            }
        }
        self.check_fault()?;

        let mut items = self.items.write().await;
        for write in writes {
            match write {
                WriteRequest::Put(item) => {
                    items.insert(item.key(), item.clone());
                }
                WriteRequest::Delete(key) => {
                    items.remove(key);
                }
            }
        }
        drop(items);

        self.record_commit(writes.len());
        Ok(())
    }
}
