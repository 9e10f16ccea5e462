//! Splitting large mutations into store-sized batches and committing them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use roster_config::EngineConfig;
use roster_storage::{EdgeStore, ItemKey, OperationId, StoreError, WriteRequest, BATCH_LIMIT};
use tracing::{debug, warn};

use crate::CoreError;

/// Collapse writes that touch the same key. The last write for a key wins and
/// takes the position of the first one, so a delete followed by a put of the
/// same edge becomes a single put.
pub fn dedup_writes(writes: Vec<WriteRequest>) -> Vec<WriteRequest> {
    let mut positions: HashMap<ItemKey, usize> = HashMap::with_capacity(writes.len());
    let mut out: Vec<WriteRequest> = Vec::with_capacity(writes.len());
    for write in writes {
        let key = write.key();
        match positions.get(&key) {
            Some(&idx) => out[idx] = write,
            None => {
                positions.insert(key, out.len());
                out.push(write);
            }
        }
    }
    out
}

/// Deduplicate, then split into ordered windows of at most `batch_size`
/// (clamped to the store limit).
pub fn chunk(writes: Vec<WriteRequest>, batch_size: usize) -> Vec<Vec<WriteRequest>> {
    let size = batch_size.clamp(1, BATCH_LIMIT);
    let writes = dedup_writes(writes);
    let mut batches = Vec::with_capacity(writes.len().div_ceil(size));
    let mut iter = writes.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(size).collect());
    }
    batches
}

/// What a successful commit wrote.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub batches: usize,
    pub writes: usize,
}

/// Commits chunked writes sequentially with per-batch retries.
#[derive(Clone)]
pub struct BatchWriter {
    store: Arc<dyn EdgeStore>,
    batch_size: usize,
    max_retries: u32,
    backoff: Duration,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn EdgeStore>, config: &EngineConfig) -> Self {
        Self {
            store,
            batch_size: config.effective_batch_size(),
            max_retries: config.batch_max_retries,
            backoff: Duration::from_millis(config.batch_retry_backoff_ms),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn commit(
        &self,
        operation_id: OperationId,
        writes: Vec<WriteRequest>,
    ) -> Result<CommitReport, CoreError> {
        let batches = chunk(writes, self.batch_size);
        let total = batches.len();
        let mut report = CommitReport::default();

        for (index, batch) in batches.iter().enumerate() {
            self.write_with_retry(batch)
                .await
                .map_err(|source| CoreError::PartialWrite {
                    operation_id,
                    committed_batches: index,
                    total_batches: total,
                    source,
                })?;
            report.batches += 1;
            report.writes += batch.len();
        }

        debug!(
            operation_id = %operation_id,
            batches = report.batches,
            writes = report.writes,
            "committed writes"
        );
        Ok(report)
    }

    async fn write_with_retry(&self, batch: &[WriteRequest]) -> Result<(), StoreError> {
        let mut attempt = 0u32;
        loop {
            match self.store.batch_write(batch).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    attempt += 1;
                    warn!(attempt, error = %e, "batch write failed, retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_retryable(err: &StoreError) -> bool {
    matches!(err, StoreError::Backend(_) | StoreError::Conflict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_storage::{keys, CompanyId, GroupId, Item, MemberRef, MembershipEdge, UserId};
    use roster_store_memory::MemoryStore;
    use uuid::Uuid;

    fn user_put(group: GroupId) -> WriteRequest {
        Item::GroupMember(MembershipEdge::new(
            group,
            CompanyId(Uuid::nil()),
            MemberRef::User(UserId(Uuid::new_v4())),
            None,
        ))
        .into()
    }

    fn config(batch_size: usize, retries: u32) -> EngineConfig {
        EngineConfig {
            batch_size,
            batch_max_retries: retries,
            batch_retry_backoff_ms: 1,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn chunk_boundaries() {
        let group = GroupId(Uuid::new_v4());
        let writes: Vec<WriteRequest> = (0..53).map(|_| user_put(group)).collect();
        let batches = chunk(writes.clone(), 25);

        assert_eq!(batches.len(), 3);
        assert!(batches.iter().all(|b| b.len() <= 25));
        assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 53);
        let flattened: Vec<WriteRequest> = batches.into_iter().flatten().collect();
        assert_eq!(flattened, writes);
    }

    #[test]
    fn chunk_clamps_to_store_limit() {
        let group = GroupId(Uuid::new_v4());
        let writes: Vec<WriteRequest> = (0..30).map(|_| user_put(group)).collect();
        assert_eq!(chunk(writes, 100).len(), 2);
        assert!(chunk(Vec::new(), 25).is_empty());
    }

    #[test]
    fn dedup_keeps_last_write_at_first_position() {
        let group = GroupId(Uuid::new_v4());
        let put = user_put(group);
        let key = put.key();
        let other = user_put(group);

        let writes = vec![
            WriteRequest::Delete(key.clone()),
            other.clone(),
            put.clone(),
        ];
        let out = dedup_writes(writes);
        assert_eq!(out, vec![put, other]);
        assert_eq!(out[0].key(), key);
    }

    #[test]
    fn dedup_prevents_duplicate_keys_in_one_batch() {
        let key = keys::department_member_key(
            &roster_storage::DepartmentId(Uuid::new_v4()),
            &UserId(Uuid::new_v4()),
        );
        let batches = chunk(
            vec![
                WriteRequest::Delete(key.clone()),
                WriteRequest::Delete(key.clone()),
            ],
            25,
        );
        assert_eq!(batches, vec![vec![WriteRequest::Delete(key)]]);
    }

    #[tokio::test]
    async fn commit_retries_transient_failures() {
        let store = Arc::new(MemoryStore::new());
        store.fail_batches_after(0, 2);
        let writer = BatchWriter::new(store.clone(), &config(25, 2));
        let group = GroupId(Uuid::new_v4());

        let report = writer
            .commit(OperationId::new(), vec![user_put(group), user_put(group)])
            .await
            .unwrap();
        assert_eq!(report, CommitReport { batches: 1, writes: 2 });
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn commit_reports_partial_write() {
        let store = Arc::new(MemoryStore::new());
        store.fail_batches_after(2, usize::MAX);
        let writer = BatchWriter::new(store.clone(), &config(10, 1));
        let group = GroupId(Uuid::new_v4());
        let writes: Vec<WriteRequest> = (0..45).map(|_| user_put(group)).collect();

        let err = writer
            .commit(OperationId::new(), writes)
            .await
            .unwrap_err();
        match err {
            CoreError::PartialWrite {
                committed_batches,
                total_batches,
                ..
            } => {
                assert_eq!(committed_batches, 2);
                assert_eq!(total_batches, 5);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Earlier batches stay committed.
        assert_eq!(store.len().await, 20);
    }
}
