use async_trait::async_trait;
use roster_audit::{AuditEvent, AuditLog, AuditLogError, AuditLogFilter, AuditLogId};
use tokio::sync::RwLock;

/// Audit log kept in process memory.
#[derive(Default)]
pub struct MemoryAuditLog {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditLogError> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn query(&self, filter: AuditLogFilter) -> Result<Vec<AuditEvent>, AuditLogError> {
        let events = self.events.read().await;
        let offset = filter.offset.unwrap_or(0) as usize;
        let limit = filter.limit.map_or(usize::MAX, |l| l as usize);
        Ok(events
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get(&self, id: AuditLogId) -> Result<AuditEvent, AuditLogError> {
        self.events
            .read()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or(AuditLogError::NotFound(id))
    }

    async fn count(&self, filter: AuditLogFilter) -> Result<u64, AuditLogError> {
        let events = self.events.read().await;
        Ok(events.iter().filter(|e| filter.matches(e)).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_audit::{AuditAction, AuditResult};
    use roster_storage::{CompanyId, OperationId};
    use uuid::Uuid;

    #[tokio::test]
    async fn query_newest_first_with_paging() {
        let log = MemoryAuditLog::new();
        let company = CompanyId(Uuid::new_v4());
        for action in [
            AuditAction::GroupCreate,
            AuditAction::GroupMemberAdd,
            AuditAction::GroupDelete,
        ] {
            log.record(AuditEvent::builder(OperationId::new(), &company, action).build())
                .await
                .unwrap();
        }

        let page = log
            .query(AuditLogFilter::new().company_id(company).limit(2))
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].action, AuditAction::GroupDelete);
        assert_eq!(page[1].action, AuditAction::GroupMemberAdd);

        let rest = log
            .query(AuditLogFilter::new().offset(2))
            .await
            .unwrap();
        assert_eq!(rest[0].action, AuditAction::GroupCreate);
    }

    #[tokio::test]
    async fn count_and_get() {
        let log = MemoryAuditLog::new();
        let company = CompanyId(Uuid::new_v4());
        let event = AuditEvent::builder(OperationId::new(), &company, AuditAction::GroupMerge)
            .result(AuditResult::Partial)
            .build();
        let id = event.id;
        log.record(event).await.unwrap();

        assert_eq!(
            log.count(AuditLogFilter::new().result(AuditResult::Partial))
                .await
                .unwrap(),
            1
        );
        assert_eq!(log.get(id).await.unwrap().action, AuditAction::GroupMerge);
        assert!(matches!(
            log.get(AuditLogId::new()).await,
            Err(AuditLogError::NotFound(_))
        ));
    }
}
