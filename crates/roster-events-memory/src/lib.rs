//! In-memory event bus implementation using tokio broadcast channels.
//!
//! Suitable for single-process deployments, the sweeper binary and tests.
//! Events never cross process boundaries.

use async_trait::async_trait;
use dashmap::DashMap;
use roster_events::{EventBus, EventBusError, EventStream, MembershipEvent};
use roster_storage::CompanyId;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

const CHANNEL_CAPACITY: usize = 256;

/// In-memory event bus with one broadcast channel per company.
pub struct MemoryEventBus {
    channels: Arc<DashMap<CompanyId, broadcast::Sender<MembershipEvent>>>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
        }
    }

    fn get_or_create_channel(&self, company_id: &CompanyId) -> broadcast::Sender<MembershipEvent> {
        self.channels
            .entry(*company_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(
        &self,
        company_id: &CompanyId,
        event: MembershipEvent,
    ) -> Result<(), EventBusError> {
        let tx = self.get_or_create_channel(company_id);

        // No receivers is fine.
        let _ = tx.send(event);

        Ok(())
    }

    async fn subscribe(&self, company_id: &CompanyId) -> Result<EventStream, EventBusError> {
        let rx = self.get_or_create_channel(company_id).subscribe();

        // Lagged receivers drop the missed events; they must resync from the store.
        let stream = BroadcastStream::new(rx).filter_map(|result| result.ok());

        Ok(Box::pin(stream))
    }
}
