//! Favorited-conversation sync to the knowledge base

use std::sync::Arc;

use async_trait::async_trait;

use super::{run_claimed, HandlerError};
use crate::bus::{Event, EventHandler};
use crate::outbound::KnowledgeBase;
use crate::store::{SyncRecordKind, SyncRecordStore};

pub struct FavoritesSyncHandler {
    store: Arc<dyn SyncRecordStore>,
    knowledge_base: Arc<dyn KnowledgeBase>,
}

impl FavoritesSyncHandler {
    pub fn new(store: Arc<dyn SyncRecordStore>, knowledge_base: Arc<dyn KnowledgeBase>) -> Self {
        Self {
            store,
            knowledge_base,
        }
    }
}

#[async_trait]
impl EventHandler for FavoritesSyncHandler {
    fn name(&self) -> &'static str {
        "favorites-sync"
    }

    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let Event::FavoritesSync {
            record_id,
            ticket_id,
        } = event
        else {
            return Err(HandlerError::PayloadInvalid(format!(
                "unexpected event {}",
                event.kind()
            )));
        };

        run_claimed(
            self.store.as_ref(),
            SyncRecordKind::FavoriteConversation,
            *record_id,
            || async move {
                let snapshot = self
                    .store
                    .conversation_snapshot(*ticket_id)
                    .await?
                    .ok_or_else(|| {
                        HandlerError::PayloadInvalid(format!("ticket {} no longer exists", ticket_id))
                    })?;

                self.knowledge_base.ingest(&snapshot).await?;

                tracing::info!(
                    ticket_id = %ticket_id,
                    record_id = %record_id,
                    messages = snapshot.messages.len(),
                    "Favorited conversation synced"
                );
                Ok(())
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::handlers::fakes::{FakeKnowledgeBase, MemorySyncStore};
    use helpdesk_shared::SyncStatus;
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    fn setup() -> (Arc<MemorySyncStore>, Arc<FakeKnowledgeBase>, FavoritesSyncHandler) {
        let store = Arc::new(MemorySyncStore::default());
        let kb = Arc::new(FakeKnowledgeBase::default());
        let handler = FavoritesSyncHandler::new(store.clone(), kb.clone());
        (store, kb, handler)
    }

    #[tokio::test]
    async fn test_sync_ingests_snapshot() {
        let (store, kb, handler) = setup();
        let ticket_id = store.insert_ticket("Refund", "Double charged");
        let record_id = store.insert_pending(SyncRecordKind::FavoriteConversation);

        handler
            .handle(&Event::FavoritesSync {
                record_id,
                ticket_id,
            })
            .await
            .unwrap();

        assert_eq!(store.record(record_id).status, SyncStatus::Synced);
        let ingested = kb.ingested.lock().unwrap();
        assert_eq!(ingested.len(), 1);
        assert_eq!(ingested[0].ticket_id, ticket_id);
        assert_eq!(ingested[0].title, "Refund");
    }

    #[tokio::test]
    async fn test_ingest_failure_marks_failed() {
        let (store, kb, handler) = setup();
        kb.fail.store(true, Ordering::SeqCst);
        let ticket_id = store.insert_ticket("Refund", "Double charged");
        let record_id = store.insert_pending(SyncRecordKind::FavoriteConversation);

        let result = handler
            .handle(&Event::FavoritesSync {
                record_id,
                ticket_id,
            })
            .await;
        assert!(matches!(result, Err(HandlerError::PayloadInvalid(_))));

        let record = store.record(record_id);
        assert_eq!(record.status, SyncStatus::Failed);
        assert!(record.last_error.unwrap().contains("schema mismatch"));
    }

    #[tokio::test]
    async fn test_missing_ticket_marks_failed() {
        let (store, kb, handler) = setup();
        let record_id = store.insert_pending(SyncRecordKind::FavoriteConversation);

        let result = handler
            .handle(&Event::FavoritesSync {
                record_id,
                ticket_id: Uuid::new_v4(),
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.record(record_id).status, SyncStatus::Failed);
        assert!(kb.ingested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_already_processed_record_skipped() {
        let (store, kb, handler) = setup();
        let ticket_id = store.insert_ticket("Refund", "Double charged");
        let record_id = store.insert_pending(SyncRecordKind::FavoriteConversation);
        let event = Event::FavoritesSync {
            record_id,
            ticket_id,
        };

        handler.handle(&event).await.unwrap();
        handler.handle(&event).await.unwrap();
        assert_eq!(kb.ingested.lock().unwrap().len(), 1);
    }
}
