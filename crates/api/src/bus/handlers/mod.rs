//! Reactive handlers
//!
//! Handlers that own a sync record follow the same state machine:
//! `pending -> processing` on pickup, then `synced` or `failed`. Pickup is a
//! compare-and-set, so a duplicate delivery finds the record already claimed
//! and does nothing.

mod error;
mod favorites;
mod handoff;
mod hot_issue;

#[cfg(test)]
pub(crate) mod fakes;

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use uuid::Uuid;

use super::{EventBusBuilder, EventKind};
use crate::outbound::{IssueAnalyzer, KnowledgeBase, SenderRegistry};
use crate::store::{SyncRecordKind, SyncRecordStore};

pub use error::HandlerError;
pub use favorites::FavoritesSyncHandler;
pub use handoff::HandoffNotificationHandler;
pub use hot_issue::HotIssueHandler;

/// Register every reactive handler on the builder
pub fn subscribe_all(
    builder: EventBusBuilder,
    store: Arc<dyn SyncRecordStore>,
    senders: SenderRegistry,
    knowledge_base: Arc<dyn KnowledgeBase>,
    analyzer: Arc<dyn IssueAnalyzer>,
) -> EventBusBuilder {
    builder
        .subscribe(
            EventKind::HandoffNotificationSent,
            Arc::new(HandoffNotificationHandler::new(Arc::clone(&store), senders)),
        )
        .subscribe(
            EventKind::FavoritesSync,
            Arc::new(FavoritesSyncHandler::new(Arc::clone(&store), knowledge_base)),
        )
        .subscribe(
            EventKind::HotIssueAnalysis,
            Arc::new(HotIssueHandler::new(store, analyzer)),
        )
}

/// Claim a sync record, run `work`, and record the outcome
///
/// Returns Ok without running `work` when the record was not `pending`. A
/// panic inside `work` still moves the record to `failed`.
async fn run_claimed<F, Fut>(
    store: &dyn SyncRecordStore,
    kind: SyncRecordKind,
    record_id: Uuid,
    work: F,
) -> Result<(), HandlerError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), HandlerError>>,
{
    if !store.claim(kind, record_id).await? {
        tracing::info!(
            record = kind.as_str(),
            record_id = %record_id,
            "Sync record already claimed, skipping duplicate delivery"
        );
        return Ok(());
    }

    let outcome = match AssertUnwindSafe(work()).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
    };

    match outcome {
        Ok(()) => {
            if !store.mark_synced(kind, record_id).await? {
                tracing::warn!(
                    record = kind.as_str(),
                    record_id = %record_id,
                    "Sync record left processing before completion"
                );
            }
            Ok(())
        }
        Err(e) => {
            store.mark_failed(kind, record_id, &e.to_string()).await?;
            Err(e)
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
