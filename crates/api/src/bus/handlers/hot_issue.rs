//! Hot-issue analytics

use std::sync::Arc;

use async_trait::async_trait;

use super::HandlerError;
use crate::bus::{Event, EventHandler};
use crate::outbound::IssueAnalyzer;
use crate::store::SyncRecordStore;

/// Runs hot-issue analysis and stamps the ticket as audited
///
/// The audit timestamp is written whether or not analysis succeeds, so a
/// ticket is never analyzed twice because of a flaky analyzer.
pub struct HotIssueHandler {
    store: Arc<dyn SyncRecordStore>,
    analyzer: Arc<dyn IssueAnalyzer>,
}

impl HotIssueHandler {
    pub fn new(store: Arc<dyn SyncRecordStore>, analyzer: Arc<dyn IssueAnalyzer>) -> Self {
        Self { store, analyzer }
    }
}

#[async_trait]
impl EventHandler for HotIssueHandler {
    fn name(&self) -> &'static str {
        "hot-issue-analysis"
    }

    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let Event::HotIssueAnalysis { ticket_id } = event else {
            return Err(HandlerError::PayloadInvalid(format!(
                "unexpected event {}",
                event.kind()
            )));
        };

        let summary = self
            .store
            .ticket_summary(*ticket_id)
            .await?
            .ok_or_else(|| HandlerError::PayloadInvalid(format!("ticket {} not found", ticket_id)))?;

        let analysis = match self
            .analyzer
            .analyze(&summary.title, &summary.description)
            .await
        {
            Ok(analysis) => {
                tracing::info!(
                    ticket_id = %ticket_id,
                    is_hot = analysis.is_hot,
                    category = analysis.category.as_deref().unwrap_or("-"),
                    "Hot-issue analysis complete"
                );
                Some(analysis)
            }
            Err(e) => {
                tracing::warn!(ticket_id = %ticket_id, error = %e, "Hot-issue analysis failed");
                None
            }
        };

        self.store
            .mark_hot_issue_audited(*ticket_id, analysis.as_ref())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::handlers::fakes::{FakeAnalyzer, MemorySyncStore};
    use crate::store::IssueAnalysis;
    use std::sync::Mutex;
    use uuid::Uuid;

    fn setup(result: Option<IssueAnalysis>) -> (Arc<MemorySyncStore>, HotIssueHandler) {
        let store = Arc::new(MemorySyncStore::default());
        let analyzer = Arc::new(FakeAnalyzer {
            result: Mutex::new(result),
        });
        let handler = HotIssueHandler::new(store.clone(), analyzer);
        (store, handler)
    }

    #[tokio::test]
    async fn test_successful_analysis_is_stored() {
        let analysis = IssueAnalysis {
            is_hot: true,
            category: Some("outage".into()),
            keywords: vec!["login".into()],
        };
        let (store, handler) = setup(Some(analysis.clone()));
        let ticket_id = store.insert_ticket("Login down", "Nobody can sign in");

        handler
            .handle(&Event::HotIssueAnalysis { ticket_id })
            .await
            .unwrap();

        let audited = store.audited.lock().unwrap();
        assert_eq!(audited.as_slice(), &[(ticket_id, Some(analysis))]);
    }

    #[tokio::test]
    async fn test_failed_analysis_still_stamps_audit() {
        let (store, handler) = setup(None);
        let ticket_id = store.insert_ticket("Login down", "Nobody can sign in");

        handler
            .handle(&Event::HotIssueAnalysis { ticket_id })
            .await
            .unwrap();

        let audited = store.audited.lock().unwrap();
        assert_eq!(audited.as_slice(), &[(ticket_id, None)]);
    }

    #[tokio::test]
    async fn test_unknown_ticket_is_payload_invalid() {
        let (store, handler) = setup(None);
        let result = handler
            .handle(&Event::HotIssueAnalysis {
                ticket_id: Uuid::new_v4(),
            })
            .await;
        assert!(matches!(result, Err(HandlerError::PayloadInvalid(_))));
        assert!(store.audited.lock().unwrap().is_empty());
    }
}
