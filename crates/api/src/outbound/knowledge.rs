//! Knowledge-base ingestion

use std::time::Duration;

use async_trait::async_trait;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use super::{check_status, CollaboratorError};
use crate::store::ConversationSnapshot;

/// Maximum number of retry attempts for transient failures
const MAX_RETRIES: usize = 3;

/// Base delay for exponential backoff
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Maximum delay between retries
const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Upsert a favorited conversation, keyed by ticket id
    async fn ingest(&self, snapshot: &ConversationSnapshot) -> Result<(), CollaboratorError>;
}

/// Knowledge base reached over HTTP
#[derive(Clone)]
pub struct HttpKnowledgeBase {
    client: reqwest::Client,
    base_url: Option<String>,
    api_key: String,
}

impl HttpKnowledgeBase {
    pub fn new(client: reqwest::Client, base_url: Option<String>, api_key: String) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }

    async fn put_once(&self, url: &str, snapshot: &ConversationSnapshot) -> Result<(), CollaboratorError> {
        let response = self
            .client
            .put(url)
            .bearer_auth(&self.api_key)
            .json(snapshot)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl KnowledgeBase for HttpKnowledgeBase {
    async fn ingest(&self, snapshot: &ConversationSnapshot) -> Result<(), CollaboratorError> {
        let Some(ref base_url) = self.base_url else {
            return Err(CollaboratorError::NotConfigured("Knowledge base (KNOWLEDGE_BASE_URL)"));
        };
        let url = format!(
            "{}/conversations/{}",
            base_url.trim_end_matches('/'),
            snapshot.ticket_id
        );

        // Exponential backoff with jitter, transient failures only
        let retry_strategy = ExponentialBackoff::from_millis(RETRY_BASE_DELAY.as_millis() as u64)
            .max_delay(RETRY_MAX_DELAY)
            .take(MAX_RETRIES)
            .map(jitter);

        Retry::spawn(retry_strategy, || async {
            let result = self.put_once(&url, snapshot).await;

            match &result {
                Ok(_) => Ok(result),
                Err(e) if e.is_transient() => {
                    tracing::debug!(
                        ticket_id = %snapshot.ticket_id,
                        error = %e,
                        "Transient knowledge base error - will retry"
                    );
                    Err(result)
                }
                Err(_) => Ok(result), // Permanent error, stop retrying
            }
        })
        .await
        .unwrap_or_else(|e| e)?;

        tracing::info!(
            ticket_id = %snapshot.ticket_id,
            messages = snapshot.messages.len(),
            "Conversation ingested into knowledge base"
        );
        Ok(())
    }
}
