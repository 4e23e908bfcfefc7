//! Hot-issue analysis via an HTTP completion service

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{check_status, CollaboratorError};
use crate::store::IssueAnalysis;

#[async_trait]
pub trait IssueAnalyzer: Send + Sync {
    async fn analyze(&self, title: &str, description: &str)
        -> Result<IssueAnalysis, CollaboratorError>;
}

const ANALYSIS_PROMPT: &str = "Decide whether this support ticket describes a hot issue \
(an outage, security problem, or anything affecting many customers). Reply with JSON only: \
{\"is_hot\": bool, \"category\": string or null, \"keywords\": [string]}.";

/// Completion-service backed analyzer
#[derive(Clone)]
pub struct HttpIssueAnalyzer {
    client: reqwest::Client,
    api_url: Option<String>,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    /// Model output, expected to be the analysis JSON
    completion: String,
}

impl HttpIssueAnalyzer {
    pub fn new(client: reqwest::Client, api_url: Option<String>, api_key: String) -> Self {
        Self {
            client,
            api_url,
            api_key,
        }
    }
}

/// Parse the analysis JSON out of a completion, tolerating surrounding prose
fn parse_analysis(completion: &str) -> Result<IssueAnalysis, CollaboratorError> {
    let start = completion.find('{');
    let end = completion.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &completion[start..=end],
        _ => {
            return Err(CollaboratorError::InvalidResponse(
                "completion contained no JSON object".into(),
            ))
        }
    };
    serde_json::from_str(json).map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl IssueAnalyzer for HttpIssueAnalyzer {
    async fn analyze(
        &self,
        title: &str,
        description: &str,
    ) -> Result<IssueAnalysis, CollaboratorError> {
        let Some(ref api_url) = self.api_url else {
            return Err(CollaboratorError::NotConfigured("Completion API (COMPLETION_API_URL)"));
        };

        let body = json!({
            "prompt": format!("{}\n\nTitle: {}\n\nDescription: {}", ANALYSIS_PROMPT, title, description),
            "max_tokens": 256,
        });

        let response = self
            .client
            .post(api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let response: CompletionResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))?;

        parse_analysis(&response.completion)
    }
}
