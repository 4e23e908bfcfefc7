//! Handoff notification channels
//!
//! Fire-and-forget senders for webhook, email (Resend) and SMS gateway
//! deliveries. Exactly one attempt per call; retry policy belongs to callers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use helpdesk_shared::NotificationChannel;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::{check_status, CollaboratorError};

/// What a handoff notification says
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NotificationPayload {
    pub ticket_id: Uuid,
    pub subject: String,
    pub summary: String,
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Deliver `payload` to `target` (URL, email address or phone number)
    async fn send(&self, target: &str, payload: &NotificationPayload)
        -> Result<(), CollaboratorError>;
}

/// Senders keyed by channel tag
#[derive(Clone, Default)]
pub struct SenderRegistry {
    senders: HashMap<NotificationChannel, Arc<dyn NotificationSender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, channel: NotificationChannel, sender: Arc<dyn NotificationSender>) -> Self {
        self.senders.insert(channel, sender);
        self
    }

    pub fn get(&self, channel: NotificationChannel) -> Option<Arc<dyn NotificationSender>> {
        self.senders.get(&channel).cloned()
    }
}

/// Generic JSON webhook sender
#[derive(Clone)]
pub struct WebhookSender {
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(
        &self,
        target: &str,
        payload: &NotificationPayload,
    ) -> Result<(), CollaboratorError> {
        let url = reqwest::Url::parse(target)
            .map_err(|e| CollaboratorError::Rejected(format!("invalid webhook URL: {}", e)))?;

        let body = json!({
            "text": format!("*{}*\n{}", payload.subject, payload.summary),
            "ticket_id": payload.ticket_id,
            "subject": payload.subject,
            "summary": payload.summary,
        });

        let response = self.client.post(url).json(&body).send().await?;
        check_status(response).await?;

        tracing::info!(ticket_id = %payload.ticket_id, "Handoff webhook delivered");
        Ok(())
    }
}

/// Email sender backed by the Resend API
#[derive(Clone)]
pub struct EmailSender {
    client: reqwest::Client,
    api_key: String,
    from: String,
}

impl EmailSender {
    const RESEND_URL: &'static str = "https://api.resend.com/emails";

    pub fn new(client: reqwest::Client, api_key: String, from: String) -> Self {
        Self {
            client,
            api_key,
            from,
        }
    }

    fn is_enabled(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[async_trait]
impl NotificationSender for EmailSender {
    async fn send(
        &self,
        target: &str,
        payload: &NotificationPayload,
    ) -> Result<(), CollaboratorError> {
        if !self.is_enabled() {
            return Err(CollaboratorError::NotConfigured("Email (RESEND_API_KEY)"));
        }
        if !target.contains('@') {
            return Err(CollaboratorError::Rejected(format!(
                "invalid email address: {}",
                target
            )));
        }

        let html = format!(
            "<h2>{}</h2><p>{}</p><p style=\"color:#666\">Ticket {}</p>",
            escape_html(&payload.subject),
            escape_html(&payload.summary),
            payload.ticket_id
        );

        let body = json!({
            "from": self.from,
            "to": [target],
            "subject": payload.subject,
            "html": html
        });

        let response = self
            .client
            .post(Self::RESEND_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;
        check_status(response).await?;

        tracing::info!(ticket_id = %payload.ticket_id, to = %target, "Handoff email sent");
        Ok(())
    }
}

/// SMS sender posting to an HTTP gateway
#[derive(Clone)]
pub struct SmsSender {
    client: reqwest::Client,
    gateway_url: Option<String>,
    api_key: String,
}

impl SmsSender {
    /// Longest message body sent in one SMS
    const MAX_BODY_CHARS: usize = 320;

    pub fn new(client: reqwest::Client, gateway_url: Option<String>, api_key: String) -> Self {
        Self {
            client,
            gateway_url,
            api_key,
        }
    }
}

#[async_trait]
impl NotificationSender for SmsSender {
    async fn send(
        &self,
        target: &str,
        payload: &NotificationPayload,
    ) -> Result<(), CollaboratorError> {
        let Some(ref gateway_url) = self.gateway_url else {
            return Err(CollaboratorError::NotConfigured("SMS gateway (SMS_GATEWAY_URL)"));
        };

        let digits = target.trim_start_matches('+');
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(CollaboratorError::Rejected(format!(
                "invalid phone number: {}",
                target
            )));
        }

        let text: String = format!("{}: {}", payload.subject, payload.summary)
            .chars()
            .take(Self::MAX_BODY_CHARS)
            .collect();

        let response = self
            .client
            .post(gateway_url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "to": target, "body": text }))
            .send()
            .await?;
        check_status(response).await?;

        tracing::info!(ticket_id = %payload.ticket_id, "Handoff SMS sent");
        Ok(())
    }
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
