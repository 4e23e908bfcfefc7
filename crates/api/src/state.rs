//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::JwtManager;
use crate::bus::{handlers, EventBus};
use crate::config::Config;
use crate::outbound::{
    self, CollaboratorError, EmailSender, HttpIssueAnalyzer, HttpKnowledgeBase, SenderRegistry,
    SmsSender, WebhookSender,
};
use crate::store::{PgStore, SyncRecordStore};
use crate::websocket::WebSocketState;
use helpdesk_shared::NotificationChannel;

/// State handed to every route
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub jwt: JwtManager,
    pub ws_state: WebSocketState,
    pub bus: Arc<EventBus>,
    pub sync_store: Arc<dyn SyncRecordStore>,
}

impl AppState {
    /// Wire the Postgres store, outbound collaborators and event bus together
    pub fn new(pool: PgPool, config: Config) -> Result<Self, CollaboratorError> {
        let store = Arc::new(PgStore::new(pool.clone()));
        let client = outbound::http_client(config.outbound_timeout())?;

        let senders = SenderRegistry::new()
            .with(
                NotificationChannel::Webhook,
                Arc::new(WebhookSender::new(client.clone())),
            )
            .with(
                NotificationChannel::Email,
                Arc::new(EmailSender::new(
                    client.clone(),
                    config.resend_api_key.clone(),
                    config.email_from.clone(),
                )),
            )
            .with(
                NotificationChannel::Sms,
                Arc::new(SmsSender::new(
                    client.clone(),
                    config.sms_gateway_url.clone(),
                    config.sms_api_key.clone(),
                )),
            );

        let knowledge_base = Arc::new(HttpKnowledgeBase::new(
            client.clone(),
            config.knowledge_base_url.clone(),
            config.knowledge_base_api_key.clone(),
        ));
        let analyzer = Arc::new(HttpIssueAnalyzer::new(
            client,
            config.completion_api_url.clone(),
            config.completion_api_key.clone(),
        ));

        let bus = handlers::subscribe_all(
            EventBus::builder(),
            store.clone(),
            senders,
            knowledge_base,
            analyzer,
        )
        .build();

        let ws_state = WebSocketState::new(
            store.clone(),
            config.heartbeat_timeout(),
            config.heartbeat_check_interval(),
        );

        Ok(Self {
            pool,
            jwt: JwtManager::new(&config.jwt_secret),
            config: Arc::new(config),
            ws_state,
            bus: Arc::new(bus),
            sync_store: store,
        })
    }
}
