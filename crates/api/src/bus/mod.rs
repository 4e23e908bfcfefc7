//! In-process event bus
//!
//! Handlers are registered on an [`EventBusBuilder`] at startup; the built
//! [`EventBus`] is immutable and shared by `Arc`. Publishing spawns one task per
//! subscribed handler and returns immediately. Handler failures and panics are
//! logged by a supervising task and never reach the publisher.

pub mod handlers;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use helpdesk_shared::NotificationChannel;
use uuid::Uuid;

pub use handlers::HandlerError;

/// Routing key for events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    HandoffNotificationSent,
    FavoritesSync,
    HotIssueAnalysis,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::HandoffNotificationSent => "handoff-notification-sent",
            EventKind::FavoritesSync => "favorites-sync",
            EventKind::HotIssueAnalysis => "hot-issue-analysis",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable event payload
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A handoff notification record is ready to send
    HandoffNotificationSent {
        record_id: Uuid,
        ticket_id: Uuid,
        channel: NotificationChannel,
        target: String,
        summary: String,
    },
    /// A favorited conversation should be pushed to the knowledge base
    FavoritesSync { record_id: Uuid, ticket_id: Uuid },
    /// A ticket should be checked for hot-issue signals
    HotIssueAnalysis { ticket_id: Uuid },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::HandoffNotificationSent { .. } => EventKind::HandoffNotificationSent,
            Event::FavoritesSync { .. } => EventKind::FavoritesSync,
            Event::HotIssueAnalysis { .. } => EventKind::HotIssueAnalysis,
        }
    }

    pub fn ticket_id(&self) -> Uuid {
        match self {
            Event::HandoffNotificationSent { ticket_id, .. }
            | Event::FavoritesSync { ticket_id, .. }
            | Event::HotIssueAnalysis { ticket_id } => *ticket_id,
        }
    }
}

/// Reaction to published events
///
/// Delivery is at-least-once, so implementations must be idempotent.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

type Subscriptions = HashMap<EventKind, Vec<Arc<dyn EventHandler>>>;

/// Collects subscriptions before the bus is frozen
#[derive(Default)]
pub struct EventBusBuilder {
    handlers: Subscriptions,
}

impl EventBusBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> Self {
        tracing::debug!(event = %kind, handler = handler.name(), "Subscribed event handler");
        self.handlers.entry(kind).or_default().push(handler);
        self
    }

    pub fn build(self) -> EventBus {
        EventBus {
            handlers: self.handlers,
        }
    }
}

/// Fixed-topology event bus
pub struct EventBus {
    handlers: Subscriptions,
}

impl EventBus {
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::new()
    }

    /// Number of handlers subscribed to `kind`
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Hand the event to every subscribed handler without waiting
    ///
    /// Returns the number of handlers scheduled. Must be called from within a
    /// Tokio runtime.
    pub fn publish(&self, event: Event) -> usize {
        let kind = event.kind();
        let Some(handlers) = self.handlers.get(&kind) else {
            tracing::debug!(event = %kind, "No handlers subscribed, dropping event");
            return 0;
        };

        let ticket_id = event.ticket_id();
        let event = Arc::new(event);

        for handler in handlers {
            let name = handler.name();
            let task = {
                let handler = Arc::clone(handler);
                let event = Arc::clone(&event);
                tokio::spawn(async move { handler.handle(&event).await })
            };

            // Supervise so failures are logged rather than lost
            tokio::spawn(async move {
                match task.await {
                    Ok(Ok(())) => {
                        tracing::debug!(event = %kind, handler = name, ticket_id = %ticket_id, "Event handled");
                    }
                    Ok(Err(e)) => {
                        tracing::error!(
                            event = %kind,
                            handler = name,
                            ticket_id = %ticket_id,
                            error = %e,
                            "Event handler failed"
                        );
                    }
                    Err(e) if e.is_panic() => {
                        tracing::error!(
                            event = %kind,
                            handler = name,
                            ticket_id = %ticket_id,
                            "Event handler panicked"
                        );
                    }
                    Err(_) => {
                        tracing::warn!(event = %kind, handler = name, "Event handler cancelled");
                    }
                }
            });
        }

        tracing::debug!(
            event = %kind,
            ticket_id = %ticket_id,
            handlers = handlers.len(),
            "Event published"
        );

        handlers.len()
    }
}
