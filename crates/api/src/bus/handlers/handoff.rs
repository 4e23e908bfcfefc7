//! Handoff notification delivery

use std::sync::Arc;

use async_trait::async_trait;

use super::{run_claimed, HandlerError};
use crate::bus::{Event, EventHandler};
use crate::outbound::{NotificationPayload, SenderRegistry};
use crate::store::{SyncRecordKind, SyncRecordStore};

/// Sends a handoff notification through the channel named on the event
pub struct HandoffNotificationHandler {
    store: Arc<dyn SyncRecordStore>,
    senders: SenderRegistry,
}

impl HandoffNotificationHandler {
    pub fn new(store: Arc<dyn SyncRecordStore>, senders: SenderRegistry) -> Self {
        Self { store, senders }
    }
}

#[async_trait]
impl EventHandler for HandoffNotificationHandler {
    fn name(&self) -> &'static str {
        "handoff-notification"
    }

    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let Event::HandoffNotificationSent {
            record_id,
            ticket_id,
            channel,
            target,
            summary,
        } = event
        else {
            return Err(HandlerError::PayloadInvalid(format!(
                "unexpected event {}",
                event.kind()
            )));
        };

        run_claimed(
            self.store.as_ref(),
            SyncRecordKind::HandoffNotification,
            *record_id,
            || async move {
                if target.trim().is_empty() {
                    return Err(HandlerError::PayloadInvalid("empty notification target".into()));
                }
                let sender = self.senders.get(*channel).ok_or_else(|| {
                    HandlerError::CollaboratorUnavailable(format!(
                        "no sender for channel {}",
                        channel.as_str()
                    ))
                })?;

                let payload = NotificationPayload {
                    ticket_id: *ticket_id,
                    subject: format!("Ticket {} needs a human agent", ticket_id),
                    summary: summary.clone(),
                };
                sender.send(target, &payload).await?;

                tracing::info!(
                    ticket_id = %ticket_id,
                    record_id = %record_id,
                    channel = channel.as_str(),
                    "Handoff notification sent"
                );
                Ok(())
            },
        )
        .await
    }
}
