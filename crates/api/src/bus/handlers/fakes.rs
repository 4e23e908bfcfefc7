//! In-memory collaborators for handler tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use helpdesk_shared::SyncStatus;
use uuid::Uuid;

use crate::outbound::{
    CollaboratorError, IssueAnalyzer, KnowledgeBase, NotificationPayload, NotificationSender,
};
use crate::store::{
    ConversationSnapshot, IssueAnalysis, NewHandoffNotification, StoreError, SyncRecordKind,
    SyncRecordStore, TicketSummary,
};

#[derive(Debug, Clone)]
pub struct Record {
    pub kind: SyncRecordKind,
    pub status: SyncStatus,
    pub last_error: Option<String>,
    pub notification_sent: bool,
}

#[derive(Default)]
pub struct MemorySyncStore {
    pub records: Mutex<HashMap<Uuid, Record>>,
    pub tickets: Mutex<HashMap<Uuid, TicketSummary>>,
    pub audited: Mutex<Vec<(Uuid, Option<IssueAnalysis>)>>,
}

impl MemorySyncStore {
    pub fn insert_pending(&self, kind: SyncRecordKind) -> Uuid {
        let id = Uuid::new_v4();
        self.records.lock().unwrap().insert(
            id,
            Record {
                kind,
                status: SyncStatus::Pending,
                last_error: None,
                notification_sent: false,
            },
        );
        id
    }

    pub fn insert_ticket(&self, title: &str, description: &str) -> Uuid {
        let ticket_id = Uuid::new_v4();
        self.tickets.lock().unwrap().insert(
            ticket_id,
            TicketSummary {
                ticket_id,
                title: title.into(),
                description: description.into(),
            },
        );
        ticket_id
    }

    pub fn record(&self, id: Uuid) -> Record {
        self.records.lock().unwrap()[&id].clone()
    }
}

#[async_trait]
impl SyncRecordStore for MemorySyncStore {
    async fn create_handoff_notification(
        &self,
        _notification: &NewHandoffNotification,
    ) -> Result<Uuid, StoreError> {
        Ok(self.insert_pending(SyncRecordKind::HandoffNotification))
    }

    async fn create_favorite_sync(
        &self,
        _ticket_id: Uuid,
        _favorited_by: Uuid,
    ) -> Result<Uuid, StoreError> {
        Ok(self.insert_pending(SyncRecordKind::FavoriteConversation))
    }

    async fn claim(&self, kind: SyncRecordKind, record_id: Uuid) -> Result<bool, StoreError> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&record_id) {
            Some(r) if r.kind == kind && r.status == SyncStatus::Pending => {
                r.status = SyncStatus::Processing;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_synced(&self, kind: SyncRecordKind, record_id: Uuid) -> Result<bool, StoreError> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&record_id) {
            Some(r) if r.kind == kind && r.status == SyncStatus::Processing => {
                r.status = SyncStatus::Synced;
                r.last_error = None;
                if kind == SyncRecordKind::HandoffNotification {
                    r.notification_sent = true;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(
        &self,
        _kind: SyncRecordKind,
        record_id: Uuid,
        error: &str,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(&record_id).ok_or(StoreError::NotFound)?;
        record.status = SyncStatus::Failed;
        record.last_error = Some(error.to_string());
        Ok(())
    }

    async fn ticket_summary(&self, ticket_id: Uuid) -> Result<Option<TicketSummary>, StoreError> {
        Ok(self.tickets.lock().unwrap().get(&ticket_id).cloned())
    }

    async fn conversation_snapshot(
        &self,
        ticket_id: Uuid,
    ) -> Result<Option<ConversationSnapshot>, StoreError> {
        Ok(self
            .tickets
            .lock()
            .unwrap()
            .get(&ticket_id)
            .map(|t| ConversationSnapshot {
                ticket_id,
                title: t.title.clone(),
                description: t.description.clone(),
                messages: Vec::new(),
            }))
    }

    async fn mark_hot_issue_audited(
        &self,
        ticket_id: Uuid,
        analysis: Option<&IssueAnalysis>,
    ) -> Result<(), StoreError> {
        self.audited
            .lock()
            .unwrap()
            .push((ticket_id, analysis.cloned()));
        Ok(())
    }
}

/// Counts sends; fails when told to
#[derive(Default)]
pub struct FakeSender {
    pub sends: AtomicUsize,
    pub fail: AtomicBool,
}

#[async_trait]
impl NotificationSender for FakeSender {
    async fn send(
        &self,
        _target: &str,
        _payload: &NotificationPayload,
    ) -> Result<(), CollaboratorError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Status {
                status: 503,
                body: "gateway down".into(),
            });
        }
        Ok(())
    }
}

/// Sender whose transport panics mid-call
pub struct PanickingSender;

#[async_trait]
impl NotificationSender for PanickingSender {
    async fn send(
        &self,
        _target: &str,
        _payload: &NotificationPayload,
    ) -> Result<(), CollaboratorError> {
        panic!("sender transport panicked")
    }
}

#[derive(Default)]
pub struct FakeKnowledgeBase {
    pub ingested: Mutex<Vec<ConversationSnapshot>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl KnowledgeBase for FakeKnowledgeBase {
    async fn ingest(&self, snapshot: &ConversationSnapshot) -> Result<(), CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Rejected("schema mismatch".into()));
        }
        self.ingested.lock().unwrap().push(snapshot.clone());
        Ok(())
    }
}

pub struct FakeAnalyzer {
    pub result: Mutex<Option<IssueAnalysis>>,
}

#[async_trait]
impl IssueAnalyzer for FakeAnalyzer {
    async fn analyze(
        &self,
        _title: &str,
        _description: &str,
    ) -> Result<IssueAnalysis, CollaboratorError> {
        self.result
            .lock()
            .unwrap()
            .clone()
            .ok_or(CollaboratorError::NotConfigured("Completion API"))
    }
}
