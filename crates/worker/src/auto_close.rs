//! Auto-close sweep
//!
//! Resolves tickets whose latest message came from staff and has gone
//! unanswered for longer than the inactivity window. Claiming and resolving
//! happen in one statement with `SKIP LOCKED`, so sweeps running in separate
//! processes never resolve the same ticket twice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Storage side of the sweep
#[async_trait]
pub trait TicketSweepStore: Send + Sync {
    /// Resolve every eligible ticket whose last message predates `cutoff` and
    /// return the ids that this call resolved.
    async fn claim_and_resolve_inactive(
        &self,
        cutoff: OffsetDateTime,
    ) -> Result<Vec<Uuid>, SweepError>;
}

pub struct PgSweepStore {
    pool: PgPool,
}

impl PgSweepStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TicketSweepStore for PgSweepStore {
    async fn claim_and_resolve_inactive(
        &self,
        cutoff: OffsetDateTime,
    ) -> Result<Vec<Uuid>, SweepError> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE support_tickets t
            SET status = 'resolved', updated_at = NOW(), resolved_at = NOW()
            FROM (
                SELECT st.id
                FROM support_tickets st
                CROSS JOIN LATERAL (
                    SELECT m.sender_role, m.created_at
                    FROM ticket_messages m
                    WHERE m.ticket_id = st.id AND NOT m.is_withdrawn
                    ORDER BY m.created_at DESC, m.sequence DESC
                    LIMIT 1
                ) last_message
                WHERE st.status NOT IN ('scheduled', 'resolved', 'closed')
                  AND last_message.sender_role <> 'customer'
                  AND last_message.created_at < $1
                FOR UPDATE OF st SKIP LOCKED
            ) claimed
            WHERE t.id = claimed.id
            RETURNING t.id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed(Vec<Uuid>),
    /// A sweep was already running in this process
    Skipped,
}

/// Clears the running flag when the sweep finishes, even on error
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AutoCloseSweeper {
    store: Arc<dyn TicketSweepStore>,
    inactivity: Duration,
    running: AtomicBool,
}

impl AutoCloseSweeper {
    pub fn new(store: Arc<dyn TicketSweepStore>, inactivity: Duration) -> Self {
        Self {
            store,
            inactivity,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one sweep unless another is still in progress
    pub async fn run_once(&self) -> Result<SweepOutcome, SweepError> {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            warn!("Auto-close sweep still running, skipping tick");
            return Ok(SweepOutcome::Skipped);
        };

        let cutoff = OffsetDateTime::now_utc() - self.inactivity;
        let resolved = self.store.claim_and_resolve_inactive(cutoff).await?;

        info!(
            resolved = resolved.len(),
            ticket_ids = ?resolved,
            "Auto-close sweep completed"
        );

        Ok(SweepOutcome::Completed(resolved))
    }

    /// Scheduler entry point; failures are logged and the next tick proceeds
    pub async fn tick(&self) {
        if let Err(e) = self.run_once().await {
            error!(error = %e, "Auto-close sweep failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helpdesk_shared::{ParticipantRole, TicketStatus};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// What the sweep needs to know about a ticket
    #[derive(Debug, Clone, Copy)]
    struct TicketActivity {
        status: TicketStatus,
        /// Role and time of the latest non-withdrawn message
        last_message: Option<(ParticipantRole, OffsetDateTime)>,
    }

    impl TicketActivity {
        fn is_auto_close_candidate(&self, cutoff: OffsetDateTime) -> bool {
            if self.status.is_sweep_exempt() {
                return false;
            }
            match self.last_message {
                Some((role, at)) => role != ParticipantRole::Customer && at < cutoff,
                None => false,
            }
        }
    }

    /// Row locks reduced to one mutex: each claim sees only unclaimed rows
    #[derive(Default)]
    struct MemorySweepStore {
        tickets: Mutex<HashMap<Uuid, TicketActivity>>,
    }

    impl MemorySweepStore {
        fn insert(&self, status: TicketStatus, last: Option<(ParticipantRole, Duration)>) -> Uuid {
            let id = Uuid::new_v4();
            let now = OffsetDateTime::now_utc();
            self.tickets.lock().unwrap().insert(
                id,
                TicketActivity {
                    status,
                    last_message: last.map(|(role, age)| (role, now - age)),
                },
            );
            id
        }

        fn status(&self, id: Uuid) -> TicketStatus {
            self.tickets.lock().unwrap()[&id].status
        }
    }

    #[async_trait]
    impl TicketSweepStore for MemorySweepStore {
        async fn claim_and_resolve_inactive(
            &self,
            cutoff: OffsetDateTime,
        ) -> Result<Vec<Uuid>, SweepError> {
            let mut resolved = Vec::new();
            {
                let mut tickets = self.tickets.lock().unwrap();
                for (id, ticket) in tickets.iter_mut() {
                    if ticket.is_auto_close_candidate(cutoff) {
                        ticket.status = TicketStatus::Resolved;
                        resolved.push(*id);
                    }
                }
            }
            tokio::task::yield_now().await;
            Ok(resolved)
        }
    }

    /// Blocks inside the claim until released
    struct GatedStore {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl TicketSweepStore for GatedStore {
        async fn claim_and_resolve_inactive(
            &self,
            _cutoff: OffsetDateTime,
        ) -> Result<Vec<Uuid>, SweepError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(Vec::new())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl TicketSweepStore for FailingStore {
        async fn claim_and_resolve_inactive(
            &self,
            _cutoff: OffsetDateTime,
        ) -> Result<Vec<Uuid>, SweepError> {
            Err(SweepError::Database(sqlx::Error::PoolTimedOut))
        }
    }

    #[tokio::test]
    async fn test_customer_waiting_is_kept_and_stale_agent_reply_is_resolved() {
        let store = Arc::new(MemorySweepStore::default());
        let customer_recent = store.insert(
            TicketStatus::InProgress,
            Some((ParticipantRole::Customer, Duration::days(2))),
        );
        let agent_stale = store.insert(
            TicketStatus::InProgress,
            Some((ParticipantRole::Agent, Duration::days(8))),
        );
        let sweeper = AutoCloseSweeper::new(store.clone(), Duration::days(7));

        let outcome = sweeper.run_once().await.unwrap();

        assert_eq!(outcome, SweepOutcome::Completed(vec![agent_stale]));
        assert_eq!(store.status(customer_recent), TicketStatus::InProgress);
        assert_eq!(store.status(agent_stale), TicketStatus::Resolved);
    }

    #[tokio::test]
    async fn test_exempt_and_fresh_tickets_are_untouched() {
        let store = Arc::new(MemorySweepStore::default());
        let scheduled = store.insert(
            TicketStatus::Scheduled,
            Some((ParticipantRole::Agent, Duration::days(30))),
        );
        let closed = store.insert(
            TicketStatus::Closed,
            Some((ParticipantRole::Bot, Duration::days(30))),
        );
        let fresh = store.insert(
            TicketStatus::AwaitingResponse,
            Some((ParticipantRole::Agent, Duration::days(1))),
        );
        let silent = store.insert(TicketStatus::Open, None);
        let old_customer = store.insert(
            TicketStatus::Open,
            Some((ParticipantRole::Customer, Duration::days(30))),
        );
        let sweeper = AutoCloseSweeper::new(store.clone(), Duration::days(7));

        assert_eq!(
            sweeper.run_once().await.unwrap(),
            SweepOutcome::Completed(Vec::new())
        );
        assert_eq!(store.status(scheduled), TicketStatus::Scheduled);
        assert_eq!(store.status(closed), TicketStatus::Closed);
        assert_eq!(store.status(fresh), TicketStatus::AwaitingResponse);
        assert_eq!(store.status(silent), TicketStatus::Open);
        assert_eq!(store.status(old_customer), TicketStatus::Open);
    }

    #[tokio::test]
    async fn test_concurrent_sweeps_resolve_disjoint_sets() {
        let store = Arc::new(MemorySweepStore::default());
        let mut candidates = HashSet::new();
        for _ in 0..20 {
            candidates.insert(store.insert(
                TicketStatus::InProgress,
                Some((ParticipantRole::Agent, Duration::days(10))),
            ));
        }

        // Two processes, two sweepers, one database
        let first = AutoCloseSweeper::new(store.clone(), Duration::days(7));
        let second = AutoCloseSweeper::new(store.clone(), Duration::days(7));
        let (a, b) = tokio::join!(first.run_once(), second.run_once());

        let (SweepOutcome::Completed(a), SweepOutcome::Completed(b)) = (a.unwrap(), b.unwrap())
        else {
            panic!("separate sweepers never skip each other");
        };
        let a: HashSet<_> = a.into_iter().collect();
        let b: HashSet<_> = b.into_iter().collect();

        assert!(a.is_disjoint(&b));
        assert_eq!(&a | &b, candidates);
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let store = Arc::new(GatedStore {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let sweeper = Arc::new(AutoCloseSweeper::new(store.clone(), Duration::days(7)));

        let running = tokio::spawn({
            let sweeper = sweeper.clone();
            async move { sweeper.run_once().await }
        });
        store.entered.notified().await;
        assert!(sweeper.is_running());

        assert_eq!(sweeper.run_once().await.unwrap(), SweepOutcome::Skipped);

        store.release.notify_one();
        assert_eq!(
            running.await.unwrap().unwrap(),
            SweepOutcome::Completed(Vec::new())
        );
        assert!(!sweeper.is_running());
    }

    #[tokio::test]
    async fn test_failed_sweep_releases_guard() {
        let sweeper = AutoCloseSweeper::new(Arc::new(FailingStore), Duration::days(7));

        assert!(sweeper.run_once().await.is_err());
        assert!(!sweeper.is_running());

        // The next tick runs normally
        sweeper.tick().await;
        assert!(!sweeper.is_running());
    }

    async fn seed_ticket(
        pool: &PgPool,
        status: &str,
        last_message: Option<(&str, Duration)>,
    ) -> Uuid {
        let (ticket_id,): (Uuid,) = sqlx::query_as(
            "INSERT INTO support_tickets (customer_id, subject, status) VALUES ($1, 'sweep test', $2) RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(status)
        .fetch_one(pool)
        .await
        .unwrap();

        if let Some((role, age)) = last_message {
            sqlx::query(
                r#"
                INSERT INTO ticket_messages (id, ticket_id, sender_id, sender_role, sequence, content, created_at)
                VALUES ($1, $2, $3, $4, 1, 'last word', $5)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(ticket_id)
            .bind(Uuid::new_v4())
            .bind(role)
            .bind(OffsetDateTime::now_utc() - age)
            .execute(pool)
            .await
            .unwrap();
        }
        ticket_id
    }

    async fn ticket_status(pool: &PgPool, ticket_id: Uuid) -> (String, Option<OffsetDateTime>) {
        sqlx::query_as("SELECT status, resolved_at FROM support_tickets WHERE id = $1")
            .bind(ticket_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_pg_sweep_resolves_stale_staff_replies_once() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = helpdesk_shared::create_pool(&url, 4).await.unwrap();
        helpdesk_shared::run_migrations(&pool).await.unwrap();

        let customer_recent =
            seed_ticket(&pool, "in_progress", Some(("customer", Duration::days(2)))).await;
        let customer_stale =
            seed_ticket(&pool, "open", Some(("customer", Duration::days(30)))).await;
        let agent_stale = seed_ticket(&pool, "in_progress", Some(("agent", Duration::days(8)))).await;
        let agent_fresh =
            seed_ticket(&pool, "awaiting_response", Some(("agent", Duration::days(1)))).await;
        let scheduled = seed_ticket(&pool, "scheduled", Some(("agent", Duration::days(30)))).await;
        let silent = seed_ticket(&pool, "open", None).await;

        let mut candidates = HashSet::from([agent_stale]);
        for _ in 0..50 {
            candidates.insert(seed_ticket(&pool, "open", Some(("bot", Duration::days(10)))).await);
        }

        let first = PgSweepStore::new(pool.clone());
        let second = PgSweepStore::new(pool.clone());
        let cutoff = OffsetDateTime::now_utc() - Duration::days(7);
        let (a, b) = tokio::join!(
            first.claim_and_resolve_inactive(cutoff),
            second.claim_and_resolve_inactive(cutoff)
        );
        let a: HashSet<_> = a.unwrap().into_iter().collect();
        let b: HashSet<_> = b.unwrap().into_iter().collect();

        // Other rows in a shared database may be swept too
        assert!(a.is_disjoint(&b));
        let resolved = &a | &b;
        assert!(candidates.is_subset(&resolved));
        for untouched in [customer_recent, customer_stale, agent_fresh, scheduled, silent] {
            assert!(!resolved.contains(&untouched));
        }

        let (status, resolved_at) = ticket_status(&pool, agent_stale).await;
        assert_eq!(status, "resolved");
        assert!(resolved_at.is_some());
        assert_eq!(ticket_status(&pool, customer_recent).await.0, "in_progress");
        assert_eq!(ticket_status(&pool, scheduled).await.0, "scheduled");

        // Nothing left for a second pass among the seeded tickets
        let again: HashSet<_> = first
            .claim_and_resolve_inactive(cutoff)
            .await
            .unwrap()
            .into_iter()
            .collect();
        assert!(again.is_disjoint(&candidates));
    }
}
