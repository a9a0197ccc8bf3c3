//! Realtime research events
//!
//! Row changes on `company_research` and `prospect_research` are fanned out
//! to in-process subscribers over a tokio broadcast channel. With Postgres,
//! triggers `pg_notify` the row ids on [`RESEARCH_EVENTS_CHANNEL`] and
//! [`spawn_pg_listener`] re-reads each row and publishes it; the in-memory
//! store publishes directly.

use crate::db::models::{CompanyResearch, ProspectResearch};
use crate::db::ResearchStore;
use crate::RESEARCH_EVENTS_CHANNEL;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgListener, PgPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Kind of row change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RowOp {
    Insert,
    Update,
}

/// A row change relevant to research progress
#[derive(Debug, Clone, PartialEq)]
pub enum ResearchEvent {
    CompanyResearch { op: RowOp, record: CompanyResearch },
    ProspectInserted { record: ProspectResearch },
}

impl ResearchEvent {
    /// Owner of the changed row
    pub fn user_id(&self) -> Uuid {
        match self {
            ResearchEvent::CompanyResearch { record, .. } => record.user_id,
            ResearchEvent::ProspectInserted { record } => record.user_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResearchEvent::CompanyResearch { .. } => "company_research",
            ResearchEvent::ProspectInserted { .. } => "prospect_inserted",
        }
    }
}

/// In-process fan-out of research events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ResearchEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; a bus without subscribers drops it
    pub fn publish(&self, event: ResearchEvent) {
        let kind = event.kind();
        match self.sender.send(event) {
            Ok(receivers) => debug!(kind, receivers, "Published research event"),
            Err(_) => debug!(kind, "No subscribers for research event"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResearchEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Payload sent by the notify triggers
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyPayload {
    pub table: String,
    pub op: RowOp,
    pub id: Uuid,
    pub user_id: Uuid,
}

/// Turn one notification into a typed event by re-reading the row
pub async fn resolve_notification(
    store: &dyn ResearchStore,
    payload: &NotifyPayload,
) -> crate::Result<Option<ResearchEvent>> {
    match (payload.table.as_str(), payload.op) {
        ("company_research", op) => Ok(store
            .find_company_research(payload.id)
            .await?
            .map(|record| ResearchEvent::CompanyResearch { op, record })),
        ("prospect_research", RowOp::Insert) => {
            let record = store
                .find_prospects(payload.user_id, &[payload.id])
                .await?
                .into_iter()
                .next();
            Ok(record.map(|record| ResearchEvent::ProspectInserted { record }))
        }
        _ => Ok(None),
    }
}

/// Bridge Postgres notifications onto the event bus.
///
/// Reconnects after a listener failure; notifications sent while
/// disconnected are lost, matching realtime delivery semantics.
pub fn spawn_pg_listener(
    pool: PgPool,
    store: Arc<dyn ResearchStore>,
    bus: EventBus,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listen(&pool, store.as_ref(), &bus).await {
                Ok(()) => break,
                Err(e) => {
                    error!(error = %e, "Realtime listener failed, reconnecting");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    })
}

async fn listen(pool: &PgPool, store: &dyn ResearchStore, bus: &EventBus) -> Result<(), sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(RESEARCH_EVENTS_CHANNEL).await?;
    info!(channel = RESEARCH_EVENTS_CHANNEL, "Listening for research events");

    loop {
        let notification = listener.recv().await?;
        let payload: NotifyPayload = match serde_json::from_str(notification.payload()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, payload = notification.payload(), "Ignoring malformed notification");
                continue;
            }
        };

        match resolve_notification(store, &payload).await {
            Ok(Some(event)) => {
                metrics::counter!(
                    format!("{}_research_events_total", crate::metrics::METRICS_PREFIX),
                    "kind" => event.kind()
                )
                .increment(1);
                bus.publish(event);
            }
            Ok(None) => debug!(table = %payload.table, id = %payload.id, "Notification row not found"),
            Err(e) => warn!(error = %e, id = %payload.id, "Failed to load notified row"),
        }
    }
}
