//! Approval queue — durable holding area for decisions awaiting human action.
//!
//! Requests leave the pending state exactly once: `resolve` and the expiry
//! sweep race on the same request, and only the first conditional transition
//! wins. The pending read path is a snapshot and never blocks on resolution.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ApprovalError, Error, Result};
use crate::store::Database;

/// Broadcast channel capacity for dashboard subscribers.
const BROADCAST_CAPACITY: usize = 256;

/// Lifecycle of an approval request. Edits resolve to `Approved` with the
/// edited text as the candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl ApprovalStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "approved" => Self::Approved,
            "denied" => Self::Denied,
            "expired" => Self::Expired,
            _ => Self::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Expired => "expired",
        }
    }
}

/// Human action on a pending request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Resolution {
    Approve,
    Edit { text: String },
    Deny,
}

/// A decision parked for human review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub decision_id: Uuid,
    pub conversation_id: Uuid,
    /// Candidate text to send on approval. `None` when generation failed —
    /// the operator must edit or deny.
    pub candidate: Option<String>,
    /// Why this decision needs a human (screen reason, dispatch failure, ...).
    pub reason: String,
    pub status: ApprovalStatus,
    /// Past this instant the request expires; the fallback is always discard.
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.deadline
    }
}

/// Real-time queue events for dashboard subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    NewRequest { request: ApprovalRequest },
    Resolved { id: Uuid, status: ApprovalStatus },
    Expired { id: Uuid },
    Sync { pending: Vec<ApprovalRequest> },
}

/// Durable approval queue with broadcast fan-out.
pub struct ApprovalQueue {
    requests: RwLock<Vec<ApprovalRequest>>,
    tx: broadcast::Sender<QueueEvent>,
    db: Arc<dyn Database>,
}

impl ApprovalQueue {
    /// Open the queue, recovering pending requests from storage.
    pub async fn open(db: Arc<dyn Database>) -> Result<Arc<Self>> {
        let pending = db.get_pending_approvals().await?;
        if !pending.is_empty() {
            info!(count = pending.len(), "Recovered pending approval requests");
        }
        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        Ok(Arc::new(Self {
            requests: RwLock::new(pending),
            tx,
            db,
        }))
    }

    /// Subscribe to real-time queue events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    /// Park a decision for human review.
    pub async fn enqueue(
        &self,
        decision_id: Uuid,
        conversation_id: Uuid,
        candidate: Option<String>,
        reason: &str,
        deadline: DateTime<Utc>,
    ) -> Result<ApprovalRequest> {
        let now = Utc::now();
        let request = ApprovalRequest {
            id: Uuid::new_v4(),
            decision_id,
            conversation_id,
            candidate,
            reason: reason.to_string(),
            status: ApprovalStatus::Pending,
            deadline,
            created_at: now,
            updated_at: now,
        };
        self.db.insert_approval(&request).await?;
        {
            let mut requests = self.requests.write().await;
            requests.push(request.clone());
        }
        info!(
            request_id = %request.id,
            decision_id = %decision_id,
            reason,
            "Approval request enqueued"
        );
        let _ = self.tx.send(QueueEvent::NewRequest {
            request: request.clone(),
        });
        Ok(request)
    }

    /// Snapshot of pending, non-expired requests. Finite and restartable;
    /// reflects queue state at call time.
    pub async fn pending(&self) -> Vec<ApprovalRequest> {
        let requests = self.requests.read().await;
        requests
            .iter()
            .filter(|r| r.status == ApprovalStatus::Pending && !r.is_expired())
            .cloned()
            .collect()
    }

    /// Look up a request by id.
    pub async fn get(&self, id: Uuid) -> Option<ApprovalRequest> {
        let requests = self.requests.read().await;
        requests.iter().find(|r| r.id == id).cloned()
    }

    /// Apply a human resolution. Exactly one caller wins the transition out
    /// of `Pending`; everyone else gets `AlreadyResolved`.
    pub async fn resolve(&self, id: Uuid, resolution: Resolution) -> Result<ApprovalRequest> {
        let resolved = {
            let mut requests = self.requests.write().await;
            let request = requests
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or(Error::Approval(ApprovalError::NotFound(id)))?;

            if request.status != ApprovalStatus::Pending {
                return Err(Error::Approval(ApprovalError::AlreadyResolved(id)));
            }

            match &resolution {
                Resolution::Approve => {
                    if request.candidate.is_none() {
                        return Err(Error::Approval(ApprovalError::NothingToSend(id)));
                    }
                    request.status = ApprovalStatus::Approved;
                }
                Resolution::Edit { text } => {
                    request.candidate = Some(text.clone());
                    request.status = ApprovalStatus::Approved;
                }
                Resolution::Deny => request.status = ApprovalStatus::Denied,
            }
            request.updated_at = Utc::now();
            request.clone()
        };

        self.db.update_approval(&resolved).await?;
        info!(
            request_id = %id,
            status = resolved.status.as_str(),
            "Approval request resolved"
        );
        let _ = self.tx.send(QueueEvent::Resolved {
            id,
            status: resolved.status,
        });
        Ok(resolved)
    }

    /// Transition past-deadline pending requests to `Expired` and return
    /// them. The caller finalizes the owning decisions.
    pub async fn expire_old(&self) -> Result<Vec<ApprovalRequest>> {
        let expired: Vec<ApprovalRequest> = {
            let mut requests = self.requests.write().await;
            requests
                .iter_mut()
                .filter(|r| r.status == ApprovalStatus::Pending && r.is_expired())
                .map(|r| {
                    r.status = ApprovalStatus::Expired;
                    r.updated_at = Utc::now();
                    r.clone()
                })
                .collect()
        };

        for request in &expired {
            if let Err(e) = self.db.update_approval(request).await {
                warn!(request_id = %request.id, error = %e, "Failed to persist expiry");
            }
            debug!(request_id = %request.id, "Approval request expired");
            let _ = self.tx.send(QueueEvent::Expired { id: request.id });
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Expired approval requests");
        }
        Ok(expired)
    }

    /// Drop resolved requests older than `keep` from memory. Storage keeps
    /// the full history.
    pub async fn prune_resolved(&self, keep: usize) {
        let mut requests = self.requests.write().await;
        let resolved: Vec<Uuid> = requests
            .iter()
            .filter(|r| r.status != ApprovalStatus::Pending)
            .map(|r| r.id)
            .collect();
        if resolved.len() > keep {
            let drop_ids: std::collections::HashSet<Uuid> =
                resolved[..resolved.len() - keep].iter().copied().collect();
            requests.retain(|r| !drop_ids.contains(&r.id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;
    use chrono::Duration;

    async fn queue() -> Arc<ApprovalQueue> {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        ApprovalQueue::open(db).await.unwrap()
    }

    async fn enqueue_one(queue: &ApprovalQueue, minutes: i64) -> ApprovalRequest {
        queue
            .enqueue(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Some("sure, 7pm works!".into()),
                "strict mode",
                Utc::now() + Duration::minutes(minutes),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn enqueue_and_pending() {
        let queue = queue().await;
        assert!(queue.pending().await.is_empty());

        let request = enqueue_one(&queue, 10).await;
        let pending = queue.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, request.id);
    }

    #[tokio::test]
    async fn approve_removes_from_pending() {
        let queue = queue().await;
        let request = enqueue_one(&queue, 10).await;

        let resolved = queue.resolve(request.id, Resolution::Approve).await.unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert!(queue.pending().await.is_empty());
    }

    #[tokio::test]
    async fn edit_replaces_candidate() {
        let queue = queue().await;
        let request = enqueue_one(&queue, 10).await;

        let resolved = queue
            .resolve(
                request.id,
                Resolution::Edit {
                    text: "actually, let's do 8pm".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert_eq!(resolved.candidate.as_deref(), Some("actually, let's do 8pm"));
    }

    #[tokio::test]
    async fn second_resolve_loses() {
        let queue = queue().await;
        let request = enqueue_one(&queue, 10).await;

        queue.resolve(request.id, Resolution::Deny).await.unwrap();
        let err = queue.resolve(request.id, Resolution::Approve).await;
        assert!(matches!(
            err,
            Err(Error::Approval(ApprovalError::AlreadyResolved(_)))
        ));
    }

    #[tokio::test]
    async fn approve_without_candidate_refused() {
        let queue = queue().await;
        let request = queue
            .enqueue(
                Uuid::new_v4(),
                Uuid::new_v4(),
                None,
                "generation unavailable",
                Utc::now() + Duration::minutes(10),
            )
            .await
            .unwrap();

        let err = queue.resolve(request.id, Resolution::Approve).await;
        assert!(matches!(
            err,
            Err(Error::Approval(ApprovalError::NothingToSend(_)))
        ));

        // Edit still works.
        let resolved = queue
            .resolve(request.id, Resolution::Edit { text: "hand-written".into() })
            .await
            .unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn expiry_beats_late_resolve() {
        let queue = queue().await;
        let request = enqueue_one(&queue, -1).await; // already past deadline

        let expired = queue.expire_old().await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, ApprovalStatus::Expired);

        let err = queue.resolve(request.id, Resolution::Approve).await;
        assert!(matches!(
            err,
            Err(Error::Approval(ApprovalError::AlreadyResolved(_)))
        ));
    }

    #[tokio::test]
    async fn resolve_beats_expiry() {
        let queue = queue().await;
        let request = enqueue_one(&queue, -1).await;

        queue.resolve(request.id, Resolution::Deny).await.unwrap();
        let expired = queue.expire_old().await.unwrap();
        assert!(expired.is_empty());
    }

    #[tokio::test]
    async fn broadcast_emits_lifecycle_events() {
        let queue = queue().await;
        let mut rx = queue.subscribe();

        let request = enqueue_one(&queue, 10).await;
        match rx.recv().await.unwrap() {
            QueueEvent::NewRequest { request: r } => assert_eq!(r.id, request.id),
            other => panic!("expected NewRequest, got {:?}", other),
        }

        queue.resolve(request.id, Resolution::Approve).await.unwrap();
        match rx.recv().await.unwrap() {
            QueueEvent::Resolved { id, status } => {
                assert_eq!(id, request.id);
                assert_eq!(status, ApprovalStatus::Approved);
            }
            other => panic!("expected Resolved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn recovery_reloads_pending() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let queue = ApprovalQueue::open(Arc::clone(&db)).await.unwrap();
        let request = enqueue_one(&queue, 10).await;
        drop(queue);

        let reopened = ApprovalQueue::open(db).await.unwrap();
        let pending = reopened.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, request.id);
    }
}
