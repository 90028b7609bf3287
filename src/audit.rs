//! Append-only audit log.
//!
//! Every decision transition, screen verdict, dispatch outcome and human
//! action lands here. Records within a decision carry a monotonic sequence
//! number so the trail reads in order even when wall clocks collide.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::store::Database;

/// Who caused an audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
    System,
    Human { operator: String },
}

impl Actor {
    pub fn as_str(&self) -> &str {
        match self {
            Self::System => "system",
            Self::Human { operator } => operator,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "system" => Self::System,
            operator => Self::Human {
                operator: operator.to_string(),
            },
        }
    }
}

/// One immutable audit entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    /// Absent for administrative actions (consent changes, mode changes).
    pub decision_id: Option<Uuid>,
    pub conversation_id: Option<Uuid>,
    /// Position within the decision's trail; 0 for administrative entries.
    pub seq: u64,
    /// What happened, e.g. "generated", "screened", "approved", "expired".
    pub action: String,
    pub actor: Actor,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Append-only writer and query surface over stored audit records.
pub struct AuditLog {
    db: Arc<dyn Database>,
    seqs: Mutex<HashMap<Uuid, u64>>,
}

impl AuditLog {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            seqs: Mutex::new(HashMap::new()),
        }
    }

    /// Append an entry to a decision's trail.
    ///
    /// The first record for a decision this process has not seen resumes
    /// from the highest stored sequence, so trails recovered after a restart
    /// stay totally ordered.
    pub async fn record(
        &self,
        decision_id: Uuid,
        conversation_id: Uuid,
        action: &str,
        actor: Actor,
        reason: Option<&str>,
    ) -> crate::Result<AuditRecord> {
        let seq = {
            let mut seqs = self.seqs.lock().await;
            let current = match seqs.get(&decision_id) {
                Some(n) => *n,
                None => self.db.max_audit_seq(decision_id).await?,
            };
            let seq = current + 1;
            seqs.insert(decision_id, seq);
            seq
        };
        let record = AuditRecord {
            id: Uuid::new_v4(),
            decision_id: Some(decision_id),
            conversation_id: Some(conversation_id),
            seq,
            action: action.to_string(),
            actor,
            reason: reason.map(str::to_string),
            at: Utc::now(),
        };
        self.db.insert_audit(&record).await?;
        debug!(decision_id = %decision_id, action, seq, "Audit record appended");
        Ok(record)
    }

    /// Append an administrative entry not tied to any decision.
    pub async fn record_admin(
        &self,
        conversation_id: Option<Uuid>,
        action: &str,
        actor: Actor,
        reason: Option<&str>,
    ) -> crate::Result<AuditRecord> {
        let record = AuditRecord {
            id: Uuid::new_v4(),
            decision_id: None,
            conversation_id,
            seq: 0,
            action: action.to_string(),
            actor,
            reason: reason.map(str::to_string),
            at: Utc::now(),
        };
        self.db.insert_audit(&record).await?;
        debug!(action, "Administrative audit record appended");
        Ok(record)
    }

    /// Forget sequence counters for a finished decision.
    pub async fn release(&self, decision_id: Uuid) {
        self.seqs.lock().await.remove(&decision_id);
    }

    pub async fn by_decision(&self, decision_id: Uuid) -> crate::Result<Vec<AuditRecord>> {
        Ok(self.db.audit_by_decision(decision_id).await?)
    }

    pub async fn by_conversation(&self, conversation_id: Uuid) -> crate::Result<Vec<AuditRecord>> {
        Ok(self.db.audit_by_conversation(conversation_id).await?)
    }

    pub async fn by_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> crate::Result<Vec<AuditRecord>> {
        Ok(self.db.audit_by_range(from, to).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    async fn log() -> AuditLog {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        AuditLog::new(db)
    }

    #[tokio::test]
    async fn sequence_is_monotonic_per_decision() {
        let log = log().await;
        let decision = Uuid::new_v4();
        let other = Uuid::new_v4();
        let conversation = Uuid::new_v4();

        let a = log
            .record(decision, conversation, "received", Actor::System, None)
            .await
            .unwrap();
        let b = log
            .record(decision, conversation, "generated", Actor::System, None)
            .await
            .unwrap();
        let c = log
            .record(other, conversation, "received", Actor::System, None)
            .await
            .unwrap();

        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
        assert_eq!(c.seq, 1);
    }

    #[tokio::test]
    async fn trail_is_queryable_in_order() {
        let log = log().await;
        let decision = Uuid::new_v4();
        let conversation = Uuid::new_v4();

        for action in ["received", "generated", "screened", "sent"] {
            log.record(decision, conversation, action, Actor::System, None)
                .await
                .unwrap();
        }

        let trail = log.by_decision(decision).await.unwrap();
        assert_eq!(trail.len(), 4);
        let actions: Vec<&str> = trail.iter().map(|r| r.action.as_str()).collect();
        assert_eq!(actions, ["received", "generated", "screened", "sent"]);
    }

    #[tokio::test]
    async fn sequence_resumes_after_restart() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let decision = Uuid::new_v4();
        let conversation = Uuid::new_v4();

        let log = AuditLog::new(Arc::clone(&db));
        log.record(decision, conversation, "received", Actor::System, None)
            .await
            .unwrap();
        log.record(decision, conversation, "pending_approval", Actor::System, None)
            .await
            .unwrap();

        // A fresh log over the same store models a process restart resolving
        // a recovered pending decision.
        let recovered = AuditLog::new(db);
        let record = recovered
            .record(
                decision,
                conversation,
                "approved",
                Actor::Human {
                    operator: "owner".into(),
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(record.seq, 3);

        let trail = recovered.by_decision(decision).await.unwrap();
        let seqs: Vec<u64> = trail.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, [1, 2, 3]);
        let actions: Vec<&str> = trail.iter().map(|r| r.action.as_str()).collect();
        assert_eq!(actions, ["received", "pending_approval", "approved"]);
    }

    #[tokio::test]
    async fn human_actions_carry_operator() {
        let log = log().await;
        let decision = Uuid::new_v4();
        let conversation = Uuid::new_v4();

        let record = log
            .record(
                decision,
                conversation,
                "approved",
                Actor::Human {
                    operator: "dashboard".into(),
                },
                Some("looks good"),
            )
            .await
            .unwrap();
        assert_eq!(record.actor.as_str(), "dashboard");

        let trail = log.by_conversation(conversation).await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].reason.as_deref(), Some("looks good"));
    }

    #[tokio::test]
    async fn admin_records_have_no_decision() {
        let log = log().await;
        let record = log
            .record_admin(
                None,
                "consent_granted",
                Actor::Human {
                    operator: "owner".into(),
                },
                Some("alice on telegram"),
            )
            .await
            .unwrap();
        assert!(record.decision_id.is_none());
        assert_eq!(record.seq, 0);
    }
}
