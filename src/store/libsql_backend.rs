//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. All timestamps are stored as
//! RFC 3339 text; enums are stored as their canonical string forms.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::approval::{ApprovalRequest, ApprovalStatus};
use crate::audit::{Actor, AuditRecord};
use crate::conversation::{ConsentStatus, Contact, Conversation, MessageEvent, StoredConversation};
use crate::engine::decision::{Decision, DecisionState};
use crate::error::DatabaseError;
use crate::profile::{Mood, ProfileRecord, SafetyMode};
use crate::safety::Verdict;
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<String>` to libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn row_to_event(row: &libsql::Row) -> Result<MessageEvent, libsql::Error> {
    let id: String = row.get(0)?;
    let conversation_id: String = row.get(1)?;
    let external_id: String = row.get(3)?;
    let content: String = row.get(4)?;
    let received_str: String = row.get(5)?;
    Ok(MessageEvent {
        id: parse_uuid(&id),
        conversation_id: parse_uuid(&conversation_id),
        external_id,
        content,
        received_at: parse_datetime(&received_str),
    })
}

fn row_to_decision(row: &libsql::Row) -> Result<Decision, libsql::Error> {
    let id: String = row.get(0)?;
    let conversation_id: String = row.get(1)?;
    let event_id: String = row.get(2)?;
    let state_str: String = row.get(3)?;
    let mood_str: String = row.get(4)?;
    let candidate: Option<String> = row.get(5).ok();
    let verdict_str: Option<String> = row.get(6).ok();
    let reason: Option<String> = row.get(7).ok();
    let created_str: String = row.get(8)?;
    let updated_str: String = row.get(9)?;

    let verdict: Option<Verdict> =
        verdict_str.and_then(|s| serde_json::from_str(&s).ok());

    Ok(Decision {
        id: parse_uuid(&id),
        conversation_id: parse_uuid(&conversation_id),
        event_id: parse_uuid(&event_id),
        state: DecisionState::parse(&state_str),
        mood: Mood::parse(&mood_str),
        candidate,
        verdict,
        reason,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_approval(row: &libsql::Row) -> Result<ApprovalRequest, libsql::Error> {
    let id: String = row.get(0)?;
    let decision_id: String = row.get(1)?;
    let conversation_id: String = row.get(2)?;
    let candidate: Option<String> = row.get(3).ok();
    let reason: String = row.get(4)?;
    let status_str: String = row.get(5)?;
    let deadline_str: String = row.get(6)?;
    let created_str: String = row.get(7)?;
    let updated_str: String = row.get(8)?;

    Ok(ApprovalRequest {
        id: parse_uuid(&id),
        decision_id: parse_uuid(&decision_id),
        conversation_id: parse_uuid(&conversation_id),
        candidate,
        reason,
        status: ApprovalStatus::parse(&status_str),
        deadline: parse_datetime(&deadline_str),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_audit(row: &libsql::Row) -> Result<AuditRecord, libsql::Error> {
    let id: String = row.get(0)?;
    let decision_id: Option<String> = row.get(1).ok();
    let conversation_id: Option<String> = row.get(2).ok();
    let seq: i64 = row.get(3)?;
    let action: String = row.get(4)?;
    let actor_str: String = row.get(5)?;
    let reason: Option<String> = row.get(6).ok();
    let at_str: String = row.get(7)?;

    Ok(AuditRecord {
        id: parse_uuid(&id),
        decision_id: decision_id.as_deref().map(parse_uuid),
        conversation_id: conversation_id.as_deref().map(parse_uuid),
        seq: seq as u64,
        action,
        actor: Actor::parse(&actor_str),
        reason,
        at: parse_datetime(&at_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const EVENT_COLUMNS: &str = "id, conversation_id, channel, external_id, content, received_at";

const DECISION_COLUMNS: &str =
    "id, conversation_id, event_id, state, mood, candidate, verdict, reason, created_at, updated_at";

const APPROVAL_COLUMNS: &str =
    "id, decision_id, conversation_id, candidate, reason, status, deadline, created_at, updated_at";

const AUDIT_COLUMNS: &str =
    "id, decision_id, conversation_id, seq, action, actor, reason, at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Profiles ────────────────────────────────────────────────────

    async fn get_profile(&self, user_id: &str) -> Result<Option<ProfileRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT user_id, default_mood, redlines, style, updated_at
                 FROM profiles WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_profile: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let user_id: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("get_profile row: {e}")))?;
                let mood_str: String = row
                    .get(1)
                    .map_err(|e| DatabaseError::Query(format!("get_profile row: {e}")))?;
                let redlines_str: String = row
                    .get(2)
                    .map_err(|e| DatabaseError::Query(format!("get_profile row: {e}")))?;
                let style_str: String = row
                    .get(3)
                    .map_err(|e| DatabaseError::Query(format!("get_profile row: {e}")))?;
                let updated_str: String = row
                    .get(4)
                    .map_err(|e| DatabaseError::Query(format!("get_profile row: {e}")))?;

                Ok(Some(ProfileRecord {
                    user_id,
                    default_mood: Mood::parse(&mood_str),
                    redlines: serde_json::from_str(&redlines_str)?,
                    style: serde_json::from_str(&style_str)?,
                    updated_at: parse_datetime(&updated_str),
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_profile: {e}"))),
        }
    }

    async fn upsert_profile(&self, record: &ProfileRecord) -> Result<(), DatabaseError> {
        let redlines = serde_json::to_string(&record.redlines)?;
        let style = serde_json::to_string(&record.style)?;
        self.conn()
            .execute(
                "INSERT INTO profiles (user_id, default_mood, redlines, style, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id) DO UPDATE SET
                     default_mood = excluded.default_mood,
                     redlines = excluded.redlines,
                     style = excluded.style,
                     updated_at = excluded.updated_at",
                params![
                    record.user_id.clone(),
                    record.default_mood.as_str(),
                    redlines,
                    style,
                    record.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_profile: {e}")))?;
        debug!(user_id = %record.user_id, "Profile persisted");
        Ok(())
    }

    // ── Contacts ────────────────────────────────────────────────────

    async fn get_contact(
        &self,
        channel: &str,
        contact_id: &str,
    ) -> Result<Option<Contact>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT channel, contact_id, display_name, consent
                 FROM contacts WHERE channel = ?1 AND contact_id = ?2",
                params![channel, contact_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_contact: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let channel: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("get_contact row: {e}")))?;
                let id: String = row
                    .get(1)
                    .map_err(|e| DatabaseError::Query(format!("get_contact row: {e}")))?;
                let display_name: Option<String> = row.get(2).ok();
                let consent_str: String = row
                    .get(3)
                    .map_err(|e| DatabaseError::Query(format!("get_contact row: {e}")))?;
                Ok(Some(Contact {
                    id,
                    channel,
                    display_name,
                    consent: ConsentStatus::parse(&consent_str),
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_contact: {e}"))),
        }
    }

    async fn upsert_contact(&self, contact: &Contact) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO contacts (channel, contact_id, display_name, consent)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(channel, contact_id) DO UPDATE SET
                     display_name = COALESCE(excluded.display_name, display_name),
                     consent = excluded.consent",
                params![
                    contact.channel.clone(),
                    contact.id.clone(),
                    opt_text(contact.display_name.as_deref()),
                    contact.consent.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_contact: {e}")))?;
        Ok(())
    }

    // ── Conversations ───────────────────────────────────────────────

    async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO conversations
                 (id, channel, contact_id, user_id, last_activity, in_flight,
                  mood_override, safety_override)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    conversation.id.to_string(),
                    conversation.contact.channel.clone(),
                    conversation.contact.id.clone(),
                    conversation.user_id.clone(),
                    conversation.last_activity.to_rfc3339(),
                    opt_text_owned(conversation.in_flight.map(|u| u.to_string())),
                    opt_text(conversation.mood_override.map(|m| m.as_str())),
                    opt_text(conversation.safety_override.map(|m| m.as_str())),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_conversation: {e}")))?;
        Ok(())
    }

    async fn find_conversation(
        &self,
        channel: &str,
        contact_id: &str,
    ) -> Result<Option<StoredConversation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, channel, contact_id, user_id, last_activity, in_flight,
                        mood_override, safety_override
                 FROM conversations WHERE channel = ?1 AND contact_id = ?2",
                params![channel, contact_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_conversation: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let id: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("find_conversation row: {e}")))?;
                let channel: String = row
                    .get(1)
                    .map_err(|e| DatabaseError::Query(format!("find_conversation row: {e}")))?;
                let contact_id: String = row
                    .get(2)
                    .map_err(|e| DatabaseError::Query(format!("find_conversation row: {e}")))?;
                let user_id: String = row
                    .get(3)
                    .map_err(|e| DatabaseError::Query(format!("find_conversation row: {e}")))?;
                let last_activity: String = row
                    .get(4)
                    .map_err(|e| DatabaseError::Query(format!("find_conversation row: {e}")))?;
                let in_flight: Option<String> = row.get(5).ok();
                let mood_override: Option<String> = row.get(6).ok();
                let safety_override: Option<String> = row.get(7).ok();

                Ok(Some(StoredConversation {
                    id: parse_uuid(&id),
                    channel,
                    contact_id,
                    user_id,
                    last_activity: parse_datetime(&last_activity),
                    in_flight: in_flight.as_deref().map(parse_uuid),
                    mood_override,
                    safety_override,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_conversation: {e}"))),
        }
    }

    async fn get_conversation(
        &self,
        id: Uuid,
    ) -> Result<Option<StoredConversation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, channel, contact_id, user_id, last_activity, in_flight,
                        mood_override, safety_override
                 FROM conversations WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_conversation: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let id: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("get_conversation row: {e}")))?;
                let channel: String = row
                    .get(1)
                    .map_err(|e| DatabaseError::Query(format!("get_conversation row: {e}")))?;
                let contact_id: String = row
                    .get(2)
                    .map_err(|e| DatabaseError::Query(format!("get_conversation row: {e}")))?;
                let user_id: String = row
                    .get(3)
                    .map_err(|e| DatabaseError::Query(format!("get_conversation row: {e}")))?;
                let last_activity: String = row
                    .get(4)
                    .map_err(|e| DatabaseError::Query(format!("get_conversation row: {e}")))?;
                let in_flight: Option<String> = row.get(5).ok();
                let mood_override: Option<String> = row.get(6).ok();
                let safety_override: Option<String> = row.get(7).ok();

                Ok(Some(StoredConversation {
                    id: parse_uuid(&id),
                    channel,
                    contact_id,
                    user_id,
                    last_activity: parse_datetime(&last_activity),
                    in_flight: in_flight.as_deref().map(parse_uuid),
                    mood_override,
                    safety_override,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_conversation: {e}"))),
        }
    }

    async fn update_conversation_flight(
        &self,
        id: Uuid,
        in_flight: Option<Uuid>,
        last_activity: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE conversations SET in_flight = ?1, last_activity = ?2 WHERE id = ?3",
                params![
                    opt_text_owned(in_flight.map(|u| u.to_string())),
                    last_activity.to_rfc3339(),
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_conversation_flight: {e}")))?;
        Ok(())
    }

    async fn update_conversation_mood(
        &self,
        id: Uuid,
        mood: Option<Mood>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE conversations SET mood_override = ?1 WHERE id = ?2",
                params![opt_text(mood.map(|m| m.as_str())), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_conversation_mood: {e}")))?;
        Ok(())
    }

    async fn update_conversation_safety(
        &self,
        id: Uuid,
        mode: Option<SafetyMode>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE conversations SET safety_override = ?1 WHERE id = ?2",
                params![opt_text(mode.map(|m| m.as_str())), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_conversation_safety: {e}")))?;
        Ok(())
    }

    // ── Message events ──────────────────────────────────────────────

    async fn insert_event(
        &self,
        channel: &str,
        event: &MessageEvent,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO message_events
                 (id, conversation_id, channel, external_id, content, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.id.to_string(),
                    event.conversation_id.to_string(),
                    channel,
                    event.external_id.clone(),
                    event.content.clone(),
                    event.received_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("UNIQUE") {
                    DatabaseError::Constraint(format!(
                        "duplicate event {} on {channel}",
                        event.external_id
                    ))
                } else {
                    DatabaseError::Query(format!("insert_event: {msg}"))
                }
            })?;
        Ok(())
    }

    async fn get_event_by_external_id(
        &self,
        channel: &str,
        external_id: &str,
    ) -> Result<Option<MessageEvent>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM message_events
                     WHERE channel = ?1 AND external_id = ?2"
                ),
                params![channel, external_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_event_by_external_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let event = row_to_event(&row).map_err(|e| {
                    DatabaseError::Query(format!("get_event_by_external_id row: {e}"))
                })?;
                Ok(Some(event))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!(
                "get_event_by_external_id: {e}"
            ))),
        }
    }

    async fn recent_events(
        &self,
        conversation_id: Uuid,
        limit: u32,
    ) -> Result<Vec<MessageEvent>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM (
                         SELECT * FROM message_events
                         WHERE conversation_id = ?1
                         ORDER BY received_at DESC LIMIT ?2
                     ) ORDER BY received_at ASC"
                ),
                params![conversation_id.to_string(), limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_events: {e}")))?;

        let mut events = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            events.push(
                row_to_event(&row)
                    .map_err(|e| DatabaseError::Query(format!("recent_events row: {e}")))?,
            );
        }
        Ok(events)
    }

    // ── Decisions ───────────────────────────────────────────────────

    async fn insert_decision(&self, decision: &Decision) -> Result<(), DatabaseError> {
        let verdict = decision
            .verdict
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO decisions ({DECISION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    decision.id.to_string(),
                    decision.conversation_id.to_string(),
                    decision.event_id.to_string(),
                    decision.state.as_str(),
                    decision.mood.as_str(),
                    opt_text(decision.candidate.as_deref()),
                    opt_text_owned(verdict),
                    opt_text(decision.reason.as_deref()),
                    decision.created_at.to_rfc3339(),
                    decision.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_decision: {e}")))?;
        Ok(())
    }

    async fn update_decision(&self, decision: &Decision) -> Result<(), DatabaseError> {
        let verdict = decision
            .verdict
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn()
            .execute(
                "UPDATE decisions SET state = ?1, mood = ?2, candidate = ?3, verdict = ?4,
                        reason = ?5, updated_at = ?6
                 WHERE id = ?7",
                params![
                    decision.state.as_str(),
                    decision.mood.as_str(),
                    opt_text(decision.candidate.as_deref()),
                    opt_text_owned(verdict),
                    opt_text(decision.reason.as_deref()),
                    decision.updated_at.to_rfc3339(),
                    decision.id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_decision: {e}")))?;
        debug!(decision_id = %decision.id, state = decision.state.as_str(), "Decision persisted");
        Ok(())
    }

    async fn get_decision(&self, id: Uuid) -> Result<Option<Decision>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {DECISION_COLUMNS} FROM decisions WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_decision: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let decision = row_to_decision(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_decision row: {e}")))?;
                Ok(Some(decision))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_decision: {e}"))),
        }
    }

    // ── Approval requests ───────────────────────────────────────────

    async fn insert_approval(&self, request: &ApprovalRequest) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO approval_requests ({APPROVAL_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    request.id.to_string(),
                    request.decision_id.to_string(),
                    request.conversation_id.to_string(),
                    opt_text(request.candidate.as_deref()),
                    request.reason.clone(),
                    request.status.as_str(),
                    request.deadline.to_rfc3339(),
                    request.created_at.to_rfc3339(),
                    request.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_approval: {e}")))?;
        Ok(())
    }

    async fn update_approval(&self, request: &ApprovalRequest) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE approval_requests SET candidate = ?1, status = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![
                    opt_text(request.candidate.as_deref()),
                    request.status.as_str(),
                    request.updated_at.to_rfc3339(),
                    request.id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_approval: {e}")))?;
        Ok(())
    }

    async fn get_pending_approvals(&self) -> Result<Vec<ApprovalRequest>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {APPROVAL_COLUMNS} FROM approval_requests
                     WHERE status = 'pending' ORDER BY created_at ASC"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_pending_approvals: {e}")))?;

        let mut requests = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            requests.push(
                row_to_approval(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_pending_approvals row: {e}")))?,
            );
        }
        Ok(requests)
    }

    // ── Audit ───────────────────────────────────────────────────────

    async fn insert_audit(&self, record: &AuditRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO audit_records ({AUDIT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    record.id.to_string(),
                    opt_text_owned(record.decision_id.map(|u| u.to_string())),
                    opt_text_owned(record.conversation_id.map(|u| u.to_string())),
                    record.seq as i64,
                    record.action.clone(),
                    record.actor.as_str().to_string(),
                    opt_text(record.reason.as_deref()),
                    record.at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_audit: {e}")))?;
        Ok(())
    }

    async fn max_audit_seq(&self, decision_id: Uuid) -> Result<u64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COALESCE(MAX(seq), 0) FROM audit_records WHERE decision_id = ?1",
                params![decision_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("max_audit_seq: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let max: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("max_audit_seq row: {e}")))?;
                Ok(max as u64)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("max_audit_seq: {e}"))),
        }
    }

    async fn audit_by_decision(
        &self,
        decision_id: Uuid,
    ) -> Result<Vec<AuditRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {AUDIT_COLUMNS} FROM audit_records
                     WHERE decision_id = ?1 ORDER BY seq ASC"
                ),
                params![decision_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("audit_by_decision: {e}")))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            records.push(
                row_to_audit(&row)
                    .map_err(|e| DatabaseError::Query(format!("audit_by_decision row: {e}")))?,
            );
        }
        Ok(records)
    }

    async fn audit_by_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<AuditRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {AUDIT_COLUMNS} FROM audit_records
                     WHERE conversation_id = ?1 ORDER BY at ASC, seq ASC"
                ),
                params![conversation_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("audit_by_conversation: {e}")))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            records.push(
                row_to_audit(&row)
                    .map_err(|e| DatabaseError::Query(format!("audit_by_conversation row: {e}")))?,
            );
        }
        Ok(records)
    }

    async fn audit_by_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {AUDIT_COLUMNS} FROM audit_records
                     WHERE at >= ?1 AND at <= ?2 ORDER BY at ASC"
                ),
                params![from.to_rfc3339(), to.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("audit_by_range: {e}")))?;

        let mut records = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            records.push(
                row_to_audit(&row)
                    .map_err(|e| DatabaseError::Query(format!("audit_by_range row: {e}")))?,
            );
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::default_redlines;

    async fn backend() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    #[tokio::test]
    async fn profile_round_trip() {
        let db = backend().await;
        assert!(db.get_profile("owner").await.unwrap().is_none());

        let mut record = ProfileRecord::bootstrap("owner");
        record.default_mood = Mood::Casual;
        db.upsert_profile(&record).await.unwrap();

        let loaded = db.get_profile("owner").await.unwrap().unwrap();
        assert_eq!(loaded.default_mood, Mood::Casual);
        assert_eq!(loaded.redlines.len(), default_redlines().len());
    }

    #[tokio::test]
    async fn duplicate_event_hits_constraint() {
        let db = backend().await;
        let event = MessageEvent {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            external_id: "tg-42".into(),
            content: "hi".into(),
            received_at: Utc::now(),
        };
        db.insert_event("telegram", &event).await.unwrap();

        let replay = MessageEvent {
            id: Uuid::new_v4(),
            ..event.clone()
        };
        let err = db.insert_event("telegram", &replay).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));

        // Same external id on a different channel is a distinct event.
        db.insert_event("email", &replay).await.unwrap();
    }

    #[tokio::test]
    async fn decision_round_trip_preserves_verdict() {
        let db = backend().await;
        let mut decision = Decision::new(Uuid::new_v4(), Uuid::new_v4(), Mood::Savage);
        decision.candidate = Some("lol no".into());
        decision.verdict = Some(Verdict::Block {
            reason: "redline: term-password".into(),
        });
        decision.state = DecisionState::Received;
        db.insert_decision(&decision).await.unwrap();

        decision.transition(DecisionState::ContextBuilt).unwrap();
        db.update_decision(&decision).await.unwrap();

        let loaded = db.get_decision(decision.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, DecisionState::ContextBuilt);
        assert_eq!(loaded.mood, Mood::Savage);
        assert_eq!(
            loaded.verdict,
            Some(Verdict::Block {
                reason: "redline: term-password".into()
            })
        );
    }

    #[tokio::test]
    async fn recent_events_ordered_oldest_first() {
        let db = backend().await;
        let conversation_id = Uuid::new_v4();
        for (i, content) in ["first", "second", "third"].iter().enumerate() {
            let event = MessageEvent {
                id: Uuid::new_v4(),
                conversation_id,
                external_id: format!("m-{i}"),
                content: content.to_string(),
                received_at: Utc::now() + chrono::Duration::seconds(i as i64),
            };
            db.insert_event("telegram", &event).await.unwrap();
        }

        let events = db.recent_events(conversation_id, 2).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].content, "second");
        assert_eq!(events[1].content, "third");
    }
}
