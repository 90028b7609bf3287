//! Database abstraction.
//!
//! One trait covers everything the engine persists: profiles, contacts,
//! conversations, message events, decisions, approval requests and audit
//! records. The libSQL backend is the only production implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::approval::ApprovalRequest;
use crate::audit::AuditRecord;
use crate::conversation::{Contact, Conversation, MessageEvent, StoredConversation};
use crate::engine::decision::Decision;
use crate::error::DatabaseError;
use crate::profile::ProfileRecord;

#[async_trait]
pub trait Database: Send + Sync {
    /// Create or migrate the schema.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Profiles ────────────────────────────────────────────────────

    async fn get_profile(&self, user_id: &str) -> Result<Option<ProfileRecord>, DatabaseError>;

    async fn upsert_profile(&self, record: &ProfileRecord) -> Result<(), DatabaseError>;

    // ── Contacts ────────────────────────────────────────────────────

    async fn get_contact(
        &self,
        channel: &str,
        contact_id: &str,
    ) -> Result<Option<Contact>, DatabaseError>;

    async fn upsert_contact(&self, contact: &Contact) -> Result<(), DatabaseError>;

    // ── Conversations ───────────────────────────────────────────────

    async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), DatabaseError>;

    async fn find_conversation(
        &self,
        channel: &str,
        contact_id: &str,
    ) -> Result<Option<StoredConversation>, DatabaseError>;

    async fn get_conversation(&self, id: Uuid)
    -> Result<Option<StoredConversation>, DatabaseError>;

    async fn update_conversation_flight(
        &self,
        id: Uuid,
        in_flight: Option<Uuid>,
        last_activity: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    async fn update_conversation_mood(
        &self,
        id: Uuid,
        mood: Option<crate::profile::Mood>,
    ) -> Result<(), DatabaseError>;

    async fn update_conversation_safety(
        &self,
        id: Uuid,
        mode: Option<crate::profile::SafetyMode>,
    ) -> Result<(), DatabaseError>;

    // ── Message events ──────────────────────────────────────────────

    /// Record an inbound event. `channel` plus the event's external id form
    /// the duplicate-delivery key.
    async fn insert_event(&self, channel: &str, event: &MessageEvent)
    -> Result<(), DatabaseError>;

    async fn get_event_by_external_id(
        &self,
        channel: &str,
        external_id: &str,
    ) -> Result<Option<MessageEvent>, DatabaseError>;

    /// Most recent events for a conversation, oldest first.
    async fn recent_events(
        &self,
        conversation_id: Uuid,
        limit: u32,
    ) -> Result<Vec<MessageEvent>, DatabaseError>;

    // ── Decisions ───────────────────────────────────────────────────

    async fn insert_decision(&self, decision: &Decision) -> Result<(), DatabaseError>;

    async fn update_decision(&self, decision: &Decision) -> Result<(), DatabaseError>;

    async fn get_decision(&self, id: Uuid) -> Result<Option<Decision>, DatabaseError>;

    // ── Approval requests ───────────────────────────────────────────

    async fn insert_approval(&self, request: &ApprovalRequest) -> Result<(), DatabaseError>;

    async fn update_approval(&self, request: &ApprovalRequest) -> Result<(), DatabaseError>;

    async fn get_pending_approvals(&self) -> Result<Vec<ApprovalRequest>, DatabaseError>;

    // ── Audit ───────────────────────────────────────────────────────

    async fn insert_audit(&self, record: &AuditRecord) -> Result<(), DatabaseError>;

    /// Highest stored sequence number for a decision's trail; 0 when the
    /// decision has no records yet.
    async fn max_audit_seq(&self, decision_id: Uuid) -> Result<u64, DatabaseError>;

    async fn audit_by_decision(&self, decision_id: Uuid)
    -> Result<Vec<AuditRecord>, DatabaseError>;

    async fn audit_by_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<AuditRecord>, DatabaseError>;

    async fn audit_by_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<AuditRecord>, DatabaseError>;
}
