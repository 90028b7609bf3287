//! Conversation state tracking — the single source of truth for conversation
//! identity and the single-flight decision gate.
//!
//! A conversation is one contact on one channel. At most one decision is in
//! flight per conversation at any time; `try_begin_decision` enforces that by
//! transitioning the in-flight slot conditionally under a short write lock.
//! Nothing here holds a lock across an await.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::decision::DecisionState;
use crate::error::{EngineError, Error, Result};
use crate::profile::{Mood, SafetyMode};
use crate::store::Database;

// ── Contact & consent ───────────────────────────────────────────────

/// Per-contact consent for autonomous replies. Consent is per-contact, not
/// per-message, and is never bypassed by mood or safety mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    Unknown,
    Granted,
    Denied,
    Revoked,
}

impl ConsentStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "granted" => Self::Granted,
            "denied" => Self::Denied,
            "revoked" => Self::Revoked,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::Revoked => "revoked",
        }
    }
}

/// A counterpart in a conversation, identified per channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    /// Channel-native identity (email address, handle, chat id).
    pub id: String,
    pub channel: String,
    pub display_name: Option<String>,
    pub consent: ConsentStatus,
}

// ── Events ──────────────────────────────────────────────────────────

/// One inbound message unit, immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub id: Uuid,
    pub conversation_id: Uuid,
    /// Channel-native id, unique per channel; the replay-dedupe key.
    pub external_id: String,
    pub content: String,
    pub received_at: DateTime<Utc>,
}

// ── Conversation ────────────────────────────────────────────────────

/// Ongoing thread with one contact on one channel.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: Uuid,
    pub contact: Contact,
    /// Profile owner this conversation belongs to.
    pub user_id: String,
    pub last_activity: DateTime<Utc>,
    /// The one non-terminal decision, if any.
    pub in_flight: Option<Uuid>,
    pub mood_override: Option<Mood>,
    pub safety_override: Option<SafetyMode>,
    /// Events that arrived while a decision was in flight; context for the
    /// current (pre-generation) or next decision.
    pub queued: Vec<MessageEvent>,
}

/// Outcome of the single-flight gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginDecision {
    /// The slot was free; a decision id was minted and is now in flight.
    Started(Uuid),
    /// Another decision is in flight; the caller should attach the event.
    Busy { in_flight: Uuid },
}

// ── Tracker ─────────────────────────────────────────────────────────

/// Persisted conversation record, as stored in the database.
#[derive(Debug, Clone)]
pub struct StoredConversation {
    pub id: Uuid,
    pub channel: String,
    pub contact_id: String,
    pub user_id: String,
    pub last_activity: DateTime<Utc>,
    pub in_flight: Option<Uuid>,
    pub mood_override: Option<String>,
    pub safety_override: Option<String>,
}

struct Inner {
    /// (channel, contact id) -> conversation id.
    index: HashMap<(String, String), Uuid>,
    conversations: HashMap<Uuid, Conversation>,
}

/// Conversation state tracker with write-through persistence.
pub struct ConversationTracker {
    db: Arc<dyn Database>,
    inner: RwLock<Inner>,
    /// Serializes the create-if-absent path so two concurrent resolves for a
    /// new contact produce one conversation. Not on the hot path.
    create_lock: Mutex<()>,
}

impl ConversationTracker {
    pub fn new(db: Arc<dyn Database>) -> Arc<Self> {
        Arc::new(Self {
            db,
            inner: RwLock::new(Inner {
                index: HashMap::new(),
                conversations: HashMap::new(),
            }),
            create_lock: Mutex::new(()),
        })
    }

    /// Resolve (or create) the conversation for a contact on a channel.
    /// Updates last-activity.
    pub async fn resolve(
        &self,
        channel: &str,
        contact_id: &str,
        display_name: Option<&str>,
        user_id: &str,
    ) -> Result<Uuid> {
        let key = (channel.to_string(), contact_id.to_string());

        {
            let mut inner = self.inner.write().await;
            if let Some(&id) = inner.index.get(&key) {
                if let Some(conv) = inner.conversations.get_mut(&id) {
                    conv.last_activity = Utc::now();
                }
                return Ok(id);
            }
        }

        let _guard = self.create_lock.lock().await;
        // Re-check: another task may have created it while we waited.
        {
            let inner = self.inner.read().await;
            if let Some(&id) = inner.index.get(&key) {
                return Ok(id);
            }
        }

        if let Some(stored) = self.db.find_conversation(channel, contact_id).await? {
            let conv = self.hydrate(stored).await?;
            let id = conv.id;
            let mut inner = self.inner.write().await;
            inner.index.insert(key, id);
            inner.conversations.insert(id, conv);
            debug!(conversation_id = %id, channel, contact_id, "Conversation loaded from DB");
            return Ok(id);
        }

        // Consent may have been granted before the first message arrived.
        let stored_contact = self.db.get_contact(channel, contact_id).await?;
        let contact = Contact {
            id: contact_id.to_string(),
            channel: channel.to_string(),
            display_name: display_name
                .map(String::from)
                .or_else(|| stored_contact.as_ref().and_then(|c| c.display_name.clone())),
            consent: stored_contact
                .map(|c| c.consent)
                .unwrap_or(ConsentStatus::Unknown),
        };
        let conv = Conversation {
            id: Uuid::new_v4(),
            contact: contact.clone(),
            user_id: user_id.to_string(),
            last_activity: Utc::now(),
            in_flight: None,
            mood_override: None,
            safety_override: None,
            queued: Vec::new(),
        };
        self.db.upsert_contact(&contact).await?;
        self.db.insert_conversation(&conv).await?;

        let id = conv.id;
        {
            let mut inner = self.inner.write().await;
            inner.index.insert(key, id);
            inner.conversations.insert(id, conv);
        }
        info!(conversation_id = %id, channel, contact_id, "Conversation created");
        Ok(id)
    }

    /// Rebuild a runtime conversation from its stored form, clearing any
    /// in-flight reference whose decision already reached a terminal state.
    async fn hydrate(&self, stored: StoredConversation) -> Result<Conversation> {
        let contact = self
            .db
            .get_contact(&stored.channel, &stored.contact_id)
            .await?
            .unwrap_or(Contact {
                id: stored.contact_id.clone(),
                channel: stored.channel.clone(),
                display_name: None,
                consent: ConsentStatus::Unknown,
            });

        let mut in_flight = stored.in_flight;
        if let Some(decision_id) = in_flight {
            let terminal = match self.db.get_decision(decision_id).await? {
                Some(decision) => decision.state.is_terminal(),
                None => true,
            };
            if terminal {
                in_flight = None;
            }
        }

        Ok(Conversation {
            id: stored.id,
            contact,
            user_id: stored.user_id,
            last_activity: stored.last_activity,
            in_flight,
            mood_override: stored.mood_override.as_deref().map(Mood::parse),
            safety_override: stored.safety_override.as_deref().map(SafetyMode::parse),
            queued: Vec::new(),
        })
    }

    /// The single-flight gate: mint a decision id if the conversation has no
    /// non-terminal decision, otherwise report the in-flight one.
    pub async fn try_begin_decision(
        &self,
        conversation_id: Uuid,
        event_id: Uuid,
    ) -> Result<BeginDecision> {
        let (outcome, last_activity) = {
            let mut inner = self.inner.write().await;
            let conv = inner
                .conversations
                .get_mut(&conversation_id)
                .ok_or(Error::Engine(EngineError::ConversationNotFound(
                    conversation_id,
                )))?;
            conv.last_activity = Utc::now();
            let outcome = match conv.in_flight {
                Some(in_flight) => BeginDecision::Busy { in_flight },
                None => {
                    let decision_id = Uuid::new_v4();
                    conv.in_flight = Some(decision_id);
                    BeginDecision::Started(decision_id)
                }
            };
            (outcome, conv.last_activity)
        };

        match outcome {
            BeginDecision::Started(decision_id) => {
                self.db
                    .update_conversation_flight(conversation_id, Some(decision_id), last_activity)
                    .await?;
                debug!(
                    conversation_id = %conversation_id,
                    decision_id = %decision_id,
                    event_id = %event_id,
                    "Decision started"
                );
            }
            BeginDecision::Busy { in_flight } => {
                self.db
                    .update_conversation_flight(conversation_id, Some(in_flight), last_activity)
                    .await?;
                debug!(
                    conversation_id = %conversation_id,
                    in_flight = %in_flight,
                    event_id = %event_id,
                    "Conversation busy"
                );
            }
        }
        Ok(outcome)
    }

    /// Release the single-flight slot once a decision reaches a terminal
    /// state. A no-op if the decision is not the one in flight.
    pub async fn complete_decision(
        &self,
        decision_id: Uuid,
        terminal_state: DecisionState,
    ) -> Result<()> {
        debug_assert!(terminal_state.is_terminal());
        let released = {
            let mut inner = self.inner.write().await;
            let conv = inner
                .conversations
                .values_mut()
                .find(|c| c.in_flight == Some(decision_id));
            match conv {
                Some(conv) => {
                    conv.in_flight = None;
                    conv.last_activity = Utc::now();
                    Some((conv.id, conv.last_activity))
                }
                None => None,
            }
        };

        if let Some((conversation_id, last_activity)) = released {
            self.db
                .update_conversation_flight(conversation_id, None, last_activity)
                .await?;
            debug!(
                conversation_id = %conversation_id,
                decision_id = %decision_id,
                state = terminal_state.as_str(),
                "Decision completed"
            );
        }
        Ok(())
    }

    /// Queue an event as context while a decision is in flight.
    pub async fn attach_event(&self, conversation_id: Uuid, event: MessageEvent) -> Result<()> {
        let mut inner = self.inner.write().await;
        let conv = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(Error::Engine(EngineError::ConversationNotFound(
                conversation_id,
            )))?;
        conv.last_activity = Utc::now();
        conv.queued.push(event);
        Ok(())
    }

    /// Drain queued context events for a decision's context build.
    pub async fn drain_queued(&self, conversation_id: Uuid) -> Vec<MessageEvent> {
        let mut inner = self.inner.write().await;
        inner
            .conversations
            .get_mut(&conversation_id)
            .map(|c| std::mem::take(&mut c.queued))
            .unwrap_or_default()
    }

    /// Snapshot of a conversation's current state, loading it from storage
    /// if it is not yet in memory (e.g. after a restart).
    pub async fn get(&self, conversation_id: Uuid) -> Result<Conversation> {
        if let Some(conv) = self
            .inner
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .cloned()
        {
            return Ok(conv);
        }

        let stored = self
            .db
            .get_conversation(conversation_id)
            .await?
            .ok_or(Error::Engine(EngineError::ConversationNotFound(
                conversation_id,
            )))?;
        let conv = self.hydrate(stored).await?;
        let key = (conv.contact.channel.clone(), conv.contact.id.clone());
        let mut inner = self.inner.write().await;
        inner.index.insert(key, conv.id);
        inner.conversations.insert(conv.id, conv.clone());
        Ok(conv)
    }

    /// Update a contact's consent. The caller is responsible for auditing.
    pub async fn set_consent(
        &self,
        channel: &str,
        contact_id: &str,
        status: ConsentStatus,
    ) -> Result<Contact> {
        let contact = {
            let mut inner = self.inner.write().await;
            let key = (channel.to_string(), contact_id.to_string());
            let conv_id = inner.index.get(&key).copied();
            match conv_id.and_then(|id| inner.conversations.get_mut(&id)) {
                Some(conv) => {
                    conv.contact.consent = status;
                    conv.contact.clone()
                }
                None => Contact {
                    id: contact_id.to_string(),
                    channel: channel.to_string(),
                    display_name: None,
                    consent: status,
                },
            }
        };
        self.db.upsert_contact(&contact).await?;
        info!(channel, contact_id, consent = status.as_str(), "Consent updated");
        Ok(contact)
    }

    /// Set or clear a per-conversation mood override.
    pub async fn set_mood_override(
        &self,
        conversation_id: Uuid,
        mood: Option<Mood>,
    ) -> Result<()> {
        self.get(conversation_id).await?;
        {
            let mut inner = self.inner.write().await;
            let conv = inner
                .conversations
                .get_mut(&conversation_id)
                .ok_or(Error::Engine(EngineError::ConversationNotFound(
                    conversation_id,
                )))?;
            conv.mood_override = mood;
        }
        self.db
            .update_conversation_mood(conversation_id, mood)
            .await?;
        info!(
            conversation_id = %conversation_id,
            mood = mood.map(|m| m.as_str()).unwrap_or("cleared"),
            "Mood override updated"
        );
        Ok(())
    }

    /// Set or clear a per-conversation safety mode override.
    pub async fn set_safety_override(
        &self,
        conversation_id: Uuid,
        mode: Option<SafetyMode>,
    ) -> Result<()> {
        self.get(conversation_id).await?;
        {
            let mut inner = self.inner.write().await;
            let conv = inner
                .conversations
                .get_mut(&conversation_id)
                .ok_or(Error::Engine(EngineError::ConversationNotFound(
                    conversation_id,
                )))?;
            conv.safety_override = mode;
        }
        self.db
            .update_conversation_safety(conversation_id, mode)
            .await?;
        info!(
            conversation_id = %conversation_id,
            mode = mode.map(|m| m.as_str()).unwrap_or("cleared"),
            "Safety override updated"
        );
        Ok(())
    }
}
