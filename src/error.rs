//! Error types for MirrorMe.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DatabaseError {
    fn from(e: serde_json::Error) -> Self {
        DatabaseError::Serialization(e.to_string())
    }
}

/// Channel adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("No adapter registered for channel {0}")]
    NotRegistered(String),

    #[error("Send failed on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },
}

/// Generation service errors.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Generation request failed: {0}")]
    RequestFailed(String),

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid response from generation service: {0}")]
    InvalidResponse(String),

    #[error("Generation unavailable after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

/// Personality profile errors. A missing or corrupt profile refuses the
/// decision outright — there is no generic fallback profile.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("No personality profile for user {0}")]
    NotFound(String),

    #[error("Corrupt personality profile for user {user_id}: {reason}")]
    Corrupt { user_id: String, reason: String },

    #[error("Invalid redline rule {id}: {reason}")]
    InvalidRule { id: String, reason: String },
}

/// Approval queue errors.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("Approval request {0} not found")]
    NotFound(Uuid),

    #[error("Approval request {0} already resolved")]
    AlreadyResolved(Uuid),

    #[error("Approval request {0} has no candidate text; edit or deny")]
    NothingToSend(Uuid),
}

/// Decision engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Decision {id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: &'static str,
        to: &'static str,
    },

    #[error("Decision {0} not found")]
    DecisionNotFound(Uuid),

    #[error("Conversation {0} not found")]
    ConversationNotFound(Uuid),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
