//! Channel abstraction for message I/O.

pub mod local;

pub use local::LocalChannel;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// An inbound message from a contact on some channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub channel: String,
    /// Channel-native contact identifier.
    pub contact_id: String,
    pub display_name: Option<String>,
    /// Channel-native message id, used for duplicate delivery detection.
    pub external_id: String,
    pub content: String,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(
        channel: impl Into<String>,
        contact_id: impl Into<String>,
        external_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            contact_id: contact_id.into(),
            display_name: None,
            external_id: external_id.into(),
            content: content.into(),
            received_at: Utc::now(),
        }
    }
}

/// Outcome of a send attempt. `Retryable` failures are retried with backoff;
/// `Terminal` failures discard the decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Retryable { reason: String },
    Terminal { reason: String },
}

/// Stream of inbound events from a channel.
pub type EventStream = Pin<Box<dyn Stream<Item = InboundEvent> + Send>>;

/// A messaging channel the twin can receive from and send through.
#[async_trait]
pub trait ChannelAdapter: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Start receiving. May only be called once per adapter; the stream ends
    /// when the channel disconnects.
    async fn start(&self) -> Result<EventStream, ChannelError>;

    /// Deliver a reply to a contact. Infrastructure failures map to
    /// `Retryable`, channel rejections to `Terminal`.
    async fn send(&self, contact_id: &str, text: &str) -> Result<SendOutcome, ChannelError>;
}

/// Registry of channel adapters keyed by name.
pub struct ChannelManager {
    adapters: HashMap<String, Arc<dyn ChannelAdapter>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ChannelAdapter>, ChannelError> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| ChannelError::NotRegistered(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct NullChannel;

    #[async_trait]
    impl ChannelAdapter for NullChannel {
        fn name(&self) -> &str {
            "null"
        }

        async fn start(&self) -> Result<EventStream, ChannelError> {
            Ok(Box::pin(futures::stream::empty()))
        }

        async fn send(&self, _contact_id: &str, _text: &str) -> Result<SendOutcome, ChannelError> {
            Ok(SendOutcome::Sent)
        }
    }

    #[tokio::test]
    async fn manager_resolves_registered_adapters() {
        let mut manager = ChannelManager::new();
        manager.register(Arc::new(NullChannel));

        let adapter = manager.get("null").unwrap();
        assert_eq!(adapter.name(), "null");

        let err = manager.get("telegram").unwrap_err();
        assert!(matches!(err, ChannelError::NotRegistered(_)));
    }
}
