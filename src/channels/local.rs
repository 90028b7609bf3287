//! Local channel — stdin-driven adapter for development and demos.
//!
//! Input lines have the form `<contact_id>: <message>`. Replies print to
//! stdout. Useful for exercising the whole decision path without a real
//! messenger attached.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::error;
use uuid::Uuid;

use crate::channels::{ChannelAdapter, EventStream, InboundEvent, SendOutcome};
use crate::error::ChannelError;

#[derive(Debug)]
pub struct LocalChannel {
    started: Mutex<bool>,
}

impl LocalChannel {
    pub fn new() -> Self {
        Self {
            started: Mutex::new(false),
        }
    }
}

impl Default for LocalChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelAdapter for LocalChannel {
    fn name(&self) -> &str {
        "local"
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let mut started = self.started.lock().await;
        if *started {
            return Err(ChannelError::SendFailed {
                name: "local".into(),
                reason: "already started".into(),
            });
        }
        *started = true;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            eprint!("> ");
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            eprint!("> ");
                            continue;
                        }
                        let (contact, content) = match line.split_once(':') {
                            Some((c, m)) => (c.trim().to_string(), m.trim().to_string()),
                            None => ("local-contact".to_string(), line.to_string()),
                        };
                        let event = InboundEvent::new(
                            "local",
                            contact,
                            Uuid::new_v4().to_string(),
                            content,
                        );
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn send(&self, contact_id: &str, text: &str) -> Result<SendOutcome, ChannelError> {
        println!("\n[to {}] {}\n", contact_id, text);
        eprint!("> ");
        Ok(SendOutcome::Sent)
    }
}
