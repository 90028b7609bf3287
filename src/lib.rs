//! MirrorMe — decision & approval engine for a personal digital twin.
//!
//! Inbound messages from any channel flow through a per-conversation state
//! machine that generates a candidate reply in the owner's style, screens it
//! against consent and redline policy, and either auto-dispatches it or holds
//! it for human approval. Every transition is audited.

pub mod api;
pub mod approval;
pub mod audit;
pub mod channels;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod generation;
pub mod profile;
pub mod safety;
pub mod store;

pub use error::{Error, Result};
