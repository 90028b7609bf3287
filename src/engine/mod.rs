//! The decision engine — orchestrates one decision per inbound trigger.
//!
//! An event flows received -> context built -> generated -> screened, then
//! routes to auto-dispatch, the approval queue, or a block. The engine owns
//! the glue: single-flight per conversation, stale-generation cancellation
//! when new context arrives, retry with backoff for generation and dispatch,
//! and the audit trail for every step.

pub mod decision;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::{RwLock, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::approval::{ApprovalQueue, ApprovalRequest, Resolution};
use crate::audit::{Actor, AuditLog};
use crate::channels::{ChannelManager, InboundEvent, SendOutcome};
use crate::config::EngineConfig;
use crate::conversation::{BeginDecision, Conversation, ConversationTracker, MessageEvent};
use crate::engine::decision::{Decision, DecisionState};
use crate::error::{ApprovalError, EngineError, Error, GenerationError, Result};
use crate::generation::{ContextMessage, GenerationService};
use crate::profile::{PersonalityProfile, ProfileStore};
use crate::safety::{Verdict, screen};
use crate::store::Database;

/// How many recent events feed the generation context.
const CONTEXT_WINDOW: u32 = 20;

/// Outcome of handling one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The event was already processed (channel redelivery).
    Duplicate,
    /// No decision was started; the profile refused it.
    Refused { reason: String },
    /// A decision was in flight; the event joined its context (or the next
    /// decision's).
    Attached { in_flight: Uuid },
    /// A decision ran; `state` is where it landed.
    Processed {
        decision_id: Uuid,
        state: DecisionState,
    },
}

/// Cancellation handle for a decision that has not yet generated.
struct FlightHandle {
    decision_id: Uuid,
    cancel: watch::Sender<u64>,
    pre_generated: Arc<AtomicBool>,
}

pub struct DecisionEngine {
    db: Arc<dyn Database>,
    tracker: Arc<ConversationTracker>,
    profiles: Arc<ProfileStore>,
    queue: Arc<ApprovalQueue>,
    audit: Arc<AuditLog>,
    generator: Arc<dyn GenerationService>,
    channels: Arc<ChannelManager>,
    config: EngineConfig,
    /// Profile owner the twin speaks for.
    user_id: String,
    flights: RwLock<HashMap<Uuid, FlightHandle>>,
}

impl DecisionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<dyn Database>,
        tracker: Arc<ConversationTracker>,
        profiles: Arc<ProfileStore>,
        queue: Arc<ApprovalQueue>,
        audit: Arc<AuditLog>,
        generator: Arc<dyn GenerationService>,
        channels: Arc<ChannelManager>,
        config: EngineConfig,
        user_id: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            tracker,
            profiles,
            queue,
            audit,
            generator,
            channels,
            config,
            user_id: user_id.into(),
            flights: RwLock::new(HashMap::new()),
        })
    }

    pub fn queue(&self) -> &Arc<ApprovalQueue> {
        &self.queue
    }

    pub fn tracker(&self) -> &Arc<ConversationTracker> {
        &self.tracker
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    // ── Inbound path ────────────────────────────────────────────────

    /// Handle one inbound event end to end.
    ///
    /// Replays of an already-recorded external id are dropped. If the
    /// conversation has a decision in flight, the event becomes context:
    /// a pre-generation decision restarts its generation, anything later
    /// picks the event up on the next decision.
    pub async fn handle_event(&self, event: InboundEvent) -> Result<HandleOutcome> {
        let conversation_id = self
            .tracker
            .resolve(
                &event.channel,
                &event.contact_id,
                event.display_name.as_deref(),
                &self.user_id,
            )
            .await?;

        if self
            .db
            .get_event_by_external_id(&event.channel, &event.external_id)
            .await?
            .is_some()
        {
            debug!(
                channel = %event.channel,
                external_id = %event.external_id,
                "Duplicate event dropped"
            );
            return Ok(HandleOutcome::Duplicate);
        }

        let message = MessageEvent {
            id: Uuid::new_v4(),
            conversation_id,
            external_id: event.external_id.clone(),
            content: event.content.clone(),
            received_at: event.received_at,
        };
        match self.db.insert_event(&event.channel, &message).await {
            Ok(()) => {}
            Err(crate::error::DatabaseError::Constraint(_)) => {
                // Lost the race against a concurrent delivery of the same id.
                return Ok(HandleOutcome::Duplicate);
            }
            Err(e) => return Err(e.into()),
        }

        // A missing or corrupt profile refuses the decision outright.
        let profile = match self.profiles.load(&self.user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "Profile unavailable, refusing decision");
                self.audit
                    .record_admin(
                        Some(conversation_id),
                        "refused",
                        Actor::System,
                        Some(&e.to_string()),
                    )
                    .await?;
                return Ok(HandleOutcome::Refused {
                    reason: e.to_string(),
                });
            }
        };

        match self
            .tracker
            .try_begin_decision(conversation_id, message.id)
            .await?
        {
            BeginDecision::Busy { in_flight } => {
                self.tracker.attach_event(conversation_id, message).await?;
                self.nudge_in_flight(conversation_id, in_flight).await;
                Ok(HandleOutcome::Attached { in_flight })
            }
            BeginDecision::Started(decision_id) => {
                let conversation = self.tracker.get(conversation_id).await?;
                let mood = conversation
                    .mood_override
                    .unwrap_or(profile.default_mood);

                let mut decision = Decision::new(conversation_id, message.id, mood);
                decision.id = decision_id;
                self.db.insert_decision(&decision).await?;
                self.audit
                    .record(decision_id, conversation_id, "received", Actor::System, None)
                    .await?;

                let state = self.process_decision(decision, profile).await?;
                Ok(HandleOutcome::Processed { decision_id, state })
            }
        }
    }

    /// If the in-flight decision has not generated yet, signal it to restart
    /// with the updated context. Post-generation decisions are left alone.
    async fn nudge_in_flight(&self, conversation_id: Uuid, in_flight: Uuid) {
        let flights = self.flights.read().await;
        if let Some(handle) = flights.get(&conversation_id) {
            if handle.decision_id == in_flight && !handle.pre_generated.load(Ordering::SeqCst) {
                handle.cancel.send_modify(|n| *n += 1);
                debug!(
                    conversation_id = %conversation_id,
                    decision_id = %in_flight,
                    "Restarting pre-generation decision with new context"
                );
            }
        }
    }

    // ── Decision pipeline ───────────────────────────────────────────

    /// Run one decision from context build to its routing outcome. Returns
    /// the state the decision landed in.
    async fn process_decision(
        &self,
        mut decision: Decision,
        profile: Arc<PersonalityProfile>,
    ) -> Result<DecisionState> {
        let conversation_id = decision.conversation_id;
        let pre_generated = Arc::new(AtomicBool::new(false));
        let (cancel_tx, mut cancel_rx) = watch::channel(0u64);
        {
            let mut flights = self.flights.write().await;
            flights.insert(
                conversation_id,
                FlightHandle {
                    decision_id: decision.id,
                    cancel: cancel_tx,
                    pre_generated: Arc::clone(&pre_generated),
                },
            );
        }

        let result = self
            .run_pipeline(&mut decision, &profile, &pre_generated, &mut cancel_rx)
            .await;

        {
            let mut flights = self.flights.write().await;
            flights.remove(&conversation_id);
        }

        match result {
            Ok(state) => Ok(state),
            Err(e) => {
                // An unexpected failure must not wedge the conversation. The
                // single-flight slot is released even when persisting the
                // failure record itself errors.
                error!(decision_id = %decision.id, error = %e, "Decision pipeline failed");
                if !decision.state.is_terminal() {
                    if let Err(t) = decision.transition(DecisionState::Discarded) {
                        error!(decision_id = %decision.id, error = %t, "Forced discard rejected");
                    }
                }
                if let Err(db_err) = self.db.update_decision(&decision).await {
                    error!(decision_id = %decision.id, error = %db_err, "Failed to persist discard");
                }
                if let Err(audit_err) = self
                    .audit
                    .record(
                        decision.id,
                        conversation_id,
                        "discarded",
                        Actor::System,
                        Some(&e.to_string()),
                    )
                    .await
                {
                    error!(decision_id = %decision.id, error = %audit_err, "Failed to audit discard");
                }
                if let Err(finish_err) = self.finish(decision.id, decision.state).await {
                    error!(decision_id = %decision.id, error = %finish_err, "Failed to release decision slot");
                }
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &self,
        decision: &mut Decision,
        profile: &PersonalityProfile,
        pre_generated: &AtomicBool,
        cancel_rx: &mut watch::Receiver<u64>,
    ) -> Result<DecisionState> {
        let conversation_id = decision.conversation_id;

        let candidate = loop {
            decision.transition(DecisionState::ContextBuilt)?;
            self.db.update_decision(decision).await?;

            // Mark the current cancellation generation before reading
            // context. An event whose nudge races the context query fires
            // after this marker and restarts the build instead of being
            // swallowed.
            cancel_rx.borrow_and_update();

            // Queued events are already recorded; draining folds them into
            // this context build instead of a follow-up decision.
            let absorbed = self.tracker.drain_queued(conversation_id).await;
            let context = self.build_context(conversation_id).await?;
            self.audit
                .record(
                    decision.id,
                    conversation_id,
                    "context_built",
                    Actor::System,
                    (!absorbed.is_empty())
                        .then(|| format!("absorbed {} queued events", absorbed.len()))
                        .as_deref(),
                )
                .await?;

            match self.generate_with_retries(profile, &context, decision, cancel_rx).await {
                GenerationOutcome::Candidate(text) => break text,
                GenerationOutcome::Restart => {
                    info!(decision_id = %decision.id, "Generation cancelled, rebuilding context");
                    continue;
                }
                GenerationOutcome::Exhausted => {
                    decision.transition(DecisionState::PendingApproval)?;
                    decision.reason = Some("generation unavailable".into());
                    self.db.update_decision(decision).await?;
                    pre_generated.store(true, Ordering::SeqCst);
                    self.queue
                        .enqueue(
                            decision.id,
                            conversation_id,
                            None,
                            "generation unavailable",
                            Utc::now() + self.approval_deadline(),
                        )
                        .await?;
                    self.audit
                        .record(
                            decision.id,
                            conversation_id,
                            "pending_approval",
                            Actor::System,
                            Some("generation unavailable"),
                        )
                        .await?;
                    return Ok(DecisionState::PendingApproval);
                }
            }
        };

        pre_generated.store(true, Ordering::SeqCst);
        decision.transition(DecisionState::Generated)?;
        decision.candidate = Some(candidate.clone());
        self.db.update_decision(decision).await?;
        self.audit
            .record(decision.id, conversation_id, "generated", Actor::System, None)
            .await?;

        // Snapshot consent and mode at screen time; mid-flight operator edits
        // apply from the next decision on.
        let conversation = self.tracker.get(conversation_id).await?;
        let safety_mode = conversation
            .safety_override
            .unwrap_or(self.config.default_safety_mode);
        let verdict = screen(
            profile,
            &conversation.contact,
            &candidate,
            decision.mood,
            safety_mode,
            self.config.redline_threshold,
        );

        decision.transition(DecisionState::Screened)?;
        decision.verdict = Some(verdict.clone());
        decision.reason = verdict.reason().map(str::to_string);
        self.db.update_decision(decision).await?;
        self.audit
            .record(
                decision.id,
                conversation_id,
                "screened",
                Actor::System,
                Some(&match verdict.reason() {
                    Some(reason) => format!("{}: {}", verdict.label(), reason),
                    None => verdict.label().to_string(),
                }),
            )
            .await?;

        match verdict {
            Verdict::Allow => self.auto_dispatch(decision, &conversation, candidate).await,
            Verdict::RequireApproval { reason } => {
                decision.transition(DecisionState::PendingApproval)?;
                self.db.update_decision(decision).await?;
                self.queue
                    .enqueue(
                        decision.id,
                        conversation_id,
                        Some(candidate),
                        &reason,
                        Utc::now() + self.approval_deadline(),
                    )
                    .await?;
                self.audit
                    .record(
                        decision.id,
                        conversation_id,
                        "pending_approval",
                        Actor::System,
                        Some(&reason),
                    )
                    .await?;
                Ok(DecisionState::PendingApproval)
            }
            Verdict::Block { reason } => {
                decision.transition(DecisionState::Blocked)?;
                self.db.update_decision(decision).await?;
                self.audit
                    .record(
                        decision.id,
                        conversation_id,
                        "blocked",
                        Actor::System,
                        Some(&reason),
                    )
                    .await?;

                decision.transition(DecisionState::Discarded)?;
                self.db.update_decision(decision).await?;
                self.audit
                    .record(
                        decision.id,
                        conversation_id,
                        "discarded",
                        Actor::System,
                        Some(&reason),
                    )
                    .await?;
                self.finish(decision.id, DecisionState::Discarded).await?;
                Ok(DecisionState::Discarded)
            }
        }
    }

    /// Recent conversation history, oldest first, as generation context.
    async fn build_context(&self, conversation_id: Uuid) -> Result<Vec<ContextMessage>> {
        let events = self.db.recent_events(conversation_id, CONTEXT_WINDOW).await?;
        Ok(events
            .into_iter()
            .map(|e| ContextMessage::contact(e.content, e.received_at))
            .collect())
    }

    async fn generate_with_retries(
        &self,
        profile: &PersonalityProfile,
        context: &[ContextMessage],
        decision: &Decision,
        cancel_rx: &mut watch::Receiver<u64>,
    ) -> GenerationOutcome {
        for attempt in 1..=self.config.generation_attempts {
            let generation = tokio::time::timeout(
                self.config.generation_timeout,
                self.generator.generate(profile, context, decision.mood),
            );

            let result = tokio::select! {
                result = generation => match result {
                    Ok(inner) => inner,
                    Err(_) => Err(GenerationError::Timeout(self.config.generation_timeout)),
                },
                _ = cancel_rx.changed() => return GenerationOutcome::Restart,
            };

            match result {
                Ok(text) => {
                    // A nudge racing a fast generation can land after the
                    // select picked the generation branch; the candidate is
                    // stale either way.
                    if cancel_rx.has_changed().unwrap_or(false) {
                        return GenerationOutcome::Restart;
                    }
                    return GenerationOutcome::Candidate(text);
                }
                Err(e) => {
                    warn!(
                        decision_id = %decision.id,
                        attempt,
                        error = %e,
                        "Generation attempt failed"
                    );
                    if attempt < self.config.generation_attempts {
                        let delay = self.backoff(attempt);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel_rx.changed() => return GenerationOutcome::Restart,
                        }
                    }
                }
            }
        }
        GenerationOutcome::Exhausted
    }

    /// Dispatch an allowed candidate. Retryable send failures back off and
    /// retry; exhaustion degrades to the approval queue, never a silent drop.
    async fn auto_dispatch(
        &self,
        decision: &mut Decision,
        conversation: &Conversation,
        candidate: String,
    ) -> Result<DecisionState> {
        let conversation_id = decision.conversation_id;
        decision.transition(DecisionState::AutoDispatched)?;
        self.db.update_decision(decision).await?;
        self.audit
            .record(
                decision.id,
                conversation_id,
                "auto_dispatched",
                Actor::System,
                None,
            )
            .await?;

        match self.send_with_retries(conversation, &candidate, decision.id).await? {
            SendOutcome::Sent => {
                decision.transition(DecisionState::Sent)?;
                self.db.update_decision(decision).await?;
                self.audit
                    .record(decision.id, conversation_id, "sent", Actor::System, None)
                    .await?;
                self.finish(decision.id, DecisionState::Sent).await?;
                Ok(DecisionState::Sent)
            }
            SendOutcome::Retryable { reason } => {
                decision.transition(DecisionState::PendingApproval)?;
                decision.reason = Some(reason.clone());
                self.db.update_decision(decision).await?;
                self.queue
                    .enqueue(
                        decision.id,
                        conversation_id,
                        Some(candidate),
                        &format!("dispatch failed: {reason}"),
                        Utc::now() + self.approval_deadline(),
                    )
                    .await?;
                self.audit
                    .record(
                        decision.id,
                        conversation_id,
                        "pending_approval",
                        Actor::System,
                        Some(&format!("dispatch failed: {reason}")),
                    )
                    .await?;
                Ok(DecisionState::PendingApproval)
            }
            SendOutcome::Terminal { reason } => {
                decision.transition(DecisionState::Discarded)?;
                decision.reason = Some(reason.clone());
                self.db.update_decision(decision).await?;
                self.audit
                    .record(
                        decision.id,
                        conversation_id,
                        "discarded",
                        Actor::System,
                        Some(&format!("dispatch rejected: {reason}")),
                    )
                    .await?;
                self.finish(decision.id, DecisionState::Discarded).await?;
                Ok(DecisionState::Discarded)
            }
        }
    }

    /// Try a send up to the configured attempt count. A `Retryable` result
    /// here means all attempts are spent.
    async fn send_with_retries(
        &self,
        conversation: &Conversation,
        text: &str,
        decision_id: Uuid,
    ) -> Result<SendOutcome> {
        let adapter = self.channels.get(&conversation.contact.channel)?;
        let mut last_reason = String::new();

        for attempt in 1..=self.config.dispatch_attempts {
            match adapter.send(&conversation.contact.id, text).await {
                Ok(SendOutcome::Sent) => return Ok(SendOutcome::Sent),
                Ok(SendOutcome::Terminal { reason }) => {
                    return Ok(SendOutcome::Terminal { reason });
                }
                Ok(SendOutcome::Retryable { reason }) => {
                    warn!(decision_id = %decision_id, attempt, reason, "Send attempt failed");
                    last_reason = reason;
                }
                Err(e) => {
                    warn!(decision_id = %decision_id, attempt, error = %e, "Send attempt errored");
                    last_reason = e.to_string();
                }
            }
            if attempt < self.config.dispatch_attempts {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
        }
        Ok(SendOutcome::Retryable {
            reason: last_reason,
        })
    }

    // ── Approval resolution ─────────────────────────────────────────

    /// Apply a human resolution to a pending request and finish (or requeue)
    /// its decision.
    pub async fn resolve_approval(
        &self,
        request_id: Uuid,
        resolution: Resolution,
        operator: &str,
    ) -> Result<ApprovalRequest> {
        let edited = matches!(resolution, Resolution::Edit { .. });
        let denied = matches!(resolution, Resolution::Deny);
        let resolved = self.queue.resolve(request_id, resolution).await?;

        let mut decision = self
            .db
            .get_decision(resolved.decision_id)
            .await?
            .ok_or(Error::Engine(EngineError::DecisionNotFound(
                resolved.decision_id,
            )))?;
        let actor = Actor::Human {
            operator: operator.to_string(),
        };

        if denied {
            decision.transition(DecisionState::Discarded)?;
            decision.reason = Some("denied".into());
            self.db.update_decision(&decision).await?;
            self.audit
                .record(
                    decision.id,
                    decision.conversation_id,
                    "denied",
                    actor,
                    None,
                )
                .await?;
            self.audit
                .record(
                    decision.id,
                    decision.conversation_id,
                    "discarded",
                    Actor::System,
                    Some("denied"),
                )
                .await?;
            self.finish(decision.id, DecisionState::Discarded).await?;
            return Ok(resolved);
        }

        let candidate = resolved
            .candidate
            .clone()
            .ok_or(Error::Approval(ApprovalError::NothingToSend(resolved.id)))?;
        decision.candidate = Some(candidate.clone());
        self.audit
            .record(
                decision.id,
                decision.conversation_id,
                if edited { "edited" } else { "approved" },
                actor,
                None,
            )
            .await?;

        let conversation = self.tracker.get(decision.conversation_id).await?;
        match self
            .send_with_retries(&conversation, &candidate, decision.id)
            .await?
        {
            SendOutcome::Sent => {
                decision.transition(DecisionState::Sent)?;
                self.db.update_decision(&decision).await?;
                self.audit
                    .record(
                        decision.id,
                        decision.conversation_id,
                        "sent",
                        Actor::System,
                        None,
                    )
                    .await?;
                self.finish(decision.id, DecisionState::Sent).await?;
            }
            SendOutcome::Retryable { reason } => {
                // Approved but undeliverable right now; put it back in front
                // of a human rather than retrying forever.
                decision.reason = Some(reason.clone());
                self.db.update_decision(&decision).await?;
                self.queue
                    .enqueue(
                        decision.id,
                        decision.conversation_id,
                        Some(candidate),
                        &format!("dispatch failed: {reason}"),
                        Utc::now() + self.approval_deadline(),
                    )
                    .await?;
                self.audit
                    .record(
                        decision.id,
                        decision.conversation_id,
                        "requeued",
                        Actor::System,
                        Some(&format!("dispatch failed: {reason}")),
                    )
                    .await?;
            }
            SendOutcome::Terminal { reason } => {
                decision.transition(DecisionState::Discarded)?;
                decision.reason = Some(reason.clone());
                self.db.update_decision(&decision).await?;
                self.audit
                    .record(
                        decision.id,
                        decision.conversation_id,
                        "discarded",
                        Actor::System,
                        Some(&format!("dispatch rejected: {reason}")),
                    )
                    .await?;
                self.finish(decision.id, DecisionState::Discarded).await?;
            }
        }
        Ok(resolved)
    }

    // ── Expiry ──────────────────────────────────────────────────────

    /// Expire past-deadline approval requests. The fallback is always
    /// discard; nothing is ever auto-sent on timeout.
    pub async fn expire_approvals(&self) -> Result<usize> {
        let expired = self.queue.expire_old().await?;
        let count = expired.len();
        for request in expired {
            let decision = match self.db.get_decision(request.decision_id).await? {
                Some(d) => d,
                None => continue,
            };
            let mut decision = decision;
            if decision.state != DecisionState::PendingApproval {
                continue;
            }
            decision.transition(DecisionState::Expired)?;
            decision.reason = Some("timeout".into());
            self.db.update_decision(&decision).await?;
            self.audit
                .record(
                    decision.id,
                    decision.conversation_id,
                    "expired",
                    Actor::System,
                    Some("timeout"),
                )
                .await?;
            self.audit
                .record(
                    decision.id,
                    decision.conversation_id,
                    "discarded",
                    Actor::System,
                    Some("expired without resolution"),
                )
                .await?;
            self.finish(decision.id, DecisionState::Expired).await?;
        }
        Ok(count)
    }

    /// Background task sweeping the approval queue for expired requests.
    pub fn spawn_expiry_sweep(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.config.expiry_sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                match engine.expire_approvals().await {
                    Ok(0) => {}
                    Ok(count) => info!(count, "Expiry sweep discarded stale approvals"),
                    Err(e) => error!(error = %e, "Expiry sweep failed"),
                }
            }
        })
    }

    // ── Helpers ─────────────────────────────────────────────────────

    /// Release the conversation's single-flight slot and the decision's audit
    /// sequence counter.
    async fn finish(&self, decision_id: Uuid, state: DecisionState) -> Result<()> {
        self.audit.release(decision_id).await;
        self.tracker.complete_decision(decision_id, state).await?;
        Ok(())
    }

    fn approval_deadline(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.approval_deadline)
            .unwrap_or_else(|_| chrono::Duration::minutes(10))
    }

    /// Exponential backoff with jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base * 2u32.saturating_pow(attempt - 1);
        let jitter = rand::thread_rng().gen_range(0..100);
        base + Duration::from_millis(jitter)
    }
}

enum GenerationOutcome {
    Candidate(String),
    Restart,
    Exhausted,
}
