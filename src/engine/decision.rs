//! Decision records and their state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::profile::Mood;
use crate::safety::Verdict;

/// Lifecycle state of a decision. Terminal states are `Sent`, `Discarded`
/// and `Expired`; everything else is in flight and holds the conversation's
/// single-flight slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionState {
    Received,
    ContextBuilt,
    Generated,
    Screened,
    AutoDispatched,
    PendingApproval,
    Blocked,
    Sent,
    Discarded,
    Expired,
}

impl DecisionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::ContextBuilt => "context_built",
            Self::Generated => "generated",
            Self::Screened => "screened",
            Self::AutoDispatched => "auto_dispatched",
            Self::PendingApproval => "pending_approval",
            Self::Blocked => "blocked",
            Self::Sent => "sent",
            Self::Discarded => "discarded",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "context_built" => Self::ContextBuilt,
            "generated" => Self::Generated,
            "screened" => Self::Screened,
            "auto_dispatched" => Self::AutoDispatched,
            "pending_approval" => Self::PendingApproval,
            "blocked" => Self::Blocked,
            "sent" => Self::Sent,
            "discarded" => Self::Discarded,
            "expired" => Self::Expired,
            _ => Self::Received,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Discarded | Self::Expired)
    }

    /// Legal transitions. `ContextBuilt -> PendingApproval` covers generation
    /// exhaustion; `AutoDispatched -> PendingApproval` covers dispatch retry
    /// exhaustion. Every non-terminal state can discard so a pipeline failure
    /// always has a legal exit.
    pub fn can_transition(self, to: DecisionState) -> bool {
        use DecisionState::*;
        if to == Discarded {
            return !self.is_terminal();
        }
        matches!(
            (self, to),
            (Received, ContextBuilt)
                | (ContextBuilt, Generated)
                | (ContextBuilt, ContextBuilt)
                | (ContextBuilt, PendingApproval)
                | (Generated, Screened)
                | (Screened, AutoDispatched)
                | (Screened, PendingApproval)
                | (Screened, Blocked)
                | (AutoDispatched, Sent)
                | (AutoDispatched, PendingApproval)
                | (PendingApproval, Sent)
                | (PendingApproval, Expired)
        )
    }
}

/// One decision about whether and what to send in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub conversation_id: Uuid,
    /// The inbound event that triggered this decision.
    pub event_id: Uuid,
    pub state: DecisionState,
    /// Mood snapshotted when the decision started.
    pub mood: Mood,
    pub candidate: Option<String>,
    pub verdict: Option<Verdict>,
    /// Human-readable reason for the current state (screen reason, failure
    /// cause, resolution).
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Decision {
    pub fn new(conversation_id: Uuid, event_id: Uuid, mood: Mood) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            event_id,
            state: DecisionState::Received,
            mood,
            candidate: None,
            verdict: None,
            reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `to`, rejecting transitions the state machine does not allow.
    pub fn transition(&mut self, to: DecisionState) -> Result<(), EngineError> {
        if !self.state.can_transition(to) {
            return Err(EngineError::InvalidTransition {
                id: self.id,
                from: self.state.as_str(),
                to: to.as_str(),
            });
        }
        self.state = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision() -> Decision {
        Decision::new(Uuid::new_v4(), Uuid::new_v4(), Mood::Default)
    }

    #[test]
    fn happy_path_auto_dispatch() {
        let mut d = decision();
        for state in [
            DecisionState::ContextBuilt,
            DecisionState::Generated,
            DecisionState::Screened,
            DecisionState::AutoDispatched,
            DecisionState::Sent,
        ] {
            d.transition(state).unwrap();
        }
        assert!(d.state.is_terminal());
    }

    #[test]
    fn approval_path_can_expire() {
        let mut d = decision();
        d.transition(DecisionState::ContextBuilt).unwrap();
        d.transition(DecisionState::Generated).unwrap();
        d.transition(DecisionState::Screened).unwrap();
        d.transition(DecisionState::PendingApproval).unwrap();
        d.transition(DecisionState::Expired).unwrap();
        assert!(d.state.is_terminal());
    }

    #[test]
    fn generation_exhaustion_routes_to_approval() {
        let mut d = decision();
        d.transition(DecisionState::ContextBuilt).unwrap();
        assert!(d.transition(DecisionState::PendingApproval).is_ok());
    }

    #[test]
    fn dispatch_exhaustion_degrades_to_approval() {
        let mut d = decision();
        d.transition(DecisionState::ContextBuilt).unwrap();
        d.transition(DecisionState::Generated).unwrap();
        d.transition(DecisionState::Screened).unwrap();
        d.transition(DecisionState::AutoDispatched).unwrap();
        assert!(d.transition(DecisionState::PendingApproval).is_ok());
    }

    #[test]
    fn blocked_only_discards() {
        let mut d = decision();
        d.transition(DecisionState::ContextBuilt).unwrap();
        d.transition(DecisionState::Generated).unwrap();
        d.transition(DecisionState::Screened).unwrap();
        d.transition(DecisionState::Blocked).unwrap();
        assert!(!d.state.can_transition(DecisionState::Sent));
        d.transition(DecisionState::Discarded).unwrap();
    }

    #[test]
    fn any_nonterminal_state_can_discard() {
        for state in [
            DecisionState::Received,
            DecisionState::ContextBuilt,
            DecisionState::Generated,
            DecisionState::Screened,
            DecisionState::AutoDispatched,
            DecisionState::PendingApproval,
            DecisionState::Blocked,
        ] {
            assert!(
                state.can_transition(DecisionState::Discarded),
                "{} must be able to discard",
                state.as_str()
            );
        }
        for terminal in [
            DecisionState::Sent,
            DecisionState::Discarded,
            DecisionState::Expired,
        ] {
            assert!(!terminal.can_transition(DecisionState::Discarded));
        }
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [
            DecisionState::Sent,
            DecisionState::Discarded,
            DecisionState::Expired,
        ] {
            for next in [
                DecisionState::Received,
                DecisionState::Generated,
                DecisionState::Sent,
                DecisionState::PendingApproval,
            ] {
                assert!(!terminal.can_transition(next));
            }
        }
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let mut d = decision();
        let err = d.transition(DecisionState::Sent).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert_eq!(d.state, DecisionState::Received);
    }

    #[test]
    fn state_round_trips_through_strings() {
        for state in [
            DecisionState::Received,
            DecisionState::ContextBuilt,
            DecisionState::Generated,
            DecisionState::Screened,
            DecisionState::AutoDispatched,
            DecisionState::PendingApproval,
            DecisionState::Blocked,
            DecisionState::Sent,
            DecisionState::Discarded,
            DecisionState::Expired,
        ] {
            assert_eq!(DecisionState::parse(state.as_str()), state);
        }
    }
}
