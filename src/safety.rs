//! Safety screen — pure, fail-closed evaluation of a generated candidate.
//!
//! The check order is deliberate: unknown identity and withdrawn consent
//! dominate everything, redlines dominate mood and mode, and strict mode
//! holds whatever is left for human review. First match wins.

use serde::{Deserialize, Serialize};

use crate::conversation::{ConsentStatus, Contact};
use crate::profile::{Mood, PersonalityProfile, SafetyMode, Severity};

/// Screening verdict for a candidate response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Block { reason: String },
    RequireApproval { reason: String },
}

impl Verdict {
    /// Short label for logging and audit entries.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Block { .. } => "block",
            Self::RequireApproval { .. } => "require_approval",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Allow => None,
            Self::Block { reason } | Self::RequireApproval { reason } => Some(reason),
        }
    }
}

/// Screen a candidate response.
///
/// `mood` is accepted for the contract but never consulted: no mood can relax
/// a consent or redline outcome. Both mode and mood are snapshots taken by
/// the caller — nothing here reads mutable process state.
pub fn screen(
    profile: &PersonalityProfile,
    contact: &Contact,
    candidate: &str,
    _mood: Mood,
    safety_mode: SafetyMode,
    redline_threshold: Severity,
) -> Verdict {
    match contact.consent {
        ConsentStatus::Unknown => {
            return Verdict::RequireApproval {
                reason: "unknown contact".into(),
            };
        }
        ConsentStatus::Denied | ConsentStatus::Revoked => {
            return Verdict::Block {
                reason: "consent withdrawn".into(),
            };
        }
        ConsentStatus::Granted => {}
    }

    for rule in &profile.redlines {
        if rule.severity >= redline_threshold && rule.matches(candidate) {
            return Verdict::Block {
                reason: format!("redline: {}", rule.id),
            };
        }
    }

    if safety_mode == SafetyMode::Strict {
        return Verdict::RequireApproval {
            reason: "strict mode".into(),
        };
    }

    Verdict::Allow
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{ProfileRecord, RedlineSpec};

    fn profile() -> PersonalityProfile {
        let mut record = ProfileRecord::bootstrap("owner");
        record.redlines.push(RedlineSpec {
            id: "topic-salary".into(),
            pattern: r"\bsalary\b".into(),
            severity: Severity::Medium,
        });
        record.redlines.push(RedlineSpec {
            id: "mild-gossip".into(),
            pattern: r"\bgossip\b".into(),
            severity: Severity::Low,
        });
        PersonalityProfile::from_record(&record).unwrap()
    }

    fn contact(consent: ConsentStatus) -> Contact {
        Contact {
            id: "alice".into(),
            channel: "telegram".into(),
            display_name: Some("Alice".into()),
            consent,
        }
    }

    #[test]
    fn unknown_contact_requires_approval_even_in_lenient() {
        let verdict = screen(
            &profile(),
            &contact(ConsentStatus::Unknown),
            "sure, sounds fun!",
            Mood::Energetic,
            SafetyMode::Lenient,
            Severity::Medium,
        );
        assert_eq!(
            verdict,
            Verdict::RequireApproval {
                reason: "unknown contact".into()
            }
        );
    }

    #[test]
    fn withdrawn_consent_blocks() {
        for consent in [ConsentStatus::Denied, ConsentStatus::Revoked] {
            let verdict = screen(
                &profile(),
                &contact(consent),
                "hello",
                Mood::Default,
                SafetyMode::Lenient,
                Severity::Medium,
            );
            assert_eq!(
                verdict,
                Verdict::Block {
                    reason: "consent withdrawn".into()
                }
            );
        }
    }

    #[test]
    fn redline_blocks_regardless_of_mood() {
        for mood in [Mood::Default, Mood::Unhinged, Mood::Savage] {
            let verdict = screen(
                &profile(),
                &contact(ConsentStatus::Granted),
                "my salary is pretty good actually",
                mood,
                SafetyMode::Lenient,
                Severity::Medium,
            );
            assert_eq!(
                verdict,
                Verdict::Block {
                    reason: "redline: topic-salary".into()
                }
            );
        }
    }

    #[test]
    fn redline_below_threshold_passes() {
        let verdict = screen(
            &profile(),
            &contact(ConsentStatus::Granted),
            "heard some gossip today",
            Mood::Default,
            SafetyMode::Lenient,
            Severity::Medium,
        );
        assert_eq!(verdict, Verdict::Allow);
    }

    #[test]
    fn strict_mode_holds_clean_candidates() {
        let verdict = screen(
            &profile(),
            &contact(ConsentStatus::Granted),
            "see you at 7",
            Mood::Default,
            SafetyMode::Strict,
            Severity::Medium,
        );
        assert_eq!(
            verdict,
            Verdict::RequireApproval {
                reason: "strict mode".into()
            }
        );
    }

    #[test]
    fn redline_dominates_strict_mode() {
        // A redline must report as a block, not get folded into strict-mode
        // approval.
        let verdict = screen(
            &profile(),
            &contact(ConsentStatus::Granted),
            "let me tell you my salary",
            Mood::Default,
            SafetyMode::Strict,
            Severity::Medium,
        );
        assert!(matches!(verdict, Verdict::Block { .. }));
    }

    #[test]
    fn clean_candidate_allowed_in_moderate_and_lenient() {
        for mode in [SafetyMode::Moderate, SafetyMode::Lenient] {
            let verdict = screen(
                &profile(),
                &contact(ConsentStatus::Granted),
                "sounds good, see you then",
                Mood::Casual,
                mode,
                Severity::Medium,
            );
            assert_eq!(verdict, Verdict::Allow);
        }
    }

    #[test]
    fn verdict_serialization_is_tagged() {
        let json = serde_json::to_value(Verdict::Block {
            reason: "redline: pii-ssn".into(),
        })
        .unwrap();
        assert_eq!(json["verdict"], "block");
        assert_eq!(json["reason"], "redline: pii-ssn");
    }
}
