//! Personality profiles, moods, redline rules, and the profile store.
//!
//! A profile is the learned style of one user plus the policy attached to it:
//! mood presets, a default mood, and the redline rules the twin must never
//! cross. Profiles are read-mostly; the engine takes an immutable `Arc`
//! snapshot at the start of every decision so operator edits never change a
//! decision mid-flight.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, ProfileError, Result};
use crate::store::Database;

// ── Mood ────────────────────────────────────────────────────────────

/// Response mood preset. Mood shapes generation only — it is never consulted
/// by redline or consent checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Default,
    Energetic,
    Savage,
    Unhinged,
    Professional,
    Casual,
}

impl Mood {
    /// Parse a known mood name. Unknown names are `None` so callers taking
    /// operator input can reject typos instead of silently defaulting.
    pub fn try_parse(s: &str) -> Option<Self> {
        match s {
            "default" => Some(Self::Default),
            "energetic" => Some(Self::Energetic),
            "savage" => Some(Self::Savage),
            "unhinged" => Some(Self::Unhinged),
            "professional" => Some(Self::Professional),
            "casual" => Some(Self::Casual),
            _ => None,
        }
    }

    /// Parse a stored mood name. Unknown names fall back to `Default`.
    pub fn parse(s: &str) -> Self {
        Self::try_parse(s).unwrap_or(Self::Default)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Energetic => "energetic",
            Self::Savage => "savage",
            Self::Unhinged => "unhinged",
            Self::Professional => "professional",
            Self::Casual => "casual",
        }
    }
}

// ── Safety mode ─────────────────────────────────────────────────────

/// Operator safety mode. `Strict` is shadow mode: every decision is held for
/// approval regardless of consent and redline outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyMode {
    Strict,
    Moderate,
    Lenient,
}

impl SafetyMode {
    /// Parse a mode name. Unknown names fall back to `Strict` (fail-closed).
    pub fn parse(s: &str) -> Self {
        match s {
            "moderate" => Self::Moderate,
            "lenient" => Self::Lenient,
            _ => Self::Strict,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Moderate => "moderate",
            Self::Lenient => "lenient",
        }
    }
}

// ── Redlines ────────────────────────────────────────────────────────

/// Severity of a redline rule. A match blocks when severity is at or above
/// the configured threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Stored form of a redline rule — pattern is a regex source string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedlineSpec {
    pub id: String,
    pub pattern: String,
    pub severity: Severity,
}

/// A compiled redline rule, evaluated against generated text.
#[derive(Debug, Clone)]
pub struct RedlineRule {
    pub id: String,
    pub severity: Severity,
    regex: Regex,
}

impl RedlineRule {
    /// Compile a spec. Matching is case-insensitive.
    pub fn compile(spec: &RedlineSpec) -> std::result::Result<Self, ProfileError> {
        let regex = Regex::new(&format!("(?i){}", spec.pattern)).map_err(|e| {
            ProfileError::InvalidRule {
                id: spec.id.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            id: spec.id.clone(),
            severity: spec.severity,
            regex,
        })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Default redline set: never-say terms and PII shapes.
pub fn default_redlines() -> Vec<RedlineSpec> {
    let term = |id: &str, pattern: &str| RedlineSpec {
        id: id.into(),
        pattern: pattern.into(),
        severity: Severity::Critical,
    };
    vec![
        term("term-password", r"\bpasswords?\b"),
        term("term-credit-card", r"\bcredit\s+cards?\b"),
        term("term-ssn", r"\bsocial\s+security\b"),
        term("term-bank-account", r"\bbank\s+account\b"),
        term("term-private-key", r"\bprivate\s+keys?\b"),
        term("pii-ssn", r"\b\d{3}-\d{2}-\d{4}\b"),
        term("pii-credit-card", r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b"),
        term("pii-phone", r"\b\d{3}[\s-]\d{3}[\s-]\d{4}\b"),
        term(
            "pii-email",
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
        ),
    ]
}

// ── Profile ─────────────────────────────────────────────────────────

/// Stored form of a personality profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub user_id: String,
    pub default_mood: Mood,
    pub redlines: Vec<RedlineSpec>,
    /// Opaque style parameters produced by training. The engine only passes
    /// these through to the generation service.
    pub style: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl ProfileRecord {
    /// A fresh profile with the default redline set and no learned style.
    pub fn bootstrap(user_id: &str) -> Self {
        Self {
            user_id: user_id.into(),
            default_mood: Mood::Default,
            redlines: default_redlines(),
            style: serde_json::json!({}),
            updated_at: Utc::now(),
        }
    }
}

/// An immutable, compiled personality profile snapshot.
#[derive(Debug)]
pub struct PersonalityProfile {
    pub user_id: String,
    pub default_mood: Mood,
    pub redlines: Vec<RedlineRule>,
    pub style: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl PersonalityProfile {
    /// Compile a stored record. Fails if any redline pattern is invalid —
    /// a corrupt profile must refuse decisions rather than degrade.
    pub fn from_record(record: &ProfileRecord) -> std::result::Result<Self, ProfileError> {
        let redlines = record
            .redlines
            .iter()
            .map(RedlineRule::compile)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self {
            user_id: record.user_id.clone(),
            default_mood: record.default_mood,
            redlines,
            style: record.style.clone(),
            updated_at: record.updated_at,
        })
    }
}

// ── Profile store ───────────────────────────────────────────────────

/// Read-mostly profile store: a DB-backed cache of compiled snapshots.
pub struct ProfileStore {
    db: Arc<dyn Database>,
    cache: RwLock<HashMap<String, Arc<PersonalityProfile>>>,
}

impl ProfileStore {
    pub fn new(db: Arc<dyn Database>) -> Arc<Self> {
        Arc::new(Self {
            db,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Load a compiled snapshot for a user.
    ///
    /// Missing or corrupt profiles are hard errors: the caller must not start
    /// a decision for that user.
    pub async fn load(&self, user_id: &str) -> Result<Arc<PersonalityProfile>> {
        if let Some(profile) = self.cache.read().await.get(user_id) {
            return Ok(Arc::clone(profile));
        }

        let record = self
            .db
            .get_profile(user_id)
            .await?
            .ok_or_else(|| Error::Profile(ProfileError::NotFound(user_id.into())))?;

        let profile = Arc::new(PersonalityProfile::from_record(&record)?);
        self.cache
            .write()
            .await
            .insert(user_id.to_string(), Arc::clone(&profile));
        debug!(user_id, redlines = profile.redlines.len(), "Profile loaded");
        Ok(profile)
    }

    /// Write a profile record and refresh the cached snapshot.
    ///
    /// The record is compiled before the write so a bad redline pattern never
    /// reaches storage.
    pub async fn upsert(&self, record: ProfileRecord) -> Result<()> {
        let compiled = Arc::new(PersonalityProfile::from_record(&record)?);
        self.db.upsert_profile(&record).await?;
        self.cache
            .write()
            .await
            .insert(record.user_id.clone(), compiled);
        info!(user_id = %record.user_id, "Profile updated");
        Ok(())
    }

    /// Add a redline rule to a user's profile.
    pub async fn add_redline(&self, user_id: &str, spec: RedlineSpec) -> Result<()> {
        let mut record = self.record(user_id).await?;
        record.redlines.retain(|r| r.id != spec.id);
        record.redlines.push(spec);
        record.updated_at = Utc::now();
        self.upsert(record).await
    }

    /// Remove a redline rule by id. Returns true if a rule was removed.
    pub async fn remove_redline(&self, user_id: &str, rule_id: &str) -> Result<bool> {
        let mut record = self.record(user_id).await?;
        let before = record.redlines.len();
        record.redlines.retain(|r| r.id != rule_id);
        if record.redlines.len() == before {
            return Ok(false);
        }
        record.updated_at = Utc::now();
        self.upsert(record).await?;
        Ok(true)
    }

    async fn record(&self, user_id: &str) -> Result<ProfileRecord> {
        self.db
            .get_profile(user_id)
            .await?
            .ok_or_else(|| Error::Profile(ProfileError::NotFound(user_id.into())))
    }

    /// Ensure a profile row exists for the user, seeding defaults if absent.
    pub async fn ensure_bootstrap(&self, user_id: &str) -> Result<()> {
        if self.db.get_profile(user_id).await?.is_none() {
            self.upsert(ProfileRecord::bootstrap(user_id)).await?;
            info!(user_id, "Bootstrapped default profile");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mood_parse_round_trip() {
        for mood in [
            Mood::Default,
            Mood::Energetic,
            Mood::Savage,
            Mood::Unhinged,
            Mood::Professional,
            Mood::Casual,
        ] {
            assert_eq!(Mood::parse(mood.as_str()), mood);
        }
    }

    #[test]
    fn unknown_mood_falls_back_to_default() {
        assert_eq!(Mood::parse("chaotic"), Mood::Default);
    }

    #[test]
    fn try_parse_rejects_unknown_moods() {
        assert_eq!(Mood::try_parse("savage"), Some(Mood::Savage));
        assert_eq!(Mood::try_parse("savge"), None);
        assert_eq!(Mood::try_parse(""), None);
    }

    #[test]
    fn unknown_safety_mode_falls_back_to_strict() {
        assert_eq!(SafetyMode::parse("yolo"), SafetyMode::Strict);
        assert_eq!(SafetyMode::parse("lenient"), SafetyMode::Lenient);
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn redline_matching_is_case_insensitive() {
        let rule = RedlineRule::compile(&RedlineSpec {
            id: "t".into(),
            pattern: r"\bpasswords?\b".into(),
            severity: Severity::Critical,
        })
        .unwrap();
        assert!(rule.matches("my PASSWORD is hunter2"));
        assert!(rule.matches("all the passwords"));
        assert!(!rule.matches("passwordless login"));
    }

    #[test]
    fn default_redlines_catch_pii_shapes() {
        let rules: Vec<RedlineRule> = default_redlines()
            .iter()
            .map(|s| RedlineRule::compile(s).unwrap())
            .collect();
        let hit = |text: &str| rules.iter().any(|r| r.matches(text));
        assert!(hit("my ssn is 123-45-6789"));
        assert!(hit("card: 4111 1111 1111 1111"));
        assert!(hit("reach me at someone@example.com"));
        assert!(!hit("see you at the cafe tomorrow"));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = RedlineRule::compile(&RedlineSpec {
            id: "bad".into(),
            pattern: "(unclosed".into(),
            severity: Severity::Low,
        });
        assert!(matches!(err, Err(ProfileError::InvalidRule { .. })));
    }

    #[test]
    fn corrupt_record_refuses_compilation() {
        let mut record = ProfileRecord::bootstrap("user");
        record.redlines.push(RedlineSpec {
            id: "broken".into(),
            pattern: "[".into(),
            severity: Severity::High,
        });
        assert!(PersonalityProfile::from_record(&record).is_err());
    }
}
