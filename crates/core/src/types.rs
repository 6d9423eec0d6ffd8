use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Detection types ─────────────────────────────────────────────

/// Conversational risk level. Ordered: Low < Medium < High.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_db_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            _ => None,
        }
    }

    /// Medium and High notify; Low never does.
    pub fn requires_notification(self) -> bool {
        self >= RiskLevel::Medium
    }
}

/// Which rule table a phrase belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerTier {
    /// Explicit intent or means.
    Hard,
    /// Indirect or coded distress, ambiguous alone.
    Soft,
    /// Temporal or methodical words that amplify soft matches.
    Planning,
}

impl TriggerTier {
    pub const ALL: [TriggerTier; 3] = [TriggerTier::Hard, TriggerTier::Soft, TriggerTier::Planning];

    pub fn as_db_str(self) -> &'static str {
        match self {
            TriggerTier::Hard => "hard",
            TriggerTier::Soft => "soft",
            TriggerTier::Planning => "planning",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "hard" => Some(TriggerTier::Hard),
            "soft" => Some(TriggerTier::Soft),
            "planning" => Some(TriggerTier::Planning),
            _ => None,
        }
    }
}

/// Who spoke a transcript turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

/// Ordered conversation turns with recognized speakers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub turns: Vec<Turn>,
}

/// Classifier output. Match lists hold unique phrases in rule-table order.
///
/// Read-only outside this crate; only the classifier builds one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    risk_level: RiskLevel,
    matched_hard: Vec<String>,
    matched_soft: Vec<String>,
    matched_planning: Vec<String>,
    escalated: bool,
}

impl Verdict {
    pub(crate) fn new(
        risk_level: RiskLevel,
        matched_hard: Vec<String>,
        matched_soft: Vec<String>,
        matched_planning: Vec<String>,
        escalated: bool,
    ) -> Self {
        Self {
            risk_level,
            matched_hard,
            matched_soft,
            matched_planning,
            escalated,
        }
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    /// True only when soft + planning (and no hard match) produced High.
    pub fn escalated(&self) -> bool {
        self.escalated
    }

    pub fn matched(&self, tier: TriggerTier) -> &[String] {
        match tier {
            TriggerTier::Hard => &self.matched_hard,
            TriggerTier::Soft => &self.matched_soft,
            TriggerTier::Planning => &self.matched_planning,
        }
    }

    pub fn has_matches(&self) -> bool {
        !(self.matched_hard.is_empty()
            && self.matched_soft.is_empty()
            && self.matched_planning.is_empty())
    }

    /// Logging threshold: anything above Low, or any match at all.
    pub fn should_log(&self) -> bool {
        self.risk_level != RiskLevel::Low || self.has_matches()
    }

    pub fn requires_notification(&self) -> bool {
        self.risk_level.requires_notification()
    }

    /// Most severe evidence: first hard match, else first soft, else first planning.
    pub fn primary_trigger(&self) -> Option<&str> {
        self.matched_hard
            .first()
            .or_else(|| self.matched_soft.first())
            .or_else(|| self.matched_planning.first())
            .map(String::as_str)
    }

    /// `"<tier>:<phrase>"` for every match, hard first.
    pub fn reasons(&self) -> Vec<String> {
        let tiers = [
            (TriggerTier::Hard, &self.matched_hard),
            (TriggerTier::Soft, &self.matched_soft),
            (TriggerTier::Planning, &self.matched_planning),
        ];
        tiers
            .iter()
            .flat_map(|(tier, phrases)| {
                phrases.iter().map(move |p| format!("{}:{p}", tier.as_db_str()))
            })
            .collect()
    }
}

// ── Incident types ──────────────────────────────────────────────

/// Notification state stamped on an incident row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    /// Logged; notification not yet confirmed failed.
    Pending,
    /// Notification dispatch failed.
    EmailFailed,
}

impl IncidentStatus {
    pub fn as_db_str(self) -> &'static str {
        match self {
            IncidentStatus::Pending => "pending",
            IncidentStatus::EmailFailed => "email_failed",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(IncidentStatus::Pending),
            "email_failed" => Some(IncidentStatus::EmailFailed),
            _ => None,
        }
    }
}

/// Account a provider conversation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationOwner {
    pub conversation_id: Uuid,
    pub user_id: Option<Uuid>,
}

/// Fields for a new incident row. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIncident {
    pub conversation_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub provider_conversation_id: Option<String>,
    pub risk_level: RiskLevel,
    /// Primary trigger phrase.
    pub crisis_type: Option<String>,
    pub risk_reasons: Vec<String>,
    pub escalated: bool,
    pub transcript_snippet: String,
    pub status: IncidentStatus,
    pub rules_version: String,
    pub dedupe_key: Option<String>,
}

/// Persisted incident row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incident {
    pub id: Uuid,
    pub conversation_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub provider_conversation_id: Option<String>,
    pub risk_level: RiskLevel,
    pub crisis_type: Option<String>,
    pub risk_reasons: Vec<String>,
    pub escalated: bool,
    pub transcript_snippet: String,
    pub status: IncidentStatus,
    pub notified_at: Option<DateTime<Utc>>,
    pub rules_version: String,
    pub dedupe_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Incident {
    pub fn from_new(id: Uuid, new: NewIncident, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            conversation_id: new.conversation_id,
            user_id: new.user_id,
            provider_conversation_id: new.provider_conversation_id,
            risk_level: new.risk_level,
            crisis_type: new.crisis_type,
            risk_reasons: new.risk_reasons,
            escalated: new.escalated,
            transcript_snippet: new.transcript_snippet,
            status: new.status,
            notified_at: None,
            rules_version: new.rules_version,
            dedupe_key: new.dedupe_key,
            created_at,
        }
    }

    /// A notification is required by the risk level and has not been confirmed.
    pub fn notification_owed(&self) -> bool {
        self.risk_level.requires_notification() && self.notified_at.is_none()
    }
}

/// In-place mutation of an incident's notification fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IncidentUpdate {
    pub status: Option<IncidentStatus>,
    pub notified_at: Option<DateTime<Utc>>,
}

impl IncidentUpdate {
    pub fn notified(at: DateTime<Utc>) -> Self {
        Self {
            status: None,
            notified_at: Some(at),
        }
    }

    pub fn failed() -> Self {
        Self {
            status: Some(IncidentStatus::EmailFailed),
            notified_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(hard: &[&str], soft: &[&str], planning: &[&str], level: RiskLevel) -> Verdict {
        let own = |v: &[&str]| v.iter().map(|s| (*s).to_owned()).collect();
        Verdict {
            risk_level: level,
            matched_hard: own(hard),
            matched_soft: own(soft),
            matched_planning: own(planning),
            escalated: false,
        }
    }

    #[test]
    fn risk_levels_are_ordered() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(!RiskLevel::Low.requires_notification());
        assert!(RiskLevel::Medium.requires_notification());
        assert!(RiskLevel::High.requires_notification());
    }

    #[test]
    fn db_strings_roundtrip() {
        for level in [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High] {
            assert_eq!(RiskLevel::from_db(level.as_db_str()), Some(level));
        }
        for tier in TriggerTier::ALL {
            assert_eq!(TriggerTier::from_db(tier.as_db_str()), Some(tier));
        }
        assert_eq!(IncidentStatus::from_db("email_failed"), Some(IncidentStatus::EmailFailed));
        assert_eq!(RiskLevel::from_db("critical"), None);
    }

    #[test]
    fn primary_trigger_prefers_hard() {
        let v = verdict(&["gun"], &["hit me"], &["tonight"], RiskLevel::High);
        assert_eq!(v.primary_trigger(), Some("gun"));
        let v = verdict(&[], &["hit me"], &["tonight"], RiskLevel::High);
        assert_eq!(v.primary_trigger(), Some("hit me"));
        let v = verdict(&[], &[], &[], RiskLevel::Low);
        assert_eq!(v.primary_trigger(), None);
    }

    #[test]
    fn reasons_are_tier_tagged() {
        let v = verdict(&["gun"], &["hit me"], &["tonight"], RiskLevel::High);
        assert_eq!(v.reasons(), vec!["hard:gun", "soft:hit me", "planning:tonight"]);
    }

    #[test]
    fn lone_planning_word_is_logged_but_not_notified() {
        let v = verdict(&[], &[], &["tonight"], RiskLevel::Low);
        assert!(v.should_log());
        assert!(!v.requires_notification());
    }

    #[test]
    fn notification_owed_until_stamped() {
        let new = NewIncident {
            conversation_id: None,
            user_id: None,
            provider_conversation_id: Some("c1".into()),
            risk_level: RiskLevel::High,
            crisis_type: Some("gun".into()),
            risk_reasons: vec!["hard:gun".into()],
            escalated: false,
            transcript_snippet: "gun".into(),
            status: IncidentStatus::Pending,
            rules_version: "v".into(),
            dedupe_key: None,
        };
        let mut incident = Incident::from_new(Uuid::new_v4(), new, Utc::now());
        assert!(incident.notification_owed());
        incident.notified_at = Some(Utc::now());
        assert!(!incident.notification_owed());
    }
}
