use std::sync::Arc;

use chrono::Utc;
use ray_notify::dispatcher::{AlertDispatcher, DispatchError};
use ray_notify::render::{self, CrisisNotice, Severity};
use serde::Serialize;
use uuid::Uuid;

use super::dedupe::{dedupe_key, truncate_chars};
use super::store::{IncidentStore, StoreError};
use crate::config::SafetyCfg;
use crate::detection::{InboundPayload, InboundTranscript, RuleSet, classify};
use crate::types::{
    ConversationOwner, Incident, IncidentStatus, IncidentUpdate, NewIncident, RiskLevel,
    TriggerTier, Verdict,
};

/// What happened to one webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Nothing matched; nothing written or sent.
    NoAction,
    /// Incident written; risk level does not notify.
    Logged { incident_id: Uuid },
    /// Incident written and alert delivered.
    Notified { incident_id: Uuid },
    /// Redelivery of an already handled transcript.
    Duplicate { incident_id: Uuid },
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::NoAction => "no_action",
            Outcome::Logged { .. } => "logged",
            Outcome::Notified { .. } => "notified",
            Outcome::Duplicate { .. } => "duplicate",
        }
    }

    pub fn incident_id(&self) -> Option<Uuid> {
        match self {
            Outcome::NoAction => None,
            Outcome::Logged { incident_id }
            | Outcome::Notified { incident_id }
            | Outcome::Duplicate { incident_id } => Some(*incident_id),
        }
    }
}

/// Failures that must be reported to the webhook caller so it redelivers.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("incident store failure: {0}")]
    Store(#[from] StoreError),
    #[error("alert for incident {incident_id} not delivered: {source}")]
    Notification {
        incident_id: Uuid,
        #[source]
        source: DispatchError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("alert recipient is not configured")]
    MissingRecipient,
}

/// Turns a classified transcript into incident writes and alerts.
pub struct IncidentPolicy {
    store: Arc<dyn IncidentStore>,
    dispatcher: Arc<dyn AlertDispatcher>,
    rules: Arc<RuleSet>,
    cfg: Arc<SafetyCfg>,
    recipient: String,
}

impl IncidentPolicy {
    pub fn new(
        store: Arc<dyn IncidentStore>,
        dispatcher: Arc<dyn AlertDispatcher>,
        rules: Arc<RuleSet>,
        cfg: Arc<SafetyCfg>,
        recipient: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let recipient = recipient.into().trim().to_owned();
        if recipient.is_empty() {
            return Err(ConfigError::MissingRecipient);
        }
        Ok(Self {
            store,
            dispatcher,
            rules,
            cfg,
            recipient,
        })
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Normalize and classify without side effects.
    pub fn assess(&self, payload: &InboundPayload) -> (String, Verdict) {
        let text = payload.transcript.normalized_text();
        let verdict = classify(&text, &self.rules);
        (text, verdict)
    }

    /// Handle one webhook delivery: classify, persist, notify.
    ///
    /// The incident is written before any dispatch attempt, so an alert
    /// failure never loses the record.
    pub async fn process(&self, payload: &InboundPayload) -> Result<Outcome, ProcessError> {
        let conversation_id = payload.conversation_id.as_deref();
        if let InboundTranscript::Malformed { reason } = &payload.transcript {
            tracing::warn!(conversation_id = ?conversation_id, reason = %reason, "malformed transcript, treated as empty");
        }

        let (text, verdict) = self.assess(payload);
        tracing::info!(
            conversation_id = ?conversation_id,
            risk_level = verdict.risk_level().as_db_str(),
            escalated = verdict.escalated(),
            hard = verdict.matched(TriggerTier::Hard).len(),
            soft = verdict.matched(TriggerTier::Soft).len(),
            planning = verdict.matched(TriggerTier::Planning).len(),
            rules_version = self.rules.version(),
            "transcript classified"
        );

        // Only a provider conversation id makes two deliveries the same event.
        let key = match conversation_id {
            Some(id) if self.cfg.dedupe_enabled && !text.is_empty() => Some(dedupe_key(id, &text)),
            _ => None,
        };

        // Looked up before the logging threshold: rules may have changed
        // since an earlier delivery left an alert owed.
        if let Some(key) = &key {
            if let Some(existing) = self.store.find_by_dedupe_key(key).await? {
                if !existing.notification_owed() {
                    tracing::info!(incident_id = %existing.id, "redelivered transcript already handled");
                    return Ok(Outcome::Duplicate {
                        incident_id: existing.id,
                    });
                }
                tracing::info!(
                    incident_id = %existing.id,
                    status = existing.status.as_db_str(),
                    stored_level = existing.risk_level.as_db_str(),
                    current_level = verdict.risk_level().as_db_str(),
                    "redelivered transcript still owes an alert, retrying"
                );
                let basis = AlertBasis::for_retry(&existing, &verdict);
                return self.notify(existing.id, existing.status, basis, conversation_id).await;
            }
        }

        if !verdict.should_log() {
            return Ok(Outcome::NoAction);
        }

        let owner = self.resolve_owner(conversation_id).await;
        let incident = NewIncident {
            conversation_id: owner.map(|o| o.conversation_id),
            user_id: owner.and_then(|o| o.user_id),
            provider_conversation_id: conversation_id.map(str::to_owned),
            risk_level: verdict.risk_level(),
            crisis_type: verdict.primary_trigger().map(str::to_owned),
            risk_reasons: verdict.reasons(),
            escalated: verdict.escalated(),
            transcript_snippet: truncate_chars(&text, self.cfg.snippet_max_chars),
            status: IncidentStatus::Pending,
            rules_version: self.rules.version().to_owned(),
            dedupe_key: key,
        };
        let incident_id = self.store.insert(incident).await?;
        tracing::warn!(
            incident_id = %incident_id,
            risk_level = verdict.risk_level().as_db_str(),
            crisis_type = ?verdict.primary_trigger(),
            "crisis incident recorded"
        );

        if !verdict.requires_notification() {
            return Ok(Outcome::Logged { incident_id });
        }
        self.notify(
            incident_id,
            IncidentStatus::Pending,
            AlertBasis::from_verdict(&verdict),
            conversation_id,
        )
        .await
    }

    /// Best-effort: an unknown conversation or a failed lookup yields `None`.
    async fn resolve_owner(&self, conversation_id: Option<&str>) -> Option<ConversationOwner> {
        let id = conversation_id?;
        match self.store.find_conversation_owner(id).await {
            Ok(Some(owner)) => Some(owner),
            Ok(None) => {
                tracing::warn!(conversation_id = %id, "conversation owner unknown, incident unlinked");
                None
            }
            Err(e) => {
                tracing::warn!(conversation_id = %id, error = %e, "conversation owner lookup failed, incident unlinked");
                None
            }
        }
    }

    async fn notify(
        &self,
        incident_id: Uuid,
        current_status: IncidentStatus,
        basis: AlertBasis,
        conversation_id: Option<&str>,
    ) -> Result<Outcome, ProcessError> {
        let Some(severity) = severity_for(basis.risk_level) else {
            return Ok(Outcome::Logged { incident_id });
        };
        let notice = CrisisNotice {
            severity,
            incident_id,
            conversation_id: conversation_id.map(str::to_owned),
            trigger: basis.trigger,
            reasons: basis.reasons,
            escalated: basis.escalated,
            detected_at: Utc::now(),
        };
        let alert = render::crisis_alert(&notice, &self.recipient);

        match self.dispatcher.send(alert).await {
            Ok(receipt) => {
                let mut update = IncidentUpdate::notified(Utc::now());
                if current_status == IncidentStatus::EmailFailed {
                    update.status = Some(IncidentStatus::Pending);
                }
                self.store.update(incident_id, update).await?;
                tracing::info!(
                    incident_id = %incident_id,
                    channel = self.dispatcher.name(),
                    message_id = ?receipt.message_id,
                    "crisis alert delivered"
                );
                Ok(Outcome::Notified { incident_id })
            }
            Err(e) => {
                tracing::error!(
                    incident_id = %incident_id,
                    channel = self.dispatcher.name(),
                    error = %e,
                    "crisis alert NOT delivered"
                );
                if let Err(store_err) = self.store.update(incident_id, IncidentUpdate::failed()).await {
                    tracing::error!(incident_id = %incident_id, error = %store_err, "failed to mark incident email_failed");
                }
                Err(ProcessError::Notification {
                    incident_id,
                    source: e,
                })
            }
        }
    }
}

/// Severity and evidence an alert is rendered from.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AlertBasis {
    risk_level: RiskLevel,
    trigger: Option<String>,
    reasons: Vec<String>,
    escalated: bool,
}

impl AlertBasis {
    fn from_verdict(verdict: &Verdict) -> Self {
        Self {
            risk_level: verdict.risk_level(),
            trigger: verdict.primary_trigger().map(str::to_owned),
            reasons: verdict.reasons(),
            escalated: verdict.escalated(),
        }
    }

    /// An owed alert never drops below the level it was recorded at; a
    /// higher current verdict upgrades it.
    fn for_retry(existing: &Incident, verdict: &Verdict) -> Self {
        if verdict.risk_level() > existing.risk_level {
            return Self::from_verdict(verdict);
        }
        Self {
            risk_level: existing.risk_level,
            trigger: existing.crisis_type.clone(),
            reasons: existing.risk_reasons.clone(),
            escalated: existing.escalated,
        }
    }
}

fn severity_for(level: RiskLevel) -> Option<Severity> {
    match level {
        RiskLevel::High => Some(Severity::High),
        RiskLevel::Medium => Some(Severity::Medium),
        RiskLevel::Low => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::parse_payload;
    use crate::incident::store::MemoryStore;
    use ray_notify::dispatcher::MockDispatcher;
    use serde_json::json;

    struct Harness {
        store: Arc<MemoryStore>,
        dispatcher: MockDispatcher,
        policy: IncidentPolicy,
    }

    fn harness_with(store: MemoryStore, dispatcher: MockDispatcher, cfg: SafetyCfg) -> Harness {
        let store = Arc::new(store);
        let policy = IncidentPolicy::new(
            store.clone(),
            Arc::new(dispatcher.clone()),
            Arc::new(RuleSet::default()),
            Arc::new(cfg),
            "safety@example.org",
        )
        .unwrap();
        Harness {
            store,
            dispatcher,
            policy,
        }
    }

    fn harness() -> Harness {
        harness_with(MemoryStore::new(), MockDispatcher::new(), SafetyCfg::default())
    }

    fn payload(user_text: &str) -> InboundPayload {
        parse_payload(
            json!({
                "conversation_id": "conv_1",
                "transcript": [
                    {"role": "agent", "message": "How are you feeling?"},
                    {"role": "user", "message": user_text},
                ]
            })
            .to_string()
            .as_bytes(),
        )
    }

    #[test]
    fn blank_recipient_fails_fast() {
        let result = IncidentPolicy::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MockDispatcher::new()),
            Arc::new(RuleSet::default()),
            Arc::new(SafetyCfg::default()),
            "  ",
        );
        assert!(matches!(result, Err(ConfigError::MissingRecipient)));
    }

    #[tokio::test]
    async fn no_match_writes_and_sends_nothing() {
        let h = harness();
        let outcome = h.policy.process(&payload("good morning")).await.unwrap();
        assert_eq!(outcome, Outcome::NoAction);
        assert!(h.store.incidents().is_empty());
        assert_eq!(h.dispatcher.sent_count(), 0);
    }

    #[tokio::test]
    async fn single_soft_match_is_logged_without_alert() {
        let h = harness();
        let outcome = h.policy.process(&payload("he said he would hit me")).await.unwrap();
        let Outcome::Logged { incident_id } = outcome else {
            panic!("expected Logged, got {outcome:?}");
        };
        let stored = h.store.get(incident_id).unwrap();
        assert_eq!(stored.risk_level, RiskLevel::Low);
        assert_eq!(stored.status, IncidentStatus::Pending);
        assert_eq!(stored.crisis_type.as_deref(), Some("hit me"));
        assert_eq!(stored.notified_at, None);
        assert_eq!(h.dispatcher.sent_count(), 0);
    }

    #[tokio::test]
    async fn high_risk_is_notified_and_stamped() {
        let h = harness();
        let outcome = h.policy.process(&payload("I want to kill myself tonight")).await.unwrap();
        let Outcome::Notified { incident_id } = outcome else {
            panic!("expected Notified, got {outcome:?}");
        };
        let stored = h.store.get(incident_id).unwrap();
        assert_eq!(stored.risk_level, RiskLevel::High);
        assert!(stored.notified_at.is_some());
        assert_eq!(stored.status, IncidentStatus::Pending);
        assert_eq!(stored.rules_version, RuleSet::default().version());

        let sent = h.dispatcher.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.contains("HIGH"));
        assert_eq!(sent[0].recipient, "safety@example.org");
    }

    #[tokio::test]
    async fn medium_risk_is_notified() {
        let h = harness();
        let outcome = h.policy.process(&payload("i hate myself and i'm a burden")).await.unwrap();
        assert!(matches!(outcome, Outcome::Notified { .. }));
        assert!(h.dispatcher.sent()[0].subject.contains("MEDIUM"));
    }

    #[tokio::test]
    async fn dispatch_failure_marks_incident_and_errors() {
        let h = harness_with(
            MemoryStore::new(),
            MockDispatcher::failing("channel down"),
            SafetyCfg::default(),
        );
        let err = h.policy.process(&payload("i want to kill myself")).await.unwrap_err();
        let ProcessError::Notification { incident_id, .. } = err else {
            panic!("expected Notification error, got {err:?}");
        };
        let stored = h.store.get(incident_id).unwrap();
        assert_eq!(stored.status, IncidentStatus::EmailFailed);
        assert_eq!(stored.notified_at, None);
    }

    #[tokio::test]
    async fn store_failure_is_fatal() {
        let h = harness_with(
            MemoryStore::new().failing_writes(),
            MockDispatcher::new(),
            SafetyCfg::default(),
        );
        let err = h.policy.process(&payload("i want to kill myself")).await.unwrap_err();
        assert!(matches!(err, ProcessError::Store(_)));
        assert_eq!(h.dispatcher.sent_count(), 0);
    }

    #[tokio::test]
    async fn owner_lookup_failure_degrades_to_null_refs() {
        let h = harness_with(
            MemoryStore::new().failing_lookups(),
            MockDispatcher::new(),
            SafetyCfg::default(),
        );
        let outcome = h.policy.process(&payload("i want to kill myself")).await.unwrap();
        let stored = h.store.get(outcome.incident_id().unwrap()).unwrap();
        assert_eq!(stored.conversation_id, None);
        assert_eq!(stored.user_id, None);
        assert_eq!(stored.provider_conversation_id.as_deref(), Some("conv_1"));
    }

    #[tokio::test]
    async fn known_owner_is_linked() {
        let owner = ConversationOwner {
            conversation_id: Uuid::new_v4(),
            user_id: Some(Uuid::new_v4()),
        };
        let h = harness_with(
            MemoryStore::new().with_owner("conv_1", owner),
            MockDispatcher::new(),
            SafetyCfg::default(),
        );
        let outcome = h.policy.process(&payload("i want to kill myself")).await.unwrap();
        let stored = h.store.get(outcome.incident_id().unwrap()).unwrap();
        assert_eq!(stored.conversation_id, Some(owner.conversation_id));
        assert_eq!(stored.user_id, owner.user_id);
    }

    #[tokio::test]
    async fn snippet_is_truncated_but_matching_uses_full_text() {
        let cfg = SafetyCfg {
            snippet_max_chars: 20,
            ..SafetyCfg::default()
        };
        let h = harness_with(MemoryStore::new(), MockDispatcher::new(), cfg);
        let text = format!("{} i want to kill myself", "a".repeat(100));
        let outcome = h.policy.process(&payload(&text)).await.unwrap();
        let stored = h.store.get(outcome.incident_id().unwrap()).unwrap();
        assert_eq!(stored.transcript_snippet.chars().count(), 20);
        assert_eq!(stored.risk_level, RiskLevel::High);
    }

    fn owed_medium_incident() -> Incident {
        let new = NewIncident {
            conversation_id: None,
            user_id: None,
            provider_conversation_id: Some("conv_1".into()),
            risk_level: RiskLevel::Medium,
            crisis_type: Some("i hate myself".into()),
            risk_reasons: vec!["soft:i hate myself".into(), "soft:i'm a burden".into()],
            escalated: false,
            transcript_snippet: "i hate myself and i'm a burden".into(),
            status: IncidentStatus::EmailFailed,
            rules_version: "old".into(),
            dedupe_key: Some("k".into()),
        };
        Incident::from_new(Uuid::new_v4(), new, Utc::now())
    }

    #[test]
    fn retry_basis_never_drops_below_stored_level() {
        let existing = owed_medium_incident();
        let lower = classify("i hate myself", &RuleSet::default());
        assert_eq!(lower.risk_level(), RiskLevel::Low);
        let basis = AlertBasis::for_retry(&existing, &lower);
        assert_eq!(basis.risk_level, RiskLevel::Medium);
        assert_eq!(basis.trigger.as_deref(), Some("i hate myself"));
        assert_eq!(basis.reasons, existing.risk_reasons);
    }

    #[test]
    fn retry_basis_takes_a_higher_current_verdict() {
        let existing = owed_medium_incident();
        let higher = classify("i hate myself, i bought a gun", &RuleSet::default());
        let basis = AlertBasis::for_retry(&existing, &higher);
        assert_eq!(basis.risk_level, RiskLevel::High);
        assert_eq!(basis.trigger.as_deref(), Some("gun"));
    }

    #[test]
    fn severity_mapping() {
        assert_eq!(severity_for(RiskLevel::High), Some(Severity::High));
        assert_eq!(severity_for(RiskLevel::Medium), Some(Severity::Medium));
        assert_eq!(severity_for(RiskLevel::Low), None);
    }
}
