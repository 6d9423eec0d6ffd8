use sha2::{Digest, Sha256};
use sqlx::PgPool;

use crate::types::TriggerTier;

/// Explicit intent or means.
const DEFAULT_HARD: &[&str] = &[
    "suicide",
    "suicidal",
    "kill myself",
    "want to die",
    "end it all",
    "end my life",
    "take my own life",
    "hang myself",
    "overdose",
    "weapon",
    "gun",
    "knife",
];

/// Coded or indirect distress, and interpersonal-harm language.
const DEFAULT_SOFT: &[&str] = &[
    "better off dead",
    "better off without me",
    "i hate myself",
    "i'm a burden",
    "i am a burden",
    "no reason to live",
    "can't go on",
    "can't take it anymore",
    "don't want to be here",
    "end it",
    "hit me",
    "beat me",
    "hurt me",
    "scared of him",
    "scared of her",
];

/// Temporal or methodical language.
const DEFAULT_PLANNING: &[&str] = &[
    "tonight",
    "tomorrow",
    "plan",
    "pills",
    "bridge",
    "rope",
    "goodbye letter",
    "said my goodbyes",
    "wrote a note",
];

/// The three phrase tables the classifier matches against.
///
/// Phrases are trimmed, lower-cased and unique within a tier; tier order is
/// preserved and is the order evidence is reported in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    hard: Vec<String>,
    soft: Vec<String>,
    planning: Vec<String>,
    version: String,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new(DEFAULT_HARD, DEFAULT_SOFT, DEFAULT_PLANNING)
    }
}

impl RuleSet {
    pub fn new<S: AsRef<str>>(hard: &[S], soft: &[S], planning: &[S]) -> Self {
        let hard = clean(hard);
        let soft = clean(soft);
        let planning = clean(planning);
        let version = digest(&hard, &soft, &planning);
        Self {
            hard,
            soft,
            planning,
            version,
        }
    }

    pub fn phrases(&self, tier: TriggerTier) -> &[String] {
        match tier {
            TriggerTier::Hard => &self.hard,
            TriggerTier::Soft => &self.soft,
            TriggerTier::Planning => &self.planning,
        }
    }

    /// Short content digest; changes whenever any tier changes.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Load rule tables from `trigger_phrases`. If the table is empty, seed
    /// it with the built-in defaults.
    pub async fn load(pool: &PgPool) -> Result<Self, sqlx::Error> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT tier, phrase FROM trigger_phrases ORDER BY tier, position, phrase",
        )
        .fetch_all(pool)
        .await?;

        if rows.is_empty() {
            let rules = Self::default();
            rules.seed(pool).await?;
            tracing::info!(version = %rules.version, "trigger phrase tables seeded with defaults");
            return Ok(rules);
        }

        let (mut hard, mut soft, mut planning) = (Vec::new(), Vec::new(), Vec::new());
        for (tier, phrase) in rows {
            match TriggerTier::from_db(&tier) {
                Some(TriggerTier::Hard) => hard.push(phrase),
                Some(TriggerTier::Soft) => soft.push(phrase),
                Some(TriggerTier::Planning) => planning.push(phrase),
                None => tracing::warn!(tier = %tier, phrase = %phrase, "unknown trigger tier, row ignored"),
            }
        }
        let rules = Self::new(&hard[..], &soft[..], &planning[..]);
        tracing::info!(
            version = %rules.version,
            hard = rules.hard.len(),
            soft = rules.soft.len(),
            planning = rules.planning.len(),
            "trigger phrase tables loaded"
        );
        Ok(rules)
    }

    async fn seed(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        for tier in TriggerTier::ALL {
            for (position, phrase) in self.phrases(tier).iter().enumerate() {
                sqlx::query(
                    "INSERT INTO trigger_phrases (tier, phrase, position) VALUES ($1, $2, $3) \
                     ON CONFLICT (tier, phrase) DO NOTHING",
                )
                .bind(tier.as_db_str())
                .bind(phrase)
                .bind(position as i32)
                .execute(pool)
                .await?;
            }
        }
        Ok(())
    }
}

fn clean<S: AsRef<str>>(phrases: &[S]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(phrases.len());
    for p in phrases {
        let p = p.as_ref().trim().to_lowercase();
        if !p.is_empty() && !out.contains(&p) {
            out.push(p);
        }
    }
    out
}

fn digest(hard: &[String], soft: &[String], planning: &[String]) -> String {
    let mut hasher = Sha256::new();
    for (tier, phrases) in [("hard", hard), ("soft", soft), ("planning", planning)] {
        for p in phrases {
            hasher.update(tier.as_bytes());
            hasher.update([0u8]);
            hasher.update(p.as_bytes());
            hasher.update([b'\n']);
        }
    }
    let full = hex::encode(hasher.finalize());
    full[..12].to_owned()
}
