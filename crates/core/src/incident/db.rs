use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::store::{IncidentStore, StoreError};
use crate::types::{
    ConversationOwner, Incident, IncidentStatus, IncidentUpdate, NewIncident, RiskLevel,
};

/// Postgres-backed incident store (`crisis_incidents`, `conversations`).
#[derive(Debug, Clone)]
pub struct PgIncidentStore {
    pool: PgPool,
}

impl PgIncidentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Row type for sqlx deserialization from the `crisis_incidents` table.
#[derive(sqlx::FromRow)]
struct IncidentRow {
    id: Uuid,
    conversation_id: Option<Uuid>,
    user_id: Option<Uuid>,
    provider_conversation_id: Option<String>,
    risk_level: String,
    crisis_type: Option<String>,
    risk_reasons: Vec<String>,
    escalated: bool,
    transcript_snippet: String,
    status: String,
    notified_at: Option<DateTime<Utc>>,
    rules_version: String,
    dedupe_key: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<IncidentRow> for Incident {
    type Error = StoreError;

    fn try_from(row: IncidentRow) -> Result<Self, Self::Error> {
        let risk_level = RiskLevel::from_db(&row.risk_level)
            .ok_or_else(|| StoreError::Corrupt(format!("risk_level {:?}", row.risk_level)))?;
        let status = IncidentStatus::from_db(&row.status)
            .ok_or_else(|| StoreError::Corrupt(format!("status {:?}", row.status)))?;
        Ok(Self {
            id: row.id,
            conversation_id: row.conversation_id,
            user_id: row.user_id,
            provider_conversation_id: row.provider_conversation_id,
            risk_level,
            crisis_type: row.crisis_type,
            risk_reasons: row.risk_reasons,
            escalated: row.escalated,
            transcript_snippet: row.transcript_snippet,
            status,
            notified_at: row.notified_at,
            rules_version: row.rules_version,
            dedupe_key: row.dedupe_key,
            created_at: row.created_at,
        })
    }
}

/// Unique-key violations become `Conflict`; everything else stays a database error.
fn map_insert_error(e: sqlx::Error, dedupe_key: Option<&str>) -> StoreError {
    if let (sqlx::Error::Database(db), Some(key)) = (&e, dedupe_key) {
        if db.is_unique_violation() {
            return StoreError::Conflict(key.to_owned());
        }
    }
    StoreError::Database(e)
}

#[async_trait::async_trait]
impl IncidentStore for PgIncidentStore {
    async fn insert(&self, incident: NewIncident) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO crisis_incidents (id, conversation_id, user_id, provider_conversation_id, risk_level, \
             crisis_type, risk_reasons, escalated, transcript_snippet, status, rules_version, dedupe_key) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(id)
        .bind(incident.conversation_id)
        .bind(incident.user_id)
        .bind(&incident.provider_conversation_id)
        .bind(incident.risk_level.as_db_str())
        .bind(&incident.crisis_type)
        .bind(&incident.risk_reasons)
        .bind(incident.escalated)
        .bind(&incident.transcript_snippet)
        .bind(incident.status.as_db_str())
        .bind(&incident.rules_version)
        .bind(&incident.dedupe_key)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, incident.dedupe_key.as_deref()))?;
        Ok(id)
    }

    async fn update(&self, id: Uuid, update: IncidentUpdate) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE crisis_incidents SET status = COALESCE($1, status), \
             notified_at = COALESCE($2, notified_at) WHERE id = $3",
        )
        .bind(update.status.map(IncidentStatus::as_db_str))
        .bind(update.notified_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn find_conversation_owner(
        &self,
        provider_conversation_id: &str,
    ) -> Result<Option<ConversationOwner>, StoreError> {
        let row: Option<(Uuid, Option<Uuid>)> = sqlx::query_as(
            "SELECT id, user_id FROM conversations WHERE elevenlabs_conversation_id = $1",
        )
        .bind(provider_conversation_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(conversation_id, user_id)| ConversationOwner {
            conversation_id,
            user_id,
        }))
    }

    async fn find_by_dedupe_key(&self, key: &str) -> Result<Option<Incident>, StoreError> {
        let row: Option<IncidentRow> = sqlx::query_as(
            "SELECT id, conversation_id, user_id, provider_conversation_id, risk_level, crisis_type, \
             risk_reasons, escalated, transcript_snippet, status, notified_at, rules_version, dedupe_key, created_at \
             FROM crisis_incidents WHERE dedupe_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Incident::try_from).transpose()
    }
}
