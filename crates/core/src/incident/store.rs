use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use crate::types::{ConversationOwner, Incident, IncidentUpdate, NewIncident};

/// Error type for incident persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("incident not found: {0}")]
    NotFound(Uuid),
    #[error("dedupe key already recorded: {0}")]
    Conflict(String),
    #[error("corrupt incident row: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable incident records plus the conversation-owner lookup.
#[async_trait::async_trait]
pub trait IncidentStore: Send + Sync {
    async fn insert(&self, incident: NewIncident) -> Result<Uuid, StoreError>;

    async fn update(&self, id: Uuid, update: IncidentUpdate) -> Result<(), StoreError>;

    /// Which account a provider conversation id belongs to.
    async fn find_conversation_owner(
        &self,
        provider_conversation_id: &str,
    ) -> Result<Option<ConversationOwner>, StoreError>;

    async fn find_by_dedupe_key(&self, key: &str) -> Result<Option<Incident>, StoreError>;
}

/// In-process store for tests and database-less runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    incidents: Vec<Incident>,
    owners: HashMap<String, ConversationOwner>,
    fail_writes: bool,
    fail_lookups: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the account behind a provider conversation id.
    pub fn with_owner(self, provider_conversation_id: &str, owner: ConversationOwner) -> Self {
        self.lock_state(|s| {
            s.owners.insert(provider_conversation_id.to_owned(), owner);
        });
        self
    }

    /// Make every insert/update fail, as an unreachable database would.
    pub fn failing_writes(self) -> Self {
        self.lock_state(|s| s.fail_writes = true);
        self
    }

    /// Make every owner lookup fail.
    pub fn failing_lookups(self) -> Self {
        self.lock_state(|s| s.fail_lookups = true);
        self
    }

    /// Snapshot of all incidents in insertion order.
    pub fn incidents(&self) -> Vec<Incident> {
        self.lock_state(|s| s.incidents.clone())
    }

    pub fn get(&self, id: Uuid) -> Option<Incident> {
        self.lock_state(|s| s.incidents.iter().find(|i| i.id == id).cloned())
    }

    fn lock_state<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

#[async_trait::async_trait]
impl IncidentStore for MemoryStore {
    async fn insert(&self, incident: NewIncident) -> Result<Uuid, StoreError> {
        self.lock_state(|s| {
            if s.fail_writes {
                return Err(StoreError::Unavailable("writes disabled".into()));
            }
            if let Some(key) = &incident.dedupe_key {
                if s.incidents.iter().any(|i| i.dedupe_key.as_ref() == Some(key)) {
                    return Err(StoreError::Conflict(key.clone()));
                }
            }
            let id = Uuid::new_v4();
            s.incidents.push(Incident::from_new(id, incident, Utc::now()));
            Ok(id)
        })
    }

    async fn update(&self, id: Uuid, update: IncidentUpdate) -> Result<(), StoreError> {
        self.lock_state(|s| {
            if s.fail_writes {
                return Err(StoreError::Unavailable("writes disabled".into()));
            }
            let incident = s
                .incidents
                .iter_mut()
                .find(|i| i.id == id)
                .ok_or(StoreError::NotFound(id))?;
            if let Some(status) = update.status {
                incident.status = status;
            }
            if let Some(at) = update.notified_at {
                incident.notified_at = Some(at);
            }
            Ok(())
        })
    }

    async fn find_conversation_owner(
        &self,
        provider_conversation_id: &str,
    ) -> Result<Option<ConversationOwner>, StoreError> {
        self.lock_state(|s| {
            if s.fail_lookups {
                return Err(StoreError::Unavailable("lookups disabled".into()));
            }
            Ok(s.owners.get(provider_conversation_id).copied())
        })
    }

    async fn find_by_dedupe_key(&self, key: &str) -> Result<Option<Incident>, StoreError> {
        self.lock_state(|s| {
            Ok(s.incidents
                .iter()
                .find(|i| i.dedupe_key.as_deref() == Some(key))
                .cloned())
        })
    }
}
