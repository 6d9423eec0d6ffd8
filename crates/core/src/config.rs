use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;

/// Detection service tunables. Loaded from `safety_config` table at startup.
/// First boot writes defaults; subsequent boots read existing values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyCfg {
    /// Character cap for the stored transcript snippet.
    pub snippet_max_chars: usize,
    /// Collapse redelivered webhooks onto one incident.
    pub dedupe_enabled: bool,
    pub webhook_body_limit_bytes: usize,
}

impl Default for SafetyCfg {
    fn default() -> Self {
        Self {
            snippet_max_chars: 2000,
            dedupe_enabled: true,
            webhook_body_limit_bytes: 1024 * 1024,
        }
    }
}

impl SafetyCfg {
    /// Load config from `safety_config` table. If table is empty, seed with defaults.
    pub async fn load(pool: &PgPool) -> Result<Self, sqlx::Error> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM safety_config")
                .fetch_all(pool)
                .await?;

        if rows.is_empty() {
            let cfg = Self::default();
            cfg.seed(pool).await?;
            return Ok(cfg);
        }

        let map: HashMap<String, String> = rows.into_iter().collect();
        Ok(Self::from_map(&map))
    }

    /// Write all default values into `safety_config` table.
    async fn seed(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        for (key, value, desc) in &self.to_entries() {
            sqlx::query(
                "INSERT INTO safety_config (key, value, description) VALUES ($1, $2, $3) \
                 ON CONFLICT (key) DO NOTHING",
            )
            .bind(key)
            .bind(value)
            .bind(desc)
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    fn from_map(m: &HashMap<String, String>) -> Self {
        let d = Self::default();
        Self {
            snippet_max_chars: get_or(m, "snippet_max_chars", d.snippet_max_chars),
            dedupe_enabled: get_or(m, "dedupe_enabled", d.dedupe_enabled),
            webhook_body_limit_bytes: get_or(m, "webhook_body_limit_bytes", d.webhook_body_limit_bytes),
        }
    }

    fn to_entries(&self) -> Vec<(&str, String, &str)> {
        vec![
            ("snippet_max_chars", self.snippet_max_chars.to_string(), "Stored transcript snippet cap (chars)"),
            ("dedupe_enabled", self.dedupe_enabled.to_string(), "Collapse redelivered webhooks onto one incident"),
            ("webhook_body_limit_bytes", self.webhook_body_limit_bytes.to_string(), "Max webhook body size"),
        ]
    }
}

fn get_or<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, default: T) -> T {
    map.get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
