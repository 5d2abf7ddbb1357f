// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tenant Registry
//!
//! Persistent record of every tenant bot: credentials, lifecycle status and
//! the last observed run state. The supervisor's process table is the
//! source of truth for what is running; the registry is an eventually
//! consistent mirror written after each confirmed transition.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::supervisor::TenantConfig;

/// Registry errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No row exists for the tenant.
    #[error("Tenant not found: {0}")]
    NotFound(String),

    /// A stored status string is not recognised.
    #[error("Invalid tenant status: {0}")]
    InvalidStatus(String),
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Persisted lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// Last explicit command started the bot.
    Active,
    /// Last explicit command stopped the bot.
    Suspended,
    /// The last start failed or crash recovery gave up.
    Error,
}

impl TenantStatus {
    /// Column value.
    pub fn as_str(self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Error => "error",
        }
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TenantStatus {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(TenantStatus::Active),
            "suspended" => Ok(TenantStatus::Suspended),
            "error" => Ok(TenantStatus::Error),
            other => Err(RegistryError::InvalidStatus(other.to_string())),
        }
    }
}

/// A tenant bot row.
#[derive(Debug, Clone, Serialize)]
pub struct TenantBot {
    /// Tenant identifier
    pub tenant_id: String,
    /// Public Discord application id
    pub client_id: String,
    /// Encrypted bot token envelope
    #[serde(skip_serializing)]
    pub encrypted_token: String,
    /// Tenant database connection string
    #[serde(skip_serializing)]
    pub database_url: String,
    /// Cache key namespace
    pub cache_prefix: String,
    /// Lifecycle status set by the last command or crash-recovery outcome
    pub status: TenantStatus,
    /// Administrative suspension; blocks start and restart
    pub is_suspended: bool,
    /// Whether the bot was last known to be running
    pub is_running: bool,
    /// Last successful start
    pub last_started_at: Option<DateTime<Utc>>,
    /// Last explicit stop
    pub last_stopped_at: Option<DateTime<Utc>>,
    /// Most recent failure message
    pub last_error: Option<String>,
    /// Failures since the last successful start
    pub error_count: i32,
    /// Last modification
    pub updated_at: DateTime<Utc>,
}

impl TenantBot {
    /// Spawn configuration derived from this row.
    pub fn config(&self) -> TenantConfig {
        TenantConfig {
            tenant_id: self.tenant_id.clone(),
            encrypted_token: self.encrypted_token.clone(),
            client_id: self.client_id.clone(),
            database_url: self.database_url.clone(),
            cache_prefix: self.cache_prefix.clone(),
        }
    }

    /// Whether autostart should bring this tenant back up.
    pub fn wants_autostart(&self) -> bool {
        self.is_running && !self.is_suspended
    }
}

/// Fields supplied when registering a tenant.
#[derive(Debug, Clone)]
pub struct NewTenantBot {
    /// Tenant identifier
    pub tenant_id: String,
    /// Public Discord application id
    pub client_id: String,
    /// Encrypted bot token envelope
    pub encrypted_token: String,
    /// Tenant database connection string
    pub database_url: String,
    /// Cache key namespace
    pub cache_prefix: String,
}

/// Storage for tenant bot rows.
///
/// All `mark_*` methods fail with [`RegistryError::NotFound`] for unknown
/// tenants.
#[async_trait]
pub trait TenantRegistry: Send + Sync {
    /// Fetch one tenant.
    async fn get(&self, tenant_id: &str) -> Result<Option<TenantBot>>;

    /// All tenants ordered by id.
    async fn list(&self) -> Result<Vec<TenantBot>>;

    /// Insert a tenant or replace its credentials and connection settings.
    async fn register(&self, bot: &NewTenantBot) -> Result<()>;

    /// Explicit start succeeded: running, active, error counter cleared.
    async fn mark_started(&self, tenant_id: &str) -> Result<()>;

    /// Explicit stop completed: not running, suspended.
    async fn mark_stopped(&self, tenant_id: &str) -> Result<()>;

    /// A start failed or crash recovery gave up.
    async fn mark_failed(&self, tenant_id: &str, error: &str) -> Result<()>;

    /// The bot reported ready (including after an automatic respawn).
    async fn mark_ready(&self, tenant_id: &str) -> Result<()>;

    /// The bot exited unexpectedly; a respawn may follow.
    async fn record_crash(&self, tenant_id: &str, error: &str) -> Result<()>;

    /// Set or clear administrative suspension.
    async fn set_suspended(&self, tenant_id: &str, suspended: bool) -> Result<()>;
}

#[derive(sqlx::FromRow)]
struct TenantBotRow {
    tenant_id: String,
    client_id: String,
    encrypted_token: String,
    database_url: String,
    cache_prefix: String,
    status: String,
    is_suspended: bool,
    is_running: bool,
    last_started_at: Option<DateTime<Utc>>,
    last_stopped_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    error_count: i32,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TenantBotRow> for TenantBot {
    type Error = RegistryError;

    fn try_from(row: TenantBotRow) -> Result<Self> {
        Ok(TenantBot {
            status: row.status.parse()?,
            tenant_id: row.tenant_id,
            client_id: row.client_id,
            encrypted_token: row.encrypted_token,
            database_url: row.database_url,
            cache_prefix: row.cache_prefix,
            is_suspended: row.is_suspended,
            is_running: row.is_running,
            last_started_at: row.last_started_at,
            last_stopped_at: row.last_stopped_at,
            last_error: row.last_error,
            error_count: row.error_count,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT tenant_id, client_id, encrypted_token, database_url, cache_prefix,
           status, is_suspended, is_running, last_started_at, last_stopped_at,
           last_error, error_count, updated_at
    FROM tenant_bots
"#;

/// PostgreSQL-backed registry (`tenant_bots` table).
pub struct PostgresTenantRegistry {
    pool: PgPool,
}

impl PostgresTenantRegistry {
    /// Create a new registry client.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn update(&self, tenant_id: &str, sql: &str, text: Option<&str>) -> Result<()> {
        let mut query = sqlx::query(sql).bind(tenant_id);
        if let Some(text) = text {
            query = query.bind(text);
        }
        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(tenant_id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TenantRegistry for PostgresTenantRegistry {
    async fn get(&self, tenant_id: &str) -> Result<Option<TenantBot>> {
        let row = sqlx::query_as::<_, TenantBotRow>(&format!(
            "{SELECT_COLUMNS} WHERE tenant_id = $1"
        ))
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TenantBot::try_from).transpose()
    }

    async fn list(&self) -> Result<Vec<TenantBot>> {
        let rows = sqlx::query_as::<_, TenantBotRow>(&format!(
            "{SELECT_COLUMNS} ORDER BY tenant_id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TenantBot::try_from).collect()
    }

    async fn register(&self, bot: &NewTenantBot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_bots (
                tenant_id, client_id, encrypted_token, database_url, cache_prefix
            ) VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id) DO UPDATE SET
                client_id = EXCLUDED.client_id,
                encrypted_token = EXCLUDED.encrypted_token,
                database_url = EXCLUDED.database_url,
                cache_prefix = EXCLUDED.cache_prefix,
                updated_at = NOW()
            "#,
        )
        .bind(&bot.tenant_id)
        .bind(&bot.client_id)
        .bind(&bot.encrypted_token)
        .bind(&bot.database_url)
        .bind(&bot.cache_prefix)
        .execute(&self.pool)
        .await?;

        tracing::info!(tenant_id = %bot.tenant_id, "Registered tenant bot");

        Ok(())
    }

    async fn mark_started(&self, tenant_id: &str) -> Result<()> {
        self.update(
            tenant_id,
            r#"
            UPDATE tenant_bots SET
                is_running = TRUE,
                status = 'active',
                last_started_at = NOW(),
                last_error = NULL,
                error_count = 0,
                updated_at = NOW()
            WHERE tenant_id = $1
            "#,
            None,
        )
        .await?;

        tracing::debug!(tenant_id = %tenant_id, "Persisted start");
        Ok(())
    }

    async fn mark_stopped(&self, tenant_id: &str) -> Result<()> {
        self.update(
            tenant_id,
            r#"
            UPDATE tenant_bots SET
                is_running = FALSE,
                status = 'suspended',
                last_stopped_at = NOW(),
                updated_at = NOW()
            WHERE tenant_id = $1
            "#,
            None,
        )
        .await?;

        tracing::debug!(tenant_id = %tenant_id, "Persisted stop");
        Ok(())
    }

    async fn mark_failed(&self, tenant_id: &str, error: &str) -> Result<()> {
        self.update(
            tenant_id,
            r#"
            UPDATE tenant_bots SET
                is_running = FALSE,
                status = 'error',
                last_error = $2,
                error_count = error_count + 1,
                updated_at = NOW()
            WHERE tenant_id = $1
            "#,
            Some(error),
        )
        .await?;

        tracing::info!(tenant_id = %tenant_id, error = %error, "Persisted failure");
        Ok(())
    }

    async fn mark_ready(&self, tenant_id: &str) -> Result<()> {
        self.update(
            tenant_id,
            r#"
            UPDATE tenant_bots SET
                is_running = TRUE,
                status = 'active',
                updated_at = NOW()
            WHERE tenant_id = $1
            "#,
            None,
        )
        .await
    }

    async fn record_crash(&self, tenant_id: &str, error: &str) -> Result<()> {
        self.update(
            tenant_id,
            r#"
            UPDATE tenant_bots SET
                last_error = $2,
                updated_at = NOW()
            WHERE tenant_id = $1
            "#,
            Some(error),
        )
        .await
    }

    async fn set_suspended(&self, tenant_id: &str, suspended: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tenant_bots SET is_suspended = $2, updated_at = NOW() WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .bind(suspended)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(tenant_id.to_string()));
        }

        tracing::info!(tenant_id = %tenant_id, suspended, "Updated administrative suspension");
        Ok(())
    }
}

/// In-process registry for tests and database-less development.
#[derive(Default)]
pub struct InMemoryTenantRegistry {
    rows: RwLock<HashMap<String, TenantBot>>,
}

impl InMemoryTenantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify<F>(&self, tenant_id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut TenantBot),
    {
        let mut rows = self.rows.write().await;
        let row = rows
            .get_mut(tenant_id)
            .ok_or_else(|| RegistryError::NotFound(tenant_id.to_string()))?;
        f(row);
        row.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl TenantRegistry for InMemoryTenantRegistry {
    async fn get(&self, tenant_id: &str) -> Result<Option<TenantBot>> {
        Ok(self.rows.read().await.get(tenant_id).cloned())
    }

    async fn list(&self) -> Result<Vec<TenantBot>> {
        let mut bots: Vec<TenantBot> = self.rows.read().await.values().cloned().collect();
        bots.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        Ok(bots)
    }

    async fn register(&self, bot: &NewTenantBot) -> Result<()> {
        let mut rows = self.rows.write().await;
        let now = Utc::now();
        rows.entry(bot.tenant_id.clone())
            .and_modify(|row| {
                row.client_id = bot.client_id.clone();
                row.encrypted_token = bot.encrypted_token.clone();
                row.database_url = bot.database_url.clone();
                row.cache_prefix = bot.cache_prefix.clone();
                row.updated_at = now;
            })
            .or_insert_with(|| TenantBot {
                tenant_id: bot.tenant_id.clone(),
                client_id: bot.client_id.clone(),
                encrypted_token: bot.encrypted_token.clone(),
                database_url: bot.database_url.clone(),
                cache_prefix: bot.cache_prefix.clone(),
                status: TenantStatus::Suspended,
                is_suspended: false,
                is_running: false,
                last_started_at: None,
                last_stopped_at: None,
                last_error: None,
                error_count: 0,
                updated_at: now,
            });
        Ok(())
    }

    async fn mark_started(&self, tenant_id: &str) -> Result<()> {
        self.modify(tenant_id, |row| {
            row.is_running = true;
            row.status = TenantStatus::Active;
            row.last_started_at = Some(Utc::now());
            row.last_error = None;
            row.error_count = 0;
        })
        .await
    }

    async fn mark_stopped(&self, tenant_id: &str) -> Result<()> {
        self.modify(tenant_id, |row| {
            row.is_running = false;
            row.status = TenantStatus::Suspended;
            row.last_stopped_at = Some(Utc::now());
        })
        .await
    }

    async fn mark_failed(&self, tenant_id: &str, error: &str) -> Result<()> {
        self.modify(tenant_id, |row| {
            row.is_running = false;
            row.status = TenantStatus::Error;
            row.last_error = Some(error.to_string());
            row.error_count += 1;
        })
        .await
    }

    async fn mark_ready(&self, tenant_id: &str) -> Result<()> {
        self.modify(tenant_id, |row| {
            row.is_running = true;
            row.status = TenantStatus::Active;
        })
        .await
    }

    async fn record_crash(&self, tenant_id: &str, error: &str) -> Result<()> {
        self.modify(tenant_id, |row| {
            row.last_error = Some(error.to_string());
        })
        .await
    }

    async fn set_suspended(&self, tenant_id: &str, suspended: bool) -> Result<()> {
        self.modify(tenant_id, |row| {
            row.is_suspended = suspended;
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_bot(tenant_id: &str) -> NewTenantBot {
        NewTenantBot {
            tenant_id: tenant_id.to_string(),
            client_id: "1100".to_string(),
            encrypted_token: "v1:nonce:ct".to_string(),
            database_url: "postgres://tenant".to_string(),
            cache_prefix: format!("{tenant_id}:"),
        }
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("active".parse::<TenantStatus>().unwrap(), TenantStatus::Active);
        assert_eq!("error".parse::<TenantStatus>().unwrap(), TenantStatus::Error);
        assert!(matches!(
            "paused".parse::<TenantStatus>(),
            Err(RegistryError::InvalidStatus(s)) if s == "paused"
        ));
    }

    #[tokio::test]
    async fn test_lifecycle_fields() {
        let registry = InMemoryTenantRegistry::new();
        registry.register(&new_bot("t1")).await.unwrap();

        let bot = registry.get("t1").await.unwrap().unwrap();
        assert_eq!(bot.status, TenantStatus::Suspended);
        assert!(!bot.is_running);

        registry.mark_failed("t1", "fork failed").await.unwrap();
        registry.mark_failed("t1", "fork failed again").await.unwrap();
        let bot = registry.get("t1").await.unwrap().unwrap();
        assert_eq!(bot.status, TenantStatus::Error);
        assert_eq!(bot.error_count, 2);
        assert_eq!(bot.last_error.as_deref(), Some("fork failed again"));

        registry.mark_started("t1").await.unwrap();
        let bot = registry.get("t1").await.unwrap().unwrap();
        assert_eq!(bot.status, TenantStatus::Active);
        assert!(bot.is_running);
        assert_eq!(bot.error_count, 0);
        assert!(bot.last_started_at.is_some());

        registry.mark_stopped("t1").await.unwrap();
        let bot = registry.get("t1").await.unwrap().unwrap();
        assert_eq!(bot.status, TenantStatus::Suspended);
        assert!(!bot.is_running);
        assert!(bot.last_stopped_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_tenant() {
        let registry = InMemoryTenantRegistry::new();
        assert!(registry.get("nope").await.unwrap().is_none());
        assert!(matches!(
            registry.mark_started("nope").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_register_keeps_lifecycle_state() {
        let registry = InMemoryTenantRegistry::new();
        registry.register(&new_bot("t1")).await.unwrap();
        registry.mark_started("t1").await.unwrap();

        let mut update = new_bot("t1");
        update.client_id = "2200".to_string();
        registry.register(&update).await.unwrap();

        let bot = registry.get("t1").await.unwrap().unwrap();
        assert_eq!(bot.client_id, "2200");
        assert!(bot.is_running);
    }

    #[tokio::test]
    async fn test_autostart_candidates() {
        let registry = InMemoryTenantRegistry::new();
        for id in ["a", "b", "c"] {
            registry.register(&new_bot(id)).await.unwrap();
        }
        registry.mark_started("a").await.unwrap();
        registry.mark_started("b").await.unwrap();
        registry.set_suspended("b", true).await.unwrap();

        let wanted: Vec<String> = registry
            .list()
            .await
            .unwrap()
            .into_iter()
            .filter(TenantBot::wants_autostart)
            .map(|b| b.tenant_id)
            .collect();
        assert_eq!(wanted, vec!["a"]);
    }

    #[test]
    fn test_serialized_row_omits_secrets() {
        let bot = TenantBot {
            tenant_id: "t1".to_string(),
            client_id: "1".to_string(),
            encrypted_token: "v1:secret".to_string(),
            database_url: "postgres://user:pw@host/db".to_string(),
            cache_prefix: "t1:".to_string(),
            status: TenantStatus::Active,
            is_suspended: false,
            is_running: true,
            last_started_at: None,
            last_stopped_at: None,
            last_error: None,
            error_count: 0,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&bot).unwrap();
        assert!(!json.contains("v1:secret"));
        assert!(!json.contains("pw@host"));
        assert!(json.contains("\"status\":\"active\""));
    }
}
