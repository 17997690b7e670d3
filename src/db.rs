//! Kernel state database backed by SQLite.
//!
//! Holds the decision history and the threat cache. Both tables are
//! append-only; triggers in the schema reject updates and deletes.
//! Migration is applied inline via `include_str!` on first open.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::memory::{MemoryBackend, MemoryEntry};
use crate::registry::{CacheOrigin, CachedThreat, Severity, ThreatCacheBackend, ThreatRecord, ThreatType};
use crate::types::{tokenize, Decision, RiskCategory, StoreError};

/// The kernel's SQLite state database.
#[derive(Debug, Clone)]
pub struct StateDb {
    pool: SqlitePool,
}

type MemoryRow = (String, String, Option<String>, String, i64, String, String, String);

type ThreatRow = (String, String, String, String, String, String, String, i64, String);

impl StateDb {
    /// Open (or create) the state database at the given path and apply migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migration fails.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create state db directory {}", parent.display())
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .pragma("trusted_schema", "OFF");

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open state db at {}", path.display()))?;

        let migration_sql = include_str!("../migrations/001_state_schema.sql");
        sqlx::raw_sql(migration_sql)
            .execute(&pool)
            .await
            .context("failed to apply state schema migration")?;

        Ok(Self { pool })
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Decision history
// ---------------------------------------------------------------------------

#[async_trait]
impl MemoryBackend for StateDb {
    async fn load(&self) -> Result<Vec<MemoryEntry>, StoreError> {
        let rows = sqlx::query_as::<_, MemoryRow>(
            "SELECT action, action_hash, target, decision, risk_score, category, reasoning, created_at
             FROM memory_entries
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(memory_row_into_entry).collect()
    }

    async fn append(&self, entry: &MemoryEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO memory_entries
               (action, action_hash, target, decision, risk_score, category, reasoning, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&entry.action)
        .bind(&entry.action_hash)
        .bind(entry.target.as_deref())
        .bind(entry.decision.as_str())
        .bind(i64::from(entry.risk_score))
        .bind(entry.category.as_str())
        .bind(&entry.reasoning)
        .bind(entry.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn memory_row_into_entry(row: MemoryRow) -> Result<MemoryEntry, StoreError> {
    let (action, action_hash, target, decision, risk_score, category, reasoning, created_at) = row;
    Ok(MemoryEntry {
        tokens: tokenize(&action),
        action,
        action_hash,
        target,
        decision: Decision::parse(&decision)?,
        risk_score: score_from_column(risk_score)?,
        category: RiskCategory::parse(&category)?,
        reasoning,
        timestamp: timestamp_from_column(&created_at)?,
    })
}

// ---------------------------------------------------------------------------
// Threat cache
// ---------------------------------------------------------------------------

#[async_trait]
impl ThreatCacheBackend for StateDb {
    async fn load(&self) -> Result<Vec<CachedThreat>, StoreError> {
        let rows = sqlx::query_as::<_, ThreatRow>(
            "SELECT threat_id, threat_type, pattern, source_hash, reporter, reported_at,
                    severity, risk_score, origin
             FROM threat_cache
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(threat_row_into_cached).collect()
    }

    async fn append(&self, threat: &CachedThreat) -> Result<(), StoreError> {
        let record = &threat.record;
        sqlx::query(
            "INSERT OR IGNORE INTO threat_cache
               (threat_id, threat_type, pattern, source_hash, reporter, reported_at,
                severity, risk_score, origin)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&record.threat_id)
        .bind(record.threat_type.as_str())
        .bind(&record.pattern)
        .bind(&record.source_hash)
        .bind(&record.reporter)
        .bind(record.timestamp.to_rfc3339())
        .bind(record.severity.as_str())
        .bind(i64::from(record.risk_score))
        .bind(threat.origin.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn threat_row_into_cached(row: ThreatRow) -> Result<CachedThreat, StoreError> {
    let (threat_id, threat_type, pattern, source_hash, reporter, reported_at, severity, risk_score, origin) =
        row;
    Ok(CachedThreat {
        record: ThreatRecord {
            threat_id,
            threat_type: ThreatType::parse(&threat_type)?,
            pattern,
            source_hash,
            reporter,
            timestamp: timestamp_from_column(&reported_at)?,
            severity: Severity::parse(&severity)?,
            risk_score: score_from_column(risk_score)?,
        },
        origin: CacheOrigin::parse(&origin)?,
    })
}

fn score_from_column(value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("risk score out of range: {value}")))
}

fn timestamp_from_column(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {value:?}: {e}")))
}
