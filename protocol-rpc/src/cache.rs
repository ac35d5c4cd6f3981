//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

//! SQLite backed local round cache, one table per party.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use common::blob::ContentId;
use crypto::prelude::PrivateExponent;
use protocol::session::traits::round_slot;
use protocol::session::traits::CacheEntry;
use protocol::session::traits::LocalCache;
use protocol::session::SessionError;
use sqlx::sqlite::SqlitePool;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tokio::sync::Mutex;

use crate::store::open_pool;

fn cache_error(e: sqlx::Error) -> SessionError {
    SessionError::Cache(e.to_string())
}

/// `round_cache_<party>` with every character outside `[A-Za-z0-9_]` replaced
pub fn cache_table_name(party: &str) -> String {
    let sanitized = party
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect::<String>();
    format!("round_cache_{}", sanitized)
}

#[derive(Clone)]
pub struct SqlLocalCache {
    pool: SqlitePool,
    table: String,
    lock: Arc<Mutex<()>>,
}

impl SqlLocalCache {
    pub async fn connect(url: &str, party: &str) -> Result<SqlLocalCache, SessionError> {
        let pool = open_pool(url).await.map_err(cache_error)?;
        SqlLocalCache::with_pool(pool, party).await
    }

    pub async fn with_pool(pool: SqlitePool, party: &str) -> Result<SqlLocalCache, SessionError> {
        let table = cache_table_name(party);
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                request_id TEXT PRIMARY KEY,
                exponent TEXT,
                own_cid1 TEXT, own_cid2 TEXT, own_cid3 TEXT,
                partner_cid1 TEXT, partner_cid2 TEXT, partner_cid3 TEXT,
                final_path TEXT
            )",
            table
        ))
        .execute(&pool)
        .await
        .map_err(cache_error)?;
        debug!("local cache table {} ready", table);
        Ok(SqlLocalCache {
            pool,
            table,
            lock: Arc::new(Mutex::new(())),
        })
    }

    async fn upsert_column(
        &self,
        request_id: &str,
        column: &str,
        value: &str,
    ) -> Result<(), SessionError> {
        let _guard = self.lock.lock().await;
        sqlx::query(&format!(
            "INSERT INTO {table} (request_id, {column}) VALUES (?, ?)
             ON CONFLICT(request_id) DO UPDATE SET {column} = excluded.{column}",
            table = self.table,
            column = column
        ))
        .bind(request_id)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(cache_error)?;
        Ok(())
    }

    fn entry_from_row(row: &SqliteRow) -> Result<CacheEntry, SessionError> {
        let text = |column: &str| -> Result<Option<String>, SessionError> {
            row.try_get::<Option<String>, _>(column).map_err(cache_error)
        };
        let mut entry = CacheEntry::new(&text("request_id")?.unwrap_or_default());
        entry.exponent = match text("exponent")? {
            Some(hex) => Some(PrivateExponent::from_hex(&hex).ok_or_else(|| {
                SessionError::Cache(format!("corrupt exponent for {}", entry.request_id))
            })?),
            None => None,
        };
        for i in 0..3 {
            entry.own_cids[i] = text(&format!("own_cid{}", i + 1))?.map(ContentId::from);
            entry.partner_cids[i] = text(&format!("partner_cid{}", i + 1))?.map(ContentId::from);
        }
        entry.final_path = text("final_path")?.map(PathBuf::from);
        Ok(entry)
    }
}

#[async_trait]
impl LocalCache for SqlLocalCache {
    async fn load(&self, request_id: &str) -> Result<Option<CacheEntry>, SessionError> {
        let row = sqlx::query(&format!(
            "SELECT * FROM {} WHERE request_id = ?",
            self.table
        ))
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(cache_error)?;
        row.as_ref().map(SqlLocalCache::entry_from_row).transpose()
    }

    async fn ensure_exponent(
        &self,
        request_id: &str,
        candidate: PrivateExponent,
    ) -> Result<PrivateExponent, SessionError> {
        let _guard = self.lock.lock().await;
        sqlx::query(&format!(
            "INSERT INTO {table} (request_id, exponent) VALUES (?, ?)
             ON CONFLICT(request_id) DO UPDATE SET exponent = COALESCE({table}.exponent, excluded.exponent)",
            table = self.table
        ))
        .bind(request_id)
        .bind(candidate.to_hex())
        .execute(&self.pool)
        .await
        .map_err(cache_error)?;

        let stored: Option<String> = sqlx::query(&format!(
            "SELECT exponent FROM {} WHERE request_id = ?",
            self.table
        ))
        .bind(request_id)
        .fetch_one(&self.pool)
        .await
        .and_then(|row| row.try_get("exponent"))
        .map_err(cache_error)?;
        stored
            .as_deref()
            .and_then(PrivateExponent::from_hex)
            .ok_or_else(|| SessionError::Cache(format!("exponent for {} was not kept", request_id)))
    }

    async fn record_own(
        &self,
        request_id: &str,
        round: u8,
        cid: &ContentId,
    ) -> Result<(), SessionError> {
        let slot = round_slot(round)?;
        self.upsert_column(request_id, &format!("own_cid{}", slot + 1), cid.as_str())
            .await
    }

    async fn record_partner(
        &self,
        request_id: &str,
        round: u8,
        cid: &ContentId,
    ) -> Result<(), SessionError> {
        let slot = round_slot(round)?;
        self.upsert_column(request_id, &format!("partner_cid{}", slot + 1), cid.as_str())
            .await
    }

    async fn record_final(&self, request_id: &str, path: &Path) -> Result<(), SessionError> {
        self.upsert_column(request_id, "final_path", &path.to_string_lossy())
            .await
    }
}
