//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

//! Relational store of accounts and match requests.

use std::str::FromStr;
use std::sync::Arc;

use common::blob::ContentId;
use protocol::session::MatchRequest;
use protocol::session::PartyRole;
use protocol::session::SessionError;
use rand::RngCore;
use sha2::Digest;
use sha2::Sha256;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::sqlite::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("unknown request {0}")]
    UnknownRequest(String),
    #[error("unknown user {0}")]
    UnknownUser(String),
    #[error("invalid user name {0:?}")]
    InvalidUser(String),
}

impl StoreError {
    /// Error kind reported on the control channel
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Sql(_) => "Store",
            StoreError::Session(e) => e.kind(),
            StoreError::UnknownRequest(_)
            | StoreError::UnknownUser(_)
            | StoreError::InvalidUser(_) => "IntegrityViolation",
        }
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        username TEXT PRIMARY KEY,
        salt TEXT NOT NULL,
        digest TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS merge_requests (
        request_id TEXT PRIMARY KEY,
        party_a TEXT NOT NULL,
        party_b TEXT NOT NULL,
        confirmed_a INTEGER NOT NULL DEFAULT 0,
        confirmed_b INTEGER NOT NULL DEFAULT 0,
        cid_a1 TEXT, cid_a2 TEXT, cid_a3 TEXT,
        cid_b1 TEXT, cid_b2 TEXT, cid_b3 TEXT
    )",
];

/// Opens a single-connection SQLite pool, creating the database file if needed.
///
/// One connection keeps `sqlite::memory:` databases alive for the pool lifetime.
pub async fn open_pool(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
}

fn password_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update([0u8]);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn role_column(role: PartyRole) -> char {
    match role {
        PartyRole::A => 'a',
        PartyRole::B => 'b',
    }
}

fn request_from_row(row: &SqliteRow) -> Result<MatchRequest, sqlx::Error> {
    let cids = |side: char| -> Result<[Option<ContentId>; 3], sqlx::Error> {
        let mut out: [Option<ContentId>; 3] = [None, None, None];
        for (i, slot) in out.iter_mut().enumerate() {
            let cid: Option<String> = row.try_get(format!("cid_{}{}", side, i + 1).as_str())?;
            *slot = cid.map(ContentId::from);
        }
        Ok(out)
    };
    Ok(MatchRequest {
        request_id: row.try_get("request_id")?,
        party_a: row.try_get("party_a")?,
        party_b: row.try_get("party_b")?,
        confirmed_a: row.try_get("confirmed_a")?,
        confirmed_b: row.try_get("confirmed_b")?,
        cid_a: cids('a')?,
        cid_b: cids('b')?,
    })
}

/// Accounts and match requests. Writers are serialised by one lock.
#[derive(Clone)]
pub struct MatchStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl MatchStore {
    pub async fn connect(url: &str) -> Result<MatchStore, StoreError> {
        let pool = open_pool(url).await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        info!("match store ready at {}", url);
        Ok(MatchStore {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub async fn in_memory() -> Result<MatchStore, StoreError> {
        MatchStore::connect("sqlite::memory:").await
    }

    /// Creates or replaces an account
    pub async fn add_user(&self, username: &str, password: &str) -> Result<(), StoreError> {
        let username = username.trim();
        if username.is_empty() || username.contains(char::is_whitespace) {
            return Err(StoreError::InvalidUser(username.to_string()));
        }
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = hex::encode(salt);
        let digest = password_digest(&salt, password);

        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "INSERT INTO users (username, salt, digest) VALUES (?, ?, ?)
             ON CONFLICT(username) DO UPDATE SET salt = excluded.salt, digest = excluded.digest",
        )
        .bind(username)
        .bind(&salt)
        .bind(&digest)
        .execute(&self.pool)
        .await?;
        info!("account {} provisioned", username);
        Ok(())
    }

    pub async fn verify_user(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT salt, digest FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => {
                let salt: String = row.try_get("salt")?;
                let digest: String = row.try_get("digest")?;
                password_digest(&salt, password) == digest
            }
            None => false,
        })
    }

    pub async fn user_exists(&self, username: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn get_request(&self, request_id: &str) -> Result<Option<MatchRequest>, StoreError> {
        let row = sqlx::query("SELECT * FROM merge_requests WHERE request_id = ?")
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(request_from_row).transpose()?)
    }

    async fn require_request(&self, request_id: &str) -> Result<MatchRequest, StoreError> {
        self.get_request(request_id)
            .await?
            .ok_or_else(|| StoreError::UnknownRequest(request_id.to_string()))
    }

    /// Request `request_id` as seen by `party`, which must be part of it
    pub async fn request_for(&self, request_id: &str, party: &str) -> Result<MatchRequest, StoreError> {
        let request = self.require_request(request_id).await?;
        request.require_role(party)?;
        Ok(request)
    }

    pub async fn requests_for(&self, party: &str) -> Result<Vec<MatchRequest>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM merge_requests WHERE party_a = ? OR party_b = ? ORDER BY request_id",
        )
        .bind(party)
        .bind(party)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(request_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn create_request(&self, from: &str, partner: &str) -> Result<MatchRequest, StoreError> {
        if !self.user_exists(partner).await? {
            return Err(StoreError::UnknownUser(partner.to_string()));
        }
        let request = MatchRequest::new(from, partner)?;

        let _guard = self.write_lock.lock().await;
        if self.get_request(&request.request_id).await?.is_some() {
            return Err(SessionError::Integrity(format!(
                "request {} already exists",
                request.request_id
            ))
            .into());
        }
        sqlx::query("INSERT INTO merge_requests (request_id, party_a, party_b) VALUES (?, ?, ?)")
            .bind(&request.request_id)
            .bind(&request.party_a)
            .bind(&request.party_b)
            .execute(&self.pool)
            .await?;
        info!(
            "request {} created by {} for {}",
            request.request_id, from, partner
        );
        Ok(request)
    }

    pub async fn confirm(&self, request_id: &str, party: &str) -> Result<MatchRequest, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut request = self.require_request(request_id).await?;
        let role = request.require_role(party)?;
        let column = format!("confirmed_{}", role_column(role));
        sqlx::query(&format!(
            "UPDATE merge_requests SET {} = 1 WHERE request_id = ?",
            column
        ))
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        request.confirm(role);
        Ok(request)
    }

    /// Records a round content id. Returns the updated request and whether
    /// anything changed; the same id twice is an idempotent success.
    pub async fn record_content(
        &self,
        request_id: &str,
        party: &str,
        round: u8,
        cid: &ContentId,
    ) -> Result<(MatchRequest, bool), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut request = self.require_request(request_id).await?;
        let changed = request.record_content(party, round, cid)?;
        if changed {
            let role = request.require_role(party)?;
            sqlx::query(&format!(
                "UPDATE merge_requests SET cid_{}{} = ? WHERE request_id = ?",
                role_column(role),
                round
            ))
            .bind(cid.as_str())
            .bind(request_id)
            .execute(&self.pool)
            .await?;
            debug!("{} recorded round {} of {} as {}", party, round, request_id, cid);
        }
        Ok((request, changed))
    }

    /// Requests where `party` can run a round on partner content it has
    /// not consumed yet
    pub async fn pending_for(&self, party: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .requests_for(party)
            .await?
            .into_iter()
            .filter(|r| match r.role_of(party) {
                Some(role) => r.next_runnable_round(role).is_some() && r.progress(role.other()) > 0,
                None => false,
            })
            .map(|r| r.request_id)
            .collect())
    }
}
