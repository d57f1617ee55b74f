//! # History
//!
//! Append-only log of answered queries, kept in SQLite through Diesel.
//!
//! The pipeline itself never touches this store; the HTTP and CLI layers hand
//! each finished exchange to a [`HistorySink`]. [`SqliteHistory`] is the
//! production sink and also lists a user's past queries, newest first.
//!
//! Diesel connections are synchronous, so every operation opens its own
//! connection on the blocking thread pool.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use diesel::prelude::*;
use tracing::{debug, info};

use crate::config::establish_connection;
use crate::error::HistoryError;
use crate::models::HistoryRecord;
use crate::schema::history;

const CREATE_HISTORY_TABLE: &str = "CREATE TABLE IF NOT EXISTS history (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    user_email TEXT NOT NULL,
    user_query TEXT NOT NULL,
    response TEXT NOT NULL,
    created_at TEXT NOT NULL
)";

const CREATE_HISTORY_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS history_user_email_created_at ON history (user_email, created_at)";

/// One finished exchange, ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub user_email: String,
    pub user_query: String,
    pub response: String,
}

/// Destination for finished exchanges.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn record(&self, entry: HistoryEntry) -> Result<(), HistoryError>;
}

/// SQLite-backed history log.
#[derive(Debug, Clone)]
pub struct SqliteHistory {
    db_url: String,
}

impl SqliteHistory {
    /// Open the store at `db_url`, creating the table if it does not exist.
    pub async fn open(db_url: impl Into<String>) -> Result<Self, HistoryError> {
        let store = Self {
            db_url: db_url.into(),
        };
        store
            .with_connection(|conn| {
                diesel::sql_query(CREATE_HISTORY_TABLE).execute(conn)?;
                diesel::sql_query(CREATE_HISTORY_INDEX).execute(conn)?;
                Ok(())
            })
            .await?;
        info!("History store ready at {}", store.db_url);
        Ok(store)
    }

    /// A user's entries, newest first.
    ///
    /// With `offset` set, skips that many entries and returns at most `limit`;
    /// without it, every entry.
    pub async fn list(
        &self,
        user_email: &str,
        offset: Option<usize>,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        let email = user_email.to_string();
        self.with_connection(move |conn| {
            let query = history::table
                .filter(history::user_email.eq(email))
                .order((history::created_at.desc(), history::id.desc()))
                .select(HistoryRecord::as_select());

            let rows: Vec<HistoryRecord> = match offset {
                Some(offset) => {
                    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
                    let offset = i64::try_from(offset).unwrap_or(i64::MAX);
                    query.limit(limit).offset(offset).load(conn)?
                }
                None => query.load(conn)?,
            };
            Ok(rows)
        })
        .await
    }

    async fn with_connection<T, F>(&self, op: F) -> Result<T, HistoryError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T, HistoryError> + Send + 'static,
    {
        let db_url = self.db_url.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_url)?;
            op(&mut conn)
        })
        .await
        .map_err(|e| HistoryError::Task(e.to_string()))?
    }
}

#[async_trait]
impl HistorySink for SqliteHistory {
    async fn record(&self, entry: HistoryEntry) -> Result<(), HistoryError> {
        let row = HistoryRecord {
            id: None,
            user_email: entry.user_email,
            user_query: entry.user_query,
            response: entry.response,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        };
        self.with_connection(move |conn| {
            diesel::insert_into(history::table)
                .values(&row)
                .execute(conn)?;
            debug!("Stored history entry for {}", row.user_email);
            Ok(())
        })
        .await
    }
}
