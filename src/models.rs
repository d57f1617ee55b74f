//! # Database models
//!
//! Data structures that map to the history table via **Diesel**.
//!
//! - [`HistoryRecord`]: one answered query, as stored and as listed back.
//!
//! ## Diesel expectations
//!
//! The `history` table (see `crate::schema`) is created on demand by
//! [`SqliteHistory`](crate::history::SqliteHistory); there are no migrations.
//!
//! ## Basic usage
//!
//! ```no_run
//! use diesel::prelude::*;
//! use ragchart::schema::history;
//! use ragchart::models::HistoryRecord;
//!
//! # fn demo(conn: &mut SqliteConnection) -> Result<(), Box<dyn std::error::Error>> {
//! let row: HistoryRecord = diesel::insert_into(history::table)
//!     .values(&HistoryRecord {
//!         id: None,
//!         user_email: "a@example.com".into(),
//!         user_query: "robbery downtown".into(),
//!         response: "No chart data generated.".into(),
//!         created_at: "2024-01-01T00:00:00Z".into(),
//!     })
//!     .returning(HistoryRecord::as_returning())
//!     .get_result(conn)?;
//! # Ok(()) }
//! ```
use diesel::prelude::*;
use serde::Serialize;

/// One answered query.
///
/// ### Table
/// - `history`
///
/// ### Notes
/// - `response` holds chart documents as JSON text and explanations verbatim.
/// - `created_at` is an RFC 3339 UTC timestamp; it sorts lexically.
/// - `id` is optional for `Insertable` convenience; SQLite assigns it on insert.
#[derive(Queryable, Insertable, Selectable, Serialize, PartialEq, Debug, Clone)]
#[diesel(table_name = crate::schema::history)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct HistoryRecord {
    /// Auto-increment primary key (set by the DB on insert).
    #[diesel(deserialize_as = i32)]
    #[serde(skip_serializing)]
    pub id: Option<i32>,
    pub user_email: String,
    pub user_query: String,
    pub response: String,
    pub created_at: String,
}
