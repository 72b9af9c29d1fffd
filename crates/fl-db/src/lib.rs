//! Storage layer for fleetlog.
//!
//! Provides persistence for workday events using `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! A `Database` can be moved into a task or thread but not shared. Background
//! work such as syncing opens its own `Database` on the same file.
//!
//! # Change Notification
//!
//! Every mutation bumps a revision published on a `tokio::sync::watch`
//! channel (see [`Database::subscribe`]). Consumers recompute derived state
//! when the revision changes instead of polling. Commits made by other
//! connections are picked up by [`Database::refresh`].
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 with millisecond precision and a
//! `Z` suffix (e.g., `2025-01-15T10:30:00.000Z`). The fixed width keeps
//! lexicographic ordering equal to chronological ordering.
//!
//! ## Rewrites
//!
//! [`Database::update`] deletes and reinserts the row in one transaction. The
//! row keeps its `id`, `client_id` and `remote_id`; `synced` always resets and
//! `version` goes up by one. [`Database::mark_synced`] only marks the version
//! that was uploaded, so a rewrite racing an upload stays pending.

use std::cell::Cell;
use std::path::Path;

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use fl_core::{
    Event, EventType, IntervalKind, Location, NewEvent, RefuelDetails, RemoteId, UserId,
    ValidationError, open_event,
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;
use tokio::sync::watch;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The event failed validation before it was written.
    #[error("invalid event: {0}")]
    Invalid(#[from] ValidationError),
    /// No event with this id.
    #[error("event {0} not found")]
    NotFound(i64),
    /// Failed to parse an event timestamp.
    #[error("invalid timestamp for event {event_id}: {timestamp}")]
    TimestampParse {
        event_id: i64,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored row could not be turned back into an event.
    #[error("invalid event data for {event_id}: {message}")]
    InvalidEventData { event_id: i64, message: String },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
    changes: watch::Sender<u64>,
    data_version: Cell<i64>,
}

const EVENT_COLUMNS: &str = "id, client_id, user_id, type, timestamp, odometer_km, latitude, \
     longitude, address, fuel_type, fuel_litres, payment_method, until, synced, remote_id, version";

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, DbError> {
        let (changes, _) = watch::channel(0);
        let db = Self {
            conn,
            changes,
            data_version: Cell::new(0),
        };
        db.init()?;
        db.data_version.set(db.query_data_version()?);
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        self.conn.execute_batch(
            "
            -- Events table: one row per recorded event
            -- timestamp: RFC 3339, UTC, millisecond precision
            -- type: snake_case event type (e.g., 'work_start')
            -- until: inclusive last day (YYYY-MM-DD) for vacation and sick leave
            -- version: bumped by every rewrite
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id TEXT NOT NULL UNIQUE,
                user_id TEXT NOT NULL,
                type TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                odometer_km INTEGER,
                latitude REAL,
                longitude REAL,
                address TEXT,
                fuel_type TEXT,
                fuel_litres REAL,
                payment_method TEXT,
                until TEXT,
                synced INTEGER NOT NULL DEFAULT 0,
                remote_id TEXT,
                version INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_events_user_timestamp ON events(user_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_synced ON events(synced);
            ",
        )?;
        Ok(())
    }

    /// Subscribes to the revision counter bumped after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// The current revision.
    pub fn revision(&self) -> u64 {
        *self.changes.borrow()
    }

    fn notify(&self) {
        self.changes.send_modify(|revision| *revision += 1);
        if let Ok(version) = self.query_data_version() {
            self.data_version.set(version);
        }
    }

    fn query_data_version(&self) -> Result<i64, DbError> {
        Ok(self
            .conn
            .query_row("PRAGMA data_version", [], |row| row.get(0))?)
    }

    /// Publishes a new revision if another connection committed changes.
    ///
    /// Returns whether a change was seen.
    pub fn refresh(&self) -> Result<bool, DbError> {
        let version = self.query_data_version()?;
        if version == self.data_version.get() {
            return Ok(false);
        }
        self.data_version.set(version);
        self.changes.send_modify(|revision| *revision += 1);
        tracing::debug!("picked up external changes");
        Ok(true)
    }

    /// Validates and stores a new event, returning its id.
    pub fn insert(&mut self, event: &NewEvent) -> Result<i64, DbError> {
        event.validate()?;
        insert_row(&self.conn, None, event, &event.client_id, None, 0)?;
        let id = self.conn.last_insert_rowid();
        tracing::info!(id, event_type = %event.event_type, "recorded event");
        self.notify();
        Ok(id)
    }

    /// Rewrites an event in place.
    ///
    /// Any field may change, including the timestamp. The row keeps its id,
    /// client id and remote id, is marked unsynced and gets a new version.
    pub fn update(&mut self, id: i64, event: &NewEvent) -> Result<(), DbError> {
        event.validate()?;
        let tx = self.conn.transaction()?;
        let existing: Option<(String, Option<String>, i64)> = tx
            .query_row(
                "SELECT client_id, remote_id, version FROM events WHERE id = ?",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((client_id, remote_id, version)) = existing else {
            return Err(DbError::NotFound(id));
        };
        tx.execute("DELETE FROM events WHERE id = ?", [id])?;
        insert_row(
            &tx,
            Some(id),
            event,
            &client_id,
            remote_id.as_deref(),
            version + 1,
        )?;
        tx.commit()?;
        tracing::info!(id, event_type = %event.event_type, "rewrote event");
        self.notify();
        Ok(())
    }

    /// Deletes an event. Returns whether it existed.
    pub fn delete(&mut self, id: i64) -> Result<bool, DbError> {
        let deleted = self.conn.execute("DELETE FROM events WHERE id = ?", [id])? > 0;
        if deleted {
            tracing::info!(id, "deleted event");
            self.notify();
        }
        Ok(deleted)
    }

    /// Fetches one event by id.
    pub fn get(&self, id: i64) -> Result<Option<Event>, DbError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?"))?;
        let row = stmt.query_row([id], EventRow::from_row).optional()?;
        row.map(Event::try_from).transpose()
    }

    /// Lists a user's events ordered by timestamp then id.
    ///
    /// With a range, returns events in `[start, end)` plus vacation and sick
    /// leave that started earlier but still covers `start`.
    pub fn list_events(
        &self,
        user_id: &UserId,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Vec<Event>, DbError> {
        let Some((start, end)) = range else {
            return self.query_events(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM events WHERE user_id = ?1 \
                     ORDER BY timestamp ASC, id ASC"
                ),
                params![user_id.as_str()],
            );
        };
        if end <= start {
            return Ok(Vec::new());
        }
        // A day of slack so that local dates east of UTC are still covered.
        let covers = (start - Duration::days(1)).date_naive().to_string();
        self.query_events(
            &format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE user_id = ?1 AND (
                    (timestamp >= ?2 AND timestamp < ?3)
                    OR (until IS NOT NULL AND timestamp < ?2 AND until >= ?4)
                 )
                 ORDER BY timestamp ASC, id ASC"
            ),
            params![
                user_id.as_str(),
                format_timestamp(start),
                format_timestamp(end),
                covers
            ],
        )
    }

    /// Returns the currently open event of an interval kind.
    ///
    /// Derived from the stored start and end events on every call.
    pub fn open_event(&self, user_id: &UserId, kind: IntervalKind) -> Result<Option<Event>, DbError> {
        let events = self.query_events(
            &format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE user_id = ?1 AND type IN (?2, ?3) \
                 ORDER BY timestamp ASC, id ASC"
            ),
            params![user_id.as_str(), kind.start().as_str(), kind.end().as_str()],
        )?;
        Ok(open_event(&events, kind).cloned())
    }

    /// Lists events not yet uploaded, oldest first.
    pub fn list_unsynced(&self, user_id: Option<&UserId>) -> Result<Vec<Event>, DbError> {
        self.query_events(
            &format!(
                "SELECT {EVENT_COLUMNS} FROM events \
                 WHERE synced = 0 AND (?1 IS NULL OR user_id = ?1) \
                 ORDER BY timestamp ASC, id ASC"
            ),
            params![user_id.map(UserId::as_str)],
        )
    }

    /// Marks the uploaded version of an event as synced, recording the backend
    /// id when given.
    ///
    /// Returns false when the row is gone or was rewritten since `uploaded`
    /// was read; the newer version then stays pending. An already known remote
    /// id is kept when the backend returns none.
    pub fn mark_synced(
        &mut self,
        uploaded: &Event,
        remote_id: Option<&RemoteId>,
    ) -> Result<bool, DbError> {
        let id = uploaded.id;
        let updated = self.conn.execute(
            "UPDATE events SET synced = 1, remote_id = COALESCE(?2, remote_id) \
             WHERE id = ?1 AND version = ?3",
            params![id, remote_id.map(RemoteId::as_str), uploaded.version],
        )? > 0;
        if updated {
            tracing::debug!(id, version = uploaded.version, "marked synced");
            self.notify();
        } else {
            tracing::debug!(id, version = uploaded.version, "event changed during upload");
        }
        Ok(updated)
    }

    fn query_events<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Event>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, EventRow::from_row)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(Event::try_from(row?)?);
        }
        Ok(events)
    }
}

fn insert_row(
    conn: &Connection,
    id: Option<i64>,
    event: &NewEvent,
    client_id: &str,
    remote_id: Option<&str>,
    version: i64,
) -> Result<(), DbError> {
    let location = event.location.as_ref();
    let refuel = event.refuel.as_ref();
    conn.execute(
        "
        INSERT INTO events
        (id, client_id, user_id, type, timestamp, odometer_km, latitude, longitude, address,
         fuel_type, fuel_litres, payment_method, until, synced, remote_id, version)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
        ",
        params![
            id,
            client_id,
            event.user_id.as_str(),
            event.event_type.as_str(),
            format_timestamp(event.timestamp),
            event.odometer_km,
            location.map(|l| l.latitude),
            location.map(|l| l.longitude),
            location.and_then(|l| l.address.as_deref()),
            refuel.map(|r| r.fuel_type.as_str()),
            refuel.map(|r| r.litres),
            refuel.map(|r| r.payment_method.as_str()),
            event.until.map(|d| d.to_string()),
            remote_id,
            version,
        ],
    )?;
    Ok(())
}

/// A row as stored, before parsing.
struct EventRow {
    id: i64,
    client_id: String,
    user_id: String,
    kind: String,
    timestamp: String,
    odometer_km: Option<i64>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    address: Option<String>,
    fuel_type: Option<String>,
    fuel_litres: Option<f64>,
    payment_method: Option<String>,
    until: Option<String>,
    synced: bool,
    remote_id: Option<String>,
    version: i64,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            client_id: row.get(1)?,
            user_id: row.get(2)?,
            kind: row.get(3)?,
            timestamp: row.get(4)?,
            odometer_km: row.get(5)?,
            latitude: row.get(6)?,
            longitude: row.get(7)?,
            address: row.get(8)?,
            fuel_type: row.get(9)?,
            fuel_litres: row.get(10)?,
            payment_method: row.get(11)?,
            until: row.get(12)?,
            synced: row.get(13)?,
            remote_id: row.get(14)?,
            version: row.get(15)?,
        })
    }
}

impl TryFrom<EventRow> for Event {
    type Error = DbError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let invalid = |message: String| DbError::InvalidEventData {
            event_id: id,
            message,
        };

        let event_type: EventType = row.kind.parse().map_err(|e| invalid(format!("{e}")))?;
        let user_id = UserId::new(row.user_id).map_err(|e| invalid(e.to_string()))?;
        let timestamp = parse_timestamp(&row.timestamp, id)?;

        let location = match (row.latitude, row.longitude) {
            (Some(latitude), Some(longitude)) => Some(
                Location::new(latitude, longitude, row.address).map_err(|e| invalid(e.to_string()))?,
            ),
            _ => None,
        };

        let refuel = match (row.fuel_type, row.payment_method) {
            (Some(fuel_type), Some(payment_method)) => {
                let payment_method = payment_method.parse().map_err(|e: ValidationError| invalid(e.to_string()))?;
                Some(
                    RefuelDetails::new(fuel_type, row.fuel_litres.unwrap_or(0.0), payment_method)
                        .map_err(|e| invalid(e.to_string()))?,
                )
            }
            _ => None,
        };

        let until = row
            .until
            .map(|until| {
                NaiveDate::parse_from_str(&until, "%Y-%m-%d")
                    .map_err(|e| invalid(format!("until {until}: {e}")))
            })
            .transpose()?;

        let remote_id = row
            .remote_id
            .map(RemoteId::new)
            .transpose()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            id,
            data: NewEvent {
                client_id: row.client_id,
                user_id,
                event_type,
                timestamp,
                odometer_km: row.odometer_km,
                location,
                refuel,
                until,
            },
            synced: row.synced,
            remote_id,
            version: row.version,
        })
    }
}

fn parse_timestamp(timestamp: &str, event_id: i64) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            event_id,
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
