// 🗄️ Record Store - SQLite-backed account records, change stream and audit trail
//
// - {table}: one row per email (PRIMARY KEY enforces at-most-one record)
// - {table}_stream: one change event per successful write, same transaction
// - events: audit trail of pipeline milestones ("Every change is an event")

use crate::entities::{AccountRecord, ChangeEvent, ChangeOperation};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

// ============================================================================
// AUDIT EVENT TYPES
// ============================================================================

pub const EVENT_ACCOUNT_REGISTERED: &str = "account_registered";
pub const EVENT_ACCOUNT_PROVISIONED: &str = "account_provisioned";
pub const EVENT_PROVISIONING_FAILED: &str = "provisioning_failed";
pub const EVENT_GUARDRAIL_CREATED: &str = "guardrail_created";
pub const EVENT_GUARDRAIL_FAILED: &str = "guardrail_failed";

pub const ENTITY_ACCOUNT: &str = "account";

/// Event for audit trail
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// STORE SEAMS
// ============================================================================

/// Result of a conditional (create-if-absent) write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Record written; the change event got this sequence number
    Inserted { sequence: i64 },

    /// A record with the same email already exists; nothing written
    AlreadyPresent,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, email: &str) -> Result<Option<AccountRecord>, StoreError>;

    /// Atomic create-if-absent keyed by email
    async fn put_if_absent(&self, record: &AccountRecord) -> Result<PutOutcome, StoreError>;
}

/// Ordered, at-least-once feed of store writes
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Oldest unacknowledged events, in write order
    async fn next_batch(&self, max: usize) -> Result<Vec<ChangeEvent>, StoreError>;

    /// Mark every event up to and including `sequence` as consumed
    async fn acknowledge(&self, sequence: i64) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AuditTrail: Send + Sync {
    async fn record(&self, event: Event) -> Result<(), StoreError>;
}

// ============================================================================
// SCHEMA
// ============================================================================

fn stream_table(table: &str) -> String {
    format!("{}_stream", table)
}

pub fn setup_database(conn: &Connection, table: &str) -> Result<(), StoreError> {
    // WAL for crash recovery; in-memory databases answer "memory" and that's fine
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (
                email TEXT PRIMARY KEY NOT NULL,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                registration_date TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            table
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS {} (
                sequence INTEGER PRIMARY KEY AUTOINCREMENT,
                operation TEXT NOT NULL CHECK (operation IN ('INSERT', 'MODIFY', 'REMOVE')),
                record_key TEXT NOT NULL,
                new_image TEXT,
                acknowledged INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            stream_table(table)
        ),
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE INDEX IF NOT EXISTS idx_{0}_pending ON {0}(acknowledged, sequence)",
            stream_table(table)
        ),
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ACCOUNT RECORDS
// ============================================================================

/// Write the record and its INSERT change event in one transaction.
/// A primary-key violation means the email is already on record.
pub fn insert_account_if_absent(
    conn: &Connection,
    table: &str,
    record: &AccountRecord,
) -> Result<PutOutcome, StoreError> {
    let tx = conn.unchecked_transaction()?;

    let result = tx.execute(
        &format!(
            "INSERT INTO {} (email, first_name, last_name, registration_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            table
        ),
        params![
            record.email,
            record.first_name,
            record.last_name,
            record.registration_date,
            record.created_at.to_rfc3339(),
        ],
    );

    match result {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            debug!(email = %record.email, "record already present");
            return Ok(PutOutcome::AlreadyPresent);
        }
        Err(e) => return Err(e.into()),
    }

    let image = serde_json::to_string(record)?;
    tx.execute(
        &format!(
            "INSERT INTO {} (operation, record_key, new_image) VALUES (?1, ?2, ?3)",
            stream_table(table)
        ),
        params![ChangeOperation::Insert.as_str(), record.email, image],
    )?;
    let sequence = tx.last_insert_rowid();

    tx.commit()?;
    Ok(PutOutcome::Inserted { sequence })
}

fn parse_timestamp(column: &'static str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::Corrupt {
            column,
            value: value.to_string(),
        })
}

pub fn get_account(
    conn: &Connection,
    table: &str,
    email: &str,
) -> Result<Option<AccountRecord>, StoreError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT email, first_name, last_name, registration_date, created_at
                 FROM {} WHERE email = ?1",
                table
            ),
            [email],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;

    match row {
        None => Ok(None),
        Some((email, first_name, last_name, registration_date, created_at)) => Ok(Some(AccountRecord {
            email,
            first_name,
            last_name,
            registration_date,
            created_at: parse_timestamp("created_at", &created_at)?,
        })),
    }
}

pub fn count_accounts(conn: &Connection, table: &str) -> Result<i64, StoreError> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// CHANGE STREAM
// ============================================================================

pub fn fetch_unacknowledged(
    conn: &Connection,
    table: &str,
    max: usize,
) -> Result<Vec<ChangeEvent>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT sequence, operation, record_key, new_image
         FROM {}
         WHERE acknowledged = 0
         ORDER BY sequence ASC
         LIMIT ?1",
        stream_table(table)
    ))?;

    let rows = stmt
        .query_map([max as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(sequence, operation, key, image)| -> Result<ChangeEvent, StoreError> {
            let operation = ChangeOperation::parse(&operation).ok_or(StoreError::Corrupt {
                column: "operation",
                value: operation.clone(),
            })?;
            // An undecodable image surfaces as an event without one, so the
            // orchestrator fails that event and the feed moves past it
            let new_record = match image {
                Some(json) => match serde_json::from_str::<AccountRecord>(&json) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(sequence, key = %key, error = %e, "undecodable change image");
                        None
                    }
                },
                None => None,
            };
            Ok(ChangeEvent {
                sequence,
                operation,
                key,
                new_record,
            })
        })
        .collect()
}

pub fn acknowledge_through(conn: &Connection, table: &str, sequence: i64) -> Result<usize, StoreError> {
    let updated = conn.execute(
        &format!(
            "UPDATE {} SET acknowledged = 1 WHERE sequence <= ?1 AND acknowledged = 0",
            stream_table(table)
        ),
        [sequence],
    )?;
    Ok(updated)
}

/// Append a raw change event (MODIFY/REMOVE come from outside this core)
pub fn append_change(
    conn: &Connection,
    table: &str,
    operation: ChangeOperation,
    key: &str,
    new_record: Option<&AccountRecord>,
) -> Result<i64, StoreError> {
    let image = new_record.map(serde_json::to_string).transpose()?;
    conn.execute(
        &format!(
            "INSERT INTO {} (operation, record_key, new_image) VALUES (?1, ?2, ?3)",
            stream_table(table)
        ),
        params![operation.as_str(), key, image],
    )?;
    Ok(conn.last_insert_rowid())
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<(), StoreError> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

type EventRow = (String, String, String, String, String, String, String);

fn event_from_row(row: EventRow) -> Result<Event, StoreError> {
    let (event_id, timestamp, event_type, entity_type, entity_id, data, actor) = row;
    Ok(Event {
        event_id,
        timestamp: parse_timestamp("timestamp", &timestamp)?,
        event_type,
        entity_type,
        entity_id,
        data: serde_json::from_str(&data)?,
        actor,
    })
}

fn query_events(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<Event>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })?
        .collect::<Result<Vec<EventRow>, _>>()?;

    rows.into_iter().map(event_from_row).collect()
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>, StoreError> {
    query_events(
        conn,
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
        &[&entity_type, &entity_id],
    )
}

pub fn get_events_by_type(conn: &Connection, event_type: &str) -> Result<Vec<Event>, StoreError> {
    query_events(
        conn,
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE event_type = ?1
         ORDER BY id ASC",
        &[&event_type],
    )
}

/// Accounts whose most recent guardrail outcome is a failure
pub fn get_unguarded_accounts(conn: &Connection) -> Result<Vec<Event>, StoreError> {
    query_events(
        conn,
        "SELECT e.event_id, e.timestamp, e.event_type, e.entity_type, e.entity_id, e.data, e.actor
         FROM events e
         WHERE e.event_type = ?1
           AND NOT EXISTS (
               SELECT 1 FROM events later
               WHERE later.entity_type = e.entity_type
                 AND later.entity_id = e.entity_id
                 AND later.event_type IN (?1, ?2)
                 AND later.id > e.id
           )
         ORDER BY e.id ASC",
        &[&EVENT_GUARDRAIL_FAILED, &EVENT_GUARDRAIL_CREATED],
    )
}

// ============================================================================
// SQLITE RECORD STORE
// ============================================================================

/// Shared-connection store implementing the record, feed and audit seams
#[derive(Clone)]
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
    table: String,
}

impl SqliteRecordStore {
    /// Wrap a connection, creating the schema if needed
    pub fn new(conn: Connection, table: &str) -> Result<Self, StoreError> {
        setup_database(&conn, table)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            table: table.to_string(),
        })
    }

    pub fn open_in_memory(table: &str) -> Result<Self, StoreError> {
        Self::new(Connection::open_in_memory()?, table)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Run a closure against the locked connection
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        self.with_conn(|conn| count_accounts(conn, &self.table))
    }

    pub fn unguarded_accounts(&self) -> Result<Vec<Event>, StoreError> {
        self.with_conn(get_unguarded_accounts)
    }

    pub fn events_for_account(&self, account_id: &str) -> Result<Vec<Event>, StoreError> {
        self.with_conn(|conn| get_events_for_entity(conn, ENTITY_ACCOUNT, account_id))
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get(&self, email: &str) -> Result<Option<AccountRecord>, StoreError> {
        self.with_conn(|conn| get_account(conn, &self.table, email))
    }

    async fn put_if_absent(&self, record: &AccountRecord) -> Result<PutOutcome, StoreError> {
        self.with_conn(|conn| insert_account_if_absent(conn, &self.table, record))
    }
}

#[async_trait]
impl ChangeFeed for SqliteRecordStore {
    async fn next_batch(&self, max: usize) -> Result<Vec<ChangeEvent>, StoreError> {
        self.with_conn(|conn| fetch_unacknowledged(conn, &self.table, max))
    }

    async fn acknowledge(&self, sequence: i64) -> Result<(), StoreError> {
        self.with_conn(|conn| acknowledge_through(conn, &self.table, sequence).map(|_| ()))
    }
}

#[async_trait]
impl AuditTrail for SqliteRecordStore {
    async fn record(&self, event: Event) -> Result<(), StoreError> {
        self.with_conn(|conn| insert_event(conn, &event))
    }
}
