//! SQLite-backed queue store implementation.

use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{
    params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    call_deadline, CategoryUpdate, Claim, CounterChange, IssueTicket, NewCategory, NewCounter,
    QueueStore, StoreError,
};
use crate::numbering::format_ticket_number;
use crate::queue::machine;
use crate::queue::{
    Assignment, Category, CategoryQueueLength, Counter, CounterCommand, CounterStatus, Outcome,
    QueueStats, Rejection, Resolution, Ticket, TicketStatus, Transfer,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    prefix TEXT NOT NULL UNIQUE,
    priority INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS counters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    number TEXT NOT NULL UNIQUE,
    name TEXT,
    status TEXT NOT NULL DEFAULT 'offline',
    staff_id TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS counter_categories (
    counter_id INTEGER NOT NULL REFERENCES counters(id) ON DELETE CASCADE,
    category_id INTEGER NOT NULL REFERENCES categories(id),
    PRIMARY KEY (counter_id, category_id)
);

CREATE TABLE IF NOT EXISTS tickets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ticket_number TEXT NOT NULL,
    category_id INTEGER NOT NULL REFERENCES categories(id),
    counter_id INTEGER REFERENCES counters(id),
    status TEXT NOT NULL,
    priority INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    queue_date TEXT NOT NULL,
    daily_sequence INTEGER NOT NULL,
    called_at TEXT,
    completed_at TEXT,
    wait_time INTEGER,
    service_time INTEGER,
    notes TEXT,
    UNIQUE (category_id, queue_date, daily_sequence)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_tickets_one_serving_per_counter
    ON tickets(counter_id) WHERE status = 'serving';
CREATE INDEX IF NOT EXISTS idx_tickets_waiting
    ON tickets(status, category_id, priority DESC, created_at);
CREATE INDEX IF NOT EXISTS idx_tickets_number ON tickets(ticket_number, queue_date);
CREATE INDEX IF NOT EXISTS idx_tickets_completed_at ON tickets(completed_at);

CREATE TABLE IF NOT EXISTS daily_sequences (
    category_id INTEGER NOT NULL REFERENCES categories(id),
    queue_date TEXT NOT NULL,
    last_value INTEGER NOT NULL,
    PRIMARY KEY (category_id, queue_date)
);
"#;

const TICKET_COLUMNS: &str = "id, ticket_number, category_id, counter_id, status, priority, \
     created_at, queue_date, daily_sequence, called_at, completed_at, wait_time, service_time, notes";
const CATEGORY_COLUMNS: &str = "id, name, prefix, priority, is_active, created_at, updated_at";
const COUNTER_COLUMNS: &str = "id, number, name, status, staff_id, updated_at";

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                StoreError::Contention(err.to_string())
            }
            Some(ErrorCode::ConstraintViolation) => StoreError::Conflict(err.to_string()),
            _ => StoreError::Database(err.to_string()),
        }
    }
}

/// SQLite-backed queue store.
///
/// One connection behind an async mutex. Every mutation runs in a
/// `BEGIN IMMEDIATE` transaction so concurrent processes sharing the file
/// serialize on the write lock instead of failing at commit.
pub struct SqliteQueueStore {
    conn: Mutex<Connection>,
    /// Longest SQLite busy wait for the write lock.
    busy_timeout: Duration,
}

impl SqliteQueueStore {
    /// Open (or create) a database file in WAL mode.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), %journal_mode, "Opened queue database");
        Self::from_connection(conn, busy_timeout)
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, Duration::ZERO)
    }

    /// Hold the connection so other calls queue up behind it.
    #[cfg(test)]
    pub(crate) async fn hold_connection(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    fn from_connection(conn: Connection, busy_timeout: Duration) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            busy_timeout,
        })
    }

    /// Run one operation on the connection.
    ///
    /// Under a caller deadline the SQLite busy wait is cut to the time left,
    /// and losing the write lock to that cut is a timeout, not contention.
    async fn with_conn<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut conn = self.conn.lock().await;

        let (wait, cut_short) = match call_deadline() {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Err(StoreError::Timeout);
                }
                (left.min(self.busy_timeout), left < self.busy_timeout)
            }
            None => (self.busy_timeout, false),
        };
        conn.busy_timeout(wait)?;

        match op(&mut *conn) {
            Err(StoreError::Contention(_)) if cut_short => Err(StoreError::Timeout),
            result => result,
        }
    }
}

// ============================================================================
// Column encoding
// ============================================================================

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn column_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(idx, &raw)
}

fn column_opt_timestamp(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_timestamp(idx, &s)).transpose()
}

fn column_date(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| conversion_error(idx, e))
}

fn column_parsed<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| conversion_error(idx, e))
}

fn row_to_ticket(row: &Row) -> rusqlite::Result<Ticket> {
    Ok(Ticket {
        id: row.get(0)?,
        ticket_number: row.get(1)?,
        category_id: row.get(2)?,
        counter_id: row.get(3)?,
        status: column_parsed(row, 4)?,
        priority: row.get(5)?,
        created_at: column_timestamp(row, 6)?,
        queue_date: column_date(row, 7)?,
        daily_sequence: row.get(8)?,
        called_at: column_opt_timestamp(row, 9)?,
        completed_at: column_opt_timestamp(row, 10)?,
        wait_time: row.get(11)?,
        service_time: row.get(12)?,
        notes: row.get(13)?,
    })
}

fn row_to_category(row: &Row) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        prefix: row.get(2)?,
        priority: row.get(3)?,
        is_active: row.get(4)?,
        created_at: column_timestamp(row, 5)?,
        updated_at: column_timestamp(row, 6)?,
    })
}

/// Category ids are filled in separately from `counter_categories`.
fn row_to_counter(row: &Row) -> rusqlite::Result<Counter> {
    Ok(Counter {
        id: row.get(0)?,
        number: row.get(1)?,
        name: row.get(2)?,
        status: column_parsed(row, 3)?,
        category_ids: Vec::new(),
        staff_id: row.get(4)?,
        updated_at: column_timestamp(row, 5)?,
    })
}

// ============================================================================
// Row access shared by reads and transactions
// ============================================================================

fn begin(conn: &mut Connection) -> Result<Transaction<'_>, StoreError> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

fn load_category(conn: &Connection, id: i64) -> Result<Option<Category>, StoreError> {
    let sql = format!("SELECT {} FROM categories WHERE id = ?1", CATEGORY_COLUMNS);
    Ok(conn
        .query_row(&sql, params![id], row_to_category)
        .optional()?)
}

fn require_category(conn: &Connection, id: i64) -> Result<Category, StoreError> {
    load_category(conn, id)?.ok_or_else(|| StoreError::not_found("category", id))
}

fn load_counter_categories(conn: &Connection, counter_id: i64) -> Result<Vec<i64>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT category_id FROM counter_categories WHERE counter_id = ?1 ORDER BY category_id",
    )?;
    let ids = stmt
        .query_map(params![counter_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

fn load_counter(conn: &Connection, id: i64) -> Result<Option<Counter>, StoreError> {
    let sql = format!("SELECT {} FROM counters WHERE id = ?1", COUNTER_COLUMNS);
    let counter = conn.query_row(&sql, params![id], row_to_counter).optional()?;
    match counter {
        Some(mut counter) => {
            counter.category_ids = load_counter_categories(conn, id)?;
            Ok(Some(counter))
        }
        None => Ok(None),
    }
}

fn require_counter(conn: &Connection, id: i64) -> Result<Counter, StoreError> {
    load_counter(conn, id)?.ok_or_else(|| StoreError::not_found("counter", id))
}

fn load_ticket(conn: &Connection, id: i64) -> Result<Option<Ticket>, StoreError> {
    let sql = format!("SELECT {} FROM tickets WHERE id = ?1", TICKET_COLUMNS);
    Ok(conn.query_row(&sql, params![id], row_to_ticket).optional()?)
}

fn current_serving(conn: &Connection, counter_id: i64) -> Result<Option<Ticket>, StoreError> {
    let sql = format!(
        "SELECT {} FROM tickets WHERE counter_id = ?1 AND status = 'serving'",
        TICKET_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![counter_id], row_to_ticket)
        .optional()?)
}

fn query_waiting(
    conn: &Connection,
    category_ids: &[i64],
    limit: Option<u32>,
) -> Result<Vec<Ticket>, StoreError> {
    if category_ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; category_ids.len()].join(", ");
    let mut sql = format!(
        "SELECT {} FROM tickets WHERE status = 'waiting' AND category_id IN ({}) \
         ORDER BY priority DESC, created_at ASC, id ASC",
        TICKET_COLUMNS, placeholders
    );
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    let mut stmt = conn.prepare(&sql)?;
    let tickets = stmt
        .query_map(params_from_iter(category_ids.iter()), row_to_ticket)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tickets)
}

fn write_ticket(conn: &Connection, ticket: &Ticket) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE tickets SET counter_id = ?1, status = ?2, called_at = ?3, completed_at = ?4, \
         wait_time = ?5, service_time = ?6 WHERE id = ?7",
        params![
            ticket.counter_id,
            ticket.status.as_str(),
            ticket.called_at.as_ref().map(timestamp),
            ticket.completed_at.as_ref().map(timestamp),
            ticket.wait_time,
            ticket.service_time,
            ticket.id,
        ],
    )?;
    Ok(())
}

fn write_counter(conn: &Connection, counter: &Counter) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE counters SET status = ?1, staff_id = ?2, updated_at = ?3 WHERE id = ?4",
        params![
            counter.status.as_str(),
            counter.staff_id,
            timestamp(&counter.updated_at),
            counter.id,
        ],
    )?;
    Ok(())
}

/// Atomically bump the daily counter for a (category, date) key.
///
/// A single upsert statement: the first caller of the day inserts 1, every
/// later caller increments under the write lock and reads back its own value.
fn allocate_sequence(
    conn: &Connection,
    category_id: i64,
    queue_date: NaiveDate,
) -> Result<u32, StoreError> {
    let value = conn.query_row(
        "INSERT INTO daily_sequences (category_id, queue_date, last_value) VALUES (?1, ?2, 1) \
         ON CONFLICT (category_id, queue_date) DO UPDATE SET last_value = last_value + 1 \
         RETURNING last_value",
        params![category_id, date_key(queue_date)],
        |row| row.get::<_, u32>(0),
    )?;
    Ok(value)
}

// ============================================================================
// Transactions
// ============================================================================

fn create_category_tx(
    conn: &mut Connection,
    new: NewCategory,
    now: DateTime<Utc>,
) -> Result<Category, StoreError> {
    let tx = begin(conn)?;
    tx.execute(
        "INSERT INTO categories (name, prefix, priority, is_active, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![new.name, new.prefix, new.priority, new.is_active, timestamp(&now)],
    )?;
    let id = tx.last_insert_rowid();
    tx.commit()?;

    Ok(Category {
        id,
        name: new.name,
        prefix: new.prefix,
        priority: new.priority,
        is_active: new.is_active,
        created_at: now,
        updated_at: now,
    })
}

fn update_category_tx(
    conn: &mut Connection,
    id: i64,
    update: CategoryUpdate,
    now: DateTime<Utc>,
) -> Result<Category, StoreError> {
    let tx = begin(conn)?;
    let mut category = require_category(&tx, id)?;

    if let Some(name) = update.name {
        category.name = name;
    }
    if let Some(priority) = update.priority {
        category.priority = priority;
    }
    if let Some(is_active) = update.is_active {
        category.is_active = is_active;
    }
    category.updated_at = now;

    tx.execute(
        "UPDATE categories SET name = ?1, priority = ?2, is_active = ?3, updated_at = ?4 \
         WHERE id = ?5",
        params![
            category.name,
            category.priority,
            category.is_active,
            timestamp(&now),
            id
        ],
    )?;
    tx.commit()?;
    Ok(category)
}

fn replace_counter_categories(
    tx: &Transaction<'_>,
    counter_id: i64,
    category_ids: &[i64],
) -> Result<(), StoreError> {
    for category_id in category_ids {
        require_category(tx, *category_id)?;
    }
    tx.execute(
        "DELETE FROM counter_categories WHERE counter_id = ?1",
        params![counter_id],
    )?;
    for category_id in category_ids {
        tx.execute(
            "INSERT OR IGNORE INTO counter_categories (counter_id, category_id) VALUES (?1, ?2)",
            params![counter_id, category_id],
        )?;
    }
    Ok(())
}

fn create_counter_tx(
    conn: &mut Connection,
    new: NewCounter,
    now: DateTime<Utc>,
) -> Result<Counter, StoreError> {
    let tx = begin(conn)?;
    tx.execute(
        "INSERT INTO counters (number, name, status, updated_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            new.number,
            new.name,
            CounterStatus::Offline.as_str(),
            timestamp(&now)
        ],
    )?;
    let id = tx.last_insert_rowid();
    replace_counter_categories(&tx, id, &new.category_ids)?;
    let counter = require_counter(&tx, id)?;
    tx.commit()?;
    Ok(counter)
}

fn set_counter_categories_tx(
    conn: &mut Connection,
    id: i64,
    category_ids: Vec<i64>,
    now: DateTime<Utc>,
) -> Result<Counter, StoreError> {
    let tx = begin(conn)?;
    let mut counter = require_counter(&tx, id)?;
    replace_counter_categories(&tx, id, &category_ids)?;
    counter.updated_at = now;
    write_counter(&tx, &counter)?;
    counter.category_ids = load_counter_categories(&tx, id)?;
    tx.commit()?;
    Ok(counter)
}

fn apply_counter_command_tx(
    conn: &mut Connection,
    id: i64,
    command: CounterCommand,
    now: DateTime<Utc>,
) -> Result<Outcome<CounterChange>, StoreError> {
    let tx = begin(conn)?;
    let mut counter = require_counter(&tx, id)?;

    let changed = match machine::apply_command(&mut counter, &command, now) {
        Ok(changed) => changed,
        Err(rejection) => return Ok(Outcome::Rejected(rejection)),
    };
    if changed {
        write_counter(&tx, &counter)?;
        tx.commit()?;
    }
    Ok(Outcome::Applied(CounterChange { counter, changed }))
}

fn next_sequence_tx(
    conn: &mut Connection,
    category_id: i64,
    queue_date: NaiveDate,
) -> Result<u32, StoreError> {
    let tx = begin(conn)?;
    require_category(&tx, category_id)?;
    let sequence = allocate_sequence(&tx, category_id, queue_date)?;
    tx.commit()?;
    Ok(sequence)
}

fn issue_ticket_tx(
    conn: &mut Connection,
    request: IssueTicket,
) -> Result<Outcome<Ticket>, StoreError> {
    let tx = begin(conn)?;
    let category = require_category(&tx, request.category_id)?;
    if let Err(rejection) = machine::check_issue(&category) {
        return Ok(Outcome::Rejected(rejection));
    }

    let daily_sequence = allocate_sequence(&tx, category.id, request.queue_date)?;
    let ticket_number = format_ticket_number(&category.prefix, daily_sequence);
    let priority = request.priority.unwrap_or(category.priority);

    tx.execute(
        "INSERT INTO tickets (ticket_number, category_id, status, priority, created_at, \
         queue_date, daily_sequence, notes) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            ticket_number,
            category.id,
            TicketStatus::Waiting.as_str(),
            priority,
            timestamp(&request.created_at),
            date_key(request.queue_date),
            daily_sequence,
            request.notes,
        ],
    )?;
    let id = tx.last_insert_rowid();
    tx.commit()?;

    Ok(Outcome::Applied(Ticket {
        id,
        ticket_number,
        category_id: category.id,
        counter_id: None,
        status: TicketStatus::Waiting,
        priority,
        created_at: request.created_at,
        queue_date: request.queue_date,
        daily_sequence,
        called_at: None,
        completed_at: None,
        wait_time: None,
        service_time: None,
        notes: request.notes,
    }))
}

/// Select-and-claim under the write lock.
///
/// The counter guard, the selection and both row updates happen inside one
/// immediate transaction, so no other connection can observe or claim the
/// chosen ticket in between.
fn claim_next_tx(
    conn: &mut Connection,
    counter_id: i64,
    now: DateTime<Utc>,
) -> Result<Claim, StoreError> {
    let tx = begin(conn)?;
    let mut counter = require_counter(&tx, counter_id)?;
    let active = current_serving(&tx, counter_id)?;

    if let Err(rejection) = machine::check_call(&counter, active.as_ref()) {
        return Ok(Claim::Busy(rejection));
    }

    let next = query_waiting(&tx, &counter.category_ids, Some(1))?
        .into_iter()
        .next();
    let Some(mut ticket) = next else {
        if machine::release_empty(&mut counter, now) {
            write_counter(&tx, &counter)?;
        }
        tx.commit()?;
        return Ok(Claim::Empty(counter));
    };

    if let Err(rejection) = machine::assign(&mut counter, &mut ticket, now) {
        return Ok(Claim::Busy(rejection));
    }
    write_ticket(&tx, &ticket)?;
    write_counter(&tx, &counter)?;
    tx.commit()?;

    Ok(Claim::Claimed(Assignment { ticket, counter }))
}

fn finish_ticket_tx(
    conn: &mut Connection,
    counter_id: i64,
    resolution: Resolution,
    now: DateTime<Utc>,
) -> Result<Outcome<Assignment>, StoreError> {
    let tx = begin(conn)?;
    let mut counter = require_counter(&tx, counter_id)?;
    let Some(mut ticket) = current_serving(&tx, counter_id)? else {
        return Ok(Outcome::Rejected(Rejection::NoActiveTicket));
    };

    if let Err(rejection) = machine::finish(&mut counter, Some(&mut ticket), resolution, now) {
        return Ok(Outcome::Rejected(rejection));
    }
    write_ticket(&tx, &ticket)?;
    write_counter(&tx, &counter)?;
    tx.commit()?;

    Ok(Outcome::Applied(Assignment { ticket, counter }))
}

fn transfer_ticket_tx(
    conn: &mut Connection,
    ticket_id: i64,
    target_counter_id: i64,
    now: DateTime<Utc>,
) -> Result<Outcome<Transfer>, StoreError> {
    let tx = begin(conn)?;
    let mut ticket = load_ticket(&tx, ticket_id)?
        .ok_or_else(|| StoreError::not_found("ticket", ticket_id))?;
    let mut target = require_counter(&tx, target_counter_id)?;

    if ticket.status != TicketStatus::Serving {
        return Ok(Outcome::Rejected(Rejection::TicketNotServing {
            status: ticket.status,
        }));
    }
    let source_id = ticket.counter_id.ok_or_else(|| {
        StoreError::Database(format!("serving ticket {} has no counter", ticket.id))
    })?;
    let mut source = require_counter(&tx, source_id)?;
    let target_active = current_serving(&tx, target_counter_id)?;

    if let Err(rejection) = machine::transfer(
        &mut ticket,
        &mut source,
        &mut target,
        target_active.as_ref(),
        now,
    ) {
        return Ok(Outcome::Rejected(rejection));
    }
    // Release the source first so the ticket row never sits on a counter
    // still marked serving by another row.
    write_counter(&tx, &source)?;
    write_ticket(&tx, &ticket)?;
    write_counter(&tx, &target)?;
    tx.commit()?;

    Ok(Outcome::Applied(Transfer {
        ticket,
        source,
        target,
    }))
}

fn cancel_ticket_tx(conn: &mut Connection, ticket_id: i64) -> Result<Outcome<Ticket>, StoreError> {
    let tx = begin(conn)?;
    let mut ticket = load_ticket(&tx, ticket_id)?
        .ok_or_else(|| StoreError::not_found("ticket", ticket_id))?;

    if let Err(rejection) = machine::cancel(&mut ticket) {
        return Ok(Outcome::Rejected(rejection));
    }
    write_ticket(&tx, &ticket)?;
    tx.commit()?;
    Ok(Outcome::Applied(ticket))
}

fn cancel_waiting_before_tx(
    conn: &mut Connection,
    queue_date: NaiveDate,
) -> Result<Vec<Ticket>, StoreError> {
    let tx = begin(conn)?;
    let stale = {
        let sql = format!(
            "SELECT {} FROM tickets WHERE status = 'waiting' AND queue_date < ?1 \
             ORDER BY queue_date ASC, id ASC",
            TICKET_COLUMNS
        );
        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt.query_map(params![date_key(queue_date)], row_to_ticket)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    let mut cancelled = Vec::with_capacity(stale.len());
    for mut ticket in stale {
        if machine::cancel(&mut ticket).is_ok() {
            write_ticket(&tx, &ticket)?;
            cancelled.push(ticket);
        }
    }
    tx.commit()?;
    Ok(cancelled)
}

fn queue_stats_query(conn: &Connection, queue_date: NaiveDate) -> Result<QueueStats, StoreError> {
    let date = date_key(queue_date);
    let mut stats = QueueStats {
        queue_date,
        total_tickets: 0,
        waiting: 0,
        serving: 0,
        completed: 0,
        no_show: 0,
        cancelled: 0,
        active_counters: 0,
        paused_counters: 0,
        avg_wait_secs: None,
        avg_service_secs: None,
        queue_by_category: Vec::new(),
    };

    let mut stmt =
        conn.prepare("SELECT status, COUNT(*) FROM tickets WHERE queue_date = ?1 GROUP BY status")?;
    let by_status = stmt
        .query_map(params![date], |row| {
            Ok((column_parsed::<TicketStatus>(row, 0)?, row.get::<_, u32>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (status, count) in by_status {
        stats.total_tickets += count;
        match status {
            TicketStatus::Waiting => stats.waiting = count,
            TicketStatus::Serving => stats.serving = count,
            TicketStatus::Completed => stats.completed = count,
            TicketStatus::NoShow => stats.no_show = count,
            TicketStatus::Cancelled => stats.cancelled = count,
        }
    }

    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM counters GROUP BY status")?;
    let by_counter = stmt
        .query_map([], |row| {
            Ok((column_parsed::<CounterStatus>(row, 0)?, row.get::<_, u32>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (status, count) in by_counter {
        match status {
            CounterStatus::Idle | CounterStatus::Serving => stats.active_counters += count,
            CounterStatus::Paused => stats.paused_counters += count,
            CounterStatus::Offline => {}
        }
    }

    let (avg_wait, avg_service): (Option<f64>, Option<f64>) = conn.query_row(
        "SELECT AVG(wait_time), AVG(service_time) FROM tickets \
         WHERE queue_date = ?1 AND status = 'completed'",
        params![date],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    stats.avg_wait_secs = avg_wait.map(|secs| secs.round() as u32);
    stats.avg_service_secs = avg_service.map(|secs| secs.round() as u32);

    let mut stmt = conn.prepare(
        "SELECT c.id, c.name, c.prefix, COUNT(t.id) FROM categories c \
         LEFT JOIN tickets t ON t.category_id = c.id AND t.status = 'waiting' AND t.queue_date = ?1 \
         WHERE c.is_active = 1 \
         GROUP BY c.id ORDER BY c.priority DESC, c.id ASC",
    )?;
    stats.queue_by_category = stmt
        .query_map(params![date], |row| {
            Ok(CategoryQueueLength {
                category_id: row.get(0)?,
                category_name: row.get(1)?,
                prefix: row.get(2)?,
                waiting: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(stats)
}

fn list_categories_query(
    conn: &Connection,
    active_only: bool,
) -> Result<Vec<Category>, StoreError> {
    let filter = if active_only { "WHERE is_active = 1" } else { "" };
    let sql = format!(
        "SELECT {} FROM categories {} ORDER BY priority DESC, id ASC",
        CATEGORY_COLUMNS, filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let categories = stmt
        .query_map([], row_to_category)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(categories)
}

fn list_counters_query(conn: &Connection) -> Result<Vec<Counter>, StoreError> {
    let sql = format!("SELECT {} FROM counters ORDER BY id ASC", COUNTER_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let mut counters = stmt
        .query_map([], row_to_counter)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for counter in &mut counters {
        counter.category_ids = load_counter_categories(conn, counter.id)?;
    }
    Ok(counters)
}

fn find_ticket_query(
    conn: &Connection,
    ticket_number: &str,
    queue_date: NaiveDate,
) -> Result<Option<Ticket>, StoreError> {
    let sql = format!(
        "SELECT {} FROM tickets WHERE ticket_number = ?1 AND queue_date = ?2 \
         ORDER BY id DESC LIMIT 1",
        TICKET_COLUMNS
    );
    Ok(conn
        .query_row(
            &sql,
            params![ticket_number, date_key(queue_date)],
            row_to_ticket,
        )
        .optional()?)
}

fn serving_tickets_query(conn: &Connection) -> Result<Vec<Ticket>, StoreError> {
    let sql = format!(
        "SELECT {} FROM tickets WHERE status = 'serving' ORDER BY called_at DESC, id DESC",
        TICKET_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let tickets = stmt
        .query_map([], row_to_ticket)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tickets)
}

fn average_service_query(
    conn: &Connection,
    category_id: Option<i64>,
    since: DateTime<Utc>,
) -> Result<Option<f64>, StoreError> {
    let since = timestamp(&since);
    let average = match category_id {
        Some(category_id) => conn.query_row(
            "SELECT AVG(service_time) FROM tickets WHERE status = 'completed' \
             AND service_time IS NOT NULL AND completed_at >= ?1 AND category_id = ?2",
            params![since, category_id],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            "SELECT AVG(service_time) FROM tickets WHERE status = 'completed' \
             AND service_time IS NOT NULL AND completed_at >= ?1",
            params![since],
            |row| row.get(0),
        )?,
    };
    Ok(average)
}

// ============================================================================
// QueueStore
// ============================================================================

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn create_category(
        &self,
        new: NewCategory,
        now: DateTime<Utc>,
    ) -> Result<Category, StoreError> {
        self.with_conn(|conn| create_category_tx(conn, new, now)).await
    }

    async fn update_category(
        &self,
        id: i64,
        update: CategoryUpdate,
        now: DateTime<Utc>,
    ) -> Result<Category, StoreError> {
        self.with_conn(|conn| update_category_tx(conn, id, update, now)).await
    }

    async fn get_category(&self, id: i64) -> Result<Option<Category>, StoreError> {
        self.with_conn(|conn| load_category(conn, id)).await
    }

    async fn list_categories(&self, active_only: bool) -> Result<Vec<Category>, StoreError> {
        self.with_conn(|conn| list_categories_query(conn, active_only)).await
    }

    async fn create_counter(
        &self,
        new: NewCounter,
        now: DateTime<Utc>,
    ) -> Result<Counter, StoreError> {
        self.with_conn(|conn| create_counter_tx(conn, new, now)).await
    }

    async fn set_counter_categories(
        &self,
        id: i64,
        category_ids: Vec<i64>,
        now: DateTime<Utc>,
    ) -> Result<Counter, StoreError> {
        self.with_conn(|conn| set_counter_categories_tx(conn, id, category_ids, now)).await
    }

    async fn get_counter(&self, id: i64) -> Result<Option<Counter>, StoreError> {
        self.with_conn(|conn| load_counter(conn, id)).await
    }

    async fn list_counters(&self) -> Result<Vec<Counter>, StoreError> {
        self.with_conn(|conn| list_counters_query(conn)).await
    }

    async fn apply_counter_command(
        &self,
        id: i64,
        command: CounterCommand,
        now: DateTime<Utc>,
    ) -> Result<Outcome<CounterChange>, StoreError> {
        self.with_conn(|conn| apply_counter_command_tx(conn, id, command, now)).await
    }

    async fn get_ticket(&self, id: i64) -> Result<Option<Ticket>, StoreError> {
        self.with_conn(|conn| load_ticket(conn, id)).await
    }

    async fn find_ticket_by_number(
        &self,
        ticket_number: &str,
        queue_date: NaiveDate,
    ) -> Result<Option<Ticket>, StoreError> {
        self.with_conn(|conn| find_ticket_query(conn, ticket_number, queue_date)).await
    }

    async fn current_for_counter(&self, counter_id: i64) -> Result<Option<Ticket>, StoreError> {
        self.with_conn(|conn| current_serving(conn, counter_id)).await
    }

    async fn waiting_by_categories(
        &self,
        category_ids: &[i64],
        limit: Option<u32>,
    ) -> Result<Vec<Ticket>, StoreError> {
        self.with_conn(|conn| query_waiting(conn, category_ids, limit)).await
    }

    async fn serving_tickets(&self) -> Result<Vec<Ticket>, StoreError> {
        self.with_conn(|conn| serving_tickets_query(conn)).await
    }

    async fn next_sequence(
        &self,
        category_id: i64,
        queue_date: NaiveDate,
    ) -> Result<u32, StoreError> {
        self.with_conn(|conn| next_sequence_tx(conn, category_id, queue_date)).await
    }

    async fn issue_ticket(&self, request: IssueTicket) -> Result<Outcome<Ticket>, StoreError> {
        self.with_conn(|conn| issue_ticket_tx(conn, request)).await
    }

    async fn claim_next(&self, counter_id: i64, now: DateTime<Utc>) -> Result<Claim, StoreError> {
        self.with_conn(|conn| claim_next_tx(conn, counter_id, now)).await
    }

    async fn finish_ticket(
        &self,
        counter_id: i64,
        resolution: Resolution,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Assignment>, StoreError> {
        self.with_conn(|conn| finish_ticket_tx(conn, counter_id, resolution, now)).await
    }

    async fn transfer_ticket(
        &self,
        ticket_id: i64,
        target_counter_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Outcome<Transfer>, StoreError> {
        self.with_conn(|conn| transfer_ticket_tx(conn, ticket_id, target_counter_id, now)).await
    }

    async fn cancel_ticket(&self, ticket_id: i64) -> Result<Outcome<Ticket>, StoreError> {
        self.with_conn(|conn| cancel_ticket_tx(conn, ticket_id)).await
    }

    async fn cancel_waiting_before(
        &self,
        queue_date: NaiveDate,
    ) -> Result<Vec<Ticket>, StoreError> {
        self.with_conn(|conn| cancel_waiting_before_tx(conn, queue_date)).await
    }

    async fn average_service_secs(
        &self,
        category_id: Option<i64>,
        since: DateTime<Utc>,
    ) -> Result<Option<f64>, StoreError> {
        self.with_conn(|conn| average_service_query(conn, category_id, since)).await
    }

    async fn queue_stats(&self, queue_date: NaiveDate) -> Result<QueueStats, StoreError> {
        self.with_conn(|conn| queue_stats_query(conn, queue_date)).await
    }
}
