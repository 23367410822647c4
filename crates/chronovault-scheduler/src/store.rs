//! Durable task store.
//!
//! The SQLite implementation keeps the queryable columns of a task
//! (name, state, next run, submit time, claim, version) alongside the full
//! JSON-encoded record. Every write checks the record version so concurrent
//! writers never silently overwrite each other.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use crate::tasks::{TaskId, TaskRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("corrupt task record {id}: {source}")]
    Corrupt {
        id: TaskId,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot encode task record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Task selection by name pattern and submit time.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// SQL `LIKE` pattern on the identity name.
    pub pattern: Option<String>,
    pub escape: Option<char>,
    pub submitted_since: Option<DateTime<Utc>>,
    pub submitted_until: Option<DateTime<Utc>>,
    pub min_id: Option<TaskId>,
}

/// Persistence for tasks and named properties.
pub trait TaskStore: Send + Sync {
    /// Persist a new record and return its assigned id.
    fn create(&self, record: &TaskRecord) -> Result<TaskId, StoreError>;

    fn find(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError>;

    /// Write the record if the stored version still equals `record.version`.
    /// On success the version is incremented in both places.
    fn update(&self, record: &mut TaskRecord) -> Result<bool, StoreError>;

    fn remove(&self, id: TaskId) -> Result<bool, StoreError>;

    /// Remove only if the stored version equals `version`.
    fn remove_version(&self, id: TaskId, version: u64) -> Result<bool, StoreError>;

    /// Matching records in id order.
    fn search(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, StoreError>;

    /// Ids of unended tasks due at or before `until` (all unended when `None`).
    fn due(&self, until: Option<DateTime<Utc>>) -> Result<Vec<TaskId>, StoreError>;

    /// Insert a property. Returns false if it already exists.
    fn create_property(&self, name: &str, value: &str) -> Result<bool, StoreError>;

    fn get_property(&self, name: &str) -> Result<Option<String>, StoreError>;

    /// Replace the value of an existing property. Returns false if absent.
    fn set_property(&self, name: &str, value: &str) -> Result<bool, StoreError>;

    fn remove_property(&self, name: &str) -> Result<bool, StoreError>;

    fn find_properties(&self, pattern: &str, escape: Option<char>) -> Result<BTreeMap<String, String>, StoreError>;

    fn remove_properties(&self, pattern: &str, escape: Option<char>) -> Result<usize, StoreError>;
}

/// SQLite-backed task store.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn like_clause(column: &str, escape: Option<char>, params: &mut Vec<SqlValue>, pattern: &str) -> String {
    params.push(SqlValue::Text(pattern.to_string()));
    match escape {
        Some(c) => {
            params.push(SqlValue::Text(c.to_string()));
            format!("{column} LIKE ?{} ESCAPE ?{}", params.len() - 1, params.len())
        }
        None => format!("{column} LIKE ?{}", params.len()),
    }
}

impl SqliteTaskStore {
    /// Open or create the task database.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL DEFAULT '',
                state TEXT NOT NULL,
                next_run INTEGER,               -- epoch ms, NULL once ended
                submitted INTEGER NOT NULL,     -- epoch ms
                claimed_until INTEGER,          -- epoch ms
                version INTEGER NOT NULL DEFAULT 0,
                body TEXT NOT NULL              -- JSON TaskRecord
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_next_run ON tasks(next_run);
            CREATE INDEX IF NOT EXISTS idx_tasks_name ON tasks(name);

            CREATE TABLE IF NOT EXISTS properties (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Unavailable("connection lock poisoned".into()))
    }

    fn decode(id: TaskId, version: i64, body: &str) -> Result<TaskRecord, StoreError> {
        let mut record: TaskRecord =
            serde_json::from_str(body).map_err(|source| StoreError::Corrupt { id, source })?;
        record.id = id;
        record.version = version as u64;
        Ok(record)
    }
}

impl TaskStore for SqliteTaskStore {
    fn create(&self, record: &TaskRecord) -> Result<TaskId, StoreError> {
        let conn = self.conn()?;
        let body = serde_json::to_string(record).map_err(StoreError::Encode)?;
        conn.execute(
            "INSERT INTO tasks (name, state, next_run, submitted, claimed_until, version, body)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                record.name,
                record.state.as_str(),
                record.next_run.map(to_millis),
                to_millis(record.submitted),
                record.claimed_until.map(to_millis),
                body,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn find(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row("SELECT version, body FROM tasks WHERE id = ?1", params![id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .optional()?;
        row.map(|(version, body)| Self::decode(id, version, &body)).transpose()
    }

    fn update(&self, record: &mut TaskRecord) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let expected = record.version;
        record.version = expected + 1;
        let body = serde_json::to_string(record).map_err(StoreError::Encode);
        let changed = match body {
            Ok(body) => conn.execute(
                "UPDATE tasks SET name = ?1, state = ?2, next_run = ?3, claimed_until = ?4,
                        version = version + 1, body = ?5
                 WHERE id = ?6 AND version = ?7",
                params![
                    record.name,
                    record.state.as_str(),
                    record.next_run.map(to_millis),
                    record.claimed_until.map(to_millis),
                    body,
                    record.id,
                    expected as i64,
                ],
            ),
            Err(e) => {
                record.version = expected;
                return Err(e);
            }
        };
        match changed {
            Ok(1) => Ok(true),
            Ok(_) => {
                record.version = expected;
                Ok(false)
            }
            Err(e) => {
                record.version = expected;
                Err(e.into())
            }
        }
    }

    fn remove(&self, id: TaskId) -> Result<bool, StoreError> {
        let n = self.conn()?.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    fn remove_version(&self, id: TaskId, version: u64) -> Result<bool, StoreError> {
        let n = self
            .conn()?
            .execute("DELETE FROM tasks WHERE id = ?1 AND version = ?2", params![id, version as i64])?;
        Ok(n > 0)
    }

    fn search(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>, StoreError> {
        let mut clauses = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();
        if let Some(pattern) = &filter.pattern {
            clauses.push(like_clause("name", filter.escape, &mut values, pattern));
        }
        if let Some(since) = filter.submitted_since {
            values.push(SqlValue::Integer(to_millis(since)));
            clauses.push(format!("submitted >= ?{}", values.len()));
        }
        if let Some(until) = filter.submitted_until {
            values.push(SqlValue::Integer(to_millis(until)));
            clauses.push(format!("submitted <= ?{}", values.len()));
        }
        if let Some(min_id) = filter.min_id {
            values.push(SqlValue::Integer(min_id));
            clauses.push(format!("id >= ?{}", values.len()));
        }
        let mut sql = String::from("SELECT id, version, body FROM tasks");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY id");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, version, body)| Self::decode(id, version, &body))
            .collect()
    }

    fn due(&self, until: Option<DateTime<Utc>>) -> Result<Vec<TaskId>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM tasks WHERE next_run IS NOT NULL AND (?1 IS NULL OR next_run <= ?1)
             ORDER BY next_run",
        )?;
        let ids = stmt
            .query_map(params![until.map(to_millis)], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn create_property(&self, name: &str, value: &str) -> Result<bool, StoreError> {
        let n = self.conn()?.execute(
            "INSERT OR IGNORE INTO properties (name, value) VALUES (?1, ?2)",
            params![name, value],
        )?;
        Ok(n > 0)
    }

    fn get_property(&self, name: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn()?
            .query_row("SELECT value FROM properties WHERE name = ?1", params![name], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn set_property(&self, name: &str, value: &str) -> Result<bool, StoreError> {
        let n = self
            .conn()?
            .execute("UPDATE properties SET value = ?2 WHERE name = ?1", params![name, value])?;
        Ok(n > 0)
    }

    fn remove_property(&self, name: &str) -> Result<bool, StoreError> {
        let n = self.conn()?.execute("DELETE FROM properties WHERE name = ?1", params![name])?;
        Ok(n > 0)
    }

    fn find_properties(&self, pattern: &str, escape: Option<char>) -> Result<BTreeMap<String, String>, StoreError> {
        let mut values = Vec::new();
        let clause = like_clause("name", escape, &mut values, pattern);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT name, value FROM properties WHERE {clause}"))?;
        let found = stmt
            .query_map(params_from_iter(values), |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<BTreeMap<String, String>, _>>()?;
        Ok(found)
    }

    fn remove_properties(&self, pattern: &str, escape: Option<char>) -> Result<usize, StoreError> {
        let mut values = Vec::new();
        let clause = like_clause("name", escape, &mut values, pattern);
        let n = self
            .conn()?
            .execute(&format!("DELETE FROM properties WHERE {clause}"), params_from_iter(values))?;
        Ok(n)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::Payload;
    use crate::context::ContextBundle;
    use crate::tasks::{ExecutionHistory, TaskProperties, TaskState};
    use crate::trigger::Plan;

    pub(crate) fn record(name: &str) -> TaskRecord {
        let now = Utc::now();
        TaskRecord {
            id: 0,
            name: name.to_string(),
            workload: Payload::Transient { type_name: "test".into() },
            trigger: None,
            plan: Plan::OneShot { delay_ms: 0 },
            properties: TaskProperties::default(),
            predetermined_result: None,
            context: ContextBundle::default(),
            submitted: now,
            state: TaskState::Scheduled,
            next_run: Some(now),
            attempts: 0,
            consecutive_failures: 0,
            history: ExecutionHistory::default(),
            last_execution: None,
            claimed_until: None,
            version: 0,
        }
    }

    #[test]
    fn test_create_and_find() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let id = store.create(&record("report")).unwrap();
        let found = store.find(id).unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.name, "report");
        assert!(store.find(id + 100).unwrap().is_none());
    }

    #[test]
    fn test_update_checks_version() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let id = store.create(&record("a")).unwrap();
        let mut first = store.find(id).unwrap().unwrap();
        let mut stale = first.clone();

        first.state = TaskState::Successful;
        assert!(store.update(&mut first).unwrap());
        assert_eq!(first.version, 1);

        stale.state = TaskState::Failed;
        assert!(!store.update(&mut stale).unwrap());
        assert_eq!(stale.version, 0);
        assert_eq!(store.find(id).unwrap().unwrap().state, TaskState::Successful);

        assert!(!store.remove_version(id, 0).unwrap());
        assert!(store.remove_version(id, 1).unwrap());
    }

    #[test]
    fn test_search_with_escape() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        store.create(&record("job_1")).unwrap();
        store.create(&record("jobX1")).unwrap();
        store.create(&record("other")).unwrap();

        let all = TaskFilter { pattern: Some("job_1".into()), ..Default::default() };
        assert_eq!(store.search(&all).unwrap().len(), 2);

        let exact = TaskFilter { pattern: Some("job\\_1".into()), escape: Some('\\'), ..Default::default() };
        let found = store.search(&exact).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "job_1");

        let since = TaskFilter { submitted_since: Some(Utc::now() + chrono::Duration::hours(1)), ..Default::default() };
        assert!(store.search(&since).unwrap().is_empty());
    }

    #[test]
    fn test_due_skips_ended() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        let due = store.create(&record("due")).unwrap();
        let mut ended = record("ended");
        ended.next_run = None;
        store.create(&ended).unwrap();
        let mut later = record("later");
        later.next_run = Some(Utc::now() + chrono::Duration::hours(2));
        let later = store.create(&later).unwrap();

        assert_eq!(store.due(Some(Utc::now())).unwrap(), vec![due]);
        assert_eq!(store.due(None).unwrap(), vec![due, later]);
    }

    #[test]
    fn test_properties() {
        let store = SqliteTaskStore::open_in_memory().unwrap();
        assert!(store.create_property("app.version", "1").unwrap());
        assert!(!store.create_property("app.version", "2").unwrap());
        assert!(store.set_property("app.version", "3").unwrap());
        assert!(!store.set_property("missing", "3").unwrap());
        assert_eq!(store.get_property("app.version").unwrap().as_deref(), Some("3"));
        store.create_property("app.mode", "x").unwrap();
        store.create_property("other", "y").unwrap();
        assert_eq!(store.find_properties("app.%", None).unwrap().len(), 2);
        assert_eq!(store.remove_properties("app.%", None).unwrap(), 2);
        assert!(store.remove_property("other").unwrap());
        assert!(store.get_property("other").unwrap().is_none());
    }

    #[test]
    fn test_open_file() {
        let dir = std::env::temp_dir().join("chronovault-store-test");
        let path = dir.join("tasks.db");
        std::fs::remove_dir_all(&dir).ok();
        {
            let store = SqliteTaskStore::open(&path).unwrap();
            store.create(&record("persisted")).unwrap();
        }
        let reopened = SqliteTaskStore::open(&path).unwrap();
        assert_eq!(reopened.search(&TaskFilter::default()).unwrap().len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
