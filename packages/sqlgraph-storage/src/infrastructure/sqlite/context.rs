//! SQLite execution context
//!
//! One connection per node execution. The context never crosses nodes and is
//! only touched by the task running that node's kernel, so it carries no lock.
use chrono::{DateTime, Utc};
use rusqlite::{Connection, DatabaseName, OpenFlags, OptionalExtension, Params, Row};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::{database_uri, ColumnInfo, DatabaseRef, FileStamp, SessionState, TableInfo};
use crate::error::{Result, StorageError};

/// How long a statement waits on a locked WAL file before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-node database session with attach/detach bookkeeping
pub struct ExecutionContext {
    conn: Option<Connection>,
    path: String,
    in_memory: bool,
    attached: BTreeSet<String>,
    last_read: Option<DateTime<Utc>>,
    last_write: Option<DateTime<Utc>>,
}

impl ExecutionContext {
    /// Open a shared-cache in-memory database (`in_memory`) or a file
    /// database switched to write-ahead logging
    pub fn open(path: impl Into<String>, in_memory: bool) -> Result<Self> {
        let path = path.into();
        let uri = database_uri(&path, in_memory);
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(&uri, flags).map_err(|e| {
            StorageError::database(format!("open({}) failed: {}", uri, e)).with_source(e)
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        if !in_memory {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            debug!(path = %path, journal_mode = %mode, "file database opened");
        } else {
            debug!(path = %path, "shared in-memory database opened");
        }

        Ok(Self {
            conn: Some(conn),
            path,
            in_memory,
            attached: BTreeSet::new(),
            last_read: None,
            last_write: None,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_in_memory(&self) -> bool {
        self.in_memory
    }

    pub fn state(&self) -> SessionState {
        match (&self.conn, self.attached.is_empty()) {
            (None, _) => SessionState::Closed,
            (Some(_), true) => SessionState::Open,
            (Some(_), false) => SessionState::Attached,
        }
    }

    /// True while a transaction opened with `begin` is still pending
    pub fn in_transaction(&self) -> bool {
        self.conn.as_ref().map_or(false, |c| !c.is_autocommit())
    }

    /// Aliases currently attached to this connection, sorted
    pub fn attached(&self) -> impl Iterator<Item = &str> {
        self.attached.iter().map(String::as_str)
    }

    pub fn last_read(&self) -> Option<DateTime<Utc>> {
        self.last_read
    }

    pub fn last_write(&self) -> Option<DateTime<Utc>> {
        self.last_write
    }

    /// Staleness stamp of the backing file; `None` for in-memory databases
    pub fn file_stamp(&self) -> Option<FileStamp> {
        if self.in_memory {
            None
        } else {
            Some(FileStamp::capture(&self.path))
        }
    }

    /// Borrow the raw connection for ad hoc reads of results
    pub fn connection(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| StorageError::closed(&self.path))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Attach / detach
    // ═══════════════════════════════════════════════════════════════════════

    /// Attach a sibling database under `alias`; the alias is visible only to
    /// this connection
    pub fn attach(&mut self, path: &str, alias: &str, in_memory: bool) -> Result<()> {
        self.check_alias(alias)?;
        if self.attached.contains(alias) {
            return Err(StorageError::invalid_alias(alias, "is already attached"));
        }

        let uri = database_uri(path, in_memory);
        let conn = self.conn_mut()?;
        conn.execute("ATTACH DATABASE ?1 AS ?2", [uri.as_str(), alias])
            .map_err(|e| StorageError::attach(alias, &uri).with_source(e))?;

        if !in_memory {
            let wal: rusqlite::Result<String> = conn.pragma_update_and_check(
                Some(DatabaseName::Attached(alias)),
                "journal_mode",
                "WAL",
                |row| row.get(0),
            );
            if let Err(e) = wal {
                warn!(alias = %alias, path = %path, error = %e, "attached database stays in its current journal mode");
            }
        }

        self.attached.insert(alias.to_string());
        self.last_write = Some(Utc::now());
        debug!(alias = %alias, uri = %uri, "attached");
        Ok(())
    }

    pub fn attach_ref(&mut self, db: &DatabaseRef) -> Result<()> {
        self.attach(&db.path, &db.alias, db.in_memory)
    }

    pub fn detach(&mut self, alias: &str) -> Result<()> {
        if !self.attached.contains(alias) {
            return Err(StorageError::invalid_alias(alias, "is not attached"));
        }

        let conn = self.conn_mut()?;
        conn.execute("DETACH DATABASE ?1", [alias])
            .map_err(|e| StorageError::detach(alias).with_source(e))?;

        self.attached.remove(alias);
        self.last_write = Some(Utc::now());
        debug!(alias = %alias, "detached");
        Ok(())
    }

    fn check_alias(&self, alias: &str) -> Result<()> {
        if alias.is_empty() {
            return Err(StorageError::invalid_alias(alias, "is empty"));
        }
        if alias.eq_ignore_ascii_case("main") || alias.eq_ignore_ascii_case("temp") {
            return Err(StorageError::invalid_alias(alias, "is a reserved schema name"));
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Statements
    // ═══════════════════════════════════════════════════════════════════════

    /// Execute one statement, returning the number of changed rows
    pub fn write<P: Params>(&mut self, sql: &str, params: P) -> Result<usize> {
        let conn = self.conn_mut()?;
        let changed = conn
            .execute(sql, params)
            .map_err(|e| StorageError::query(sql, e))?;
        self.last_write = Some(Utc::now());
        Ok(changed)
    }

    /// Execute a script of several statements without parameters
    pub fn write_batch(&mut self, sql: &str) -> Result<()> {
        let conn = self.conn_mut()?;
        conn.execute_batch(sql)
            .map_err(|e| StorageError::query(sql, e))?;
        self.last_write = Some(Utc::now());
        Ok(())
    }

    pub fn read<T, P, F>(&mut self, sql: &str, params: P, f: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.last_read = Some(Utc::now());
        let conn = self.conn_ref()?;
        let mut stmt = conn.prepare(sql).map_err(|e| StorageError::query(sql, e))?;
        let rows = stmt
            .query_map(params, f)
            .map_err(|e| StorageError::query(sql, e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StorageError::query(sql, e))?;
        Ok(rows)
    }

    pub fn read_row<T, P, F>(&mut self, sql: &str, params: P, f: F) -> Result<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.last_read = Some(Utc::now());
        let conn = self.conn_ref()?;
        conn.query_row(sql, params, f)
            .optional()
            .map_err(|e| StorageError::query(sql, e))
    }

    pub fn begin(&mut self) -> Result<()> {
        self.write_batch("BEGIN")
    }

    /// Commit the open transaction, if any
    pub fn commit(&mut self) -> Result<()> {
        let conn = self.conn_mut()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")
                .map_err(|e| StorageError::query("COMMIT", e))?;
            self.last_write = Some(Utc::now());
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Introspection & maintenance
    // ═══════════════════════════════════════════════════════════════════════

    /// Tables of the main schema in creation order, with their columns
    pub fn tables(&mut self) -> Result<Vec<TableInfo>> {
        let names: Vec<String> = self.read(
            "SELECT name FROM main.sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
            [],
            |row| row.get(0),
        )?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let columns = self.read(
                "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1)",
                [name.as_str()],
                |row| {
                    Ok(ColumnInfo {
                        name: row.get(0)?,
                        decl_type: row.get(1)?,
                        not_null: row.get::<_, i64>(2)? != 0,
                        default_value: row.get(3)?,
                        primary_key: row.get::<_, i64>(4)? != 0,
                    })
                },
            )?;
            tables.push(TableInfo { name, columns });
        }
        Ok(tables)
    }

    pub fn vacuum(&mut self) -> Result<()> {
        self.write_batch("VACUUM")
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Force a full WAL checkpoint, then close the connection
    pub fn destroy(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        self.attached.clear();

        let checkpoint = conn
            .query_row("PRAGMA wal_checkpoint(FULL)", [], |_| Ok(()))
            .map_err(|e| StorageError::checkpoint(&self.path).with_source(e));

        let close = conn.close().map_err(|(_, e)| {
            StorageError::database(format!("close({}) failed: {}", self.path, e)).with_source(e)
        });

        debug!(path = %self.path, "execution context closed");
        checkpoint.and(close)
    }

    fn conn_ref(&self) -> Result<&Connection> {
        self.connection()
    }

    fn conn_mut(&mut self) -> Result<&mut Connection> {
        let path = &self.path;
        self.conn.as_mut().ok_or_else(|| StorageError::closed(path))
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(path = %self.path, error = %e, "execution context dropped without a clean close");
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("path", &self.path)
            .field("in_memory", &self.in_memory)
            .field("state", &self.state())
            .field("attached", &self.attached)
            .finish()
    }
}
