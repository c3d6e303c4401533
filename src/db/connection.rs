//! Backend selection and database sessions.

use super::blob::{blob_to_bytes, bytes_to_blob};
use crate::config::NodeConfig;
use crate::error::{CheckpointError, CourierError, Result};
use parking_lot::Mutex;
use rusqlite::{ffi, params, Connection, DatabaseName};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Logical database names stored with the `.sqlite` extension.
const SQLITE_EXT_NAMES: [&str; 2] = ["validators", "peerfinder"];

/// Storage driver used for a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// Local single-file SQLite database.
    Sqlite,
}

impl Backend {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "sqlite" => Ok(Backend::Sqlite),
            other => Err(CourierError::config(format!(
                "Unsupported database backend: {other}"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved backend plus connection string for one logical database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub backend: Backend,
    pub connection_string: String,
}

impl ConnectionDescriptor {
    /// Resolve a logical database name (e.g. `"ledger"`, `"validators"`)
    /// against the node configuration.
    pub fn resolve(config: &NodeConfig, name: &str) -> Result<Self> {
        let backend = Backend::from_name(&config.sqdb.backend)?;
        let ext = if SQLITE_EXT_NAMES.contains(&name) {
            ".sqlite"
        } else {
            ".db"
        };
        let connection_string = sqlite_path(name, &config.database_path, ext)?;

        Ok(Self {
            backend,
            connection_string,
        })
    }

    /// Open a session on this database.
    pub fn open(&self) -> Result<Session> {
        match self.backend {
            Backend::Sqlite => Session::open_sqlite(&self.connection_string),
        }
    }
}

/// Open the logical database `name` configured in `config`.
pub fn open(config: &NodeConfig, name: &str) -> Result<Session> {
    ConnectionDescriptor::resolve(config, name)?.open()
}

/// Open a session given a backend name and connection string directly.
pub fn open_with(backend_name: &str, connection_string: &str) -> Result<Session> {
    ConnectionDescriptor {
        backend: Backend::from_name(backend_name)?,
        connection_string: connection_string.to_string(),
    }
    .open()
}

/// `dir/name+ext` if `dir` is an existing directory, otherwise `dir` as given.
fn sqlite_path(name: &str, dir: &Path, ext: &str) -> Result<String> {
    if dir.as_os_str().is_empty() || name.is_empty() {
        return Err(CourierError::config(format!(
            "Sqlite databases must specify a dir and a name. Name: {} Dir: {}",
            name,
            dir.display()
        )));
    }

    let mut file = dir.to_path_buf();
    if file.is_dir() {
        file.push(format!("{name}{ext}"));
    }
    Ok(file.to_string_lossy().into_owned())
}

/// An open database connection.
///
/// The connection sits behind a mutex so a session can be shared between the
/// writer and background checkpoint jobs. The WAL hook only ever fires while
/// a writer holds that mutex.
pub struct Session {
    conn: Mutex<Option<Connection>>,
    path: String,
    /// Set while a checkpointer owns the connection's WAL hook.
    wal_hook_owned: AtomicBool,
}

impl Session {
    fn open_sqlite(connection_string: &str) -> Result<Self> {
        let conn = Connection::open(connection_string).map_err(|e| {
            CourierError::Backend(format!("Failed to open '{connection_string}': {e}"))
        })?;

        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = connection_string, journal_mode = %mode, "Database opened");

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: connection_string.to_string(),
            wal_hook_owned: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Run `f` with the connection locked.
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or_else(closed)?;
        Ok(f(conn)?)
    }

    /// Run `f` with the native handle while the connection is locked. `None`
    /// if the session is closed.
    pub(crate) fn with_raw_handle<T>(&self, f: impl FnOnce(*mut ffi::sqlite3) -> T) -> Option<T> {
        let guard = self.conn.lock();
        guard.as_ref().map(|conn| {
            // SAFETY: the handle is only used while the lock keeps `conn` alive.
            let handle = unsafe { conn.handle() };
            f(handle)
        })
    }

    /// Claim the WAL hook slot. False if another checkpointer holds it.
    pub(crate) fn claim_wal_hook(&self) -> bool {
        !self.wal_hook_owned.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn release_wal_hook(&self) {
        self.wal_hook_owned.store(false, Ordering::Release);
    }

    /// Whether a checkpointer is currently attached.
    pub fn has_checkpointer(&self) -> bool {
        self.wal_hook_owned.load(Ordering::Acquire)
    }

    /// Close the connection. Later operations fail with a backend error.
    pub fn close(&self) -> Result<()> {
        if let Some(conn) = self.conn.lock().take() {
            conn.close().map_err(|(_, e)| CourierError::from(e))?;
            info!(path = %self.path, "Database closed");
        }
        Ok(())
    }

    /// SQLite heap in use across the process, in KiB.
    pub fn memory_used_kb_all(&self) -> Result<u64> {
        if !self.is_open() {
            return Err(closed());
        }
        // SAFETY: sqlite3_memory_used takes no arguments and is thread-safe.
        let used = unsafe { ffi::sqlite3_memory_used() };
        Ok(used.max(0) as u64 / 1024)
    }

    /// Page cache used by this connection, in KiB.
    pub fn cache_used_kb(&self) -> Result<u64> {
        self.with_raw_handle(|db| {
            let (mut current, mut highwater) = (0, 0);
            // SAFETY: `db` is a live handle for the duration of the closure.
            let rc = unsafe {
                ffi::sqlite3_db_status(
                    db,
                    ffi::SQLITE_DBSTATUS_CACHE_USED,
                    &mut current,
                    &mut highwater,
                    0,
                )
            };
            if rc == ffi::SQLITE_OK {
                Ok(current.max(0) as u64 / 1024)
            } else {
                Err(CourierError::Backend(format!("sqlite3_db_status failed: {rc}")))
            }
        })
        .unwrap_or_else(|| Err(closed()))
    }

    /// Read a BLOB column into memory.
    ///
    /// `table` and `column` are trusted identifiers, not user input.
    pub fn read_blob(&self, table: &str, column: &str, row_id: i64) -> Result<Vec<u8>> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or_else(closed)?;
        let blob = conn.blob_open(DatabaseName::Main, table, column, row_id, true)?;
        blob_to_bytes(&blob)
    }

    /// Replace a BLOB column with `bytes`.
    ///
    /// `table` and `column` are trusted identifiers, not user input.
    pub fn write_blob(&self, table: &str, column: &str, row_id: i64, bytes: &[u8]) -> Result<()> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or_else(closed)?;

        let sql = format!("UPDATE \"{table}\" SET \"{column}\" = zeroblob(?1) WHERE rowid = ?2");
        let updated = conn.execute(&sql, params![bytes.len() as i64, row_id])?;
        if updated == 0 {
            return Err(CourierError::Backend(format!(
                "No row {row_id} in table '{table}'"
            )));
        }

        let mut blob = conn.blob_open(DatabaseName::Main, table, column, row_id, false)?;
        bytes_to_blob(bytes, &mut blob)
    }

    /// Run a passive checkpoint: copy as many WAL frames as possible into
    /// the database without waiting on readers or writers.
    pub fn checkpoint_passive(&self) -> std::result::Result<super::WalFrames, CheckpointError> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or_else(|| CheckpointError::Failed {
            code: ffi::SQLITE_MISUSE,
            message: "session is closed".to_string(),
        })?;

        let (busy, in_wal, written): (i64, i64, i64) =
            conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;

        if busy != 0 {
            return Err(CheckpointError::Busy);
        }
        Ok(super::WalFrames {
            frames_in_wal: in_wal,
            frames_written: written,
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

fn closed() -> CourierError {
    CourierError::Backend("session is closed".to_string())
}
