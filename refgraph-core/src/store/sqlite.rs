use super::{Database, Row, Tx, TxMode, Value};
use crate::config::StorageConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{
    ffi, params, params_from_iter, Connection, OptionalExtension, ToSql, Transaction,
    TransactionBehavior,
};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;
use tracing::{debug, info};

const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    );

    CREATE TABLE IF NOT EXISTS repositories (
        id TEXT PRIMARY KEY,
        storage_namespace TEXT NOT NULL,
        creation_date TEXT NOT NULL,
        default_branch TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS branches (
        repository_id TEXT NOT NULL,
        id TEXT NOT NULL,
        staging_token TEXT NOT NULL,
        commit_id TEXT NOT NULL,
        PRIMARY KEY (repository_id, id)
    );

    CREATE TABLE IF NOT EXISTS commits (
        repository_id TEXT NOT NULL,
        id TEXT NOT NULL,
        committer TEXT NOT NULL,
        message TEXT NOT NULL,
        creation_date TEXT NOT NULL,
        parents TEXT NOT NULL,
        tree_id TEXT NOT NULL,
        metadata TEXT NOT NULL,
        PRIMARY KEY (repository_id, id)
    );
"#;

/// SQLite-backed [`Database`].
///
/// Connections are pooled; a transaction owns one connection for its whole
/// lifetime and returns it afterwards. Databases use the WAL journal so
/// read-only transactions see a snapshot without blocking writers.
pub struct SqliteDatabase {
    path: PathBuf,
    config: StorageConfig,
    idle: Mutex<Vec<Connection>>,
    // Directory of a `temporary` database, removed after the pool is dropped.
    _scratch: Option<TempDir>,
}

impl SqliteDatabase {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::open_with_config(db_path, StorageConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(db_path: P, config: StorageConfig) -> Result<Self> {
        let db = Self {
            path: db_path.as_ref().to_path_buf(),
            config,
            idle: Mutex::new(Vec::new()),
            _scratch: None,
        };
        let conn = db.connect()?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        initialize(&conn)?;
        db.release(conn);
        Ok(db)
    }

    /// A private database in a fresh temporary directory, deleted on drop.
    pub fn temporary() -> Result<Self> {
        let dir = TempDir::new()?;
        let mut db = Self::open(dir.path().join("refgraph.db"))?;
        db._scratch = Some(dir);
        Ok(db)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.config.busy_timeout())?;
        Ok(conn)
    }

    fn checkout(&self) -> Result<Connection> {
        let pooled = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        match pooled {
            Some(conn) => Ok(conn),
            None => self.connect(),
        }
    }

    fn release(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.config.pool_size {
                idle.push(conn);
            }
        }
    }
}

fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
        .optional()?;

    if version.is_none() {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;
        info!(version = SCHEMA_VERSION, "initialized schema");
    }

    Ok(())
}

impl Database for SqliteDatabase {
    fn transact<T, F>(&self, ctx: &Context, mode: TxMode, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Tx) -> Result<T>,
    {
        ctx.check()?;
        let mut conn = self.checkout()?;
        let result = run_transaction(&mut conn, ctx, mode, f);
        self.release(conn);
        result
    }
}

fn run_transaction<T, F>(conn: &mut Connection, ctx: &Context, mode: TxMode, f: F) -> Result<T>
where
    F: FnOnce(&mut dyn Tx) -> Result<T>,
{
    let behavior = match mode {
        TxMode::ReadOnly => TransactionBehavior::Deferred,
        TxMode::ReadWrite => TransactionBehavior::Immediate,
    };
    let tx = conn.transaction_with_behavior(behavior).map_err(map_sqlite_err)?;
    let mut handle = SqliteTx { tx, mode };
    let result = f(&mut handle);
    let SqliteTx { tx, .. } = handle;

    // Dropping `tx` without committing rolls it back.
    let value = result?;
    if let Err(e) = ctx.check() {
        debug!(error = %e, "context ended, rolling back");
        return Err(e);
    }
    match mode {
        TxMode::ReadWrite => tx.commit().map_err(map_sqlite_err)?,
        TxMode::ReadOnly => tx.rollback()?,
    }
    Ok(value)
}

struct SqliteTx<'c> {
    tx: Transaction<'c>,
    mode: TxMode,
}

impl Tx for SqliteTx<'_> {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut stmt = self.tx.prepare_cached(sql)?;
        let width = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(from_sql(row.get::<_, SqlValue>(idx)?)?);
            }
            out.push(Row::new(values));
        }
        Ok(out)
    }

    fn exec(&mut self, sql: &str, params: &[Value]) -> Result<usize> {
        if self.mode == TxMode::ReadOnly {
            return Err(Error::InvalidOperation(
                "write attempted in a read-only transaction".to_string(),
            ));
        }
        let mut stmt = self.tx.prepare_cached(sql)?;
        stmt.execute(params_from_iter(params.iter()))
            .map_err(map_sqlite_err)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Integer(n) => ToSqlOutput::Owned(SqlValue::Integer(*n)),
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
        })
    }
}

fn from_sql(value: SqlValue) -> Result<Value> {
    match value {
        SqlValue::Null => Ok(Value::Null),
        SqlValue::Integer(n) => Ok(Value::Integer(n)),
        SqlValue::Text(s) => Ok(Value::Text(s)),
        SqlValue::Real(_) | SqlValue::Blob(_) => Err(Error::InvalidOperation(
            "unsupported column type".to_string(),
        )),
    }
}

fn map_sqlite_err(err: rusqlite::Error) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(failure, msg)
            if failure.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Error::AlreadyExists(msg.clone().unwrap_or_else(|| failure.to_string()))
        }
        _ => Error::Database(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use tempfile::TempDir;

    fn count(db: &SqliteDatabase) -> i64 {
        db.transact(&Context::background(), TxMode::ReadOnly, |tx| {
            let rows = tx.query("SELECT COUNT(*) FROM repositories", &[])?;
            rows[0].integer(0)
        })
        .unwrap()
    }

    fn insert(tx: &mut dyn Tx, id: &str) -> Result<usize> {
        tx.exec(
            "INSERT INTO repositories (id, storage_namespace, creation_date, default_branch)
             VALUES (?1, ?2, ?3, ?4)",
            &[id.into(), "s3://bucket".into(), "2021-01-01T00:00:00Z".into(), "main".into()],
        )
    }

    #[test]
    fn test_storage_initialization() {
        let db = SqliteDatabase::temporary().unwrap();
        assert_eq!(0, count(&db));
    }

    #[test]
    fn test_commit_on_success() {
        let db = SqliteDatabase::temporary().unwrap();
        db.transact(&Context::background(), TxMode::ReadWrite, |tx| insert(tx, "repo"))
            .unwrap();

        assert_eq!(1, count(&db));
    }

    #[test]
    fn test_rollback_on_error() {
        let db = SqliteDatabase::temporary().unwrap();
        let result: Result<()> = db.transact(&Context::background(), TxMode::ReadWrite, |tx| {
            insert(tx, "repo")?;
            Err(Error::InvalidOperation("boom".to_string()))
        });

        assert!(matches!(result, Err(Error::InvalidOperation(_))));
        assert_eq!(0, count(&db));
    }

    #[test]
    fn test_rollback_when_cancelled_mid_transaction() {
        let db = SqliteDatabase::temporary().unwrap();
        let ctx = Context::background();
        let result = db.transact(&ctx, TxMode::ReadWrite, |tx| {
            insert(tx, "repo")?;
            ctx.cancel();
            Ok(())
        });

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(0, count(&db));
    }

    #[test]
    fn test_cancelled_context_never_opens() {
        let db = SqliteDatabase::temporary().unwrap();
        let ctx = Context::background();
        ctx.cancel();

        let mut ran = false;
        let result = db.transact(&ctx, TxMode::ReadOnly, |_| {
            ran = true;
            Ok(())
        });

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(!ran);
    }

    #[test]
    fn test_duplicate_key_maps_to_already_exists() {
        let db = SqliteDatabase::temporary().unwrap();
        let ctx = Context::background();
        db.transact(&ctx, TxMode::ReadWrite, |tx| insert(tx, "repo")).unwrap();

        let err = db
            .transact(&ctx, TxMode::ReadWrite, |tx| insert(tx, "repo"))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let db = SqliteDatabase::temporary().unwrap();
        let err = db
            .transact(&Context::background(), TxMode::ReadOnly, |tx| insert(tx, "repo"))
            .unwrap_err();

        assert!(matches!(err, Error::InvalidOperation(_)));
        assert_eq!(0, count(&db));
    }

    #[test]
    fn test_get_reports_missing_row() {
        struct Id(String);
        impl crate::store::FromRow for Id {
            fn from_row(row: &Row) -> Result<Self> {
                Ok(Id(row.text(0)?.to_string()))
            }
        }

        let db = SqliteDatabase::temporary().unwrap();
        let result = db.transact(&Context::background(), TxMode::ReadOnly, |tx| {
            tx.get::<Id>("SELECT id FROM repositories WHERE id = ?1", &["nope".into()])
        });

        assert!(matches!(result, Err(Error::RowNotFound)));
    }

    #[test]
    fn test_read_during_open_write_sees_snapshot() {
        let db = SqliteDatabase::temporary().unwrap();
        let ctx = Context::background();
        db.transact(&ctx, TxMode::ReadWrite, |tx| insert(tx, "a")).unwrap();

        let (inserted_tx, inserted_rx) = mpsc::channel();
        let (read_tx, read_rx) = mpsc::channel();
        let shared = &db;
        thread::scope(|s| {
            let writer = s.spawn(move || {
                shared.transact(&Context::background(), TxMode::ReadWrite, |tx| {
                    insert(tx, "b")?;
                    inserted_tx.send(()).unwrap();
                    read_rx.recv().unwrap();
                    Ok(())
                })
            });

            inserted_rx.recv().unwrap();
            // The write is still open: the reader must neither fail nor see it.
            assert_eq!(1, count(&db));
            read_tx.send(()).unwrap();

            writer.join().unwrap().unwrap();
        });

        assert_eq!(2, count(&db));
    }

    #[test]
    fn test_temporary_database_removed_on_drop() {
        let db = SqliteDatabase::temporary().unwrap();
        let path = db.path.clone();
        assert!(path.exists());

        drop(db);
        assert!(!path.exists());
    }

    #[test]
    fn test_file_database_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("refs.db");
        {
            let db = SqliteDatabase::open(&path).unwrap();
            db.transact(&Context::background(), TxMode::ReadWrite, |tx| insert(tx, "repo"))
                .unwrap();
        }

        let db = SqliteDatabase::open(&path).unwrap();
        assert_eq!(1, count(&db));
    }

    #[test]
    fn test_temporary_databases_are_isolated() {
        let a = SqliteDatabase::temporary().unwrap();
        let b = SqliteDatabase::temporary().unwrap();
        a.transact(&Context::background(), TxMode::ReadWrite, |tx| insert(tx, "repo"))
            .unwrap();

        assert_eq!(1, count(&a));
        assert_eq!(0, count(&b));
    }
}
