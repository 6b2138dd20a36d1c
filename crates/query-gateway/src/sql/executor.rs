//! Bounded, read-only query execution.
//!
//! Two nested deadlines: a short one for opening the connection and a longer one
//! for running the statement. Both run on the blocking pool under
//! `tokio::time::timeout`; when the statement deadline fires the connection is
//! interrupted so the worker thread stops too.

use async_trait::async_trait;
use rusqlite::{types::ValueRef, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult, TimeoutPhase};
use crate::sql::schema::{ColumnInfo, SchemaSnapshot};
use crate::sql::ValidatedQuery;

/// Generic tabular result. `None` is a database NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl TabularResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Per-phase time budgets for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryDeadlines {
    pub connect: Duration,
    pub command: Duration,
}

impl QueryDeadlines {
    pub fn new(connect: Duration, command: Duration) -> Self {
        Self { connect, command }
    }

    /// Cap both phases by the time left before an outer deadline.
    pub fn within(&self, outer: Option<Instant>) -> Self {
        match outer {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                Self {
                    connect: self.connect.min(remaining),
                    command: self.command.min(remaining),
                }
            }
            None => *self,
        }
    }
}

impl Default for QueryDeadlines {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(20),
            command: Duration::from_secs(60),
        }
    }
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run one validated, read-only statement.
    async fn execute(
        &self,
        query: &ValidatedQuery,
        deadlines: QueryDeadlines,
    ) -> GatewayResult<TabularResult>;

    /// Read table/column names from the catalog, at most `max_columns` rows.
    async fn introspect(
        &self,
        deadlines: QueryDeadlines,
        max_columns: usize,
    ) -> GatewayResult<SchemaSnapshot>;

    /// Identifier used to key cached schema descriptions.
    fn source_id(&self) -> String;

    /// Cheap reachability check bounded by `budget`.
    async fn ping(&self, budget: Duration) -> GatewayResult<()> {
        self.introspect(QueryDeadlines::new(budget, budget), 1).await.map(|_| ())
    }
}

const CATALOG_SQL: &str = "
    SELECT 'main' AS table_schema, m.name AS table_name, p.name AS column_name, p.type AS data_type
    FROM sqlite_master m
    JOIN pragma_table_info(m.name) p
    WHERE m.type IN ('table', 'view') AND m.name NOT LIKE 'sqlite_%'
    ORDER BY m.name, p.cid
    LIMIT ?1";

/// Executor backed by a SQLite file opened read-only.
pub struct SqliteExecutor {
    path: PathBuf,
}

impl SqliteExecutor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Accepts `sqlite://path`, `sqlite:path` or a plain file path.
    pub fn from_url(url: &str) -> GatewayResult<Self> {
        let trimmed = url.trim();
        let path = trimmed
            .strip_prefix("sqlite://")
            .or_else(|| trimmed.strip_prefix("sqlite:"))
            .unwrap_or(trimmed);
        if path.is_empty() {
            return Err(GatewayError::Configuration(
                "Missing DATABASE_URL connection string".to_string(),
            ));
        }
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn connect(&self, budget: Duration) -> GatewayResult<Connection> {
        let path = self.path.clone();
        // longer than the budget so the timeout below always wins a lock wait
        let busy_wait = budget.saturating_mul(2);
        let opening = tokio::task::spawn_blocking(move || -> rusqlite::Result<Connection> {
            let conn = Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_ONLY
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX
                    | OpenFlags::SQLITE_OPEN_URI,
            )?;
            conn.busy_timeout(busy_wait)?;
            // forces the file open and a shared lock
            conn.query_row("PRAGMA schema_version", [], |row| row.get::<_, i64>(0))?;
            Ok(conn)
        });

        match tokio::time::timeout(budget, opening).await {
            Ok(Ok(Ok(conn))) => Ok(conn),
            Ok(Ok(Err(e))) => Err(e.into()),
            Ok(Err(join_err)) => Err(GatewayError::Database {
                code: -1,
                message: format!("connection task failed: {}", join_err),
            }),
            Err(_) => {
                warn!("Connect to {} exceeded {:?}", self.path.display(), budget);
                Err(GatewayError::timeout(TimeoutPhase::Connect, budget))
            }
        }
    }

    async fn run<T, F>(&self, deadlines: QueryDeadlines, work: F) -> GatewayResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let started = Instant::now();
        let conn = self.connect(deadlines.connect).await?;
        let interrupt = conn.get_interrupt_handle();
        let command = deadlines.command;
        let running = tokio::task::spawn_blocking(move || {
            conn.busy_timeout(command)?;
            work(&conn)
        });

        match tokio::time::timeout(command, running).await {
            Ok(Ok(result)) => {
                debug!("Statement finished in {:?}", started.elapsed());
                result.map_err(GatewayError::from)
            }
            Ok(Err(join_err)) => Err(GatewayError::Database {
                code: -1,
                message: format!("query task failed: {}", join_err),
            }),
            Err(_) => {
                interrupt.interrupt();
                warn!("Statement exceeded {:?}; interrupted", command);
                Err(GatewayError::timeout(TimeoutPhase::Command, command))
            }
        }
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn execute(
        &self,
        query: &ValidatedQuery,
        deadlines: QueryDeadlines,
    ) -> GatewayResult<TabularResult> {
        let sql = query.sql().to_string();
        let row_cap = query.row_cap();
        info!("Executing validated query (row cap {})", row_cap);
        let table = self.run(deadlines, move |conn| read_table(conn, &sql, row_cap)).await?;
        info!("Query returned {} rows x {} columns", table.row_count(), table.columns.len());
        Ok(table)
    }

    async fn introspect(
        &self,
        deadlines: QueryDeadlines,
        max_columns: usize,
    ) -> GatewayResult<SchemaSnapshot> {
        let limit = max_columns as i64;
        self.run(deadlines, move |conn| {
            let mut stmt = conn.prepare(CATALOG_SQL)?;
            let mut rows = stmt.query([limit])?;
            let mut snapshot = SchemaSnapshot::default();
            while let Some(row) = rows.next()? {
                let schema: String = row.get(0)?;
                let table: String = row.get(1)?;
                let column = ColumnInfo {
                    name: row.get(2)?,
                    data_type: row.get(3)?,
                };
                snapshot.push_column(&format!("[{}].[{}]", schema, table), column);
            }
            Ok(snapshot)
        })
        .await
    }

    fn source_id(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }

    async fn ping(&self, budget: Duration) -> GatewayResult<()> {
        let started = Instant::now();
        let conn = self.connect(budget).await?;
        let remaining = budget.saturating_sub(started.elapsed());
        let check = tokio::task::spawn_blocking(move || {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        });
        match tokio::time::timeout(remaining, check).await {
            Ok(Ok(result)) => result.map(|_| ()).map_err(GatewayError::from),
            Ok(Err(join_err)) => Err(GatewayError::Database {
                code: -1,
                message: format!("check task failed: {}", join_err),
            }),
            Err(_) => Err(GatewayError::timeout(TimeoutPhase::Command, budget)),
        }
    }
}

/// Reads at most `row_cap` rows whatever limit the statement text carries.
fn read_table(conn: &Connection, sql: &str, row_cap: usize) -> rusqlite::Result<TabularResult> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();
    let mut rows = stmt.query([])?;
    let mut table = TabularResult {
        columns,
        rows: Vec::new(),
    };
    while table.rows.len() < row_cap {
        let Some(row) = rows.next()? else {
            break;
        };
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(value_to_text(row.get_ref(i)?));
        }
        table.rows.push(values);
    }
    Ok(table)
}

fn value_to_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Some(format!("<{} bytes>", b.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::{CandidateQuery, SqlDialect, SqlExtraction};
    use tempfile::TempDir;

    fn fixture() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE Orders (Id INTEGER PRIMARY KEY, CreatedUtc TEXT NOT NULL, Total REAL, Note TEXT);
             INSERT INTO Orders VALUES (1, '2024-01-01', 10.5, NULL);
             INSERT INTO Orders VALUES (2, '2024-01-02', 20.0, 'rush');
             INSERT INTO Orders VALUES (3, '2024-01-03', 7.25, NULL);",
        )
        .unwrap();
        (dir, path)
    }

    fn validated(sql: &str) -> ValidatedQuery {
        CandidateQuery::new(sql, 200, SqlExtraction::Extracted)
            .validate(SqlDialect::Sqlite)
            .unwrap()
    }

    #[tokio::test]
    async fn test_execute_reads_rows_and_nulls() {
        let (_dir, path) = fixture();
        let executor = SqliteExecutor::new(&path);
        let table = executor
            .execute(&validated("SELECT Id, Note FROM Orders ORDER BY Id;"), QueryDeadlines::default())
            .await
            .unwrap();
        assert_eq!(table.columns, vec!["Id", "Note"]);
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.rows[0], vec![Some("1".to_string()), None]);
        assert_eq!(table.rows[1][1].as_deref(), Some("rush"));
    }

    #[tokio::test]
    async fn test_row_cap_holds_when_limit_text_is_misleading() {
        let (_dir, path) = fixture();
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE Bulk (Id INTEGER PRIMARY KEY, Note TEXT NOT NULL);
             WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 300)
             INSERT INTO Bulk SELECT i, 'x' FROM n;",
        )
        .unwrap();
        drop(conn);

        // the literal satisfies the LIMIT check, so no clause is appended
        let query = validated("SELECT Id FROM Bulk WHERE Note <> 'limit 1';");
        assert!(!query.sql().to_uppercase().ends_with("LIMIT 200;"));

        let table = SqliteExecutor::new(&path)
            .execute(&query, QueryDeadlines::default())
            .await
            .unwrap();
        assert_eq!(table.row_count(), 200);
    }

    #[tokio::test]
    async fn test_connection_is_read_only() {
        let (_dir, path) = fixture();
        let executor = SqliteExecutor::new(&path);
        let result = executor
            .run(QueryDeadlines::default(), |conn| conn.execute("DELETE FROM Orders", []))
            .await;
        assert!(matches!(result, Err(GatewayError::Database { .. })));
    }

    #[tokio::test]
    async fn test_ping_checks_file() {
        let (_dir, path) = fixture();
        SqliteExecutor::new(&path).ping(Duration::from_secs(6)).await.unwrap();

        let missing = SqliteExecutor::new(path.with_file_name("absent.db"));
        assert!(matches!(
            missing.ping(Duration::from_secs(6)).await,
            Err(GatewayError::Database { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_database_error() {
        let dir = tempfile::tempdir().unwrap();
        let executor = SqliteExecutor::new(dir.path().join("absent.db"));
        let result = executor
            .execute(&validated("SELECT 1;"), QueryDeadlines::default())
            .await;
        match result {
            Err(GatewayError::Database { code, .. }) => assert_eq!(code & 0xff, 14),
            other => panic!("expected CANTOPEN, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_phase_timeout() {
        let (_dir, path) = fixture();
        let locker = Connection::open(&path).unwrap();
        locker.execute_batch("BEGIN EXCLUSIVE;").unwrap();

        let executor = SqliteExecutor::new(&path);
        let deadlines = QueryDeadlines::new(Duration::from_millis(100), Duration::from_secs(5));
        let started = std::time::Instant::now();
        let result = executor.execute(&validated("SELECT * FROM Orders;"), deadlines).await;

        match result {
            Err(GatewayError::Timeout { phase, .. }) => assert_eq!(phase, TimeoutPhase::Connect),
            other => panic!("expected connect timeout, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(2));
        locker.execute_batch("ROLLBACK;").unwrap();
    }

    #[tokio::test]
    async fn test_command_phase_timeout_interrupts() {
        let (_dir, path) = fixture();
        let executor = SqliteExecutor::new(&path);
        let deadlines = QueryDeadlines::new(Duration::from_secs(5), Duration::from_millis(100));
        let endless = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) FROM c";
        let result = executor
            .run(deadlines, move |conn| read_table(conn, endless, usize::MAX))
            .await;
        match result {
            Err(GatewayError::Timeout { phase, .. }) => assert_eq!(phase, TimeoutPhase::Command),
            other => panic!("expected command timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_introspect_lists_columns_in_order() {
        let (_dir, path) = fixture();
        let executor = SqliteExecutor::new(&path);
        let snapshot = executor.introspect(QueryDeadlines::default(), 50).await.unwrap();
        let orders = snapshot.tables.iter().find(|t| t.name == "[main].[Orders]").unwrap();
        let names: Vec<&str> = orders.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Id", "CreatedUtc", "Total", "Note"]);
        assert_eq!(orders.columns[0].data_type, "INTEGER");
    }

    #[test]
    fn test_from_url_variants() {
        assert_eq!(SqliteExecutor::from_url("sqlite://data/a.db").unwrap().path(), Path::new("data/a.db"));
        assert_eq!(SqliteExecutor::from_url("sqlite:b.db").unwrap().path(), Path::new("b.db"));
        assert!(matches!(SqliteExecutor::from_url("  "), Err(GatewayError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_deadlines_capped_by_outer() {
        let base = QueryDeadlines::new(Duration::from_secs(20), Duration::from_secs(60));
        let capped = base.within(Some(Instant::now() + Duration::from_secs(30)));
        assert_eq!(capped.connect, Duration::from_secs(20));
        assert!(capped.command <= Duration::from_secs(30));
        assert_eq!(base.within(None), base);
    }
}
