//! Schema description handed to the translator.
//!
//! Either the text of a configured schema file, or a snapshot read from the
//! database catalog and rendered as Markdown. Catalog snapshots can be kept
//! in a TTL cache keyed by the executor's source id.

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::GatewayResult;
use crate::sql::executor::{QueryDeadlines, QueryExecutor};

/// Catalog rows read per introspection.
pub const MAX_SCHEMA_COLUMNS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Qualified name, e.g. `[main].[Orders]`.
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

/// Ordered table → columns mapping, in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub tables: Vec<TableSchema>,
}

impl SchemaSnapshot {
    pub fn push_column(&mut self, table: &str, column: ColumnInfo) {
        match self.tables.iter_mut().find(|t| t.name == table) {
            Some(existing) => existing.columns.push(column),
            None => self.tables.push(TableSchema {
                name: table.to_string(),
                columns: vec![column],
            }),
        }
    }

    pub fn to_prompt_text(&self) -> String {
        let mut text = String::from("# Database Schema (partial)\n");
        for table in &self.tables {
            text.push_str(&format!("## {}\n", table.name));
            for column in &table.columns {
                text.push_str(&format!("- {} ({})\n", column.name, column.data_type));
            }
        }
        text
    }
}

pub struct SchemaIntrospector {
    executor: Arc<dyn QueryExecutor>,
    schema_path: Option<PathBuf>,
    cache: Option<Cache<String, Arc<String>>>,
}

impl SchemaIntrospector {
    pub fn new(executor: Arc<dyn QueryExecutor>, schema_path: Option<PathBuf>) -> Self {
        Self {
            executor,
            schema_path,
            cache: None,
        }
    }

    /// Keep catalog descriptions for `ttl`. A zero TTL leaves caching off.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        if !ttl.is_zero() {
            self.cache = Some(Cache::builder().max_capacity(64).time_to_live(ttl).build());
        }
        self
    }

    pub async fn describe(&self, deadlines: QueryDeadlines) -> GatewayResult<String> {
        if let Some(path) = &self.schema_path {
            if path.is_file() {
                match tokio::fs::read_to_string(path).await {
                    Ok(text) => {
                        debug!("Using schema description from {}", path.display());
                        return Ok(text);
                    }
                    Err(e) => debug!("Schema file {} unreadable ({}), introspecting", path.display(), e),
                }
            }
        }

        let key = self.executor.source_id();
        if let Some(cache) = &self.cache {
            if let Some(text) = cache.get(&key).await {
                debug!("Schema cache hit for {}", key);
                return Ok(text.as_ref().clone());
            }
        }

        let snapshot = self.executor.introspect(deadlines, MAX_SCHEMA_COLUMNS).await?;
        info!("Introspected {} tables from {}", snapshot.tables.len(), key);
        let text = snapshot.to_prompt_text();
        if let Some(cache) = &self.cache {
            cache.insert(key, Arc::new(text.clone())).await;
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::executor::TabularResult;
    use crate::sql::ValidatedQuery;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCatalog {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QueryExecutor for CountingCatalog {
        async fn execute(&self, _: &ValidatedQuery, _: QueryDeadlines) -> GatewayResult<TabularResult> {
            Ok(TabularResult::default())
        }

        async fn introspect(&self, _: QueryDeadlines, _: usize) -> GatewayResult<SchemaSnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut snapshot = SchemaSnapshot::default();
            snapshot.push_column(
                "[main].[Orders]",
                ColumnInfo { name: "Id".into(), data_type: "INTEGER".into() },
            );
            snapshot.push_column(
                "[main].[Orders]",
                ColumnInfo { name: "Total".into(), data_type: "REAL".into() },
            );
            Ok(snapshot)
        }

        fn source_id(&self) -> String {
            "test://catalog".to_string()
        }
    }

    #[test]
    fn test_prompt_text_layout() {
        let mut snapshot = SchemaSnapshot::default();
        snapshot.push_column("[main].[A]", ColumnInfo { name: "x".into(), data_type: "TEXT".into() });
        snapshot.push_column("[main].[B]", ColumnInfo { name: "y".into(), data_type: "INT".into() });
        snapshot.push_column("[main].[A]", ColumnInfo { name: "z".into(), data_type: "REAL".into() });
        assert_eq!(
            snapshot.to_prompt_text(),
            "# Database Schema (partial)\n## [main].[A]\n- x (TEXT)\n- z (REAL)\n## [main].[B]\n- y (INT)\n"
        );
    }

    #[tokio::test]
    async fn test_schema_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.md");
        std::fs::write(&path, "Orders(Id, CreatedUtc, Total)").unwrap();
        let catalog = Arc::new(CountingCatalog { calls: AtomicUsize::new(0) });
        let introspector = SchemaIntrospector::new(catalog.clone(), Some(path));
        let text = introspector.describe(QueryDeadlines::default()).await.unwrap();
        assert_eq!(text, "Orders(Id, CreatedUtc, Total)");
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rebuilt_per_call_without_cache() {
        let catalog = Arc::new(CountingCatalog { calls: AtomicUsize::new(0) });
        let introspector = SchemaIntrospector::new(catalog.clone(), None);
        introspector.describe(QueryDeadlines::default()).await.unwrap();
        introspector.describe(QueryDeadlines::default()).await.unwrap();
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_reuses_description() {
        let catalog = Arc::new(CountingCatalog { calls: AtomicUsize::new(0) });
        let introspector =
            SchemaIntrospector::new(catalog.clone(), None).with_cache_ttl(Duration::from_secs(60));
        let first = introspector.describe(QueryDeadlines::default()).await.unwrap();
        let second = introspector.describe(QueryDeadlines::default()).await.unwrap();
        assert_eq!(first, second);
        assert!(first.contains("- Total (REAL)"));
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 1);
    }
}
