//! SQL execution on the worker
//!
//! The worker holds one long-lived DataFusion session. Files named in a query
//! through `read_csv('...')` and friends are registered as tables the first
//! time they are seen and stay registered for the life of the process.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use datafusion::prelude::{CsvReadOptions, NdJsonReadOptions, ParquetReadOptions, SessionContext};
use query_flight::QueryOutput;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, WorkerError};
use crate::sources::{find_sources, rewrite, table_name_for, SourceFormat};

/// A SQL engine the worker can serve queries from
#[async_trait]
pub trait SqlEngine: Send + Sync {
    /// Run `sql` to completion and collect the result
    async fn execute(&self, sql: &str) -> Result<QueryOutput>;

    /// Register the file at `path` as table `name`, format taken from the extension
    async fn register_table(&self, name: &str, path: &str) -> Result<()>;
}

/// Tables created from file paths
#[derive(Default)]
struct SourceCatalog {
    /// Path as written in the query -> table name
    by_path: HashMap<String, String>,
    names: HashSet<String>,
}

/// DataFusion-backed engine
pub struct DataFusionEngine {
    ctx: SessionContext,
    sources: Mutex<SourceCatalog>,
}

impl DataFusionEngine {
    pub fn new() -> Self {
        Self::with_context(SessionContext::new())
    }

    /// Wrap an existing session, e.g. one with custom configuration
    pub fn with_context(ctx: SessionContext) -> Self {
        Self {
            ctx,
            sources: Mutex::new(SourceCatalog::default()),
        }
    }

    /// The underlying session
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    async fn register_file(&self, name: &str, path: &str, format: SourceFormat) -> Result<()> {
        // Single files are filtered by extension, so pass the real one
        let extension = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();

        let registered = match format {
            SourceFormat::Csv => {
                let options = CsvReadOptions {
                    file_extension: &extension,
                    ..CsvReadOptions::default()
                };
                self.ctx.register_csv(name, path, options).await
            }
            SourceFormat::Parquet => {
                let options = ParquetReadOptions {
                    file_extension: &extension,
                    ..ParquetReadOptions::default()
                };
                self.ctx.register_parquet(name, path, options).await
            }
            SourceFormat::Json => {
                let options = NdJsonReadOptions {
                    file_extension: &extension,
                    ..NdJsonReadOptions::default()
                };
                self.ctx.register_json(name, path, options).await
            }
        };

        registered.map_err(|e| WorkerError::Registration {
            name: name.to_string(),
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Register the files a query refers to and rewrite it to use table names
    ///
    /// Paths that do not exist or fail to register are left in place, so the
    /// engine reports the problem when it plans the query.
    async fn resolve_sources(&self, sql: &str) -> String {
        let references = find_sources(sql);
        if references.is_empty() {
            return sql.to_string();
        }

        let mut catalog = self.sources.lock().await;
        let mut replacements = Vec::with_capacity(references.len());

        for source in references {
            if let Some(name) = catalog.by_path.get(&source.path) {
                replacements.push((source.span, name.clone()));
                continue;
            }

            if !Path::new(&source.path).exists() {
                warn!("Data source not found: {}", source.path);
                continue;
            }

            let name = table_name_for(&source.path, |candidate| catalog.names.contains(candidate));
            match self.register_file(&name, &source.path, source.format).await {
                Ok(()) => {
                    info!("Registered {} as table {}", source.path, name);
                    catalog.by_path.insert(source.path.clone(), name.clone());
                    catalog.names.insert(name.clone());
                    replacements.push((source.span, name));
                }
                Err(e) => warn!("{}", e),
            }
        }

        rewrite(sql, &replacements)
    }

    async fn run(&self, sql: &str) -> Result<QueryOutput> {
        let df = self.ctx.sql(sql).await?;
        let schema = df.schema().inner().clone();
        let batches = df.collect().await?;
        Ok(QueryOutput::new(schema, batches))
    }
}

impl Default for DataFusionEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SqlEngine for DataFusionEngine {
    async fn execute(&self, sql: &str) -> Result<QueryOutput> {
        let start = Instant::now();
        let resolved = self.resolve_sources(sql).await;
        if resolved != sql {
            debug!("Rewrote query to: {}", resolved);
        }

        match self.run(&resolved).await {
            Ok(output) => {
                info!(
                    "Query returned {} rows, {} columns in {:?}",
                    output.total_rows,
                    output.num_columns(),
                    start.elapsed()
                );
                Ok(output)
            }
            Err(e) => {
                warn!("Query failed after {:?}: {}", start.elapsed(), e);
                Err(e)
            }
        }
    }

    async fn register_table(&self, name: &str, path: &str) -> Result<()> {
        let format = SourceFormat::from_path(path)?;
        let mut catalog = self.sources.lock().await;

        self.register_file(name, path, format).await?;
        catalog.by_path.insert(path.to_string(), name.to_string());
        catalog.names.insert(name.to_string());
        info!("Registered {} as table {}", path, name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int64Array};
    use std::io::Write;

    fn write_csv(dir: &tempfile::TempDir, name: &str, contents: &str) -> String {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path.to_str().unwrap().to_string()
    }

    fn sum_column(output: &QueryOutput, column: usize) -> i64 {
        output
            .batches
            .iter()
            .map(|b| {
                let values = b.column(column).as_any().downcast_ref::<Int64Array>().unwrap();
                (0..values.len()).map(|i| values.value(i)).sum::<i64>()
            })
            .sum()
    }

    #[tokio::test]
    async fn test_select_literal() {
        let engine = DataFusionEngine::new();
        let output = engine.execute("SELECT 1 AS one").await.unwrap();
        assert_eq!(output.total_rows, 1);
        assert_eq!(output.num_columns(), 1);
        assert_eq!(output.schema.field(0).name(), "one");
    }

    #[tokio::test]
    async fn test_read_csv_registers_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "sales.csv", "id,amount\n1,10\n2,20\n3,30\n");
        let engine = DataFusionEngine::new();

        let sql = format!("SELECT SUM(amount) AS total FROM read_csv('{}')", path);
        let output = engine.execute(&sql).await.unwrap();
        assert_eq!(output.total_rows, 1);
        assert_eq!(sum_column(&output, 0), 60);

        // Second reference reuses the table, and it is visible by name too
        let output = engine
            .execute(&format!("SELECT COUNT(*) FROM read_csv('{}')", path))
            .await
            .unwrap();
        assert_eq!(output.total_rows, 1);
        let output = engine.execute("SELECT id FROM sales WHERE amount > 15").await.unwrap();
        assert_eq!(output.total_rows, 2);

        let catalog = engine.sources.lock().await;
        assert_eq!(catalog.by_path.len(), 1);
        assert_eq!(catalog.by_path.get(&path).map(String::as_str), Some("sales"));
    }

    #[tokio::test]
    async fn test_same_stem_gets_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("other")).unwrap();
        let first = write_csv(&dir, "data.csv", "x\n1\n");
        let second = write_csv(&dir, "other/data.csv", "x\n2\n3\n");
        let engine = DataFusionEngine::new();

        let output = engine
            .execute(&format!(
                "SELECT x FROM read_csv('{}') UNION ALL SELECT x FROM read_csv('{}')",
                first, second
            ))
            .await
            .unwrap();
        assert_eq!(output.total_rows, 3);

        let catalog = engine.sources.lock().await;
        assert!(catalog.names.contains("data"));
        assert!(catalog.names.contains("data_2"));
    }

    #[tokio::test]
    async fn test_missing_file_fails_in_engine() {
        let engine = DataFusionEngine::new();
        let err = engine
            .execute("SELECT * FROM read_csv('/definitely/not/here.csv')")
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Engine(_)));
        assert!(engine.sources.lock().await.by_path.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_table() {
        let engine = DataFusionEngine::new();
        let err = engine.execute("SELECT * FROM nowhere").await.unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }

    #[tokio::test]
    async fn test_register_table_preload() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(&dir, "events.csv", "kind\na\nb\n");
        let engine = DataFusionEngine::new();

        engine.register_table("ev", &path).await.unwrap();
        let output = engine.execute("SELECT kind FROM ev").await.unwrap();
        assert_eq!(output.total_rows, 2);

        assert!(matches!(
            engine.register_table("bad", "/tmp/file.xlsx").await,
            Err(WorkerError::UnsupportedFormat(_))
        ));
    }
}
