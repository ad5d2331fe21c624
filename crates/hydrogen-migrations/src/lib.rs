//! Migration Engine: LOAD (Lua script -> SQL batch) then APPLY
//! (transactional execute).

mod apply;
mod discovery;
mod log;
mod lua;

pub use apply::ApplyError;
pub use discovery::{discover, AssetStore, MigrationFile, Source};
pub use log::{Direction, LogEntry};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use hydrogen_errors::Error;
use hydrogen_pool::Pool;

/// A migration after phase LOAD: its ordinal, source file name, and the
/// resolved SQL batch (macros not yet substituted — that happens per
/// dialect at APPLY time).
#[derive(Debug, Clone)]
pub struct LoadedMigration {
    pub ordinal: u32,
    pub name: String,
    pub sql: String,
}

/// `AutoMigration`/`TestMigration` knobs recognized from config.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrationOptions {
    pub auto_migration: bool,
    pub test_migration: bool,
}

/// Drives LOAD then APPLY for one database's migrations, against a
/// Lead-owned connection leased from its pool.
pub struct Migrator {
    pool: Arc<Pool>,
    assets: Option<Arc<dyn AssetStore>>,
}

impl Migrator {
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool, assets: None }
    }

    pub fn with_assets(mut self, assets: Arc<dyn AssetStore>) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Phase LOAD: discovers migration files from `source_spec` and
    /// evaluates each script, without touching the database.
    pub fn load(&self, source_spec: &str) -> Result<Vec<LoadedMigration>, Error> {
        let source = Source::parse(source_spec)?;
        let files = discover(&source, self.assets.as_deref())?;
        files
            .into_iter()
            .map(|file| {
                let sql = lua::load_sql(&file.name, &file.contents)?;
                Ok(LoadedMigration { ordinal: file.ordinal, name: file.name, sql })
            })
            .collect()
    }

    /// Phase APPLY (forward): skips ids already recorded in
    /// `migrations_log`, applies the rest in ascending ordinal order, and
    /// records each success. A failure halts all subsequent migrations and
    /// leaves the database as the failed migration's own rollback left it
    /// (`ApplyError::partial_apply` reports whether that rollback was
    /// actually complete — DB2 can't guarantee it).
    pub async fn apply_forward(&self, loaded: &[LoadedMigration]) -> Result<Vec<u32>, ApplyError> {
        let adapter = self.pool.adapter();
        let mut handle = self.pool.acquire(Duration::from_secs(30)).await?;

        let result = async {
            log::ensure_table(adapter.as_ref(), &mut handle).await?;
            let already_applied = log::forward_ids(adapter.as_ref(), &mut handle).await?;
            let mut newly_applied = Vec::new();

            for migration in loaded {
                if already_applied.contains(&migration.ordinal) {
                    continue;
                }
                apply::apply_migration(adapter.as_ref(), &mut handle, self.pool.engine, migration).await?;
                log::append(adapter.as_ref(), &mut handle, migration.ordinal, &migration.name, log::Direction::Forward, Utc::now())
                    .await?;
                newly_applied.push(migration.ordinal);
            }
            Ok(newly_applied)
        }
        .await;

        self.pool.release(handle).await;
        result
    }

    /// Phase APPLY (reverse), used by the `TestMigration` knob to exercise
    /// rollback in CI immediately after a forward run. `loaded` is expected
    /// to be the down-migrations counterpart, applied in descending
    /// ordinal order; it is not checked against `migrations_log`.
    pub async fn apply_reverse(&self, loaded: &[LoadedMigration]) -> Result<Vec<u32>, ApplyError> {
        let adapter = self.pool.adapter();
        let mut handle = self.pool.acquire(Duration::from_secs(30)).await?;

        let mut ordered: Vec<&LoadedMigration> = loaded.iter().collect();
        ordered.sort_by(|a, b| b.ordinal.cmp(&a.ordinal));

        let result = async {
            let mut reversed = Vec::new();
            for migration in ordered {
                apply::apply_migration(adapter.as_ref(), &mut handle, self.pool.engine, migration).await?;
                log::append(adapter.as_ref(), &mut handle, migration.ordinal, &migration.name, log::Direction::Reverse, Utc::now())
                    .await?;
                reversed.push(migration.ordinal);
            }
            Ok(reversed)
        }
        .await;

        self.pool.release(handle).await;
        result
    }

    /// Runs LOAD then APPLY for `source_spec`, honoring `AutoMigration`; if
    /// `TestMigration` is set, also loads and applies `reverse_source_spec`
    /// immediately afterward.
    pub async fn run(
        &self,
        source_spec: &str,
        reverse_source_spec: Option<&str>,
        options: MigrationOptions,
    ) -> Result<Vec<u32>, ApplyError> {
        if !options.auto_migration {
            return Ok(Vec::new());
        }

        let loaded = self.load(source_spec)?;
        let applied = self.apply_forward(&loaded).await?;

        if options.test_migration {
            if let Some(reverse_spec) = reverse_source_spec {
                let reverse_loaded = self.load(reverse_spec)?;
                self.apply_reverse(&reverse_loaded).await?;
            }
        }

        Ok(applied)
    }

    /// The `migrations status` supplemental query: full apply history.
    pub async fn status(&self) -> Result<Vec<LogEntry>, Error> {
        let adapter = self.pool.adapter();
        let mut handle = self.pool.acquire(Duration::from_secs(30)).await?;
        let entries = log::status(adapter.as_ref(), &mut handle).await;
        self.pool.release(handle).await;
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydrogen_connectors::mock::{MockAdapter, MockDatabase};
    use hydrogen_connectors::EngineAdapter;

    fn migrator() -> Migrator {
        let db = Arc::new(MockDatabase::default());
        let adapter: Arc<dyn EngineAdapter> = Arc::new(MockAdapter::new(db));
        let pool = Arc::new(Pool::new("test", adapter, 2, Duration::from_secs(30)));
        Migrator::new(pool)
    }

    fn migration(ordinal: u32, sql: &str) -> LoadedMigration {
        LoadedMigration { ordinal, name: format!("m_{ordinal}.lua"), sql: sql.to_string() }
    }

    #[tokio::test]
    async fn applies_migrations_in_order_and_records_them() {
        let migrator = migrator();
        let batch = vec![
            migration(1, "CREATE TABLE a (id INT)"),
            migration(2, "CREATE TABLE b (id INT)\n-- QUERY DELIMITER\nCREATE TABLE c (id INT)"),
        ];
        let applied = migrator.apply_forward(&batch).await.unwrap();
        assert_eq!(applied, vec![1, 2]);

        let status = migrator.status().await.unwrap();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].id, 2); // newest first
    }

    #[tokio::test]
    async fn skips_already_applied_ids() {
        let migrator = migrator();
        let batch = vec![migration(1, "CREATE TABLE a (id INT)")];
        migrator.apply_forward(&batch).await.unwrap();

        let second_run = migrator.apply_forward(&batch).await.unwrap();
        assert!(second_run.is_empty());
    }

    #[tokio::test]
    async fn halts_on_failed_statement() {
        let migrator = migrator();
        let batch = vec![
            migration(1, "CREATE TABLE a (id INT)\n-- QUERY DELIMITER\n__FAIL__"),
            migration(2, "CREATE TABLE b (id INT)"),
        ];
        let err = migrator.apply_forward(&batch).await.unwrap_err();
        assert!(err.to_string().contains("m_1.lua"));

        let status = migrator.status().await.unwrap();
        assert!(status.is_empty(), "migration 1 must not be recorded, and migration 2 must not run");
    }
}
