//! Phase APPLY: splits a loaded batch on the delimiter, substitutes
//! cross-dialect macros, and executes each statement transactionally.

use hydrogen_connectors::{substitute_hash_macros, AdapterError, ConnectionHandle, EngineAdapter, Engine, ParamBindings};
use hydrogen_errors::Error;

use crate::LoadedMigration;

const DELIMITER: &str = "-- QUERY DELIMITER";

fn statements(sql_batch: &str) -> Vec<&str> {
    sql_batch
        .split(DELIMITER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn failed(file: &str, idx: usize, e: &AdapterError) -> Error {
    Error::internal(format!("migration '{file}' failed at statement {idx}: {e}"))
}

/// The underlying failure plus whether it left the migration partially
/// applied. Always `false` for PG/MySQL/SQLite, which wrap the whole batch
/// in one transaction and roll back cleanly; DB2 commits per statement, so
/// a failure after the first successful statement in the batch leaves
/// those earlier statements committed with no way to undo them here.
#[derive(Debug)]
pub struct ApplyError {
    pub error: Error,
    pub partial_apply: bool,
}

impl std::fmt::Display for ApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.error, f)
    }
}

impl std::error::Error for ApplyError {}

impl From<ApplyError> for Error {
    fn from(e: ApplyError) -> Error {
        e.error
    }
}

impl From<Error> for ApplyError {
    fn from(error: Error) -> ApplyError {
        ApplyError { error, partial_apply: false }
    }
}

fn db2_error(file: &str, idx: usize, e: &AdapterError, partial_apply: bool) -> ApplyError {
    ApplyError { error: failed(file, idx, e), partial_apply }
}

/// Applies one migration's SQL batch on `handle`. PG/MySQL/SQLite wrap the
/// whole batch in one transaction; DB2 commits per statement (driver
/// limitation). Any failure rolls back what it can and reports the
/// offending statement index.
pub async fn apply_migration(
    adapter: &dyn EngineAdapter,
    handle: &mut ConnectionHandle,
    engine: Engine,
    migration: &LoadedMigration,
) -> Result<(), ApplyError> {
    let stmts = statements(&migration.sql);
    let empty_params = ParamBindings::new();

    if engine == Engine::Db2 {
        for (idx, stmt) in stmts.iter().enumerate() {
            let rendered = substitute_hash_macros(stmt, engine);
            adapter
                .begin(handle)
                .await
                .map_err(|e| db2_error(&migration.name, idx, &e, idx > 0))?;
            if let Err(e) = adapter.execute(handle, &rendered, &empty_params).await {
                let _ = adapter.rollback(handle).await;
                return Err(db2_error(&migration.name, idx, &e, idx > 0));
            }
            adapter
                .commit(handle)
                .await
                .map_err(|e| db2_error(&migration.name, idx, &e, true))?;
        }
        return Ok(());
    }

    adapter.begin(handle).await.map_err(|e| ApplyError { error: Error::from(e), partial_apply: false })?;
    for (idx, stmt) in stmts.iter().enumerate() {
        let rendered = substitute_hash_macros(stmt, engine);
        if let Err(e) = adapter.execute(handle, &rendered, &empty_params).await {
            let _ = adapter.rollback(handle).await;
            return Err(ApplyError { error: failed(&migration.name, idx, &e), partial_apply: false });
        }
    }
    adapter.commit(handle).await.map_err(|e| ApplyError { error: Error::from(e), partial_apply: false })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hydrogen_connectors::mock::{MockAdapter, MockDatabase};

    use super::*;

    #[test]
    fn splits_and_trims_statements() {
        let batch = "CREATE TABLE a (id INT)\n-- QUERY DELIMITER\n  CREATE TABLE b (id INT)  ";
        let stmts = statements(batch);
        assert_eq!(stmts, vec!["CREATE TABLE a (id INT)", "CREATE TABLE b (id INT)"]);
    }

    #[test]
    fn ignores_empty_segments() {
        let batch = "-- QUERY DELIMITER\nCREATE TABLE a (id INT)\n-- QUERY DELIMITER\n";
        assert_eq!(statements(batch), vec!["CREATE TABLE a (id INT)"]);
    }

    fn migration(sql: &str) -> LoadedMigration {
        LoadedMigration { ordinal: 1, name: "m.lua".to_string(), sql: sql.to_string() }
    }

    #[tokio::test]
    async fn db2_failure_after_a_committed_statement_is_partial() {
        let adapter = MockAdapter::new(Arc::new(MockDatabase::default()));
        let mut handle = adapter.connect().await.unwrap();
        let batch = migration("CREATE TABLE a (id INT)\n-- QUERY DELIMITER\n__FAIL__");

        let err = apply_migration(&adapter, &mut handle, Engine::Db2, &batch).await.unwrap_err();
        assert!(err.partial_apply, "the first statement already committed under DB2's per-statement commits");
    }

    #[tokio::test]
    async fn db2_failure_on_the_first_statement_is_not_partial() {
        let adapter = MockAdapter::new(Arc::new(MockDatabase::default()));
        let mut handle = adapter.connect().await.unwrap();
        let batch = migration("__FAIL__");

        let err = apply_migration(&adapter, &mut handle, Engine::Db2, &batch).await.unwrap_err();
        assert!(!err.partial_apply, "nothing in this migration committed before the first statement failed");
    }

    #[tokio::test]
    async fn non_db2_failure_is_never_partial() {
        let adapter = MockAdapter::new(Arc::new(MockDatabase::default()));
        let mut handle = adapter.connect().await.unwrap();
        let batch = migration("CREATE TABLE a (id INT)\n-- QUERY DELIMITER\n__FAIL__");

        let err = apply_migration(&adapter, &mut handle, Engine::Sqlite, &batch).await.unwrap_err();
        assert!(!err.partial_apply, "the whole batch rolls back in one transaction");
    }
}
