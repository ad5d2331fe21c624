//! Process-wide state: one [`DatabaseQueueManager`] and
//! one [`AuthService`] per enabled database, built in the fixed order
//! engines → pools → queues → auth.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hydrogen_auth::{AuthConfig, AuthService};
use hydrogen_config::{AppConfig, DatabaseConfig, EngineType};
use hydrogen_connectors::{build_adapter, ConnectionParams, Engine};
use hydrogen_dqm::{DatabaseQueueManager, SpawnPolicy};
use hydrogen_errors::Error;
use hydrogen_migrations::{MigrationOptions, Migrator};
use hydrogen_pool::Pool;
use hydrogen_qtc::Qtc;

pub struct Context {
    pub config: AppConfig,
    pub dqms: HashMap<String, Arc<DatabaseQueueManager>>,
    pub auth: HashMap<String, Arc<AuthService>>,
    pub hmac_secret: Vec<u8>,
}

fn engine_of(ty: EngineType) -> Engine {
    match ty {
        EngineType::Postgresql => Engine::Postgres,
        EngineType::Mysql => Engine::MySql,
        EngineType::Sqlite => Engine::Sqlite,
        EngineType::Db2 => Engine::Db2,
    }
}

fn connection_params_of(db: &DatabaseConfig) -> ConnectionParams {
    let get = |key: &str| db.connection_params.get(key).cloned();
    ConnectionParams {
        host: get("host"),
        port: get("port").and_then(|p| p.parse().ok()),
        user: get("user"),
        password: get("password"),
        database: get("name").or_else(|| Some(db.name.clone())),
        path: get("path"),
        dsn: get("dsn"),
    }
}

/// `PAYLOAD:x` -> `PAYLOAD:x_reverse`, `PATH:dir` -> `PATH:dir/reverse`.
/// Only consulted when `test_migration` is set.
fn reverse_spec_of(spec: &str) -> Option<String> {
    if let Some(name) = spec.strip_prefix("PAYLOAD:") {
        return Some(format!("PAYLOAD:{name}_reverse"));
    }
    spec.strip_prefix("PATH:").map(|dir| format!("PATH:{dir}/reverse"))
}

impl Context {
    pub async fn bootstrap(config: AppConfig) -> Result<Self, Error> {
        let hmac_secret = config.auth.hmac_secret.clone().into_bytes();
        let mut dqms = HashMap::new();
        let mut auth = HashMap::new();

        for db in config.databases.iter().filter(|d| d.enabled) {
            match Self::bring_up_database(db, &config).await {
                Ok((dqm, svc)) => {
                    dqms.insert(db.name.clone(), dqm);
                    auth.insert(db.name.clone(), svc);
                }
                Err(err) => {
                    // Migration/connect failure is fatal to that
                    // database only, never to the process.
                    tracing::error!(database = %db.name, error = %err, "database did not come up, skipping");
                }
            }
        }

        Ok(Self { config, dqms, auth, hmac_secret })
    }

    async fn bring_up_database(
        db: &DatabaseConfig,
        config: &AppConfig,
    ) -> Result<(Arc<DatabaseQueueManager>, Arc<AuthService>), Error> {
        let adapter = build_adapter(engine_of(db.engine), connection_params_of(db))?;
        let pool = Arc::new(Pool::new(
            db.name.clone(),
            adapter,
            db.pool.max_size,
            Duration::from_secs(db.pool.idle_health_check_secs),
        ));

        if let Some(spec) = &db.migrations {
            let migrator = Migrator::new(pool.clone());
            let options = MigrationOptions { auto_migration: db.auto_migration, test_migration: db.test_migration };
            let reverse_spec = reverse_spec_of(spec);
            let applied = migrator.run(spec, reverse_spec.as_deref(), options).await.map_err(|e| {
                if e.partial_apply {
                    tracing::error!(database = %db.name, error = %e.error, "migration failed with statements already committed, database is in an indeterminate state");
                }
                Error::from(e)
            })?;
            if !applied.is_empty() {
                tracing::info!(database = %db.name, count = applied.len(), "applied migrations");
            }
        }

        let qtc = Arc::new(Qtc::new());
        let dqm = Arc::new(DatabaseQueueManager::new(db.name.clone(), pool, qtc, SpawnPolicy::default()));

        let mut auth_config = AuthConfig::new(config.auth.hmac_secret.clone().into_bytes());
        auth_config.jwt_lifetime_seconds = config.auth.jwt_lifetime_seconds as i64;
        auth_config.rate_limit = hydrogen_auth::RateLimitConfig {
            window_secs: config.auth.rate_limit_window as i64,
            max_attempts: config.auth.max_attempts,
            block_secs: config.auth.rate_limit_window as i64,
        };
        let auth_service = Arc::new(AuthService::new(dqm.clone(), auth_config));
        auth_service.bootstrap().await?;

        Ok((dqm, auth_service))
    }
}
