pub mod candidates;
pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod models;
pub mod schema;

pub use config::{ImportConfig, TableNames};
pub use db::ImportContext;
pub use error::ImportError;

use env_logger::Env;
use std::sync::Once;

static LOGGER: Once = Once::new();

/// Install the process-wide logger. `RUST_LOG` overrides the default filter.
pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(Env::default().default_filter_or("info,sqlx=warn")).init();
    });
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use sqlx::PgPool;

    pub use database::{TestDatabase, TestDatabaseError};

    /// Small query helpers for asserting on imported tables.
    pub struct TestFixtures<'a> {
        pool: &'a PgPool,
    }

    impl<'a> TestFixtures<'a> {
        pub fn new(pool: &'a PgPool) -> Self {
            Self { pool }
        }

        /// Number of rows currently in `table`.
        pub async fn row_count(&self, table: &str) -> Result<i64, sqlx::Error> {
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(self.pool)
                .await
        }

        /// Stored votes for one candidate in one precinct, if the result exists.
        pub async fn votes(
            &self,
            results_table: &str,
            candidates_table: &str,
            candidate_name: &str,
            precinct_number: &str,
        ) -> Result<Option<i32>, sqlx::Error> {
            sqlx::query_scalar(&format!(
                r#"SELECT r.votes FROM {results_table} r
                   JOIN {candidates_table} c ON c.id = r.candidate_id
                   WHERE c.candidate_name = $1 AND r.precinct_number = $2"#
            ))
            .bind(candidate_name)
            .bind(precinct_number)
            .fetch_optional(self.pool)
            .await
        }

        /// Insert a voter with only an id, for history tests.
        pub async fn insert_voter(
            &self,
            voters_table: &str,
            state_voter_id: &str,
        ) -> Result<(), sqlx::Error> {
            sqlx::query(&format!(
                "INSERT INTO {voters_table} (state_voter_id, import_date) VALUES ($1, NOW())"
            ))
            .bind(state_voter_id)
            .execute(self.pool)
            .await?;
            Ok(())
        }
    }

    pub mod database {
        use log::LevelFilter;
        use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use sqlx::{ConnectOptions, PgPool};
        use testcontainers::{ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner};
        use testcontainers_modules::postgres::Postgres as PostgresImage;
        use thiserror::Error;
        use tokio::runtime::Handle;
        use uuid::Uuid;

        use crate::config::ImportConfig;
        use crate::db::ImportContext;
        use crate::error::ImportError;
        use crate::schema::ensure_schema;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
            #[error("configuration error: {0}")]
            Config(#[from] ImportError),
            #[error("schema setup failed: {0:?}")]
            Schema(Vec<(String, String)>),
        }

        impl TestDatabaseError {
            /// True when no PostgreSQL server could be provided at all.
            pub fn is_unavailable(&self) -> bool {
                matches!(self, TestDatabaseError::Container(_))
            }
        }

        /// Ephemeral database for integration tests, with the import schema
        /// already created.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            context: ImportContext,
            admin_options: PgConnectOptions,
            database_name: String,
            // Stopped when the database handle is dropped.
            _container: Option<ContainerAsync<PostgresImage>>,
        }

        impl TestDatabase {
            /// Use `TEST_DATABASE_URL` when set, otherwise start a disposable
            /// Postgres container.
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                match std::env::var("TEST_DATABASE_URL") {
                    Ok(url) => Self::new(&url, None).await,
                    Err(_) => Self::new_with_container().await,
                }
            }

            async fn new_with_container() -> Result<Self, TestDatabaseError> {
                let container = PostgresImage::default().start().await?;

                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                Self::new(&admin_url, Some(container)).await
            }

            /// Provision a fresh database given a base connection string.
            async fn new(
                base_url: &str,
                container: Option<ContainerAsync<PostgresImage>>,
            ) -> Result<Self, TestDatabaseError> {
                let base_options: PgConnectOptions = base_url.parse()?;
                let base_options = base_options.log_statements(LevelFilter::Off);

                let base_name = base_options
                    .get_database()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "postgres".to_string());

                let admin_options = base_options.clone().database("postgres");
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await?;

                let new_db_name = format!("{}_{}", base_name, Uuid::new_v4().simple());
                let create_sql = format!("CREATE DATABASE \"{}\" TEMPLATE template0", new_db_name);
                sqlx::query(&create_sql).execute(&admin_pool).await?;
                admin_pool.close().await;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(base_options.clone().database(&new_db_name))
                    .await?;

                let context = ImportContext::new(pool.clone(), ImportConfig::default())?;
                let report = ensure_schema(&context).await;
                if !report.is_ok() {
                    return Err(TestDatabaseError::Schema(report.failed));
                }

                Ok(Self {
                    pool: Some(pool),
                    context,
                    admin_options,
                    database_name: new_db_name,
                    _container: container,
                })
            }

            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            /// Context with the default configuration and unprefixed tables.
            pub fn context(&self) -> &ImportContext {
                &self.context
            }

            /// Context over the same pool with a different configuration.
            pub fn context_with(&self, config: ImportConfig) -> Result<ImportContext, TestDatabaseError> {
                Ok(ImportContext::new(self.pool().clone(), config)?)
            }

            /// Close pool connections and drop the ephemeral database.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }

                drop_database_with_fallback(self.admin_options.clone(), &self.database_name)
                    .await?;
                Ok(())
            }
        }

        async fn drop_database_with_fallback(
            admin_options: PgConnectOptions,
            database_name: &str,
        ) -> Result<(), sqlx::Error> {
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options)
                .await?;

            let drop_force = format!("DROP DATABASE \"{}\" WITH (FORCE)", database_name);
            match sqlx::query(&drop_force).execute(&admin_pool).await {
                Ok(_) => Ok(()),
                Err(err) if force_drop_unsupported(&err) => {
                    let drop_sql = format!("DROP DATABASE \"{}\"", database_name);
                    sqlx::query(&drop_sql).execute(&admin_pool).await?;
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }

        /// `WITH (FORCE)` needs PostgreSQL 13; the container image is older.
        fn force_drop_unsupported(err: &sqlx::Error) -> bool {
            matches!(
                err,
                sqlx::Error::Database(db_err)
                    if db_err
                        .code()
                        .map(|code| code == "42601" || code == "0A000")
                        .unwrap_or(false)
            )
        }

        /// Tests that skip [`TestDatabase::close`] still get their database
        /// dropped, provided a runtime is around to do it.
        impl Drop for TestDatabase {
            fn drop(&mut self) {
                let (Some(pool), Ok(handle)) = (self.pool.take(), Handle::try_current()) else {
                    return;
                };
                let admin_options = self.admin_options.clone();
                let database_name = self.database_name.clone();
                handle.spawn(async move {
                    pool.close().await;
                    if let Err(e) = drop_database_with_fallback(admin_options, &database_name).await {
                        log::warn!("could not drop test database {}: {}", database_name, e);
                    }
                });
            }
        }
    }
}
