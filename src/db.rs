use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

use crate::config::{ImportConfig, TableNames};
use crate::error::ImportError;

/// Shared state handed to every schema, resolver and importer call.
///
/// Built once by the host; holds the pool, the resolved table names and the
/// batch settings so nothing has to be looked up from globals.
#[derive(Debug, Clone)]
pub struct ImportContext {
    pub pool: PgPool,
    pub tables: TableNames,
    pub config: ImportConfig,
}

impl ImportContext {
    pub fn new(pool: PgPool, config: ImportConfig) -> Result<Self, ImportError> {
        let tables = config.table_names()?;
        Ok(Self {
            pool,
            tables,
            config,
        })
    }

    /// Connect a fresh pool and build a context from it.
    pub async fn connect(database_url: &str, config: ImportConfig) -> Result<Self, ImportError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(database_url)
            .await?;
        Self::new(pool, config)
    }
}

/// Serialize imports that write the same table.
///
/// Takes a transaction-scoped advisory lock keyed on the table name; it is
/// released automatically on commit or rollback.
pub async fn lock_import(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
) -> Result<(), sqlx::Error> {
    log::debug!("waiting for import lock on {}", table);
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(table)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Savepoint wrapper for row-level writes inside an import transaction.
///
/// A failed statement poisons the whole PostgreSQL transaction unless it is
/// rolled back to a savepoint first.
pub struct RowSavepoint;

impl RowSavepoint {
    const NAME: &'static str = "import_row";

    pub async fn begin(tx: &mut Transaction<'_, Postgres>) -> Result<Self, sqlx::Error> {
        sqlx::query(&format!("SAVEPOINT {}", Self::NAME))
            .execute(&mut **tx)
            .await?;
        Ok(RowSavepoint)
    }

    pub async fn release(self, tx: &mut Transaction<'_, Postgres>) -> Result<(), sqlx::Error> {
        sqlx::query(&format!("RELEASE SAVEPOINT {}", Self::NAME))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn rollback(self, tx: &mut Transaction<'_, Postgres>) -> Result<(), sqlx::Error> {
        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {}", Self::NAME))
            .execute(&mut **tx)
            .await?;
        sqlx::query(&format!("RELEASE SAVEPOINT {}", Self::NAME))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}
