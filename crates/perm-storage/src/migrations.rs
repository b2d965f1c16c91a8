//! Schema migrations for the PostgreSQL backend.
//!
//! Migrations are an ordered list compiled into the binary. Applied versions
//! are recorded in [`MIGRATIONS_TABLE`] so a store can report whether its
//! schema is current before serving traffic.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use tracing::{debug, info, instrument};

use crate::error::{StorageError, StorageResult};

/// Table recording applied migrations.
pub const MIGRATIONS_TABLE: &str = "perm_migrations";

/// Advisory lock key serializing concurrent migration runs.
const MIGRATION_LOCK_KEY: i64 = 0x7065_726d;

/// A schema change identified by a monotonically increasing version.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i32,
    pub name: &'static str,
    pub statements: &'static [&'static str],
}

/// A migration recorded as applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: i32,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// All known migrations in application order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_roles",
        statements: &[r#"
            CREATE TABLE IF NOT EXISTS roles (
                id BIGSERIAL PRIMARY KEY,
                namespace TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                CONSTRAINT roles_namespace_name_key UNIQUE (namespace, name)
            )
            "#],
    },
    Migration {
        version: 2,
        name: "create_role_permissions",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS role_permissions (
                id BIGSERIAL PRIMARY KEY,
                role_id BIGINT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
                action TEXT NOT NULL,
                resource_pattern TEXT NOT NULL,
                resource_prefix TEXT NOT NULL,
                CONSTRAINT role_permissions_unique UNIQUE (role_id, action, resource_pattern)
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_role_permissions_action
            ON role_permissions (action, role_id)
            "#,
        ],
    },
    Migration {
        version: 3,
        name: "create_role_assignments",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS actor_role_assignments (
                role_id BIGINT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
                actor_id TEXT NOT NULL,
                actor_namespace TEXT NOT NULL,
                PRIMARY KEY (role_id, actor_id, actor_namespace)
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_actor_role_assignments_actor
            ON actor_role_assignments (actor_namespace, actor_id)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS group_role_assignments (
                role_id BIGINT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
                group_id TEXT NOT NULL,
                PRIMARY KEY (role_id, group_id)
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_group_role_assignments_group
            ON group_role_assignments (group_id)
            "#,
        ],
    },
];

/// SQLSTATE for a missing relation.
const UNDEFINED_TABLE: &str = "42P01";

/// Loads the applied migrations keyed by version. Returns an empty map when
/// the version table does not exist.
#[instrument(skip(pool))]
pub async fn retrieve_applied_migrations(
    pool: &PgPool,
) -> StorageResult<BTreeMap<i32, AppliedMigration>> {
    let query = format!("SELECT version, name, applied_at FROM {MIGRATIONS_TABLE}");
    let rows: Vec<(i32, String, DateTime<Utc>)> = match sqlx::query_as(&query).fetch_all(pool).await
    {
        Ok(rows) => rows,
        // A database that was never migrated has no version table yet.
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some(UNDEFINED_TABLE) => {
            return Ok(BTreeMap::new())
        }
        Err(e) => {
            return Err(crate::postgres::classify_sqlx_error(
                "retrieve applied migrations",
                e,
            ))
        }
    };

    Ok(rows
        .into_iter()
        .map(|(version, name, applied_at)| {
            (
                version,
                AppliedMigration {
                    version,
                    name,
                    applied_at,
                },
            )
        })
        .collect())
}

/// Returns the known migrations missing from `applied`.
pub fn pending_migrations(applied: &BTreeMap<i32, AppliedMigration>) -> Vec<&'static Migration> {
    MIGRATIONS
        .iter()
        .filter(|m| !applied.contains_key(&m.version))
        .collect()
}

/// Applies all pending migrations in a single transaction.
///
/// Concurrent runs are serialized with a transaction-scoped advisory lock.
#[instrument(skip(pool))]
pub async fn run_migrations(pool: &PgPool) -> StorageResult<()> {
    let map_err = |context: &'static str| {
        move |e: sqlx::Error| crate::postgres::classify_sqlx_error(context, e)
    };

    let mut tx = pool.begin().await.map_err(map_err("begin migration"))?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MIGRATION_LOCK_KEY)
        .execute(&mut *tx)
        .await
        .map_err(map_err("acquire migration lock"))?;

    let create_table = format!(
        "CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
        )"
    );
    sqlx::query(&create_table)
        .execute(&mut *tx)
        .await
        .map_err(map_err("create migrations table"))?;

    let select = format!("SELECT version FROM {MIGRATIONS_TABLE}");
    let applied: Vec<i32> = sqlx::query_scalar(&select)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_err("read applied migrations"))?;

    let insert = format!("INSERT INTO {MIGRATIONS_TABLE} (version, name) VALUES ($1, $2)");
    for migration in MIGRATIONS.iter().filter(|m| !applied.contains(&m.version)) {
        debug!(version = migration.version, name = migration.name, "Applying migration");
        for statement in migration.statements {
            sqlx::query(*statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| StorageError::QueryError {
                    message: format!("migration {} ({}) failed: {e}", migration.version, migration.name),
                })?;
        }
        sqlx::query(&insert)
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await
            .map_err(map_err("record migration"))?;
        info!(version = migration.version, name = migration.name, "Applied migration");
    }

    tx.commit().await.map_err(map_err("commit migrations"))?;
    Ok(())
}
