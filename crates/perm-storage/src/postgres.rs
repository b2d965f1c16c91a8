//! PostgreSQL storage implementation.
//!
//! Permission checks push the namespace, actor, groups, action and the
//! pattern's literal prefix down into a single join, then confirm wildcard
//! matches in-process with [`ResourcePattern::matches`].

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, instrument};

use crate::error::{StorageError, StorageResult};
use crate::migrations::{self, AppliedMigration};
use crate::model::{
    validate_identifier, Actor, Group, HasPermissionQuery, ListResourcePatternsQuery, Permission,
    Role, RoleKey,
};
use crate::pattern::ResourcePattern;
use crate::traits::{PermissionRepo, RoleRepo};

/// Default query timeout in seconds.
const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Maps a sqlx error onto the storage error taxonomy.
pub(crate) fn classify_sqlx_error(context: &str, err: sqlx::Error) -> StorageError {
    let message = format!("{context}: {err}");
    match &err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::ConnectionError { message },
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some("23505") => StorageError::AlreadyExists { message },
            Some("23503") => StorageError::NotFound { message },
            Some("23502") | Some("23514") | Some("22001") => StorageError::InvalidInput { message },
            // character_not_in_repertoire and untranslatable_character
            Some("22021") | Some("22P05") => StorageError::InvalidInput { message },
            // connection_exception and operator_intervention classes
            Some(code) if code.starts_with("08") || code.starts_with("57P") => {
                StorageError::ConnectionError { message }
            }
            _ => StorageError::QueryError { message },
        },
        _ => StorageError::QueryError { message },
    }
}

/// PostgreSQL configuration options.
#[derive(Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    pub min_connections: u32,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Default query timeout in seconds.
    ///
    /// A query exceeding this duration is dropped, cancelling the backend
    /// work, and reported as `StorageError::QueryTimeout`.
    pub query_timeout_secs: u64,
    /// Timeout for read operations in seconds. Falls back to `query_timeout_secs`.
    pub read_timeout_secs: Option<u64>,
    /// Timeout for write operations in seconds. Falls back to `query_timeout_secs`.
    pub write_timeout_secs: Option<u64>,
}

// Custom Debug implementation to hide credentials in database_url
impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("query_timeout_secs", &self.query_timeout_secs)
            .field("read_timeout_secs", &self.read_timeout_secs)
            .field("write_timeout_secs", &self.write_timeout_secs)
            .finish()
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/perm".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
            read_timeout_secs: None,
            write_timeout_secs: None,
        }
    }
}

/// PostgreSQL implementation of the store traits.
pub struct PostgresStore {
    pool: PgPool,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl PostgresStore {
    /// Creates a store from an existing pool with the default 30 second timeout.
    pub fn new(pool: PgPool) -> Self {
        Self::with_timeout(pool, Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS))
    }

    /// Creates a store using `query_timeout` for every operation.
    pub fn with_timeout(pool: PgPool, query_timeout: Duration) -> Self {
        Self {
            pool,
            read_timeout: query_timeout,
            write_timeout: query_timeout,
        }
    }

    /// Connects a new pool with the given configuration.
    #[instrument(skip(config))]
    pub async fn from_config(config: &PostgresConfig) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(|e| StorageError::ConnectionError {
                message: e.to_string(),
            })?;

        let default_timeout = Duration::from_secs(config.query_timeout_secs);
        Ok(Self {
            pool,
            read_timeout: config
                .read_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(default_timeout),
            write_timeout: config
                .write_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(default_timeout),
        })
    }

    /// Connects a new pool from a database URL with default settings.
    pub async fn from_url(database_url: &str) -> StorageResult<Self> {
        let config = PostgresConfig {
            database_url: database_url.to_string(),
            ..Default::default()
        };
        Self::from_config(&config).await
    }

    /// Returns the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies pending schema migrations.
    pub async fn run_migrations(&self) -> StorageResult<()> {
        self.execute_write("run_migrations", migrations::run_migrations(&self.pool))
            .await
    }

    /// Returns the applied migrations keyed by version.
    pub async fn retrieve_applied_migrations(
        &self,
    ) -> StorageResult<BTreeMap<i32, AppliedMigration>> {
        self.execute_read(
            "retrieve_applied_migrations",
            migrations::retrieve_applied_migrations(&self.pool),
        )
        .await
    }

    /// Fails with `NotReady` unless every known migration has been applied.
    #[instrument(skip(self))]
    pub async fn check_ready(&self) -> StorageResult<()> {
        let applied = self.retrieve_applied_migrations().await?;
        let pending = migrations::pending_migrations(&applied);
        if pending.is_empty() {
            debug!(applied = applied.len(), "Schema is current");
            return Ok(());
        }

        let names: Vec<_> = pending
            .iter()
            .map(|m| format!("{} ({})", m.version, m.name))
            .collect();
        Err(StorageError::NotReady {
            message: format!("pending migrations: {}", names.join(", ")),
        })
    }

    /// Wraps an async operation with a timeout and records metrics.
    ///
    /// # Metrics
    /// - `perm_storage_query_duration_seconds` - Histogram of query durations
    /// - `perm_storage_query_timeout_total` - Counter of timeout events
    async fn execute_with_timeout_and_metrics<T, F>(
        &self,
        operation: &str,
        timeout: Duration,
        future: F,
    ) -> StorageResult<T>
    where
        F: std::future::Future<Output = StorageResult<T>>,
    {
        let start = std::time::Instant::now();
        let result = tokio::time::timeout(timeout, future).await;
        let duration = start.elapsed().as_secs_f64();

        let (status, final_result) = match result {
            Ok(Ok(value)) => ("success", Ok(value)),
            Ok(Err(e)) => ("error", Err(e)),
            Err(_elapsed) => (
                "timeout",
                Err(StorageError::QueryTimeout {
                    operation: operation.to_string(),
                    timeout,
                }),
            ),
        };

        metrics::histogram!(
            "perm_storage_query_duration_seconds",
            "operation" => operation.to_string(),
            "backend" => "postgres",
            "status" => status
        )
        .record(duration);

        if status == "timeout" {
            metrics::counter!(
                "perm_storage_query_timeout_total",
                "operation" => operation.to_string(),
                "backend" => "postgres"
            )
            .increment(1);
        }

        final_result
    }

    async fn execute_read<T, F>(&self, operation: &str, future: F) -> StorageResult<T>
    where
        F: std::future::Future<Output = StorageResult<T>>,
    {
        self.execute_with_timeout_and_metrics(operation, self.read_timeout, future)
            .await
    }

    async fn execute_write<T, F>(&self, operation: &str, future: F) -> StorageResult<T>
    where
        F: std::future::Future<Output = StorageResult<T>>,
    {
        self.execute_with_timeout_and_metrics(operation, self.write_timeout, future)
            .await
    }
}

fn group_ids(groups: &[Group]) -> Vec<String> {
    groups.iter().map(|g| g.id.clone()).collect()
}

fn collect_permissions(rows: Vec<(Option<String>, Option<String>)>) -> Vec<Permission> {
    rows.into_iter()
        .filter_map(|(action, pattern)| Some(Permission::new(action?, pattern?)))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Roles in the actor's namespace reachable directly or through `$4` groups.
const REACHABLE_ROLE_FILTER: &str = r#"
    r.namespace = $1
    AND (
        EXISTS (
            SELECT 1 FROM actor_role_assignments a
            WHERE a.role_id = r.id AND a.actor_id = $3 AND a.actor_namespace = $1
        )
        OR EXISTS (
            SELECT 1 FROM group_role_assignments g
            WHERE g.role_id = r.id AND g.group_id = ANY($4)
        )
    )
"#;

#[async_trait]
impl PermissionRepo for PostgresStore {
    #[instrument(skip(self))]
    async fn has_permission(&self, query: &HasPermissionQuery) -> StorageResult<bool> {
        query.validate()?;

        let sql = format!(
            r#"
            SELECT DISTINCT p.resource_pattern
            FROM role_permissions p
            JOIN roles r ON r.id = p.role_id
            WHERE p.action = $2
              AND LEFT($5, LENGTH(p.resource_prefix)) = p.resource_prefix
              AND {REACHABLE_ROLE_FILTER}
            "#
        );
        let groups = group_ids(&query.groups);

        let candidates: Vec<String> = self
            .execute_read("has_permission", async {
                sqlx::query_scalar(&sql)
                    .bind(&query.actor.namespace)
                    .bind(&query.action)
                    .bind(&query.actor.id)
                    .bind(&groups)
                    .bind(&query.resource_id)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| classify_sqlx_error("has_permission", e))
            })
            .await?;

        let granted = candidates.iter().any(|raw| match ResourcePattern::parse(raw) {
            Ok(pattern) => pattern.matches(&query.resource_id),
            Err(_) => {
                tracing::warn!(pattern = %raw, "Skipping malformed stored resource pattern");
                false
            }
        });
        Ok(granted)
    }

    #[instrument(skip(self))]
    async fn list_resource_patterns(
        &self,
        query: &ListResourcePatternsQuery,
    ) -> StorageResult<Vec<String>> {
        query.validate()?;

        let sql = format!(
            r#"
            SELECT DISTINCT p.resource_pattern
            FROM role_permissions p
            JOIN roles r ON r.id = p.role_id
            WHERE p.action = $2
              AND {REACHABLE_ROLE_FILTER}
            "#
        );
        let groups = group_ids(&query.groups);

        let patterns: Vec<String> = self
            .execute_read("list_resource_patterns", async {
                sqlx::query_scalar(&sql)
                    .bind(&query.actor.namespace)
                    .bind(&query.action)
                    .bind(&query.actor.id)
                    .bind(&groups)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| classify_sqlx_error("list_resource_patterns", e))
            })
            .await?;

        // Byte order, independent of the database collation.
        Ok(patterns
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    #[instrument(skip(self))]
    async fn assign_permission(
        &self,
        role: &RoleKey,
        permission: Permission,
    ) -> StorageResult<()> {
        role.validate()?;
        let pattern = permission.validate()?;
        let prefix = pattern.literal_prefix();

        let role_id: Option<i64> = self
            .execute_write("assign_permission", async {
                sqlx::query_scalar(
                    r#"
                    WITH role AS (
                        SELECT id FROM roles WHERE namespace = $1 AND name = $2
                    ), inserted AS (
                        INSERT INTO role_permissions (role_id, action, resource_pattern, resource_prefix)
                        SELECT id, $3, $4, $5 FROM role
                        ON CONFLICT (role_id, action, resource_pattern) DO NOTHING
                    )
                    SELECT id FROM role
                    "#,
                )
                .bind(&role.namespace)
                .bind(&role.name)
                .bind(&permission.action)
                .bind(&permission.resource_pattern)
                .bind(&prefix)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| classify_sqlx_error("assign_permission", e))
            })
            .await?;

        role_id.map(|_| ()).ok_or_else(|| role.not_found())
    }

    #[instrument(skip(self))]
    async fn unassign_permission(
        &self,
        role: &RoleKey,
        permission: &Permission,
    ) -> StorageResult<()> {
        role.validate()?;

        let (role_id, deleted): (Option<i64>, i64) = self
            .execute_write("unassign_permission", async {
                sqlx::query_as(
                    r#"
                    WITH role AS (
                        SELECT id FROM roles WHERE namespace = $1 AND name = $2
                    ), deleted AS (
                        DELETE FROM role_permissions p
                        USING role
                        WHERE p.role_id = role.id AND p.action = $3 AND p.resource_pattern = $4
                        RETURNING p.id
                    )
                    SELECT (SELECT id FROM role), (SELECT COUNT(*) FROM deleted)
                    "#,
                )
                .bind(&role.namespace)
                .bind(&role.name)
                .bind(&permission.action)
                .bind(&permission.resource_pattern)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| classify_sqlx_error("unassign_permission", e))
            })
            .await?;

        match (role_id, deleted) {
            (None, _) => Err(role.not_found()),
            (Some(_), 0) => Err(StorageError::PermissionNotFound {
                namespace: role.namespace.clone(),
                role: role.name.clone(),
                action: permission.action.clone(),
                resource_pattern: permission.resource_pattern.clone(),
            }),
            _ => Ok(()),
        }
    }

    #[instrument(skip(self))]
    async fn list_role_permissions(&self, role: &RoleKey) -> StorageResult<Vec<Permission>> {
        role.validate()?;

        let rows: Vec<(Option<String>, Option<String>)> = self
            .execute_read("list_role_permissions", async {
                sqlx::query_as(
                    r#"
                    SELECT p.action, p.resource_pattern
                    FROM roles r
                    LEFT JOIN role_permissions p ON p.role_id = r.id
                    WHERE r.namespace = $1 AND r.name = $2
                    "#,
                )
                .bind(&role.namespace)
                .bind(&role.name)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| classify_sqlx_error("list_role_permissions", e))
            })
            .await?;

        if rows.is_empty() {
            return Err(role.not_found());
        }
        Ok(collect_permissions(rows))
    }
}

#[async_trait]
impl RoleRepo for PostgresStore {
    #[instrument(skip(self, permissions))]
    async fn create_role(
        &self,
        role: &RoleKey,
        permissions: Vec<Permission>,
    ) -> StorageResult<Role> {
        role.validate()?;
        let mut grants = BTreeMap::new();
        for permission in permissions {
            let prefix = permission.validate()?.literal_prefix();
            grants.insert(permission, prefix);
        }

        let actions: Vec<&str> = grants.keys().map(|p| p.action.as_str()).collect();
        let patterns: Vec<&str> = grants.keys().map(|p| p.resource_pattern.as_str()).collect();
        let prefixes: Vec<&str> = grants.values().map(String::as_str).collect();

        self.execute_write("create_role", async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| classify_sqlx_error("create_role", e))?;

            let role_id: i64 = sqlx::query_scalar(
                "INSERT INTO roles (namespace, name) VALUES ($1, $2) RETURNING id",
            )
            .bind(&role.namespace)
            .bind(&role.name)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| match classify_sqlx_error("create_role", e) {
                StorageError::AlreadyExists { .. } => StorageError::RoleAlreadyExists {
                    namespace: role.namespace.clone(),
                    name: role.name.clone(),
                },
                other => other,
            })?;

            sqlx::query(
                r#"
                INSERT INTO role_permissions (role_id, action, resource_pattern, resource_prefix)
                SELECT $1, t.action, t.resource_pattern, t.resource_prefix
                FROM UNNEST($2::text[], $3::text[], $4::text[])
                    AS t(action, resource_pattern, resource_prefix)
                "#,
            )
            .bind(role_id)
            .bind(&actions)
            .bind(&patterns)
            .bind(&prefixes)
            .execute(&mut *tx)
            .await
            .map_err(|e| classify_sqlx_error("create_role permissions", e))?;

            tx.commit()
                .await
                .map_err(|e| classify_sqlx_error("create_role", e))
        })
        .await?;

        Ok(Role {
            namespace: role.namespace.clone(),
            name: role.name.clone(),
            permissions: grants.into_keys().collect(),
        })
    }

    #[instrument(skip(self))]
    async fn delete_role(&self, role: &RoleKey) -> StorageResult<()> {
        role.validate()?;

        let result = self
            .execute_write("delete_role", async {
                sqlx::query("DELETE FROM roles WHERE namespace = $1 AND name = $2")
                    .bind(&role.namespace)
                    .bind(&role.name)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| classify_sqlx_error("delete_role", e))
            })
            .await?;

        if result.rows_affected() == 0 {
            return Err(role.not_found());
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn assign_role(&self, role_name: &str, actor: &Actor) -> StorageResult<()> {
        actor.validate()?;
        validate_identifier("role name", role_name)?;
        let key = RoleKey::new(&actor.namespace, role_name);

        let role_id: Option<i64> = self
            .execute_write("assign_role", async {
                sqlx::query_scalar(
                    r#"
                    WITH role AS (
                        SELECT id FROM roles WHERE namespace = $1 AND name = $2
                    ), inserted AS (
                        INSERT INTO actor_role_assignments (role_id, actor_id, actor_namespace)
                        SELECT id, $3, $1 FROM role
                        ON CONFLICT DO NOTHING
                    )
                    SELECT id FROM role
                    "#,
                )
                .bind(&key.namespace)
                .bind(&key.name)
                .bind(&actor.id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| classify_sqlx_error("assign_role", e))
            })
            .await?;

        role_id.map(|_| ()).ok_or_else(|| key.not_found())
    }

    #[instrument(skip(self))]
    async fn assign_role_to_group(&self, role: &RoleKey, group: &Group) -> StorageResult<()> {
        role.validate()?;
        group.validate()?;

        let role_id: Option<i64> = self
            .execute_write("assign_role_to_group", async {
                sqlx::query_scalar(
                    r#"
                    WITH role AS (
                        SELECT id FROM roles WHERE namespace = $1 AND name = $2
                    ), inserted AS (
                        INSERT INTO group_role_assignments (role_id, group_id)
                        SELECT id, $3 FROM role
                        ON CONFLICT DO NOTHING
                    )
                    SELECT id FROM role
                    "#,
                )
                .bind(&role.namespace)
                .bind(&role.name)
                .bind(&group.id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| classify_sqlx_error("assign_role_to_group", e))
            })
            .await?;

        role_id.map(|_| ()).ok_or_else(|| role.not_found())
    }

    #[instrument(skip(self))]
    async fn unassign_role(&self, role_name: &str, actor: &Actor) -> StorageResult<()> {
        actor.validate()?;
        validate_identifier("role name", role_name)?;
        let key = RoleKey::new(&actor.namespace, role_name);

        let (role_id, deleted): (Option<i64>, i64) = self
            .execute_write("unassign_role", async {
                sqlx::query_as(
                    r#"
                    WITH role AS (
                        SELECT id FROM roles WHERE namespace = $1 AND name = $2
                    ), deleted AS (
                        DELETE FROM actor_role_assignments a
                        USING role
                        WHERE a.role_id = role.id AND a.actor_id = $3 AND a.actor_namespace = $1
                        RETURNING a.role_id
                    )
                    SELECT (SELECT id FROM role), (SELECT COUNT(*) FROM deleted)
                    "#,
                )
                .bind(&key.namespace)
                .bind(&key.name)
                .bind(&actor.id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| classify_sqlx_error("unassign_role", e))
            })
            .await?;

        match (role_id, deleted) {
            (None, _) => Err(key.not_found()),
            (Some(_), 0) => Err(StorageError::AssignmentNotFound {
                namespace: key.namespace,
                role: key.name,
                assignee: actor.id.clone(),
            }),
            _ => Ok(()),
        }
    }

    #[instrument(skip(self))]
    async fn unassign_role_from_group(&self, role: &RoleKey, group: &Group) -> StorageResult<()> {
        role.validate()?;
        group.validate()?;

        let (role_id, deleted): (Option<i64>, i64) = self
            .execute_write("unassign_role_from_group", async {
                sqlx::query_as(
                    r#"
                    WITH role AS (
                        SELECT id FROM roles WHERE namespace = $1 AND name = $2
                    ), deleted AS (
                        DELETE FROM group_role_assignments g
                        USING role
                        WHERE g.role_id = role.id AND g.group_id = $3
                        RETURNING g.role_id
                    )
                    SELECT (SELECT id FROM role), (SELECT COUNT(*) FROM deleted)
                    "#,
                )
                .bind(&role.namespace)
                .bind(&role.name)
                .bind(&group.id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| classify_sqlx_error("unassign_role_from_group", e))
            })
            .await?;

        match (role_id, deleted) {
            (None, _) => Err(role.not_found()),
            (Some(_), 0) => Err(StorageError::AssignmentNotFound {
                namespace: role.namespace.clone(),
                role: role.name.clone(),
                assignee: group.id.clone(),
            }),
            _ => Ok(()),
        }
    }

    #[instrument(skip(self))]
    async fn has_role(&self, role_name: &str, actor: &Actor) -> StorageResult<bool> {
        actor.validate()?;
        validate_identifier("role name", role_name)?;

        self.execute_read("has_role", async {
            sqlx::query_scalar(
                r#"
                SELECT EXISTS (
                    SELECT 1
                    FROM actor_role_assignments a
                    JOIN roles r ON r.id = a.role_id
                    WHERE r.namespace = $1 AND r.name = $2
                      AND a.actor_id = $3 AND a.actor_namespace = $1
                )
                "#,
            )
            .bind(&actor.namespace)
            .bind(role_name)
            .bind(&actor.id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error("has_role", e))
        })
        .await
    }

    #[instrument(skip(self))]
    async fn has_role_for_group(&self, role: &RoleKey, group: &Group) -> StorageResult<bool> {
        role.validate()?;
        group.validate()?;

        self.execute_read("has_role_for_group", async {
            sqlx::query_scalar(
                r#"
                SELECT EXISTS (
                    SELECT 1
                    FROM group_role_assignments g
                    JOIN roles r ON r.id = g.role_id
                    WHERE r.namespace = $1 AND r.name = $2 AND g.group_id = $3
                )
                "#,
            )
            .bind(&role.namespace)
            .bind(&role.name)
            .bind(&group.id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify_sqlx_error("has_role_for_group", e))
        })
        .await
    }

    #[instrument(skip(self))]
    async fn list_actor_roles(&self, actor: &Actor) -> StorageResult<Vec<Role>> {
        actor.validate()?;

        let rows: Vec<(String, Option<String>, Option<String>)> = self
            .execute_read("list_actor_roles", async {
                sqlx::query_as(
                    r#"
                    SELECT r.name, p.action, p.resource_pattern
                    FROM roles r
                    JOIN actor_role_assignments a ON a.role_id = r.id
                    LEFT JOIN role_permissions p ON p.role_id = r.id
                    WHERE r.namespace = $1 AND a.actor_id = $2 AND a.actor_namespace = $1
                    "#,
                )
                .bind(&actor.namespace)
                .bind(&actor.id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| classify_sqlx_error("list_actor_roles", e))
            })
            .await?;

        let mut by_name: BTreeMap<String, Vec<(Option<String>, Option<String>)>> = BTreeMap::new();
        for (name, action, pattern) in rows {
            by_name.entry(name).or_default().push((action, pattern));
        }

        Ok(by_name
            .into_iter()
            .map(|(name, rows)| Role {
                namespace: actor.namespace.clone(),
                name,
                permissions: collect_permissions(rows),
            })
            .collect())
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("pool", &"PgPool")
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}
