//! Storage trait definitions.

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::model::{
    Actor, Group, HasPermissionQuery, ListResourcePatternsQuery, Permission, Role, RoleKey,
};

/// Permission queries and role grant mutations.
///
/// Implementations must be thread-safe. Every method is cancel-safe: dropping
/// the returned future abandons the operation without partial effects.
#[async_trait]
pub trait PermissionRepo: Send + Sync + 'static {
    /// Returns whether the actor, directly or through one of the query's
    /// groups, holds a role in its namespace granting `action` on a pattern
    /// matching `resource_id`.
    ///
    /// Absence of a grant is `Ok(false)`, never an error.
    async fn has_permission(&self, query: &HasPermissionQuery) -> StorageResult<bool>;

    /// Returns the distinct resource patterns granted to the actor for the
    /// action, sorted ascending.
    async fn list_resource_patterns(
        &self,
        query: &ListResourcePatternsQuery,
    ) -> StorageResult<Vec<String>>;

    /// Grants a permission to a role. Granting a held permission is a no-op.
    async fn assign_permission(&self, role: &RoleKey, permission: Permission)
        -> StorageResult<()>;

    /// Revokes a permission from a role.
    async fn unassign_permission(&self, role: &RoleKey, permission: &Permission)
        -> StorageResult<()>;

    /// Lists a role's permissions sorted by action, then pattern.
    async fn list_role_permissions(&self, role: &RoleKey) -> StorageResult<Vec<Permission>>;
}

/// Role lifecycle and assignment operations.
#[async_trait]
pub trait RoleRepo: Send + Sync + 'static {
    /// Creates a role with an initial permission set.
    async fn create_role(&self, role: &RoleKey, permissions: Vec<Permission>)
        -> StorageResult<Role>;

    /// Deletes a role along with its permissions and assignments.
    async fn delete_role(&self, role: &RoleKey) -> StorageResult<()>;

    /// Assigns the role named `role_name` in the actor's namespace.
    async fn assign_role(&self, role_name: &str, actor: &Actor) -> StorageResult<()>;

    async fn assign_role_to_group(&self, role: &RoleKey, group: &Group) -> StorageResult<()>;

    async fn unassign_role(&self, role_name: &str, actor: &Actor) -> StorageResult<()>;

    async fn unassign_role_from_group(&self, role: &RoleKey, group: &Group) -> StorageResult<()>;

    /// Unknown roles report `false`.
    async fn has_role(&self, role_name: &str, actor: &Actor) -> StorageResult<bool>;

    async fn has_role_for_group(&self, role: &RoleKey, group: &Group) -> StorageResult<bool>;

    /// Roles directly assigned to the actor, sorted by name.
    async fn list_actor_roles(&self, actor: &Actor) -> StorageResult<Vec<Role>>;
}

/// The full store capability served by the RPC layer.
pub trait Store: PermissionRepo + RoleRepo {}

impl<T: PermissionRepo + RoleRepo> Store for T {}
