//! In-memory storage implementation.
//!
//! All state lives behind a single `tokio::sync::RwLock`. Queries hold the
//! read guard for their whole evaluation, so a check never observes a role
//! assignment without the role's permissions (or the reverse). Mutations take
//! the write guard.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::error::{StorageError, StorageResult};
use crate::model::{
    validate_identifier, Actor, Group, HasPermissionQuery, ListResourcePatternsQuery, Permission,
    Role, RoleKey,
};
use crate::pattern::ResourcePattern;
use crate::traits::{PermissionRepo, RoleRepo};

type Grants = BTreeMap<Permission, ResourcePattern>;

#[derive(Debug, Default)]
struct MemoryState {
    roles: HashMap<RoleKey, Grants>,
    /// Role names, resolved in the actor's own namespace.
    actor_roles: HashMap<Actor, BTreeSet<String>>,
    group_roles: HashMap<Group, BTreeSet<RoleKey>>,
}

impl MemoryState {
    fn grants(&self, role: &RoleKey) -> StorageResult<&Grants> {
        self.roles.get(role).ok_or_else(|| role.not_found())
    }

    /// Roles reachable from the actor directly or through the given groups,
    /// restricted to the actor's namespace.
    fn reachable_roles<'a>(
        &'a self,
        actor: &'a Actor,
        groups: &'a [Group],
    ) -> impl Iterator<Item = &'a Grants> + 'a {
        let direct = self
            .actor_roles
            .get(actor)
            .into_iter()
            .flatten()
            .map(move |name| RoleKey::new(&actor.namespace, name));

        let via_groups = groups
            .iter()
            .filter_map(move |group| self.group_roles.get(group))
            .flatten()
            .filter(move |key| key.namespace == actor.namespace)
            .cloned();

        direct
            .chain(via_groups)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter_map(move |key| self.roles.get(&key))
    }
}

/// In-memory implementation of the store traits.
///
/// # Performance Characteristics
///
/// - **has_permission**: O(P) over the permissions of the actor's roles
/// - **assign/unassign**: O(log N)
/// - **delete_role**: O(A) over all actor assignments (cascade)
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Creates a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn compile_grants(role: &RoleKey, permissions: Vec<Permission>) -> StorageResult<Grants> {
    role.validate()?;
    permissions
        .into_iter()
        .map(|permission| {
            let pattern = permission.validate()?;
            Ok((permission, pattern))
        })
        .collect()
}

#[async_trait]
impl PermissionRepo for MemoryStore {
    #[instrument(skip(self))]
    async fn has_permission(&self, query: &HasPermissionQuery) -> StorageResult<bool> {
        query.validate()?;

        let state = self.state.read().await;
        let granted = state
            .reachable_roles(&query.actor, &query.groups)
            .flat_map(|grants| grants.iter())
            .any(|(permission, pattern)| {
                permission.action == query.action && pattern.matches(&query.resource_id)
            });

        Ok(granted)
    }

    #[instrument(skip(self))]
    async fn list_resource_patterns(
        &self,
        query: &ListResourcePatternsQuery,
    ) -> StorageResult<Vec<String>> {
        query.validate()?;

        let state = self.state.read().await;
        let patterns: BTreeSet<&str> = state
            .reachable_roles(&query.actor, &query.groups)
            .flat_map(|grants| grants.keys())
            .filter(|permission| permission.action == query.action)
            .map(|permission| permission.resource_pattern.as_str())
            .collect();

        Ok(patterns.into_iter().map(str::to_string).collect())
    }

    #[instrument(skip(self))]
    async fn assign_permission(
        &self,
        role: &RoleKey,
        permission: Permission,
    ) -> StorageResult<()> {
        role.validate()?;
        let pattern = permission.validate()?;

        let mut state = self.state.write().await;
        let grants = state.roles.get_mut(role).ok_or_else(|| role.not_found())?;
        grants.entry(permission).or_insert(pattern);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unassign_permission(
        &self,
        role: &RoleKey,
        permission: &Permission,
    ) -> StorageResult<()> {
        role.validate()?;

        let mut state = self.state.write().await;
        let grants = state.roles.get_mut(role).ok_or_else(|| role.not_found())?;
        match grants.remove(permission) {
            Some(_) => Ok(()),
            None => Err(StorageError::PermissionNotFound {
                namespace: role.namespace.clone(),
                role: role.name.clone(),
                action: permission.action.clone(),
                resource_pattern: permission.resource_pattern.clone(),
            }),
        }
    }

    #[instrument(skip(self))]
    async fn list_role_permissions(&self, role: &RoleKey) -> StorageResult<Vec<Permission>> {
        role.validate()?;

        let state = self.state.read().await;
        Ok(state.grants(role)?.keys().cloned().collect())
    }
}

#[async_trait]
impl RoleRepo for MemoryStore {
    #[instrument(skip(self, permissions))]
    async fn create_role(
        &self,
        role: &RoleKey,
        permissions: Vec<Permission>,
    ) -> StorageResult<Role> {
        let grants = compile_grants(role, permissions)?;

        let mut state = self.state.write().await;
        if state.roles.contains_key(role) {
            return Err(StorageError::RoleAlreadyExists {
                namespace: role.namespace.clone(),
                name: role.name.clone(),
            });
        }

        let created = Role {
            namespace: role.namespace.clone(),
            name: role.name.clone(),
            permissions: grants.keys().cloned().collect(),
        };
        state.roles.insert(role.clone(), grants);
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn delete_role(&self, role: &RoleKey) -> StorageResult<()> {
        role.validate()?;

        let mut state = self.state.write().await;
        if state.roles.remove(role).is_none() {
            return Err(role.not_found());
        }

        state.actor_roles.retain(|actor, names| {
            if actor.namespace == role.namespace {
                names.remove(&role.name);
            }
            !names.is_empty()
        });
        state.group_roles.retain(|_, keys| {
            keys.remove(role);
            !keys.is_empty()
        });
        Ok(())
    }

    #[instrument(skip(self))]
    async fn assign_role(&self, role_name: &str, actor: &Actor) -> StorageResult<()> {
        actor.validate()?;
        validate_identifier("role name", role_name)?;
        let key = RoleKey::new(&actor.namespace, role_name);

        let mut state = self.state.write().await;
        state.grants(&key)?;
        state
            .actor_roles
            .entry(actor.clone())
            .or_default()
            .insert(key.name);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn assign_role_to_group(&self, role: &RoleKey, group: &Group) -> StorageResult<()> {
        role.validate()?;
        group.validate()?;

        let mut state = self.state.write().await;
        state.grants(role)?;
        state
            .group_roles
            .entry(group.clone())
            .or_default()
            .insert(role.clone());
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unassign_role(&self, role_name: &str, actor: &Actor) -> StorageResult<()> {
        actor.validate()?;
        validate_identifier("role name", role_name)?;
        let key = RoleKey::new(&actor.namespace, role_name);

        let mut state = self.state.write().await;
        state.grants(&key)?;

        let removed = match state.actor_roles.get_mut(actor) {
            Some(names) => {
                let removed = names.remove(role_name);
                if names.is_empty() {
                    state.actor_roles.remove(actor);
                }
                removed
            }
            None => false,
        };

        if removed {
            Ok(())
        } else {
            Err(StorageError::AssignmentNotFound {
                namespace: key.namespace,
                role: key.name,
                assignee: actor.id.clone(),
            })
        }
    }

    #[instrument(skip(self))]
    async fn unassign_role_from_group(&self, role: &RoleKey, group: &Group) -> StorageResult<()> {
        role.validate()?;
        group.validate()?;

        let mut state = self.state.write().await;
        state.grants(role)?;

        let removed = match state.group_roles.get_mut(group) {
            Some(keys) => {
                let removed = keys.remove(role);
                if keys.is_empty() {
                    state.group_roles.remove(group);
                }
                removed
            }
            None => false,
        };

        if removed {
            Ok(())
        } else {
            Err(StorageError::AssignmentNotFound {
                namespace: role.namespace.clone(),
                role: role.name.clone(),
                assignee: group.id.clone(),
            })
        }
    }

    #[instrument(skip(self))]
    async fn has_role(&self, role_name: &str, actor: &Actor) -> StorageResult<bool> {
        actor.validate()?;
        validate_identifier("role name", role_name)?;

        let state = self.state.read().await;
        let key = RoleKey::new(&actor.namespace, role_name);
        Ok(state.roles.contains_key(&key)
            && state
                .actor_roles
                .get(actor)
                .is_some_and(|names| names.contains(role_name)))
    }

    #[instrument(skip(self))]
    async fn has_role_for_group(&self, role: &RoleKey, group: &Group) -> StorageResult<bool> {
        role.validate()?;
        group.validate()?;

        let state = self.state.read().await;
        Ok(state
            .group_roles
            .get(group)
            .is_some_and(|keys| keys.contains(role)))
    }

    #[instrument(skip(self))]
    async fn list_actor_roles(&self, actor: &Actor) -> StorageResult<Vec<Role>> {
        actor.validate()?;

        let state = self.state.read().await;
        let roles = state
            .actor_roles
            .get(actor)
            .into_iter()
            .flatten()
            .filter_map(|name| {
                let key = RoleKey::new(&actor.namespace, name);
                state.roles.get(&key).map(|grants| Role {
                    namespace: key.namespace,
                    name: key.name,
                    permissions: grants.keys().cloned().collect(),
                })
            })
            .collect();
        Ok(roles)
    }
}
