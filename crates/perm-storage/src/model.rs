//! Data model shared by all storage backends.

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::pattern::{validate_resource_id, ResourcePattern};

/// Maximum length of identifiers (actor ids, namespaces, role names, actions).
pub const MAX_IDENTIFIER_LENGTH: usize = 256;

/// A caller scoped to a tenant namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub namespace: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            namespace: namespace.into(),
        }
    }

    pub fn validate(&self) -> StorageResult<()> {
        validate_identifier("actor id", &self.id)?;
        validate_identifier("actor namespace", &self.namespace)
    }
}

/// An identifier-only assignment target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
}

impl Group {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn validate(&self) -> StorageResult<()> {
        validate_identifier("group id", &self.id)
    }
}

/// Identifies a role: a name unique within its namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleKey {
    pub namespace: String,
    pub name: String,
}

impl RoleKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn validate(&self) -> StorageResult<()> {
        validate_identifier("role namespace", &self.namespace)?;
        validate_identifier("role name", &self.name)
    }

    pub(crate) fn not_found(&self) -> StorageError {
        StorageError::RoleNotFound {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

/// An `(action, resource_pattern)` grant.
///
/// Ordered by action first, then pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Permission {
    pub action: String,
    pub resource_pattern: String,
}

impl Permission {
    pub fn new(action: impl Into<String>, resource_pattern: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource_pattern: resource_pattern.into(),
        }
    }

    /// Validates the action and parses the pattern.
    pub fn validate(&self) -> StorageResult<ResourcePattern> {
        validate_identifier("action", &self.action)?;
        ResourcePattern::parse(&self.resource_pattern)
    }
}

/// A role together with the permissions it grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub namespace: String,
    pub name: String,
    pub permissions: Vec<Permission>,
}

impl Role {
    pub fn key(&self) -> RoleKey {
        RoleKey::new(&self.namespace, &self.name)
    }
}

/// Query for a single permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HasPermissionQuery {
    pub actor: Actor,
    pub action: String,
    pub resource_id: String,
    /// Groups the actor belongs to. Membership is asserted by the caller.
    pub groups: Vec<Group>,
}

impl HasPermissionQuery {
    pub fn validate(&self) -> StorageResult<()> {
        self.actor.validate()?;
        validate_identifier("action", &self.action)?;
        validate_resource_id(&self.resource_id)?;
        self.groups.iter().try_for_each(Group::validate)
    }
}

/// Query for the resource patterns an actor holds for an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListResourcePatternsQuery {
    pub actor: Actor,
    pub action: String,
    pub groups: Vec<Group>,
}

impl ListResourcePatternsQuery {
    pub fn validate(&self) -> StorageResult<()> {
        self.actor.validate()?;
        validate_identifier("action", &self.action)?;
        self.groups.iter().try_for_each(Group::validate)
    }
}

/// Validates a plain identifier: non-empty, bounded, no control characters.
pub fn validate_identifier(field: &str, value: &str) -> StorageResult<()> {
    if value.is_empty() {
        return Err(StorageError::invalid(format!("{field} cannot be empty")));
    }
    if value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(StorageError::invalid(format!(
            "{field} exceeds maximum length of {MAX_IDENTIFIER_LENGTH} bytes"
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(StorageError::invalid(format!(
            "{field} cannot contain control characters"
        )));
    }
    Ok(())
}
