//! Conversions between wire messages and storage types.

use tonic::Status;

use perm_storage::{Actor, Group, Permission, Role};

use crate::proto::perm::v1 as pb;

impl From<pb::Actor> for Actor {
    fn from(actor: pb::Actor) -> Self {
        Actor::new(actor.id, actor.namespace)
    }
}

impl From<Actor> for pb::Actor {
    fn from(actor: Actor) -> Self {
        pb::Actor {
            id: actor.id,
            namespace: actor.namespace,
        }
    }
}

impl From<pb::Group> for Group {
    fn from(group: pb::Group) -> Self {
        Group::new(group.id)
    }
}

impl From<pb::Permission> for Permission {
    fn from(permission: pb::Permission) -> Self {
        Permission::new(permission.action, permission.resource_pattern)
    }
}

impl From<Permission> for pb::Permission {
    fn from(permission: Permission) -> Self {
        pb::Permission {
            action: permission.action,
            resource_pattern: permission.resource_pattern,
        }
    }
}

impl From<Role> for pb::Role {
    fn from(role: Role) -> Self {
        pb::Role {
            name: role.name,
            namespace: role.namespace,
            permissions: role.permissions.into_iter().map(Into::into).collect(),
        }
    }
}

/// Unwraps a required message field.
fn required<T>(field: Option<T>, name: &str) -> Result<T, Status> {
    field.ok_or_else(|| Status::invalid_argument(format!("{name} is required")))
}

pub(crate) fn groups(groups: Vec<pb::Group>) -> Vec<Group> {
    groups.into_iter().map(Group::from).collect()
}

pub(crate) fn group(group: Option<pb::Group>) -> Result<Group, Status> {
    required(group, "group").map(Group::from)
}

pub(crate) fn actor(actor: Option<pb::Actor>) -> Result<Actor, Status> {
    required(actor, "actor").map(Actor::from)
}

pub(crate) fn permission(permission: Option<pb::Permission>) -> Result<Permission, Status> {
    required(permission, "permission").map(Permission::from)
}
