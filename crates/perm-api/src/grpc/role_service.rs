//! Role management service.

use std::sync::Arc;
use std::time::Duration;

use tonic::{Request, Response, Status};
use tracing::instrument;

use perm_storage::{Permission, PermissionRepo, RoleKey, RoleRepo, Store};

use super::conversion::{actor, group};
use super::{run_store_call, DEFAULT_REQUEST_TIMEOUT};
use crate::proto::perm::v1::{
    role_service_server::RoleService, AssignRoleRequest, AssignRoleResponse,
    AssignRoleToGroupRequest, AssignRoleToGroupResponse, CreateRoleRequest, CreateRoleResponse,
    DeleteRoleRequest, DeleteRoleResponse, HasRoleForGroupRequest, HasRoleForGroupResponse,
    HasRoleRequest, HasRoleResponse, ListActorRolesRequest, ListActorRolesResponse,
    ListRolePermissionsRequest, ListRolePermissionsResponse, UnassignRoleFromGroupRequest,
    UnassignRoleFromGroupResponse, UnassignRoleRequest, UnassignRoleResponse,
};

/// gRPC implementation of `perm.v1.RoleService`.
#[derive(Clone)]
pub struct RoleGrpcService {
    store: Arc<dyn Store>,
    request_timeout: Duration,
}

impl RoleGrpcService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_request_timeout(store, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_request_timeout(store: Arc<dyn Store>, request_timeout: Duration) -> Self {
        Self {
            store,
            request_timeout,
        }
    }
}

#[tonic::async_trait]
impl RoleService for RoleGrpcService {
    #[instrument(skip_all)]
    async fn create_role(
        &self,
        request: Request<CreateRoleRequest>,
    ) -> Result<Response<CreateRoleResponse>, Status> {
        let req = request.into_inner();
        let role = RoleKey::new(req.namespace, req.name);
        let permissions: Vec<Permission> =
            req.permissions.into_iter().map(Permission::from).collect();

        let created = run_store_call(
            "create_role",
            self.request_timeout,
            self.store.create_role(&role, permissions),
        )
        .await?;

        tracing::info!(namespace = %created.namespace, role = %created.name, "role created");
        Ok(Response::new(CreateRoleResponse {
            role: Some(created.into()),
        }))
    }

    #[instrument(skip_all)]
    async fn delete_role(
        &self,
        request: Request<DeleteRoleRequest>,
    ) -> Result<Response<DeleteRoleResponse>, Status> {
        let req = request.into_inner();
        let role = RoleKey::new(req.namespace, req.name);

        run_store_call("delete_role", self.request_timeout, self.store.delete_role(&role)).await?;

        tracing::info!(namespace = %role.namespace, role = %role.name, "role deleted");
        Ok(Response::new(DeleteRoleResponse {}))
    }

    async fn assign_role(
        &self,
        request: Request<AssignRoleRequest>,
    ) -> Result<Response<AssignRoleResponse>, Status> {
        let req = request.into_inner();
        let actor = actor(req.actor)?;

        run_store_call(
            "assign_role",
            self.request_timeout,
            self.store.assign_role(&req.role_name, &actor),
        )
        .await?;

        Ok(Response::new(AssignRoleResponse {}))
    }

    async fn assign_role_to_group(
        &self,
        request: Request<AssignRoleToGroupRequest>,
    ) -> Result<Response<AssignRoleToGroupResponse>, Status> {
        let req = request.into_inner();
        let role = RoleKey::new(req.namespace, req.role_name);
        let group = group(req.group)?;

        run_store_call(
            "assign_role_to_group",
            self.request_timeout,
            self.store.assign_role_to_group(&role, &group),
        )
        .await?;

        Ok(Response::new(AssignRoleToGroupResponse {}))
    }

    async fn unassign_role(
        &self,
        request: Request<UnassignRoleRequest>,
    ) -> Result<Response<UnassignRoleResponse>, Status> {
        let req = request.into_inner();
        let actor = actor(req.actor)?;

        run_store_call(
            "unassign_role",
            self.request_timeout,
            self.store.unassign_role(&req.role_name, &actor),
        )
        .await?;

        Ok(Response::new(UnassignRoleResponse {}))
    }

    async fn unassign_role_from_group(
        &self,
        request: Request<UnassignRoleFromGroupRequest>,
    ) -> Result<Response<UnassignRoleFromGroupResponse>, Status> {
        let req = request.into_inner();
        let role = RoleKey::new(req.namespace, req.role_name);
        let group = group(req.group)?;

        run_store_call(
            "unassign_role_from_group",
            self.request_timeout,
            self.store.unassign_role_from_group(&role, &group),
        )
        .await?;

        Ok(Response::new(UnassignRoleFromGroupResponse {}))
    }

    async fn has_role(
        &self,
        request: Request<HasRoleRequest>,
    ) -> Result<Response<HasRoleResponse>, Status> {
        let req = request.into_inner();
        let actor = actor(req.actor)?;

        let has_role = run_store_call(
            "has_role",
            self.request_timeout,
            self.store.has_role(&req.role_name, &actor),
        )
        .await?;

        Ok(Response::new(HasRoleResponse { has_role }))
    }

    async fn has_role_for_group(
        &self,
        request: Request<HasRoleForGroupRequest>,
    ) -> Result<Response<HasRoleForGroupResponse>, Status> {
        let req = request.into_inner();
        let role = RoleKey::new(req.namespace, req.role_name);
        let group = group(req.group)?;

        let has_role = run_store_call(
            "has_role_for_group",
            self.request_timeout,
            self.store.has_role_for_group(&role, &group),
        )
        .await?;

        Ok(Response::new(HasRoleForGroupResponse { has_role }))
    }

    async fn list_actor_roles(
        &self,
        request: Request<ListActorRolesRequest>,
    ) -> Result<Response<ListActorRolesResponse>, Status> {
        let actor = actor(request.into_inner().actor)?;

        let roles = run_store_call(
            "list_actor_roles",
            self.request_timeout,
            self.store.list_actor_roles(&actor),
        )
        .await?;

        Ok(Response::new(ListActorRolesResponse {
            roles: roles.into_iter().map(Into::into).collect(),
        }))
    }

    async fn list_role_permissions(
        &self,
        request: Request<ListRolePermissionsRequest>,
    ) -> Result<Response<ListRolePermissionsResponse>, Status> {
        let req = request.into_inner();
        let role = RoleKey::new(req.namespace, req.role_name);

        let permissions = run_store_call(
            "list_role_permissions",
            self.request_timeout,
            self.store.list_role_permissions(&role),
        )
        .await?;

        Ok(Response::new(ListRolePermissionsResponse {
            permissions: permissions.into_iter().map(Into::into).collect(),
        }))
    }
}
