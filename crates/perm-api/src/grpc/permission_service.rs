//! Permission management and query service.

use std::sync::Arc;
use std::time::Duration;

use tonic::{Request, Response, Status};
use tracing::instrument;

use perm_storage::{
    HasPermissionQuery, ListResourcePatternsQuery, PermissionRepo, RoleKey, Store,
};

use super::conversion::{actor, groups, permission};
use super::{run_store_call, DEFAULT_REQUEST_TIMEOUT};
use crate::proto::perm::v1::{
    permission_service_server::PermissionService, AssignPermissionRequest,
    AssignPermissionResponse, HasPermissionRequest, HasPermissionResponse,
    ListResourcePatternsRequest, ListResourcePatternsResponse, UnassignPermissionRequest,
    UnassignPermissionResponse,
};

/// gRPC implementation of `perm.v1.PermissionService`.
#[derive(Clone)]
pub struct PermissionGrpcService {
    store: Arc<dyn Store>,
    request_timeout: Duration,
}

impl PermissionGrpcService {
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
impl PermissionService for PermissionGrpcService {
    #[instrument(skip_all)]
    async fn assign_permission(
        &self,
        request: Request<AssignPermissionRequest>,
    ) -> Result<Response<AssignPermissionResponse>, Status> {
        let req = request.into_inner();
        let role = RoleKey::new(req.namespace, req.role_name);
        let permission = permission(req.permission)?;

        run_store_call(
            "assign_permission",
            self.request_timeout,
            self.store.assign_permission(&role, permission),
        )
        .await?;

        Ok(Response::new(AssignPermissionResponse {}))
    }

    #[instrument(skip_all)]
    async fn unassign_permission(
        &self,
        request: Request<UnassignPermissionRequest>,
    ) -> Result<Response<UnassignPermissionResponse>, Status> {
        let req = request.into_inner();
        let role = RoleKey::new(req.namespace, req.role_name);
        let permission = permission(req.permission)?;

        run_store_call(
            "unassign_permission",
            self.request_timeout,
            self.store.unassign_permission(&role, &permission),
        )
        .await?;

        Ok(Response::new(UnassignPermissionResponse {}))
    }

    async fn has_permission(
        &self,
        request: Request<HasPermissionRequest>,
    ) -> Result<Response<HasPermissionResponse>, Status> {
        let req = request.into_inner();
        let query = HasPermissionQuery {
            actor: actor(req.actor)?,
            action: req.action,
            resource_id: req.resource,
            groups: groups(req.groups),
        };

        let has_permission = run_store_call(
            "has_permission",
            self.request_timeout,
            self.store.has_permission(&query),
        )
        .await?;

        Ok(Response::new(HasPermissionResponse { has_permission }))
    }

    async fn list_resource_patterns(
        &self,
        request: Request<ListResourcePatternsRequest>,
    ) -> Result<Response<ListResourcePatternsResponse>, Status> {
        let req = request.into_inner();
        let query = ListResourcePatternsQuery {
            actor: actor(req.actor)?,
            action: req.action,
            groups: groups(req.groups),
        };

        let resource_patterns = run_store_call(
            "list_resource_patterns",
            self.request_timeout,
            self.store.list_resource_patterns(&query),
        )
        .await?;

        Ok(Response::new(ListResourcePatternsResponse { resource_patterns }))
    }
}
