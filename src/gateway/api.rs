//! Tenant queue REST API
//!
//! ## Endpoints
//!
//! - `GET    /api/v1/tenants/:tenant_id/queues`             - List a tenant's queues
//! - `GET    /api/v1/tenants/:tenant_id/queues/:direction`  - Resolve one queue + credentials
//! - `DELETE /api/v1/tenants/:tenant_id/queues`             - Tear down a tenant's queues
//!
//! Resolving a queue that is still provisioning (or that provisioning was
//! just started for) answers 202; the caller polls until 200.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::directory::{QueueDescriptor, QueueDirection};
use crate::error::BridgeError;

use super::{QueueGrant, QueueResolution, QueueService, ScopedCredentials};

#[derive(Clone)]
pub struct QueueApiState {
    service: Arc<QueueService>,
}

impl QueueApiState {
    pub fn new(service: Arc<QueueService>) -> Self {
        Self { service }
    }
}

/// A queue as returned to callers.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueBody {
    pub tenant_id: String,
    pub direction: QueueDirection,
    pub arn: String,
    pub url: String,
}

impl From<QueueDescriptor> for QueueBody {
    fn from(q: QueueDescriptor) -> Self {
        Self {
            tenant_id: q.tenant_id,
            direction: q.direction,
            arn: q.arn,
            url: q.url,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueGrantResponse {
    #[serde(flatten)]
    pub queue: QueueBody,
    pub credentials: ScopedCredentials,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_queue: Option<QueueBody>,
}

impl From<QueueGrant> for QueueGrantResponse {
    fn from(grant: QueueGrant) -> Self {
        Self {
            queue: grant.queue.into(),
            credentials: grant.credentials,
            legacy_queue: grant.legacy_queue.map(Into::into),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

fn accepted_body(message: &str) -> Json<ErrorResponse> {
    Json(ErrorResponse {
        code: "PROVISIONING".to_string(),
        message: message.to_string(),
        details: None,
    })
}

fn map_error(e: BridgeError) -> (StatusCode, Json<ErrorResponse>) {
    let (status, code) = match &e {
        BridgeError::BadRequest(_) | BridgeError::Validation(_) | BridgeError::MissingTenantId => {
            (StatusCode::BAD_REQUEST, "BAD_REQUEST")
        }
        BridgeError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        BridgeError::Gone(_) => (StatusCode::GONE, "GONE"),
        BridgeError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    };
    (
        status,
        Json(ErrorResponse {
            code: code.to_string(),
            message: e.to_string(),
            details: None,
        }),
    )
}

/// Build the queue API router.
pub fn create_queue_api_router(state: QueueApiState) -> Router {
    Router::new()
        .route(
            "/api/v1/tenants/:tenant_id/queues",
            get(list_queues).delete(delete_queues),
        )
        .route(
            "/api/v1/tenants/:tenant_id/queues/:direction",
            get(get_queue),
        )
        .with_state(state)
}

async fn get_queue(
    State(state): State<QueueApiState>,
    Path((tenant_id, direction)): Path<(String, String)>,
) -> Result<(StatusCode, axum::response::Response), (StatusCode, Json<ErrorResponse>)> {
    let direction: QueueDirection = direction.parse().map_err(map_error)?;
    debug!(tenant_id = %tenant_id, direction = %direction, "Queue resolve requested");

    match state
        .service
        .get_queue(&tenant_id, direction)
        .await
        .map_err(map_error)?
    {
        QueueResolution::Ready(grant) => Ok((
            StatusCode::OK,
            axum::response::IntoResponse::into_response(Json(QueueGrantResponse::from(grant))),
        )),
        QueueResolution::Provisioning => Ok((
            StatusCode::ACCEPTED,
            axum::response::IntoResponse::into_response(accepted_body(
                "queue is being provisioned, retry shortly",
            )),
        )),
    }
}

async fn list_queues(
    State(state): State<QueueApiState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<Vec<QueueBody>>, (StatusCode, Json<ErrorResponse>)> {
    let queues = state.service.list_queues(&tenant_id).map_err(map_error)?;
    Ok(Json(queues.into_iter().map(Into::into).collect()))
}

async fn delete_queues(
    State(state): State<QueueApiState>,
    Path(tenant_id): Path<String>,
) -> Result<(StatusCode, Json<ErrorResponse>), (StatusCode, Json<ErrorResponse>)> {
    state.service.start_delete(&tenant_id).map_err(map_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ErrorResponse {
            code: "DELETING".to_string(),
            message: format!("queue deletion started for tenant {tenant_id}"),
            details: None,
        }),
    ))
}
