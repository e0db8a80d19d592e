//! Deployment API endpoints.
//!
//! - `POST /v1/deployments?dryRun=bool` rolls out a deployment
//! - `DELETE /v1/deployments/{stage}/{namespace}/{name}` removes it from a stage
//! - `PUT /v1/deployments/{stage}/{namespace}/{name}/status` records agent status

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, post, put},
    Json, Router,
};
use riser_id::RiserRevision;
use riser_state_repo::{CommitOutcome, DryRunCommit, ResourceFile};
use riser_traffic::TrafficConfig;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::deployment::{DeployOutcome, DeploymentRequest, DeploymentStatus, StatusUpdate};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(deploy))
        .route("/{stage}/{namespace}/{name}", delete(delete_deployment))
        .route("/{stage}/{namespace}/{name}/status", put(update_status))
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployQuery {
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize)]
pub struct DeploymentPath {
    pub stage: String,
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResponse {
    pub riser_revision: RiserRevision,
    pub traffic: TrafficConfig,
    pub dry_run: bool,
    pub commit: CommitResponse,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dry_run_commits: Vec<DryRunCommitResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    /// "committed", "no_changes" or "unpublished".
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DryRunCommitResponse {
    pub message: String,
    pub files: Vec<FileChangeResponse>,
}

#[derive(Debug, Serialize)]
pub struct FileChangeResponse {
    pub path: String,
    pub delete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub commit: CommitResponse,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub applied: bool,
}

impl From<CommitOutcome> for CommitResponse {
    fn from(outcome: CommitOutcome) -> Self {
        match outcome {
            CommitOutcome::Committed { hash } => Self {
                status: "committed",
                hash: Some(hash),
            },
            CommitOutcome::NoChanges => Self {
                status: "no_changes",
                hash: None,
            },
            CommitOutcome::Unpublished => Self {
                status: "unpublished",
                hash: None,
            },
        }
    }
}

impl From<ResourceFile> for FileChangeResponse {
    fn from(file: ResourceFile) -> Self {
        Self {
            contents: (!file.delete).then(|| String::from_utf8_lossy(&file.contents).into_owned()),
            path: file.path,
            delete: file.delete,
        }
    }
}

impl From<DryRunCommit> for DryRunCommitResponse {
    fn from(commit: DryRunCommit) -> Self {
        Self {
            message: commit.message,
            files: commit.files.into_iter().map(Into::into).collect(),
        }
    }
}

impl DeployResponse {
    fn new(outcome: DeployOutcome, dry_run: bool) -> Self {
        Self {
            riser_revision: outcome.riser_revision,
            traffic: outcome.traffic,
            dry_run,
            commit: outcome.commit.into(),
            dry_run_commits: outcome.dry_run_commits.into_iter().map(Into::into).collect(),
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn deploy(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<DeployQuery>,
    body: Result<Json<DeploymentRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|e| {
        ApiError::bad_request("invalid_request", e.body_text()).with_request_id(&ctx.request_id)
    })?;

    let outcome = state
        .deployments()
        .deploy(&request, query.dry_run)
        .await
        .map_err(|e| ApiError::from_deployment(e, &ctx.request_id))?;

    Ok((
        StatusCode::OK,
        Json(DeployResponse::new(outcome, query.dry_run)),
    )
        .into_response())
}

async fn delete_deployment(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(path): Path<DeploymentPath>,
) -> Result<Response, ApiError> {
    let commit = state
        .deployments()
        .delete(&path.name, &path.namespace, &path.stage)
        .await
        .map_err(|e| ApiError::from_deployment(e, &ctx.request_id))?;

    Ok((
        StatusCode::OK,
        Json(DeleteResponse {
            commit: commit.into(),
        }),
    )
        .into_response())
}

async fn update_status(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(path): Path<DeploymentPath>,
    body: Result<Json<DeploymentStatus>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(status) = body.map_err(|e| {
        ApiError::bad_request("invalid_request", e.body_text()).with_request_id(&ctx.request_id)
    })?;

    let update = state
        .deployments()
        .update_status(&path.name, &path.namespace, &path.stage, &status)
        .await
        .map_err(|e| ApiError::from_deployment(e, &ctx.request_id))?;

    match update {
        StatusUpdate::Updated => {
            Ok((StatusCode::OK, Json(StatusResponse { applied: true })).into_response())
        }
        StatusUpdate::NotApplied => Err(ApiError::conflict(
            "status_stale",
            format!(
                "a status newer than revision {} is already stored",
                status.observed_riser_revision
            ),
        )
        .with_request_id(&ctx.request_id)),
    }
}
