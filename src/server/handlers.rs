use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::VcsError;
use crate::model::diff::VersionComparison;
use crate::model::timeline::VersionTimeline;
use crate::model::version::{
    AutoVersionOutcome, ChangeType, NewVersion, Payload, SaveOutcome, Version,
};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct SaveVersionRequest {
    pub payload: Payload,
    #[serde(default)]
    pub summary: String,
    pub author: Option<String>,
    pub branch: Option<String>,
    pub change_type: Option<ChangeType>,
}

#[derive(Debug, Deserialize)]
pub struct AutoVersionRequest {
    pub payload: Payload,
    pub branch: Option<String>,
    pub author: Option<String>,
    pub threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub target_version: String,
    pub branch: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateBranchRequest {
    pub name: String,
    pub from_branch: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    pub source_branch: String,
    pub target_branch: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    pub branch: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    pub a: String,
    pub b: String,
    pub branch: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompareBranchesQuery {
    pub a: String,
    pub b: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<VcsError> for ApiError {
    fn from(err: VcsError) -> Self {
        let status = match &err {
            VcsError::VersionNotFound { .. }
            | VcsError::NoHistory { .. }
            | VcsError::BranchSourceMissing { .. } => StatusCode::NOT_FOUND,
            VcsError::DuplicateVersion { .. } | VcsError::BranchAlreadyExists { .. } => {
                StatusCode::CONFLICT
            }
            VcsError::InvalidPayload(_) => StatusCode::UNPROCESSABLE_ENTITY,
            VcsError::InvalidVersion(_) | VcsError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

fn save_response(outcome: SaveOutcome) -> (StatusCode, Json<SaveOutcome>) {
    let status = if outcome.is_created() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    (status, Json(outcome))
}

pub async fn save_version(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
    Json(request): Json<SaveVersionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut new_version = NewVersion::new(listing_id, request.payload).with_summary(request.summary);
    if let Some(author) = request.author {
        new_version = new_version.with_author(author);
    }
    if let Some(branch) = request.branch {
        new_version = new_version.with_branch(branch);
    }
    if let Some(change_type) = request.change_type {
        new_version = new_version.with_change_type(change_type);
    }

    let outcome = state.manager.save_version(new_version).await?;
    Ok(save_response(outcome))
}

pub async fn auto_version(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
    Json(request): Json<AutoVersionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = state.manager.settings();
    let branch = request.branch.unwrap_or_else(|| settings.default_branch.clone());
    let author = request.author.unwrap_or_else(|| settings.default_author.clone());

    let outcome = state
        .manager
        .auto_version(&listing_id, request.payload, &branch, &author, request.threshold)
        .await?;

    let status = match outcome {
        AutoVersionOutcome::Created { .. } => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

pub async fn latest(
    State(state): State<AppState>,
    Path((listing_id, branch)): Path<(String, String)>,
) -> Result<Json<Version>, ApiError> {
    let version = state
        .manager
        .get_latest(&listing_id, &branch)
        .await?
        .ok_or(VcsError::NoHistory { listing_id, branch })?;
    Ok(Json(version))
}

pub async fn get_version(
    State(state): State<AppState>,
    Path((listing_id, branch, version_id)): Path<(String, String, String)>,
) -> Result<Json<Version>, ApiError> {
    let version = state
        .manager
        .get_version(&listing_id, &version_id, &branch)
        .await?
        .ok_or(VcsError::VersionNotFound {
            listing_id,
            branch,
            version_id,
        })?;
    Ok(Json(version))
}

pub async fn timeline(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
    Query(query): Query<TimelineQuery>,
) -> Result<Json<VersionTimeline>, ApiError> {
    let timeline = state
        .manager
        .get_timeline(&listing_id, query.branch.as_deref(), query.limit)
        .await?;
    Ok(Json(timeline))
}

pub async fn export(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
    Query(query): Query<TimelineQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let body = state
        .manager
        .export_timeline(&listing_id, query.branch.as_deref())
        .await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body))
}

pub async fn branches(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.manager.get_branches(&listing_id).await?))
}

pub async fn create_branch(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
    Json(request): Json<CreateBranchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = state.manager.settings();
    let from_branch = request
        .from_branch
        .unwrap_or_else(|| settings.default_branch.clone());
    let author = request.author.unwrap_or_else(|| settings.default_author.clone());

    let version = state
        .manager
        .create_branch(&listing_id, &request.name, &from_branch, &author)
        .await?;
    Ok((StatusCode::CREATED, Json(version)))
}

pub async fn compare(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
    Query(query): Query<CompareQuery>,
) -> Result<Json<VersionComparison>, ApiError> {
    let branch = query
        .branch
        .unwrap_or_else(|| state.manager.default_branch().to_string());
    let comparison = state
        .manager
        .compare(&listing_id, &query.a, &query.b, &branch)
        .await?;
    Ok(Json(comparison))
}

pub async fn compare_branches(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
    Query(query): Query<CompareBranchesQuery>,
) -> Result<Json<VersionComparison>, ApiError> {
    let comparison = state
        .manager
        .compare_branches(&listing_id, &query.a, &query.b)
        .await?;
    Ok(Json(comparison))
}

pub async fn rollback(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
    Json(request): Json<RollbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = state.manager.settings();
    let branch = request.branch.unwrap_or_else(|| settings.default_branch.clone());
    let author = request.author.unwrap_or_else(|| settings.default_author.clone());

    let outcome = state
        .manager
        .rollback(&listing_id, &request.target_version, &branch, &author)
        .await?;
    Ok(save_response(outcome))
}

pub async fn merge(
    State(state): State<AppState>,
    Path(listing_id): Path<String>,
    Json(request): Json<MergeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = state.manager.settings();
    let target_branch = request
        .target_branch
        .unwrap_or_else(|| settings.default_branch.clone());
    let author = request.author.unwrap_or_else(|| settings.default_author.clone());

    let outcome = state
        .manager
        .merge_branch(&listing_id, &request.source_branch, &target_branch, &author)
        .await?;
    Ok(save_response(outcome))
}
