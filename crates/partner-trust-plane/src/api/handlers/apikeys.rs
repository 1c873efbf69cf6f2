//! API-key request handlers
//!
//! Partners submit requests and download keys; partner managers decide;
//! administrators revoke.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use partner_trust_core::WorkflowError;

use super::{caller_from_headers, require_partner_or_admin, AppState};
use crate::api::error::ApiError;
use crate::workflow::{ApiKeyRequest, KeyMaterialRef};

/// Request to submit an API-key request
#[derive(Debug, Deserialize)]
pub struct SubmitApiKeyRequest {
    pub policy_id: String,
    #[serde(default)]
    pub use_case_description: String,
}

/// Request to reject an API-key request
#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

/// A partner's requests, oldest first
#[derive(Debug, Serialize)]
pub struct ListRequestsResponse {
    pub partner_id: String,
    pub requests: Vec<ApiKeyRequest>,
    pub count: usize,
}

/// Response from key generation
#[derive(Debug, Serialize)]
pub struct GenerateKeyResponse {
    pub request_id: String,
    pub key_material_ref: KeyMaterialRef,
    /// Raw key; only present on the call that generated it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Response from key download
#[derive(Debug, Serialize)]
pub struct DownloadKeyResponse {
    pub request_id: String,
    pub partner_id: String,
    pub api_key: String,
}

/// Submit an API-key request for a policy
///
/// POST /v1/partners/{partner_id}/apikey-requests
pub async fn submit_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(partner_id): Path<String>,
    Json(request): Json<SubmitApiKeyRequest>,
) -> Result<(StatusCode, Json<ApiKeyRequest>), ApiError> {
    let caller = caller_from_headers(&headers)?;
    require_partner_or_admin(&caller, &partner_id)?;

    if request.policy_id.trim().is_empty() {
        return Err(ApiError::BadRequest("Policy ID cannot be empty".into()));
    }

    let created = state.workflow.submit(
        &partner_id,
        &request.policy_id,
        &request.use_case_description,
    )?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// List a partner's API-key requests
///
/// GET /v1/partners/{partner_id}/apikey-requests
pub async fn list_requests(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(partner_id): Path<String>,
) -> Result<Json<ListRequestsResponse>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    if !caller.is_approver() {
        require_partner_or_admin(&caller, &partner_id)?;
    }

    let requests: Vec<ApiKeyRequest> = state.workflow.list_by_partner(&partner_id).iter().collect();
    let count = requests.len();

    Ok(Json(ListRequestsResponse {
        partner_id,
        requests,
        count,
    }))
}

/// Retrieve one API-key request
///
/// GET /v1/apikey-requests/{id}
pub async fn get_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> Result<Json<ApiKeyRequest>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let request = state.workflow.retrieve(&request_id)?;
    if !caller.is_approver() && !caller.acts_for(&request.partner_id) {
        // Do not reveal other partners' requests
        return Err(WorkflowError::RequestNotFound { request_id }.into());
    }
    Ok(Json(request))
}

/// Approve a submitted request
///
/// POST /v1/apikey-requests/{id}/approve
pub async fn approve_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> Result<Json<ApiKeyRequest>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    Ok(Json(state.workflow.approve(&request_id, &caller)?))
}

/// Reject a submitted request
///
/// POST /v1/apikey-requests/{id}/reject
pub async fn reject_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
    Json(body): Json<RejectRequest>,
) -> Result<Json<ApiKeyRequest>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    Ok(Json(state.workflow.reject(&request_id, &caller, &body.reason)?))
}

/// Revoke a rejected or key-holding request
///
/// POST /v1/apikey-requests/{id}/revoke
pub async fn revoke_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> Result<Json<ApiKeyRequest>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    Ok(Json(state.workflow.revoke(&request_id, &caller)?))
}

/// Generate the key for an approved request
///
/// POST /v1/apikey-requests/{id}/key
pub async fn generate_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> Result<Json<GenerateKeyResponse>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let issued = state.workflow.generate_key(&request_id, &caller)?;

    Ok(Json(GenerateKeyResponse {
        request_id,
        key_material_ref: issued.key_ref,
        api_key: issued.raw_key.map(|key| key.expose().to_string()),
    }))
}

/// Download the key of a partner's request
///
/// GET /v1/partners/{partner_id}/apikey-requests/{id}/key
pub async fn download_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((partner_id, request_id)): Path<(String, String)>,
) -> Result<Json<DownloadKeyResponse>, ApiError> {
    let caller = caller_from_headers(&headers)?;

    let request = state.workflow.retrieve(&request_id)?;
    if request.partner_id != partner_id {
        return Err(WorkflowError::RequestNotFound { request_id }.into());
    }

    let material = state.workflow.download(&request_id, &caller)?;
    Ok(Json(DownloadKeyResponse {
        request_id,
        partner_id,
        api_key: material.expose().to_string(),
    }))
}
