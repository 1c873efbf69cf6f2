//! API error types and responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use partner_trust_core::{CertificateError, WorkflowError};

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

/// API error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Certificate(err) => match err {
                CertificateError::Malformed { .. } => StatusCode::BAD_REQUEST,
                CertificateError::Expired { .. }
                | CertificateError::UnknownIssuer { .. }
                | CertificateError::ChainBroken { .. }
                | CertificateError::UntrustedSelfSigned { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                CertificateError::Duplicate { .. } | CertificateError::RegistryConflict { .. } => {
                    StatusCode::CONFLICT
                }
                CertificateError::NotFound { .. } => StatusCode::NOT_FOUND,
            },
            ApiError::Workflow(err) => match err {
                WorkflowError::RequestNotFound { .. } => StatusCode::NOT_FOUND,
                WorkflowError::NotAuthorized { .. } => StatusCode::FORBIDDEN,
                WorkflowError::InvalidStateTransition { .. }
                | WorkflowError::DuplicateRequest { .. }
                | WorkflowError::KeyUnavailable { .. } => StatusCode::CONFLICT,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Certificate(err) => err.code(),
            ApiError::Workflow(err) => err.code(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ApiError::Certificate(err) => certificate_details(err),
            ApiError::Workflow(err) => Some(workflow_details(err)),
            _ => None,
        }
    }
}

fn certificate_details(err: &CertificateError) -> Option<serde_json::Value> {
    let details = match err {
        CertificateError::Malformed { .. } => return None,
        CertificateError::Expired {
            identity,
            not_before,
            not_after,
        } => serde_json::json!({
            "identity": identity,
            "not_before": not_before,
            "not_after": not_after,
        }),
        CertificateError::UnknownIssuer { issuer, domain } => serde_json::json!({
            "issuer": issuer,
            "partner_domain": domain,
        }),
        CertificateError::ChainBroken { identity, reason } => serde_json::json!({
            "identity": identity,
            "reason": reason,
        }),
        CertificateError::Duplicate { identity }
        | CertificateError::UntrustedSelfSigned { identity }
        | CertificateError::RegistryConflict { identity }
        | CertificateError::NotFound { identity } => serde_json::json!({ "identity": identity }),
    };
    Some(details)
}

fn workflow_details(err: &WorkflowError) -> serde_json::Value {
    match err {
        WorkflowError::InvalidStateTransition {
            request_id,
            from,
            event,
        } => serde_json::json!({
            "request_id": request_id,
            "state": from,
            "event": event.name(),
        }),
        WorkflowError::RequestNotFound { request_id } => {
            serde_json::json!({ "request_id": request_id })
        }
        WorkflowError::NotAuthorized { caller, action } => serde_json::json!({
            "caller": caller,
            "action": action,
        }),
        WorkflowError::DuplicateRequest {
            partner_id,
            policy_id,
            existing,
        } => serde_json::json!({
            "partner_id": partner_id,
            "policy_id": policy_id,
            "existing_request_id": existing,
        }),
        WorkflowError::KeyUnavailable { request_id, state } => serde_json::json!({
            "request_id": request_id,
            "state": state,
        }),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
            details: self.details(),
        };

        (self.status(), Json(body)).into_response()
    }
}

impl From<base64::DecodeError> for ApiError {
    fn from(err: base64::DecodeError) -> Self {
        ApiError::BadRequest(format!("Invalid base64 encoding: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partner_trust_core::{CertificateIdentity, RequestEvent, RequestState};

    #[test]
    fn test_certificate_statuses() {
        let identity = CertificateIdentity::new("CN=Root", "01");
        assert_eq!(
            ApiError::from(CertificateError::malformed("bad")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(CertificateError::Duplicate { identity: identity.clone() }).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(CertificateError::UntrustedSelfSigned { identity }).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_workflow_details_name_request() {
        let err = ApiError::from(WorkflowError::InvalidStateTransition {
            request_id: "req-9".into(),
            from: RequestState::Rejected,
            event: RequestEvent::Approve,
        });
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");

        let details = err.details().unwrap();
        assert_eq!(details["request_id"], "req-9");
        assert_eq!(details["state"], "Rejected");
        assert_eq!(details["event"], "approve");
    }

    #[test]
    fn test_not_authorized_is_forbidden() {
        let err = ApiError::from(WorkflowError::NotAuthorized {
            caller: "P2".into(),
            action: "download this API key".into(),
        });
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }
}
