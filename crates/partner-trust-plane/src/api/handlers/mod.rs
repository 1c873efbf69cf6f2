//! API request handlers

pub mod apikeys;
pub mod certificates;

use axum::http::HeaderMap;

use partner_trust_core::{Caller, CallerRole};

use crate::api::error::ApiError;
use crate::config::PlaneConfig;
use crate::registry::CertificateRegistry;
use crate::workflow::ApiKeyRequestWorkflow;

pub use apikeys::{
    approve_request, download_key, generate_key, get_request, list_requests, reject_request,
    revoke_request, submit_request, DownloadKeyResponse, GenerateKeyResponse,
    ListRequestsResponse, RejectRequest, SubmitApiKeyRequest,
};
pub use certificates::{
    get_partner_certificate, lookup_certificate, revoke_certificate, upload_ca_certificate,
    upload_partner_certificate, CertificateIdentityRequest, CertificateResponse,
    PartnerCertificateResponse, RevokeCertificateRequest, UploadCaCertificateRequest,
    UploadCertificateResponse, UploadPartnerCertificateRequest,
};

/// Header carrying the authenticated caller id
pub const CALLER_ID_HEADER: &str = "x-caller-id";
/// Header carrying the caller role: `partner`, `partner_manager` or `admin`
pub const CALLER_ROLE_HEADER: &str = "x-caller-role";
/// Header carrying the partner id for `partner` callers
pub const PARTNER_ID_HEADER: &str = "x-partner-id";

/// Application state shared across handlers
#[derive(Debug)]
pub struct AppState {
    pub registry: CertificateRegistry,
    pub workflow: ApiKeyRequestWorkflow,
    pub config: PlaneConfig,
}

/// Caller identity as asserted by the upstream gateway
///
/// Partner callers without `x-partner-id` act for the partner named by
/// their caller id.
pub fn caller_from_headers(headers: &HeaderMap) -> Result<Caller, ApiError> {
    let header = |name: &str| -> Result<Option<String>, ApiError> {
        match headers.get(name) {
            None => Ok(None),
            Some(value) => value
                .to_str()
                .map(|v| Some(v.trim().to_string()))
                .map_err(|_| ApiError::BadRequest(format!("Header {} is not valid text", name))),
        }
    };

    let id = header(CALLER_ID_HEADER)?
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::Unauthorized(format!("Missing {} header", CALLER_ID_HEADER)))?;
    let role = header(CALLER_ROLE_HEADER)?
        .ok_or_else(|| ApiError::Unauthorized(format!("Missing {} header", CALLER_ROLE_HEADER)))?;

    let role = match role.as_str() {
        "partner" => {
            let partner_id = header(PARTNER_ID_HEADER)?
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| id.clone());
            CallerRole::Partner(partner_id)
        }
        "partner_manager" => CallerRole::PartnerManager,
        "admin" => CallerRole::Admin,
        other => {
            return Err(ApiError::BadRequest(format!(
                "Unknown caller role '{}'",
                other
            )))
        }
    };

    Ok(Caller { id, role })
}

/// Partners may act on their own records, administrators on any
pub(crate) fn require_partner_or_admin(caller: &Caller, partner_id: &str) -> Result<(), ApiError> {
    if caller.acts_for(partner_id) || caller.is_admin() {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!(
            "Caller '{}' may not act for partner '{}'",
            caller.id, partner_id
        )))
    }
}
