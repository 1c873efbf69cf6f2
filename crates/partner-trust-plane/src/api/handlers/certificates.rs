//! Certificate upload, download and revocation handlers

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use partner_trust_core::{
    decode, decode_any, CertificateEntry, CertificateIdentity, CertificateRole, PartnerDomain,
};

use super::{caller_from_headers, require_partner_or_admin, AppState};
use crate::api::error::ApiError;
use crate::registry::{Revocation, StoredCertificate};

/// Request to upload a root or sub-CA certificate
#[derive(Debug, Deserialize)]
pub struct UploadCaCertificateRequest {
    /// PEM text or base64 of the binary certificate
    pub certificate: String,

    /// Expected partner domain; must match the certificate if given
    #[serde(default)]
    pub partner_domain: Option<String>,
}

/// Request to upload a partner leaf certificate
#[derive(Debug, Deserialize)]
pub struct UploadPartnerCertificateRequest {
    pub partner_id: String,

    /// PEM text or base64 of the binary certificate
    pub certificate: String,

    #[serde(default)]
    pub partner_domain: Option<String>,
}

/// Response from a successful upload
#[derive(Debug, Serialize)]
pub struct UploadCertificateResponse {
    pub status: String,
    pub identity: CertificateIdentity,
    pub subject_name: String,
    pub role: CertificateRole,
    pub partner_domain: PartnerDomain,
}

impl UploadCertificateResponse {
    fn committed(entry: &CertificateEntry) -> Self {
        Self {
            status: "committed".into(),
            identity: entry.identity(),
            subject_name: entry.subject_name.clone(),
            role: entry.role,
            partner_domain: entry.partner_domain.clone(),
        }
    }
}

/// Identity of a certificate in a request body
#[derive(Debug, Deserialize)]
pub struct CertificateIdentityRequest {
    pub issuer_name: String,
    pub serial_number: String,
}

impl From<CertificateIdentityRequest> for CertificateIdentity {
    fn from(req: CertificateIdentityRequest) -> Self {
        CertificateIdentity::new(req.issuer_name, req.serial_number)
    }
}

/// Request to revoke a certificate
#[derive(Debug, Deserialize)]
pub struct RevokeCertificateRequest {
    pub issuer_name: String,
    pub serial_number: String,
    pub reason: String,
}

/// A stored certificate with its registry metadata
#[derive(Debug, Serialize)]
pub struct CertificateResponse {
    pub identity: CertificateIdentity,
    pub subject_name: String,
    pub role: CertificateRole,
    pub partner_domain: PartnerDomain,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub committed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation: Option<Revocation>,
    /// PEM encoding
    pub certificate: String,
}

impl TryFrom<StoredCertificate> for CertificateResponse {
    type Error = ApiError;

    fn try_from(stored: StoredCertificate) -> Result<Self, Self::Error> {
        let certificate = stored.entry.to_pem()?;
        let entry = stored.entry;
        Ok(Self {
            identity: entry.identity(),
            subject_name: entry.subject_name,
            role: entry.role,
            partner_domain: entry.partner_domain,
            not_before: entry.not_before,
            not_after: entry.not_after,
            committed_at: stored.committed_at,
            owner: stored.owner,
            revocation: stored.revocation,
            certificate,
        })
    }
}

/// A partner's current certificate
#[derive(Debug, Serialize)]
pub struct PartnerCertificateResponse {
    pub partner_id: String,
    #[serde(flatten)]
    pub certificate: CertificateResponse,
}

/// Decode a certificate given as PEM text or base64 binary
fn decode_upload(certificate: &str) -> Result<CertificateEntry, ApiError> {
    let trimmed = certificate.trim();
    if trimmed.starts_with("-----BEGIN") {
        return Ok(decode_any(trimmed.as_bytes())?);
    }
    let bytes = STANDARD.decode(trimmed)?;
    Ok(decode(&bytes)?)
}

fn check_domain(entry: &CertificateEntry, expected: Option<&str>) -> Result<(), ApiError> {
    match expected {
        Some(domain) if domain != entry.partner_domain.as_str() => Err(ApiError::BadRequest(format!(
            "Certificate is for domain '{}', not '{}'",
            entry.partner_domain, domain
        ))),
        _ => Ok(()),
    }
}

/// Upload a root or sub-CA certificate
///
/// POST /v1/certificates/ca
pub async fn upload_ca_certificate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<UploadCaCertificateRequest>,
) -> Result<(StatusCode, Json<UploadCertificateResponse>), ApiError> {
    let caller = caller_from_headers(&headers)?;
    if !caller.is_approver() {
        warn!(caller = %caller.id, "SECURITY: Rejected CA upload by non-manager");
        return Err(ApiError::Forbidden(
            "Only partner managers may upload CA certificates".into(),
        ));
    }

    let entry = decode_upload(&request.certificate)?;
    check_domain(&entry, request.partner_domain.as_deref())?;
    if !entry.role.is_ca() {
        return Err(ApiError::BadRequest(
            "Partner leaf certificates must be uploaded as partner certificates".into(),
        ));
    }

    state.registry.admit(entry.clone(), Utc::now())?;

    info!(
        caller = %caller.id,
        identity = %entry.identity(),
        role = %entry.role,
        "CA certificate uploaded"
    );

    Ok((StatusCode::CREATED, Json(UploadCertificateResponse::committed(&entry))))
}

/// Upload a partner leaf certificate
///
/// POST /v1/certificates/partner
pub async fn upload_partner_certificate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<UploadPartnerCertificateRequest>,
) -> Result<(StatusCode, Json<UploadCertificateResponse>), ApiError> {
    let caller = caller_from_headers(&headers)?;
    require_partner_or_admin(&caller, &request.partner_id)?;

    let entry = decode_upload(&request.certificate)?;
    check_domain(&entry, request.partner_domain.as_deref())?;

    state
        .registry
        .admit_partner_certificate(entry.clone(), &request.partner_id, Utc::now())?;

    info!(
        partner_id = %request.partner_id,
        identity = %entry.identity(),
        "Partner certificate uploaded"
    );

    Ok((StatusCode::CREATED, Json(UploadCertificateResponse::committed(&entry))))
}

/// Download a partner's current certificate
///
/// GET /v1/partners/{partner_id}/certificate
pub async fn get_partner_certificate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(partner_id): Path<String>,
) -> Result<Json<PartnerCertificateResponse>, ApiError> {
    caller_from_headers(&headers)?;

    let stored = state.registry.partner_certificate(&partner_id).ok_or_else(|| {
        ApiError::NotFound(format!("No active certificate for partner '{}'", partner_id))
    })?;

    Ok(Json(PartnerCertificateResponse {
        partner_id,
        certificate: stored.try_into()?,
    }))
}

/// Look up a certificate by identity, including revoked ones
///
/// POST /v1/certificates/lookup
pub async fn lookup_certificate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CertificateIdentityRequest>,
) -> Result<Json<CertificateResponse>, ApiError> {
    caller_from_headers(&headers)?;

    let identity: CertificateIdentity = request.into();
    let stored = state.registry.lookup_by_identity(&identity)?;
    Ok(Json(stored.try_into()?))
}

/// Revoke a certificate
///
/// POST /v1/certificates/revoke
pub async fn revoke_certificate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RevokeCertificateRequest>,
) -> Result<Json<CertificateResponse>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    if !caller.is_admin() {
        warn!(caller = %caller.id, "SECURITY: Rejected certificate revocation by non-admin");
        return Err(ApiError::Forbidden("Only administrators may revoke certificates".into()));
    }

    let identity = CertificateIdentity::new(request.issuer_name, request.serial_number);
    let stored = state.registry.revoke(&identity, &request.reason)?;
    Ok(Json(stored.try_into()?))
}
