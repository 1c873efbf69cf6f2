//! Error types for the partner trust plane
//!
//! Certificate-side and workflow-side failures are kept in separate enums so
//! that each operation reports only the kinds it can actually produce. Every
//! variant names the entity that caused it and exposes a stable `code()`.

use thiserror::Error;

use crate::lifecycle::{RequestEvent, RequestState};
use crate::types::{CertificateIdentity, PartnerDomain};

/// Result type alias using CertificateError
pub type Result<T> = std::result::Result<T, CertificateError>;

/// Errors raised while decoding, validating or storing certificates
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CertificateError {
    /// Input could not be decoded into a certificate
    #[error("Malformed certificate: {reason}")]
    Malformed { reason: String },

    /// Certificate is outside its validity window
    #[error("Certificate {identity} is not valid now (valid {not_before} to {not_after})")]
    Expired {
        identity: CertificateIdentity,
        not_before: String,
        not_after: String,
    },

    /// A certificate with the same identity is already registered
    #[error("Certificate {identity} is already registered")]
    Duplicate { identity: CertificateIdentity },

    /// No trusted certificate in the domain has the candidate's issuer as subject
    #[error("Unknown issuer '{issuer}' in domain {domain}")]
    UnknownIssuer { issuer: String, domain: PartnerDomain },

    /// The issuer was found but the chain does not verify up to a root
    #[error("Chain broken for {identity}: {reason}")]
    ChainBroken {
        identity: CertificateIdentity,
        reason: String,
    },

    /// A root certificate is not self-signed or its signature does not verify
    #[error("Root certificate {identity} is not a valid self-signed certificate")]
    UntrustedSelfSigned { identity: CertificateIdentity },

    /// The registry changed between validation and commit
    #[error("Registry conflict while committing {identity}")]
    RegistryConflict { identity: CertificateIdentity },

    /// No certificate with this identity exists
    #[error("Certificate {identity} not found")]
    NotFound { identity: CertificateIdentity },
}

impl CertificateError {
    /// Shorthand for a decoding failure
    pub fn malformed(reason: impl Into<String>) -> Self {
        CertificateError::Malformed {
            reason: reason.into(),
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            CertificateError::Malformed { .. } => "MALFORMED_CERTIFICATE",
            CertificateError::Expired { .. } => "EXPIRED_CERTIFICATE",
            CertificateError::Duplicate { .. } => "DUPLICATE_CERTIFICATE",
            CertificateError::UnknownIssuer { .. } => "UNKNOWN_ISSUER",
            CertificateError::ChainBroken { .. } => "CHAIN_BROKEN",
            CertificateError::UntrustedSelfSigned { .. } => "UNTRUSTED_SELF_SIGNED",
            CertificateError::RegistryConflict { .. } => "REGISTRY_CONFLICT",
            CertificateError::NotFound { .. } => "CERTIFICATE_NOT_FOUND",
        }
    }
}

/// Errors raised by the API-key request workflow
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// The event is not allowed from the request's current state
    #[error("Request {request_id}: cannot {event} from state {from}")]
    InvalidStateTransition {
        request_id: String,
        from: RequestState,
        event: RequestEvent,
    },

    /// No request with this id exists
    #[error("API key request {request_id} not found")]
    RequestNotFound { request_id: String },

    /// The caller may not perform this action
    #[error("Caller '{caller}' is not authorized to {action}")]
    NotAuthorized { caller: String, action: String },

    /// An open request already exists for the partner/policy pair
    #[error("Partner '{partner_id}' already has open request {existing} for policy '{policy_id}'")]
    DuplicateRequest {
        partner_id: String,
        policy_id: String,
        existing: String,
    },

    /// The request has no downloadable key in its current state
    #[error("Request {request_id} has no key available in state {state}")]
    KeyUnavailable {
        request_id: String,
        state: RequestState,
    },
}

impl WorkflowError {
    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            WorkflowError::RequestNotFound { .. } => "REQUEST_NOT_FOUND",
            WorkflowError::NotAuthorized { .. } => "NOT_AUTHORIZED",
            WorkflowError::DuplicateRequest { .. } => "DUPLICATE_REQUEST",
            WorkflowError::KeyUnavailable { .. } => "KEY_NOT_AVAILABLE",
        }
    }
}

/// Errors from key handling and signature verification
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidKey(String),

    #[error("Invalid signature encoding: {0}")]
    InvalidSignature(String),

    #[error("Signature verification failed")]
    VerificationFailed,
}

impl From<ed25519_dalek::SignatureError> for CryptoError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        CryptoError::InvalidKey(err.to_string())
    }
}

impl From<coset::CoseError> for CertificateError {
    fn from(err: coset::CoseError) -> Self {
        CertificateError::malformed(format!("invalid COSE structure: {:?}", err))
    }
}

impl From<serde_json::Error> for CertificateError {
    fn from(err: serde_json::Error) -> Self {
        CertificateError::malformed(format!("invalid certificate body: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        let identity = CertificateIdentity::new("CN=Root", "01");
        assert_eq!(
            CertificateError::Duplicate { identity: identity.clone() }.code(),
            "DUPLICATE_CERTIFICATE"
        );
        assert_eq!(
            CertificateError::RegistryConflict { identity }.code(),
            "REGISTRY_CONFLICT"
        );
        assert_eq!(
            WorkflowError::RequestNotFound { request_id: "r-1".into() }.code(),
            "REQUEST_NOT_FOUND"
        );
    }

    #[test]
    fn test_error_message_names_entity() {
        let err = CertificateError::Duplicate {
            identity: CertificateIdentity::new("CN=Partner Root", "0a1b"),
        };
        assert!(err.to_string().contains("CN=Partner Root"));
        assert!(err.to_string().contains("0a1b"));

        let err = WorkflowError::InvalidStateTransition {
            request_id: "req-7".into(),
            from: RequestState::Rejected,
            event: RequestEvent::Approve,
        };
        assert_eq!(err.to_string(), "Request req-7: cannot approve from state Rejected");
    }
}
