//! Partner Trust Plane
//!
//! Service that decides which partner certificates are trusted and gates
//! API-key issuance for partners:
//! - Validates uploaded CA and partner certificates against the chains
//!   already trusted in the same partner domain
//! - Keeps a tombstoning registry of trusted certificates
//! - Drives API-key requests through submit, decision, key generation and
//!   revocation, issuing key material exactly once per request
//!
//! ## API Endpoints
//!
//! ### Certificates
//! - `POST /v1/certificates/ca` - Upload a root or sub-CA certificate
//! - `POST /v1/certificates/partner` - Upload a partner leaf certificate
//! - `GET /v1/partners/{partner_id}/certificate` - Download a partner's certificate
//! - `POST /v1/certificates/lookup` - Look up a certificate by issuer and serial
//! - `POST /v1/certificates/revoke` - Revoke a certificate
//!
//! ### API keys
//! - `POST /v1/partners/{partner_id}/apikey-requests` - Submit a request
//! - `GET /v1/partners/{partner_id}/apikey-requests` - List a partner's requests
//! - `GET /v1/apikey-requests/{id}` - Retrieve a request
//! - `POST /v1/apikey-requests/{id}/approve`, `/reject`, `/revoke` - Decide or revoke
//! - `POST /v1/apikey-requests/{id}/key` - Generate the key
//! - `GET /v1/partners/{partner_id}/apikey-requests/{id}/key` - Download the key

pub mod api;
pub mod config;
pub mod core;
pub mod events;
pub mod registry;
pub mod workflow;

pub use api::create_router;
pub use api::handlers::AppState;
pub use config::{ConfigError, PlaneConfig};
pub use crate::core::{TrustChainValidator, TrustView};
pub use events::{EventModel, EventSink, MemoryEventSink, Topic, TracingEventSink};
pub use registry::{CertificateRegistry, RegistrySnapshot, StoredCertificate};
pub use workflow::{ApiKeyIssuer, ApiKeyRequest, ApiKeyRequestWorkflow, IssuedKey};

use std::sync::Arc;

impl AppState {
    /// Build the registry and workflow from configuration
    pub fn from_config(config: PlaneConfig, events: Arc<dyn EventSink>) -> Self {
        let registry = CertificateRegistry::new(
            TrustChainValidator::new(config.max_chain_depth),
            events.clone(),
        );
        let workflow = ApiKeyRequestWorkflow::new(ApiKeyIssuer::new(config.apikey_length), events);

        Self {
            registry,
            workflow,
            config,
        }
    }
}
