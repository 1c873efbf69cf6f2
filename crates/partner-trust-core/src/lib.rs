//! # Partner Trust Core
//!
//! Core types and cryptographic primitives for the partner trust plane.
//!
//! ## Key Concepts
//!
//! - **Certificate**: a COSE_Sign1-wrapped, Ed25519-signed statement binding a
//!   subject name and public key to a role (root CA, sub-CA, partner leaf)
//!   within one partner domain
//! - **Identity**: `(issuer name, serial number)`, unique across the registry
//! - **API-key request lifecycle**: the closed state machine gating key issuance
//!
//! ## Modules
//!
//! - [`certificate`]: encode/decode, PEM armoring and the issuing builder
//! - [`crypto`]: Ed25519 key pairs and verification
//! - [`lifecycle`]: pure request transition table
//! - [`error`]: certificate and workflow error taxonomy

pub mod certificate;
pub mod crypto;
pub mod error;
pub mod lifecycle;
pub mod types;

pub use certificate::{decode, decode_any, encode, CertificateBuilder};
pub use crypto::{KeyPair, PublicKey};
pub use error::{CertificateError, CryptoError, Result, WorkflowError};
pub use lifecycle::{transition, Effect, RequestEvent, RequestState, Transition};
pub use types::{
    Caller, CallerRole, CertificateEntry, CertificateIdentity, CertificateRole, PartnerDomain,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
