//! Core logic for the Trust Plane

mod validation;

pub use validation::{TrustChainValidator, TrustView, DEFAULT_MAX_CHAIN_DEPTH};
