//! Trust-chain validation
//!
//! Decides whether a candidate certificate may be admitted to the registry:
//! either a valid self-signed root, or a certificate whose issuer is already
//! trusted in the same partner domain. Validation never crosses domains, so
//! a sub-CA trusted for one partner category cannot vouch for another.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, warn};

use partner_trust_core::{
    CertificateEntry, CertificateError, CertificateIdentity, CertificateRole, PartnerDomain,
};

/// Default bound on issuer links walked from a partner leaf to its root
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 8;

/// Read-only view of trusted certificates used during validation
pub trait TrustView {
    /// Whether any certificate (active or revoked) has this identity
    fn contains_identity(&self, identity: &CertificateIdentity) -> bool;

    /// Active (non-revoked) certificates in `domain` whose subject is `subject`
    fn active_by_subject(&self, subject: &str, domain: &PartnerDomain) -> Vec<&CertificateEntry>;
}

/// Validates candidate certificates against a registry view
#[derive(Debug, Clone, Copy)]
pub struct TrustChainValidator {
    max_chain_depth: usize,
}

impl Default for TrustChainValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHAIN_DEPTH)
    }
}

impl TrustChainValidator {
    /// Create a validator walking at most `max_chain_depth` issuer links
    pub fn new(max_chain_depth: usize) -> Self {
        Self {
            max_chain_depth: max_chain_depth.max(1),
        }
    }

    pub fn max_chain_depth(&self) -> usize {
        self.max_chain_depth
    }

    /// Check whether `candidate` is admissible
    ///
    /// # Returns
    /// * `Ok(())` if the candidate may be committed
    /// * `Err(Expired)` if `now` is outside the validity window
    /// * `Err(Duplicate)` if the identity is already registered
    /// * `Err(UntrustedSelfSigned)` for a root that does not verify itself
    /// * `Err(UnknownIssuer)` if no trusted certificate carries the issuer name
    /// * `Err(ChainBroken)` if no issuer verifies the signature or a partner
    ///   leaf does not reach a root within the depth bound
    pub fn validate<V: TrustView>(
        &self,
        candidate: &CertificateEntry,
        view: &V,
        now: DateTime<Utc>,
    ) -> Result<(), CertificateError> {
        let identity = candidate.identity();

        if !candidate.is_valid_at(now) {
            warn!(
                identity = %identity,
                not_before = %candidate.not_before,
                not_after = %candidate.not_after,
                "Rejected certificate outside its validity window"
            );
            return Err(CertificateError::Expired {
                identity,
                not_before: candidate.not_before.to_rfc3339(),
                not_after: candidate.not_after.to_rfc3339(),
            });
        }

        if view.contains_identity(&identity) {
            return Err(CertificateError::Duplicate { identity });
        }

        match candidate.role {
            CertificateRole::Root => self.validate_root(candidate),
            CertificateRole::SubCa => self.verified_issuers(candidate, view).map(|_| ()),
            CertificateRole::PartnerLeaf => {
                let issuers = self.verified_issuers(candidate, view)?;
                self.walk_to_root(candidate, issuers, view)
            }
        }
    }

    fn validate_root(&self, candidate: &CertificateEntry) -> Result<(), CertificateError> {
        if candidate.is_self_issued() && candidate.verify_issued_by_entry(candidate) {
            return Ok(());
        }

        warn!(
            identity = %candidate.identity(),
            subject = %candidate.subject_name,
            "SECURITY: Root certificate is not validly self-signed"
        );
        Err(CertificateError::UntrustedSelfSigned {
            identity: candidate.identity(),
        })
    }

    /// Every trusted CA in the candidate's domain whose key verifies it
    fn verified_issuers<'v, V: TrustView>(
        &self,
        candidate: &CertificateEntry,
        view: &'v V,
    ) -> Result<Vec<&'v CertificateEntry>, CertificateError> {
        let named = view.active_by_subject(&candidate.issuer_name, &candidate.partner_domain);

        if named.is_empty() {
            warn!(
                identity = %candidate.identity(),
                domain = %candidate.partner_domain,
                "Rejected certificate with unknown issuer"
            );
            return Err(CertificateError::UnknownIssuer {
                issuer: candidate.issuer_name.clone(),
                domain: candidate.partner_domain.clone(),
            });
        }

        let ca_found = named.iter().any(|issuer| issuer.role.is_ca());
        let verified: Vec<_> = named
            .into_iter()
            .filter(|issuer| issuer.role.is_ca() && candidate.verify_issued_by_entry(issuer))
            .collect();

        if !verified.is_empty() {
            debug!(
                identity = %candidate.identity(),
                issuers = verified.len(),
                "Resolved certificate issuer"
            );
            return Ok(verified);
        }

        let reason = if ca_found {
            format!("signature does not verify against any '{}'", candidate.issuer_name)
        } else {
            format!("issuer '{}' is not a certificate authority", candidate.issuer_name)
        };
        warn!(identity = %candidate.identity(), reason = %reason, "SECURITY: Chain broken");
        Err(CertificateError::ChainBroken {
            identity: candidate.identity(),
            reason,
        })
    }

    /// Search the issuer graph above a leaf for any path to a root
    ///
    /// Every verifying issuer is tried at each level, so a dead branch (for
    /// example a cross-signed intermediate whose parent was revoked) does not
    /// hide a live one.
    fn walk_to_root<V: TrustView>(
        &self,
        leaf: &CertificateEntry,
        issuers: Vec<&CertificateEntry>,
        view: &V,
    ) -> Result<(), CertificateError> {
        let mut path = HashSet::from([leaf.identity()]);
        let mut failure = None;

        for issuer in issuers {
            match self.search(issuer, 1, &mut path, view) {
                Ok(()) => return Ok(()),
                Err(reason) => {
                    failure.get_or_insert(reason);
                }
            }
        }

        let reason = failure.unwrap_or_else(|| "no issuer path".to_string());
        warn!(identity = %leaf.identity(), reason = %reason, "SECURITY: Chain broken");
        Err(CertificateError::ChainBroken {
            identity: leaf.identity(),
            reason,
        })
    }

    /// Depth-first step of [`walk_to_root`](Self::walk_to_root); `path` holds
    /// the identities on the current branch
    fn search<V: TrustView>(
        &self,
        current: &CertificateEntry,
        depth: usize,
        path: &mut HashSet<CertificateIdentity>,
        view: &V,
    ) -> Result<(), String> {
        if current.role == CertificateRole::Root {
            return Ok(());
        }
        let identity = current.identity();
        if !path.insert(identity.clone()) {
            return Err(format!("cycle at {}", identity));
        }

        let result = if depth >= self.max_chain_depth {
            Err(format!("no root within {} issuer links", self.max_chain_depth))
        } else {
            let mut failure = None;
            let found = view
                .active_by_subject(&current.issuer_name, &current.partner_domain)
                .into_iter()
                .filter(|parent| parent.role.is_ca() && current.verify_issued_by_entry(parent))
                .any(|parent| match self.search(parent, depth + 1, path, view) {
                    Ok(()) => true,
                    Err(reason) => {
                        failure.get_or_insert(reason);
                        false
                    }
                });

            if found {
                Ok(())
            } else {
                Err(failure.unwrap_or_else(|| format!("no trusted issuer verifies {}", identity)))
            }
        };

        path.remove(&identity);
        result
    }
}
