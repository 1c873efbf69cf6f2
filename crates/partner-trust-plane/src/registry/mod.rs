//! Certificate Registry
//!
//! Durable store of trusted certificates, keyed by identity
//! `(issuer name, serial number)` and indexed by `(domain, subject)` for
//! upward chain traversal. Entries are never mutated or deleted; revocation
//! tombstones an entry so existing chains stay auditable while the entry
//! stops counting as trusted for new validations.
//!
//! Readers take cheap point-in-time snapshots. Writers go through
//! [`CertificateRegistry::commit`], which re-checks uniqueness and the
//! domain's version atomically, so two uploads that validated against the
//! same stale snapshot cannot both commit. [`CertificateRegistry::admit`]
//! validates under the read lock and, if the domain moved on before it
//! reaches the write lock, re-validates against the live partition inside
//! that lock. Unrelated uploads therefore never conflict; only identity
//! collisions and chains broken by a concurrent revoke do.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use partner_trust_core::{
    CertificateEntry, CertificateError, CertificateIdentity, CertificateRole, PartnerDomain,
};

use crate::core::{TrustChainValidator, TrustView};
use crate::events::{EventModel, EventSink, Topic};

/// Revocation record attached to a tombstoned certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Revocation {
    pub revoked_at: DateTime<Utc>,
    pub reason: String,
}

/// A committed certificate together with its registry metadata
#[derive(Debug, Clone)]
pub struct StoredCertificate {
    pub entry: CertificateEntry,
    pub committed_at: DateTime<Utc>,
    /// Partner that uploaded this leaf, if any
    pub owner: Option<String>,
    pub revocation: Option<Revocation>,
}

impl StoredCertificate {
    pub fn is_revoked(&self) -> bool {
        self.revocation.is_some()
    }
}

/// Per-domain certificate counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DomainStats {
    pub active: usize,
    pub revoked: usize,
}

#[derive(Debug, Clone, Default)]
struct RegistryState {
    entries: HashMap<CertificateIdentity, StoredCertificate>,
    by_subject: HashMap<(PartnerDomain, String), Vec<CertificateIdentity>>,
    versions: HashMap<PartnerDomain, u64>,
    partner_leaves: HashMap<String, Vec<CertificateIdentity>>,
}

impl RegistryState {
    fn version(&self, domain: &PartnerDomain) -> u64 {
        self.versions.get(domain).copied().unwrap_or(0)
    }

    fn bump(&mut self, domain: &PartnerDomain) {
        *self.versions.entry(domain.clone()).or_insert(0) += 1;
    }

    fn active_by_subject(&self, subject: &str, domain: &PartnerDomain) -> Vec<&CertificateEntry> {
        self.by_subject
            .get(&(domain.clone(), subject.to_string()))
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.entries.get(id))
                    .filter(|stored| !stored.is_revoked())
                    .map(|stored| &stored.entry)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Borrowed view of one domain partition, used under the registry lock
struct DomainView<'a> {
    state: &'a RegistryState,
    domain: &'a PartnerDomain,
}

impl TrustView for DomainView<'_> {
    fn contains_identity(&self, identity: &CertificateIdentity) -> bool {
        self.state.entries.contains_key(identity)
    }

    fn active_by_subject(&self, subject: &str, domain: &PartnerDomain) -> Vec<&CertificateEntry> {
        if domain != self.domain {
            return Vec::new();
        }
        self.state.active_by_subject(subject, domain)
    }
}

/// Point-in-time view of one domain partition
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    state: Arc<RegistryState>,
    domain: PartnerDomain,
}

impl RegistrySnapshot {
    pub fn domain(&self) -> &PartnerDomain {
        &self.domain
    }

    /// Version of the domain partition when the snapshot was taken
    pub fn version(&self) -> u64 {
        self.state.version(&self.domain)
    }
}

impl TrustView for RegistrySnapshot {
    fn contains_identity(&self, identity: &CertificateIdentity) -> bool {
        self.state.entries.contains_key(identity)
    }

    fn active_by_subject(&self, subject: &str, domain: &PartnerDomain) -> Vec<&CertificateEntry> {
        if domain != &self.domain {
            return Vec::new();
        }
        self.state.active_by_subject(subject, domain)
    }
}

/// Run `attempt`, running it once more if it loses a commit race
fn retry_on_conflict<T>(
    mut attempt: impl FnMut() -> Result<T, CertificateError>,
) -> Result<T, CertificateError> {
    match attempt() {
        Err(CertificateError::RegistryConflict { identity }) => {
            info!(identity = %identity, "Re-validating after registry conflict");
            attempt()
        }
        result => result,
    }
}

/// Process-wide registry of trusted certificates
#[derive(Debug)]
pub struct CertificateRegistry {
    state: RwLock<Arc<RegistryState>>,
    validator: TrustChainValidator,
    events: Arc<dyn EventSink>,
}

impl CertificateRegistry {
    /// Create an empty registry
    pub fn new(validator: TrustChainValidator, events: Arc<dyn EventSink>) -> Self {
        Self {
            state: RwLock::new(Arc::new(RegistryState::default())),
            validator,
            events,
        }
    }

    pub fn validator(&self) -> &TrustChainValidator {
        &self.validator
    }

    /// Take a snapshot of a domain partition
    pub fn snapshot(&self, domain: &PartnerDomain) -> RegistrySnapshot {
        let state = self.state.read().unwrap();
        RegistrySnapshot {
            state: Arc::clone(&state),
            domain: domain.clone(),
        }
    }

    /// Commit a validated entry
    ///
    /// Fails with `RegistryConflict` if the identity was committed meanwhile or
    /// the entry's domain changed since the snapshot at `expected_version`.
    pub fn commit(&self, entry: CertificateEntry, expected_version: u64) -> Result<(), CertificateError> {
        self.commit_owned(entry, expected_version, None, None)
    }

    /// Insert `entry` under the write lock
    ///
    /// With `revalidate_at`, a moved domain version is not a conflict by
    /// itself: the entry is validated again against the live partition and
    /// only rejected if it no longer passes.
    fn commit_owned(
        &self,
        entry: CertificateEntry,
        expected_version: u64,
        owner: Option<String>,
        revalidate_at: Option<DateTime<Utc>>,
    ) -> Result<(), CertificateError> {
        let identity = entry.identity();
        let domain = entry.partner_domain.clone();

        let mut guard = self.state.write().unwrap();
        let current_version = guard.version(&domain);

        let conflict = if guard.entries.contains_key(&identity) {
            true
        } else if current_version != expected_version {
            match revalidate_at {
                Some(now) => {
                    let live = DomainView {
                        state: &**guard,
                        domain: &domain,
                    };
                    self.validator.validate(&entry, &live, now).is_err()
                }
                None => true,
            }
        } else {
            false
        };

        if conflict {
            warn!(
                identity = %identity,
                domain = %domain,
                expected_version,
                current_version,
                "Registry conflict on commit"
            );
            return Err(CertificateError::RegistryConflict { identity });
        }

        // Copies the state only while snapshots of it are still alive
        let state = Arc::make_mut(&mut guard);

        state
            .by_subject
            .entry((domain.clone(), entry.subject_name.clone()))
            .or_default()
            .push(identity.clone());
        if let Some(partner_id) = &owner {
            state
                .partner_leaves
                .entry(partner_id.clone())
                .or_default()
                .push(identity.clone());
        }
        state.entries.insert(
            identity.clone(),
            StoredCertificate {
                entry,
                committed_at: Utc::now(),
                owner,
                revocation: None,
            },
        );
        state.bump(&domain);

        info!(identity = %identity, domain = %domain, "Committed certificate");
        Ok(())
    }

    /// Validate and commit a CA (root or sub-CA) certificate
    pub fn admit(&self, entry: CertificateEntry, now: DateTime<Utc>) -> Result<CertificateIdentity, CertificateError> {
        self.admit_owned(entry, None, now)
    }

    /// Validate and commit a partner leaf certificate, binding it to `partner_id`
    pub fn admit_partner_certificate(
        &self,
        entry: CertificateEntry,
        partner_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CertificateIdentity, CertificateError> {
        if entry.role != CertificateRole::PartnerLeaf {
            return Err(CertificateError::malformed(format!(
                "expected a partner_leaf certificate, got {}",
                entry.role
            )));
        }
        self.admit_owned(entry, Some(partner_id.to_string()), now)
    }

    fn admit_owned(
        &self,
        entry: CertificateEntry,
        owner: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<CertificateIdentity, CertificateError> {
        let identity = entry.identity();

        retry_on_conflict(|| {
            let expected_version = self.validate_current(&entry, now)?;
            self.commit_owned(entry.clone(), expected_version, owner.clone(), Some(now))
        })?;

        let topic = match entry.role {
            CertificateRole::PartnerLeaf => Topic::PartnerCertificateUploaded,
            CertificateRole::Root | CertificateRole::SubCa => Topic::CaCertificateUploaded,
        };
        self.events.publish(EventModel::new(
            topic,
            serde_json::json!({
                "issuer_name": identity.issuer_name,
                "serial_number": identity.serial_number,
                "subject_name": entry.subject_name,
                "role": entry.role,
                "partner_domain": entry.partner_domain,
                "partner_id": owner,
            }),
        ));

        Ok(identity)
    }

    /// Validate against the current state under the read lock, returning the
    /// domain version the decision was made at
    fn validate_current(&self, entry: &CertificateEntry, now: DateTime<Utc>) -> Result<u64, CertificateError> {
        let state = self.state.read().unwrap();
        let view = DomainView {
            state: &**state,
            domain: &entry.partner_domain,
        };
        self.validator.validate(entry, &view, now)?;
        Ok(state.version(&entry.partner_domain))
    }

    /// Active certificates with the given subject in a domain
    pub fn lookup_by_subject(&self, subject: &str, domain: &PartnerDomain) -> Vec<CertificateEntry> {
        self.snapshot(domain)
            .active_by_subject(subject, domain)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Certificate with the given identity, including tombstoned ones
    pub fn lookup_by_identity(&self, identity: &CertificateIdentity) -> Result<StoredCertificate, CertificateError> {
        let state = self.state.read().unwrap();
        state
            .entries
            .get(identity)
            .cloned()
            .ok_or_else(|| CertificateError::NotFound {
                identity: identity.clone(),
            })
    }

    /// Latest active leaf uploaded by a partner
    pub fn partner_certificate(&self, partner_id: &str) -> Option<StoredCertificate> {
        let state = self.state.read().unwrap();
        state
            .partner_leaves
            .get(partner_id)?
            .iter()
            .rev()
            .filter_map(|id| state.entries.get(id))
            .find(|stored| !stored.is_revoked())
            .cloned()
    }

    /// Tombstone a certificate
    ///
    /// Revoking an already revoked certificate succeeds and keeps the
    /// original revocation record.
    pub fn revoke(&self, identity: &CertificateIdentity, reason: &str) -> Result<StoredCertificate, CertificateError> {
        let mut guard = self.state.write().unwrap();

        match guard.entries.get(identity) {
            None => {
                return Err(CertificateError::NotFound {
                    identity: identity.clone(),
                })
            }
            Some(stored) if stored.is_revoked() => return Ok(stored.clone()),
            Some(_) => {}
        }

        let state = Arc::make_mut(&mut guard);
        let stored = state
            .entries
            .get_mut(identity)
            .ok_or_else(|| CertificateError::NotFound {
                identity: identity.clone(),
            })?;
        stored.revocation = Some(Revocation {
            revoked_at: Utc::now(),
            reason: reason.to_string(),
        });
        let revoked = stored.clone();
        state.bump(&revoked.entry.partner_domain);
        drop(guard);

        info!(
            identity = %identity,
            domain = %revoked.entry.partner_domain,
            reason = %reason,
            "Revoked certificate"
        );
        self.events.publish(EventModel::new(
            Topic::CertificateRevoked,
            serde_json::json!({
                "issuer_name": identity.issuer_name,
                "serial_number": identity.serial_number,
                "partner_domain": revoked.entry.partner_domain,
                "reason": reason,
            }),
        ));

        Ok(revoked)
    }

    /// Certificate counts per domain
    pub fn stats(&self) -> HashMap<PartnerDomain, DomainStats> {
        let state = self.state.read().unwrap();
        let mut stats: HashMap<PartnerDomain, DomainStats> = HashMap::new();
        for stored in state.entries.values() {
            let domain = stats.entry(stored.entry.partner_domain.clone()).or_default();
            if stored.is_revoked() {
                domain.revoked += 1;
            } else {
                domain.active += 1;
            }
        }
        stats
    }

    /// Total number of committed certificates, including revoked ones
    pub fn len(&self) -> usize {
        self.state.read().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
