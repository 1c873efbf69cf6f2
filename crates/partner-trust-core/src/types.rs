//! Common types shared by the certificate registry and the API-key workflow

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::PublicKey;
use crate::error::CryptoError;

/// Partner domain a certificate chain serves (e.g. `AUTH`, `FTM`, `DEVICE`)
///
/// Chains are validated strictly within one domain, so a sub-CA trusted for
/// one partner category can never vouch for certificates of another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartnerDomain(String);

impl PartnerDomain {
    pub fn new(domain: impl Into<String>) -> Self {
        Self(domain.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartnerDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartnerDomain {
    fn from(domain: &str) -> Self {
        Self::new(domain)
    }
}

/// Position of a certificate in its trust chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateRole {
    /// Self-signed trust anchor
    Root,
    /// Intermediate CA signed by a root or another sub-CA
    SubCa,
    /// End-entity certificate owned by a partner
    PartnerLeaf,
}

impl CertificateRole {
    /// Wire name used in the certificate body
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateRole::Root => "root",
            CertificateRole::SubCa => "sub_ca",
            CertificateRole::PartnerLeaf => "partner_leaf",
        }
    }

    /// Parse the wire name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "root" => Some(CertificateRole::Root),
            "sub_ca" => Some(CertificateRole::SubCa),
            "partner_leaf" => Some(CertificateRole::PartnerLeaf),
            _ => None,
        }
    }

    /// Whether certificates with this role may sign other certificates
    pub fn is_ca(&self) -> bool {
        matches!(self, CertificateRole::Root | CertificateRole::SubCa)
    }
}

impl fmt::Display for CertificateRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a certificate: issuer name plus serial number
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CertificateIdentity {
    pub issuer_name: String,
    pub serial_number: String,
}

impl CertificateIdentity {
    pub fn new(issuer_name: impl Into<String>, serial_number: impl Into<String>) -> Self {
        Self {
            issuer_name: issuer_name.into(),
            serial_number: serial_number.into(),
        }
    }
}

impl fmt::Display for CertificateIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} #{}]", self.issuer_name, self.serial_number)
    }
}

/// A decoded certificate
///
/// Entries are immutable once committed to the registry. `public_key` is the
/// subject's raw Ed25519 key (32 bytes) and `signature` is the issuer's
/// Ed25519 signature (64 bytes) over the certificate's to-be-signed bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateEntry {
    pub serial_number: String,
    pub issuer_name: String,
    pub subject_name: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
    pub role: CertificateRole,
    pub partner_domain: PartnerDomain,
}

impl CertificateEntry {
    /// Identity used for uniqueness checks
    pub fn identity(&self) -> CertificateIdentity {
        CertificateIdentity::new(&self.issuer_name, &self.serial_number)
    }

    /// Whether issuer and subject names match
    pub fn is_self_issued(&self) -> bool {
        self.issuer_name == self.subject_name
    }

    /// Whether `at` falls inside the validity window (inclusive)
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    /// The subject public key as a verifier
    pub fn subject_key(&self) -> Result<PublicKey, CryptoError> {
        PublicKey::from_slice(&self.public_key)
    }
}

/// What an authenticated caller is allowed to act as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "partner_id", rename_all = "snake_case")]
pub enum CallerRole {
    /// A partner acting on its own records
    Partner(String),
    /// A partner manager who decides API-key requests
    PartnerManager,
    /// Administrator, may also revoke
    Admin,
}

/// Caller identity as established by the authentication layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub id: String,
    pub role: CallerRole,
}

impl Caller {
    pub fn partner(partner_id: impl Into<String>) -> Self {
        let partner_id = partner_id.into();
        Self {
            id: partner_id.clone(),
            role: CallerRole::Partner(partner_id),
        }
    }

    pub fn partner_manager(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: CallerRole::PartnerManager,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: CallerRole::Admin,
        }
    }

    /// Whether the caller may approve or reject API-key requests
    pub fn is_approver(&self) -> bool {
        matches!(self.role, CallerRole::PartnerManager | CallerRole::Admin)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.role, CallerRole::Admin)
    }

    /// Whether the caller acts for the given partner
    pub fn acts_for(&self, partner_id: &str) -> bool {
        match &self.role {
            CallerRole::Partner(own) => own == partner_id,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_wire_names() {
        for role in [
            CertificateRole::Root,
            CertificateRole::SubCa,
            CertificateRole::PartnerLeaf,
        ] {
            assert_eq!(CertificateRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(CertificateRole::parse("intermediate"), None);
        assert!(CertificateRole::SubCa.is_ca());
        assert!(!CertificateRole::PartnerLeaf.is_ca());
    }

    #[test]
    fn test_caller_permissions() {
        let partner = Caller::partner("P1");
        assert!(partner.acts_for("P1"));
        assert!(!partner.acts_for("P2"));
        assert!(!partner.is_approver());

        let manager = Caller::partner_manager("pm-1");
        assert!(manager.is_approver());
        assert!(!manager.is_admin());
        assert!(!manager.acts_for("P1"));

        assert!(Caller::admin("root").is_approver());
    }

    #[test]
    fn test_identity_display() {
        let id = CertificateIdentity::new("CN=Root", "01");
        assert_eq!(id.to_string(), "[CN=Root #01]");
    }
}
