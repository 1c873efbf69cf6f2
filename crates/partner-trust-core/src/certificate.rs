//! Certificate codec
//!
//! A partner certificate is a COSE_Sign1 structure:
//!
//! ```text
//! COSE_Sign1 [
//!   protected:   { alg: EdDSA },
//!   unprotected: {},
//!   payload:     JSON to-be-signed body (every field except the signature),
//!   signature:   issuer's Ed25519 signature over the COSE Sig_structure
//! ]
//! ```
//!
//! Decoding is strict: anything that does not re-encode to the exact same
//! bytes is rejected, so a committed entry can always be verified from its
//! fields alone. Uploads may also arrive PEM-armored.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use coset::{iana, CborSerializable, CoseSign1, CoseSign1Builder, HeaderBuilder};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::crypto::{KeyPair, PublicKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use crate::error::{CertificateError, CryptoError, Result};
use crate::types::{CertificateEntry, CertificateRole, PartnerDomain};

/// PEM label used for armored certificates
pub const PEM_LABEL: &str = "PARTNER CERTIFICATE";

/// Current certificate body version
const FORMAT_VERSION: u8 = 1;

/// Key algorithm name carried in the certificate body
const ED25519: &str = "Ed25519";

/// Longest accepted serial number (20 bytes, hex encoded)
const MAX_SERIAL_LENGTH: usize = 40;

/// Longest accepted issuer/subject name
const MAX_NAME_LENGTH: usize = 512;

/// COSE algorithm identifier for EdDSA (Ed25519)
const EDDSA_ALG: iana::Algorithm = iana::Algorithm::EdDSA;

/// To-be-signed certificate body
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TbsCertificate {
    version: u8,
    serial_number: String,
    issuer: String,
    subject: String,
    not_before: String,
    not_after: String,
    role: String,
    partner_domain: String,
    public_key: SubjectPublicKey,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SubjectPublicKey {
    algorithm: String,
    key: String,
}

impl TbsCertificate {
    fn from_entry(entry: &CertificateEntry) -> Self {
        Self {
            version: FORMAT_VERSION,
            serial_number: entry.serial_number.clone(),
            issuer: entry.issuer_name.clone(),
            subject: entry.subject_name.clone(),
            not_before: format_time(&entry.not_before),
            not_after: format_time(&entry.not_after),
            role: entry.role.as_str().to_string(),
            partner_domain: entry.partner_domain.as_str().to_string(),
            public_key: SubjectPublicKey {
                algorithm: ED25519.to_string(),
                key: STANDARD.encode(&entry.public_key),
            },
        }
    }

    /// Validate the body and turn it into an entry carrying `signature`
    fn into_entry(self, signature: Vec<u8>) -> Result<CertificateEntry> {
        if self.version != FORMAT_VERSION {
            return Err(CertificateError::malformed(format!(
                "unsupported certificate version {}",
                self.version
            )));
        }

        check_serial(&self.serial_number)?;
        check_name("issuer", &self.issuer)?;
        check_name("subject", &self.subject)?;

        if self.partner_domain.trim().is_empty() {
            return Err(CertificateError::malformed("partner domain is empty"));
        }

        let role = CertificateRole::parse(&self.role).ok_or_else(|| {
            CertificateError::malformed(format!("unknown certificate role '{}'", self.role))
        })?;

        let not_before = parse_time("not_before", &self.not_before)?;
        let not_after = parse_time("not_after", &self.not_after)?;
        if not_after < not_before {
            return Err(CertificateError::malformed(
                "not_after precedes not_before",
            ));
        }

        if self.public_key.algorithm != ED25519 {
            return Err(CertificateError::malformed(format!(
                "unsupported key algorithm '{}'",
                self.public_key.algorithm
            )));
        }
        let public_key = STANDARD
            .decode(&self.public_key.key)
            .map_err(|e| CertificateError::malformed(format!("public key is not base64: {}", e)))?;
        PublicKey::from_slice(&public_key)
            .map_err(|e| CertificateError::malformed(e.to_string()))?;

        if signature.len() != SIGNATURE_LENGTH {
            return Err(CertificateError::malformed(format!(
                "signature must be {} bytes, got {}",
                SIGNATURE_LENGTH,
                signature.len()
            )));
        }

        Ok(CertificateEntry {
            serial_number: self.serial_number,
            issuer_name: self.issuer,
            subject_name: self.subject,
            not_before,
            not_after,
            public_key,
            signature,
            role,
            partner_domain: PartnerDomain::new(self.partner_domain),
        })
    }
}

fn check_serial(serial: &str) -> Result<()> {
    if serial.is_empty() {
        return Err(CertificateError::malformed("serial number is empty"));
    }
    if serial.len() > MAX_SERIAL_LENGTH {
        return Err(CertificateError::malformed(format!(
            "serial number longer than {} characters",
            MAX_SERIAL_LENGTH
        )));
    }
    if !serial.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CertificateError::malformed(
            "serial number must be hexadecimal",
        ));
    }
    Ok(())
}

fn check_name(field: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CertificateError::malformed(format!("{} name is empty", field)));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(CertificateError::malformed(format!(
            "{} name longer than {} characters",
            field, MAX_NAME_LENGTH
        )));
    }
    Ok(())
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_time(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CertificateError::malformed(format!("invalid {} timestamp: {}", field, e)))
}

/// Build the unsigned COSE_Sign1 for an entry
fn unsigned_cose(entry: &CertificateEntry) -> Result<CoseSign1> {
    let payload = serde_json::to_vec(&TbsCertificate::from_entry(entry))?;
    let protected = HeaderBuilder::new().algorithm(EDDSA_ALG).build();

    Ok(CoseSign1Builder::new()
        .protected(protected)
        .payload(payload)
        .build())
}

/// Bytes covered by the certificate signature
pub fn tbs_bytes(entry: &CertificateEntry) -> Result<Vec<u8>> {
    Ok(unsigned_cose(entry)?.tbs_data(&[]))
}

/// Serialize a certificate to its binary encoding
pub fn encode(entry: &CertificateEntry) -> Result<Vec<u8>> {
    let mut cose = unsigned_cose(entry)?;
    cose.signature = entry.signature.clone();
    cose.to_vec().map_err(CertificateError::from)
}

/// Parse a certificate from its binary encoding
///
/// Never panics; every failure is `CertificateError::Malformed`.
pub fn decode(bytes: &[u8]) -> Result<CertificateEntry> {
    if bytes.is_empty() {
        return Err(CertificateError::malformed("empty input"));
    }

    let cose = CoseSign1::from_slice(bytes)?;

    match &cose.protected.header.alg {
        Some(alg) if *alg == coset::Algorithm::Assigned(EDDSA_ALG) => {}
        Some(alg) => {
            return Err(CertificateError::malformed(format!(
                "unsupported signature algorithm {:?}",
                alg
            )))
        }
        None => return Err(CertificateError::malformed("missing signature algorithm")),
    }

    let payload = cose
        .payload
        .as_deref()
        .ok_or_else(|| CertificateError::malformed("missing certificate body"))?;
    let tbs: TbsCertificate = serde_json::from_slice(payload)?;
    let entry = tbs.into_entry(cose.signature.clone())?;

    if encode(&entry)? != bytes {
        return Err(CertificateError::malformed("non-canonical encoding"));
    }

    Ok(entry)
}

/// Armor a binary certificate as PEM text
pub fn to_pem(bytes: &[u8]) -> String {
    let body = STANDARD.encode(bytes);
    let mut pem = format!("-----BEGIN {}-----\n", PEM_LABEL);
    for line in body.as_bytes().chunks(64) {
        // base64 output is ASCII
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {}-----\n", PEM_LABEL));
    pem
}

/// Strip PEM armor and return the binary certificate
pub fn from_pem(text: &str) -> Result<Vec<u8>> {
    let begin = format!("-----BEGIN {}-----", PEM_LABEL);
    let end = format!("-----END {}-----", PEM_LABEL);

    let start = text
        .find(&begin)
        .ok_or_else(|| CertificateError::malformed("missing PEM begin marker"))?
        + begin.len();
    let stop = text[start..]
        .find(&end)
        .ok_or_else(|| CertificateError::malformed("missing PEM end marker"))?
        + start;

    let body: String = text[start..stop]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    STANDARD
        .decode(body)
        .map_err(|e| CertificateError::malformed(format!("invalid PEM body: {}", e)))
}

/// Decode either PEM text or raw binary
pub fn decode_any(data: &[u8]) -> Result<CertificateEntry> {
    let trimmed = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|start| &data[start..])
        .unwrap_or_default();

    if trimmed.starts_with(b"-----BEGIN") {
        let text = std::str::from_utf8(trimmed)
            .map_err(|_| CertificateError::malformed("PEM text is not UTF-8"))?;
        decode(&from_pem(text)?)
    } else {
        decode(data)
    }
}

impl CertificateEntry {
    /// Verify this certificate's signature against an issuer key
    pub fn verify_issued_by(&self, issuer_key: &PublicKey) -> std::result::Result<(), CryptoError> {
        let tbs = tbs_bytes(self).map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        issuer_key.verify(&tbs, &self.signature)
    }

    /// Verify this certificate against another entry's subject key
    pub fn verify_issued_by_entry(&self, issuer: &CertificateEntry) -> bool {
        issuer
            .subject_key()
            .and_then(|key| self.verify_issued_by(&key))
            .is_ok()
    }

    /// Binary encoding
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    /// PEM encoding
    pub fn to_pem(&self) -> Result<String> {
        Ok(to_pem(&encode(self)?))
    }
}

/// Builder for issuing certificates
///
/// # Example
///
/// ```ignore
/// let root_key = KeyPair::generate();
/// let root = CertificateBuilder::new()
///     .subject("CN=Partner Root CA,O=Example")
///     .role(CertificateRole::Root)
///     .partner_domain("AUTH")
///     .valid_for(chrono::Duration::days(3650))
///     .self_signed(&root_key)?;
/// ```
#[derive(Debug, Default)]
pub struct CertificateBuilder {
    serial_number: Option<String>,
    subject: Option<String>,
    not_before: Option<DateTime<Utc>>,
    not_after: Option<DateTime<Utc>>,
    role: Option<CertificateRole>,
    partner_domain: Option<PartnerDomain>,
    public_key: Option<[u8; PUBLIC_KEY_LENGTH]>,
}

impl CertificateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the serial number (hex); a random 16-byte serial is used otherwise
    pub fn serial_number(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = Some(serial.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn not_before(mut self, time: DateTime<Utc>) -> Self {
        self.not_before = Some(time);
        self
    }

    pub fn not_after(mut self, time: DateTime<Utc>) -> Self {
        self.not_after = Some(time);
        self
    }

    /// Valid from now for `duration`
    pub fn valid_for(mut self, duration: Duration) -> Self {
        let now = Utc::now();
        self.not_before = Some(now - Duration::minutes(1));
        self.not_after = Some(now + duration);
        self
    }

    pub fn role(mut self, role: CertificateRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn partner_domain(mut self, domain: impl Into<PartnerDomain>) -> Self {
        self.partner_domain = Some(domain.into());
        self
    }

    /// Subject public key for issuer-signed certificates
    pub fn public_key(mut self, key: &PublicKey) -> Self {
        self.public_key = Some(key.to_bytes());
        self
    }

    /// Issue a self-signed certificate for `key`
    pub fn self_signed(mut self, key: &KeyPair) -> Result<CertificateEntry> {
        let subject = self
            .subject
            .clone()
            .ok_or_else(|| CertificateError::malformed("missing subject"))?;
        self.public_key = Some(key.verifying_key_bytes());
        self.sign_with(subject, key)
    }

    /// Issue a certificate signed by `issuer_key` under the name `issuer_name`
    pub fn issued_by(self, issuer_name: impl Into<String>, issuer_key: &KeyPair) -> Result<CertificateEntry> {
        self.sign_with(issuer_name.into(), issuer_key)
    }

    fn sign_with(self, issuer_name: String, signer: &KeyPair) -> Result<CertificateEntry> {
        let subject_name = self
            .subject
            .ok_or_else(|| CertificateError::malformed("missing subject"))?;
        let public_key = self
            .public_key
            .ok_or_else(|| CertificateError::malformed("missing public key"))?;
        let role = self
            .role
            .ok_or_else(|| CertificateError::malformed("missing role"))?;
        let partner_domain = self
            .partner_domain
            .ok_or_else(|| CertificateError::malformed("missing partner domain"))?;

        let now = Utc::now();
        let not_before = self.not_before.unwrap_or(now - Duration::minutes(1));
        let not_after = self.not_after.unwrap_or(now + Duration::days(365));

        let mut entry = CertificateEntry {
            serial_number: self.serial_number.unwrap_or_else(random_serial),
            issuer_name,
            subject_name,
            not_before,
            not_after,
            public_key: public_key.to_vec(),
            signature: Vec::new(),
            role,
            partner_domain,
        };

        let tbs = tbs_bytes(&entry)?;
        entry.signature = signer.sign(&tbs);

        // Round-trip through the codec so builder output obeys decode's rules
        decode(&encode(&entry)?)
    }
}

fn random_serial() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn root(key: &KeyPair) -> CertificateEntry {
        CertificateBuilder::new()
            .serial_number("01")
            .subject("CN=Test Root")
            .role(CertificateRole::Root)
            .partner_domain("AUTH")
            .not_before(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
            .not_after(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap())
            .self_signed(key)
            .unwrap()
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let key = KeyPair::generate();
        let entry = root(&key);

        let bytes = encode(&entry).unwrap();
        assert_eq!(decode(&bytes).unwrap(), entry);
    }

    #[test]
    fn test_self_signed_verifies() {
        let key = KeyPair::generate();
        let entry = root(&key);

        assert!(entry.is_self_issued());
        assert!(entry.verify_issued_by(&key.public_key()).is_ok());
        assert!(entry.verify_issued_by_entry(&entry));
    }

    #[test]
    fn test_issued_certificate_verifies_against_issuer() {
        let root_key = KeyPair::generate();
        let sub_key = KeyPair::generate();
        let root = root(&root_key);

        let sub = CertificateBuilder::new()
            .subject("CN=Test Sub CA")
            .role(CertificateRole::SubCa)
            .partner_domain("AUTH")
            .public_key(&sub_key.public_key())
            .issued_by(&root.subject_name, &root_key)
            .unwrap();

        assert_eq!(sub.issuer_name, "CN=Test Root");
        assert!(sub.verify_issued_by_entry(&root));
        assert!(!sub.verify_issued_by_entry(&sub));
    }

    #[test]
    fn test_truncated_input_rejected() {
        let key = KeyPair::generate();
        let bytes = encode(&root(&key)).unwrap();

        for len in [0, 1, bytes.len() / 2, bytes.len() - 1] {
            let result = decode(&bytes[..len]);
            assert!(
                matches!(result, Err(CertificateError::Malformed { .. })),
                "truncated to {} bytes should be malformed",
                len
            );
        }
    }

    #[test]
    fn test_garbage_rejected() {
        let result = decode(b"definitely not a certificate");
        assert!(matches!(result, Err(CertificateError::Malformed { .. })));
    }

    #[test]
    fn test_unsupported_signature_algorithm_rejected() {
        let key = KeyPair::generate();
        let entry = root(&key);

        let payload = serde_json::to_vec(&TbsCertificate::from_entry(&entry)).unwrap();
        let cose = CoseSign1Builder::new()
            .protected(HeaderBuilder::new().algorithm(iana::Algorithm::ES256).build())
            .payload(payload)
            .signature(entry.signature.clone())
            .build();

        let err = decode(&cose.to_vec().unwrap()).unwrap_err();
        assert!(err.to_string().contains("unsupported signature algorithm"));
    }

    #[test]
    fn test_unsupported_key_algorithm_rejected() {
        let key = KeyPair::generate();
        let entry = root(&key);

        let mut tbs = TbsCertificate::from_entry(&entry);
        tbs.public_key.algorithm = "RSA".into();
        let cose = CoseSign1Builder::new()
            .protected(HeaderBuilder::new().algorithm(EDDSA_ALG).build())
            .payload(serde_json::to_vec(&tbs).unwrap())
            .signature(entry.signature.clone())
            .build();

        let err = decode(&cose.to_vec().unwrap()).unwrap_err();
        assert_eq!(
            err,
            CertificateError::malformed("unsupported key algorithm 'RSA'")
        );
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let key = KeyPair::generate();
        let entry = root(&key);

        let mut body = serde_json::to_value(TbsCertificate::from_entry(&entry)).unwrap();
        body["extensions"] = serde_json::json!({ "path_len": 3 });
        let cose = CoseSign1Builder::new()
            .protected(HeaderBuilder::new().algorithm(EDDSA_ALG).build())
            .payload(serde_json::to_vec(&body).unwrap())
            .signature(entry.signature.clone())
            .build();

        assert!(matches!(
            decode(&cose.to_vec().unwrap()),
            Err(CertificateError::Malformed { .. })
        ));
    }

    #[test]
    fn test_inverted_validity_rejected() {
        let key = KeyPair::generate();
        let result = CertificateBuilder::new()
            .subject("CN=Backwards")
            .role(CertificateRole::Root)
            .partner_domain("AUTH")
            .not_before(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap())
            .not_after(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
            .self_signed(&key);

        assert_eq!(
            result.unwrap_err(),
            CertificateError::malformed("not_after precedes not_before")
        );
    }

    #[test]
    fn test_non_hex_serial_rejected() {
        let key = KeyPair::generate();
        let result = CertificateBuilder::new()
            .serial_number("not-hex")
            .subject("CN=Root")
            .role(CertificateRole::Root)
            .partner_domain("AUTH")
            .self_signed(&key);

        assert!(matches!(result, Err(CertificateError::Malformed { .. })));
    }

    #[test]
    fn test_pem_roundtrip() {
        let key = KeyPair::generate();
        let entry = root(&key);

        let pem = entry.to_pem().unwrap();
        assert!(pem.starts_with("-----BEGIN PARTNER CERTIFICATE-----\n"));
        assert!(pem.lines().all(|line| line.len() <= 64 || line.starts_with("-----")));

        assert_eq!(decode_any(pem.as_bytes()).unwrap(), entry);
        assert_eq!(decode_any(&entry.to_bytes().unwrap()).unwrap(), entry);
    }

    #[test]
    fn test_pem_without_end_marker_rejected() {
        let result = decode_any(b"-----BEGIN PARTNER CERTIFICATE-----\nAAAA\n");
        assert_eq!(
            result.unwrap_err(),
            CertificateError::malformed("missing PEM end marker")
        );
    }

    #[test]
    fn test_builder_requires_role() {
        let key = KeyPair::generate();
        let result = CertificateBuilder::new()
            .subject("CN=Root")
            .partner_domain("AUTH")
            .self_signed(&key);
        assert_eq!(result.unwrap_err(), CertificateError::malformed("missing role"));
    }
}
