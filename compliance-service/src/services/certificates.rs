//! Signing certificate directory.
//!
//! The store owns the keystore settings and an immutable snapshot of every
//! key entry found in it. Readers clone the current snapshot handle and
//! never block on a reload; `reload` builds a complete new snapshot off to
//! the side and publishes it with a single swap. Reloads are serialized.

use crate::error::ComplianceError;
use crate::models::{CertificateRecord, IssuerCategory};
use crate::services::keystore::{self, KeyEntry, KeystoreType};
use crate::services::metrics::CERTIFICATE_RELOADS_TOTAL;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use secrecy::{ExposeSecret, SecretString, SecretVec};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use x509_parser::prelude::{FromDer, X509Certificate};

/// Where the keystore lives and how to open it.
#[derive(Debug, Clone)]
pub struct KeystoreSettings {
    pub path: PathBuf,
    pub password: SecretString,
    pub keystore_type: KeystoreType,
    pub default_alias: String,
}

/// Issuer name fragments, checked in order against the upper-cased issuer.
const NATIONAL_AUTHORITY: &[&str] = &[
    "FNMT",
    "FÁBRICA NACIONAL DE MONEDA Y TIMBRE",
    "FABRICA NACIONAL DE MONEDA Y TIMBRE",
];
const REGIONAL_AUTHORITY: &[&str] = &[
    "ACCV",
    "AGENCIA DE TECNOLOGÍA Y CERTIFICACIÓN",
    "AGENCIA DE TECNOLOGIA Y CERTIFICACION",
];
const CHAMBER_OF_COMMERCE: &[&str] = &["CAMERFIRMA"];
const NATIONAL_ID_CARD: &[&str] = &["DNIE", "DNI ELECTRÓNICO", "DNI ELECTRONICO"];

const NATURAL_PERSON: &[&str] = &["PERSONA FÍSICA", "PERSONA FISICA"];
const JURIDICAL_PERSON: &[&str] = &["PERSONA JURÍDICA", "PERSONA JURIDICA"];

fn contains_any(haystack: &str, fragments: &[&str]) -> bool {
    fragments.iter().any(|fragment| haystack.contains(fragment))
}

/// Classify an issuer distinguished name.
pub fn classify_issuer(issuer: &str) -> IssuerCategory {
    let issuer = issuer.to_uppercase();

    if contains_any(&issuer, NATIONAL_AUTHORITY) {
        if contains_any(&issuer, NATURAL_PERSON) {
            return IssuerCategory::NationalAuthorityNaturalPerson;
        }
        if contains_any(&issuer, JURIDICAL_PERSON) {
            return IssuerCategory::NationalAuthorityJuridicalPerson;
        }
        return IssuerCategory::NationalAuthorityGeneral;
    }
    if contains_any(&issuer, REGIONAL_AUTHORITY) {
        return IssuerCategory::RegionalAuthority;
    }
    if contains_any(&issuer, CHAMBER_OF_COMMERCE) {
        return IssuerCategory::ChamberOfCommerce;
    }
    if contains_any(&issuer, NATIONAL_ID_CARD) {
        return IssuerCategory::NationalIdCard;
    }
    IssuerCategory::Other
}

/// Whether a certificate may sign on behalf of an organisation.
pub fn is_juridical_capable(record: &CertificateRecord) -> bool {
    match record.category {
        IssuerCategory::NationalAuthorityJuridicalPerson | IssuerCategory::ChamberOfCommerce => {
            true
        }
        IssuerCategory::RegionalAuthority => {
            contains_any(&record.subject.to_uppercase(), JURIDICAL_PERSON)
        }
        _ => false,
    }
}

fn parse_certificate(
    alias: &str,
    der: &[u8],
    now: DateTime<Utc>,
) -> Result<CertificateRecord, ComplianceError> {
    let (_, cert) = X509Certificate::from_der(der).map_err(|e| {
        ComplianceError::configuration(format!("cannot parse certificate '{}': {}", alias, e))
    })?;

    let not_before = DateTime::from_timestamp(cert.validity().not_before.timestamp(), 0)
        .ok_or_else(|| ComplianceError::configuration(format!("bad notBefore in '{}'", alias)))?;
    let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
        .ok_or_else(|| ComplianceError::configuration(format!("bad notAfter in '{}'", alias)))?;

    let key_usage = match cert.key_usage() {
        Ok(Some(ext)) => {
            let ku = ext.value;
            vec![
                ku.digital_signature(),
                ku.non_repudiation(),
                ku.key_encipherment(),
                ku.data_encipherment(),
                ku.key_agreement(),
                ku.key_cert_sign(),
                ku.crl_sign(),
                ku.encipher_only(),
                ku.decipher_only(),
            ]
        }
        Ok(None) => Vec::new(),
        Err(e) => {
            tracing::warn!(alias = %alias, error = %e, "Unreadable key usage extension");
            Vec::new()
        }
    };

    let issuer = cert.issuer().to_string();
    Ok(CertificateRecord {
        alias: alias.to_string(),
        subject: cert.subject().to_string(),
        category: classify_issuer(&issuer),
        issuer,
        serial_number: cert.tbs_certificate.serial.to_string(),
        not_before,
        not_after,
        key_usage,
        valid: now > not_before && now < not_after,
    })
}

struct Snapshot {
    records: BTreeMap<String, CertificateRecord>,
    keys: HashMap<String, SecretVec<u8>>,
    loaded_utc: DateTime<Utc>,
}

impl Snapshot {
    fn build(entries: Vec<KeyEntry>, now: DateTime<Utc>) -> Self {
        let mut records = BTreeMap::new();
        let mut keys = HashMap::new();

        for entry in entries {
            match parse_certificate(&entry.alias, &entry.certificate_der, now) {
                Ok(record) => {
                    tracing::debug!(
                        alias = %record.alias,
                        issuer = %record.issuer,
                        not_after = %record.not_after,
                        valid = record.valid,
                        "Certificate loaded"
                    );
                    keys.insert(entry.alias.clone(), entry.private_key);
                    records.insert(entry.alias, record);
                }
                Err(e) => {
                    tracing::warn!(alias = %entry.alias, error = %e, "Skipping unparsable certificate");
                }
            }
        }

        Self {
            records,
            keys,
            loaded_utc: now,
        }
    }
}

/// Directory of signing certificates backed by a keystore.
pub struct CertificateStore {
    settings: KeystoreSettings,
    snapshot: RwLock<Arc<Snapshot>>,
    reload_lock: Mutex<()>,
}

impl CertificateStore {
    /// Load the keystore once and build the initial directory.
    pub fn initialize(settings: KeystoreSettings) -> Result<Self, ComplianceError> {
        let snapshot = Self::load(&settings).inspect_err(|e| {
            CERTIFICATE_RELOADS_TOTAL.with_label_values(&["failed"]).inc();
            tracing::error!(error = %e, path = %settings.path.display(), "Failed to initialize certificate store");
        })?;
        CERTIFICATE_RELOADS_TOTAL.with_label_values(&["loaded"]).inc();

        tracing::info!(
            path = %settings.path.display(),
            keystore_type = settings.keystore_type.as_str(),
            certificates = snapshot.records.len(),
            "Certificate store initialized"
        );

        Ok(Self {
            settings,
            snapshot: RwLock::new(Arc::new(snapshot)),
            reload_lock: Mutex::new(()),
        })
    }

    /// Convenience constructor taking the settings piecemeal.
    pub fn open(
        keystore_path: impl Into<PathBuf>,
        password: SecretString,
        keystore_type: &str,
        default_alias: impl Into<String>,
    ) -> Result<Self, ComplianceError> {
        Self::initialize(KeystoreSettings {
            path: keystore_path.into(),
            password,
            keystore_type: keystore_type.parse()?,
            default_alias: default_alias.into(),
        })
    }

    fn load(settings: &KeystoreSettings) -> Result<Snapshot, ComplianceError> {
        let entries =
            keystore::load_entries(&settings.path, &settings.password, settings.keystore_type)?;
        Ok(Snapshot::build(entries, Utc::now()))
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    /// Look up a certificate that was valid when the store was loaded.
    pub fn lookup(&self, alias: &str) -> Result<CertificateRecord, ComplianceError> {
        let snapshot = self.current();
        let record = snapshot
            .records
            .get(alias)
            .ok_or_else(|| ComplianceError::CertificateNotFound(alias.to_string()))?;

        if !record.valid {
            tracing::warn!(alias = %alias, not_after = %record.not_after, "Rejected invalid certificate");
            return Err(ComplianceError::CertificateExpired(alias.to_string()));
        }
        Ok(record.clone())
    }

    pub fn lookup_default(&self) -> Result<CertificateRecord, ComplianceError> {
        self.lookup(&self.settings.default_alias)
    }

    pub fn default_alias(&self) -> &str {
        &self.settings.default_alias
    }

    pub fn list_all(&self) -> Vec<CertificateRecord> {
        self.current().records.values().cloned().collect()
    }

    pub fn list_valid(&self) -> Vec<CertificateRecord> {
        self.current()
            .records
            .values()
            .filter(|record| record.valid)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.current().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn loaded_utc(&self) -> DateTime<Utc> {
        self.current().loaded_utc
    }

    /// Private key material for `alias`. Never log the result.
    pub fn private_key(&self, alias: &str) -> Result<SecretVec<u8>, ComplianceError> {
        let snapshot = self.current();
        let key = snapshot.keys.get(alias).ok_or_else(|| {
            ComplianceError::Configuration(
                anyhow::Error::new(ComplianceError::CertificateNotFound(alias.to_string()))
                    .context(format!("cannot retrieve private key for '{}'", alias)),
            )
        })?;
        if key.expose_secret().is_empty() {
            return Err(ComplianceError::configuration(format!(
                "empty private key for '{}'",
                alias
            )));
        }
        Ok(SecretVec::new(key.expose_secret().clone()))
    }

    /// True iff the digital-signature key usage bit is set.
    pub fn is_signature_capable(&self, alias: &str) -> Result<bool, ComplianceError> {
        Ok(self.lookup(alias)?.digital_signature())
    }

    /// True iff the certificate can sign business-to-business transactions.
    pub fn is_b2b_capable(&self, alias: &str) -> Result<bool, ComplianceError> {
        Ok(is_juridical_capable(&self.lookup(alias)?))
    }

    /// Rebuild the directory from the keystore and swap it in.
    ///
    /// On failure the previous snapshot stays in place.
    pub fn reload(&self) -> Result<usize, ComplianceError> {
        let _guard = self.reload_lock.lock();

        let snapshot = match Self::load(&self.settings) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                CERTIFICATE_RELOADS_TOTAL.with_label_values(&["failed"]).inc();
                tracing::error!(error = %e, "Certificate store reload failed, keeping previous snapshot");
                return Err(e);
            }
        };
        let count = snapshot.records.len();
        *self.snapshot.write() = Arc::new(snapshot);

        CERTIFICATE_RELOADS_TOTAL.with_label_values(&["reloaded"]).inc();
        tracing::info!(certificates = count, "Certificate store reloaded");
        Ok(count)
    }
}
