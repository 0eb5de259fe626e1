//! Common test utilities for compliance-service integration tests.
#![allow(dead_code)]

use chrono::NaiveDate;
use compliance_service::models::{CreateInvoice, Invoice, TaxRateCategory};
use compliance_service::services::{CertificateStore, IssuerIdentity};
use rcgen::{Certificate, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret, SecretString};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const TEST_ISSUER_TAX_ID: &str = "B12345678";
pub const TEST_ISSUER_NAME: &str = "Clinica Ejemplo SL";
pub const TEST_RECEIVER_TAX_ID: &str = "12345678Z";

/// Juridical-person signing certificate, the default alias.
pub const SIGNING_ALIAS: &str = "firma";
/// Natural-person certificate from the national authority.
pub const PERSON_ALIAS: &str = "persona";
/// Regional authority certificate.
pub const REGIONAL_ALIAS: &str = "accv";
/// Unknown issuer, no key usage extension.
pub const OTHER_ALIAS: &str = "acme";
/// Expired in 2001.
pub const EXPIRED_ALIAS: &str = "caducado";

/// How to build one test certificate.
pub struct CertProfile<'a> {
    pub common_name: &'a str,
    pub organization: &'a str,
    pub unit: Option<&'a str>,
    pub not_before: (i32, u8, u8),
    pub not_after: (i32, u8, u8),
    pub digital_signature: bool,
}

impl<'a> CertProfile<'a> {
    pub fn current(common_name: &'a str, organization: &'a str, unit: Option<&'a str>) -> Self {
        Self {
            common_name,
            organization,
            unit,
            not_before: (2020, 1, 1),
            not_after: (2045, 1, 1),
            digital_signature: true,
        }
    }
}

/// Self-signed certificate and key for `profile`.
pub fn generate_certificate(profile: &CertProfile<'_>) -> (Certificate, KeyPair) {
    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, profile.common_name);
    params
        .distinguished_name
        .push(DnType::OrganizationName, profile.organization);
    if let Some(unit) = profile.unit {
        params
            .distinguished_name
            .push(DnType::OrganizationalUnitName, unit);
    }
    params.not_before = rcgen::date_time_ymd(profile.not_before.0, profile.not_before.1, profile.not_before.2);
    params.not_after = rcgen::date_time_ymd(profile.not_after.0, profile.not_after.1, profile.not_after.2);
    // rcgen writes no extensions at all for a default `is_ca`.
    params.is_ca = IsCa::ExplicitNoCa;
    if profile.digital_signature {
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    }

    let key_pair = KeyPair::generate().expect("Failed to generate key pair");
    let cert = params
        .self_signed(&key_pair)
        .expect("Failed to self-sign certificate");
    (cert, key_pair)
}

/// Write `<alias>.pem` holding a fresh self-signed certificate and its key.
pub fn write_certificate(dir: &Path, alias: &str, profile: &CertProfile<'_>) {
    let (cert, key_pair) = generate_certificate(profile);
    let contents = format!("{}{}", cert.pem(), key_pair.serialize_pem());
    std::fs::write(dir.join(format!("{}.pem", alias)), contents)
        .expect("Failed to write certificate");
}

/// A PKCS#12 file holding the juridical-person signing certificate under
/// `SIGNING_ALIAS`, protected by `password()`.
pub fn pkcs12_keystore() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create keystore dir");
    let (cert, key_pair) = generate_certificate(&CertProfile::current(
        "Clinica Ejemplo SL",
        "FNMT-RCM",
        Some("PERSONA JURIDICA"),
    ));

    let certificate =
        p12_keystore::Certificate::from_der(cert.der()).expect("Failed to wrap certificate");
    let chain = p12_keystore::PrivateKeyChain::new(
        key_pair.serialize_der(),
        [1u8, 2, 3, 4],
        [certificate],
    );
    let mut keystore = p12_keystore::KeyStore::new();
    keystore.add_entry(SIGNING_ALIAS, p12_keystore::KeyStoreEntry::PrivateKeyChain(chain));
    let data = keystore
        .writer(password().expose_secret())
        .write()
        .expect("Failed to write PKCS12 keystore");

    let path = dir.path().join("store.p12");
    std::fs::write(&path, data).expect("Failed to write keystore file");
    (dir, path)
}

/// A PEM keystore directory with one certificate per test alias.
pub fn pem_keystore() -> TempDir {
    let dir = tempfile::tempdir().expect("Failed to create keystore dir");

    write_certificate(
        dir.path(),
        SIGNING_ALIAS,
        &CertProfile::current("Clinica Ejemplo SL", "FNMT-RCM", Some("PERSONA JURIDICA")),
    );
    write_certificate(
        dir.path(),
        PERSON_ALIAS,
        &CertProfile::current("Ana Lopez", "FNMT-RCM", Some("PERSONA FISICA")),
    );
    write_certificate(
        dir.path(),
        REGIONAL_ALIAS,
        &CertProfile::current("ACCVCA-120", "ACCV", None),
    );
    write_certificate(
        dir.path(),
        OTHER_ALIAS,
        &CertProfile {
            digital_signature: false,
            ..CertProfile::current("Acme Test Signing", "Acme Corp", None)
        },
    );
    write_certificate(
        dir.path(),
        EXPIRED_ALIAS,
        &CertProfile {
            not_before: (2000, 1, 1),
            not_after: (2001, 1, 1),
            ..CertProfile::current("Old Signing", "FNMT-RCM", None)
        },
    );

    dir
}

pub fn password() -> SecretString {
    Secret::new("changeit".to_string())
}

pub fn open_store(dir: &Path) -> CertificateStore {
    CertificateStore::open(dir, password(), "PEM", SIGNING_ALIAS)
        .expect("Failed to open certificate store")
}

pub fn issuer() -> IssuerIdentity {
    IssuerIdentity::new(TEST_ISSUER_TAX_ID, TEST_ISSUER_NAME)
}

pub fn decimal(s: &str) -> Decimal {
    s.parse().expect("Invalid decimal")
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("Invalid date")
}

pub fn create_input(number: &str, issue_date: NaiveDate, base: &str) -> CreateInvoice {
    CreateInvoice {
        issuer_tax_id: TEST_ISSUER_TAX_ID.to_string(),
        receiver_tax_id: Some(TEST_RECEIVER_TAX_ID.to_string()),
        receiver_name: "Ana Lopez".to_string(),
        invoice_number: number.to_string(),
        issue_date,
        service_code: "86.21".to_string(),
        medical_service: true,
        base_amount: decimal(base),
        facturae_requested: false,
    }
}

/// A draft medical invoice dated after the mandatory registration date.
pub fn medical_invoice(number: &str) -> Invoice {
    Invoice::draft(
        create_input(number, date(2025, 7, 15), "500.00"),
        TaxRateCategory::SuperReduced,
    )
    .expect("Failed to draft invoice")
}
