//! Keystore container parsing.
//!
//! Two container types are supported:
//! - `PKCS12`: a single `.p12`/`.pfx` file opened with the keystore password.
//!   Every private-key entry yields one key entry named by its alias.
//! - `PEM`: a directory where each `<alias>.pem` file holds a `CERTIFICATE`
//!   block followed by an unencrypted `PRIVATE KEY` block. Files without a
//!   private key are not key entries and are skipped.

use crate::error::ComplianceError;
use anyhow::Context;
use secrecy::{ExposeSecret, SecretString, SecretVec};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeystoreType {
    Pkcs12,
    Pem,
}

impl KeystoreType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeystoreType::Pkcs12 => "PKCS12",
            KeystoreType::Pem => "PEM",
        }
    }
}

impl FromStr for KeystoreType {
    type Err = ComplianceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PKCS12" | "P12" | "PFX" => Ok(KeystoreType::Pkcs12),
            "PEM" => Ok(KeystoreType::Pem),
            other => Err(ComplianceError::configuration(format!(
                "unsupported keystore type: {}",
                other
            ))),
        }
    }
}

/// A private key with its leaf certificate.
pub(crate) struct KeyEntry {
    pub alias: String,
    pub certificate_der: Vec<u8>,
    pub private_key: SecretVec<u8>,
}

pub(crate) fn load_entries(
    path: &Path,
    password: &SecretString,
    keystore_type: KeystoreType,
) -> Result<Vec<KeyEntry>, ComplianceError> {
    match keystore_type {
        KeystoreType::Pkcs12 => load_pkcs12(path, password),
        KeystoreType::Pem => load_pem_directory(path),
    }
}

fn load_pkcs12(path: &Path, password: &SecretString) -> Result<Vec<KeyEntry>, ComplianceError> {
    let data = fs::read(path)
        .with_context(|| format!("cannot read keystore {}", path.display()))
        .map_err(ComplianceError::Configuration)?;

    let keystore = p12_keystore::KeyStore::from_pkcs12(&data, password.expose_secret())
        .map_err(|e| {
            ComplianceError::configuration(format!(
                "cannot open PKCS12 keystore {} (wrong password or corrupt file): {}",
                path.display(),
                e
            ))
        })?;

    let mut entries = Vec::new();
    for (alias, entry) in keystore.entries() {
        let p12_keystore::KeyStoreEntry::PrivateKeyChain(chain) = entry else {
            tracing::debug!(alias = %alias, "Skipping non-key keystore entry");
            continue;
        };
        let Some(leaf) = chain.chain().first() else {
            tracing::warn!(alias = %alias, "Key entry has no certificate chain");
            continue;
        };
        entries.push(KeyEntry {
            alias: alias.clone(),
            certificate_der: leaf.as_der().to_vec(),
            private_key: SecretVec::new(chain.key().to_vec()),
        });
    }
    Ok(entries)
}

fn load_pem_directory(path: &Path) -> Result<Vec<KeyEntry>, ComplianceError> {
    let dir = fs::read_dir(path)
        .with_context(|| format!("cannot read PEM keystore directory {}", path.display()))
        .map_err(ComplianceError::Configuration)?;

    let mut files: Vec<PathBuf> = dir
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.extension().and_then(|ext| ext.to_str()) == Some("pem"))
        .collect();
    files.sort();

    let mut entries = Vec::new();
    for file in files {
        let Some(alias) = file.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Some(entry) = load_pem_file(&file, alias)? {
            entries.push(entry);
        }
    }
    Ok(entries)
}

fn load_pem_file(file: &Path, alias: &str) -> Result<Option<KeyEntry>, ComplianceError> {
    let data = fs::read(file)
        .with_context(|| format!("cannot read {}", file.display()))
        .map_err(ComplianceError::Configuration)?;
    let blocks = pem::parse_many(&data)
        .with_context(|| format!("malformed PEM in {}", file.display()))
        .map_err(ComplianceError::Configuration)?;

    if blocks.iter().any(|b| b.tag() == "ENCRYPTED PRIVATE KEY") {
        return Err(ComplianceError::configuration(format!(
            "encrypted private keys are not supported in PEM keystores: {}",
            file.display()
        )));
    }

    let certificate = blocks.iter().find(|b| b.tag() == "CERTIFICATE");
    let key = blocks.iter().find(|b| b.tag().ends_with("PRIVATE KEY"));

    match (certificate, key) {
        (Some(certificate), Some(key)) => Ok(Some(KeyEntry {
            alias: alias.to_string(),
            certificate_der: certificate.contents().to_vec(),
            private_key: SecretVec::new(key.contents().to_vec()),
        })),
        _ => {
            tracing::debug!(alias = %alias, "Skipping PEM file without certificate and key");
            Ok(None)
        }
    }
}
