//! Signing certificate metadata for compliance-service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Certification authority that issued a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuingAuthority {
    /// Fábrica Nacional de Moneda y Timbre.
    Fnmt,
    /// Agencia de Tecnología y Certificación Electrónica (regional).
    Accv,
    /// Chambers of commerce.
    Camerfirma,
    /// National electronic ID card.
    Dnie,
    Unknown,
}

impl IssuingAuthority {
    pub fn display_name(&self) -> &'static str {
        match self {
            IssuingAuthority::Fnmt => "FNMT-RCM",
            IssuingAuthority::Accv => "ACCV",
            IssuingAuthority::Camerfirma => "CAMERFIRMA",
            IssuingAuthority::Dnie => "DGP-FNMT",
            IssuingAuthority::Unknown => "UNKNOWN",
        }
    }
}

/// Issuer category used to decide what a certificate may sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuerCategory {
    NationalAuthorityNaturalPerson,
    NationalAuthorityJuridicalPerson,
    NationalAuthorityGeneral,
    RegionalAuthority,
    ChamberOfCommerce,
    NationalIdCard,
    Other,
}

impl IssuerCategory {
    pub fn description(&self) -> &'static str {
        match self {
            IssuerCategory::NationalAuthorityNaturalPerson => "FNMT - Persona Física",
            IssuerCategory::NationalAuthorityJuridicalPerson => "FNMT - Persona Jurídica",
            IssuerCategory::NationalAuthorityGeneral => "FNMT - General",
            IssuerCategory::RegionalAuthority => "ACCV",
            IssuerCategory::ChamberOfCommerce => "CamerFirma",
            IssuerCategory::NationalIdCard => "DNI Electrónico",
            IssuerCategory::Other => "Otro",
        }
    }

    pub fn authority(&self) -> IssuingAuthority {
        match self {
            IssuerCategory::NationalAuthorityNaturalPerson
            | IssuerCategory::NationalAuthorityJuridicalPerson
            | IssuerCategory::NationalAuthorityGeneral => IssuingAuthority::Fnmt,
            IssuerCategory::RegionalAuthority => IssuingAuthority::Accv,
            IssuerCategory::ChamberOfCommerce => IssuingAuthority::Camerfirma,
            IssuerCategory::NationalIdCard => IssuingAuthority::Dnie,
            IssuerCategory::Other => IssuingAuthority::Unknown,
        }
    }
}

/// Certificate metadata captured when the keystore is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub alias: String,
    pub subject: String,
    pub issuer: String,
    pub serial_number: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// X.509 key usage bits in declaration order; index 0 is digitalSignature.
    pub key_usage: Vec<bool>,
    pub category: IssuerCategory,
    /// Validity judged at load time. Not re-evaluated until the store reloads.
    pub valid: bool,
}

impl CertificateRecord {
    pub fn authority(&self) -> IssuingAuthority {
        self.category.authority()
    }

    pub fn digital_signature(&self) -> bool {
        self.key_usage.first().copied().unwrap_or(false)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.not_after
    }

    /// Strictly inside the validity window.
    pub fn is_current_at(&self, now: DateTime<Utc>) -> bool {
        now > self.not_before && now < self.not_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(key_usage: Vec<bool>) -> CertificateRecord {
        CertificateRecord {
            alias: "firma".to_string(),
            subject: "CN=Test".to_string(),
            issuer: "O=FNMT-RCM".to_string(),
            serial_number: "1".to_string(),
            not_before: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            not_after: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            key_usage,
            category: IssuerCategory::NationalAuthorityGeneral,
            valid: true,
        }
    }

    #[test]
    fn window_bounds_are_exclusive() {
        let cert = record(vec![true]);
        assert!(!cert.is_current_at(cert.not_before));
        assert!(!cert.is_current_at(cert.not_after));
        assert!(cert.is_current_at(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()));
        assert!(cert.is_expired_at(Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap()));
    }

    #[test]
    fn digital_signature_reads_first_bit() {
        assert!(record(vec![true, false]).digital_signature());
        assert!(!record(vec![false, true]).digital_signature());
        assert!(!record(Vec::new()).digital_signature());
    }

    #[test]
    fn category_maps_to_authority() {
        assert_eq!(
            IssuerCategory::NationalAuthorityJuridicalPerson
                .authority()
                .display_name(),
            "FNMT-RCM"
        );
        assert_eq!(IssuerCategory::NationalIdCard.authority().display_name(), "DGP-FNMT");
        assert_eq!(IssuerCategory::Other.authority(), IssuingAuthority::Unknown);
    }
}
