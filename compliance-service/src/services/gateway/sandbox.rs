//! Sandbox gateway: deterministic synthetic success, no network I/O.

use super::{
    build_request, fold_registration, GatewayMode, IssuerIdentity, RegistrationGateway,
};
use crate::error::GatewayError;
use crate::models::{ConsultationOutcome, Invoice, RegistrationOutcome};
use crate::services::integrity::compute_integrity_hash;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Prefix of every synthesized registration number.
pub const REGISTRATION_PREFIX: &str = "VF";
/// Suffix appended to a registration number when it is annulled.
pub const ANNULMENT_SUFFIX: &str = "_ANNULLED";
/// Consultation state reported for any queried number.
pub const REGISTERED_STATE: &str = "REGISTERED";

pub struct SandboxGateway {
    issuer: IssuerIdentity,
    certificate_alias: String,
}

impl SandboxGateway {
    pub fn new(issuer: IssuerIdentity, certificate_alias: impl Into<String>) -> Self {
        Self {
            issuer,
            certificate_alias: certificate_alias.into(),
        }
    }

    /// `VF` + `yyyyMMddHHmmss` + eight upper-case random hex characters.
    pub fn registration_number(at: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
        format!(
            "{}{}{}",
            REGISTRATION_PREFIX,
            at.format("%Y%m%d%H%M%S"),
            suffix
        )
    }

    fn try_register(&self, invoice: &Invoice) -> Result<RegistrationOutcome, GatewayError> {
        self.issuer.check_issuer(invoice)?;

        let hash = compute_integrity_hash(invoice, &self.issuer.tax_id);
        let request = build_request(invoice, &self.issuer, &hash, true);
        let payload = serde_json::to_vec(&request)?;

        tracing::info!(
            invoice_number = %request.invoice_number,
            payload_bytes = payload.len(),
            "Sandbox mode, simulating successful registration"
        );

        let now = Utc::now();
        Ok(RegistrationOutcome::success(Self::registration_number(now), now).with_integrity_hash(hash))
    }
}

#[async_trait]
impl RegistrationGateway for SandboxGateway {
    fn mode(&self) -> GatewayMode {
        GatewayMode::Sandbox
    }

    fn signing_alias(&self) -> &str {
        &self.certificate_alias
    }

    async fn register(&self, invoice: &Invoice) -> RegistrationOutcome {
        fold_registration(
            self.try_register(invoice),
            invoice.invoice_number(),
            "register",
        )
    }

    async fn query(&self, registration_number: &str) -> ConsultationOutcome {
        tracing::info!(registration_number = %registration_number, "Sandbox consultation");
        let now = Utc::now();
        ConsultationOutcome {
            found: true,
            state: REGISTERED_STATE.to_string(),
            registered_utc: Some(now),
            last_modified_utc: Some(now),
            ..Default::default()
        }
    }

    async fn annul(&self, registration_number: &str, reason: &str) -> RegistrationOutcome {
        tracing::info!(
            registration_number = %registration_number,
            reason = %reason,
            "Sandbox annulment"
        );
        RegistrationOutcome::success(
            format!("{}{}", registration_number, ANNULMENT_SUFFIX),
            Utc::now(),
        )
    }
}
