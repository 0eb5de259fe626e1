//! Production gateway.
//!
//! Signed submission to the authority is not implemented. Registration checks
//! the issuer and the signing certificate before failing with an explicit
//! `NOT_IMPLEMENTED` outcome. Consultation and annulment report
//! `NOT_IMPLEMENTED` unconditionally.

use super::{
    build_request, fold_registration, GatewayMode, IssuerIdentity, RegistrationGateway,
};
use crate::error::GatewayError;
use crate::models::{ConsultationOutcome, Invoice, RegistrationOutcome};
use crate::services::certificates::CertificateStore;
use crate::services::integrity::compute_integrity_hash;
use async_trait::async_trait;
use std::sync::Arc;

/// Authority reception endpoint.
pub const DEFAULT_ENDPOINT: &str =
    "https://www7.aeat.es/wlpl/TIKE-CONT/VerifactuRecepcionFactura";

pub struct ProductionGateway {
    issuer: IssuerIdentity,
    endpoint: String,
    certificate_alias: String,
    certificates: Arc<CertificateStore>,
}

impl ProductionGateway {
    pub fn new(
        issuer: IssuerIdentity,
        endpoint: impl Into<String>,
        certificate_alias: impl Into<String>,
        certificates: Arc<CertificateStore>,
    ) -> Self {
        Self {
            issuer,
            endpoint: endpoint.into(),
            certificate_alias: certificate_alias.into(),
            certificates,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The configured certificate must exist, be valid and allow digital signatures.
    fn check_signing_identity(&self) -> Result<(), GatewayError> {
        let record = self.certificates.lookup(&self.certificate_alias)?;
        if !record.digital_signature() {
            return Err(GatewayError::Configuration(format!(
                "certificate '{}' does not allow digital signatures",
                self.certificate_alias
            )));
        }
        Ok(())
    }

    fn try_register(&self, invoice: &Invoice) -> Result<RegistrationOutcome, GatewayError> {
        self.issuer.check_issuer(invoice)?;

        let hash = compute_integrity_hash(invoice, &self.issuer.tax_id);
        let request = build_request(invoice, &self.issuer, &hash, false);
        let payload = serde_json::to_vec(&request)?;
        self.check_signing_identity()?;

        tracing::warn!(
            invoice_number = %request.invoice_number,
            endpoint = %self.endpoint,
            payload_bytes = payload.len(),
            "Signed submission is not implemented"
        );
        Err(GatewayError::NotImplemented(format!(
            "signed submission to {} is not implemented",
            self.endpoint
        )))
    }
}

#[async_trait]
impl RegistrationGateway for ProductionGateway {
    fn mode(&self) -> GatewayMode {
        GatewayMode::Production
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
        tracing::warn!(
            registration_number = %registration_number,
            "Consultation is not implemented"
        );
        ConsultationOutcome::failure(&GatewayError::NotImplemented(
            "registration consultation is not implemented".to_string(),
        ))
    }

    async fn annul(&self, registration_number: &str, reason: &str) -> RegistrationOutcome {
        tracing::warn!(
            registration_number = %registration_number,
            reason = %reason,
            "Annulment is not implemented"
        );
        fold_registration(
            Err(GatewayError::NotImplemented(format!(
                "annulment of {} is not implemented",
                registration_number
            ))),
            registration_number,
            "annul",
        )
    }
}
