//! Registration gateway abstractions and implementations.
//!
//! The gateway submits, queries and annuls invoice registrations with the
//! tax authority. Two implementations share the contract and one of them is
//! chosen when the service starts:
//! - [`SandboxGateway`] synthesizes successful results without any network I/O.
//! - [`ProductionGateway`] validates its signing identity and reports the
//!   signed submission as not implemented. It never falls back to the sandbox.
//!
//! Gateway methods do not fail. Every [`GatewayError`] is folded into a
//! failure-shaped outcome before it leaves the implementation.

pub mod production;
pub mod sandbox;

pub use production::ProductionGateway;
pub use sandbox::SandboxGateway;

use crate::error::GatewayError;
use crate::models::{
    ConsultationOutcome, Invoice, RegistrationOutcome, RegistrationRequest, DEFAULT_CURRENCY,
    DEFAULT_DOCUMENT_TYPE, DEFAULT_OPERATION_CODE,
};
use async_trait::async_trait;
use std::fmt;

/// Message shown on an invoice when a registration fails for a reason that
/// is only useful in the logs.
pub const TECHNICAL_FAILURE_MESSAGE: &str = "Technical error during registration";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    Sandbox,
    Production,
}

impl GatewayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayMode::Sandbox => "sandbox",
            GatewayMode::Production => "production",
        }
    }

    pub fn is_test(&self) -> bool {
        matches!(self, GatewayMode::Sandbox)
    }
}

impl fmt::Display for GatewayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The company on whose behalf invoices are registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerIdentity {
    pub tax_id: String,
    pub legal_name: String,
}

impl IssuerIdentity {
    pub fn new(tax_id: impl Into<String>, legal_name: impl Into<String>) -> Self {
        Self {
            tax_id: tax_id.into(),
            legal_name: legal_name.into(),
        }
    }

    /// Invoices issued by another tax id cannot be registered under this identity.
    pub fn check_issuer(&self, invoice: &Invoice) -> Result<(), GatewayError> {
        if invoice.issuer_tax_id() == self.tax_id {
            Ok(())
        } else {
            Err(GatewayError::Configuration(format!(
                "invoice {} is issued by {} but the gateway registers for {}",
                invoice.invoice_number(),
                invoice.issuer_tax_id(),
                self.tax_id
            )))
        }
    }
}

/// Trait for tax authority registration backends.
#[async_trait]
pub trait RegistrationGateway: Send + Sync {
    fn mode(&self) -> GatewayMode;

    /// Alias of the certificate recorded on invoices this gateway registers.
    fn signing_alias(&self) -> &str;

    /// Submit an invoice. A successful outcome carries the registration
    /// number, the registration time and the integrity hash that was sent.
    async fn register(&self, invoice: &Invoice) -> RegistrationOutcome;

    async fn query(&self, registration_number: &str) -> ConsultationOutcome;

    async fn annul(&self, registration_number: &str, reason: &str) -> RegistrationOutcome;
}

/// Assemble the submission payload for `invoice`.
pub fn build_request(
    invoice: &Invoice,
    issuer: &IssuerIdentity,
    integrity_hash: &str,
    test_mode: bool,
) -> RegistrationRequest {
    RegistrationRequest {
        issuer_tax_id: issuer.tax_id.clone(),
        issuer_legal_name: issuer.legal_name.clone(),
        invoice_number: invoice.invoice_number().to_string(),
        issue_date: invoice.issue_date(),
        base_amount: invoice.base_amount(),
        tax_rate: invoice.tax_rate(),
        tax_amount: invoice.tax_amount(),
        total: invoice.total(),
        receiver_tax_id: invoice.receiver_tax_id().map(str::to_string),
        receiver_name: invoice.receiver_name().trim().to_string(),
        integrity_hash: integrity_hash.to_string(),
        test_mode,
        operation_code: DEFAULT_OPERATION_CODE.to_string(),
        document_type: DEFAULT_DOCUMENT_TYPE.to_string(),
        currency: DEFAULT_CURRENCY.to_string(),
    }
}

/// Turn an internal registration result into an outcome.
///
/// Technical failures keep their cause in the log; the outcome carries a
/// generic message.
pub(crate) fn fold_registration(
    result: Result<RegistrationOutcome, GatewayError>,
    invoice_number: &str,
    operation: &str,
) -> RegistrationOutcome {
    match result {
        Ok(outcome) => outcome,
        Err(GatewayError::Unexpected(detail)) => {
            tracing::error!(
                invoice_number = %invoice_number,
                operation = %operation,
                error = %detail,
                "Unexpected gateway failure"
            );
            RegistrationOutcome {
                success: false,
                error_code: Some("TECHNICAL".to_string()),
                error_message: Some(TECHNICAL_FAILURE_MESSAGE.to_string()),
                ..Default::default()
            }
        }
        Err(e) => {
            tracing::warn!(
                invoice_number = %invoice_number,
                operation = %operation,
                code = %e.code(),
                error = %e,
                "Gateway call failed"
            );
            RegistrationOutcome::failure(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CreateInvoice, TaxRateCategory};
    use chrono::NaiveDate;

    fn invoice(issuer: &str) -> Invoice {
        Invoice::draft(
            CreateInvoice {
                issuer_tax_id: issuer.to_string(),
                receiver_tax_id: None,
                receiver_name: " Ana López ".to_string(),
                invoice_number: "2025/000010".to_string(),
                issue_date: NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(),
                service_code: "86.21".to_string(),
                medical_service: true,
                base_amount: "80".parse().unwrap(),
                facturae_requested: false,
            },
            TaxRateCategory::SuperReduced,
        )
        .unwrap()
    }

    #[test]
    fn request_carries_invoice_amounts_and_defaults() {
        let issuer = IssuerIdentity::new("B12345678", "Clínica Ejemplo SL");
        let request = build_request(&invoice("B12345678"), &issuer, "ABC", true);

        assert_eq!(request.issuer_legal_name, "Clínica Ejemplo SL");
        assert_eq!(request.total, "83.20".parse().unwrap());
        assert_eq!(request.tax_amount, "3.20".parse().unwrap());
        assert_eq!(request.receiver_tax_id, None);
        assert_eq!(request.receiver_name, "Ana López");
        assert_eq!(request.operation_code, "S1");
        assert_eq!(request.document_type, "F1");
        assert_eq!(request.currency, "EUR");
        assert!(request.test_mode);
    }

    #[test]
    fn issuer_mismatch_is_configuration_failure() {
        let issuer = IssuerIdentity::new("B12345678", "Clínica Ejemplo SL");
        assert!(issuer.check_issuer(&invoice("B12345678")).is_ok());
        let err = issuer.check_issuer(&invoice("A87654321")).unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION");
    }

    #[test]
    fn unexpected_failures_hide_their_cause() {
        let outcome = fold_registration(
            Err(GatewayError::Unexpected("serializer exploded".to_string())),
            "2025/000010",
            "register",
        );
        assert!(!outcome.success);
        assert_eq!(outcome.error_code.as_deref(), Some("TECHNICAL"));
        assert_eq!(outcome.error_message.as_deref(), Some(TECHNICAL_FAILURE_MESSAGE));
        assert!(outcome.technical_detail.is_none());
    }

    #[test]
    fn business_failures_keep_authority_code() {
        let outcome = fold_registration(
            Err(GatewayError::Business {
                code: "4102".to_string(),
                message: "duplicated invoice".to_string(),
            }),
            "2025/000010",
            "register",
        );
        assert_eq!(outcome.error_code.as_deref(), Some("4102"));
        assert!(outcome.error_message.unwrap().contains("duplicated invoice"));
    }
}
