//! Error taxonomy for compliance-service.
//!
//! [`ComplianceError`] is raised to callers of certificate and orchestration
//! operations. [`GatewayError`] never crosses the gateway boundary: it is
//! folded into a failure-shaped outcome so invoice processing can continue.

use crate::models::InvoiceState;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::fmt::Display;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ComplianceError {
    #[error("Configuration error: {0}")]
    Configuration(anyhow::Error),

    #[error("Certificate not found: {0}")]
    CertificateNotFound(String),

    #[error("Certificate expired or not yet valid: {0}")]
    CertificateExpired(String),

    #[error("Invalid invoice {invoice_number}: {reason}")]
    InvalidInvoice {
        invoice_number: String,
        reason: String,
    },

    #[error("Amount out of range: {0}")]
    AmountOutOfRange(Decimal),

    #[error("Cannot {operation} an invoice in state {from}")]
    InvalidStateTransition {
        from: InvoiceState,
        operation: &'static str,
    },
}

impl ComplianceError {
    pub fn configuration(message: impl Display) -> Self {
        ComplianceError::Configuration(anyhow::anyhow!("{}", message))
    }
}

impl From<AppError> for ComplianceError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::ConfigError(cause) => ComplianceError::Configuration(cause),
        }
    }
}

/// Failure raised inside a gateway implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Rejected by authority [{code}]: {message}")]
    Business { code: String, message: String },

    #[error("Gateway configuration error: {0}")]
    Configuration(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Technical error: {0}")]
    Unexpected(String),
}

impl GatewayError {
    /// Stable error code carried in outcomes.
    pub fn code(&self) -> &str {
        match self {
            GatewayError::Communication(_) => "COMMUNICATION",
            GatewayError::Business { code, .. } => code,
            GatewayError::Configuration(_) => "CONFIGURATION",
            GatewayError::NotImplemented(_) => "NOT_IMPLEMENTED",
            GatewayError::Unexpected(_) => "TECHNICAL",
        }
    }

    /// Only network-level failures may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Communication(_))
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Unexpected(format!("request serialization failed: {}", err))
    }
}

impl From<ComplianceError> for GatewayError {
    fn from(err: ComplianceError) -> Self {
        GatewayError::Configuration(err.to_string())
    }
}
