//! Registration payloads and outcomes exchanged with the tax authority.

use crate::error::GatewayError;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Professional services.
pub const DEFAULT_OPERATION_CODE: &str = "S1";
/// Complete invoice.
pub const DEFAULT_DOCUMENT_TYPE: &str = "F1";
pub const DEFAULT_CURRENCY: &str = "EUR";

/// Submission payload for one invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub issuer_tax_id: String,
    pub issuer_legal_name: String,
    pub invoice_number: String,
    pub issue_date: NaiveDate,
    pub base_amount: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub receiver_tax_id: Option<String>,
    pub receiver_name: String,
    pub integrity_hash: String,
    pub test_mode: bool,
    pub operation_code: String,
    pub document_type: String,
    pub currency: String,
}

/// Result of a register or annul call. Produced once, never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationOutcome {
    pub success: bool,
    pub registration_number: Option<String>,
    pub registered_utc: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// Hash submitted with the request, when one was computed.
    pub integrity_hash: Option<String>,
    pub response_hash: Option<String>,
    pub verification_code: Option<String>,
    pub consultation_url: Option<String>,
    pub technical_detail: Option<String>,
}

impl RegistrationOutcome {
    pub fn success(registration_number: String, registered_utc: DateTime<Utc>) -> Self {
        Self {
            success: true,
            registration_number: Some(registration_number),
            registered_utc: Some(registered_utc),
            ..Default::default()
        }
    }

    pub fn failure(error: &GatewayError) -> Self {
        Self {
            success: false,
            error_code: Some(error.code().to_string()),
            error_message: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn with_integrity_hash(mut self, hash: impl Into<String>) -> Self {
        self.integrity_hash = Some(hash.into());
        self
    }

    /// Failure caused by the network rather than the authority.
    pub fn is_transient_failure(&self) -> bool {
        !self.success && self.error_code.as_deref() == Some("COMMUNICATION")
    }
}

/// Result of a consultation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsultationOutcome {
    pub found: bool,
    pub state: String,
    pub registered_utc: Option<DateTime<Utc>>,
    pub last_modified_utc: Option<DateTime<Utc>>,
    pub status_detail: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl ConsultationOutcome {
    pub fn failure(error: &GatewayError) -> Self {
        Self {
            found: false,
            state: error.code().to_string(),
            error_code: Some(error.code().to_string()),
            error_message: Some(error.to_string()),
            ..Default::default()
        }
    }
}
