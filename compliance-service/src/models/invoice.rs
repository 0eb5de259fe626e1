//! Invoice model for compliance-service.
//!
//! Business fields are fixed at draft time and can only be recomputed while
//! the invoice is a draft. Compliance fields are written by the orchestrator
//! alone, through the crate-private setters at the bottom of this file.

use crate::error::ComplianceError;
use crate::models::tax_rate::{TaxBreakdown, TaxRateCategory};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Registration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceState {
    Draft,
    PendingRegistration,
    Registered,
    Error,
    Annulled,
}

impl InvoiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceState::Draft => "draft",
            InvoiceState::PendingRegistration => "pending_registration",
            InvoiceState::Registered => "registered",
            InvoiceState::Error => "error",
            InvoiceState::Annulled => "annulled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "pending_registration" => InvoiceState::PendingRegistration,
            "registered" => InvoiceState::Registered,
            "error" => InvoiceState::Error,
            "annulled" => InvoiceState::Annulled,
            _ => InvoiceState::Draft,
        }
    }

    /// Registered and annulled invoices are never registered again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceState::Registered | InvoiceState::Annulled)
    }
}

impl fmt::Display for InvoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for creating a draft invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    pub issuer_tax_id: String,
    pub receiver_tax_id: Option<String>,
    pub receiver_name: String,
    pub invoice_number: String,
    pub issue_date: NaiveDate,
    pub service_code: String,
    pub medical_service: bool,
    pub base_amount: Decimal,
    /// The receiver asked for a Facturae e-invoice.
    pub facturae_requested: bool,
}

/// Fiscal invoice.
///
/// Deserialization goes through `InvoiceRecord` so stored invoices are held
/// to the same amount and state invariants as freshly drafted ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "InvoiceRecord")]
pub struct Invoice {
    invoice_id: Uuid,
    issuer_tax_id: String,
    receiver_tax_id: Option<String>,
    receiver_name: String,
    invoice_number: String,
    issue_date: NaiveDate,
    service_code: String,
    medical_service: bool,
    base_amount: Decimal,
    tax_rate: Decimal,
    tax_amount: Decimal,
    total: Decimal,
    facturae_requested: bool,

    state: InvoiceState,
    integrity_hash: Option<String>,
    registration_number: Option<String>,
    registered_utc: Option<DateTime<Utc>>,
    certificate_alias: Option<String>,
    annulment_number: Option<String>,
    annulled_utc: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_utc: DateTime<Utc>,
}

impl Invoice {
    /// Build a draft, pricing the base amount at the classified rate.
    pub fn draft(input: CreateInvoice, category: TaxRateCategory) -> Result<Self, ComplianceError> {
        let breakdown = TaxBreakdown::compute(input.base_amount, category)?;
        Ok(Self {
            invoice_id: Uuid::new_v4(),
            issuer_tax_id: input.issuer_tax_id,
            receiver_tax_id: input.receiver_tax_id.filter(|id| !id.is_empty()),
            receiver_name: input.receiver_name,
            invoice_number: input.invoice_number,
            issue_date: input.issue_date,
            service_code: input.service_code,
            medical_service: input.medical_service,
            base_amount: breakdown.base,
            tax_rate: breakdown.rate,
            tax_amount: breakdown.tax_amount,
            total: breakdown.total,
            facturae_requested: input.facturae_requested,
            state: InvoiceState::Draft,
            integrity_hash: None,
            registration_number: None,
            registered_utc: None,
            certificate_alias: None,
            annulment_number: None,
            annulled_utc: None,
            last_error: None,
            created_utc: Utc::now(),
        })
    }

    /// Reprice the invoice. Only legal while it is a draft.
    pub fn amend(
        &mut self,
        base_amount: Decimal,
        category: TaxRateCategory,
    ) -> Result<(), ComplianceError> {
        if self.state != InvoiceState::Draft {
            return Err(ComplianceError::InvalidStateTransition {
                from: self.state,
                operation: "amend",
            });
        }
        let breakdown = TaxBreakdown::compute(base_amount, category)?;
        self.base_amount = breakdown.base;
        self.tax_rate = breakdown.rate;
        self.tax_amount = breakdown.tax_amount;
        self.total = breakdown.total;
        Ok(())
    }

    /// Whether the emission date falls under mandatory registration.
    pub fn requires_registration(&self, mandatory_from: NaiveDate) -> bool {
        self.issue_date >= mandatory_from
    }

    pub fn invoice_id(&self) -> Uuid {
        self.invoice_id
    }

    pub fn issuer_tax_id(&self) -> &str {
        &self.issuer_tax_id
    }

    pub fn receiver_tax_id(&self) -> Option<&str> {
        self.receiver_tax_id.as_deref()
    }

    pub fn receiver_name(&self) -> &str {
        &self.receiver_name
    }

    pub fn invoice_number(&self) -> &str {
        &self.invoice_number
    }

    pub fn issue_date(&self) -> NaiveDate {
        self.issue_date
    }

    pub fn service_code(&self) -> &str {
        &self.service_code
    }

    pub fn is_medical_service(&self) -> bool {
        self.medical_service
    }

    pub fn base_amount(&self) -> Decimal {
        self.base_amount
    }

    /// Rate as a percentage.
    pub fn tax_rate(&self) -> Decimal {
        self.tax_rate
    }

    pub fn tax_amount(&self) -> Decimal {
        self.tax_amount
    }

    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn facturae_requested(&self) -> bool {
        self.facturae_requested
    }

    pub fn state(&self) -> InvoiceState {
        self.state
    }

    pub fn integrity_hash(&self) -> Option<&str> {
        self.integrity_hash.as_deref()
    }

    pub fn registration_number(&self) -> Option<&str> {
        self.registration_number.as_deref()
    }

    pub fn registered_utc(&self) -> Option<DateTime<Utc>> {
        self.registered_utc
    }

    pub fn certificate_alias(&self) -> Option<&str> {
        self.certificate_alias.as_deref()
    }

    pub fn annulment_number(&self) -> Option<&str> {
        self.annulment_number.as_deref()
    }

    pub fn annulled_utc(&self) -> Option<DateTime<Utc>> {
        self.annulled_utc
    }

    /// Last failure message, exposed only while the invoice is in error.
    pub fn last_error(&self) -> Option<&str> {
        match self.state {
            InvoiceState::Error => self.last_error.as_deref(),
            _ => None,
        }
    }

    pub fn created_utc(&self) -> DateTime<Utc> {
        self.created_utc
    }

    pub(crate) fn mark_pending(&mut self) {
        self.state = InvoiceState::PendingRegistration;
    }

    pub(crate) fn apply_registration(
        &mut self,
        integrity_hash: String,
        registration_number: String,
        registered_utc: DateTime<Utc>,
        certificate_alias: String,
    ) {
        self.integrity_hash = Some(integrity_hash);
        self.registration_number = Some(registration_number);
        self.registered_utc = Some(registered_utc);
        self.certificate_alias = Some(certificate_alias);
        self.last_error = None;
        self.state = InvoiceState::Registered;
    }

    pub(crate) fn mark_error(&mut self, message: String) {
        self.last_error = Some(message);
        self.state = InvoiceState::Error;
    }

    pub(crate) fn apply_annulment(&mut self, annulment_number: String, annulled_utc: DateTime<Utc>) {
        self.annulment_number = Some(annulment_number);
        self.annulled_utc = Some(annulled_utc);
        self.last_error = None;
        self.state = InvoiceState::Annulled;
    }
}

/// Stored form of an [`Invoice`], validated on the way back in.
#[derive(Deserialize)]
struct InvoiceRecord {
    invoice_id: Uuid,
    issuer_tax_id: String,
    receiver_tax_id: Option<String>,
    receiver_name: String,
    invoice_number: String,
    issue_date: NaiveDate,
    service_code: String,
    medical_service: bool,
    base_amount: Decimal,
    tax_rate: Decimal,
    tax_amount: Decimal,
    total: Decimal,
    #[serde(default)]
    facturae_requested: bool,
    state: InvoiceState,
    integrity_hash: Option<String>,
    registration_number: Option<String>,
    registered_utc: Option<DateTime<Utc>>,
    certificate_alias: Option<String>,
    annulment_number: Option<String>,
    annulled_utc: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_utc: DateTime<Utc>,
}

impl TryFrom<InvoiceRecord> for Invoice {
    type Error = ComplianceError;

    fn try_from(record: InvoiceRecord) -> Result<Self, Self::Error> {
        let invalid = |reason: &str| ComplianceError::InvalidInvoice {
            invoice_number: record.invoice_number.clone(),
            reason: reason.to_string(),
        };

        if TaxRateCategory::from_percent(record.tax_rate).is_none() {
            return Err(invalid("tax rate is not a statutory rate"));
        }
        if record.base_amount.checked_add(record.tax_amount) != Some(record.total) {
            return Err(invalid("total does not equal base plus tax"));
        }
        if record.state.is_terminal()
            && (record.registration_number.is_none() || record.integrity_hash.is_none())
        {
            return Err(invalid("registered invoice without registration data"));
        }
        if record.state == InvoiceState::Annulled && record.annulment_number.is_none() {
            return Err(invalid("annulled invoice without annulment number"));
        }

        Ok(Self {
            invoice_id: record.invoice_id,
            issuer_tax_id: record.issuer_tax_id,
            receiver_tax_id: record.receiver_tax_id.filter(|id| !id.is_empty()),
            receiver_name: record.receiver_name,
            invoice_number: record.invoice_number,
            issue_date: record.issue_date,
            service_code: record.service_code,
            medical_service: record.medical_service,
            base_amount: record.base_amount,
            tax_rate: record.tax_rate,
            tax_amount: record.tax_amount,
            total: record.total,
            facturae_requested: record.facturae_requested,
            state: record.state,
            integrity_hash: record.integrity_hash,
            registration_number: record.registration_number,
            registered_utc: record.registered_utc,
            certificate_alias: record.certificate_alias,
            annulment_number: record.annulment_number,
            annulled_utc: record.annulled_utc,
            last_error: record.last_error,
            created_utc: record.created_utc,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Invoice {
        Invoice::draft(
            CreateInvoice {
                issuer_tax_id: "B12345678".to_string(),
                receiver_tax_id: Some(String::new()),
                receiver_name: "Ana López".to_string(),
                invoice_number: "2025/00000001".to_string(),
                issue_date: NaiveDate::from_ymd_opt(2025, 7, 15).unwrap(),
                service_code: "86.21".to_string(),
                medical_service: false,
                base_amount: "100".parse().unwrap(),
                facturae_requested: false,
            },
            TaxRateCategory::SuperReduced,
        )
        .unwrap()
    }

    #[test]
    fn draft_starts_clean() {
        let invoice = sample();
        assert_eq!(invoice.state(), InvoiceState::Draft);
        assert_eq!(invoice.receiver_tax_id(), None);
        assert_eq!(invoice.total(), "104.00".parse::<Decimal>().unwrap());
        assert!(invoice.registration_number().is_none());
    }

    #[test]
    fn amend_only_in_draft() {
        let mut invoice = sample();
        let base: Decimal = "100".parse().unwrap();
        invoice.amend(base, TaxRateCategory::General).unwrap();
        assert_eq!(invoice.total(), "121.00".parse::<Decimal>().unwrap());

        invoice.mark_pending();
        let err = invoice.amend(base, TaxRateCategory::General).unwrap_err();
        assert!(matches!(
            err,
            ComplianceError::InvalidStateTransition {
                from: InvoiceState::PendingRegistration,
                ..
            }
        ));
    }

    #[test]
    fn error_text_hidden_outside_error_state() {
        let mut invoice = sample();
        invoice.mark_error("timeout".to_string());
        assert_eq!(invoice.last_error(), Some("timeout"));

        invoice.apply_registration(
            "ABC".to_string(),
            "VF1".to_string(),
            Utc::now(),
            "firma".to_string(),
        );
        assert_eq!(invoice.last_error(), None);
        assert!(invoice.state().is_terminal());
    }

    #[test]
    fn mandatory_date_is_inclusive() {
        let invoice = sample();
        assert!(invoice.requires_registration(NaiveDate::from_ymd_opt(2025, 7, 15).unwrap()));
        assert!(!invoice.requires_registration(NaiveDate::from_ymd_opt(2025, 7, 16).unwrap()));
    }

    #[test]
    fn state_string_round_trip() {
        for state in [
            InvoiceState::Draft,
            InvoiceState::PendingRegistration,
            InvoiceState::Registered,
            InvoiceState::Error,
            InvoiceState::Annulled,
        ] {
            assert_eq!(InvoiceState::from_string(state.as_str()), state);
        }
    }

    fn sample_json() -> serde_json::Value {
        serde_json::to_value(sample()).unwrap()
    }

    #[test]
    fn stored_invoice_round_trips() {
        let json = sample_json();
        let invoice: Invoice = serde_json::from_value(json).unwrap();
        assert_eq!(invoice.total(), "104.00".parse::<Decimal>().unwrap());
        assert_eq!(invoice.state(), InvoiceState::Draft);
    }

    #[test]
    fn tampered_total_is_rejected() {
        let mut json = sample_json();
        json["total"] = serde_json::json!("105.00");
        let err = serde_json::from_value::<Invoice>(json).unwrap_err();
        assert!(err.to_string().contains("total does not equal base plus tax"));
    }

    #[test]
    fn unknown_rate_is_rejected() {
        let mut json = sample_json();
        json["tax_rate"] = serde_json::json!("7");
        assert!(serde_json::from_value::<Invoice>(json).is_err());
    }

    #[test]
    fn registered_state_requires_registration_data() {
        let mut json = sample_json();
        json["state"] = serde_json::json!("registered");
        assert!(serde_json::from_value::<Invoice>(json).is_err());
    }
}
