//! Domain models for compliance-service.

mod certificate;
mod invoice;
mod registration;
mod tax_rate;

pub use certificate::{CertificateRecord, IssuerCategory, IssuingAuthority};
pub use invoice::{CreateInvoice, Invoice, InvoiceState};
pub use registration::{
    ConsultationOutcome, RegistrationOutcome, RegistrationRequest, DEFAULT_CURRENCY,
    DEFAULT_DOCUMENT_TYPE, DEFAULT_OPERATION_CODE,
};
pub use tax_rate::{round_currency, TaxBreakdown, TaxRateCategory};
