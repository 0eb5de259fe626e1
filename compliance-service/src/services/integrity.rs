//! Invoice integrity hash.
//!
//! The canonical input is the concatenation, without separators, of:
//! issuer tax id, invoice number, emission date (`dd-MM-yyyy`), total with
//! two decimals, receiver tax id (empty when absent), tax rate with two
//! decimals. The digest is SHA-256 over the UTF-8 bytes, upper-case hex.
//!
//! The layout is part of the authority contract. Each hash covers a single
//! invoice and does not include the previous invoice's hash.

use crate::models::{round_currency, Invoice};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

/// The fields that feed the hash, in contract order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegrityFields<'a> {
    pub issuer_tax_id: &'a str,
    pub invoice_number: &'a str,
    pub issue_date: NaiveDate,
    pub total: Decimal,
    pub receiver_tax_id: Option<&'a str>,
    pub tax_rate: Decimal,
}

impl<'a> IntegrityFields<'a> {
    pub fn from_invoice(invoice: &'a Invoice, issuer_tax_id: &'a str) -> Self {
        Self {
            issuer_tax_id,
            invoice_number: invoice.invoice_number(),
            issue_date: invoice.issue_date(),
            total: invoice.total(),
            receiver_tax_id: invoice.receiver_tax_id(),
            tax_rate: invoice.tax_rate(),
        }
    }

    pub fn canonical_input(&self) -> String {
        let mut input = String::with_capacity(96);
        input.push_str(self.issuer_tax_id);
        input.push_str(self.invoice_number);
        input.push_str(&self.issue_date.format("%d-%m-%Y").to_string());
        input.push_str(&format_two_decimals(self.total));
        input.push_str(self.receiver_tax_id.unwrap_or(""));
        input.push_str(&format_two_decimals(self.tax_rate));
        input
    }

    pub fn digest(&self) -> String {
        hex::encode_upper(Sha256::digest(self.canonical_input().as_bytes()))
    }
}

/// `520` → `"520.00"`, `4.5` → `"4.50"`.
pub fn format_two_decimals(amount: Decimal) -> String {
    let mut amount = round_currency(amount);
    amount.rescale(2);
    amount.to_string()
}

pub fn canonical_input(invoice: &Invoice, issuer_tax_id: &str) -> String {
    IntegrityFields::from_invoice(invoice, issuer_tax_id).canonical_input()
}

/// Integrity hash for `invoice` as issued by `issuer_tax_id`.
pub fn compute_integrity_hash(invoice: &Invoice, issuer_tax_id: &str) -> String {
    let hash = IntegrityFields::from_invoice(invoice, issuer_tax_id).digest();
    tracing::debug!(
        invoice_number = %invoice.invoice_number(),
        hash = %hash,
        "Integrity hash computed"
    );
    hash
}
