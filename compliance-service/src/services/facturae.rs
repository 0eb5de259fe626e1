//! Facturae 3.2.2 e-invoice documents.
//!
//! Invoices addressed to a public administration are delivered as a Facturae
//! XML file issued under a juridical-person certificate. One document carries
//! one invoice (modality `I`, issuer type `EM`). XAdES signing of the file is
//! not performed here.

use crate::models::{round_currency, Invoice, DEFAULT_CURRENCY};
use crate::services::certificates::CertificateStore;
use crate::services::integrity::format_two_decimals;
use crate::services::metrics::FACTURAE_DOCUMENTS_TOTAL;
use chrono::NaiveDate;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use rust_decimal::Decimal;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_SCHEMA_VERSION: &str = "3.2.2";

const FACTURAE_NAMESPACE: &str = "http://www.facturae.gob.es/formato/Versiones/Facturae_3_2_2.xml";
const XMLDSIG_NAMESPACE: &str = "http://www.w3.org/2000/09/xmldsig#";
const VAT_TAX_TYPE: &str = "01";
const UNIT_OF_MEASURE_UNITS: &str = "01";

/// First emission date for which requested Facturae documents are mandatory.
pub fn default_facturae_mandatory_from() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, 1).unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Error)]
pub enum FacturaeError {
    #[error("Invoice {invoice_number} is missing {field}")]
    MissingField {
        invoice_number: String,
        field: &'static str,
    },

    #[error("Invoice {invoice_number} belongs to issuer {found}, not {expected}")]
    IssuerMismatch {
        invoice_number: String,
        expected: String,
        found: String,
    },

    #[error("Invoice {invoice_number} lines total {lines}, base is {base}")]
    LineMismatch {
        invoice_number: String,
        lines: Decimal,
        base: Decimal,
    },

    #[error("Invoice {0} has line amounts out of range")]
    AmountOutOfRange(String),

    #[error("Certificate cannot issue Facturae documents: {0}")]
    Certificate(String),

    #[error("XML generation failed: {0}")]
    Xml(String),

    #[error("Cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The issuing company as it appears in the seller party.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellerParty {
    pub tax_id: String,
    pub legal_name: String,
    pub address: String,
    pub post_code: String,
    pub town: String,
    pub province: String,
    pub country_code: String,
}

#[derive(Debug, Clone)]
pub struct FacturaeSettings {
    pub schema_version: String,
    pub mandatory_from: NaiveDate,
    pub output_directory: PathBuf,
    /// Certificate the document is issued under.
    pub certificate_alias: String,
}

/// One detail line. Quantities and prices are taken as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacturaeLine {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

impl FacturaeLine {
    pub fn new(description: impl Into<String>, quantity: Decimal, unit_price: Decimal) -> Self {
        Self {
            description: description.into(),
            quantity,
            unit_price,
        }
    }

    /// `round_half_up(quantity * unit_price, 2)`, `None` on overflow.
    pub fn total_cost(&self) -> Option<Decimal> {
        self.quantity.checked_mul(self.unit_price).map(round_currency)
    }
}

/// Facturae person type, derived from a Spanish tax id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonType {
    Juridical,
    Natural,
}

impl PersonType {
    /// Entity tax ids start with a letter. DNI starts with a digit, NIE with X, Y or Z.
    pub fn from_tax_id(tax_id: &str) -> Self {
        match tax_id.trim().chars().next().map(|c| c.to_ascii_uppercase()) {
            Some(c) if c.is_ascii_alphabetic() && !matches!(c, 'X' | 'Y' | 'Z') => {
                PersonType::Juridical
            }
            _ => PersonType::Natural,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            PersonType::Juridical => "J",
            PersonType::Natural => "F",
        }
    }
}

/// A generated document, not yet written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacturaeDocument {
    pub invoice_number: String,
    pub file_name: String,
    pub xml: String,
}

pub struct FacturaeGenerator {
    seller: SellerParty,
    settings: FacturaeSettings,
    certificates: Arc<CertificateStore>,
}

impl FacturaeGenerator {
    pub fn new(
        seller: SellerParty,
        settings: FacturaeSettings,
        certificates: Arc<CertificateStore>,
    ) -> Self {
        Self {
            seller,
            settings,
            certificates,
        }
    }

    pub fn settings(&self) -> &FacturaeSettings {
        &self.settings
    }

    /// Requested by the receiver and dated on or after the mandatory date.
    pub fn requires_facturae(&self, invoice: &Invoice) -> bool {
        invoice.facturae_requested() && invoice.issue_date() >= self.settings.mandatory_from
    }

    /// Build the document for `invoice`.
    ///
    /// With no `lines`, the invoice is described by a single line for its
    /// service code. Otherwise the line totals must add up to the base amount.
    pub fn generate(
        &self,
        invoice: &Invoice,
        lines: &[FacturaeLine],
    ) -> Result<FacturaeDocument, FacturaeError> {
        match self.try_generate(invoice, lines) {
            Ok(document) => {
                FACTURAE_DOCUMENTS_TOTAL
                    .with_label_values(&["generated"])
                    .inc();
                tracing::info!(
                    invoice_number = %invoice.invoice_number(),
                    bytes = document.xml.len(),
                    "Facturae document generated"
                );
                Ok(document)
            }
            Err(e) => {
                FACTURAE_DOCUMENTS_TOTAL.with_label_values(&["failed"]).inc();
                tracing::error!(
                    invoice_number = %invoice.invoice_number(),
                    error = %e,
                    "Facturae generation failed"
                );
                Err(e)
            }
        }
    }

    /// Write `document` into the output directory, creating it if needed.
    pub fn write(&self, document: &FacturaeDocument) -> Result<PathBuf, FacturaeError> {
        let directory = &self.settings.output_directory;
        fs::create_dir_all(directory).map_err(|source| FacturaeError::Io {
            path: directory.clone(),
            source,
        })?;

        let path = directory.join(&document.file_name);
        fs::write(&path, document.xml.as_bytes()).map_err(|source| FacturaeError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::info!(
            invoice_number = %document.invoice_number,
            path = %path.display(),
            "Facturae document written"
        );
        Ok(path)
    }

    fn try_generate(
        &self,
        invoice: &Invoice,
        lines: &[FacturaeLine],
    ) -> Result<FacturaeDocument, FacturaeError> {
        self.check_certificate()?;

        let invoice_number = invoice.invoice_number();
        if invoice.issuer_tax_id() != self.seller.tax_id {
            return Err(FacturaeError::IssuerMismatch {
                invoice_number: invoice_number.to_string(),
                expected: self.seller.tax_id.clone(),
                found: invoice.issuer_tax_id().to_string(),
            });
        }
        let receiver_tax_id =
            invoice
                .receiver_tax_id()
                .ok_or_else(|| FacturaeError::MissingField {
                    invoice_number: invoice_number.to_string(),
                    field: "receiver tax id",
                })?;
        let lines = price_lines(invoice, lines)?;

        let mut xml = XmlBuilder::new();
        xml.declaration()?;
        xml.open_with(
            "fe:Facturae",
            &[("xmlns:fe", FACTURAE_NAMESPACE), ("xmlns:ds", XMLDSIG_NAMESPACE)],
        )?;
        self.write_file_header(&mut xml, invoice)?;
        self.write_parties(&mut xml, invoice, receiver_tax_id)?;
        self.write_invoice(&mut xml, invoice, &lines)?;
        xml.close("fe:Facturae")?;

        Ok(FacturaeDocument {
            invoice_number: invoice_number.to_string(),
            file_name: file_name(invoice),
            xml: xml.finish()?,
        })
    }

    fn check_certificate(&self) -> Result<(), FacturaeError> {
        let alias = &self.settings.certificate_alias;
        match self.certificates.is_b2b_capable(alias) {
            Ok(true) => Ok(()),
            Ok(false) => Err(FacturaeError::Certificate(format!(
                "'{}' is not issued to a juridical person",
                alias
            ))),
            Err(e) => Err(FacturaeError::Certificate(e.to_string())),
        }
    }

    fn write_file_header(&self, xml: &mut XmlBuilder, invoice: &Invoice) -> Result<(), FacturaeError> {
        let total = format_two_decimals(invoice.total());

        xml.open("FileHeader")?;
        xml.text("SchemaVersion", &self.settings.schema_version)?;
        xml.text("Modality", "I")?;
        xml.text("InvoiceIssuerType", "EM")?;
        xml.open("Batch")?;
        xml.text(
            "BatchIdentifier",
            &format!("{}{}", self.seller.tax_id, invoice.invoice_number()),
        )?;
        xml.text("InvoicesCount", "1")?;
        for amount in [
            "TotalInvoicesAmount",
            "TotalOutstandingAmount",
            "TotalExecutableAmount",
        ] {
            xml.open(amount)?;
            xml.text("TotalAmount", &total)?;
            xml.close(amount)?;
        }
        xml.text("InvoiceCurrencyCode", DEFAULT_CURRENCY)?;
        xml.close("Batch")?;
        xml.close("FileHeader")
    }

    fn write_parties(
        &self,
        xml: &mut XmlBuilder,
        invoice: &Invoice,
        receiver_tax_id: &str,
    ) -> Result<(), FacturaeError> {
        xml.open("Parties")?;

        xml.open("SellerParty")?;
        write_tax_identification(xml, PersonType::Juridical, &self.seller.tax_id)?;
        xml.open("LegalEntity")?;
        xml.text("CorporateName", &self.seller.legal_name)?;
        xml.open("AddressInSpain")?;
        xml.text("Address", &self.seller.address)?;
        xml.text("PostCode", &self.seller.post_code)?;
        xml.text("Town", &self.seller.town)?;
        xml.text("Province", &self.seller.province)?;
        xml.text("CountryCode", &self.seller.country_code)?;
        xml.close("AddressInSpain")?;
        xml.close("LegalEntity")?;
        xml.close("SellerParty")?;

        let person_type = PersonType::from_tax_id(receiver_tax_id);
        let receiver_name = invoice.receiver_name().trim();
        xml.open("BuyerParty")?;
        write_tax_identification(xml, person_type, receiver_tax_id)?;
        match person_type {
            PersonType::Juridical => {
                xml.open("LegalEntity")?;
                xml.text("CorporateName", receiver_name)?;
                xml.close("LegalEntity")?;
            }
            PersonType::Natural => {
                let mut names = receiver_name.split_whitespace();
                let name = names.next().unwrap_or_default();
                let first_surname = names.next().unwrap_or_default();
                let second_surname = names.collect::<Vec<_>>().join(" ");

                xml.open("Individual")?;
                xml.text("Name", name)?;
                xml.text("FirstSurname", first_surname)?;
                if !second_surname.is_empty() {
                    xml.text("SecondSurname", &second_surname)?;
                }
                xml.close("Individual")?;
            }
        }
        xml.close("BuyerParty")?;

        xml.close("Parties")
    }

    fn write_invoice(
        &self,
        xml: &mut XmlBuilder,
        invoice: &Invoice,
        lines: &[(FacturaeLine, Decimal)],
    ) -> Result<(), FacturaeError> {
        let base = format_two_decimals(invoice.base_amount());
        let tax = format_two_decimals(invoice.tax_amount());
        let total = format_two_decimals(invoice.total());
        let rate = format_two_decimals(invoice.tax_rate());

        xml.open("Invoices")?;
        xml.open("Invoice")?;

        xml.open("InvoiceHeader")?;
        xml.text("InvoiceNumber", invoice.invoice_number())?;
        xml.text("InvoiceDocumentType", "FC")?;
        xml.text("InvoiceClass", "OO")?;
        xml.close("InvoiceHeader")?;

        xml.open("InvoiceIssueData")?;
        xml.text("IssueDate", &invoice.issue_date().format("%Y-%m-%d").to_string())?;
        xml.text("InvoiceCurrencyCode", DEFAULT_CURRENCY)?;
        xml.text("TaxCurrencyCode", DEFAULT_CURRENCY)?;
        xml.text("LanguageName", "es")?;
        xml.close("InvoiceIssueData")?;

        xml.open("TaxesOutputs")?;
        write_tax(xml, &rate, &base, &tax)?;
        xml.close("TaxesOutputs")?;

        xml.open("InvoiceTotals")?;
        xml.text("TotalGrossAmount", &base)?;
        xml.text("TotalGrossAmountBeforeTaxes", &base)?;
        xml.text("TotalTaxOutputs", &tax)?;
        xml.text("TotalTaxesWithheld", "0.00")?;
        xml.text("InvoiceTotal", &total)?;
        xml.text("TotalOutstandingAmount", &total)?;
        xml.text("TotalExecutableAmount", &total)?;
        xml.close("InvoiceTotals")?;

        xml.open("Items")?;
        for (line, total_cost) in lines {
            let total_cost = format_two_decimals(*total_cost);
            xml.open("InvoiceLine")?;
            xml.text("ItemDescription", &line.description)?;
            xml.text("Quantity", &line.quantity.normalize().to_string())?;
            xml.text("UnitOfMeasure", UNIT_OF_MEASURE_UNITS)?;
            xml.text("UnitPriceWithoutTax", &line.unit_price.normalize().to_string())?;
            xml.text("TotalCost", &total_cost)?;
            xml.text("GrossAmount", &total_cost)?;
            xml.close("InvoiceLine")?;
        }
        xml.close("Items")?;

        xml.close("Invoice")?;
        xml.close("Invoices")
    }
}

fn write_tax_identification(
    xml: &mut XmlBuilder,
    person_type: PersonType,
    tax_id: &str,
) -> Result<(), FacturaeError> {
    xml.open("TaxIdentification")?;
    xml.text("PersonTypeCode", person_type.code())?;
    xml.text("ResidenceTypeCode", "R")?;
    xml.text("TaxIdentificationNumber", tax_id)?;
    xml.close("TaxIdentification")
}

fn write_tax(xml: &mut XmlBuilder, rate: &str, base: &str, tax: &str) -> Result<(), FacturaeError> {
    xml.open("Tax")?;
    xml.text("TaxTypeCode", VAT_TAX_TYPE)?;
    xml.text("TaxRate", rate)?;
    xml.open("TaxableBase")?;
    xml.text("TotalAmount", base)?;
    xml.close("TaxableBase")?;
    xml.open("TaxAmount")?;
    xml.text("TotalAmount", tax)?;
    xml.close("TaxAmount")?;
    xml.close("Tax")
}

/// Pair every line with its total cost and check they add up to the base.
fn price_lines(
    invoice: &Invoice,
    lines: &[FacturaeLine],
) -> Result<Vec<(FacturaeLine, Decimal)>, FacturaeError> {
    let invoice_number = invoice.invoice_number();
    let lines = if lines.is_empty() {
        vec![FacturaeLine::new(
            invoice.service_code(),
            Decimal::ONE,
            invoice.base_amount(),
        )]
    } else {
        lines.to_vec()
    };

    let out_of_range = || FacturaeError::AmountOutOfRange(invoice_number.to_string());
    let mut sum = Decimal::ZERO;
    let mut priced = Vec::with_capacity(lines.len());
    for line in lines {
        let total_cost = line.total_cost().ok_or_else(out_of_range)?;
        sum = sum.checked_add(total_cost).ok_or_else(out_of_range)?;
        priced.push((line, total_cost));
    }

    if sum != invoice.base_amount() {
        return Err(FacturaeError::LineMismatch {
            invoice_number: invoice_number.to_string(),
            lines: sum,
            base: invoice.base_amount(),
        });
    }
    Ok(priced)
}

/// `FACTURAE_<number>_<yyyymmdd>.xml`, with path-unsafe characters replaced.
fn file_name(invoice: &Invoice) -> String {
    let number: String = invoice
        .invoice_number()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!(
        "FACTURAE_{}_{}.xml",
        number,
        invoice.issue_date().format("%Y%m%d")
    )
}

/// Indented XML writer over an in-memory buffer.
struct XmlBuilder {
    writer: Writer<Vec<u8>>,
}

impl XmlBuilder {
    fn new() -> Self {
        Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
        }
    }

    fn declaration(&mut self) -> Result<(), FacturaeError> {
        self.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
    }

    fn open(&mut self, name: &str) -> Result<(), FacturaeError> {
        self.event(Event::Start(BytesStart::new(name)))
    }

    fn open_with(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<(), FacturaeError> {
        let mut start = BytesStart::new(name);
        for &attribute in attributes {
            start.push_attribute(attribute);
        }
        self.event(Event::Start(start))
    }

    fn close(&mut self, name: &str) -> Result<(), FacturaeError> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    /// `<name>value</name>`, with `value` escaped.
    fn text(&mut self, name: &str, value: &str) -> Result<(), FacturaeError> {
        self.open(name)?;
        self.event(Event::Text(BytesText::new(value)))?;
        self.close(name)
    }

    fn event(&mut self, event: Event<'_>) -> Result<(), FacturaeError> {
        self.writer
            .write_event(event)
            .map_err(|e| FacturaeError::Xml(e.to_string()))
    }

    fn finish(self) -> Result<String, FacturaeError> {
        String::from_utf8(self.writer.into_inner()).map_err(|e| FacturaeError::Xml(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn person_type_follows_tax_id_shape() {
        assert_eq!(PersonType::from_tax_id("B12345678"), PersonType::Juridical);
        assert_eq!(PersonType::from_tax_id("q2826000h"), PersonType::Juridical);
        assert_eq!(PersonType::from_tax_id("12345678Z"), PersonType::Natural);
        assert_eq!(PersonType::from_tax_id("X1234567L"), PersonType::Natural);
        assert_eq!(PersonType::from_tax_id(""), PersonType::Natural);
    }

    #[test]
    fn line_total_rounds_half_up() {
        let line = FacturaeLine::new("Consulta", d("3"), d("33.335"));
        assert_eq!(line.total_cost(), Some(d("100.01")));
        let huge = FacturaeLine::new("x", Decimal::MAX, d("2"));
        assert_eq!(huge.total_cost(), None);
    }

    #[test]
    fn xml_text_is_escaped() {
        let mut xml = XmlBuilder::new();
        xml.text("Name", "Salud & Nutrición <SL>").unwrap();
        let out = xml.finish().unwrap();
        assert_eq!(out, "<Name>Salud &amp; Nutrición &lt;SL&gt;</Name>");
    }

    #[test]
    fn default_mandatory_date() {
        assert_eq!(
            default_facturae_mandatory_from(),
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()
        );
    }
}
