//! Wiring of the compliance components for one deployment.

use crate::config::ComplianceConfig;
use crate::error::ComplianceError;
use crate::services::{
    CertificateStore, ClassificationCache, FacturaeGenerator, InvoiceComplianceOrchestrator,
    TaxClassifier,
};
use crate::services::tax_classifier::default_rules;
use std::sync::Arc;

/// The long-lived components, shared by every request.
pub struct ComplianceCore {
    pub classifier: TaxClassifier,
    pub certificates: Arc<CertificateStore>,
    pub orchestrator: InvoiceComplianceOrchestrator,
    pub facturae: FacturaeGenerator,
}

impl ComplianceCore {
    pub fn build(config: &ComplianceConfig) -> Result<Self, ComplianceError> {
        let certificates = Arc::new(CertificateStore::initialize(config.keystore_settings())?);

        // The signing certificate must be usable before any invoice is accepted.
        let signing = certificates.lookup_default()?;
        if !signing.digital_signature() {
            tracing::warn!(
                alias = %signing.alias,
                "Signing certificate lacks the digital signature key usage"
            );
        }

        let gateway = config.build_gateway(certificates.clone());
        let orchestrator =
            InvoiceComplianceOrchestrator::new(gateway, config.orchestrator_settings());
        let classifier = TaxClassifier::new(default_rules(), Arc::new(ClassificationCache::new()));
        let facturae = FacturaeGenerator::new(
            config.seller_party(),
            config.facturae_settings(),
            certificates.clone(),
        );

        Ok(Self {
            classifier,
            certificates,
            orchestrator,
            facturae,
        })
    }

    /// Log every loaded certificate without key material.
    pub fn log_inventory(&self) {
        for record in self.certificates.list_all() {
            tracing::info!(
                alias = %record.alias,
                authority = record.authority().display_name(),
                category = record.category.description(),
                not_after = %record.not_after,
                valid = record.valid,
                digital_signature = record.digital_signature(),
                "Certificate available"
            );
        }
    }
}
