//! Services module for compliance-service.

pub mod certificates;
pub mod facturae;
pub mod gateway;
pub mod integrity;
pub mod keystore;
pub mod metrics;
pub mod orchestrator;
pub mod tax_classifier;

pub use certificates::{CertificateStore, KeystoreSettings};
pub use facturae::{
    FacturaeDocument, FacturaeError, FacturaeGenerator, FacturaeLine, FacturaeSettings,
    SellerParty,
};
pub use gateway::{
    GatewayMode, IssuerIdentity, ProductionGateway, RegistrationGateway, SandboxGateway,
};
pub use integrity::{canonical_input, compute_integrity_hash};
pub use keystore::KeystoreType;
pub use metrics::{get_metrics, init_metrics};
pub use orchestrator::{
    InvoiceComplianceOrchestrator, OrchestratorSettings, RegistrationAttempt,
};
pub use tax_classifier::{ClassificationCache, ClassificationRule, TaxClassifier};
