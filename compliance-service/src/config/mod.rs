use crate::error::ComplianceError;
use crate::services::certificates::{CertificateStore, KeystoreSettings};
use crate::services::facturae::{
    default_facturae_mandatory_from, FacturaeSettings, SellerParty, DEFAULT_SCHEMA_VERSION,
};
use crate::services::gateway::production::DEFAULT_ENDPOINT;
use crate::services::gateway::{
    IssuerIdentity, ProductionGateway, RegistrationGateway, SandboxGateway,
};
use crate::services::keystore::KeystoreType;
use crate::services::orchestrator::{default_mandatory_from, OrchestratorSettings};
use chrono::NaiveDate;
use secrecy::SecretString;
use service_core::config as core_config;
use service_core::config::get_env;
use service_core::retry::RetryConfig;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub const SERVICE_NAME: &str = "compliance-service";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 2;

#[derive(Debug, Clone)]
pub struct ComplianceConfig {
    pub common: core_config::Config,
    pub company: CompanyConfig,
    pub keystore: KeystoreConfig,
    pub gateway: GatewayConfig,
    pub registration: RegistrationConfig,
    pub facturae: FacturaeConfig,
}

#[derive(Debug, Clone)]
pub struct CompanyConfig {
    pub tax_id: String,
    pub legal_name: String,
    pub address: String,
    pub post_code: String,
    pub town: String,
    pub province: String,
    pub country_code: String,
}

#[derive(Debug, Clone)]
pub struct KeystoreConfig {
    pub path: PathBuf,
    pub password: SecretString,
    pub keystore_type: KeystoreType,
    pub certificate_alias: String,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub endpoint: String,
    /// Sandbox when true. Production otherwise.
    pub test_mode: bool,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    pub mandatory_from: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct FacturaeConfig {
    pub schema_version: String,
    pub output_directory: PathBuf,
    pub mandatory_from: NaiveDate,
}

impl ComplianceConfig {
    pub fn load() -> Result<Self, ComplianceError> {
        Self::from_common(core_config::Config::load()?)
    }

    /// Read the service settings. In production every key must be set.
    pub fn from_common(common_config: core_config::Config) -> Result<Self, ComplianceError> {
        let is_prod = common_config.is_prod();

        Ok(ComplianceConfig {
            common: common_config,
            company: CompanyConfig {
                tax_id: get_env("COMPLIANCE_COMPANY_TAX_ID", None, is_prod)?,
                legal_name: get_env("COMPLIANCE_COMPANY_NAME", None, is_prod)?,
                address: get_env("COMPLIANCE_COMPANY_ADDRESS", Some(""), is_prod)?,
                post_code: get_env("COMPLIANCE_COMPANY_POST_CODE", Some(""), is_prod)?,
                town: get_env("COMPLIANCE_COMPANY_TOWN", Some(""), is_prod)?,
                province: get_env("COMPLIANCE_COMPANY_PROVINCE", Some(""), is_prod)?,
                country_code: get_env("COMPLIANCE_COMPANY_COUNTRY", Some("ES"), is_prod)?,
            },
            keystore: KeystoreConfig {
                path: get_env("COMPLIANCE_KEYSTORE_PATH", None, is_prod)?.into(),
                password: SecretString::new(get_env(
                    "COMPLIANCE_KEYSTORE_PASSWORD",
                    None,
                    is_prod,
                )?),
                keystore_type: get_env("COMPLIANCE_KEYSTORE_TYPE", Some("PKCS12"), is_prod)?
                    .parse()?,
                certificate_alias: get_env("COMPLIANCE_CERTIFICATE_ALIAS", None, is_prod)?,
            },
            gateway: GatewayConfig {
                endpoint: get_env("COMPLIANCE_GATEWAY_ENDPOINT", Some(DEFAULT_ENDPOINT), is_prod)?,
                test_mode: parse_flag(
                    "COMPLIANCE_GATEWAY_TEST_MODE",
                    &get_env("COMPLIANCE_GATEWAY_TEST_MODE", Some("true"), is_prod)?,
                )?,
                timeout_secs: parse_setting(
                    "COMPLIANCE_GATEWAY_TIMEOUT_SECS",
                    &get_env(
                        "COMPLIANCE_GATEWAY_TIMEOUT_SECS",
                        Some(&DEFAULT_TIMEOUT_SECS.to_string()),
                        is_prod,
                    )?,
                )?,
                max_retries: parse_setting(
                    "COMPLIANCE_GATEWAY_MAX_RETRIES",
                    &get_env(
                        "COMPLIANCE_GATEWAY_MAX_RETRIES",
                        Some(&DEFAULT_MAX_RETRIES.to_string()),
                        is_prod,
                    )?,
                )?,
            },
            registration: RegistrationConfig {
                mandatory_from: parse_date(
                    "COMPLIANCE_REGISTRATION_MANDATORY_FROM",
                    &get_env(
                        "COMPLIANCE_REGISTRATION_MANDATORY_FROM",
                        Some(&default_mandatory_from().to_string()),
                        is_prod,
                    )?,
                )?,
            },
            facturae: FacturaeConfig {
                schema_version: get_env(
                    "COMPLIANCE_FACTURAE_VERSION",
                    Some(DEFAULT_SCHEMA_VERSION),
                    is_prod,
                )?,
                output_directory: get_env(
                    "COMPLIANCE_FACTURAE_OUTPUT_DIR",
                    Some("facturae"),
                    is_prod,
                )?
                .into(),
                mandatory_from: parse_date(
                    "COMPLIANCE_FACTURAE_MANDATORY_FROM",
                    &get_env(
                        "COMPLIANCE_FACTURAE_MANDATORY_FROM",
                        Some(&default_facturae_mandatory_from().to_string()),
                        is_prod,
                    )?,
                )?,
            },
        })
    }

    pub fn issuer(&self) -> IssuerIdentity {
        IssuerIdentity::new(&self.company.tax_id, &self.company.legal_name)
    }

    pub fn seller_party(&self) -> SellerParty {
        SellerParty {
            tax_id: self.company.tax_id.clone(),
            legal_name: self.company.legal_name.clone(),
            address: self.company.address.clone(),
            post_code: self.company.post_code.clone(),
            town: self.company.town.clone(),
            province: self.company.province.clone(),
            country_code: self.company.country_code.clone(),
        }
    }

    /// Facturae documents are issued under the signing certificate.
    pub fn facturae_settings(&self) -> FacturaeSettings {
        FacturaeSettings {
            schema_version: self.facturae.schema_version.clone(),
            mandatory_from: self.facturae.mandatory_from,
            output_directory: self.facturae.output_directory.clone(),
            certificate_alias: self.keystore.certificate_alias.clone(),
        }
    }

    pub fn keystore_settings(&self) -> KeystoreSettings {
        KeystoreSettings {
            path: self.keystore.path.clone(),
            password: self.keystore.password.clone(),
            keystore_type: self.keystore.keystore_type,
            default_alias: self.keystore.certificate_alias.clone(),
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            mandatory_from: self.registration.mandatory_from,
            gateway_timeout: Duration::from_secs(self.gateway.timeout_secs),
            retry: RetryConfig::with_max_retries(self.gateway.max_retries),
        }
    }

    /// Pick the gateway implementation for this deployment.
    pub fn build_gateway(&self, certificates: Arc<CertificateStore>) -> Arc<dyn RegistrationGateway> {
        if self.gateway.test_mode {
            Arc::new(SandboxGateway::new(
                self.issuer(),
                &self.keystore.certificate_alias,
            ))
        } else {
            Arc::new(ProductionGateway::new(
                self.issuer(),
                &self.gateway.endpoint,
                &self.keystore.certificate_alias,
                certificates,
            ))
        }
    }
}

fn parse_setting<T>(key: &str, raw: &str) -> Result<T, ComplianceError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ComplianceError::configuration(format!("{} has invalid value '{}': {}", key, raw, e)))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ComplianceError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ComplianceError::configuration(format!(
            "{} must be a boolean, got '{}'",
            key, raw
        ))),
    }
}

fn parse_date(key: &str, raw: &str) -> Result<NaiveDate, ComplianceError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|e| {
        ComplianceError::configuration(format!("{} must be YYYY-MM-DD, got '{}': {}", key, raw, e))
    })
}
