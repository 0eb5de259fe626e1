//! Invoice compliance lifecycle.
//!
//! ```text
//! DRAFT ──register──▶ PENDING_REGISTRATION ──success──▶ REGISTERED ──annul──▶ ANNULLED
//!                            │    ▲
//!                         failure │ register
//!                            ▼    │
//!                            ERROR
//! ```
//!
//! The orchestrator is the only writer of an invoice's compliance fields.
//! Every gateway call is bounded by a timeout and is preceded by a
//! `needs_registration` check, so an invoice is registered at most once.

use crate::error::{ComplianceError, GatewayError};
use crate::models::{ConsultationOutcome, Invoice, InvoiceState, RegistrationOutcome};
use crate::services::gateway::{RegistrationGateway, TECHNICAL_FAILURE_MESSAGE};
use crate::services::metrics::{ANNULMENTS_TOTAL, REGISTRATIONS_TOTAL};
use chrono::{NaiveDate, Utc};
use service_core::retry::RetryConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// First emission date for which registration is mandatory.
pub fn default_mandatory_from() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 7, 1).unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub mandatory_from: NaiveDate,
    pub gateway_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            mandatory_from: default_mandatory_from(),
            gateway_timeout: Duration::from_secs(30),
            retry: RetryConfig::with_max_retries(2),
        }
    }
}

/// What happened to a registration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationAttempt {
    /// The gateway was called; the invoice reflects the outcome.
    Dispatched(RegistrationOutcome),
    /// The invoice does not need registration. Nothing was sent.
    NotRequired,
    /// Cancelled before any dispatch. The invoice is untouched.
    Cancelled,
}

impl RegistrationAttempt {
    pub fn outcome(&self) -> Option<&RegistrationOutcome> {
        match self {
            RegistrationAttempt::Dispatched(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.outcome().is_some_and(|outcome| outcome.success)
    }
}

pub struct InvoiceComplianceOrchestrator {
    gateway: Arc<dyn RegistrationGateway>,
    settings: OrchestratorSettings,
}

impl InvoiceComplianceOrchestrator {
    pub fn new(gateway: Arc<dyn RegistrationGateway>, settings: OrchestratorSettings) -> Self {
        tracing::info!(
            mode = %gateway.mode(),
            mandatory_from = %settings.mandatory_from,
            timeout_ms = settings.gateway_timeout.as_millis() as u64,
            max_retries = settings.retry.max_retries,
            "Compliance orchestrator ready"
        );
        Self { gateway, settings }
    }

    pub fn gateway(&self) -> &Arc<dyn RegistrationGateway> {
        &self.gateway
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Legally required and not yet registered or annulled.
    pub fn needs_registration(&self, invoice: &Invoice) -> bool {
        invoice.requires_registration(self.settings.mandatory_from) && !invoice.state().is_terminal()
    }

    /// Register `invoice` once. An invoice in ERROR goes back through
    /// PENDING_REGISTRATION.
    pub async fn register(&self, invoice: &mut Invoice) -> RegistrationAttempt {
        if !self.needs_registration(invoice) {
            tracing::debug!(
                invoice_number = %invoice.invoice_number(),
                state = %invoice.state(),
                "Registration not required"
            );
            return RegistrationAttempt::NotRequired;
        }
        RegistrationAttempt::Dispatched(self.dispatch(invoice).await)
    }

    /// Register with bounded retries of communication failures.
    ///
    /// `needs_registration` and the cancellation token are checked before
    /// every dispatch. Once a dispatch has happened, cancellation returns
    /// the last outcome.
    pub async fn register_with_retry(
        &self,
        invoice: &mut Invoice,
        cancel: &CancellationToken,
    ) -> RegistrationAttempt {
        let mut attempt = 0;
        let mut last: Option<RegistrationOutcome> = None;
        loop {
            if cancel.is_cancelled() {
                tracing::info!(
                    invoice_number = %invoice.invoice_number(),
                    attempts = attempt,
                    "Registration cancelled before dispatch"
                );
                return last.map_or(RegistrationAttempt::Cancelled, RegistrationAttempt::Dispatched);
            }
            if !self.needs_registration(invoice) {
                return last.map_or(RegistrationAttempt::NotRequired, RegistrationAttempt::Dispatched);
            }

            let outcome = self.dispatch(invoice).await;
            if outcome.success
                || !outcome.is_transient_failure()
                || !self.settings.retry.allows_retry(attempt)
            {
                return RegistrationAttempt::Dispatched(outcome);
            }

            let delay = self.settings.retry.backoff_duration(attempt);
            attempt += 1;
            tracing::warn!(
                invoice_number = %invoice.invoice_number(),
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Transient registration failure, retrying"
            );
            last = Some(outcome);

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn dispatch(&self, invoice: &mut Invoice) -> RegistrationOutcome {
        invoice.mark_pending();
        tracing::info!(
            invoice_number = %invoice.invoice_number(),
            mode = %self.gateway.mode(),
            "Dispatching invoice registration"
        );

        let timeout = self.settings.gateway_timeout;
        let response = tokio::time::timeout(timeout, self.gateway.register(&*invoice)).await;
        let outcome = match response {
            Ok(outcome) => outcome,
            Err(_) => {
                REGISTRATIONS_TOTAL.with_label_values(&["timeout"]).inc();
                tracing::warn!(
                    invoice_number = %invoice.invoice_number(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Registration timed out"
                );
                RegistrationOutcome::failure(&GatewayError::Communication(format!(
                    "no response from the authority within {} ms",
                    timeout.as_millis()
                )))
            }
        };

        self.settle(invoice, outcome)
    }

    fn settle(&self, invoice: &mut Invoice, outcome: RegistrationOutcome) -> RegistrationOutcome {
        if !outcome.success {
            let message = outcome
                .error_message
                .clone()
                .unwrap_or_else(|| TECHNICAL_FAILURE_MESSAGE.to_string());
            REGISTRATIONS_TOTAL.with_label_values(&["failed"]).inc();
            tracing::error!(
                invoice_number = %invoice.invoice_number(),
                code = outcome.error_code.as_deref().unwrap_or("UNKNOWN"),
                error = %message,
                "Invoice registration failed"
            );
            invoice.mark_error(message);
            return outcome;
        }

        let (Some(number), Some(hash)) = (
            outcome.registration_number.clone(),
            outcome.integrity_hash.clone(),
        ) else {
            tracing::error!(
                invoice_number = %invoice.invoice_number(),
                "Gateway reported success without registration number or integrity hash"
            );
            REGISTRATIONS_TOTAL.with_label_values(&["failed"]).inc();
            invoice.mark_error(TECHNICAL_FAILURE_MESSAGE.to_string());
            return RegistrationOutcome::failure(&GatewayError::Unexpected(
                TECHNICAL_FAILURE_MESSAGE.to_string(),
            ));
        };

        let registered_utc = outcome.registered_utc.unwrap_or_else(Utc::now);
        invoice.apply_registration(
            hash,
            number.clone(),
            registered_utc,
            self.gateway.signing_alias().to_string(),
        );
        REGISTRATIONS_TOTAL.with_label_values(&["registered"]).inc();
        tracing::info!(
            invoice_number = %invoice.invoice_number(),
            registration_number = %number,
            "Invoice registered"
        );
        outcome
    }

    /// Annul a registered invoice. On failure the invoice stays REGISTERED.
    pub async fn annul(
        &self,
        invoice: &mut Invoice,
        reason: &str,
    ) -> Result<RegistrationOutcome, ComplianceError> {
        let number = match (invoice.state(), invoice.registration_number()) {
            (InvoiceState::Registered, Some(number)) => number.to_string(),
            (from, _) => {
                return Err(ComplianceError::InvalidStateTransition {
                    from,
                    operation: "annul",
                })
            }
        };

        let timeout = self.settings.gateway_timeout;
        let outcome = tokio::time::timeout(timeout, self.gateway.annul(&number, reason))
            .await
            .unwrap_or_else(|_| {
                RegistrationOutcome::failure(&GatewayError::Communication(format!(
                    "no response from the authority within {} ms",
                    timeout.as_millis()
                )))
            });

        if outcome.success {
            let annulment_number = outcome
                .registration_number
                .clone()
                .unwrap_or_else(|| number.clone());
            invoice.apply_annulment(
                annulment_number,
                outcome.registered_utc.unwrap_or_else(Utc::now),
            );
            ANNULMENTS_TOTAL.with_label_values(&["annulled"]).inc();
            tracing::info!(
                invoice_number = %invoice.invoice_number(),
                registration_number = %number,
                reason = %reason,
                "Invoice annulled"
            );
        } else {
            ANNULMENTS_TOTAL.with_label_values(&["failed"]).inc();
            tracing::warn!(
                invoice_number = %invoice.invoice_number(),
                registration_number = %number,
                error = outcome.error_message.as_deref().unwrap_or(""),
                "Annulment rejected, invoice stays registered"
            );
        }
        Ok(outcome)
    }

    /// Ask the authority about an invoice that has a registration number.
    pub async fn verify(&self, invoice: &Invoice) -> Result<ConsultationOutcome, ComplianceError> {
        let Some(number) = invoice.registration_number() else {
            return Err(ComplianceError::InvalidStateTransition {
                from: invoice.state(),
                operation: "verify",
            });
        };

        let timeout = self.settings.gateway_timeout;
        let consultation = tokio::time::timeout(timeout, self.gateway.query(number))
            .await
            .unwrap_or_else(|_| {
                ConsultationOutcome::failure(&GatewayError::Communication(format!(
                    "no response from the authority within {} ms",
                    timeout.as_millis()
                )))
            });

        tracing::info!(
            invoice_number = %invoice.invoice_number(),
            registration_number = %number,
            found = consultation.found,
            state = %consultation.state,
            "Registration verified"
        );
        Ok(consultation)
    }
}
