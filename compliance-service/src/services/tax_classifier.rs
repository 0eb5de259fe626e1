//! Statutory VAT classification.
//!
//! A transaction is classified by an explicit medical flag first, then by
//! an ordered list of service-code rules (first match wins), falling back to
//! the general rate. Code-based results are memoised in an injectable
//! [`ClassificationCache`]; the medical flag never reaches the cache, so a
//! cached entry depends only on the code it is keyed by.

use crate::error::ComplianceError;
use crate::models::{CreateInvoice, Invoice, TaxBreakdown, TaxRateCategory};
use crate::services::metrics::CLASSIFICATIONS_TOTAL;
use chrono::NaiveDate;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Healthcare activity codes taxed at the super-reduced rate.
pub const MEDICAL_SERVICE_PREFIXES: &[&str] = &[
    "85.11",
    "85.12",
    "85.13",
    "85.14",
    "86.21",
    "86.22",
    "86.23",
    "86.90",
    "NUTRI_MEDICO",
];

/// Food product codes taxed at the reduced rate.
pub const REDUCED_FOOD_PREFIXES: &[&str] = &[
    "01.1",
    "01.2",
    "01.3",
    "10.1",
    "10.2",
    "10.3",
    "SUPLEM_NUTRI",
];

type CodePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// One entry in the ordered rule list.
#[derive(Clone)]
pub struct ClassificationRule {
    label: String,
    category: TaxRateCategory,
    predicate: CodePredicate,
}

impl ClassificationRule {
    pub fn new<F>(label: impl Into<String>, category: TaxRateCategory, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            category,
            predicate: Arc::new(predicate),
        }
    }

    /// Case-sensitive prefix match against any of `prefixes`.
    pub fn prefixes(label: impl Into<String>, category: TaxRateCategory, prefixes: &[&str]) -> Self {
        let prefixes: Vec<String> = prefixes.iter().map(|p| p.to_string()).collect();
        Self::new(label, category, move |code| {
            prefixes.iter().any(|prefix| code.starts_with(prefix.as_str()))
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn category(&self) -> TaxRateCategory {
        self.category
    }

    pub fn matches(&self, code: &str) -> bool {
        (self.predicate)(code)
    }
}

impl fmt::Debug for ClassificationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassificationRule")
            .field("label", &self.label)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

/// Default rule set: medical codes, then reduced-rate food codes.
pub fn default_rules() -> Vec<ClassificationRule> {
    vec![
        ClassificationRule::prefixes(
            "medical_services",
            TaxRateCategory::SuperReduced,
            MEDICAL_SERVICE_PREFIXES,
        ),
        ClassificationRule::prefixes(
            "reduced_food_products",
            TaxRateCategory::Reduced,
            REDUCED_FOOD_PREFIXES,
        ),
    ]
}

/// Concurrent memo of service code to category.
#[derive(Debug, Default)]
pub struct ClassificationCache {
    entries: DashMap<String, TaxRateCategory>,
}

impl ClassificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, code: &str) -> Option<TaxRateCategory> {
        self.entries.get(code).map(|entry| *entry.value())
    }

    pub fn insert(&self, code: &str, category: TaxRateCategory) {
        self.entries.insert(code.to_string(), category);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn codes(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn snapshot(&self) -> HashMap<String, TaxRateCategory> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

/// Maps transactions to statutory VAT categories.
#[derive(Debug, Clone)]
pub struct TaxClassifier {
    rules: Vec<ClassificationRule>,
    cache: Arc<ClassificationCache>,
}

impl Default for TaxClassifier {
    fn default() -> Self {
        Self::new(default_rules(), Arc::new(ClassificationCache::new()))
    }
}

impl TaxClassifier {
    pub fn new(rules: Vec<ClassificationRule>, cache: Arc<ClassificationCache>) -> Self {
        Self { rules, cache }
    }

    /// Classify a transaction.
    ///
    /// `effective_date` is accepted for date-dependent rules; the current
    /// rule set does not vary by date.
    pub fn classify(
        &self,
        service_code: &str,
        is_medical_service: bool,
        effective_date: NaiveDate,
    ) -> TaxRateCategory {
        tracing::debug!(
            service_code = %service_code,
            medical_service = is_medical_service,
            effective_date = %effective_date,
            "Classifying transaction"
        );

        let category = if is_medical_service {
            TaxRateCategory::SuperReduced
        } else {
            self.classify_code(service_code)
        };

        CLASSIFICATIONS_TOTAL
            .with_label_values(&[category.as_str()])
            .inc();
        category
    }

    fn classify_code(&self, service_code: &str) -> TaxRateCategory {
        if let Some(cached) = self.cache.get(service_code) {
            return cached;
        }

        let category = self.evaluate_rules(service_code);
        self.cache.insert(service_code, category);

        tracing::info!(
            service_code = %service_code,
            rate = %category.percent(),
            "Tax rate classified"
        );
        category
    }

    fn evaluate_rules(&self, service_code: &str) -> TaxRateCategory {
        self.rules
            .iter()
            .find(|rule| rule.matches(service_code))
            .map(|rule| rule.category())
            .unwrap_or(TaxRateCategory::General)
    }

    /// Nutrition services: a formal medical consultation or a prescription
    /// qualifies for the super-reduced rate; plain advice is general.
    pub fn classify_nutrition_service(
        &self,
        is_medical_consultation: bool,
        has_prescription: bool,
    ) -> TaxRateCategory {
        if is_medical_consultation || has_prescription {
            TaxRateCategory::SuperReduced
        } else {
            TaxRateCategory::General
        }
    }

    /// Classify `input` and price it as a draft invoice.
    pub fn draft_invoice(&self, input: CreateInvoice) -> Result<Invoice, ComplianceError> {
        let category = self.classify(&input.service_code, input.medical_service, input.issue_date);
        Invoice::draft(input, category)
    }

    pub fn tax_amount(
        &self,
        base: Decimal,
        category: TaxRateCategory,
    ) -> Result<Decimal, ComplianceError> {
        category.tax_amount(base)
    }

    pub fn total(
        &self,
        base: Decimal,
        category: TaxRateCategory,
    ) -> Result<Decimal, ComplianceError> {
        category.total(base)
    }

    pub fn breakdown(
        &self,
        base: Decimal,
        category: TaxRateCategory,
    ) -> Result<TaxBreakdown, ComplianceError> {
        TaxBreakdown::compute(base, category)
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        tracing::info!("Tax classification cache cleared");
    }

    /// Re-evaluate every cached code against the current rules.
    pub fn refresh(&self) {
        let codes = self.cache.codes();
        self.cache.clear();
        for code in &codes {
            self.cache.insert(code, self.evaluate_rules(code));
        }
        tracing::info!(entries = codes.len(), "Tax classification cache refreshed");
    }

    pub fn cache_snapshot(&self) -> HashMap<String, TaxRateCategory> {
        self.cache.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()
    }

    #[test]
    fn medical_code_is_super_reduced() {
        let classifier = TaxClassifier::default();
        assert_eq!(
            classifier.classify("86.21", false, today()),
            TaxRateCategory::SuperReduced
        );
        assert_eq!(
            classifier.classify("NUTRI_MEDICO-01", false, today()),
            TaxRateCategory::SuperReduced
        );
    }

    #[test]
    fn food_code_is_reduced() {
        let classifier = TaxClassifier::default();
        assert_eq!(
            classifier.classify("10.39", false, today()),
            TaxRateCategory::Reduced
        );
        assert_eq!(
            classifier.classify("SUPLEM_NUTRI", false, today()),
            TaxRateCategory::Reduced
        );
    }

    #[test]
    fn unknown_code_is_general() {
        let classifier = TaxClassifier::default();
        assert_eq!(
            classifier.classify("UNKNOWN-CODE", false, today()),
            TaxRateCategory::General
        );
    }

    #[test]
    fn prefix_match_is_case_sensitive() {
        let classifier = TaxClassifier::default();
        assert_eq!(
            classifier.classify("nutri_medico", false, today()),
            TaxRateCategory::General
        );
    }

    #[test]
    fn medical_flag_does_not_poison_cache() {
        let classifier = TaxClassifier::default();
        assert_eq!(
            classifier.classify("70.22", true, today()),
            TaxRateCategory::SuperReduced
        );
        assert_eq!(
            classifier.classify("70.22", false, today()),
            TaxRateCategory::General
        );
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = vec![
            ClassificationRule::prefixes("a", TaxRateCategory::Reduced, &["X"]),
            ClassificationRule::prefixes("b", TaxRateCategory::SuperReduced, &["XY"]),
        ];
        let classifier = TaxClassifier::new(rules, Arc::new(ClassificationCache::new()));
        assert_eq!(
            classifier.classify("XYZ", false, today()),
            TaxRateCategory::Reduced
        );
    }

    #[test]
    fn clearing_cache_keeps_results() {
        let classifier = TaxClassifier::default();
        let codes = ["86.21", "01.2", "99.99"];
        let before: Vec<_> = codes
            .iter()
            .map(|c| classifier.classify(c, false, today()))
            .collect();
        assert_eq!(classifier.cache_snapshot().len(), 3);

        classifier.clear_cache();
        assert!(classifier.cache_snapshot().is_empty());

        let after: Vec<_> = codes
            .iter()
            .map(|c| classifier.classify(c, false, today()))
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn shared_cache_is_visible_across_classifiers() {
        let cache = Arc::new(ClassificationCache::new());
        let first = TaxClassifier::new(default_rules(), cache.clone());
        let second = TaxClassifier::new(default_rules(), cache.clone());

        first.classify("85.11", false, today());
        assert_eq!(cache.get("85.11"), Some(TaxRateCategory::SuperReduced));
        assert_eq!(
            second.cache_snapshot().get("85.11"),
            Some(&TaxRateCategory::SuperReduced)
        );
    }

    #[test]
    fn refresh_reclassifies_seen_codes() {
        let classifier = TaxClassifier::default();
        classifier.classify("86.90", false, today());
        classifier.refresh();
        assert_eq!(
            classifier.cache_snapshot().get("86.90"),
            Some(&TaxRateCategory::SuperReduced)
        );
    }

    #[test]
    fn draft_invoice_is_priced_at_classified_rate() {
        let classifier = TaxClassifier::default();
        let invoice = classifier.draft_invoice(CreateInvoice {
            issuer_tax_id: "B12345678".to_string(),
            receiver_tax_id: None,
            receiver_name: "Ana López".to_string(),
            invoice_number: "2025/000002".to_string(),
            issue_date: today(),
            service_code: "10.39".to_string(),
            medical_service: false,
            base_amount: "50".parse().unwrap(),
            facturae_requested: false,
        })
        .unwrap();
        assert_eq!(invoice.tax_rate(), "10".parse::<Decimal>().unwrap());
        assert_eq!(invoice.total(), "55.00".parse::<Decimal>().unwrap());
    }

    #[test]
    fn nutrition_services() {
        let classifier = TaxClassifier::default();
        assert_eq!(
            classifier.classify_nutrition_service(true, false),
            TaxRateCategory::SuperReduced
        );
        assert_eq!(
            classifier.classify_nutrition_service(false, true),
            TaxRateCategory::SuperReduced
        );
        assert_eq!(
            classifier.classify_nutrition_service(false, false),
            TaxRateCategory::General
        );
    }
}
