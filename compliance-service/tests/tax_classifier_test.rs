//! Tax classification integration tests for compliance-service.

mod common;

use common::*;
use compliance_service::error::ComplianceError;
use compliance_service::models::{CreateInvoice, TaxBreakdown, TaxRateCategory};
use compliance_service::services::{ClassificationCache, ClassificationRule, TaxClassifier};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;

#[test]
fn medical_flag_selects_super_reduced_rate() {
    let classifier = TaxClassifier::default();
    let category = classifier.classify("70.22", true, date(2025, 7, 15));

    assert_eq!(category, TaxRateCategory::SuperReduced);
    assert_eq!(category.percent(), decimal("4"));
    assert_eq!(
        classifier.tax_amount(decimal("500.00"), category).unwrap(),
        decimal("20.00")
    );
    assert_eq!(
        classifier.total(decimal("500.00"), category).unwrap(),
        decimal("520.00")
    );
}

#[test]
fn code_based_rates() {
    let classifier = TaxClassifier::default();
    let day = date(2025, 7, 15);

    assert_eq!(classifier.classify("85.12", false, day), TaxRateCategory::SuperReduced);
    assert_eq!(classifier.classify("01.3", false, day), TaxRateCategory::Reduced);
    assert_eq!(classifier.classify("62.01", false, day), TaxRateCategory::General);
    assert_eq!(classifier.classify("", false, day), TaxRateCategory::General);
}

#[test]
fn general_rate_rounds_half_up() {
    let classifier = TaxClassifier::default();
    let breakdown = classifier.breakdown(decimal("33.33"), TaxRateCategory::General).unwrap();

    assert_eq!(
        breakdown,
        TaxBreakdown {
            category: TaxRateCategory::General,
            base: decimal("33.33"),
            rate: decimal("21"),
            tax_amount: decimal("7.00"),
            total: decimal("40.33"),
        }
    );
}

#[test]
fn custom_rules_replace_defaults() {
    let rules = vec![
        ClassificationRule::new("books", TaxRateCategory::SuperReduced, |code| {
            code.starts_with("58.11")
        }),
        ClassificationRule::prefixes("restaurants", TaxRateCategory::Reduced, &["56."]),
    ];
    let classifier = TaxClassifier::new(rules, Arc::new(ClassificationCache::new()));
    let day = date(2025, 7, 15);

    assert_eq!(classifier.classify("58.11", false, day), TaxRateCategory::SuperReduced);
    assert_eq!(classifier.classify("56.10", false, day), TaxRateCategory::Reduced);
    assert_eq!(classifier.classify("86.21", false, day), TaxRateCategory::General);
    assert_eq!(classifier.rules().len(), 2);
    assert_eq!(classifier.rules()[0].label(), "books");
}

#[test]
fn medical_classifications_are_not_cached() {
    let cache = Arc::new(ClassificationCache::new());
    let classifier = TaxClassifier::new(
        compliance_service::services::tax_classifier::default_rules(),
        cache.clone(),
    );

    classifier.classify("62.01", true, date(2025, 7, 15));
    assert!(cache.is_empty());

    classifier.classify("62.01", false, date(2025, 7, 15));
    assert_eq!(cache.get("62.01"), Some(TaxRateCategory::General));
}

#[test]
fn concurrent_classification_agrees() {
    let classifier = Arc::new(TaxClassifier::default());
    let codes = ["86.21", "10.1", "99.00", "NUTRI_MEDICO", "SUPLEM_NUTRI"];

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let classifier = classifier.clone();
            scope.spawn(move || {
                for code in codes {
                    classifier.classify(code, false, date(2025, 7, 15));
                }
            });
        }
    });

    let snapshot = classifier.cache_snapshot();
    assert_eq!(snapshot.len(), codes.len());
    assert_eq!(snapshot["NUTRI_MEDICO"], TaxRateCategory::SuperReduced);
    assert_eq!(snapshot["SUPLEM_NUTRI"], TaxRateCategory::Reduced);
    assert_eq!(snapshot["99.00"], TaxRateCategory::General);
}

#[test]
fn draft_invoice_prices_end_to_end_example() {
    let classifier = TaxClassifier::default();
    let invoice = classifier
        .draft_invoice(create_input("2025/000100", date(2025, 7, 15), "500.00"))
        .expect("Failed to draft invoice");

    assert_eq!(invoice.tax_rate(), decimal("4"));
    assert_eq!(invoice.tax_amount(), decimal("20.00"));
    assert_eq!(invoice.total(), decimal("520.00"));
}

#[test]
fn drafted_invoice_matches_classifier_pricing_for_sub_cent_base() {
    let classifier = TaxClassifier::default();
    let input = CreateInvoice {
        service_code: "62.01".to_string(),
        medical_service: false,
        ..create_input("2025/000101", date(2025, 7, 15), "12.495")
    };
    let invoice = classifier
        .draft_invoice(input)
        .expect("Failed to draft invoice");
    let category = TaxRateCategory::General;

    assert_eq!(invoice.base_amount(), decimal("12.50"));
    assert_eq!(invoice.tax_amount(), decimal("2.62"));
    assert_eq!(invoice.total(), decimal("15.12"));
    assert_eq!(
        classifier.tax_amount(decimal("12.495"), category).unwrap(),
        invoice.tax_amount()
    );
    assert_eq!(
        classifier.total(decimal("12.495"), category).unwrap(),
        invoice.total()
    );
}

#[test]
fn overflowing_base_cannot_be_drafted() {
    let classifier = TaxClassifier::default();
    let input = CreateInvoice {
        base_amount: Decimal::MAX / Decimal::TEN,
        medical_service: false,
        service_code: "62.01".to_string(),
        ..create_input("2025/000102", date(2025, 7, 15), "1")
    };
    assert!(matches!(
        classifier.draft_invoice(input),
        Err(ComplianceError::AmountOutOfRange(_))
    ));
}

fn cents() -> impl Strategy<Value = Decimal> {
    (0i64..100_000_000).prop_map(|c| Decimal::new(c, 2))
}

fn category() -> impl Strategy<Value = TaxRateCategory> {
    prop::sample::select(TaxRateCategory::ALL.to_vec())
}

proptest! {
    #[test]
    fn total_is_base_plus_tax(base in cents(), category in category()) {
        let breakdown = TaxBreakdown::compute(base, category).unwrap();
        prop_assert_eq!(breakdown.total, breakdown.base + breakdown.tax_amount);
        prop_assert_eq!(breakdown.tax_amount, breakdown.tax_amount.round_dp(2));
        prop_assert!(breakdown.tax_amount >= Decimal::ZERO);
    }

    #[test]
    fn classification_is_stable_across_cache_clears(code in "[0-9]{2}\\.[0-9]{1,2}") {
        let classifier = TaxClassifier::default();
        let day = date(2025, 7, 15);
        let first = classifier.classify(&code, false, day);
        classifier.clear_cache();
        prop_assert_eq!(classifier.classify(&code, false, day), first);
    }
}
