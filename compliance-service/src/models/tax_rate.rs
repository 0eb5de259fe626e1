//! Statutory tax rate model for compliance-service.
//!
//! Tax is computed on the base amount as given and rounded half-up to whole
//! cents. The total is the rounded base plus that tax. Arithmetic is checked:
//! amounts near `Decimal::MAX` are rejected instead of overflowing.

use crate::error::ComplianceError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// VAT rate category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxRateCategory {
    /// 4%: medical and healthcare services.
    SuperReduced,
    /// 10%: qualifying food products.
    Reduced,
    /// 21%: everything else.
    General,
}

impl TaxRateCategory {
    pub const ALL: [TaxRateCategory; 3] = [
        TaxRateCategory::SuperReduced,
        TaxRateCategory::Reduced,
        TaxRateCategory::General,
    ];

    /// Rate as a percentage (4, 10, 21).
    pub fn percent(&self) -> Decimal {
        match self {
            TaxRateCategory::SuperReduced => Decimal::from(4),
            TaxRateCategory::Reduced => Decimal::from(10),
            TaxRateCategory::General => Decimal::from(21),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaxRateCategory::SuperReduced => "super_reduced",
            TaxRateCategory::Reduced => "reduced",
            TaxRateCategory::General => "general",
        }
    }

    pub fn from_percent(percent: Decimal) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.percent() == percent)
    }

    /// `round_half_up(base * rate / 100, 2)`.
    pub fn tax_amount(&self, base: Decimal) -> Result<Decimal, ComplianceError> {
        base.checked_mul(self.percent())
            .and_then(|amount| amount.checked_div(Decimal::ONE_HUNDRED))
            .map(round_currency)
            .ok_or(ComplianceError::AmountOutOfRange(base))
    }

    pub fn total(&self, base: Decimal) -> Result<Decimal, ComplianceError> {
        let tax_amount = self.tax_amount(base)?;
        round_currency(base)
            .checked_add(tax_amount)
            .ok_or(ComplianceError::AmountOutOfRange(base))
    }
}

/// Round to two decimal places, half-up.
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Amounts derived from a base and a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxBreakdown {
    pub category: TaxRateCategory,
    pub base: Decimal,
    pub rate: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

impl TaxBreakdown {
    pub fn compute(base: Decimal, category: TaxRateCategory) -> Result<Self, ComplianceError> {
        Ok(Self {
            category,
            base: round_currency(base),
            rate: category.percent(),
            tax_amount: category.tax_amount(base)?,
            total: category.total(base)?,
        })
    }
}
