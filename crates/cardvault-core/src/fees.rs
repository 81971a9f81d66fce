//! Fee calculator
//!
//! Pure fee computation from a configured schedule. Callers apply the
//! minimum-fee floor themselves, since the two-phase funding flow needs the
//! raw (unfloored) fee for its own rounding.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{AppError, AppResult};

/// What a fee is being charged for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeType {
    CardIssuance,
    CardFunding,
    CrossCurrencyFunding,
    Dispute,
}

impl fmt::Display for FeeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeeType::CardIssuance => write!(f, "card_issuance"),
            FeeType::CardFunding => write!(f, "card_funding"),
            FeeType::CrossCurrencyFunding => write!(f, "cross_currency_funding"),
            FeeType::Dispute => write!(f, "dispute"),
        }
    }
}

/// How a fee is composed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeeComposition {
    /// `value` percent of the amount
    Percentage,
    /// `value` minor units regardless of amount
    Fixed,
    #[default]
    None,
}

/// One configured fee rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct FeeRule {
    pub kind: FeeComposition,
    #[serde(default)]
    pub value: Decimal,
}

impl FeeRule {
    pub fn percentage(value: Decimal) -> Self {
        Self {
            kind: FeeComposition::Percentage,
            value,
        }
    }

    pub fn fixed(minor_units: i64) -> Self {
        Self {
            kind: FeeComposition::Fixed,
            value: Decimal::from(minor_units),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

/// Fee schedule, one rule per fee type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSchedule {
    #[serde(default = "default_issuance")]
    pub card_issuance: FeeRule,

    #[serde(default = "default_funding")]
    pub card_funding: FeeRule,

    #[serde(default = "default_cross_currency")]
    pub cross_currency_funding: FeeRule,

    #[serde(default = "default_dispute")]
    pub dispute: FeeRule,

    /// Floor applied by callers that charge in minor units
    #[serde(default = "default_minimum_fee")]
    pub minimum_fee_minor: i64,
}

fn default_issuance() -> FeeRule {
    FeeRule::fixed(100)
}

fn default_funding() -> FeeRule {
    FeeRule::percentage(Decimal::ONE)
}

fn default_cross_currency() -> FeeRule {
    FeeRule::percentage(Decimal::new(5, 1))
}

fn default_dispute() -> FeeRule {
    FeeRule::fixed(500)
}

fn default_minimum_fee() -> i64 {
    1
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            card_issuance: default_issuance(),
            card_funding: default_funding(),
            cross_currency_funding: default_cross_currency(),
            dispute: default_dispute(),
            minimum_fee_minor: default_minimum_fee(),
        }
    }
}

/// Result of a fee calculation on a major-unit amount
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeBreakdown {
    /// Raw fee in major units, unrounded
    pub fee: Decimal,
    pub composition: FeeComposition,
}

impl FeeSchedule {
    /// Rule configured for a fee type
    pub fn rule(&self, fee_type: FeeType) -> FeeRule {
        match fee_type {
            FeeType::CardIssuance => self.card_issuance,
            FeeType::CardFunding => self.card_funding,
            FeeType::CrossCurrencyFunding => self.cross_currency_funding,
            FeeType::Dispute => self.dispute,
        }
    }

    /// Compute the raw fee for a major-unit amount
    pub fn calculate(&self, fee_type: FeeType, amount: Decimal) -> FeeBreakdown {
        let rule = self.rule(fee_type);
        let fee = match rule.kind {
            FeeComposition::Percentage => amount * rule.value / Decimal::ONE_HUNDRED,
            FeeComposition::Fixed => rule.value / Decimal::ONE_HUNDRED,
            FeeComposition::None => Decimal::ZERO,
        };

        FeeBreakdown {
            fee,
            composition: rule.kind,
        }
    }

    /// Compute a fee in minor units for a minor-unit amount.
    ///
    /// Percentage fees round half away from zero to the nearest minor unit.
    /// The minimum floor is NOT applied here.
    pub fn calculate_minor(&self, fee_type: FeeType, amount_minor: i64) -> AppResult<i64> {
        let rule = self.rule(fee_type);
        let fee = match rule.kind {
            FeeComposition::Percentage => (Decimal::from(amount_minor) * rule.value
                / Decimal::ONE_HUNDRED)
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero),
            FeeComposition::Fixed => rule.value.trunc(),
            FeeComposition::None => Decimal::ZERO,
        };

        fee.to_i64()
            .ok_or_else(|| AppError::Internal(format!("Fee out of range for {}", fee_type)))
    }

    /// `max(fee, minimum_fee_minor)`
    pub fn with_minimum(&self, fee_minor: i64) -> i64 {
        fee_minor.max(self.minimum_fee_minor)
    }
}
