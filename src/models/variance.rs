use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Classification thresholds, in percent.
///
/// Two call sites historically disagreed on the secondary "high variance"
/// threshold, so both knobs are configuration rather than constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarianceThresholds {
    /// Below this absolute percentage the prices are considered equal.
    pub match_epsilon: Decimal,
    /// At or above this absolute percentage the mismatch is flagged high.
    pub high_variance_threshold: Decimal,
}

impl Default for VarianceThresholds {
    fn default() -> Self {
        Self {
            match_epsilon: dec!(0.01),
            high_variance_threshold: dec!(5.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarianceDirection {
    Higher,
    Lower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum VarianceClass {
    Match,
    Mismatch {
        direction: VarianceDirection,
        /// Absolute dollar delta between the two unit prices.
        delta: Decimal,
        /// True when |variance_pct| >= high_variance_threshold.
        high: bool,
    },
}

/// Outcome of comparing a submitted price against the resolved catalog price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceVariance {
    /// Signed percentage: (sonance - cust) / cust * 100.
    pub variance_pct: Decimal,
    pub classification: VarianceClass,
}

impl PriceVariance {
    /// Human-readable summary, e.g. "Sonance price is 11.1% higher".
    pub fn summary(&self) -> String {
        match self.classification {
            VarianceClass::Match => "Prices match".to_string(),
            VarianceClass::Mismatch { direction, .. } => {
                let dir = match direction {
                    VarianceDirection::Higher => "higher",
                    VarianceDirection::Lower => "lower",
                };
                format!(
                    "Sonance price is {}% {}",
                    self.variance_pct.abs().round_dp(1),
                    dir
                )
            }
        }
    }
}

/// Compares a customer-submitted unit price against the resolved catalog
/// price. Returns `None` when the submitted price is missing, zero, or
/// negative; variance is never computed against a zero denominator.
pub fn compare_variance(
    cust_price: Option<Decimal>,
    sonance_price: Decimal,
    thresholds: &VarianceThresholds,
) -> Option<PriceVariance> {
    let cust = cust_price?;
    if cust <= Decimal::ZERO {
        return None;
    }

    let variance_pct = (sonance_price - cust) / cust * dec!(100);
    let classification = if variance_pct.abs() < thresholds.match_epsilon {
        VarianceClass::Match
    } else {
        VarianceClass::Mismatch {
            direction: if variance_pct > Decimal::ZERO {
                VarianceDirection::Higher
            } else {
                VarianceDirection::Lower
            },
            delta: (sonance_price - cust).abs(),
            high: variance_pct.abs() >= thresholds.high_variance_threshold,
        }
    };

    Some(PriceVariance {
        variance_pct,
        classification,
    })
}
