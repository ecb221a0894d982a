use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::entities::order_line;

/// Line status values as stored in `order_lines.line_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStatus {
    Active,
    Cancelled,
}

impl LineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineStatus::Active => "active",
            LineStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "active" => Some(LineStatus::Active),
            "cancelled" => Some(LineStatus::Cancelled),
            _ => None,
        }
    }
}

/// How a line's resolved mapping was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationSource {
    ManualLookup,
    ManualAdd,
    Automated,
}

impl ValidationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationSource::ManualLookup => "manual_lookup",
            ValidationSource::ManualAdd => "manual_add",
            ValidationSource::Automated => "automated",
        }
    }
}

/// What the customer submitted. Immutable after intake except by explicit
/// manual edit; reconciliation code only ever reads this view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedLine {
    pub sku: Option<String>,
    pub description: Option<String>,
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub uom: Option<String>,
    pub line_total: Option<Decimal>,
}

/// The resolved authoritative mapping. The only line data the
/// reconciliation engine writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLine {
    pub sku: String,
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub uom: Option<String>,
}

pub trait LineView {
    fn submitted(&self) -> SubmittedLine;
    fn resolved(&self) -> Option<ResolvedLine>;
    /// SKU used for catalog lookups: validated mapping first, then the
    /// resolved SKU, then the raw submitted one.
    fn effective_sku(&self) -> Option<&str>;
    /// UOM used for catalog lookups: resolved UOM when set, else submitted.
    fn effective_uom(&self) -> Option<&str>;
    fn is_active(&self) -> bool;
}

impl LineView for order_line::Model {
    fn submitted(&self) -> SubmittedLine {
        SubmittedLine {
            sku: self.cust_product_sku.clone(),
            description: self.cust_product_desc.clone(),
            quantity: self.cust_quantity,
            unit_price: self.cust_unit_price,
            uom: self.cust_uom.clone(),
            line_total: self.cust_line_total,
        }
    }

    fn resolved(&self) -> Option<ResolvedLine> {
        self.sonance_prod_sku.as_ref().map(|sku| ResolvedLine {
            sku: sku.clone(),
            quantity: self.sonance_quantity,
            unit_price: self.sonance_unit_price,
            uom: self.sonance_uom.clone(),
        })
    }

    fn effective_sku(&self) -> Option<&str> {
        [
            self.validated_sku.as_deref(),
            self.sonance_prod_sku.as_deref(),
            self.cust_product_sku.as_deref(),
        ]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
    }

    fn effective_uom(&self) -> Option<&str> {
        [self.sonance_uom.as_deref(), self.cust_uom.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
    }

    fn is_active(&self) -> bool {
        self.line_status == LineStatus::Active.as_str()
    }
}

/// Order totals over active lines only; cancelled lines contribute nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    /// Sum of submitted quantity x submitted unit price.
    pub customer_total: Decimal,
    /// Sum of resolved quantity x resolved unit price, falling back to the
    /// submitted values for lines not yet reconciled.
    pub resolved_total: Decimal,
}

pub fn order_totals(lines: &[order_line::Model]) -> OrderTotals {
    let mut customer_total = Decimal::ZERO;
    let mut resolved_total = Decimal::ZERO;

    for line in lines.iter().filter(|l| l.is_active()) {
        let cust_qty = line.cust_quantity.unwrap_or(Decimal::ZERO);
        let cust_price = line.cust_unit_price.unwrap_or(Decimal::ZERO);
        customer_total += cust_qty * cust_price;

        let res_qty = line.sonance_quantity.unwrap_or(cust_qty);
        let res_price = line.sonance_unit_price.unwrap_or(cust_price);
        resolved_total += res_qty * res_price;
    }

    OrderTotals {
        customer_total,
        resolved_total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn line(status: &str, qty: Decimal, price: Decimal) -> order_line::Model {
        order_line::Model {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            cust_line_number: 1,
            cust_product_sku: Some("CUST-1".into()),
            cust_product_desc: None,
            cust_quantity: Some(qty),
            cust_unit_price: Some(price),
            cust_line_total: Some(qty * price),
            cust_uom: Some("EA".into()),
            cust_currency_code: Some("USD".into()),
            sonance_prod_sku: None,
            sonance_quantity: None,
            sonance_unit_price: None,
            sonance_uom: None,
            validated_sku: None,
            validation_source: None,
            is_validated: false,
            line_status: status.into(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn cancelled_lines_are_excluded_from_both_totals() {
        let mut resolved = line("active", dec!(5), dec!(10));
        resolved.sonance_prod_sku = Some("SON-1".into());
        resolved.sonance_quantity = Some(dec!(5));
        resolved.sonance_unit_price = Some(dec!(10));

        let lines = vec![
            resolved,
            line("active", dec!(5), dec!(10)),
            line("cancelled", dec!(100), dec!(1000)),
        ];

        let totals = order_totals(&lines);
        assert_eq!(totals.customer_total, dec!(100));
        assert_eq!(totals.resolved_total, dec!(100));
    }

    #[test]
    fn unresolved_active_line_falls_back_to_submitted_values() {
        let lines = vec![line("active", dec!(2), dec!(3.50))];
        let totals = order_totals(&lines);
        assert_eq!(totals.customer_total, dec!(7.00));
        assert_eq!(totals.resolved_total, dec!(7.00));
    }

    #[test]
    fn effective_sku_prefers_validated_mapping() {
        let mut l = line("active", dec!(1), dec!(1));
        assert_eq!(l.effective_sku(), Some("CUST-1"));
        l.sonance_prod_sku = Some("SON-1".into());
        assert_eq!(l.effective_sku(), Some("SON-1"));
        l.validated_sku = Some("VAL-1".into());
        assert_eq!(l.effective_sku(), Some("VAL-1"));
    }

    #[test]
    fn effective_uom_prefers_resolved() {
        let mut l = line("active", dec!(1), dec!(1));
        assert_eq!(l.effective_uom(), Some("EA"));
        l.sonance_uom = Some("BX".into());
        assert_eq!(l.effective_uom(), Some("BX"));
    }

    #[test]
    fn line_status_codes_round_trip() {
        for status in [LineStatus::Active, LineStatus::Cancelled] {
            assert_eq!(LineStatus::from_code(status.as_str()), Some(status));
        }
        assert_eq!(LineStatus::from_code("deleted"), None);
    }

    #[test]
    fn blank_sku_is_treated_as_missing() {
        let mut l = line("active", dec!(1), dec!(1));
        l.cust_product_sku = Some("   ".into());
        assert_eq!(l.effective_sku(), None);
    }
}
