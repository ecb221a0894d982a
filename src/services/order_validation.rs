use std::collections::HashMap;
use std::sync::Arc;

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::entities::order_line::{self, Entity as LineEntity};
use crate::entities::purchase_order::{self, Entity as OrderEntity};
use crate::errors::ServiceError;
use crate::models::line::LineView;
use crate::services::line_validation::validate_line;
use crate::services::pricing::{PriceResolution, PricingService};

/// Postability verdict for a whole order. Errors block posting; warnings are
/// informational and never do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

fn require(errors: &mut Vec<String>, value: Option<&str>, label: &str) {
    if value.map_or(true, |v| v.trim().is_empty()) {
        errors.push(format!("Missing {}", label));
    }
}

/// Pure postability check over an order header, its lines, and their catalog
/// resolutions. Never mutates anything; the caller gates the Post action on
/// the result.
pub fn validate_order(
    order: &purchase_order::Model,
    lines: &[order_line::Model],
    resolutions: &HashMap<Uuid, Option<PriceResolution>>,
) -> OrderValidation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    require(&mut errors, Some(&order.cust_order_number), "customer order number");
    require(&mut errors, Some(&order.ps_customer_id), "customer id");
    require(&mut errors, order.shipto_name.as_deref(), "ship-to name");
    require(
        &mut errors,
        order.cust_shipto_address_line1.as_deref(),
        "ship-to address line 1",
    );
    require(&mut errors, order.cust_shipto_city.as_deref(), "ship-to city");
    require(&mut errors, order.cust_shipto_state.as_deref(), "ship-to state");
    require(
        &mut errors,
        order.cust_shipto_postal_code.as_deref(),
        "ship-to postal code",
    );
    require(&mut errors, order.cust_carrier.as_deref(), "carrier");
    require(&mut errors, order.cust_ship_via.as_deref(), "ship-via");

    if lines.is_empty() {
        errors.push("Order has no lines".to_string());
    } else if !lines.iter().any(|l| l.is_active()) {
        errors.push("Order has no active lines".to_string());
    }

    for line in lines.iter().filter(|l| l.is_active()) {
        let resolution = resolutions.get(&line.id).and_then(|r| r.as_ref());
        let result = validate_line(line, resolution);
        errors.extend(result.errors);

        if let (Some(cust_sku), Some(resolved_sku)) =
            (line.cust_product_sku.as_deref(), line.sonance_prod_sku.as_deref())
        {
            if !cust_sku.trim().is_empty() && cust_sku != resolved_sku {
                warnings.push(format!(
                    "Line {}: product was remapped from '{}' to '{}'",
                    line.cust_line_number, cust_sku, resolved_sku
                ));
            }
        }
    }

    OrderValidation {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Read-only service that aggregates header completeness and per-line
/// validation into the single pass/fail decision gating the Post action.
#[derive(Clone)]
pub struct OrderValidationService {
    db: Arc<DatabaseConnection>,
    pricing: PricingService,
}

impl OrderValidationService {
    pub fn new(db: Arc<DatabaseConnection>, pricing: PricingService) -> Self {
        Self { db, pricing }
    }

    /// Validates an order for posting, resolving all line prices with one
    /// batched catalog lookup.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn validate_order_for_post(
        &self,
        order_id: Uuid,
    ) -> Result<OrderValidation, ServiceError> {
        let (order, lines) = self.load_order(order_id).await?;
        let resolutions = self
            .pricing
            .resolve_for_order(&order.ps_customer_id, &lines)
            .await?;
        Ok(validate_order(&order, &lines, &resolutions))
    }

    pub(crate) async fn load_order(
        &self,
        order_id: Uuid,
    ) -> Result<(purchase_order::Model, Vec<order_line::Model>), ServiceError> {
        let db = &*self.db;
        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let lines = LineEntity::find()
            .filter(order_line::Column::OrderId.eq(order_id))
            .order_by_asc(order_line::Column::CustLineNumber)
            .all(db)
            .await?;
        Ok((order, lines))
    }
}
