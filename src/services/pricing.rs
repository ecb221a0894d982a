use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::entities::customer_pricing::{self, Entity as PricingEntity};
use crate::entities::order_line;
use crate::errors::ServiceError;
use crate::models::line::LineView;

/// Result of resolving a (customer, SKU, UOM) against the pricing catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceResolution {
    pub unit_price: Decimal,
    pub description: Option<String>,
    pub uom: String,
    /// False when the price came from the UOM-unconstrained fallback query.
    pub matched_exact_uom: bool,
}

/// Pure lookup service over the customer pricing catalog.
///
/// Resolution is two-phase: exact (customer, sku, uom) first, then
/// (customer, sku) with the UOM unconstrained. Customer catalogs do not carry
/// every UOM variant; the fallback keeps such lines resolvable while flagging
/// them for human attention via `matched_exact_uom = false`.
#[derive(Clone)]
pub struct PricingService {
    db: Arc<DatabaseConnection>,
}

impl PricingService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Resolves the authoritative price for one (customer, SKU, UOM).
    /// `Ok(None)` means the SKU is absent from the customer's catalog.
    #[instrument(skip(self), fields(customer_id = %customer_id, sku = %product_sku, uom = %uom))]
    pub async fn resolve_price(
        &self,
        customer_id: &str,
        product_sku: &str,
        uom: &str,
    ) -> Result<Option<PriceResolution>, ServiceError> {
        let db = &*self.db;

        let exact = PricingEntity::find()
            .filter(customer_pricing::Column::CustomerId.eq(customer_id))
            .filter(customer_pricing::Column::ProductSku.eq(product_sku))
            .filter(customer_pricing::Column::Uom.eq(uom))
            .one(db)
            .await?;

        if let Some(entry) = exact {
            return Ok(Some(Self::resolution(entry, true)));
        }

        // Fallback: UOM unconstrained, deterministic first row.
        let fallback = PricingEntity::find()
            .filter(customer_pricing::Column::CustomerId.eq(customer_id))
            .filter(customer_pricing::Column::ProductSku.eq(product_sku))
            .order_by_asc(customer_pricing::Column::Uom)
            .one(db)
            .await?;

        Ok(fallback.map(|entry| Self::resolution(entry, false)))
    }

    /// Resolves every line of an order with a single catalog query.
    ///
    /// One `IN` lookup replaces the per-line round-trips; the
    /// exact-UOM-then-fallback policy is applied per line in memory. Lines
    /// without an effective SKU map to `None`.
    #[instrument(skip(self, lines), fields(customer_id = %customer_id, line_count = lines.len()))]
    pub async fn resolve_for_order(
        &self,
        customer_id: &str,
        lines: &[order_line::Model],
    ) -> Result<HashMap<Uuid, Option<PriceResolution>>, ServiceError> {
        let db = &*self.db;

        let skus: Vec<String> = lines
            .iter()
            .filter_map(|l| l.effective_sku())
            .map(str::to_string)
            .collect();

        let mut by_sku: HashMap<String, Vec<customer_pricing::Model>> = HashMap::new();
        if !skus.is_empty() {
            let entries = PricingEntity::find()
                .filter(customer_pricing::Column::CustomerId.eq(customer_id))
                .filter(customer_pricing::Column::ProductSku.is_in(skus))
                .order_by_asc(customer_pricing::Column::ProductSku)
                .order_by_asc(customer_pricing::Column::Uom)
                .all(db)
                .await?;
            for entry in entries {
                by_sku.entry(entry.product_sku.clone()).or_default().push(entry);
            }
        }

        let mut resolutions = HashMap::with_capacity(lines.len());
        for line in lines {
            let resolution = match (line.effective_sku(), line.effective_uom()) {
                (Some(sku), uom) => by_sku.get(sku).and_then(|entries| {
                    let exact = uom.and_then(|u| {
                        entries.iter().find(|e| e.uom == u).cloned()
                    });
                    match exact {
                        Some(entry) => Some(Self::resolution(entry, true)),
                        None => entries
                            .first()
                            .cloned()
                            .map(|entry| Self::resolution(entry, false)),
                    }
                }),
                (None, _) => None,
            };
            resolutions.insert(line.id, resolution);
        }

        Ok(resolutions)
    }

    fn resolution(entry: customer_pricing::Model, matched_exact_uom: bool) -> PriceResolution {
        PriceResolution {
            unit_price: entry.unit_price,
            description: entry.description,
            uom: entry.uom,
            matched_exact_uom,
        }
    }
}
