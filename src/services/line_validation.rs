use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::order_line::{self, Entity as LineEntity};
use crate::entities::purchase_order::{self, Entity as OrderEntity};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::line::{LineView, ValidationSource};
use crate::models::status::OrderStatus;
use crate::services::audit::{AuditService, FieldChange};
use crate::services::lifecycle::LifecycleService;
use crate::services::pricing::{PriceResolution, PricingService};

/// Postability verdict for one order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineValidation {
    pub postable: bool,
    pub errors: Vec<String>,
}

/// Validates a single active line for posting. Every failing check yields a
/// distinct line-numbered error; nothing short-circuits, so a reviewer sees
/// all problems on the line at once.
pub fn validate_line(
    line: &order_line::Model,
    resolution: Option<&PriceResolution>,
) -> LineValidation {
    let n = line.cust_line_number;
    let mut errors = Vec::new();

    match line.effective_sku() {
        None => errors.push(format!("Line {}: no product SKU", n)),
        Some(sku) => match resolution {
            None => errors.push(format!(
                "Line {}: SKU '{}' not found in the customer pricing catalog",
                n, sku
            )),
            Some(res) if !res.matched_exact_uom => {
                let uom = line.effective_uom().unwrap_or("");
                errors.push(format!(
                    "Line {}: UOM '{}' does not match a catalog entry for SKU '{}' (closest is '{}')",
                    n, uom, sku, res.uom
                ));
            }
            Some(_) => {}
        },
    }

    match line.cust_quantity {
        Some(qty) if qty > Decimal::ZERO => {}
        Some(_) => errors.push(format!("Line {}: quantity must be greater than zero", n)),
        None => errors.push(format!("Line {}: quantity is missing", n)),
    }

    match line.cust_unit_price {
        Some(price) if price >= Decimal::ZERO => {}
        Some(_) => errors.push(format!("Line {}: unit price must not be negative", n)),
        None => errors.push(format!("Line {}: unit price is missing", n)),
    }

    LineValidation {
        postable: errors.is_empty(),
        errors,
    }
}

/// Reconciliation actions on individual lines: manual SKU lookup, catalog
/// price apply/revert. Every write lands with its audit entries in one
/// transaction and counts as a qualifying mutation for the lifecycle.
#[derive(Clone)]
pub struct LineReconciliationService {
    db: Arc<DatabaseConnection>,
    pricing: PricingService,
    audit: AuditService,
    lifecycle: LifecycleService,
    event_sender: Option<Arc<EventSender>>,
}

impl LineReconciliationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        pricing: PricingService,
        audit: AuditService,
        lifecycle: LifecycleService,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            pricing,
            audit,
            lifecycle,
            event_sender,
        }
    }

    /// Applies a manual SKU lookup to a line: resolves the SKU against the
    /// customer catalog, writes the resolved mapping onto the `sonance_*`
    /// fields, and marks the line validated with source 'manual_lookup'.
    #[instrument(skip(self), fields(order_id = %order_id, line_id = %line_id, sku = %new_sku))]
    pub async fn apply_manual_lookup(
        &self,
        order_id: Uuid,
        line_id: Uuid,
        new_sku: &str,
        uom: Option<&str>,
        actor: &str,
    ) -> Result<order_line::Model, ServiceError> {
        let (order, line) = self.load_editable_line(order_id, line_id).await?;

        let lookup_uom = uom
            .map(str::to_string)
            .or_else(|| line.effective_uom().map(str::to_string))
            .unwrap_or_default();
        let resolution = self
            .pricing
            .resolve_price(&order.ps_customer_id, new_sku, &lookup_uom)
            .await?
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "SKU '{}' not found in the pricing catalog for customer {}",
                    new_sku, order.ps_customer_id
                ))
            })?;

        let db = &*self.db;
        let txn = db.begin().await?;

        let mut changes = Vec::new();
        changes.push(FieldChange::new(
            "sonance_prod_sku",
            line.sonance_prod_sku.clone(),
            Some(new_sku.to_string()),
        ));
        changes.push(FieldChange::new(
            "sonance_uom",
            line.sonance_uom.clone(),
            Some(resolution.uom.clone()),
        ));
        changes.push(FieldChange::new(
            "sonance_unit_price",
            line.sonance_unit_price.map(|p| p.to_string()),
            Some(resolution.unit_price.to_string()),
        ));
        changes.push(FieldChange::new(
            "validated_sku",
            line.validated_sku.clone(),
            Some(new_sku.to_string()),
        ));

        let mut active: order_line::ActiveModel = line.clone().into();
        active.sonance_prod_sku = Set(Some(new_sku.to_string()));
        active.sonance_uom = Set(Some(resolution.uom.clone()));
        active.sonance_unit_price = Set(Some(resolution.unit_price));
        if line.sonance_quantity.is_none() {
            active.sonance_quantity = Set(line.cust_quantity);
            changes.push(FieldChange::new(
                "sonance_quantity",
                None,
                line.cust_quantity.map(|q| q.to_string()),
            ));
        }
        active.validated_sku = Set(Some(new_sku.to_string()));
        active.validation_source = Set(Some(ValidationSource::ManualLookup.as_str().to_string()));
        active.is_validated = Set(true);
        let updated = active.update(&txn).await?;

        self.audit
            .record_changes(
                &txn,
                order_id,
                Some(line_id),
                actor,
                "manual_lookup",
                changes,
                None,
            )
            .await?;

        self.lifecycle
            .note_mutation(
                &txn,
                &order,
                actor,
                &format!("SKU resolved on line {}", line.cust_line_number),
            )
            .await?;

        txn.commit().await?;
        info!(%order_id, %line_id, sku = new_sku, "Manual lookup applied");

        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender
                .send(Event::SkuResolved {
                    order_id,
                    line_id,
                    resolved_sku: new_sku.to_string(),
                })
                .await
            {
                warn!(error = %e, %order_id, "Failed to send sku resolved event");
            }
        }

        Ok(updated)
    }

    /// Overwrites the line's resolved unit price with the current catalog
    /// price for its effective SKU/UOM.
    #[instrument(skip(self), fields(order_id = %order_id, line_id = %line_id))]
    pub async fn apply_catalog_price(
        &self,
        order_id: Uuid,
        line_id: Uuid,
        actor: &str,
    ) -> Result<order_line::Model, ServiceError> {
        let (order, line) = self.load_editable_line(order_id, line_id).await?;

        let sku = line.effective_sku().ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Line {} has no SKU to price against",
                line.cust_line_number
            ))
        })?;
        let uom = line.effective_uom().unwrap_or("");
        let resolution = self
            .pricing
            .resolve_price(&order.ps_customer_id, sku, uom)
            .await?
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "SKU '{}' not found in the pricing catalog for customer {}",
                    sku, order.ps_customer_id
                ))
            })?;

        let old_price = line.sonance_unit_price;
        self.write_price(order_id, &order, line, Some(resolution.unit_price), old_price, actor, "price_applied")
            .await
    }

    /// Reverts a previously applied catalog price, clearing the resolved
    /// unit price so the submitted price stands alone again.
    #[instrument(skip(self), fields(order_id = %order_id, line_id = %line_id))]
    pub async fn revert_catalog_price(
        &self,
        order_id: Uuid,
        line_id: Uuid,
        actor: &str,
    ) -> Result<order_line::Model, ServiceError> {
        let (order, line) = self.load_editable_line(order_id, line_id).await?;
        let old_price = line.sonance_unit_price;
        self.write_price(order_id, &order, line, None, old_price, actor, "price_reverted")
            .await
    }

    async fn write_price(
        &self,
        order_id: Uuid,
        order: &purchase_order::Model,
        line: order_line::Model,
        new_price: Option<Decimal>,
        old_price: Option<Decimal>,
        actor: &str,
        action_type: &str,
    ) -> Result<order_line::Model, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let line_id = line.id;
        let line_number = line.cust_line_number;
        let mut active: order_line::ActiveModel = line.into();
        active.sonance_unit_price = Set(new_price);
        let updated = active.update(&txn).await?;

        self.audit
            .record_change(
                &txn,
                order_id,
                Some(line_id),
                actor,
                action_type,
                FieldChange::new(
                    "sonance_unit_price",
                    old_price.map(|p| p.to_string()),
                    new_price.map(|p| p.to_string()),
                ),
                None,
            )
            .await?;

        self.lifecycle
            .note_mutation(
                &txn,
                order,
                actor,
                &format!("Price {} on line {}", action_type, line_number),
            )
            .await?;

        txn.commit().await?;
        Ok(updated)
    }

    /// Loads the order and line, rejecting edits once the order is locked
    /// ('04', '05', '06') and actions on cancelled lines.
    async fn load_editable_line(
        &self,
        order_id: Uuid,
        line_id: Uuid,
    ) -> Result<(purchase_order::Model, order_line::Model), ServiceError> {
        let db = &*self.db;

        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let status = OrderStatus::from_code(&order.status_code).ok_or_else(|| {
            ServiceError::InvalidStatus(format!("Unknown status code '{}'", order.status_code))
        })?;
        if status.is_locked_for_editing() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} is locked for editing in status '{}'",
                order.cust_order_number, status
            )));
        }

        let line = LineEntity::find_by_id(line_id)
            .filter(order_line::Column::OrderId.eq(order_id))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order line {} not found", line_id)))?;

        if !line.is_active() {
            return Err(ServiceError::InvalidOperation(format!(
                "Line {} is cancelled",
                line.cust_line_number
            )));
        }

        Ok((order, line))
    }
}
