use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait, Value,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::CustomerDefaults;
use crate::entities::order_line::{self, Entity as LineEntity};
use crate::entities::purchase_order::{self, Entity as OrderEntity};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::line::{LineStatus, LineView, ValidationSource};
use crate::models::status::{transition, OrderAction, OrderStatus};
use crate::services::audit::{AuditService, FieldChange};
use crate::services::erp_export::ErpExportService;
use crate::services::order_validation::{OrderValidation, OrderValidationService};
use crate::services::pricing::PricingService;

/// Minimum length of a restore reason.
const MIN_RESTORE_REASON_LEN: usize = 10;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "Customer order number is required"))]
    pub cust_order_number: String,
    #[validate(length(min = 1, message = "Customer id is required"))]
    pub ps_customer_id: String,
    #[validate(length(min = 3, max = 3, message = "Currency must be 3 characters"))]
    pub currency_code: String,
    pub shipto_name: Option<String>,
    pub cust_shipto_address_line1: Option<String>,
    pub cust_shipto_address_line2: Option<String>,
    pub cust_shipto_address_line3: Option<String>,
    pub cust_shipto_city: Option<String>,
    pub cust_shipto_state: Option<String>,
    pub cust_shipto_postal_code: Option<String>,
    pub cust_shipto_country: Option<String>,
    pub cust_carrier: Option<String>,
    pub cust_ship_via: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct AddLineRequest {
    #[validate(length(min = 1, message = "Product SKU is required"))]
    pub product_sku: String,
    pub quantity: Decimal,
    pub uom: Option<String>,
    pub unit_price: Option<Decimal>,
    pub description: Option<String>,
}

/// Header fields that customer service may edit; `None` leaves a field
/// untouched.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HeaderUpdate {
    pub shipto_name: Option<String>,
    pub cust_shipto_address_line1: Option<String>,
    pub cust_shipto_address_line2: Option<String>,
    pub cust_shipto_address_line3: Option<String>,
    pub cust_shipto_city: Option<String>,
    pub cust_shipto_state: Option<String>,
    pub cust_shipto_postal_code: Option<String>,
    pub cust_shipto_country: Option<String>,
    pub cust_carrier: Option<String>,
    pub cust_ship_via: Option<String>,
}

/// Submitted-value fields customer service may edit on a line; `None` leaves
/// a field untouched. Resolved (`sonance_*`) values are only ever written by
/// the reconciliation actions, never here.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LineUpdate {
    pub cust_product_sku: Option<String>,
    pub cust_product_desc: Option<String>,
    pub cust_quantity: Option<Decimal>,
    pub cust_unit_price: Option<Decimal>,
    pub cust_uom: Option<String>,
}

/// Result of a successful post: the exact document sent to the ERP plus any
/// non-blocking warnings the reviewer saw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostOutcome {
    pub xml: String,
    pub warnings: Vec<String>,
}

/// Orchestrates every status-changing operation on an order.
///
/// All writes follow the same shape: one transaction holding the primary
/// mutation, its audit entries, and the status-history row; order rows are
/// updated compare-and-swap on `version` so a concurrent editor surfaces as
/// `ConcurrentModification` instead of a silent overwrite.
#[derive(Clone)]
pub struct LifecycleService {
    db: Arc<DatabaseConnection>,
    audit: AuditService,
    pricing: PricingService,
    validation: OrderValidationService,
    export: ErpExportService,
    defaults: CustomerDefaults,
    event_sender: Option<Arc<EventSender>>,
}

impl LifecycleService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        audit: AuditService,
        pricing: PricingService,
        validation: OrderValidationService,
        export: ErpExportService,
        defaults: CustomerDefaults,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            audit,
            pricing,
            validation,
            export,
            defaults,
            event_sender,
        }
    }

    /// Creates an order in status '01 New', seeding blank carrier/ship-via/
    /// ship-to-name from the configured customer defaults.
    #[instrument(skip(self, request), fields(cust_order_number = %request.cust_order_number))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
        actor: &str,
    ) -> Result<purchase_order::Model, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let db = &*self.db;
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let txn = db.begin().await?;

        let order = purchase_order::ActiveModel {
            id: Set(order_id),
            cust_order_number: Set(request.cust_order_number.clone()),
            ps_customer_id: Set(request.ps_customer_id),
            ps_order_number: Set(None),
            status_code: Set(OrderStatus::New.code().to_string()),
            currency_code: Set(request.currency_code),
            shipto_name: Set(request
                .shipto_name
                .or_else(|| self.defaults.default_shipto_name.clone())),
            cust_shipto_address_line1: Set(request.cust_shipto_address_line1),
            cust_shipto_address_line2: Set(request.cust_shipto_address_line2),
            cust_shipto_address_line3: Set(request.cust_shipto_address_line3),
            cust_shipto_city: Set(request.cust_shipto_city),
            cust_shipto_state: Set(request.cust_shipto_state),
            cust_shipto_postal_code: Set(request.cust_shipto_postal_code),
            cust_shipto_country: Set(request.cust_shipto_country),
            cust_carrier: Set(request
                .cust_carrier
                .or_else(|| self.defaults.default_carrier.clone())),
            cust_ship_via: Set(request
                .cust_ship_via
                .or_else(|| self.defaults.default_ship_via.clone())),
            cancelled_by: Set(None),
            cancelled_at: Set(None),
            cancelled_reason: Set(None),
            exported_by: Set(None),
            exported_at: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };
        let order = order.insert(&txn).await?;

        self.audit
            .record_status(&txn, order_id, OrderStatus::New, actor, Some("Order created"))
            .await?;

        txn.commit().await?;
        info!(%order_id, "Order created");
        Ok(order)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<purchase_order::Model, ServiceError> {
        let db = &*self.db;
        OrderEntity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Moves the order to '02 Under Review' once intake hands it to a
    /// reviewer.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn begin_review(
        &self,
        order_id: Uuid,
        actor: &str,
    ) -> Result<purchase_order::Model, ServiceError> {
        let order = self.get_order(order_id).await?;
        let status = self.status_of(&order)?;
        if status != OrderStatus::New {
            return Err(ServiceError::InvalidStatus(format!(
                "Review starts from '01 New', order is in '{}'",
                status
            )));
        }

        let db = &*self.db;
        let txn = db.begin().await?;
        let updated = self
            .guarded_update(
                &txn,
                &order,
                vec![(
                    purchase_order::Column::StatusCode,
                    OrderStatus::UnderReview.code().into(),
                )],
            )
            .await?;
        self.audit
            .record_status(
                &txn,
                order_id,
                OrderStatus::UnderReview,
                actor,
                Some("Review started"),
            )
            .await?;
        txn.commit().await?;

        self.send_status_event(order_id, status, OrderStatus::UnderReview).await;
        Ok(updated)
    }

    /// Registers a qualifying mutation on the caller's transaction.
    ///
    /// In '02' this transitions to '03' and appends one history note naming
    /// the cause; in '01' and '03' it is a no-op, so repeated edits never
    /// produce duplicate transitions or history entries.
    pub async fn note_mutation<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: &purchase_order::Model,
        actor: &str,
        cause: &str,
    ) -> Result<Option<purchase_order::Model>, ServiceError> {
        let status = self.status_of(order)?;
        let next = transition(status, OrderAction::Mutation)
            .map_err(|e| ServiceError::InvalidStatus(e.to_string()))?;

        match next {
            Some(next_status) => {
                let updated = self
                    .guarded_update(
                        conn,
                        order,
                        vec![(
                            purchase_order::Column::StatusCode,
                            next_status.code().into(),
                        )],
                    )
                    .await?;
                self.audit
                    .record_status(conn, order.id, next_status, actor, Some(cause))
                    .await?;
                Ok(Some(updated))
            }
            None => Ok(None),
        }
    }

    /// Adds a line to the order. Allowed only in '01'/'02'/'03' and only
    /// before an ERP order number exists. The SKU must resolve in the
    /// customer's catalog; the new line enters active with source
    /// 'manual_add'.
    #[instrument(skip(self, request), fields(order_id = %order_id, sku = %request.product_sku))]
    pub async fn add_line(
        &self,
        order_id: Uuid,
        request: AddLineRequest,
        actor: &str,
    ) -> Result<order_line::Model, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        if request.quantity <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Quantity must be greater than zero".to_string(),
            ));
        }

        let order = self.get_order(order_id).await?;
        let status = self.status_of(&order)?;
        transition(status, OrderAction::AddLine)
            .map_err(|e| ServiceError::InvalidStatus(e.to_string()))?;
        if order.ps_order_number.is_some() {
            return Err(ServiceError::InvalidOperation(
                "Cannot add lines once an ERP order number is assigned".to_string(),
            ));
        }

        let resolution = self
            .pricing
            .resolve_price(
                &order.ps_customer_id,
                &request.product_sku,
                request.uom.as_deref().unwrap_or(""),
            )
            .await?
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "SKU '{}' not found in the pricing catalog for customer {}",
                    request.product_sku, order.ps_customer_id
                ))
            })?;

        let db = &*self.db;
        let txn = db.begin().await?;

        let next_line_number = LineEntity::find()
            .filter(order_line::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?
            .iter()
            .map(|l| l.cust_line_number)
            .max()
            .unwrap_or(0)
            + 1;

        let now = Utc::now();
        let unit_price = request.unit_price.unwrap_or(resolution.unit_price);
        let line = order_line::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            cust_line_number: Set(next_line_number),
            cust_product_sku: Set(Some(request.product_sku.clone())),
            cust_product_desc: Set(request.description.or(resolution.description.clone())),
            cust_quantity: Set(Some(request.quantity)),
            cust_unit_price: Set(Some(unit_price)),
            cust_line_total: Set(Some(request.quantity * unit_price)),
            cust_uom: Set(Some(resolution.uom.clone())),
            cust_currency_code: Set(Some(order.currency_code.clone())),
            sonance_prod_sku: Set(Some(request.product_sku.clone())),
            sonance_quantity: Set(Some(request.quantity)),
            sonance_unit_price: Set(Some(resolution.unit_price)),
            sonance_uom: Set(Some(resolution.uom)),
            validated_sku: Set(Some(request.product_sku.clone())),
            validation_source: Set(Some(ValidationSource::ManualAdd.as_str().to_string())),
            is_validated: Set(true),
            line_status: Set(LineStatus::Active.as_str().to_string()),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };
        let line = line.insert(&txn).await?;

        self.audit
            .record_change(
                &txn,
                order_id,
                Some(line.id),
                actor,
                "line_added",
                FieldChange::new("cust_product_sku", None, Some(request.product_sku.clone())),
                None,
            )
            .await?;
        self.note_mutation(
            &txn,
            &order,
            actor,
            &format!("Line {} added", next_line_number),
        )
        .await?;

        txn.commit().await?;
        info!(%order_id, line_id = %line.id, "Line added");

        self.send_event(Event::LineAdded {
            order_id,
            line_id: line.id,
        })
        .await;
        Ok(line)
    }

    /// Cancels a single line. The line is excluded from totals and export
    /// from the next computation on; it can be restored later.
    #[instrument(skip(self), fields(order_id = %order_id, line_id = %line_id))]
    pub async fn cancel_line(
        &self,
        order_id: Uuid,
        line_id: Uuid,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<order_line::Model, ServiceError> {
        self.set_line_status(order_id, line_id, LineStatus::Cancelled, actor, reason)
            .await
    }

    /// Restores a previously cancelled line to active.
    #[instrument(skip(self), fields(order_id = %order_id, line_id = %line_id))]
    pub async fn restore_line(
        &self,
        order_id: Uuid,
        line_id: Uuid,
        actor: &str,
    ) -> Result<order_line::Model, ServiceError> {
        self.set_line_status(order_id, line_id, LineStatus::Active, actor, None)
            .await
    }

    /// Edits header fields. Each changed field gets its own audit entry; the
    /// edit is a qualifying mutation.
    #[instrument(skip(self, update), fields(order_id = %order_id))]
    pub async fn update_header(
        &self,
        order_id: Uuid,
        update: HeaderUpdate,
        actor: &str,
    ) -> Result<purchase_order::Model, ServiceError> {
        let order = self.get_order(order_id).await?;
        let status = self.status_of(&order)?;
        if status.is_locked_for_editing() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} is locked for editing in status '{}'",
                order.cust_order_number, status
            )));
        }

        let mut changes: Vec<(purchase_order::Column, Value)> = Vec::new();
        let mut diffs: Vec<FieldChange> = Vec::new();
        let mut consider = |column: purchase_order::Column,
                            name: &str,
                            old: &Option<String>,
                            new: &Option<String>| {
            if let Some(value) = new {
                if old.as_deref() != Some(value.as_str()) {
                    changes.push((column, value.clone().into()));
                    diffs.push(FieldChange::new(name, old.clone(), Some(value.clone())));
                }
            }
        };

        consider(
            purchase_order::Column::ShiptoName,
            "shipto_name",
            &order.shipto_name,
            &update.shipto_name,
        );
        consider(
            purchase_order::Column::CustShiptoAddressLine1,
            "cust_shipto_address_line1",
            &order.cust_shipto_address_line1,
            &update.cust_shipto_address_line1,
        );
        consider(
            purchase_order::Column::CustShiptoAddressLine2,
            "cust_shipto_address_line2",
            &order.cust_shipto_address_line2,
            &update.cust_shipto_address_line2,
        );
        consider(
            purchase_order::Column::CustShiptoAddressLine3,
            "cust_shipto_address_line3",
            &order.cust_shipto_address_line3,
            &update.cust_shipto_address_line3,
        );
        consider(
            purchase_order::Column::CustShiptoCity,
            "cust_shipto_city",
            &order.cust_shipto_city,
            &update.cust_shipto_city,
        );
        consider(
            purchase_order::Column::CustShiptoState,
            "cust_shipto_state",
            &order.cust_shipto_state,
            &update.cust_shipto_state,
        );
        consider(
            purchase_order::Column::CustShiptoPostalCode,
            "cust_shipto_postal_code",
            &order.cust_shipto_postal_code,
            &update.cust_shipto_postal_code,
        );
        consider(
            purchase_order::Column::CustShiptoCountry,
            "cust_shipto_country",
            &order.cust_shipto_country,
            &update.cust_shipto_country,
        );
        consider(
            purchase_order::Column::CustCarrier,
            "cust_carrier",
            &order.cust_carrier,
            &update.cust_carrier,
        );
        consider(
            purchase_order::Column::CustShipVia,
            "cust_ship_via",
            &order.cust_ship_via,
            &update.cust_ship_via,
        );

        if changes.is_empty() {
            return Ok(order);
        }

        let db = &*self.db;
        let txn = db.begin().await?;
        let updated = self.guarded_update(&txn, &order, changes).await?;
        self.audit
            .record_changes(&txn, order_id, None, actor, "header_edited", diffs, None)
            .await?;
        let after_mutation = self
            .note_mutation(&txn, &updated, actor, "Header fields edited")
            .await?;
        txn.commit().await?;

        Ok(after_mutation.unwrap_or(updated))
    }

    /// Edits a line's submitted values. Allowed only while the order is
    /// editable and the line active; each changed field gets its own audit
    /// entry, the line total is recomputed, and the edit is a qualifying
    /// mutation.
    #[instrument(skip(self, update), fields(order_id = %order_id, line_id = %line_id))]
    pub async fn update_line(
        &self,
        order_id: Uuid,
        line_id: Uuid,
        update: LineUpdate,
        actor: &str,
    ) -> Result<order_line::Model, ServiceError> {
        if let Some(qty) = update.cust_quantity {
            if qty <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Quantity must be greater than zero".to_string(),
                ));
            }
        }
        if let Some(price) = update.cust_unit_price {
            if price < Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Unit price must not be negative".to_string(),
                ));
            }
        }

        let order = self.get_order(order_id).await?;
        let status = self.status_of(&order)?;
        if status.is_locked_for_editing() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} is locked for editing in status '{}'",
                order.cust_order_number, status
            )));
        }

        let db = &*self.db;
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

        let mut diffs: Vec<FieldChange> = Vec::new();
        let line_number = line.cust_line_number;
        let mut active: order_line::ActiveModel = line.clone().into();

        if let Some(sku) = update.cust_product_sku {
            if line.cust_product_sku.as_deref() != Some(sku.as_str()) {
                diffs.push(FieldChange::new(
                    "cust_product_sku",
                    line.cust_product_sku.clone(),
                    Some(sku.clone()),
                ));
                active.cust_product_sku = Set(Some(sku));
            }
        }
        if let Some(desc) = update.cust_product_desc {
            if line.cust_product_desc.as_deref() != Some(desc.as_str()) {
                diffs.push(FieldChange::new(
                    "cust_product_desc",
                    line.cust_product_desc.clone(),
                    Some(desc.clone()),
                ));
                active.cust_product_desc = Set(Some(desc));
            }
        }
        if let Some(uom) = update.cust_uom {
            if line.cust_uom.as_deref() != Some(uom.as_str()) {
                diffs.push(FieldChange::new(
                    "cust_uom",
                    line.cust_uom.clone(),
                    Some(uom.clone()),
                ));
                active.cust_uom = Set(Some(uom));
            }
        }

        let mut quantity = line.cust_quantity;
        if let Some(qty) = update.cust_quantity {
            if line.cust_quantity != Some(qty) {
                diffs.push(FieldChange::new(
                    "cust_quantity",
                    line.cust_quantity.map(|q| q.to_string()),
                    Some(qty.to_string()),
                ));
                active.cust_quantity = Set(Some(qty));
                quantity = Some(qty);
            }
        }
        let mut unit_price = line.cust_unit_price;
        if let Some(price) = update.cust_unit_price {
            if line.cust_unit_price != Some(price) {
                diffs.push(FieldChange::new(
                    "cust_unit_price",
                    line.cust_unit_price.map(|p| p.to_string()),
                    Some(price.to_string()),
                ));
                active.cust_unit_price = Set(Some(price));
                unit_price = Some(price);
            }
        }

        if diffs.is_empty() {
            return Ok(line);
        }
        if let (Some(qty), Some(price)) = (quantity, unit_price) {
            active.cust_line_total = Set(Some(qty * price));
        }

        let txn = db.begin().await?;
        let updated = active.update(&txn).await?;
        self.audit
            .record_changes(&txn, order_id, Some(line_id), actor, "line_edited", diffs, None)
            .await?;
        self.note_mutation(
            &txn,
            &order,
            actor,
            &format!("Line {} edited", line_number),
        )
        .await?;
        txn.commit().await?;

        Ok(updated)
    }

    /// Cancels the whole order. Blocked in '04'/'05'/'06' and once an ERP
    /// order number exists. Cancellation cascades: every line is force-set to
    /// cancelled, one audit entry per line.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        actor: &str,
        reason: &str,
    ) -> Result<purchase_order::Model, ServiceError> {
        let order = self.get_order(order_id).await?;
        let status = self.status_of(&order)?;
        transition(status, OrderAction::Cancel)
            .map_err(|e| ServiceError::InvalidStatus(e.to_string()))?;
        if order.ps_order_number.is_some() {
            return Err(ServiceError::InvalidOperation(
                "Cannot cancel an order with an assigned ERP order number".to_string(),
            ));
        }

        let db = &*self.db;
        let now = Utc::now();
        let txn = db.begin().await?;

        let updated = self
            .guarded_update(
                &txn,
                &order,
                vec![
                    (
                        purchase_order::Column::StatusCode,
                        OrderStatus::Cancelled.code().into(),
                    ),
                    (purchase_order::Column::CancelledBy, actor.into()),
                    (purchase_order::Column::CancelledAt, Some(now).into()),
                    (
                        purchase_order::Column::CancelledReason,
                        reason.to_string().into(),
                    ),
                ],
            )
            .await?;

        // Cascade to lines.
        let lines = LineEntity::find()
            .filter(order_line::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;
        for line in lines.iter().filter(|l| l.is_active()) {
            let mut active: order_line::ActiveModel = line.clone().into();
            active.line_status = Set(LineStatus::Cancelled.as_str().to_string());
            active.update(&txn).await?;
            self.audit
                .record_change(
                    &txn,
                    order_id,
                    Some(line.id),
                    actor,
                    "line_cancelled",
                    FieldChange::new(
                        "line_status",
                        Some(LineStatus::Active.as_str().to_string()),
                        Some(LineStatus::Cancelled.as_str().to_string()),
                    ),
                    Some(reason),
                )
                .await?;
        }

        self.audit
            .record_action(&txn, order_id, None, actor, "order_cancelled", Some(reason))
            .await?;
        self.audit
            .record_status(&txn, order_id, OrderStatus::Cancelled, actor, Some(reason))
            .await?;
        txn.commit().await?;
        info!(%order_id, "Order cancelled");

        self.send_event(Event::OrderCancelled(order_id)).await;
        self.send_status_event(order_id, status, OrderStatus::Cancelled).await;
        Ok(updated)
    }

    /// Restores a cancelled order to '02 Under Review'. Requires a reason of
    /// at least ten characters; clears cancellation metadata and
    /// unconditionally restores every line to active.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn restore_order(
        &self,
        order_id: Uuid,
        actor: &str,
        reason: &str,
    ) -> Result<purchase_order::Model, ServiceError> {
        if reason.trim().len() < MIN_RESTORE_REASON_LEN {
            return Err(ServiceError::ValidationError(format!(
                "Restore reason must be at least {} characters",
                MIN_RESTORE_REASON_LEN
            )));
        }

        let order = self.get_order(order_id).await?;
        let status = self.status_of(&order)?;
        transition(status, OrderAction::Restore)
            .map_err(|e| ServiceError::InvalidStatus(e.to_string()))?;

        let db = &*self.db;
        let txn = db.begin().await?;

        let updated = self
            .guarded_update(
                &txn,
                &order,
                vec![
                    (
                        purchase_order::Column::StatusCode,
                        OrderStatus::UnderReview.code().into(),
                    ),
                    (
                        purchase_order::Column::CancelledBy,
                        Option::<String>::None.into(),
                    ),
                    (
                        purchase_order::Column::CancelledAt,
                        Option::<chrono::DateTime<Utc>>::None.into(),
                    ),
                    (
                        purchase_order::Column::CancelledReason,
                        Option::<String>::None.into(),
                    ),
                ],
            )
            .await?;

        let lines = LineEntity::find()
            .filter(order_line::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;
        for line in lines.iter().filter(|l| !l.is_active()) {
            let mut active: order_line::ActiveModel = line.clone().into();
            active.line_status = Set(LineStatus::Active.as_str().to_string());
            active.update(&txn).await?;
            self.audit
                .record_change(
                    &txn,
                    order_id,
                    Some(line.id),
                    actor,
                    "line_restored",
                    FieldChange::new(
                        "line_status",
                        Some(LineStatus::Cancelled.as_str().to_string()),
                        Some(LineStatus::Active.as_str().to_string()),
                    ),
                    Some(reason),
                )
                .await?;
        }

        self.audit
            .record_action(&txn, order_id, None, actor, "order_restored", Some(reason))
            .await?;
        self.audit
            .record_status(&txn, order_id, OrderStatus::UnderReview, actor, Some(reason))
            .await?;
        txn.commit().await?;
        info!(%order_id, "Order restored");

        self.send_event(Event::OrderRestored(order_id)).await;
        self.send_status_event(order_id, status, OrderStatus::UnderReview).await;
        Ok(updated)
    }

    /// Posts the order to the ERP: runs the postability gate, serializes the
    /// export document, stamps export metadata, records SKU mappings, and
    /// advances to '04 Upload In Process'. The ERP order number arrives later
    /// via [`record_erp_order_number`](Self::record_erp_order_number).
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn post_order(
        &self,
        order_id: Uuid,
        actor: &str,
    ) -> Result<PostOutcome, ServiceError> {
        let order = self.get_order(order_id).await?;
        let status = self.status_of(&order)?;
        transition(status, OrderAction::Post)
            .map_err(|e| ServiceError::InvalidStatus(e.to_string()))?;

        let validation: OrderValidation =
            self.validation.validate_order_for_post(order_id).await?;
        if !validation.valid {
            return Err(ServiceError::ValidationError(validation.errors.join("; ")));
        }

        let lines = LineEntity::find()
            .filter(order_line::Column::OrderId.eq(order_id))
            .order_by_asc(order_line::Column::CustLineNumber)
            .all(&*self.db)
            .await?;
        let xml = ErpExportService::serialize_order(&order, &lines)?;

        let db = &*self.db;
        let now = Utc::now();
        let txn = db.begin().await?;

        self.guarded_update(
            &txn,
            &order,
            vec![
                (
                    purchase_order::Column::StatusCode,
                    OrderStatus::UploadInProcess.code().into(),
                ),
                (purchase_order::Column::ExportedBy, actor.into()),
                (purchase_order::Column::ExportedAt, Some(now).into()),
            ],
        )
        .await?;
        self.audit
            .record_status(
                &txn,
                order_id,
                OrderStatus::UploadInProcess,
                actor,
                Some("Order posted to ERP"),
            )
            .await?;
        self.export.record_sku_mappings(&txn, &order, &lines).await?;
        txn.commit().await?;
        info!(%order_id, "Order posted");

        self.send_event(Event::OrderPosted(order_id)).await;
        self.send_status_event(order_id, status, OrderStatus::UploadInProcess).await;

        Ok(PostOutcome {
            xml,
            warnings: validation.warnings,
        })
    }

    /// Records the ERP-assigned order number. This external callback is the
    /// single trigger for the '04' to '05' transition; there is no internal
    /// assign-if-missing path.
    #[instrument(skip(self), fields(order_id = %order_id, ps_order_number = %ps_order_number))]
    pub async fn record_erp_order_number(
        &self,
        order_id: Uuid,
        ps_order_number: &str,
        actor: &str,
    ) -> Result<purchase_order::Model, ServiceError> {
        if ps_order_number.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "ERP order number must not be empty".to_string(),
            ));
        }

        let order = self.get_order(order_id).await?;
        let status = self.status_of(&order)?;
        transition(status, OrderAction::RecordErpNumber)
            .map_err(|e| ServiceError::InvalidStatus(e.to_string()))?;
        if order.ps_order_number.is_some() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} already has an ERP order number",
                order.cust_order_number
            )));
        }

        let db = &*self.db;
        let txn = db.begin().await?;
        let updated = self
            .guarded_update(
                &txn,
                &order,
                vec![
                    (
                        purchase_order::Column::PsOrderNumber,
                        ps_order_number.to_string().into(),
                    ),
                    (
                        purchase_order::Column::StatusCode,
                        OrderStatus::UploadSuccessful.code().into(),
                    ),
                ],
            )
            .await?;
        self.audit
            .record_change(
                &txn,
                order_id,
                None,
                actor,
                "erp_number_recorded",
                FieldChange::new("ps_order_number", None, Some(ps_order_number.to_string())),
                None,
            )
            .await?;
        self.audit
            .record_status(
                &txn,
                order_id,
                OrderStatus::UploadSuccessful,
                actor,
                Some("ERP order number received"),
            )
            .await?;
        txn.commit().await?;

        self.send_event(Event::ErpOrderNumberRecorded {
            order_id,
            ps_order_number: ps_order_number.to_string(),
        })
        .await;
        self.send_status_event(order_id, status, OrderStatus::UploadSuccessful).await;
        Ok(updated)
    }

    // ---- internals ----

    fn status_of(&self, order: &purchase_order::Model) -> Result<OrderStatus, ServiceError> {
        OrderStatus::from_code(&order.status_code).ok_or_else(|| {
            ServiceError::InvalidStatus(format!(
                "Order {} has unknown status code '{}'",
                order.cust_order_number, order.status_code
            ))
        })
    }

    /// Compare-and-swap update on (id, version). Zero rows affected means
    /// another session changed the order since it was read.
    async fn guarded_update<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: &purchase_order::Model,
        changes: Vec<(purchase_order::Column, Value)>,
    ) -> Result<purchase_order::Model, ServiceError> {
        let mut update = OrderEntity::update_many()
            .filter(purchase_order::Column::Id.eq(order.id))
            .filter(purchase_order::Column::Version.eq(order.version));
        for (column, value) in changes {
            update = update.col_expr(column, Expr::value(value));
        }
        let update = update
            .col_expr(
                purchase_order::Column::Version,
                Expr::value(order.version + 1),
            )
            .col_expr(
                purchase_order::Column::UpdatedAt,
                Expr::value(Some(Utc::now())),
            );

        let result = update.exec(conn).await?;
        if result.rows_affected == 0 {
            warn!(order_id = %order.id, version = order.version, "Stale order version on update");
            return Err(ServiceError::ConcurrentModification(order.id));
        }

        OrderEntity::find_by_id(order.id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order.id)))
    }

    async fn set_line_status(
        &self,
        order_id: Uuid,
        line_id: Uuid,
        new_status: LineStatus,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<order_line::Model, ServiceError> {
        let order = self.get_order(order_id).await?;
        let status = self.status_of(&order)?;
        if status.is_locked_for_editing() {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} is locked for editing in status '{}'",
                order.cust_order_number, status
            )));
        }

        let db = &*self.db;
        let line = LineEntity::find_by_id(line_id)
            .filter(order_line::Column::OrderId.eq(order_id))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order line {} not found", line_id)))?;

        let old_status = line.line_status.clone();
        if old_status == new_status.as_str() {
            return Ok(line);
        }

        let txn = db.begin().await?;
        let line_number = line.cust_line_number;
        let mut active: order_line::ActiveModel = line.into();
        active.line_status = Set(new_status.as_str().to_string());
        let updated = active.update(&txn).await?;

        let action = match new_status {
            LineStatus::Cancelled => "line_cancelled",
            LineStatus::Active => "line_restored",
        };
        self.audit
            .record_change(
                &txn,
                order_id,
                Some(line_id),
                actor,
                action,
                FieldChange::new(
                    "line_status",
                    Some(old_status),
                    Some(new_status.as_str().to_string()),
                ),
                reason,
            )
            .await?;
        self.note_mutation(
            &txn,
            &order,
            actor,
            &format!("Line {} {}", line_number, match new_status {
                LineStatus::Cancelled => "cancelled",
                LineStatus::Active => "restored",
            }),
        )
        .await?;
        txn.commit().await?;

        let event = match new_status {
            LineStatus::Cancelled => Event::LineCancelled { order_id, line_id },
            LineStatus::Active => Event::LineRestored { order_id, line_id },
        };
        self.send_event(event).await;
        Ok(updated)
    }

    async fn send_event(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "Failed to send event");
            }
        }
    }

    async fn send_status_event(&self, order_id: Uuid, old: OrderStatus, new: OrderStatus) {
        self.send_event(Event::OrderStatusChanged {
            order_id,
            old_status: old.code().to_string(),
            new_status: new.code().to_string(),
        })
        .await;
    }
}
