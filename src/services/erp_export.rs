use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::order_line;
use crate::entities::purchase_order;
use crate::entities::sku_mapping::{self, Entity as SkuMappingEntity};
use crate::errors::ServiceError;
use crate::models::line::{LineView, ValidationSource};

/// Serializes validated orders into the ERP's import document and records
/// the SKU-mapping learning signal at export time.
///
/// The element names and nesting below are the downstream ERP's fixed import
/// contract; output is deterministic so the exact document sent can always be
/// reproduced from the order state for audit.
#[derive(Clone)]
pub struct ErpExportService {
    db: Arc<DatabaseConnection>,
}

fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn element(out: &mut String, indent: usize, name: &str, value: &str) {
    for _ in 0..indent {
        out.push_str("  ");
    }
    out.push('<');
    out.push_str(name);
    out.push('>');
    out.push_str(&xml_escape(value));
    out.push_str("</");
    out.push_str(name);
    out.push_str(">\n");
}

fn open(out: &mut String, indent: usize, name: &str) {
    for _ in 0..indent {
        out.push_str("  ");
    }
    out.push('<');
    out.push_str(name);
    out.push_str(">\n");
}

fn close(out: &mut String, indent: usize, name: &str) {
    for _ in 0..indent {
        out.push_str("  ");
    }
    out.push_str("</");
    out.push_str(name);
    out.push_str(">\n");
}

impl ErpExportService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Renders the order and its active lines into the ERP XML document.
    ///
    /// Only resolved (`sonance_*`) values are emitted — the ERP recognizes
    /// catalog SKUs only. Cancelled lines are omitted entirely. Calling this
    /// twice on unchanged state produces byte-identical output.
    pub fn serialize_order(
        order: &purchase_order::Model,
        lines: &[order_line::Model],
    ) -> Result<String, ServiceError> {
        let mut active: Vec<&order_line::Model> = lines.iter().filter(|l| l.is_active()).collect();
        active.sort_by_key(|l| l.cust_line_number);

        if active.is_empty() {
            return Err(ServiceError::ValidationError(
                "Cannot serialize an order with no active lines".to_string(),
            ));
        }

        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        open(&mut out, 0, "SalesOrder");
        open(&mut out, 1, "Header");
        element(&mut out, 2, "CustOrderNumber", &order.cust_order_number);
        element(&mut out, 2, "PsCustomerId", &order.ps_customer_id);
        element(&mut out, 2, "CurrencyCode", &order.currency_code);
        open(&mut out, 2, "ShipTo");
        element(&mut out, 3, "Name", order.shipto_name.as_deref().unwrap_or(""));
        element(
            &mut out,
            3,
            "AddressLine1",
            order.cust_shipto_address_line1.as_deref().unwrap_or(""),
        );
        element(
            &mut out,
            3,
            "AddressLine2",
            order.cust_shipto_address_line2.as_deref().unwrap_or(""),
        );
        element(
            &mut out,
            3,
            "AddressLine3",
            order.cust_shipto_address_line3.as_deref().unwrap_or(""),
        );
        element(&mut out, 3, "City", order.cust_shipto_city.as_deref().unwrap_or(""));
        element(&mut out, 3, "State", order.cust_shipto_state.as_deref().unwrap_or(""));
        element(
            &mut out,
            3,
            "PostalCode",
            order.cust_shipto_postal_code.as_deref().unwrap_or(""),
        );
        element(
            &mut out,
            3,
            "Country",
            order.cust_shipto_country.as_deref().unwrap_or(""),
        );
        close(&mut out, 2, "ShipTo");
        element(&mut out, 2, "Carrier", order.cust_carrier.as_deref().unwrap_or(""));
        element(&mut out, 2, "ShipVia", order.cust_ship_via.as_deref().unwrap_or(""));
        close(&mut out, 1, "Header");

        open(&mut out, 1, "Lines");
        for line in active {
            let sku = line.effective_sku().ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "Line {} has no resolved SKU",
                    line.cust_line_number
                ))
            })?;
            let quantity = line
                .sonance_quantity
                .or(line.cust_quantity)
                .unwrap_or(Decimal::ZERO);
            let unit_price = line
                .sonance_unit_price
                .or(line.cust_unit_price)
                .unwrap_or(Decimal::ZERO);
            let uom = line.effective_uom().unwrap_or("");

            open(&mut out, 2, "Line");
            element(&mut out, 3, "LineNumber", &line.cust_line_number.to_string());
            element(&mut out, 3, "ProductSku", sku);
            element(&mut out, 3, "Quantity", &quantity.to_string());
            element(&mut out, 3, "Uom", uom);
            element(&mut out, 3, "UnitPrice", &unit_price.to_string());
            element(&mut out, 3, "LineTotal", &(quantity * unit_price).to_string());
            close(&mut out, 2, "Line");
        }
        close(&mut out, 1, "Lines");
        close(&mut out, 0, "SalesOrder");

        Ok(out)
    }

    /// Fetches an order and renders the export document without posting.
    /// Lets a reviewer preview exactly what the ERP would receive.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn render_order(&self, order_id: Uuid) -> Result<String, ServiceError> {
        let db = &*self.db;
        let order = purchase_order::Entity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let lines = order_line::Entity::find()
            .filter(order_line::Column::OrderId.eq(order_id))
            .all(db)
            .await?;
        Self::serialize_order(&order, &lines)
    }

    /// Upserts one SKU-mapping row per active, non-manually-added line with a
    /// customer SKU, keyed by (customer, customer SKU). `times_used` feeds
    /// future automated resolution.
    #[instrument(skip(self, conn, order, lines), fields(order_id = %order.id))]
    pub async fn record_sku_mappings<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: &purchase_order::Model,
        lines: &[order_line::Model],
    ) -> Result<usize, ServiceError> {
        let now = Utc::now();
        let mut recorded = 0usize;

        for line in lines.iter().filter(|l| l.is_active()) {
            if line.validation_source.as_deref() == Some(ValidationSource::ManualAdd.as_str()) {
                continue;
            }
            let cust_sku = match line.cust_product_sku.as_deref() {
                Some(s) if !s.trim().is_empty() => s,
                _ => continue,
            };
            let resolved_sku = match line.effective_sku() {
                Some(s) => s.to_string(),
                None => continue,
            };

            let existing = SkuMappingEntity::find()
                .filter(sku_mapping::Column::CustomerId.eq(order.ps_customer_id.clone()))
                .filter(sku_mapping::Column::CustProductSku.eq(cust_sku))
                .one(conn)
                .await?;

            match existing {
                Some(mapping) => {
                    let times_used = mapping.times_used + 1;
                    let mut active: sku_mapping::ActiveModel = mapping.into();
                    active.resolved_sku = Set(resolved_sku);
                    active.times_used = Set(times_used);
                    active.last_used_at = Set(now);
                    active.update(conn).await?;
                }
                None => {
                    let active = sku_mapping::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        customer_id: Set(order.ps_customer_id.clone()),
                        cust_product_sku: Set(cust_sku.to_string()),
                        resolved_sku: Set(resolved_sku),
                        times_used: Set(1),
                        last_used_at: Set(now),
                        created_at: Set(now),
                    };
                    active.insert(conn).await?;
                }
            }
            recorded += 1;
        }

        info!(order_id = %order.id, recorded, "SKU mappings recorded");
        Ok(recorded)
    }
}
