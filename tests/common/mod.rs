#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema, Set,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use order_review_api::config::AppConfig;
use order_review_api::entities::{
    audit_log, customer_pricing, order_line, order_status_history, purchase_order, sku_mapping,
};
use order_review_api::events::{self, Event};
use order_review_api::AppState;

/// Test harness over an in-memory SQLite database with the full schema and
/// service wiring.
pub struct TestApp {
    pub state: AppState,
    pub events: mpsc::Receiver<Event>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(AppConfig::new("sqlite::memory:", "test")).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        // One connection so every session sees the same in-memory database.
        let mut opts = ConnectOptions::new(config.database_url.clone());
        opts.max_connections(1)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(5))
            .sqlx_logging(false);
        let db = Database::connect(opts)
            .await
            .expect("failed to open in-memory sqlite");
        create_schema(&db).await;

        let (sender, receiver) = events::channel(64);
        let state = AppState::new(Arc::new(db), config, Some(Arc::new(sender)));
        Self {
            state,
            events: receiver,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.state.db
    }

    /// Inserts an order with a complete, postable header.
    pub async fn seed_order(&self, status_code: &str) -> purchase_order::Model {
        let now = Utc::now();
        purchase_order::ActiveModel {
            id: Set(Uuid::new_v4()),
            cust_order_number: Set(format!("PO-{}", &Uuid::new_v4().simple().to_string()[..8])),
            ps_customer_id: Set("CUST01".to_string()),
            ps_order_number: Set(None),
            status_code: Set(status_code.to_string()),
            currency_code: Set("USD".to_string()),
            shipto_name: Set(Some("Acme Distribution".to_string())),
            cust_shipto_address_line1: Set(Some("100 Warehouse Way".to_string())),
            cust_shipto_address_line2: Set(None),
            cust_shipto_address_line3: Set(None),
            cust_shipto_city: Set(Some("Reno".to_string())),
            cust_shipto_state: Set(Some("NV".to_string())),
            cust_shipto_postal_code: Set(Some("89501".to_string())),
            cust_shipto_country: Set(Some("US".to_string())),
            cust_carrier: Set(Some("UPS".to_string())),
            cust_ship_via: Set(Some("GROUND".to_string())),
            cancelled_by: Set(None),
            cancelled_at: Set(None),
            cancelled_reason: Set(None),
            exported_by: Set(None),
            exported_at: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        }
        .insert(self.db())
        .await
        .expect("seed order")
    }

    /// Inserts an active line with submitted values only (unresolved).
    pub async fn seed_line(
        &self,
        order_id: Uuid,
        line_number: i32,
        sku: &str,
        quantity: Decimal,
        unit_price: Decimal,
        uom: &str,
    ) -> order_line::Model {
        let now = Utc::now();
        order_line::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            cust_line_number: Set(line_number),
            cust_product_sku: Set(Some(sku.to_string())),
            cust_product_desc: Set(Some("Seeded item".to_string())),
            cust_quantity: Set(Some(quantity)),
            cust_unit_price: Set(Some(unit_price)),
            cust_line_total: Set(Some(quantity * unit_price)),
            cust_uom: Set(Some(uom.to_string())),
            cust_currency_code: Set(Some("USD".to_string())),
            sonance_prod_sku: Set(None),
            sonance_quantity: Set(None),
            sonance_unit_price: Set(None),
            sonance_uom: Set(None),
            validated_sku: Set(None),
            validation_source: Set(None),
            is_validated: Set(false),
            line_status: Set("active".to_string()),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(self.db())
        .await
        .expect("seed line")
    }

    /// Inserts a customer pricing catalog entry.
    pub async fn seed_pricing(
        &self,
        customer_id: &str,
        sku: &str,
        uom: &str,
        unit_price: Decimal,
    ) -> customer_pricing::Model {
        customer_pricing::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id.to_string()),
            product_sku: Set(sku.to_string()),
            uom: Set(uom.to_string()),
            unit_price: Set(unit_price),
            description: Set(Some("Catalog item".to_string())),
            created_at: Set(Utc::now()),
        }
        .insert(self.db())
        .await
        .expect("seed pricing")
    }
}

async fn create_schema(db: &DatabaseConnection) {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);
    db.execute(backend.build(&schema.create_table_from_entity(purchase_order::Entity)))
        .await
        .expect("create purchase_orders");
    db.execute(backend.build(&schema.create_table_from_entity(order_line::Entity)))
        .await
        .expect("create order_lines");
    db.execute(backend.build(&schema.create_table_from_entity(customer_pricing::Entity)))
        .await
        .expect("create customer_pricing");
    db.execute(backend.build(&schema.create_table_from_entity(sku_mapping::Entity)))
        .await
        .expect("create sku_mappings");
    db.execute(backend.build(&schema.create_table_from_entity(audit_log::Entity)))
        .await
        .expect("create audit_log");
    db.execute(backend.build(&schema.create_table_from_entity(order_status_history::Entity)))
        .await
        .expect("create order_status_history");
}
