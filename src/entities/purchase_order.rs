use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// One customer purchase order.
///
/// `status_code` is the two-digit lifecycle code ('01'..'06'); see
/// `models::status`. `ps_order_number` is assigned by the downstream ERP and
/// is only ever set while the order is in '04' (after which it reads as '05').
/// Orders are never physically deleted; cancellation is status '06'.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, Validate)]
#[sea_orm(table_name = "purchase_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[validate(length(
        min = 1,
        max = 50,
        message = "Customer order number must be between 1 and 50 characters"
    ))]
    pub cust_order_number: String,

    pub ps_customer_id: String,
    pub ps_order_number: Option<String>,
    pub status_code: String,
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

    pub cancelled_by: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_reason: Option<String>,
    pub exported_by: Option<String>,
    pub exported_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,

    /// Optimistic-lock token; every guarded update increments it.
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_line::Entity")]
    OrderLine,
    #[sea_orm(has_many = "super::order_status_history::Entity")]
    StatusHistory,
    #[sea_orm(has_many = "super::audit_log::Entity")]
    AuditLog,
}

impl Related<super::order_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderLine.def()
    }
}

impl Related<super::order_status_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StatusHistory.def()
    }
}

impl Related<super::audit_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AuditLog.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
