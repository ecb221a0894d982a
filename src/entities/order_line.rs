use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One line item of a purchase order.
///
/// Dual-valued by design: `cust_*` columns hold what the customer submitted
/// and are immutable after intake except by explicit manual edit; `sonance_*`
/// columns hold the resolved authoritative mapping and are the only columns
/// the reconciliation engine writes. Lines are never deleted;
/// `line_status = 'cancelled'` is the terminal negative state and restore
/// returns it to 'active'.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_lines")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub cust_line_number: i32,

    pub cust_product_sku: Option<String>,
    pub cust_product_desc: Option<String>,
    pub cust_quantity: Option<Decimal>,
    pub cust_unit_price: Option<Decimal>,
    pub cust_line_total: Option<Decimal>,
    pub cust_uom: Option<String>,
    pub cust_currency_code: Option<String>,

    pub sonance_prod_sku: Option<String>,
    pub sonance_quantity: Option<Decimal>,
    pub sonance_unit_price: Option<Decimal>,
    pub sonance_uom: Option<String>,

    pub validated_sku: Option<String>,
    /// 'manual_lookup', 'manual_add', or 'automated'
    pub validation_source: Option<String>,
    pub is_validated: bool,
    /// 'active' or 'cancelled'
    pub line_status: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::purchase_order::Entity",
        from = "Column::OrderId",
        to = "super::purchase_order::Column::Id"
    )]
    PurchaseOrder,
}

impl Related<super::purchase_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PurchaseOrder.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, insert: bool) -> Result<Self, DbErr> {
        let mut active_model = self;
        let now = Utc::now();

        if insert {
            if let ActiveValue::NotSet = active_model.created_at {
                active_model.created_at = Set(now);
            }
        }
        if let ActiveValue::NotSet = active_model.updated_at {
            active_model.updated_at = Set(Some(now));
        }

        Ok(active_model)
    }
}
