pub mod audit_log;
pub mod customer_pricing;
pub mod order_line;
pub mod order_status_history;
pub mod purchase_order;
pub mod sku_mapping;
