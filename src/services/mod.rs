pub mod audit;
pub mod erp_export;
pub mod lifecycle;
pub mod line_validation;
pub mod order_validation;
pub mod pricing;
