//! Order Review API Library
//!
//! Core reconciliation engine for customer purchase orders: catalog price
//! resolution, price variance review, line and order postability validation,
//! the order lifecycle state machine, ERP export serialization, and the
//! append-only audit trail.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod models;
pub mod services;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::events::EventSender;
use crate::services::audit::AuditService;
use crate::services::erp_export::ErpExportService;
use crate::services::lifecycle::LifecycleService;
use crate::services::line_validation::LineReconciliationService;
use crate::services::order_validation::OrderValidationService;
use crate::services::pricing::PricingService;

/// Application state wiring every service over one shared connection pool.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub pricing: PricingService,
    pub validation: OrderValidationService,
    pub export: ErpExportService,
    pub lifecycle: LifecycleService,
    pub reconciliation: LineReconciliationService,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        let audit = AuditService::new();
        let pricing = PricingService::new(db.clone());
        let validation = OrderValidationService::new(db.clone(), pricing.clone());
        let export = ErpExportService::new(db.clone());
        let lifecycle = LifecycleService::new(
            db.clone(),
            audit.clone(),
            pricing.clone(),
            validation.clone(),
            export.clone(),
            config.customer_defaults.clone(),
            event_sender.clone(),
        );
        let reconciliation = LineReconciliationService::new(
            db.clone(),
            pricing.clone(),
            audit,
            lifecycle.clone(),
            event_sender,
        );
        Self {
            db,
            config,
            pricing,
            validation,
            export,
            lifecycle,
            reconciliation,
        }
    }
}
