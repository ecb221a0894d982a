//! Reconciliation tests: catalog price resolution with UOM fallback, manual
//! SKU lookup, postability gating, and order totals.

mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use order_review_api::entities::audit_log;
use order_review_api::errors::ServiceError;
use order_review_api::models::line::{order_totals, LineView};
use order_review_api::models::variance::{compare_variance, VarianceClass, VarianceThresholds};

#[tokio::test]
async fn resolver_prefers_exact_uom_and_falls_back() {
    let app = TestApp::new().await;
    app.seed_pricing("CUST01", "SKU-1", "EA", dec!(10.00)).await;

    let exact = app
        .state
        .pricing
        .resolve_price("CUST01", "SKU-1", "EA")
        .await
        .unwrap()
        .expect("exact match");
    assert!(exact.matched_exact_uom);
    assert_eq!(exact.unit_price, dec!(10.00));
    assert_eq!(exact.uom, "EA");

    let fallback = app
        .state
        .pricing
        .resolve_price("CUST01", "SKU-1", "BX")
        .await
        .unwrap()
        .expect("fallback match");
    assert!(!fallback.matched_exact_uom);
    assert_eq!(fallback.unit_price, dec!(10.00));
    assert_eq!(fallback.uom, "EA");

    let missing = app
        .state
        .pricing
        .resolve_price("CUST01", "NOPE", "EA")
        .await
        .unwrap();
    assert!(missing.is_none());

    // Catalogs are per customer.
    let other_customer = app
        .state
        .pricing
        .resolve_price("CUST02", "SKU-1", "EA")
        .await
        .unwrap();
    assert!(other_customer.is_none());
}

#[tokio::test]
async fn manual_lookup_resolves_the_line_and_audits_every_field() {
    let app = TestApp::new().await;
    let order = app.seed_order("02").await;
    let line = app.seed_line(order.id, 1, "CUST-SKU", dec!(5), dec!(9.00), "EA").await;
    app.seed_pricing("CUST01", "SON-100", "EA", dec!(10.00)).await;

    let updated = app
        .state
        .reconciliation
        .apply_manual_lookup(order.id, line.id, "SON-100", Some("EA"), "reviewer")
        .await
        .unwrap();

    assert_eq!(updated.sonance_prod_sku.as_deref(), Some("SON-100"));
    assert_eq!(updated.sonance_unit_price, Some(dec!(10.00)));
    assert_eq!(updated.sonance_uom.as_deref(), Some("EA"));
    assert_eq!(updated.sonance_quantity, Some(dec!(5)));
    assert_eq!(updated.validated_sku.as_deref(), Some("SON-100"));
    assert_eq!(updated.validation_source.as_deref(), Some("manual_lookup"));
    assert!(updated.is_validated);
    // The submitted values stay untouched.
    assert_eq!(updated.cust_product_sku.as_deref(), Some("CUST-SKU"));
    assert_eq!(updated.cust_unit_price, Some(dec!(9.00)));

    let entries = audit_log::Entity::find()
        .filter(audit_log::Column::OrderLineId.eq(line.id))
        .filter(audit_log::Column::ActionType.eq("manual_lookup"))
        .all(app.db())
        .await
        .unwrap();
    let fields: Vec<&str> = entries.iter().filter_map(|e| e.field_name.as_deref()).collect();
    assert!(fields.contains(&"sonance_prod_sku"));
    assert!(fields.contains(&"sonance_unit_price"));
    assert!(fields.contains(&"sonance_uom"));
    assert!(fields.contains(&"validated_sku"));
    assert!(fields.contains(&"sonance_quantity"));

    // The lookup is a qualifying mutation.
    let order = app.state.lifecycle.get_order(order.id).await.unwrap();
    assert_eq!(order.status_code, "03");
}

#[tokio::test]
async fn manual_lookup_rejects_unknown_skus() {
    let app = TestApp::new().await;
    let order = app.seed_order("02").await;
    let line = app.seed_line(order.id, 1, "CUST-SKU", dec!(5), dec!(9.00), "EA").await;

    let err = app
        .state
        .reconciliation
        .apply_manual_lookup(order.id, line.id, "NOT-IN-CATALOG", None, "reviewer")
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let order = app.state.lifecycle.get_order(order.id).await.unwrap();
    assert_eq!(order.status_code, "02");
}

#[tokio::test]
async fn locked_orders_reject_line_edits() {
    let app = TestApp::new().await;
    let order = app.seed_order("04").await;
    let line = app.seed_line(order.id, 1, "SKU-1", dec!(5), dec!(10.00), "EA").await;
    app.seed_pricing("CUST01", "SKU-1", "EA", dec!(10.00)).await;

    let err = app
        .state
        .reconciliation
        .apply_manual_lookup(order.id, line.id, "SKU-1", None, "reviewer")
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn price_apply_and_revert_round_trip() {
    let app = TestApp::new().await;
    let order = app.seed_order("02").await;
    let line = app.seed_line(order.id, 1, "SKU-1", dec!(5), dec!(9.00), "EA").await;
    app.seed_pricing("CUST01", "SKU-1", "EA", dec!(10.00)).await;

    let applied = app
        .state
        .reconciliation
        .apply_catalog_price(order.id, line.id, "reviewer")
        .await
        .unwrap();
    assert_eq!(applied.sonance_unit_price, Some(dec!(10.00)));

    let reverted = app
        .state
        .reconciliation
        .revert_catalog_price(order.id, line.id, "reviewer")
        .await
        .unwrap();
    assert_eq!(reverted.sonance_unit_price, None);
}

#[tokio::test]
async fn variance_flags_catalog_price_against_submitted_price() {
    let thresholds = VarianceThresholds::default();

    let variance = compare_variance(Some(dec!(9.00)), dec!(10.00), &thresholds)
        .expect("comparable prices");
    match variance.classification {
        VarianceClass::Mismatch { high, .. } => assert!(high, "11.1% is above the 5% threshold"),
        VarianceClass::Match => panic!("11.1% is not a match"),
    }
    assert!(variance.summary().contains("higher"));

    let exact = compare_variance(Some(dec!(10.00)), dec!(10.00), &thresholds).unwrap();
    assert_matches!(exact.classification, VarianceClass::Match);

    // Zero or missing submitted price is incomparable, not an error.
    assert!(compare_variance(Some(dec!(0)), dec!(10.00), &thresholds).is_none());
    assert!(compare_variance(None, dec!(10.00), &thresholds).is_none());
}

#[tokio::test]
async fn postability_requires_exact_uom_resolution() {
    let app = TestApp::new().await;
    let order = app.seed_order("02").await;
    // Catalog only carries EA; the line asks for BX.
    app.seed_line(order.id, 1, "SKU-1", dec!(5), dec!(10.00), "BX").await;
    app.seed_pricing("CUST01", "SKU-1", "EA", dec!(10.00)).await;

    let validation = app
        .state
        .validation
        .validate_order_for_post(order.id)
        .await
        .unwrap();
    assert!(!validation.valid);
    assert!(validation.errors.iter().any(|e| e.contains("UOM 'BX'")));
}

#[tokio::test]
async fn remapped_skus_warn_but_do_not_block() {
    let app = TestApp::new().await;
    let order = app.seed_order("02").await;
    let line = app.seed_line(order.id, 1, "CUST-SKU", dec!(5), dec!(9.00), "EA").await;
    app.seed_pricing("CUST01", "SON-100", "EA", dec!(10.00)).await;
    app.state
        .reconciliation
        .apply_manual_lookup(order.id, line.id, "SON-100", Some("EA"), "reviewer")
        .await
        .unwrap();

    let validation = app
        .state
        .validation
        .validate_order_for_post(order.id)
        .await
        .unwrap();
    assert!(validation.valid, "errors: {:?}", validation.errors);
    assert_eq!(validation.warnings.len(), 1);
    assert!(validation.warnings[0].contains("CUST-SKU"));
    assert!(validation.warnings[0].contains("SON-100"));
}

#[tokio::test]
async fn cancelled_lines_are_excluded_from_totals() {
    let app = TestApp::new().await;
    let order = app.seed_order("02").await;
    app.seed_line(order.id, 1, "SKU-1", dec!(5), dec!(10.00), "EA").await;
    app.seed_line(order.id, 2, "SKU-2", dec!(5), dec!(10.00), "EA").await;
    let big = app.seed_line(order.id, 3, "SKU-3", dec!(100), dec!(1000.00), "EA").await;

    app.state
        .lifecycle
        .cancel_line(order.id, big.id, "reviewer", Some("ordered in error"))
        .await
        .unwrap();

    let lines = order_review_api::entities::order_line::Entity::find()
        .filter(order_review_api::entities::order_line::Column::OrderId.eq(order.id))
        .all(app.db())
        .await
        .unwrap();
    assert_eq!(lines.iter().filter(|l| l.is_active()).count(), 2);

    let totals = order_totals(&lines);
    assert_eq!(totals.customer_total, dec!(100.00));
    assert_eq!(totals.resolved_total, dec!(100.00));
}
