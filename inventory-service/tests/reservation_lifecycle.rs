//! Reserve → release/deduct flows against the in-process ledger.

mod common;

use std::time::Duration;

use common::{harness, harness_with, stock_pair};
use inventory_service::store::LedgerStore;
use inventory_service::{EngineConfig, ErrorKind, InventoryError};
use shared::ReservationStatus;

#[tokio::test]
async fn reserve_then_release_restores_available() {
    let h = harness();
    h.engine.initialize_stock("sku-1", 100).await.unwrap();

    let reservation = h.engine.reserve("sku-1", "order-1", 30).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Reserved);
    assert_eq!(stock_pair(&h, "sku-1").await, (70, 30));

    let released = h
        .engine
        .release(&reservation.reservation_id.to_string())
        .await
        .unwrap();
    assert_eq!(released.status, ReservationStatus::Released);
    assert_eq!(stock_pair(&h, "sku-1").await, (100, 0));
}

#[tokio::test]
async fn deduct_consumes_reserved_units() {
    let h = harness();
    h.engine.initialize_stock("sku-1", 50).await.unwrap();

    let reservation = h.engine.reserve("sku-1", "order-1", 20).await.unwrap();
    let deducted = h
        .engine
        .deduct(&reservation.reservation_id.to_string())
        .await
        .unwrap();

    assert_eq!(deducted.status, ReservationStatus::Deducted);
    assert_eq!(stock_pair(&h, "sku-1").await, (30, 0));
}

#[tokio::test]
async fn initialize_is_idempotent() {
    let h = harness();
    let first = h.engine.initialize_stock("sku-1", 10).await.unwrap();
    h.engine.reserve("sku-1", "order-1", 4).await.unwrap();

    let second = h.engine.initialize_stock("sku-1", 500).await.unwrap();
    assert_eq!(second.product_id, first.product_id);
    assert_eq!((second.available_quantity, second.reserved_quantity), (6, 4));
}

#[tokio::test]
async fn add_stock_increments_available_only() {
    let h = harness();
    h.engine.initialize_stock("sku-1", 10).await.unwrap();
    h.engine.reserve("sku-1", "order-1", 3).await.unwrap();

    let stock = h.engine.add_stock("sku-1", 15).await.unwrap();
    assert_eq!((stock.available_quantity, stock.reserved_quantity), (22, 3));

    let err = h.engine.add_stock("sku-missing", 5).await.unwrap_err();
    assert_eq!(err.code(), "PRODUCT_NOT_FOUND");
    let err = h.engine.add_stock("sku-1", 0).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_QUANTITY");
}

#[tokio::test]
async fn insufficient_stock_leaves_state_untouched() {
    let h = harness();
    h.engine.initialize_stock("sku-1", 5).await.unwrap();

    let err = h.engine.reserve("sku-1", "order-1", 6).await.unwrap_err();
    assert!(matches!(
        err,
        InventoryError::InsufficientStock { requested: 6, available: 5, .. }
    ));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(stock_pair(&h, "sku-1").await, (5, 0));
    assert!(h.ledger.reservations_for("sku-1").await.is_empty());

    h.engine.reserve("sku-1", "order-1", 5).await.unwrap();
    assert_eq!(stock_pair(&h, "sku-1").await, (0, 5));
}

#[tokio::test]
async fn missing_records_are_not_found() {
    let h = harness();

    let err = h.engine.get_stock("nope").await.unwrap_err();
    assert_eq!(err.code(), "PRODUCT_NOT_FOUND");
    let err = h.engine.reserve("nope", "order-1", 1).await.unwrap_err();
    assert_eq!(err.code(), "PRODUCT_NOT_FOUND");

    let unknown = uuid::Uuid::new_v4().to_string();
    let err = h.engine.release(&unknown).await.unwrap_err();
    assert_eq!(err.code(), "RESERVATION_NOT_FOUND");
    let err = h.engine.deduct(&unknown).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = h.engine.get_reservation(&unknown).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn terminal_states_reject_second_settlement() {
    let h = harness();
    h.engine.initialize_stock("sku-1", 10).await.unwrap();

    let released = h.engine.reserve("sku-1", "order-1", 2).await.unwrap();
    let released_id = released.reservation_id.to_string();
    h.engine.release(&released_id).await.unwrap();
    assert_eq!(
        h.engine.release(&released_id).await.unwrap_err().code(),
        "RESERVATION_ALREADY_RELEASED"
    );
    assert_eq!(
        h.engine.deduct(&released_id).await.unwrap_err().code(),
        "RESERVATION_ALREADY_RELEASED"
    );

    let deducted = h.engine.reserve("sku-1", "order-2", 3).await.unwrap();
    let deducted_id = deducted.reservation_id.to_string();
    h.engine.deduct(&deducted_id).await.unwrap();
    assert_eq!(
        h.engine.deduct(&deducted_id).await.unwrap_err().code(),
        "RESERVATION_ALREADY_DEDUCTED"
    );
    assert_eq!(
        h.engine.release(&deducted_id).await.unwrap_err().code(),
        "RESERVATION_ALREADY_DEDUCTED"
    );

    assert_eq!(stock_pair(&h, "sku-1").await, (7, 0));
}

#[tokio::test]
async fn corrupted_reserved_quantity_aborts_and_rolls_back() {
    let h = harness();
    h.engine.initialize_stock("sku-1", 10).await.unwrap();
    let reservation = h.engine.reserve("sku-1", "order-1", 4).await.unwrap();
    let id = reservation.reservation_id.to_string();

    h.ledger.overwrite_stock("sku-1", 6, 1).await;

    let err = h.engine.release(&id).await.unwrap_err();
    assert!(matches!(
        err,
        InventoryError::InvalidStockState { reserved: 1, quantity: 4, .. }
    ));
    assert_eq!(err.kind(), ErrorKind::Consistency);
    let err = h.engine.deduct(&id).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_STOCK_STATE");

    assert_eq!(stock_pair(&h, "sku-1").await, (6, 1));
    let stored = h.ledger.get_reservation(reservation.reservation_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ReservationStatus::Reserved);
}

#[tokio::test]
async fn cache_tracks_active_reservations_only() {
    let h = harness();
    h.engine.initialize_stock("sku-1", 10).await.unwrap();

    let reservation = h.engine.reserve("sku-1", "order-1", 2).await.unwrap();
    assert!(h.cache.contains(reservation.reservation_id));

    h.engine
        .deduct(&reservation.reservation_id.to_string())
        .await
        .unwrap();
    assert!(!h.cache.contains(reservation.reservation_id));

    let fetched = h
        .engine
        .get_reservation(&reservation.reservation_id.to_string())
        .await
        .unwrap();
    assert_eq!(fetched.status, ReservationStatus::Deducted);
}

#[tokio::test]
async fn get_reservation_falls_back_to_cache_when_store_is_down() {
    let h = harness();
    h.engine.initialize_stock("sku-1", 10).await.unwrap();
    let reservation = h.engine.reserve("sku-1", "order-1", 2).await.unwrap();

    h.ledger.set_unavailable(true);
    let fetched = h
        .engine
        .get_reservation(&reservation.reservation_id.to_string())
        .await
        .unwrap();
    assert_eq!(fetched, reservation);

    let err = h
        .engine
        .get_reservation(&uuid::Uuid::new_v4().to_string())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "STORE_UNAVAILABLE");
}

#[tokio::test]
async fn leftover_cache_entry_does_not_hide_settlement() {
    let h = harness();
    h.engine.initialize_stock("sku-1", 10).await.unwrap();
    let reservation = h.engine.reserve("sku-1", "order-1", 2).await.unwrap();
    let id = reservation.reservation_id.to_string();

    h.cache.set_failing(true);
    h.engine.release(&id).await.unwrap();
    h.cache.set_failing(false);
    assert!(h.cache.contains(reservation.reservation_id));

    let fetched = h.engine.get_reservation(&id).await.unwrap();
    assert_eq!(fetched.status, ReservationStatus::Released);
}

#[tokio::test]
async fn failing_cache_never_fails_operations() {
    let h = harness();
    h.cache.set_failing(true);
    h.engine.initialize_stock("sku-1", 10).await.unwrap();

    let first = h.engine.reserve("sku-1", "order-1", 4).await.unwrap();
    let second = h.engine.reserve("sku-1", "order-2", 3).await.unwrap();
    h.engine.release(&first.reservation_id.to_string()).await.unwrap();
    h.engine.deduct(&second.reservation_id.to_string()).await.unwrap();

    let fetched = h
        .engine
        .get_reservation(&first.reservation_id.to_string())
        .await
        .unwrap();
    assert_eq!(fetched.status, ReservationStatus::Released);
    assert_eq!(stock_pair(&h, "sku-1").await, (7, 0));
}

#[tokio::test]
async fn health_check_covers_store_and_cache() {
    let h = harness();
    h.engine.health_check().await.unwrap();

    h.cache.set_failing(true);
    let err = h.engine.health_check().await.unwrap_err();
    assert_eq!(err.code(), "UNHEALTHY");
    h.cache.set_failing(false);

    h.ledger.set_unavailable(true);
    let err = h.engine.health_check().await.unwrap_err();
    assert!(err.to_string().contains("database"));
}

#[tokio::test]
async fn unreachable_store_is_infrastructure_failure() {
    let h = harness();
    h.engine.initialize_stock("sku-1", 10).await.unwrap();
    h.ledger.set_unavailable(true);

    let err = h.engine.reserve("sku-1", "order-1", 1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Infrastructure);
    assert_eq!(err.code(), "STORE_UNAVAILABLE");
}

#[tokio::test]
async fn blocked_unit_of_work_times_out_without_side_effects() {
    let h = harness_with(EngineConfig {
        operation_timeout: Duration::from_millis(50),
        ..EngineConfig::default()
    });
    h.engine.initialize_stock("sku-1", 10).await.unwrap();

    let held = h.ledger.begin().await.unwrap();
    let err = h.engine.reserve("sku-1", "order-1", 1).await.unwrap_err();
    assert!(matches!(err, InventoryError::Timeout(_)));
    drop(held);

    assert_eq!(stock_pair(&h, "sku-1").await, (10, 0));
    assert!(h.ledger.reservations_for("sku-1").await.is_empty());
}

#[tokio::test]
async fn reservation_expiry_follows_ttl() {
    let h = harness_with(EngineConfig {
        reservation_ttl: chrono::Duration::seconds(90),
        ..EngineConfig::default()
    });
    h.engine.initialize_stock("sku-1", 10).await.unwrap();

    let before = chrono::Utc::now();
    let reservation = h.engine.reserve("sku-1", "order-1", 1).await.unwrap();
    let ttl = reservation.expires_at - before;

    assert!(ttl >= chrono::Duration::seconds(89));
    assert!(ttl <= chrono::Duration::seconds(91));
}
