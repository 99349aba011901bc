//! Reservation engine. Locks are taken reservation row first, stock row second.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use shared::{Reservation, ReservationStatus, Stock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::AdvisoryCache;
use crate::error::{ErrorKind, InventoryError, Result};
use crate::models::NewReservation;
use crate::store::{LedgerStore, LedgerTx};

pub const MAX_IDENTIFIER_LEN: usize = 128;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub reservation_ttl: chrono::Duration,
    pub operation_timeout: Duration,
    pub expiry_batch_size: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reservation_ttl: chrono::Duration::minutes(10),
            operation_timeout: Duration::from_secs(5),
            expiry_batch_size: 100,
        }
    }
}

/// Who is asking for a release.
///
/// The expiry sweeper may find a reservation that a caller released between
/// the sweeper's query and its lock; for it that is success, for a caller it
/// is a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMode {
    Caller,
    Expiry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Release(ReleaseMode),
    Deduct,
}

pub struct InventoryEngine<S: LedgerStore> {
    store: S,
    cache: AdvisoryCache,
    config: EngineConfig,
}

impl<S: LedgerStore> InventoryEngine<S> {
    pub fn new(store: S, cache: AdvisoryCache, config: EngineConfig) -> Self {
        Self { store, cache, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn initialize_stock(&self, product_id: &str, quantity: i32) -> Result<Stock> {
        validate_product_id(product_id)?;
        if quantity < 0 {
            return Err(InventoryError::InvalidQuantity("quantity must be >= 0".to_string()));
        }

        self.bounded(self.init_and_fetch(product_id, quantity)).await
    }

    pub async fn get_stock(&self, product_id: &str) -> Result<Stock> {
        validate_product_id(product_id)?;

        self.bounded(self.fetch_stock(product_id)).await
    }

    pub async fn add_stock(&self, product_id: &str, quantity: i32) -> Result<Stock> {
        validate_product_id(product_id)?;
        validate_positive_quantity(quantity)?;

        let stock = self.bounded(self.add_stock_tx(product_id, quantity)).await?;

        info!(product_id = %product_id, quantity, "stock added");
        Ok(stock)
    }

    pub async fn reserve(&self, product_id: &str, order_id: &str, quantity: i32) -> Result<Reservation> {
        validate_product_id(product_id)?;
        validate_order_id(order_id)?;
        validate_positive_quantity(quantity)?;

        let new_reservation = NewReservation {
            reservation_id: Uuid::new_v4(),
            product_id: product_id.to_string(),
            order_id: order_id.to_string(),
            quantity,
            expires_at: Utc::now() + self.config.reservation_ttl,
        };

        let reservation = self.bounded(self.reserve_tx(new_reservation)).await?;

        info!(
            reservation_id = %reservation.reservation_id,
            product_id = %reservation.product_id,
            order_id = %reservation.order_id,
            quantity = reservation.quantity,
            "stock reserved"
        );

        let cache_ttl = self
            .config
            .reservation_ttl
            .to_std()
            .unwrap_or(Duration::from_secs(1));
        self.cache.remember(&reservation, cache_ttl).await;

        Ok(reservation)
    }

    pub async fn release(&self, reservation_id: &str) -> Result<Reservation> {
        let reservation_id = parse_reservation_id(reservation_id)?;
        self.release_with_mode(reservation_id, ReleaseMode::Caller).await
    }

    /// Release entry point that states who is calling; see [`ReleaseMode`].
    pub async fn release_with_mode(&self, reservation_id: Uuid, mode: ReleaseMode) -> Result<Reservation> {
        self.settle(reservation_id, Settlement::Release(mode)).await
    }

    pub async fn deduct(&self, reservation_id: &str) -> Result<Reservation> {
        let reservation_id = parse_reservation_id(reservation_id)?;
        self.settle(reservation_id, Settlement::Deduct).await
    }

    /// Store first. The cached snapshot is served only while the store is
    /// unreachable.
    pub async fn get_reservation(&self, reservation_id: &str) -> Result<Reservation> {
        let reservation_id = parse_reservation_id(reservation_id)?;

        match self.bounded(self.fetch_reservation(reservation_id)).await {
            Err(err) if err.kind() == ErrorKind::Infrastructure => {
                match self.cache.lookup(reservation_id).await {
                    Some(cached) => {
                        warn!(reservation_id = %reservation_id, error = %err, "store unreachable, serving cached reservation");
                        Ok(cached)
                    }
                    None => Err(err),
                }
            }
            outcome => outcome,
        }
    }

    pub async fn expired_reservation_ids(&self) -> Result<Vec<Uuid>> {
        self.bounded(self.fetch_expired_ids()).await
    }

    pub async fn health_check(&self) -> Result<()> {
        self.bounded(self.ping_store()).await?;

        self.cache
            .ping()
            .await
            .map_err(|e| InventoryError::Unhealthy(format!("cache ping failed: {e}")))
    }

    async fn settle(&self, reservation_id: Uuid, settlement: Settlement) -> Result<Reservation> {
        if self.cache.lookup(reservation_id).await.is_some() {
            debug!(reservation_id = %reservation_id, "reservation present in cache before settling");
        }

        let reservation = self.bounded(self.settle_tx(reservation_id, settlement)).await?;

        match settlement {
            Settlement::Release(mode) => info!(
                reservation_id = %reservation_id,
                product_id = %reservation.product_id,
                ?mode,
                "reservation released"
            ),
            Settlement::Deduct => info!(
                reservation_id = %reservation_id,
                product_id = %reservation.product_id,
                "reservation deducted"
            ),
        }

        self.cache.forget(reservation_id).await;
        Ok(reservation)
    }

    async fn init_and_fetch(&self, product_id: &str, quantity: i32) -> Result<Stock> {
        self.store.init_stock_if_absent(product_id, quantity).await?;
        self.fetch_stock(product_id).await
    }

    async fn fetch_stock(&self, product_id: &str) -> Result<Stock> {
        self.store
            .get_stock(product_id)
            .await?
            .ok_or_else(|| InventoryError::ProductNotFound(product_id.to_string()))
    }

    async fn fetch_reservation(&self, reservation_id: Uuid) -> Result<Reservation> {
        self.store
            .get_reservation(reservation_id)
            .await?
            .ok_or(InventoryError::ReservationNotFound(reservation_id))
    }

    async fn fetch_expired_ids(&self) -> Result<Vec<Uuid>> {
        let ids = self
            .store
            .expired_reservation_ids(Utc::now(), self.config.expiry_batch_size)
            .await?;
        Ok(ids)
    }

    async fn ping_store(&self) -> Result<()> {
        self.store
            .ping()
            .await
            .map_err(|e| InventoryError::Unhealthy(format!("database ping failed: {e}")))
    }

    async fn add_stock_tx(&self, product_id: &str, quantity: i32) -> Result<Stock> {
        let mut tx = self.store.begin().await?;
        let outcome = add_stock_locked(&mut tx, product_id, quantity).await;
        finish(tx, outcome).await
    }

    async fn reserve_tx(&self, new_reservation: NewReservation) -> Result<Reservation> {
        let mut tx = self.store.begin().await?;
        let outcome = reserve_locked(&mut tx, new_reservation).await;
        finish(tx, outcome).await
    }

    async fn settle_tx(&self, reservation_id: Uuid, settlement: Settlement) -> Result<Reservation> {
        let mut tx = self.store.begin().await?;
        let outcome = settle_locked(&mut tx, reservation_id, settlement).await;
        finish(tx, outcome).await
    }

    /// Bounds a store interaction by the operation timeout. A unit of work
    /// still open when the deadline passes is dropped, which rolls it back.
    async fn bounded<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.operation_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(InventoryError::Timeout(self.config.operation_timeout)),
        }
    }
}

async fn add_stock_locked<T: LedgerTx>(tx: &mut T, product_id: &str, quantity: i32) -> Result<Stock> {
    let stock = tx
        .stock_for_update(product_id)
        .await?
        .ok_or_else(|| InventoryError::ProductNotFound(product_id.to_string()))?;

    if stock.on_hand() + i64::from(quantity) > i64::from(i32::MAX) {
        return Err(InventoryError::InvalidQuantity(format!(
            "adding {quantity} would overflow stock for product {product_id}"
        )));
    }

    Ok(tx
        .update_stock(
            product_id,
            stock.available_quantity + quantity,
            stock.reserved_quantity,
        )
        .await?)
}

async fn reserve_locked<T: LedgerTx>(tx: &mut T, new_reservation: NewReservation) -> Result<Reservation> {
    let stock = tx
        .stock_for_update(&new_reservation.product_id)
        .await?
        .ok_or_else(|| InventoryError::ProductNotFound(new_reservation.product_id.clone()))?;

    let quantity = new_reservation.quantity;
    if stock.available_quantity < quantity {
        return Err(InventoryError::InsufficientStock {
            product_id: stock.product_id,
            requested: quantity,
            available: stock.available_quantity,
        });
    }

    tx.update_stock(
        &stock.product_id,
        stock.available_quantity - quantity,
        stock.reserved_quantity + quantity,
    )
    .await?;

    Ok(tx.insert_reservation(new_reservation).await?)
}

async fn settle_locked<T: LedgerTx>(
    tx: &mut T,
    reservation_id: Uuid,
    settlement: Settlement,
) -> Result<Reservation> {
    let reservation = tx
        .reservation_for_update(reservation_id)
        .await?
        .ok_or(InventoryError::ReservationNotFound(reservation_id))?;

    match (reservation.status, settlement) {
        (ReservationStatus::Released, Settlement::Release(ReleaseMode::Expiry)) => {
            return Ok(reservation);
        }
        (ReservationStatus::Released, _) => {
            return Err(InventoryError::AlreadyReleased(reservation_id));
        }
        (ReservationStatus::Deducted, _) => {
            return Err(InventoryError::AlreadyDeducted(reservation_id));
        }
        (ReservationStatus::Reserved, _) => {}
    }

    let stock = tx
        .stock_for_update(&reservation.product_id)
        .await?
        .ok_or_else(|| InventoryError::ProductNotFound(reservation.product_id.clone()))?;

    if stock.reserved_quantity < reservation.quantity {
        return Err(InventoryError::InvalidStockState {
            product_id: stock.product_id,
            reserved: stock.reserved_quantity,
            quantity: reservation.quantity,
        });
    }

    let (available_quantity, status) = match settlement {
        Settlement::Release(_) => (
            stock.available_quantity + reservation.quantity,
            ReservationStatus::Released,
        ),
        Settlement::Deduct => (stock.available_quantity, ReservationStatus::Deducted),
    };

    tx.update_stock(
        &stock.product_id,
        available_quantity,
        stock.reserved_quantity - reservation.quantity,
    )
    .await?;
    tx.update_reservation_status(reservation_id, status).await?;

    Ok(Reservation { status, ..reservation })
}

/// Commits on success; on failure rolls back and returns the original error.
async fn finish<T: LedgerTx, R>(tx: T, outcome: Result<R>) -> Result<R> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

fn validate_product_id(product_id: &str) -> Result<()> {
    if product_id.trim().is_empty() {
        return Err(InventoryError::InvalidProductId("productId is required"));
    }
    if product_id.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(InventoryError::InvalidProductId("productId must be at most 128 characters"));
    }
    Ok(())
}

fn validate_order_id(order_id: &str) -> Result<()> {
    if order_id.trim().is_empty() {
        return Err(InventoryError::InvalidOrderId("orderId is required"));
    }
    if order_id.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(InventoryError::InvalidOrderId("orderId must be at most 128 characters"));
    }
    Ok(())
}

fn validate_positive_quantity(quantity: i32) -> Result<()> {
    if quantity <= 0 {
        return Err(InventoryError::InvalidQuantity("quantity must be > 0".to_string()));
    }
    Ok(())
}

fn parse_reservation_id(raw: &str) -> Result<Uuid> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(InventoryError::InvalidReservationId("reservationId is required".to_string()));
    }
    Uuid::parse_str(raw)
        .map_err(|_| InventoryError::InvalidReservationId(format!("reservationId {raw} is not a valid UUID")))
}
