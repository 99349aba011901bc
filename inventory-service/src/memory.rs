//! In-process ledger for tests. A unit of work locks the whole ledger.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{Reservation, ReservationStatus, Stock};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::models::NewReservation;
use crate::store::{LedgerStore, LedgerTx, StoreError};

#[derive(Debug, Clone, Default)]
struct LedgerState {
    stock: HashMap<String, Stock>,
    reservations: HashMap<Uuid, Reservation>,
}

#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail as if the database were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Overwrites a stock row without any of the engine's checks.
    pub async fn overwrite_stock(&self, product_id: &str, available_quantity: i32, reserved_quantity: i32) {
        let mut state = self.state.lock().await;
        if let Some(stock) = state.stock.get_mut(product_id) {
            stock.available_quantity = available_quantity;
            stock.reserved_quantity = reserved_quantity;
            stock.updated_at = Utc::now();
        }
    }

    /// Moves a reservation's deadline, e.g. into the past.
    pub async fn set_expires_at(&self, reservation_id: Uuid, expires_at: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        if let Some(reservation) = state.reservations.get_mut(&reservation_id) {
            reservation.expires_at = expires_at;
        }
    }

    pub async fn reservations_for(&self, product_id: &str) -> Vec<Reservation> {
        let state = self.state.lock().await;
        state
            .reservations
            .values()
            .filter(|r| r.product_id == product_id)
            .cloned()
            .collect()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory ledger marked unavailable".to_string()));
        }
        Ok(())
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<LedgerState>,
    staged: LedgerState,
    unavailable: Arc<AtomicBool>,
}

impl MemoryUnitOfWork {
    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory ledger marked unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    type Tx = MemoryUnitOfWork;

    async fn begin(&self) -> Result<MemoryUnitOfWork, StoreError> {
        self.check_available()?;
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(MemoryUnitOfWork {
            guard,
            staged,
            unavailable: Arc::clone(&self.unavailable),
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }

    async fn init_stock_if_absent(&self, product_id: &str, quantity: i32) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let now = Utc::now();
        state.stock.entry(product_id.to_string()).or_insert_with(|| Stock {
            product_id: product_id.to_string(),
            available_quantity: quantity,
            reserved_quantity: 0,
            created_at: now,
            updated_at: now,
        });
        Ok(())
    }

    async fn get_stock(&self, product_id: &str) -> Result<Option<Stock>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.stock.get(product_id).cloned())
    }

    async fn get_reservation(&self, reservation_id: Uuid) -> Result<Option<Reservation>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.reservations.get(&reservation_id).cloned())
    }

    async fn expired_reservation_ids(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut expired: Vec<&Reservation> = state
            .reservations
            .values()
            .filter(|r| r.status == ReservationStatus::Reserved && r.expires_at <= now)
            .collect();
        expired.sort_by_key(|r| r.expires_at);

        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(expired.into_iter().take(limit).map(|r| r.reservation_id).collect())
    }
}

#[async_trait]
impl LedgerTx for MemoryUnitOfWork {
    async fn stock_for_update(&mut self, product_id: &str) -> Result<Option<Stock>, StoreError> {
        self.check_available()?;
        Ok(self.staged.stock.get(product_id).cloned())
    }

    async fn update_stock(
        &mut self,
        product_id: &str,
        available_quantity: i32,
        reserved_quantity: i32,
    ) -> Result<Stock, StoreError> {
        self.check_available()?;
        let stock = self.staged.stock.get_mut(product_id).ok_or(StoreError::NotFound)?;
        stock.available_quantity = available_quantity;
        stock.reserved_quantity = reserved_quantity;
        stock.updated_at = Utc::now();
        Ok(stock.clone())
    }

    async fn insert_reservation(&mut self, reservation: NewReservation) -> Result<Reservation, StoreError> {
        self.check_available()?;
        if !self.staged.stock.contains_key(&reservation.product_id) {
            return Err(StoreError::NotFound);
        }
        let reservation = reservation.into_reservation(Utc::now());
        self.staged
            .reservations
            .insert(reservation.reservation_id, reservation.clone());
        Ok(reservation)
    }

    async fn reservation_for_update(
        &mut self,
        reservation_id: Uuid,
    ) -> Result<Option<Reservation>, StoreError> {
        self.check_available()?;
        Ok(self.staged.reservations.get(&reservation_id).cloned())
    }

    async fn update_reservation_status(
        &mut self,
        reservation_id: Uuid,
        status: ReservationStatus,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let reservation = self
            .staged
            .reservations
            .get_mut(&reservation_id)
            .ok_or(StoreError::NotFound)?;
        reservation.status = status;
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.check_available()?;
        let MemoryUnitOfWork { mut guard, staged, .. } = self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}
