//! Ledger store boundary. A unit of work dropped without commit leaves no trace.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{Reservation, ReservationStatus, Stock, UnknownStatus};
use thiserror::Error;
use uuid::Uuid;

use crate::models::NewReservation;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A write matched no row.
    #[error("row not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("corrupt row: {0}")]
    Corrupt(#[from] UnknownStatus),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<diesel::result::Error> for StoreError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => StoreError::NotFound,
            other => StoreError::Database(other),
        }
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Tx: LedgerTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Creates the stock row with nothing reserved unless one already exists.
    async fn init_stock_if_absent(&self, product_id: &str, quantity: i32) -> Result<(), StoreError>;

    async fn get_stock(&self, product_id: &str) -> Result<Option<Stock>, StoreError>;

    async fn get_reservation(&self, reservation_id: Uuid) -> Result<Option<Reservation>, StoreError>;

    /// RESERVED reservations with `expires_at <= now`, soonest-expiring first.
    async fn expired_reservation_ids(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, StoreError>;
}

#[async_trait]
pub trait LedgerTx: Send + Sized {
    async fn stock_for_update(&mut self, product_id: &str) -> Result<Option<Stock>, StoreError>;

    async fn update_stock(
        &mut self,
        product_id: &str,
        available_quantity: i32,
        reserved_quantity: i32,
    ) -> Result<Stock, StoreError>;

    async fn insert_reservation(&mut self, reservation: NewReservation) -> Result<Reservation, StoreError>;

    async fn reservation_for_update(
        &mut self,
        reservation_id: Uuid,
    ) -> Result<Option<Reservation>, StoreError>;

    async fn update_reservation_status(
        &mut self,
        reservation_id: Uuid,
        status: ReservationStatus,
    ) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}
