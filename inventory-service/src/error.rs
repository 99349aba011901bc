use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, InventoryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before touching the store.
    Validation,
    NotFound,
    /// Business rule rejection; nothing was mutated.
    Conflict,
    /// Stored quantities contradict each other.
    Consistency,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("{0}")]
    InvalidProductId(&'static str),

    #[error("{0}")]
    InvalidOrderId(&'static str),

    #[error("{0}")]
    InvalidReservationId(String),

    #[error("{0}")]
    InvalidQuantity(String),

    #[error("inventory record not found for product {0}")]
    ProductNotFound(String),

    #[error("reservation {0} not found")]
    ReservationNotFound(Uuid),

    #[error("not enough available stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: String,
        requested: i32,
        available: i32,
    },

    #[error("reservation {0} already released")]
    AlreadyReleased(Uuid),

    #[error("reservation {0} already deducted")]
    AlreadyDeducted(Uuid),

    #[error("reserved stock for product {product_id} is {reserved}, less than reservation quantity {quantity}")]
    InvalidStockState {
        product_id: String,
        reserved: i32,
        quantity: i32,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Unhealthy(String),
}

impl InventoryError {
    pub fn code(&self) -> &'static str {
        match self {
            InventoryError::InvalidProductId(_) => "INVALID_PRODUCT_ID",
            InventoryError::InvalidOrderId(_) => "INVALID_ORDER_ID",
            InventoryError::InvalidReservationId(_) => "INVALID_RESERVATION_ID",
            InventoryError::InvalidQuantity(_) => "INVALID_QUANTITY",
            InventoryError::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            InventoryError::ReservationNotFound(_) => "RESERVATION_NOT_FOUND",
            InventoryError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            InventoryError::AlreadyReleased(_) => "RESERVATION_ALREADY_RELEASED",
            InventoryError::AlreadyDeducted(_) => "RESERVATION_ALREADY_DEDUCTED",
            InventoryError::InvalidStockState { .. } => "INVALID_STOCK_STATE",
            InventoryError::Store(_) => "STORE_UNAVAILABLE",
            InventoryError::Timeout(_) => "TIMEOUT",
            InventoryError::Unhealthy(_) => "UNHEALTHY",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            InventoryError::InvalidProductId(_)
            | InventoryError::InvalidOrderId(_)
            | InventoryError::InvalidReservationId(_)
            | InventoryError::InvalidQuantity(_) => ErrorKind::Validation,
            InventoryError::ProductNotFound(_) | InventoryError::ReservationNotFound(_) => {
                ErrorKind::NotFound
            }
            InventoryError::InsufficientStock { .. }
            | InventoryError::AlreadyReleased(_)
            | InventoryError::AlreadyDeducted(_) => ErrorKind::Conflict,
            InventoryError::InvalidStockState { .. } => ErrorKind::Consistency,
            InventoryError::Store(_) | InventoryError::Timeout(_) | InventoryError::Unhealthy(_) => {
                ErrorKind::Infrastructure
            }
        }
    }

    /// True for the two outcomes that mean "someone already settled this".
    pub fn is_already_terminal(&self) -> bool {
        matches!(
            self,
            InventoryError::AlreadyReleased(_) | InventoryError::AlreadyDeducted(_)
        )
    }
}
