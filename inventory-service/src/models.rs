use diesel::prelude::*;
use uuid::Uuid;
use chrono::{DateTime, Utc};
use shared::*;

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = crate::schema::inventory_stock)]
#[diesel(primary_key(product_id))]
pub struct StockRow {
    pub product_id: String,
    pub available_quantity: i32,
    pub reserved_quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::inventory_stock)]
pub struct NewStock<'a> {
    pub product_id: &'a str,
    pub available_quantity: i32,
    pub reserved_quantity: i32,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::inventory_reservations)]
pub struct ReservationRow {
    pub reservation_id: Uuid,
    pub product_id: String,
    pub order_id: String,
    pub quantity: i32,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A reservation as the engine hands it to the store, before it has a row.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub reservation_id: Uuid,
    pub product_id: String,
    pub order_id: String,
    pub quantity: i32,
    pub expires_at: DateTime<Utc>,
}

impl NewReservation {
    pub fn into_reservation(self, created_at: DateTime<Utc>) -> Reservation {
        Reservation {
            reservation_id: self.reservation_id,
            product_id: self.product_id,
            order_id: self.order_id,
            quantity: self.quantity,
            status: ReservationStatus::Reserved,
            expires_at: self.expires_at,
            created_at,
        }
    }
}

impl From<StockRow> for Stock {
    fn from(row: StockRow) -> Self {
        Self {
            product_id: row.product_id,
            available_quantity: row.available_quantity,
            reserved_quantity: row.reserved_quantity,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = UnknownStatus;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            reservation_id: row.reservation_id,
            product_id: row.product_id,
            order_id: row.order_id,
            quantity: row.quantity,
            status: row.status.parse()?,
            expires_at: row.expires_at,
            created_at: row.created_at,
        })
    }
}

impl From<&Reservation> for ReservationRow {
    fn from(reservation: &Reservation) -> Self {
        Self {
            reservation_id: reservation.reservation_id,
            product_id: reservation.product_id.clone(),
            order_id: reservation.order_id.clone(),
            quantity: reservation.quantity,
            status: reservation.status.as_str().to_string(),
            expires_at: reservation.expires_at,
            created_at: reservation.created_at,
        }
    }
}
