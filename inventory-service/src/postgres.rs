use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::{Connection, PgConnection};
use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AnsiTransactionManager, AsyncPgConnection, RunQueryDsl, TransactionManager};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use shared::{Reservation, ReservationStatus, Stock};
use tracing::info;
use uuid::Uuid;

use crate::models::*;
use crate::schema::*;
use crate::store::{LedgerStore, LedgerTx, StoreError};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

type DbPool = Pool<AsyncPgConnection>;
type PooledConn = bb8::PooledConnection<'static, AsyncDieselConnectionManager<AsyncPgConnection>>;

/// Applies pending migrations over a short-lived synchronous connection.
pub fn run_migrations(database_url: &str) -> anyhow::Result<()> {
    info!("Running database migrations...");
    let mut conn = PgConnection::establish(database_url)?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    info!("Migrations completed successfully");
    Ok(())
}

#[derive(Clone)]
pub struct PgLedger {
    pool: DbPool,
}

impl PgLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_size: u32) -> Result<Self, StoreError> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(max_size)
            .build(config)
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?;
        Ok(Self { pool })
    }
}

/// One pooled connection with an open transaction.
///
/// Dropped while the transaction is still open, the connection reports itself
/// broken to the pool, which closes it; the server then aborts the transaction
/// and releases its row locks.
pub struct PgUnitOfWork {
    conn: PooledConn,
}

#[async_trait]
impl LedgerStore for PgLedger {
    type Tx = PgUnitOfWork;

    async fn begin(&self) -> Result<PgUnitOfWork, StoreError> {
        let mut conn = self
            .pool
            .get_owned()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?;
        AnsiTransactionManager::begin_transaction(&mut *conn).await?;
        Ok(PgUnitOfWork { conn })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
        diesel::sql_query("SELECT 1").execute(&mut conn).await?;
        Ok(())
    }

    async fn init_stock_if_absent(&self, product_id: &str, quantity: i32) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
        let new_stock = NewStock {
            product_id,
            available_quantity: quantity,
            reserved_quantity: 0,
        };

        diesel::insert_into(inventory_stock::table)
            .values(&new_stock)
            .on_conflict(inventory_stock::product_id)
            .do_nothing()
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn get_stock(&self, product_id: &str) -> Result<Option<Stock>, StoreError> {
        let mut conn = self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
        let row = inventory_stock::table
            .find(product_id)
            .select(StockRow::as_select())
            .first::<StockRow>(&mut conn)
            .await
            .optional()?;
        Ok(row.map(Stock::from))
    }

    async fn get_reservation(&self, reservation_id: Uuid) -> Result<Option<Reservation>, StoreError> {
        let mut conn = self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
        let row = inventory_reservations::table
            .find(reservation_id)
            .select(ReservationRow::as_select())
            .first::<ReservationRow>(&mut conn)
            .await
            .optional()?;
        Ok(row.map(Reservation::try_from).transpose()?)
    }

    async fn expired_reservation_ids(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, StoreError> {
        let mut conn = self.pool.get().await.map_err(|e| StoreError::Pool(e.to_string()))?;
        let ids = inventory_reservations::table
            .filter(inventory_reservations::status.eq(ReservationStatus::Reserved.as_str()))
            .filter(inventory_reservations::expires_at.le(now))
            .order(inventory_reservations::expires_at.asc())
            .limit(limit)
            .select(inventory_reservations::reservation_id)
            .load::<Uuid>(&mut conn)
            .await?;
        Ok(ids)
    }
}

#[async_trait]
impl LedgerTx for PgUnitOfWork {
    async fn stock_for_update(&mut self, product_id: &str) -> Result<Option<Stock>, StoreError> {
        let row = inventory_stock::table
            .find(product_id)
            .select(StockRow::as_select())
            .for_update()
            .first::<StockRow>(&mut *self.conn)
            .await
            .optional()?;
        Ok(row.map(Stock::from))
    }

    async fn update_stock(
        &mut self,
        product_id: &str,
        available_quantity: i32,
        reserved_quantity: i32,
    ) -> Result<Stock, StoreError> {
        let row = diesel::update(inventory_stock::table.find(product_id))
            .set((
                inventory_stock::available_quantity.eq(available_quantity),
                inventory_stock::reserved_quantity.eq(reserved_quantity),
                inventory_stock::updated_at.eq(Utc::now()),
            ))
            .returning(StockRow::as_returning())
            .get_result::<StockRow>(&mut *self.conn)
            .await
            .optional()?;

        row.map(Stock::from).ok_or(StoreError::NotFound)
    }

    async fn insert_reservation(&mut self, reservation: NewReservation) -> Result<Reservation, StoreError> {
        let row = ReservationRow::from(&reservation.into_reservation(Utc::now()));

        let inserted = diesel::insert_into(inventory_reservations::table)
            .values(&row)
            .returning(ReservationRow::as_returning())
            .get_result::<ReservationRow>(&mut *self.conn)
            .await?;

        Ok(Reservation::try_from(inserted)?)
    }

    async fn reservation_for_update(
        &mut self,
        reservation_id: Uuid,
    ) -> Result<Option<Reservation>, StoreError> {
        let row = inventory_reservations::table
            .find(reservation_id)
            .select(ReservationRow::as_select())
            .for_update()
            .first::<ReservationRow>(&mut *self.conn)
            .await
            .optional()?;
        Ok(row.map(Reservation::try_from).transpose()?)
    }

    async fn update_reservation_status(
        &mut self,
        reservation_id: Uuid,
        status: ReservationStatus,
    ) -> Result<(), StoreError> {
        let updated = diesel::update(inventory_reservations::table.find(reservation_id))
            .set(inventory_reservations::status.eq(status.as_str()))
            .execute(&mut *self.conn)
            .await?;

        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        AnsiTransactionManager::commit_transaction(&mut *self.conn).await?;
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        AnsiTransactionManager::rollback_transaction(&mut *self.conn).await?;
        Ok(())
    }
}
