use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool, Postgres, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Availability, Bundle, BundleId, BundleItem, Reservation, ReservationId, ReservationQuery,
    ReservationStatus, Result, SessionId, StockDecrement, StockLevel, StockTarget, StoreError,
    TenantId,
    store::{StockStore, StockTransaction, validate_reservation_for_insert},
};

const RESERVATION_COLUMNS: &str = "id, tenant_id, product_id, variant_id, quantity, session_id, \
     status, expires_at, created_at, completed_at, cancelled_at";

/// PostgreSQL-backed stock store implementation.
#[derive(Clone)]
pub struct PostgresStockStore {
    pool: PgPool,
}

impl PostgresStockStore {
    /// Creates a new PostgreSQL stock store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_reservation(row: PgRow) -> Result<Reservation> {
        let product_id: String = row.try_get("product_id")?;
        let variant_id: Option<String> = row.try_get("variant_id")?;
        let target = match variant_id {
            Some(variant_id) => StockTarget::variant(product_id, variant_id),
            None => StockTarget::product(product_id),
        };

        let quantity: i64 = row.try_get("quantity")?;
        let quantity = u32::try_from(quantity).map_err(|_| {
            StoreError::InvalidRecord(format!("Reservation quantity out of range: {quantity}"))
        })?;

        let status: String = row.try_get("status")?;
        let status: ReservationStatus = status
            .parse()
            .map_err(|e: crate::UnknownStatus| StoreError::InvalidRecord(e.to_string()))?;

        Ok(Reservation {
            id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
            tenant_id: TenantId::from_uuid(row.try_get::<Uuid, _>("tenant_id")?),
            target,
            quantity,
            session_id: SessionId::new(row.try_get::<String, _>("session_id")?),
            status,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
            cancelled_at: row.try_get("cancelled_at")?,
        })
    }
}

/// Reads a ledger entry through any executor (pool or open transaction).
async fn fetch_level<'e, E>(
    executor: E,
    tenant_id: TenantId,
    target: &StockTarget,
) -> Result<Option<StockLevel>>
where
    E: PgExecutor<'e>,
{
    let row: Option<PgRow> = match target {
        StockTarget::Product { product_id } => {
            sqlx::query(
                r#"
                SELECT available_units, TRUE AS is_available
                FROM products
                WHERE tenant_id = $1 AND id = $2
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(product_id.as_str())
            .fetch_optional(executor)
            .await?
        }
        StockTarget::Variant {
            product_id,
            variant_id,
        } => {
            sqlx::query(
                r#"
                SELECT available_units, is_available
                FROM product_variants
                WHERE tenant_id = $1 AND product_id = $2 AND id = $3
                "#,
            )
            .bind(tenant_id.as_uuid())
            .bind(product_id.as_str())
            .bind(variant_id.as_str())
            .fetch_optional(executor)
            .await?
        }
    };

    match row {
        Some(row) => Ok(Some(StockLevel {
            availability: Availability::from_column(row.try_get("available_units")?),
            is_available: row.try_get("is_available")?,
        })),
        None => Ok(None),
    }
}

#[async_trait]
impl StockStore for PostgresStockStore {
    async fn begin(&self) -> Result<Box<dyn StockTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresStockTransaction { tx }))
    }

    async fn stock_level(
        &self,
        tenant_id: TenantId,
        target: &StockTarget,
    ) -> Result<Option<StockLevel>> {
        fetch_level(&self.pool, tenant_id, target).await
    }

    async fn bundle(&self, tenant_id: TenantId, bundle_id: &BundleId) -> Result<Option<Bundle>> {
        let exists: Option<String> =
            sqlx::query_scalar("SELECT id FROM bundles WHERE tenant_id = $1 AND id = $2")
                .bind(tenant_id.as_uuid())
                .bind(bundle_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let rows = sqlx::query(
            r#"
            SELECT product_id, units_per_bundle
            FROM bundle_items
            WHERE tenant_id = $1 AND bundle_id = $2
            ORDER BY product_id ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(bundle_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .into_iter()
            .map(|row| -> Result<BundleItem> {
                let units: i32 = row.try_get("units_per_bundle")?;
                let units = u32::try_from(units).map_err(|_| {
                    StoreError::InvalidRecord(format!("Bundle units out of range: {units}"))
                })?;
                Ok(BundleItem::new(row.try_get::<String, _>("product_id")?, units))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(Bundle::new(tenant_id, bundle_id.clone(), items)))
    }

    async fn get_reservation(
        &self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>> {
        let sql =
            format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1 AND tenant_id = $2");
        let row = sqlx::query(&sql)
            .bind(reservation_id.as_uuid())
            .bind(tenant_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_reservation).transpose()
    }

    async fn query_reservations(&self, query: ReservationQuery) -> Result<Vec<Reservation>> {
        let mut sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if query.tenant_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND tenant_id = ${param_count}"));
        }
        if query.session_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND session_id = ${param_count}"));
        }
        if query.status.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ${param_count}"));
        }
        if query.product_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND product_id = ${param_count}"));
        }
        if query.expires_before.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND expires_at < ${param_count}"));
        }

        sql.push_str(" ORDER BY expires_at ASC, created_at ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(tenant_id) = query.tenant_id {
            sqlx_query = sqlx_query.bind(tenant_id.as_uuid());
        }
        if let Some(session_id) = query.session_id {
            sqlx_query = sqlx_query.bind(session_id.as_str().to_string());
        }
        if let Some(status) = query.status {
            sqlx_query = sqlx_query.bind(status.as_str());
        }
        if let Some(product_id) = query.product_id {
            sqlx_query = sqlx_query.bind(product_id.as_str().to_string());
        }
        if let Some(before) = query.expires_before {
            sqlx_query = sqlx_query.bind(before);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        // A corrupt row is logged and left out so it cannot hide the rest of the page.
        let rows = sqlx_query.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.try_get::<Uuid, _>("id").ok();
                match Self::row_to_reservation(row) {
                    Ok(reservation) => Some(reservation),
                    Err(e) => {
                        tracing::warn!(
                            reservation_id = ?id,
                            error = %e,
                            "skipping undecodable reservation row"
                        );
                        None
                    }
                }
            })
            .collect())
    }
}

/// Unit of work over one PostgreSQL transaction.
///
/// Dropping it without committing rolls the transaction back.
pub struct PostgresStockTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl StockTransaction for PostgresStockTransaction {
    async fn decrement_stock(
        &mut self,
        tenant_id: TenantId,
        target: &StockTarget,
        quantity: u32,
    ) -> Result<StockDecrement> {
        // NULL available_units never satisfies the predicate, so untracked
        // rows are left alone here and classified below.
        let remaining: Option<i64> = match target {
            StockTarget::Product { product_id } => {
                sqlx::query_scalar(
                    r#"
                    UPDATE products
                    SET available_units = available_units - $3
                    WHERE tenant_id = $1 AND id = $2 AND available_units >= $3
                    RETURNING available_units
                    "#,
                )
                .bind(tenant_id.as_uuid())
                .bind(product_id.as_str())
                .bind(i64::from(quantity))
                .fetch_optional(&mut *self.tx)
                .await?
            }
            StockTarget::Variant {
                product_id,
                variant_id,
            } => {
                sqlx::query_scalar(
                    r#"
                    UPDATE product_variants
                    SET available_units = available_units - $4
                    WHERE tenant_id = $1 AND product_id = $2 AND id = $3
                      AND is_available AND available_units >= $4
                    RETURNING available_units
                    "#,
                )
                .bind(tenant_id.as_uuid())
                .bind(product_id.as_str())
                .bind(variant_id.as_str())
                .bind(i64::from(quantity))
                .fetch_optional(&mut *self.tx)
                .await?
            }
        };

        if let Some(remaining) = remaining {
            return Ok(StockDecrement::Applied { remaining });
        }

        let outcome = match fetch_level(&mut *self.tx, tenant_id, target).await? {
            None => StockDecrement::Missing,
            Some(level) if !level.is_reservable() => StockDecrement::Missing,
            Some(level) => match level.availability {
                Availability::Unlimited => StockDecrement::Untracked,
                Availability::Units(available) => StockDecrement::Insufficient { available },
            },
        };
        tracing::debug!(%tenant_id, %target, quantity, ?outcome, "conditional decrement matched no row");
        Ok(outcome)
    }

    async fn increment_stock(
        &mut self,
        tenant_id: TenantId,
        target: &StockTarget,
        quantity: u32,
    ) -> Result<bool> {
        let result = match target {
            StockTarget::Product { product_id } => {
                sqlx::query(
                    r#"
                    UPDATE products
                    SET available_units = available_units + $3
                    WHERE tenant_id = $1 AND id = $2 AND available_units IS NOT NULL
                    "#,
                )
                .bind(tenant_id.as_uuid())
                .bind(product_id.as_str())
                .bind(i64::from(quantity))
                .execute(&mut *self.tx)
                .await?
            }
            StockTarget::Variant {
                product_id,
                variant_id,
            } => {
                sqlx::query(
                    r#"
                    UPDATE product_variants
                    SET available_units = available_units + $4
                    WHERE tenant_id = $1 AND product_id = $2 AND id = $3
                      AND available_units IS NOT NULL
                    "#,
                )
                .bind(tenant_id.as_uuid())
                .bind(product_id.as_str())
                .bind(variant_id.as_str())
                .bind(i64::from(quantity))
                .execute(&mut *self.tx)
                .await?
            }
        };

        Ok(result.rows_affected() > 0)
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<()> {
        validate_reservation_for_insert(reservation)?;

        sqlx::query(
            r#"
            INSERT INTO reservations
                (id, tenant_id, product_id, variant_id, quantity, session_id, status, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.tenant_id.as_uuid())
        .bind(reservation.target.product_id().as_str())
        .bind(reservation.target.variant_id().map(|v| v.as_str()))
        .bind(i64::from(reservation.quantity))
        .bind(reservation.session_id.as_str())
        .bind(reservation.status.as_str())
        .bind(reservation.expires_at)
        .bind(reservation.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn transition_reservation(
        &mut self,
        tenant_id: TenantId,
        reservation_id: ReservationId,
        next: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Reservation>> {
        if !ReservationStatus::Active.can_transition_to(next) {
            return Ok(None);
        }

        let sql = format!(
            r#"
            UPDATE reservations
            SET status = $3,
                completed_at = CASE WHEN $3 = 'completed' THEN $4 ELSE completed_at END,
                cancelled_at = CASE WHEN $3 = 'cancelled' THEN $4 ELSE cancelled_at END
            WHERE id = $1 AND tenant_id = $2 AND status = 'active'
            RETURNING {RESERVATION_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(reservation_id.as_uuid())
            .bind(tenant_id.as_uuid())
            .bind(next.as_str())
            .bind(at)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.map(PostgresStockStore::row_to_reservation).transpose()
    }

    async fn transition_session(
        &mut self,
        tenant_id: TenantId,
        session_id: &SessionId,
        next: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<Vec<Reservation>> {
        if !ReservationStatus::Active.can_transition_to(next) {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            WITH locked AS (
                SELECT id AS locked_id
                FROM reservations
                WHERE tenant_id = $1 AND session_id = $2 AND status = 'active'
                ORDER BY id
                FOR UPDATE
            )
            UPDATE reservations
            SET status = $3,
                completed_at = CASE WHEN $3 = 'completed' THEN $4 ELSE completed_at END,
                cancelled_at = CASE WHEN $3 = 'cancelled' THEN $4 ELSE cancelled_at END
            FROM locked
            WHERE id = locked.locked_id AND status = 'active'
            RETURNING {RESERVATION_COLUMNS}
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(tenant_id.as_uuid())
            .bind(session_id.as_str())
            .bind(next.as_str())
            .bind(at)
            .fetch_all(&mut *self.tx)
            .await?;

        let mut reservations = rows
            .into_iter()
            .map(PostgresStockStore::row_to_reservation)
            .collect::<Result<Vec<_>>>()?;
        reservations.sort_by_key(|r| r.created_at);
        Ok(reservations)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.tx.rollback().await?;
        Ok(())
    }
}
