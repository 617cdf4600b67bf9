//! [`PostgresTicketStore`]: the production store.

use crate::error::{count_from_db, count_to_db, map_sqlx};
use crate::queries::{self, ReservationRow};
use boxoffice_core::{
    CancelOutcome, CapacityPool, CapacityStore, CatalogStore, ConsumeOutcome, HoldOutcome,
    HoldRequest, IssuanceStore, IssuanceUnit, IssuedRecord, Reservation, ReservationStatus,
    ReservationStore, ReservationTransition, ScanOutcome, ScanRecord, ScanStore, SessionId,
    StoreError, StoreFuture, StoreResult, Ticket, TicketId, TicketStatus, TicketType,
    TicketTypeId, TicketTypeStatus, TransitionOutcome,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// `PostgreSQL`-backed implementation of every store trait.
///
/// Each bounded operation is a single conditional statement or a short
/// transaction, so any number of processes may share one database.
///
/// # Example
///
/// ```no_run
/// use boxoffice_postgres::PostgresTicketStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresTicketStore::connect("postgres://localhost/boxoffice").await?;
/// store.migrate().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PostgresTicketStore {
    pool: PgPool,
}

impl PostgresTicketStore {
    /// Connect with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the database cannot be reached.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .connect(database_url)
            .await
            .map_err(map_sqlx)?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if a migration fails to apply.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))?;
        tracing::info!("Inventory schema migrations applied");
        Ok(())
    }

    async fn hold_inner(&self, request: &HoldRequest) -> StoreResult<HoldOutcome> {
        if let Some(existing) = self.reservation(&request.session_id).await? {
            return Ok(closed_or_existing(existing));
        }

        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let held: Option<(i64,)> = sqlx::query_as(
            r"
            UPDATE ticket_types
            SET held_count = held_count + $2,
                updated_at = now()
            WHERE id = $1
              AND status = 'available'
              AND held_count + sold_count + $2 <= max_quantity
            RETURNING held_count
            ",
        )
        .bind(request.ticket_type_id.as_str())
        .bind(count_to_db(request.quantity))
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        if held.is_none() {
            let ticket_type = queries::load_ticket_type(&mut tx, &request.ticket_type_id).await?;
            tx.rollback().await.map_err(map_sqlx)?;
            return Ok(match ticket_type {
                None => HoldOutcome::UnknownTicketType,
                Some(t) if t.status != TicketTypeStatus::Available => HoldOutcome::NotOnSale(t.status),
                Some(t) => HoldOutcome::CapacityExceeded {
                    requested: request.quantity,
                    holdable: t.holdable(),
                },
            });
        }

        let inserted: Option<ReservationRow> = sqlx::query_as(
            r"
            INSERT INTO ticket_reservations
                (session_id, ticket_type_id, quantity, status, created_at, expires_at)
            VALUES ($1, $2, $3, 'active', $4, $5)
            ON CONFLICT (session_id) DO NOTHING
            RETURNING session_id, ticket_type_id, quantity, status, created_at, expires_at,
                      transaction_id
            ",
        )
        .bind(request.session_id.as_str())
        .bind(request.ticket_type_id.as_str())
        .bind(count_to_db(request.quantity))
        .bind(request.created_at)
        .bind(request.expires_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let Some(row) = inserted else {
            // A concurrent hold for the same session committed first.
            tx.rollback().await.map_err(map_sqlx)?;
            return match self.reservation(&request.session_id).await? {
                Some(existing) => Ok(closed_or_existing(existing)),
                None => Err(StoreError::Conflict(format!(
                    "concurrent hold for session {} did not persist",
                    request.session_id
                ))),
            };
        };

        tx.commit().await.map_err(map_sqlx)?;
        Ok(HoldOutcome::Created(queries::reservation_from_row(row)?))
    }

    async fn transition_inner(
        &self,
        session_id: &SessionId,
        transition: ReservationTransition,
    ) -> StoreResult<TransitionOutcome> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let moved: Option<ReservationRow> = sqlx::query_as(
            r"
            UPDATE ticket_reservations
            SET status = $2,
                transaction_id = COALESCE($3, transaction_id),
                updated_at = now()
            WHERE session_id = $1 AND status = 'active'
            RETURNING session_id, ticket_type_id, quantity, status, created_at, expires_at,
                      transaction_id
            ",
        )
        .bind(session_id.as_str())
        .bind(transition.target().as_str())
        .bind(transition.transaction_id().map(|id| *id.as_uuid()))
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        if let Some(row) = moved {
            let reservation = queries::reservation_from_row(row)?;
            queries::release(
                &mut tx,
                &reservation.ticket_type_id,
                CapacityPool::Held,
                reservation.quantity,
            )
            .await?;
            tx.commit().await.map_err(map_sqlx)?;
            return Ok(TransitionOutcome::Applied(reservation));
        }

        tx.rollback().await.map_err(map_sqlx)?;

        // Not active: classify against the stored terminal state.
        let Some(mut reservation) = self.reservation(session_id).await? else {
            return Ok(TransitionOutcome::NotFound);
        };
        match reservation.apply(transition) {
            TransitionOutcome::Applied(_) => Err(StoreError::Conflict(format!(
                "reservation {session_id} changed during transition"
            ))),
            outcome => Ok(outcome),
        }
    }

    async fn reservation(&self, session_id: &SessionId) -> StoreResult<Option<Reservation>> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
        queries::load_reservation(&mut conn, session_id).await
    }

    async fn cancel_inner(&self, id: TicketId) -> StoreResult<CancelOutcome> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let row: Option<queries::TicketRow> = sqlx::query_as(
            r"
            SELECT id, ticket_type_id, transaction_id, status, scan_count, max_scan_count,
                   first_scanned_at, last_scanned_at, is_test
            FROM tickets
            WHERE id = $1
            FOR UPDATE
            ",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        let Some(mut ticket) = row.map(queries::ticket_from_row).transpose()? else {
            tx.rollback().await.map_err(map_sqlx)?;
            return Ok(CancelOutcome::NotFound);
        };

        if ticket.status == TicketStatus::Cancelled {
            tx.rollback().await.map_err(map_sqlx)?;
            return Ok(CancelOutcome::AlreadyCancelled(ticket));
        }

        sqlx::query("UPDATE tickets SET status = 'cancelled' WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        let consumed_capacity = ticket.status == TicketStatus::Valid;
        if consumed_capacity {
            queries::release(&mut tx, &ticket.ticket_type_id, ticket.pool(), 1).await?;
        }
        tx.commit().await.map_err(map_sqlx)?;

        ticket.status = TicketStatus::Cancelled;
        Ok(CancelOutcome::Cancelled {
            ticket,
            released: consumed_capacity,
        })
    }

    async fn scan_inner(&self, id: TicketId, now: DateTime<Utc>) -> StoreResult<Option<ScanOutcome>> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;

        let scanned: Option<(i64, i64, Option<DateTime<Utc>>)> = sqlx::query_as(
            r"
            UPDATE tickets
            SET scan_count = scan_count + 1,
                first_scanned_at = COALESCE(first_scanned_at, $2),
                last_scanned_at = $2
            WHERE id = $1
              AND status <> 'cancelled'
              AND scan_count < max_scan_count
            RETURNING scan_count, max_scan_count, first_scanned_at
            ",
        )
        .bind(id.as_uuid())
        .bind(now)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx)?;

        if let Some((scan_count, max_scan_count, first_scanned_at)) = scanned {
            return Ok(Some(ScanOutcome::Accepted(ScanRecord {
                ticket_id: id,
                scan_count: count_from_db("scan_count", scan_count)?,
                max_scan_count: count_from_db("max_scan_count", max_scan_count)?,
                first_scanned_at: first_scanned_at.unwrap_or(now),
                last_scanned_at: now,
            })));
        }

        Ok(queries::load_ticket(&mut conn, id).await?.map(|ticket| {
            if ticket.status == TicketStatus::Cancelled {
                ScanOutcome::NotScannable {
                    status: ticket.status,
                }
            } else {
                ScanOutcome::LimitExceeded {
                    scan_count: ticket.scan_count,
                    max_scan_count: ticket.max_scan_count,
                }
            }
        }))
    }
}

fn closed_or_existing(existing: Reservation) -> HoldOutcome {
    if existing.status == ReservationStatus::Active {
        HoldOutcome::Existing(existing)
    } else {
        HoldOutcome::SessionClosed(existing)
    }
}

impl CatalogStore for PostgresTicketStore {
    fn insert_ticket_type<'a>(&'a self, ticket_type: &'a TicketType) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO ticket_types
                    (id, max_quantity, sold_count, test_sold_count, held_count, status)
                VALUES ($1, $2, $3, $4, $5, $6)
                ",
            )
            .bind(ticket_type.id.as_str())
            .bind(count_to_db(ticket_type.max_quantity))
            .bind(count_to_db(ticket_type.sold_count))
            .bind(count_to_db(ticket_type.test_sold_count))
            .bind(count_to_db(ticket_type.held_count))
            .bind(ticket_type.status.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

            tracing::info!(
                ticket_type_id = %ticket_type.id,
                max_quantity = ticket_type.max_quantity,
                status = ticket_type.status.as_str(),
                "Ticket type created"
            );
            Ok(())
        })
    }

    fn load_ticket_type<'a>(
        &'a self,
        id: &'a TicketTypeId,
    ) -> StoreFuture<'a, Option<TicketType>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
            queries::load_ticket_type(&mut conn, id).await
        })
    }

    fn set_ticket_type_status<'a>(
        &'a self,
        id: &'a TicketTypeId,
        status: TicketTypeStatus,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let result =
                sqlx::query("UPDATE ticket_types SET status = $2, updated_at = now() WHERE id = $1")
                    .bind(id.as_str())
                    .bind(status.as_str())
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx)?;

            tracing::info!(ticket_type_id = %id, status = status.as_str(), "Ticket type status updated");
            Ok(result.rows_affected() > 0)
        })
    }

    fn load_ticket(&self, id: TicketId) -> StoreFuture<'_, Option<Ticket>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
            queries::load_ticket(&mut conn, id).await
        })
    }
}

impl CapacityStore for PostgresTicketStore {
    fn try_consume<'a>(
        &'a self,
        id: &'a TicketTypeId,
        pool: CapacityPool,
        amount: u32,
    ) -> StoreFuture<'a, Option<ConsumeOutcome>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
            queries::try_consume(&mut conn, id, pool, amount).await
        })
    }

    fn release<'a>(
        &'a self,
        id: &'a TicketTypeId,
        pool: CapacityPool,
        amount: u32,
    ) -> StoreFuture<'a, Option<u32>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;
            queries::release(&mut conn, id, pool, amount).await
        })
    }
}

impl ReservationStore for PostgresTicketStore {
    fn hold<'a>(&'a self, request: &'a HoldRequest) -> StoreFuture<'a, HoldOutcome> {
        Box::pin(self.hold_inner(request))
    }

    fn load_reservation<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> StoreFuture<'a, Option<Reservation>> {
        Box::pin(self.reservation(session_id))
    }

    fn transition<'a>(
        &'a self,
        session_id: &'a SessionId,
        transition: ReservationTransition,
    ) -> StoreFuture<'a, TransitionOutcome> {
        Box::pin(self.transition_inner(session_id, transition))
    }

    fn list_expired(&self, now: DateTime<Utc>, limit: usize) -> StoreFuture<'_, Vec<SessionId>> {
        Box::pin(async move {
            let rows: Vec<(String,)> = sqlx::query_as(
                r"
                SELECT session_id
                FROM ticket_reservations
                WHERE status = 'active' AND expires_at <= $1
                ORDER BY expires_at
                LIMIT $2
                ",
            )
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;

            Ok(rows.into_iter().map(|(id,)| SessionId::new(id)).collect())
        })
    }
}

impl IssuanceStore for PostgresTicketStore {
    fn find_transaction<'a>(
        &'a self,
        session_id: &'a SessionId,
    ) -> StoreFuture<'a, Option<IssuedRecord>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(map_sqlx)?;

            let row: Option<queries::TransactionRow> = sqlx::query_as(
                r"
                SELECT id, session_id, customer_email, customer_name, amount_cents, created_at
                FROM transactions
                WHERE session_id = $1
                ",
            )
            .bind(session_id.as_str())
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_sqlx)?;

            let Some(transaction) = row.map(queries::transaction_from_row).transpose()? else {
                return Ok(None);
            };
            let tickets = queries::tickets_for_transaction(&mut conn, transaction.id).await?;
            Ok(Some(IssuedRecord {
                transaction,
                tickets,
            }))
        })
    }

    fn begin_issuance(&self) -> StoreFuture<'_, Box<dyn IssuanceUnit>> {
        Box::pin(async move {
            let tx = self.pool.begin().await.map_err(map_sqlx)?;
            let unit: Box<dyn IssuanceUnit> = Box::new(crate::issuance::PgIssuanceUnit::new(tx));
            Ok(unit)
        })
    }

    fn cancel_ticket(&self, id: TicketId) -> StoreFuture<'_, CancelOutcome> {
        Box::pin(self.cancel_inner(id))
    }
}

impl ScanStore for PostgresTicketStore {
    fn try_scan(&self, id: TicketId, now: DateTime<Utc>) -> StoreFuture<'_, Option<ScanOutcome>> {
        Box::pin(self.scan_inner(id, now))
    }
}
