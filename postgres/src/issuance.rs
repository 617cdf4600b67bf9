//! Issuance unit of work over one database transaction.

use crate::error::{count_to_db, map_sqlx};
use crate::queries;
use boxoffice_core::{
    CapacityPool, ConsumeOutcome, IssuanceUnit, StoreFuture, Ticket, TicketTypeId, Transaction,
};
use sqlx::Postgres;

/// Every write of one issuance attempt, committed together.
///
/// The transaction row is inserted first, so a concurrent attempt for the same
/// session blocks on the unique index until this unit commits or rolls back.
/// Dropping the unit rolls the transaction back.
pub(crate) struct PgIssuanceUnit {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl PgIssuanceUnit {
    pub(crate) const fn new(tx: sqlx::Transaction<'static, Postgres>) -> Self {
        Self { tx }
    }
}

impl IssuanceUnit for PgIssuanceUnit {
    fn insert_transaction<'a>(&'a mut self, transaction: &'a Transaction) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let amount_cents = queries::amount_to_db(transaction.amount)?;
            let inserted: Option<(uuid::Uuid,)> = sqlx::query_as(
                r"
                INSERT INTO transactions
                    (id, session_id, customer_email, customer_name, amount_cents, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (session_id) DO NOTHING
                RETURNING id
                ",
            )
            .bind(transaction.id.as_uuid())
            .bind(transaction.session_id.as_str())
            .bind(transaction.customer.email.as_str())
            .bind(transaction.customer.name.as_str())
            .bind(amount_cents)
            .bind(transaction.created_at)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;

            Ok(inserted.is_some())
        })
    }

    fn try_consume<'a>(
        &'a mut self,
        id: &'a TicketTypeId,
        pool: CapacityPool,
        amount: u32,
    ) -> StoreFuture<'a, Option<ConsumeOutcome>> {
        Box::pin(async move { queries::try_consume(&mut self.tx, id, pool, amount).await })
    }

    fn insert_ticket<'a>(&'a mut self, ticket: &'a Ticket) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO tickets
                    (id, ticket_type_id, transaction_id, status, scan_count, max_scan_count,
                     first_scanned_at, last_scanned_at, is_test)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ",
            )
            .bind(ticket.id.as_uuid())
            .bind(ticket.ticket_type_id.as_str())
            .bind(ticket.transaction_id.as_uuid())
            .bind(ticket.status.as_str())
            .bind(count_to_db(ticket.scan_count))
            .bind(count_to_db(ticket.max_scan_count))
            .bind(ticket.first_scanned_at)
            .bind(ticket.last_scanned_at)
            .bind(ticket.is_test)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move { self.tx.commit().await.map_err(map_sqlx) })
    }
}
