//! Statements shared by the pooled store and the issuance unit.
//!
//! Every helper takes a `&mut PgConnection`, so the same statement runs on a
//! pooled connection or inside an open transaction.

use crate::error::{count_from_db, count_to_db, map_sqlx};
use boxoffice_core::{
    CapacityPool, ConsumeOutcome, Customer, Money, Reservation, ReservationStatus, SessionId,
    StoreError, StoreResult, Ticket, TicketId, TicketStatus, TicketType, TicketTypeId,
    TicketTypeStatus, Transaction, TransactionId,
};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

pub(crate) type TicketTypeRow = (String, i64, i64, i64, i64, String);

pub(crate) type ReservationRow = (
    String,
    String,
    i64,
    String,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    Option<Uuid>,
);

pub(crate) type TicketRow = (
    Uuid,
    String,
    Uuid,
    String,
    i64,
    i64,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    bool,
);

pub(crate) type TransactionRow = (Uuid, String, String, String, i64, DateTime<Utc>);

pub(crate) fn ticket_type_from_row(row: TicketTypeRow) -> StoreResult<TicketType> {
    let (id, max_quantity, sold_count, test_sold_count, held_count, status) = row;
    Ok(TicketType {
        id: TicketTypeId::new(id),
        max_quantity: count_from_db("max_quantity", max_quantity)?,
        sold_count: count_from_db("sold_count", sold_count)?,
        test_sold_count: count_from_db("test_sold_count", test_sold_count)?,
        held_count: count_from_db("held_count", held_count)?,
        status: TicketTypeStatus::parse(&status)?,
    })
}

pub(crate) fn reservation_from_row(row: ReservationRow) -> StoreResult<Reservation> {
    let (session_id, ticket_type_id, quantity, status, created_at, expires_at, transaction_id) =
        row;
    Ok(Reservation {
        session_id: SessionId::new(session_id),
        ticket_type_id: TicketTypeId::new(ticket_type_id),
        quantity: count_from_db("quantity", quantity)?,
        status: ReservationStatus::parse(&status)?,
        created_at,
        expires_at,
        transaction_id: transaction_id.map(TransactionId::from_uuid),
    })
}

pub(crate) fn ticket_from_row(row: TicketRow) -> StoreResult<Ticket> {
    let (
        id,
        ticket_type_id,
        transaction_id,
        status,
        scan_count,
        max_scan_count,
        first_scanned_at,
        last_scanned_at,
        is_test,
    ) = row;
    Ok(Ticket {
        id: TicketId::from_uuid(id),
        ticket_type_id: TicketTypeId::new(ticket_type_id),
        transaction_id: TransactionId::from_uuid(transaction_id),
        status: TicketStatus::parse(&status)?,
        scan_count: count_from_db("scan_count", scan_count)?,
        max_scan_count: count_from_db("max_scan_count", max_scan_count)?,
        first_scanned_at,
        last_scanned_at,
        is_test,
    })
}

pub(crate) fn transaction_from_row(row: TransactionRow) -> StoreResult<Transaction> {
    let (id, session_id, email, name, amount_cents, created_at) = row;
    let cents = u64::try_from(amount_cents)
        .map_err(|_| StoreError::Corrupt(format!("amount_cents out of range: {amount_cents}")))?;
    Ok(Transaction {
        id: TransactionId::from_uuid(id),
        session_id: SessionId::new(session_id),
        customer: Customer::new(email, name),
        amount: Money::from_cents(cents),
        created_at,
    })
}

pub(crate) fn amount_to_db(amount: Money) -> StoreResult<i64> {
    i64::try_from(amount.cents())
        .map_err(|_| StoreError::Corrupt(format!("amount out of range: {}", amount.cents())))
}

pub(crate) async fn load_ticket_type(
    conn: &mut PgConnection,
    id: &TicketTypeId,
) -> StoreResult<Option<TicketType>> {
    let row: Option<TicketTypeRow> = sqlx::query_as(
        r"
        SELECT id, max_quantity, sold_count, test_sold_count, held_count, status
        FROM ticket_types
        WHERE id = $1
        ",
    )
    .bind(id.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx)?;

    row.map(ticket_type_from_row).transpose()
}

/// The ledger primitive as one conditional `UPDATE`.
///
/// The bound is part of the `WHERE` clause, so under concurrent writers the
/// row lock serializes the updates and each one re-checks the bound against
/// the committed counters. A rejected update writes nothing; the follow-up read
/// only reports the counters for the caller.
pub(crate) async fn try_consume(
    conn: &mut PgConnection,
    id: &TicketTypeId,
    pool: CapacityPool,
    amount: u32,
) -> StoreResult<Option<ConsumeOutcome>> {
    let sql = match pool {
        CapacityPool::Production => {
            r"
            UPDATE ticket_types
            SET sold_count = sold_count + $2,
                status = CASE
                    WHEN status = 'available' AND sold_count + $2 >= max_quantity THEN 'sold_out'
                    ELSE status
                END,
                updated_at = now()
            WHERE id = $1 AND sold_count + $2 <= max_quantity
            RETURNING sold_count
            "
        }
        CapacityPool::Test => {
            r"
            UPDATE ticket_types
            SET test_sold_count = test_sold_count + $2,
                updated_at = now()
            WHERE id = $1 AND test_sold_count + $2 <= max_quantity
            RETURNING test_sold_count
            "
        }
        CapacityPool::Held => {
            r"
            UPDATE ticket_types
            SET held_count = held_count + $2,
                updated_at = now()
            WHERE id = $1 AND held_count + sold_count + $2 <= max_quantity
            RETURNING held_count
            "
        }
    };

    let updated: Option<(i64,)> = sqlx::query_as(sql)
        .bind(id.as_str())
        .bind(count_to_db(amount))
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx)?;

    if let Some((new_count,)) = updated {
        return Ok(Some(ConsumeOutcome::Accepted {
            new_count: count_from_db("new_count", new_count)?,
        }));
    }

    Ok(load_ticket_type(conn, id)
        .await?
        .map(|ticket_type| ConsumeOutcome::Rejected {
            count: ticket_type.count(pool),
            max_quantity: ticket_type.max_quantity,
        }))
}

/// Floor-at-zero decrement. A production release below the bound reopens a
/// sold-out type.
pub(crate) async fn release(
    conn: &mut PgConnection,
    id: &TicketTypeId,
    pool: CapacityPool,
    amount: u32,
) -> StoreResult<Option<u32>> {
    let sql = match pool {
        CapacityPool::Production => {
            r"
            UPDATE ticket_types
            SET sold_count = GREATEST(sold_count - $2, 0),
                status = CASE
                    WHEN status = 'sold_out' AND GREATEST(sold_count - $2, 0) < max_quantity
                        THEN 'available'
                    ELSE status
                END,
                updated_at = now()
            WHERE id = $1
            RETURNING sold_count
            "
        }
        CapacityPool::Test => {
            r"
            UPDATE ticket_types
            SET test_sold_count = GREATEST(test_sold_count - $2, 0),
                updated_at = now()
            WHERE id = $1
            RETURNING test_sold_count
            "
        }
        CapacityPool::Held => {
            r"
            UPDATE ticket_types
            SET held_count = GREATEST(held_count - $2, 0),
                updated_at = now()
            WHERE id = $1
            RETURNING held_count
            "
        }
    };

    let updated: Option<(i64,)> = sqlx::query_as(sql)
        .bind(id.as_str())
        .bind(count_to_db(amount))
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx)?;

    updated
        .map(|(count,)| count_from_db("count", count))
        .transpose()
}

pub(crate) async fn load_reservation(
    conn: &mut PgConnection,
    session_id: &SessionId,
) -> StoreResult<Option<Reservation>> {
    let row: Option<ReservationRow> = sqlx::query_as(
        r"
        SELECT session_id, ticket_type_id, quantity, status, created_at, expires_at, transaction_id
        FROM ticket_reservations
        WHERE session_id = $1
        ",
    )
    .bind(session_id.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx)?;

    row.map(reservation_from_row).transpose()
}

pub(crate) async fn load_ticket(
    conn: &mut PgConnection,
    id: TicketId,
) -> StoreResult<Option<Ticket>> {
    let row: Option<TicketRow> = sqlx::query_as(
        r"
        SELECT id, ticket_type_id, transaction_id, status, scan_count, max_scan_count,
               first_scanned_at, last_scanned_at, is_test
        FROM tickets
        WHERE id = $1
        ",
    )
    .bind(id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx)?;

    row.map(ticket_from_row).transpose()
}

pub(crate) async fn tickets_for_transaction(
    conn: &mut PgConnection,
    transaction_id: TransactionId,
) -> StoreResult<Vec<Ticket>> {
    let rows: Vec<TicketRow> = sqlx::query_as(
        r"
        SELECT id, ticket_type_id, transaction_id, status, scan_count, max_scan_count,
               first_scanned_at, last_scanned_at, is_test
        FROM tickets
        WHERE transaction_id = $1
        ORDER BY seq
        ",
    )
    .bind(transaction_id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(map_sqlx)?;

    rows.into_iter().map(ticket_from_row).collect()
}
