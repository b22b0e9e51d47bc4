use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{
    Addon, Booking, BookingStatus, BusinessHours, Catalog, DomainEvent, Invoice, PaymentMethod,
    PaymentStatus, PriceBreakdown, ServiceOffering, Subscription, SubscriptionPlan,
    SubscriptionStatus, VehicleType,
};

pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const BUSINESS_HOURS_KEY: &str = "business_hours";

pub fn fmt_ts(dt: &NaiveDateTime) -> String {
    dt.format(TS_FORMAT).to_string()
}

pub fn fmt_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_ts(idx: usize, s: Option<&str>) -> rusqlite::Result<Option<NaiveDateTime>> {
    s.map(|s| parse_ts(idx, s)).transpose()
}

/// Maps a stored enum column through `parse`, failing on values it does not know.
fn parse_enum<T>(idx: usize, s: &str, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown stored value: {s}").into(),
        )
    })
}

/// True when `err` is a UNIQUE violation, as opposed to a CHECK or FOREIGN KEY failure.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

// ── Bookings ──

const BOOKING_COLUMNS: &str = "id, customer_name, customer_email, customer_phone, address, \
     service_id, vehicle_type_id, addon_ids, scheduled_date, time_slot, base_price_cents, \
     vehicle_extra_cents, addons_cents, payment_method, payment_status, status, subscription_id, \
     provider_payment_id, notes, created_at, confirmed_at, updated_at";

/// Inserts a booking. The partial unique index on live (date, slot) pairs
/// rejects a second live booking with a UNIQUE violation.
pub fn insert_booking(conn: &Connection, booking: &Booking) -> rusqlite::Result<()> {
    let addon_ids = serde_json::to_string(&booking.addon_ids)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

    conn.execute(
        "INSERT INTO bookings (id, customer_name, customer_email, customer_phone, address, service_id,
             vehicle_type_id, addon_ids, scheduled_date, time_slot, base_price_cents, vehicle_extra_cents,
             addons_cents, total_cents, payment_method, payment_status, status, subscription_id,
             provider_payment_id, notes, created_at, confirmed_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
        params![
            booking.id,
            booking.customer_name,
            booking.customer_email,
            booking.customer_phone,
            booking.address,
            booking.service_id,
            booking.vehicle_type_id,
            addon_ids,
            fmt_date(&booking.scheduled_date),
            booking.time_slot,
            booking.price.base_cents,
            booking.price.vehicle_extra_cents,
            booking.price.addons_cents,
            booking.price.total_cents(),
            booking.payment_method.as_str(),
            booking.payment_status.as_str(),
            booking.status.as_str(),
            booking.subscription_id,
            booking.provider_payment_id,
            booking.notes,
            fmt_ts(&booking.created_at),
            booking.confirmed_at.as_ref().map(fmt_ts),
            fmt_ts(&booking.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_booking_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    let booking = conn
        .query_row(
            &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
            params![id],
            parse_booking_row,
        )
        .optional()?;
    Ok(booking)
}

pub fn booking_exists(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM bookings WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn list_bookings(
    conn: &Connection,
    status_filter: Option<&str>,
    date_filter: Option<&NaiveDate>,
    limit: i64,
) -> anyhow::Result<Vec<Booking>> {
    let date = date_filter.map(fmt_date);
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR scheduled_date = ?2)
         ORDER BY scheduled_date DESC, time_slot DESC LIMIT ?3"
    ))?;

    let rows = stmt.query_map(params![status_filter, date, limit], parse_booking_row)?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row?);
    }
    Ok(bookings)
}

/// Per-date count of bookings that consume capacity (pending or confirmed).
pub fn count_capacity_by_date(
    conn: &Connection,
    from: &NaiveDate,
    to: &NaiveDate,
) -> anyhow::Result<HashMap<NaiveDate, i64>> {
    let mut stmt = conn.prepare(
        "SELECT scheduled_date, COUNT(*) FROM bookings
         WHERE scheduled_date >= ?1 AND scheduled_date <= ?2 AND status IN ('pending', 'confirmed')
         GROUP BY scheduled_date",
    )?;

    let rows = stmt.query_map(params![fmt_date(from), fmt_date(to)], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut counts = HashMap::new();
    for row in rows {
        let (date_str, count) = row?;
        let date = NaiveDate::parse_from_str(&date_str, DATE_FORMAT)?;
        counts.insert(date, count);
    }
    Ok(counts)
}

/// Slot times on `date` held by a non-cancelled booking.
pub fn occupied_slots(conn: &Connection, date: &NaiveDate) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT time_slot FROM bookings WHERE scheduled_date = ?1 AND status != 'cancelled'
         ORDER BY time_slot ASC",
    )?;
    let rows = stmt.query_map(params![fmt_date(date)], |row| row.get::<_, String>(0))?;

    let mut slots = vec![];
    for row in rows {
        slots.push(row?);
    }
    Ok(slots)
}

/// Cancels a pending or confirmed booking. Returns false when the booking
/// was already cancelled or completed.
pub fn cancel_live_booking(conn: &Connection, id: &str, now: &NaiveDateTime) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = 'cancelled', updated_at = ?2
         WHERE id = ?1 AND status IN ('pending', 'confirmed')",
        params![id, fmt_ts(now)],
    )?;
    Ok(count > 0)
}

pub fn confirm_pending_booking(conn: &Connection, id: &str, now: &NaiveDateTime) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = 'confirmed', confirmed_at = COALESCE(confirmed_at, ?2), updated_at = ?2
         WHERE id = ?1 AND status = 'pending'",
        params![id, fmt_ts(now)],
    )?;
    Ok(count > 0)
}

pub fn complete_booking(conn: &Connection, id: &str, now: &NaiveDateTime) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET status = 'completed', updated_at = ?2
         WHERE id = ?1 AND status IN ('pending', 'confirmed')",
        params![id, fmt_ts(now)],
    )?;
    Ok(count > 0)
}

/// Records an approved payment. Pending bookings become confirmed; bookings
/// cancelled by a rejected payment are reinstated, which fails with a
/// UNIQUE violation if their slot was taken meanwhile. Bookings cancelled for
/// any other reason are left untouched.
pub fn approve_booking_payment(
    conn: &Connection,
    id: &str,
    payment_id: &str,
    now: &NaiveDateTime,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE bookings SET
             payment_status = 'approved',
             status = CASE
                 WHEN status = 'pending' THEN 'confirmed'
                 WHEN status = 'cancelled' AND payment_status = 'rejected' THEN 'confirmed'
                 ELSE status
             END,
             confirmed_at = COALESCE(confirmed_at, ?3),
             provider_payment_id = ?2,
             updated_at = ?3
         WHERE id = ?1 AND payment_status NOT IN ('approved', 'refunded')
           AND (status != 'cancelled' OR payment_status = 'rejected')",
        params![id, payment_id, fmt_ts(now)],
    )
}

/// Records an approved payment without touching the booking status.
pub fn record_booking_payment_approved(
    conn: &Connection,
    id: &str,
    payment_id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE bookings SET payment_status = 'approved', provider_payment_id = ?2, updated_at = ?3
         WHERE id = ?1 AND payment_status NOT IN ('approved', 'refunded')",
        params![id, payment_id, fmt_ts(now)],
    )?;
    Ok(count)
}

pub fn mark_booking_payment_in_process(
    conn: &Connection,
    id: &str,
    payment_id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE bookings SET payment_status = 'in_process', provider_payment_id = ?2, updated_at = ?3
         WHERE id = ?1 AND payment_status IN ('pending', 'in_process') AND status != 'cancelled'",
        params![id, payment_id, fmt_ts(now)],
    )?;
    Ok(count)
}

pub fn reject_booking_payment(
    conn: &Connection,
    id: &str,
    payment_id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE bookings SET payment_status = 'rejected', status = 'cancelled', provider_payment_id = ?2,
             updated_at = ?3
         WHERE id = ?1 AND payment_status NOT IN ('approved', 'refunded')
           AND status IN ('pending', 'confirmed')",
        params![id, payment_id, fmt_ts(now)],
    )?;
    Ok(count)
}

/// Refunds only the payment the booking was approved with (or a booking
/// that never stored one).
pub fn refund_booking_payment(
    conn: &Connection,
    id: &str,
    payment_id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<usize> {
    let count = conn.execute(
        "UPDATE bookings SET payment_status = 'refunded', status = 'cancelled', provider_payment_id = ?2,
             updated_at = ?3
         WHERE id = ?1 AND payment_status != 'refunded'
           AND (provider_payment_id IS NULL OR provider_payment_id = ?2)",
        params![id, payment_id, fmt_ts(now)],
    )?;
    Ok(count)
}

fn parse_booking_row(row: &rusqlite::Row) -> rusqlite::Result<Booking> {
    let addon_ids_json: String = row.get(7)?;
    let date_str: String = row.get(8)?;
    let payment_method: String = row.get(13)?;
    let payment_status: String = row.get(14)?;
    let status: String = row.get(15)?;
    let created_at: String = row.get(19)?;
    let confirmed_at: Option<String> = row.get(20)?;
    let updated_at: String = row.get(21)?;

    let scheduled_date = NaiveDate::parse_from_str(&date_str, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;

    Ok(Booking {
        id: row.get(0)?,
        customer_name: row.get(1)?,
        customer_email: row.get(2)?,
        customer_phone: row.get(3)?,
        address: row.get(4)?,
        service_id: row.get(5)?,
        vehicle_type_id: row.get(6)?,
        addon_ids: serde_json::from_str(&addon_ids_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?,
        scheduled_date,
        time_slot: row.get(9)?,
        price: PriceBreakdown {
            base_cents: row.get(10)?,
            vehicle_extra_cents: row.get(11)?,
            addons_cents: row.get(12)?,
        },
        payment_method: parse_enum(13, &payment_method, PaymentMethod::parse)?,
        payment_status: parse_enum(14, &payment_status, PaymentStatus::parse)?,
        status: parse_enum(15, &status, BookingStatus::parse)?,
        subscription_id: row.get(16)?,
        provider_payment_id: row.get(17)?,
        notes: row.get(18)?,
        created_at: parse_ts(19, &created_at)?,
        confirmed_at: parse_opt_ts(20, confirmed_at.as_deref())?,
        updated_at: parse_ts(21, &updated_at)?,
    })
}

// ── Catalog ──

pub fn get_service(conn: &Connection, id: &str) -> anyhow::Result<Option<ServiceOffering>> {
    let service = conn
        .query_row(
            "SELECT id, name, base_price_cents FROM services WHERE id = ?1 AND active = 1",
            params![id],
            |row| {
                Ok(ServiceOffering {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    base_price_cents: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(service)
}

pub fn get_vehicle_type(conn: &Connection, id: &str) -> anyhow::Result<Option<VehicleType>> {
    let vehicle = conn
        .query_row(
            "SELECT id, name, extra_cents FROM vehicle_types WHERE id = ?1",
            params![id],
            |row| {
                Ok(VehicleType {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    extra_cents: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(vehicle)
}

pub fn get_addon(conn: &Connection, id: &str) -> anyhow::Result<Option<Addon>> {
    let addon = conn
        .query_row(
            "SELECT id, name, price_cents FROM addons WHERE id = ?1 AND active = 1",
            params![id],
            |row| {
                Ok(Addon {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    price_cents: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(addon)
}

pub fn get_plan(conn: &Connection, id: &str) -> anyhow::Result<Option<SubscriptionPlan>> {
    let plan = conn
        .query_row(
            "SELECT id, name, washes_per_cycle, price_cents, service_id, vehicle_type_id, period_months
             FROM subscription_plans WHERE id = ?1",
            params![id],
            parse_plan_row,
        )
        .optional()?;
    Ok(plan)
}

pub fn get_catalog(conn: &Connection) -> anyhow::Result<Catalog> {
    let mut stmt =
        conn.prepare("SELECT id, name, base_price_cents FROM services WHERE active = 1 ORDER BY base_price_cents")?;
    let services = stmt
        .query_map([], |row| {
            Ok(ServiceOffering {
                id: row.get(0)?,
                name: row.get(1)?,
                base_price_cents: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare("SELECT id, name, extra_cents FROM vehicle_types ORDER BY extra_cents")?;
    let vehicle_types = stmt
        .query_map([], |row| {
            Ok(VehicleType {
                id: row.get(0)?,
                name: row.get(1)?,
                extra_cents: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare("SELECT id, name, price_cents FROM addons WHERE active = 1 ORDER BY name")?;
    let addons = stmt
        .query_map([], |row| {
            Ok(Addon {
                id: row.get(0)?,
                name: row.get(1)?,
                price_cents: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT id, name, washes_per_cycle, price_cents, service_id, vehicle_type_id, period_months
         FROM subscription_plans ORDER BY price_cents",
    )?;
    let plans = stmt
        .query_map([], parse_plan_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Catalog {
        services,
        vehicle_types,
        addons,
        plans,
    })
}

fn parse_plan_row(row: &rusqlite::Row) -> rusqlite::Result<SubscriptionPlan> {
    Ok(SubscriptionPlan {
        id: row.get(0)?,
        name: row.get(1)?,
        washes_per_cycle: row.get(2)?,
        price_cents: row.get(3)?,
        service_id: row.get(4)?,
        vehicle_type_id: row.get(5)?,
        period_months: row.get(6)?,
    })
}

// ── Subscriptions ──

const SUBSCRIPTION_COLUMNS: &str = "id, customer_name, customer_email, customer_phone, plan_id, \
     status, washes_remaining, washes_used_in_cycle, cycle_start, cycle_end, created_at, updated_at";

pub fn insert_subscription(conn: &Connection, sub: &Subscription) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO subscriptions (id, customer_name, customer_email, customer_phone, plan_id, status,
             washes_remaining, washes_used_in_cycle, cycle_start, cycle_end, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            sub.id,
            sub.customer_name,
            sub.customer_email,
            sub.customer_phone,
            sub.plan_id,
            sub.status.as_str(),
            sub.washes_remaining,
            sub.washes_used_in_cycle,
            sub.cycle_start.as_ref().map(fmt_ts),
            sub.cycle_end.as_ref().map(fmt_ts),
            fmt_ts(&sub.created_at),
            fmt_ts(&sub.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_subscription(conn: &Connection, id: &str) -> anyhow::Result<Option<Subscription>> {
    let sub = conn
        .query_row(
            &format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = ?1"),
            params![id],
            parse_subscription_row,
        )
        .optional()?;
    Ok(sub)
}

pub fn subscription_exists(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM subscriptions WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn list_subscriptions(
    conn: &Connection,
    status_filter: Option<&str>,
    limit: i64,
) -> anyhow::Result<Vec<Subscription>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
         WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![status_filter, limit], parse_subscription_row)?;

    let mut subs = vec![];
    for row in rows {
        subs.push(row?);
    }
    Ok(subs)
}

/// Guarded decrement: only an active subscription with credit left matches.
/// Returns the new `(remaining, used)` pair, or `None` when the guard failed.
pub fn decrement_wash(
    conn: &Connection,
    id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<Option<(i64, i64)>> {
    let counts = conn
        .query_row(
            "UPDATE subscriptions SET
                 washes_remaining = washes_remaining - 1,
                 washes_used_in_cycle = washes_used_in_cycle + 1,
                 updated_at = ?2
             WHERE id = ?1 AND status = 'active' AND washes_remaining > 0
             RETURNING washes_remaining, washes_used_in_cycle",
            params![id, fmt_ts(now)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(counts)
}

/// Gives one wash back, clamped to the plan quota and a non-negative usage.
pub fn increment_wash(
    conn: &Connection,
    id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<Option<(i64, i64)>> {
    let counts = conn
        .query_row(
            "UPDATE subscriptions SET
                 washes_remaining = MIN(
                     washes_remaining + 1,
                     (SELECT p.washes_per_cycle FROM subscription_plans p WHERE p.id = subscriptions.plan_id)
                 ),
                 washes_used_in_cycle = MAX(washes_used_in_cycle - 1, 0),
                 updated_at = ?2
             WHERE id = ?1 AND status != 'cancelled'
             RETURNING washes_remaining, washes_used_in_cycle",
            params![id, fmt_ts(now)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(counts)
}

/// Starts a fresh cycle with the full quota. A pending subscription becomes
/// active; paused ones stay paused.
pub fn reset_cycle(
    conn: &Connection,
    id: &str,
    washes: i64,
    cycle_start: &NaiveDateTime,
    cycle_end: &NaiveDateTime,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE subscriptions SET
             status = CASE WHEN status = 'pending' THEN 'active' ELSE status END,
             washes_remaining = ?2,
             washes_used_in_cycle = 0,
             cycle_start = ?3,
             cycle_end = ?4,
             updated_at = ?5
         WHERE id = ?1 AND status != 'cancelled'",
        params![id, washes, fmt_ts(cycle_start), fmt_ts(cycle_end), fmt_ts(now)],
    )?;
    Ok(count > 0)
}

/// Moves a subscription to `to` only if its current status is one of `from`.
pub fn transition_subscription(
    conn: &Connection,
    id: &str,
    from: &[SubscriptionStatus],
    to: SubscriptionStatus,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let from_list = from
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    let count = conn.execute(
        &format!(
            "UPDATE subscriptions SET status = ?2, updated_at = ?3 WHERE id = ?1 AND status IN ({from_list})"
        ),
        params![id, to.as_str(), fmt_ts(now)],
    )?;
    Ok(count > 0)
}

/// SQL `CASE` giving the precedence of the payment status held in `column`.
fn payment_precedence_sql(column: &str) -> String {
    let arms: Vec<String> = [
        PaymentStatus::Pending,
        PaymentStatus::InProcess,
        PaymentStatus::Rejected,
        PaymentStatus::Approved,
        PaymentStatus::Refunded,
    ]
    .iter()
    .map(|s| format!("WHEN '{}' THEN {}", s.as_str(), s.precedence()))
    .collect();
    format!("CASE {column} {} ELSE -1 END", arms.join(" "))
}

/// Records the status of a subscription payment, or moves it forward. A stored
/// status of equal or higher precedence is kept, as is a row that belongs to a
/// different subscription. Returns true if a row was inserted or changed.
pub fn advance_subscription_payment(
    conn: &Connection,
    payment_id: &str,
    subscription_id: &str,
    status: &PaymentStatus,
    amount_cents: i64,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let sql = format!(
        "INSERT INTO subscription_payments (provider_payment_id, subscription_id, status, amount_cents, processed_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(provider_payment_id) DO UPDATE SET
             status = excluded.status,
             processed_at = excluded.processed_at
         WHERE subscription_payments.subscription_id = excluded.subscription_id
           AND {} > {}",
        payment_precedence_sql("excluded.status"),
        payment_precedence_sql("subscription_payments.status"),
    );
    let count = conn.execute(
        &sql,
        params![payment_id, subscription_id, status.as_str(), amount_cents, fmt_ts(now)],
    )?;
    Ok(count > 0)
}

pub fn get_subscription_payment_status(
    conn: &Connection,
    payment_id: &str,
) -> anyhow::Result<Option<PaymentStatus>> {
    let status = conn
        .query_row(
            "SELECT status FROM subscription_payments WHERE provider_payment_id = ?1",
            params![payment_id],
            |row| {
                let status: String = row.get(0)?;
                parse_enum(0, &status, PaymentStatus::parse)
            },
        )
        .optional()?;
    Ok(status)
}

fn parse_subscription_row(row: &rusqlite::Row) -> rusqlite::Result<Subscription> {
    let status: String = row.get(5)?;
    let cycle_start: Option<String> = row.get(8)?;
    let cycle_end: Option<String> = row.get(9)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(Subscription {
        id: row.get(0)?,
        customer_name: row.get(1)?,
        customer_email: row.get(2)?,
        customer_phone: row.get(3)?,
        plan_id: row.get(4)?,
        status: parse_enum(5, &status, SubscriptionStatus::parse)?,
        washes_remaining: row.get(6)?,
        washes_used_in_cycle: row.get(7)?,
        cycle_start: parse_opt_ts(8, cycle_start.as_deref())?,
        cycle_end: parse_opt_ts(9, cycle_end.as_deref())?,
        created_at: parse_ts(10, &created_at)?,
        updated_at: parse_ts(11, &updated_at)?,
    })
}

// ── Invoices ──

/// Inserts the invoice row for a payment unless one already exists.
/// Returns the new row id only on first insert.
pub fn insert_invoice_once(
    conn: &Connection,
    payment_id: &str,
    entity_type: &str,
    entity_id: &str,
    amount_cents: i64,
    now: &NaiveDateTime,
) -> anyhow::Result<Option<i64>> {
    let count = conn.execute(
        "INSERT INTO invoices (provider_payment_id, entity_type, entity_id, amount_cents, status, created_at)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5)
         ON CONFLICT(provider_payment_id) DO NOTHING",
        params![payment_id, entity_type, entity_id, amount_cents, fmt_ts(now)],
    )?;
    if count == 0 {
        return Ok(None);
    }
    Ok(Some(conn.last_insert_rowid()))
}

pub fn mark_invoice_issued(
    conn: &Connection,
    id: i64,
    external_id: Option<&str>,
    now: &NaiveDateTime,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE invoices SET status = 'issued', external_id = ?2, error = NULL, issued_at = ?3 WHERE id = ?1",
        params![id, external_id, fmt_ts(now)],
    )?;
    Ok(())
}

pub fn mark_invoice_failed(conn: &Connection, id: i64, error: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE invoices SET status = 'failed', error = ?2 WHERE id = ?1",
        params![id, error],
    )?;
    Ok(())
}

pub fn count_invoices_for_payment(conn: &Connection, payment_id: &str) -> anyhow::Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM invoices WHERE provider_payment_id = ?1",
        params![payment_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn list_invoices(conn: &Connection, limit: i64) -> anyhow::Result<Vec<Invoice>> {
    let mut stmt = conn.prepare(
        "SELECT id, provider_payment_id, entity_type, entity_id, amount_cents, status, external_id, error,
                created_at, issued_at
         FROM invoices ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(Invoice {
            id: row.get(0)?,
            provider_payment_id: row.get(1)?,
            entity_type: row.get(2)?,
            entity_id: row.get(3)?,
            amount_cents: row.get(4)?,
            status: row.get(5)?,
            external_id: row.get(6)?,
            error: row.get(7)?,
            created_at: row.get(8)?,
            issued_at: row.get(9)?,
        })
    })?;

    let mut invoices = vec![];
    for row in rows {
        invoices.push(row?);
    }
    Ok(invoices)
}

// ── Webhook Deliveries ──

pub fn insert_webhook_delivery(
    conn: &Connection,
    event_type: &str,
    resource_id: Option<&str>,
    payload: &str,
) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO webhook_deliveries (event_type, resource_id, payload) VALUES (?1, ?2, ?3)",
        params![event_type, resource_id, payload],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn finish_webhook_delivery(
    conn: &Connection,
    id: i64,
    outcome: &str,
    error: Option<&str>,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE webhook_deliveries SET processed = ?2, outcome = ?3, processing_error = ?4 WHERE id = ?1",
        params![id, error.is_none() as i32, outcome, error],
    )?;
    Ok(())
}

// ── Domain Events ──

pub fn insert_domain_event(
    conn: &Connection,
    kind: &str,
    entity_id: &str,
    payload: &serde_json::Value,
) -> anyhow::Result<DomainEvent> {
    let payload_json = serde_json::to_string(payload)?;
    let (id, created_at): (i64, String) = conn.query_row(
        "INSERT INTO domain_events (kind, entity_id, payload) VALUES (?1, ?2, ?3)
         RETURNING id, created_at",
        params![kind, entity_id, payload_json],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(DomainEvent {
        id,
        kind: kind.to_string(),
        entity_id: entity_id.to_string(),
        payload: payload.clone(),
        created_at,
    })
}

pub fn get_domain_events_since(conn: &Connection, since_id: i64) -> anyhow::Result<Vec<DomainEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, entity_id, payload, created_at FROM domain_events WHERE id > ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![since_id], |row| {
        let payload: String = row.get(3)?;
        Ok(DomainEvent {
            id: row.get(0)?,
            kind: row.get(1)?,
            entity_id: row.get(2)?,
            payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
            created_at: row.get(4)?,
        })
    })?;

    let mut events = vec![];
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

// ── Settings ──

/// Stored business hours, or the defaults if none were saved.
pub fn get_business_hours(conn: &Connection) -> anyhow::Result<BusinessHours> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![BUSINESS_HOURS_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match value {
        Some(json) => BusinessHours::from_json(&json),
        None => Ok(BusinessHours::default()),
    }
}

pub fn save_business_hours(conn: &Connection, hours: &BusinessHours) -> anyhow::Result<()> {
    let json = serde_json::to_string(hours)?;
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
        params![BUSINESS_HOURS_KEY, json],
    )?;
    Ok(())
}

// ── Dashboard ──

pub struct DashboardStats {
    pub upcoming_bookings: i64,
    pub pending_payment_bookings: i64,
    pub active_subscriptions: i64,
    pub pending_invoices: i64,
    pub failed_invoices: i64,
    pub failed_webhooks: i64,
}

pub fn get_dashboard_stats(conn: &Connection, today: &NaiveDate) -> anyhow::Result<DashboardStats> {
    let today = fmt_date(today);
    let count = |sql: &str, p: &[&dyn rusqlite::ToSql]| -> anyhow::Result<i64> {
        Ok(conn.query_row(sql, p, |row| row.get(0))?)
    };

    Ok(DashboardStats {
        upcoming_bookings: count(
            "SELECT COUNT(*) FROM bookings WHERE scheduled_date >= ?1 AND status IN ('pending', 'confirmed')",
            &[&today],
        )?,
        pending_payment_bookings: count(
            "SELECT COUNT(*) FROM bookings WHERE status = 'pending' AND payment_status IN ('pending', 'in_process')",
            &[],
        )?,
        active_subscriptions: count("SELECT COUNT(*) FROM subscriptions WHERE status = 'active'", &[])?,
        pending_invoices: count("SELECT COUNT(*) FROM invoices WHERE status = 'pending'", &[])?,
        failed_invoices: count("SELECT COUNT(*) FROM invoices WHERE status = 'failed'", &[])?,
        failed_webhooks: count(
            "SELECT COUNT(*) FROM webhook_deliveries WHERE processing_error IS NOT NULL",
            &[],
        )?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn insert_raw_booking(conn: &Connection, id: &str, time: &str, status: &str, updated_at: &str) {
        conn.execute(
            "INSERT INTO bookings (id, customer_name, customer_email, customer_phone, address, service_id,
                 vehicle_type_id, scheduled_date, time_slot, base_price_cents, vehicle_extra_cents,
                 addons_cents, total_cents, payment_method, status, created_at, updated_at)
             VALUES (?1, 'A', 'a@x.com', '123456', 'addr', 'exterior', 'auto', '2026-11-02', ?2,
                 0, 0, 0, 0, 'online', ?3, '2026-10-01 00:00:00', ?4)",
            params![id, time, status, updated_at],
        )
        .unwrap();
    }

    #[test]
    fn test_booking_row_round_trips() {
        let conn = db::init_db(":memory:").unwrap();
        insert_raw_booking(&conn, "ok", "09:00", "confirmed", "2026-10-02 10:30:00");

        let booking = get_booking_by_id(&conn, "ok").unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.payment_status, PaymentStatus::Pending);
        assert_eq!(fmt_ts(&booking.updated_at), "2026-10-02 10:30:00");
    }

    #[test]
    fn test_unreadable_rows_are_errors() {
        let conn = db::init_db(":memory:").unwrap();
        insert_raw_booking(&conn, "bad-status", "09:00", "archived", "2026-10-02 10:30:00");
        insert_raw_booking(&conn, "bad-ts", "10:00", "pending", "yesterday");

        assert!(get_booking_by_id(&conn, "bad-status").is_err());
        assert!(get_booking_by_id(&conn, "bad-ts").is_err());

        conn.execute(
            "INSERT INTO subscriptions (id, customer_name, customer_email, customer_phone, plan_id, status,
                 created_at, updated_at)
             VALUES ('s1', 'Ana', 'ana@example.com', '123456', 'mensual-2', 'frozen',
                 '2026-10-01 00:00:00', '2026-10-01 00:00:00')",
            [],
        )
        .unwrap();
        assert!(get_subscription(&conn, "s1").is_err());

        conn.execute(
            "INSERT INTO subscription_payments (provider_payment_id, subscription_id, status, processed_at)
             VALUES ('P1', 's1', 'lost', '2026-10-01 00:00:00')",
            [],
        )
        .unwrap();
        assert!(get_subscription_payment_status(&conn, "P1").is_err());
    }
}
