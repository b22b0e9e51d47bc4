use std::collections::HashMap;

use chrono::{Datelike, Months, NaiveDate};
use rusqlite::Connection;
use serde::Serialize;

use crate::db::queries;
use crate::models::{BusinessHours, DayAvailability, SlotStatus, SlotView};

pub const MAX_RANGE_DAYS: i64 = 62;

#[derive(Debug, Clone, Serialize)]
pub struct DaySlots {
    pub date: NaiveDate,
    pub closed: bool,
    pub slots: Vec<SlotView>,
}

/// Capacity for a single day. Closed days report zero regardless of the
/// bookings that exist on them.
pub fn day_availability(
    hours: &BusinessHours,
    date: NaiveDate,
    today: NaiveDate,
    booked: i64,
) -> DayAvailability {
    if !hours.is_open(date, today) {
        return DayAvailability {
            date,
            closed: true,
            total_slots: 0,
            booked,
            available: 0,
        };
    }

    let total_slots = hours.slots_for(date.weekday()).len() as i64;
    DayAvailability {
        date,
        closed: false,
        total_slots,
        booked,
        available: (total_slots - booked).max(0),
    }
}

/// One record per calendar day in `[from, to]`.
pub fn compute_range(
    hours: &BusinessHours,
    from: NaiveDate,
    to: NaiveDate,
    today: NaiveDate,
    booked_by_date: &HashMap<NaiveDate, i64>,
) -> Vec<DayAvailability> {
    from.iter_days()
        .take_while(|d| *d <= to)
        .map(|date| {
            let booked = booked_by_date.get(&date).copied().unwrap_or(0);
            day_availability(hours, date, today, booked)
        })
        .collect()
}

pub fn slots_for_date(
    hours: &BusinessHours,
    date: NaiveDate,
    today: NaiveDate,
    occupied: &[String],
) -> DaySlots {
    if !hours.is_open(date, today) {
        return DaySlots {
            date,
            closed: true,
            slots: Vec::new(),
        };
    }

    let slots = hours
        .slots_for(date.weekday())
        .iter()
        .map(|time| SlotView {
            time: time.clone(),
            status: if occupied.contains(time) {
                SlotStatus::Booked
            } else {
                SlotStatus::Available
            },
        })
        .collect();

    DaySlots {
        date,
        closed: false,
        slots,
    }
}

/// Reads fresh booking counts and business hours, then derives availability.
pub fn availability_for_range(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
    today: NaiveDate,
) -> anyhow::Result<Vec<DayAvailability>> {
    let hours = queries::get_business_hours(conn)?;
    let booked = queries::count_capacity_by_date(conn, &from, &to)?;
    Ok(compute_range(&hours, from, to, today, &booked))
}

pub fn slots_on(conn: &Connection, date: NaiveDate, today: NaiveDate) -> anyhow::Result<DaySlots> {
    let hours = queries::get_business_hours(conn)?;
    let occupied = queries::occupied_slots(conn, &date)?;
    Ok(slots_for_date(&hours, date, today, &occupied))
}

/// Resolves `from`/`to` or a `YYYY-MM` month into an inclusive date range.
pub fn resolve_range(
    from: Option<&str>,
    to: Option<&str>,
    month: Option<&str>,
) -> Result<(NaiveDate, NaiveDate), String> {
    let (from, to) = match (from, to, month) {
        (Some(from), Some(to), None) => (parse_date(from)?, parse_date(to)?),
        (None, None, Some(month)) => {
            let first = NaiveDate::parse_from_str(&format!("{month}-01"), "%Y-%m-%d")
                .map_err(|_| format!("invalid month: {month}"))?;
            let last = first
                .checked_add_months(Months::new(1))
                .and_then(|d| d.pred_opt())
                .ok_or_else(|| format!("invalid month: {month}"))?;
            (first, last)
        }
        _ => return Err("provide either from and to, or month".to_string()),
    };

    if from > to {
        return Err("from must not be after to".to_string());
    }
    if (to - from).num_days() + 1 > MAX_RANGE_DAYS {
        return Err(format!("range must not exceed {MAX_RANGE_DAYS} days"));
    }
    Ok((from, to))
}

pub fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, queries::DATE_FORMAT).map_err(|_| format!("invalid date: {s}"))
}
