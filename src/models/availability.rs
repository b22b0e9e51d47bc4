use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

const DAY_ORDER: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

/// Fixed slot start times for one weekday.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaySchedule {
    pub day: String,
    pub slots: Vec<String>,
}

/// Business-hours configuration. A weekday without a schedule (or with an
/// empty slot list) is closed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusinessHours {
    pub days: Vec<DaySchedule>,
    #[serde(default)]
    pub closed_dates: Vec<NaiveDate>,
    #[serde(default = "default_horizon_days")]
    pub horizon_days: i64,
}

fn default_horizon_days() -> i64 {
    60
}

impl Default for BusinessHours {
    /// Monday to Saturday, hourly from 09:00 to 17:00. Sunday closed.
    fn default() -> Self {
        let slots: Vec<String> = (9..=17).map(|h| format!("{h:02}:00")).collect();
        let days = DAY_ORDER[..6]
            .iter()
            .map(|day| DaySchedule {
                day: day.to_string(),
                slots: slots.clone(),
            })
            .collect();
        Self {
            days,
            closed_dates: Vec::new(),
            horizon_days: default_horizon_days(),
        }
    }
}

impl BusinessHours {
    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        let mut hours: BusinessHours = serde_json::from_str(s)?;
        hours.validate()?;
        for day in &mut hours.days {
            day.day = day.day.to_lowercase();
            day.slots.sort();
            day.slots.dedup();
        }
        Ok(hours)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.horizon_days < 0 {
            anyhow::bail!("horizon_days must not be negative");
        }
        for day in &self.days {
            parse_weekday(&day.day)?;
            for slot in &day.slots {
                parse_time(slot)?;
            }
        }
        Ok(())
    }

    pub fn slots_for(&self, weekday: Weekday) -> &[String] {
        let key = weekday_key(weekday);
        self.days
            .iter()
            .find(|d| d.day.eq_ignore_ascii_case(key))
            .map(|d| d.slots.as_slice())
            .unwrap_or(&[])
    }

    /// Whether the business operates on `date`, given the operating calendar
    /// that starts at `today`. Dates past the horizon are treated as closed.
    pub fn is_open(&self, date: NaiveDate, today: NaiveDate) -> bool {
        if self.slots_for(date.weekday()).is_empty() {
            return false;
        }
        if self.closed_dates.contains(&date) {
            return false;
        }
        (date - today).num_days() <= self.horizon_days
    }

    pub fn offers_slot(&self, date: NaiveDate, time: &str) -> bool {
        self.slots_for(date.weekday()).iter().any(|s| s == time)
    }
}

/// Derived per-day capacity. Never persisted.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub closed: bool,
    pub total_slots: i64,
    pub booked: i64,
    pub available: i64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Available,
    Booked,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SlotView {
    pub time: String,
    pub status: SlotStatus,
}

pub fn weekday_key(weekday: Weekday) -> &'static str {
    DAY_ORDER[weekday.num_days_from_monday() as usize]
}

fn parse_weekday(s: &str) -> anyhow::Result<()> {
    if DAY_ORDER.contains(&s.to_lowercase().as_str()) {
        Ok(())
    } else {
        Err(anyhow::anyhow!("invalid weekday: {s}"))
    }
}

fn parse_time(s: &str) -> anyhow::Result<()> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 2 || parts[0].len() != 2 || parts[1].len() != 2 {
        return Err(anyhow::anyhow!("invalid time format: {s}"));
    }
    let hour: u32 = parts[0]
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid hour in: {s}"))?;
    let minute: u32 = parts[1]
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid minute in: {s}"))?;
    if hour > 23 || minute > 59 {
        return Err(anyhow::anyhow!("time out of range: {s}"));
    }
    Ok(())
}
