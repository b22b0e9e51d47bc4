use chrono::{Months, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub plan_id: String,
    pub status: SubscriptionStatus,
    pub washes_remaining: i64,
    pub washes_used_in_cycle: i64,
    pub cycle_start: Option<NaiveDateTime>,
    pub cycle_end: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub id: String,
    pub name: String,
    pub washes_per_cycle: i64,
    pub price_cents: i64,
    pub service_id: String,
    pub vehicle_type_id: String,
    pub period_months: u32,
}

impl SubscriptionPlan {
    /// The cycle that follows `[start, end)`. A cycle that never started
    /// begins at `now`.
    pub fn next_cycle(
        &self,
        current: Option<(NaiveDateTime, NaiveDateTime)>,
        now: NaiveDateTime,
    ) -> (NaiveDateTime, NaiveDateTime) {
        let period = Months::new(self.period_months.max(1));
        let start = match current {
            Some((_, end)) => end,
            None => now,
        };
        let end = start.checked_add_months(period).unwrap_or(start);
        (start, end)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionSignup {
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub plan_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Paused,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "paused" => Some(SubscriptionStatus::Paused),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            "pending" => Some(SubscriptionStatus::Pending),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(period_months: u32) -> SubscriptionPlan {
        SubscriptionPlan {
            id: "mensual-4".to_string(),
            name: "Plan".to_string(),
            washes_per_cycle: 4,
            price_cents: 6_000_000,
            service_id: "completo".to_string(),
            vehicle_type_id: "auto".to_string(),
            period_months,
        }
    }

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_first_cycle_starts_now() {
        let now = dt("2026-03-10 12:00:00");
        let (start, end) = plan(1).next_cycle(None, now);
        assert_eq!(start, now);
        assert_eq!(end, dt("2026-04-10 12:00:00"));
    }

    #[test]
    fn test_next_cycle_advances_one_period() {
        let current = (dt("2026-01-31 00:00:00"), dt("2026-02-28 00:00:00"));
        let (start, end) = plan(1).next_cycle(Some(current), dt("2026-02-27 09:00:00"));
        assert_eq!(start, dt("2026-02-28 00:00:00"));
        assert_eq!(end, dt("2026-03-28 00:00:00"));
    }
}
