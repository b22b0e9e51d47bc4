use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub address: String,
    pub service_id: String,
    pub vehicle_type_id: String,
    pub addon_ids: Vec<String>,
    pub scheduled_date: NaiveDate,
    pub time_slot: String,
    pub price: PriceBreakdown,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub status: BookingStatus,
    pub subscription_id: Option<String>,
    pub provider_payment_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub confirmed_at: Option<NaiveDateTime>,
    pub updated_at: NaiveDateTime,
}

impl Booking {
    pub fn is_subscription_funded(&self) -> bool {
        self.payment_method == PaymentMethod::Subscription && self.subscription_id.is_some()
    }
}

/// Amounts in minor currency units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub base_cents: i64,
    pub vehicle_extra_cents: i64,
    pub addons_cents: i64,
}

impl PriceBreakdown {
    pub fn total_cents(&self) -> i64 {
        self.base_cents + self.vehicle_extra_cents + self.addons_cents
    }
}

/// What the customer submits when picking a slot.
#[derive(Debug, Clone, Deserialize)]
pub struct BookingDraft {
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub address: String,
    pub service_id: String,
    pub vehicle_type_id: String,
    #[serde(default)]
    pub addon_ids: Vec<String>,
    pub date: NaiveDate,
    pub time: String,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirmed" => Some(BookingStatus::Confirmed),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            "pending" => Some(BookingStatus::Pending),
            _ => None,
        }
    }

    /// Statuses that count against a day's capacity.
    pub fn blocks_capacity(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Online,
    Transfer,
    PayLater,
    Subscription,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Online => "online",
            PaymentMethod::Transfer => "transfer",
            PaymentMethod::PayLater => "pay_later",
            PaymentMethod::Subscription => "subscription",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transfer" => Some(PaymentMethod::Transfer),
            "pay_later" => Some(PaymentMethod::PayLater),
            "subscription" => Some(PaymentMethod::Subscription),
            "online" => Some(PaymentMethod::Online),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    InProcess,
    Approved,
    Rejected,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::InProcess => "in_process",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_process" => Some(PaymentStatus::InProcess),
            "approved" => Some(PaymentStatus::Approved),
            "rejected" => Some(PaymentStatus::Rejected),
            "refunded" => Some(PaymentStatus::Refunded),
            "pending" => Some(PaymentStatus::Pending),
            _ => None,
        }
    }

    /// Ordering used to drop out-of-order deliveries for one payment id.
    pub fn precedence(&self) -> u8 {
        match self {
            PaymentStatus::Pending => 0,
            PaymentStatus::InProcess => 1,
            PaymentStatus::Rejected => 2,
            PaymentStatus::Approved => 3,
            PaymentStatus::Refunded => 4,
        }
    }

    /// Maps a raw provider status onto the internal payment status.
    /// Returns `None` for statuses the reconciliation ignores.
    pub fn from_provider(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(PaymentStatus::Approved),
            "pending" | "in_process" | "authorized" | "in_mediation" => {
                Some(PaymentStatus::InProcess)
            }
            "rejected" | "cancelled" => Some(PaymentStatus::Rejected),
            "refunded" | "charged_back" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}
