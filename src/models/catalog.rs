use serde::Serialize;

use super::SubscriptionPlan;

#[derive(Debug, Clone, Serialize)]
pub struct ServiceOffering {
    pub id: String,
    pub name: String,
    pub base_price_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VehicleType {
    pub id: String,
    pub name: String,
    pub extra_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Addon {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    pub services: Vec<ServiceOffering>,
    pub vehicle_types: Vec<VehicleType>,
    pub addons: Vec<Addon>,
    pub plans: Vec<SubscriptionPlan>,
}
