pub mod availability;
pub mod booking;
pub mod catalog;
pub mod event;
pub mod invoice;
pub mod payment;
pub mod subscription;

pub use availability::{BusinessHours, DayAvailability, DaySchedule, SlotStatus, SlotView};
pub use booking::{Booking, BookingDraft, BookingStatus, PaymentMethod, PaymentStatus, PriceBreakdown};
pub use catalog::{Addon, Catalog, ServiceOffering, VehicleType};
pub use event::{DomainEvent, PendingEvent};
pub use invoice::{Invoice, InvoiceRequest};
pub use payment::{
    CheckoutRequest, CheckoutSession, EntityRef, EntityType, PaymentMetadata, ProviderPayment,
    WebhookData, WebhookEvent,
};
pub use subscription::{Subscription, SubscriptionPlan, SubscriptionSignup, SubscriptionStatus};
