pub mod booking;
pub mod branch;
pub mod payment;
pub mod session;
pub mod slot;
pub mod webhook;

pub use booking::{Booking, BookingStatus};
pub use branch::{Branch, Service, Stylist};
pub use payment::{Payment, PaymentMethod, PaymentStatus, RefundAuthorization};
pub use session::{CalendarKind, ExternalSession, SessionStatus};
pub use slot::Slot;
pub use webhook::{EventEnvelope, WebhookLog, WebhookProvider, WebhookStatus};
