pub mod conflict;
pub mod error;
pub mod events;
pub mod hours;
pub mod pricing;
pub mod reservation;
pub mod time_window;

pub use error::{BookingError, BookingResult};
pub use events::{BookingNotification, PaymentEvent, PaymentEventKind, PAYMENT_WEBHOOK_SCOPE};
pub use hours::BusinessHours;
pub use pricing::{ChargeKind, FeeTable, LineItem, PaymentPolicy, PricingSnapshot, ServiceFee, ServiceType};
pub use reservation::{
    new_public_id, Customer, PaymentSession, Reservation, ReservationStatus, StatusChange,
};
pub use time_window::{Slot, TimeWindowResolver};
