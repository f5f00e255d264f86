// Booking core for a boutique hotel: catalog, pricing, booking wizard and the
// gateway it submits confirmed bookings to

pub mod catalog;
pub mod config;
pub mod dining;
pub mod gateway;
pub mod pricing;
pub mod reference;
pub mod wizard;

// Re-export key types for convenience
pub use catalog::{CatalogError, Room, RoomCatalog};
pub use config::{BookingConfig, ConfigError, RetryConfig};
pub use dining::{DiningError, DiningOrder, MenuCategory, MenuItem};
pub use gateway::{
    BookingGateway, BookingRecord, BookingSubmission, HttpGateway, PaymentError,
    SimulatedGateway,
};
pub use pricing::{compute_totals, FeePolicy, PriceBreakdown};
pub use reference::{BookingReference, ReferenceError};
pub use wizard::{
    BookingDraft, BookingWizard, Clock, FixedClock, SystemClock, WizardError, WizardStatus,
    WizardStep,
};
