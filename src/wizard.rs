// Booking wizard: Dates -> Guests -> Payment -> Confirmation
//
// One wizard owns one draft. All edits go through `&mut self`, so the only
// suspension point is the gateway call made while advancing from Payment.

use crate::catalog::{CatalogError, Room};
use crate::config::BookingConfig;
use crate::gateway::{BookingGateway, BookingRecord, BookingSubmission, PaymentError};
use crate::pricing::{compute_optional_totals, nights_between, PriceBreakdown};
use crate::reference::BookingReference;
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WizardError {
    #[error("Check-in and check-out must span at least one night")]
    IncompleteDateRange,

    #[error("Guest count and contact details are required")]
    IncompleteGuestDetails,

    #[error("Check-in {date} is before the earliest bookable day {earliest}")]
    CheckInInPast { date: NaiveDate, earliest: NaiveDate },

    #[error("Check-out {check_out} must be after {after}")]
    CheckOutNotAfterCheckIn {
        check_out: NaiveDate,
        after: NaiveDate,
    },

    #[error("Cannot {action} from step {step:?}")]
    InvalidTransition {
        step: WizardStep,
        action: &'static str,
    },

    #[error("Payment failed: {0}")]
    Payment(#[from] PaymentError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WizardStep {
    Dates,
    Guests,
    Payment,
    Confirmation,
}

impl WizardStep {
    pub const ALL: [WizardStep; 4] = [
        WizardStep::Dates,
        WizardStep::Guests,
        WizardStep::Payment,
        WizardStep::Confirmation,
    ];

    pub fn index(self) -> usize {
        match self {
            WizardStep::Dates => 0,
            WizardStep::Guests => 1,
            WizardStep::Payment => 2,
            WizardStep::Confirmation => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            WizardStep::Dates => "Dates",
            WizardStep::Guests => "Details",
            WizardStep::Payment => "Payment",
            WizardStep::Confirmation => "Done",
        }
    }

    pub fn next(self) -> Option<Self> {
        Self::ALL.get(self.index() + 1).copied()
    }

    pub fn previous(self) -> Option<Self> {
        self.index().checked_sub(1).map(|i| Self::ALL[i])
    }
}

pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingDraft {
    pub room_id: String,
    pub check_in: Option<NaiveDate>,
    pub check_out: Option<NaiveDate>,
    pub guest_count: u32,
    pub guest_name: String,
    pub guest_email: String,
    pub guest_phone: String,
}

impl BookingDraft {
    pub fn new(room_id: &str) -> Self {
        Self {
            room_id: room_id.to_string(),
            check_in: None,
            check_out: None,
            guest_count: 1,
            guest_name: String::new(),
            guest_email: String::new(),
            guest_phone: String::new(),
        }
    }

    pub fn nights(&self) -> u32 {
        match (self.check_in, self.check_out) {
            (Some(check_in), Some(check_out)) => nights_between(check_in, check_out),
            _ => 0,
        }
    }

    pub fn has_date_range(&self) -> bool {
        self.nights() >= 1
    }

    // Whitespace-only counts as missing
    pub fn has_guest_details(&self) -> bool {
        [&self.guest_name, &self.guest_email, &self.guest_phone]
            .iter()
            .all(|field| !field.trim().is_empty())
    }
}

// Snapshot published to observers after every change
#[derive(Debug, Clone, PartialEq)]
pub struct WizardStatus {
    pub step: WizardStep,
    pub processing: bool,
    pub can_advance: bool,
    pub totals: PriceBreakdown,
    pub reference: Option<BookingReference>,
    pub last_error: Option<PaymentError>,
}

// Clears the processing flag even if the in-flight advance() future is dropped
struct ProcessingGuard<'a> {
    wizard: &'a mut BookingWizard,
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.wizard.processing = false;
        self.wizard.publish();
    }
}

pub struct BookingWizard {
    room: Room,
    config: BookingConfig,
    gateway: Arc<dyn BookingGateway>,
    clock: Arc<dyn Clock>,
    draft: BookingDraft,
    step: WizardStep,
    processing: bool,
    // Reused across retries of the same draft so it can serve as an idempotency key
    pending_reference: Option<BookingReference>,
    record: Option<BookingRecord>,
    last_error: Option<PaymentError>,
    status_tx: watch::Sender<WizardStatus>,
}

impl BookingWizard {
    /// Starts a fresh draft for `room`. Rooms flagged unavailable are refused
    /// with [`CatalogError::RoomUnavailable`].
    pub fn open(
        room: Room,
        gateway: Arc<dyn BookingGateway>,
        config: BookingConfig,
    ) -> Result<Self, CatalogError> {
        Self::with_clock(room, gateway, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        room: Room,
        gateway: Arc<dyn BookingGateway>,
        config: BookingConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CatalogError> {
        if !room.available {
            return Err(CatalogError::RoomUnavailable(room.id));
        }
        let draft = BookingDraft::new(&room.id);
        let initial = WizardStatus {
            step: WizardStep::Dates,
            processing: false,
            can_advance: false,
            totals: PriceBreakdown::default(),
            reference: None,
            last_error: None,
        };
        let (status_tx, _) = watch::channel(initial);

        info!(room_id = %room.id, "Booking wizard opened");
        Ok(Self {
            room,
            config,
            gateway,
            clock,
            draft,
            step: WizardStep::Dates,
            processing: false,
            pending_reference: None,
            record: None,
            last_error: None,
            status_tx,
        })
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn draft(&self) -> &BookingDraft {
        &self.draft
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn record(&self) -> Option<&BookingRecord> {
        self.record.as_ref()
    }

    pub fn booking_reference(&self) -> Option<&BookingReference> {
        self.record.as_ref().map(|record| record.reference())
    }

    pub fn last_error(&self) -> Option<&PaymentError> {
        self.last_error.as_ref()
    }

    pub fn totals(&self) -> PriceBreakdown {
        compute_optional_totals(
            self.room.price,
            self.draft.check_in,
            self.draft.check_out,
            &self.config.fee_policy,
        )
    }

    pub fn can_advance(&self) -> bool {
        match self.step {
            WizardStep::Dates => self.draft.has_date_range(),
            WizardStep::Guests => self.guests_complete(),
            WizardStep::Payment => {
                !self.processing && self.draft.has_date_range() && self.guests_complete()
            }
            WizardStep::Confirmation => false,
        }
    }

    pub fn can_go_back(&self) -> bool {
        matches!(self.step, WizardStep::Guests | WizardStep::Payment) && !self.processing
    }

    pub fn status(&self) -> WizardStatus {
        WizardStatus {
            step: self.step,
            processing: self.processing,
            can_advance: self.can_advance(),
            totals: self.totals(),
            reference: self
                .booking_reference()
                .or(self.pending_reference.as_ref())
                .cloned(),
            last_error: self.last_error.clone(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<WizardStatus> {
        self.status_tx.subscribe()
    }

    // The earliest check-in the calendar offers
    pub fn earliest_check_in(&self) -> NaiveDate {
        let today = self.clock.today();
        if self.config.allow_same_day_check_in {
            today
        } else {
            today.succ_opt().unwrap_or(today)
        }
    }

    pub fn set_check_in(&mut self, date: NaiveDate) -> Result<(), WizardError> {
        self.ensure_editable("change dates")?;

        let earliest = self.earliest_check_in();
        if date < earliest {
            return Err(WizardError::CheckInInPast { date, earliest });
        }

        self.draft.check_in = Some(date);
        if self.draft.check_out.map_or(true, |check_out| check_out <= date) {
            self.draft.check_out = date.succ_opt();
            debug!(check_in = %date, check_out = ?self.draft.check_out, "Check-out moved after check-in");
        }

        self.draft_changed();
        Ok(())
    }

    pub fn set_check_out(&mut self, date: NaiveDate) -> Result<(), WizardError> {
        self.ensure_editable("change dates")?;

        let after = self.draft.check_in.unwrap_or_else(|| self.clock.today());
        if date <= after {
            return Err(WizardError::CheckOutNotAfterCheckIn {
                check_out: date,
                after,
            });
        }

        self.draft.check_out = Some(date);
        self.draft_changed();
        Ok(())
    }

    /// Sets the party size, clamped into `1..=capacity`. Returns the value applied.
    pub fn set_guest_count(&mut self, requested: u32) -> Result<u32, WizardError> {
        self.ensure_editable("change guests")?;

        let applied = requested.clamp(1, self.room.capacity);
        if applied != requested {
            debug!(requested, applied, capacity = self.room.capacity, "Guest count clamped");
        }

        self.draft.guest_count = applied;
        self.draft_changed();
        Ok(applied)
    }

    pub fn increment_guests(&mut self) -> Result<u32, WizardError> {
        self.set_guest_count(self.draft.guest_count.saturating_add(1))
    }

    pub fn decrement_guests(&mut self) -> Result<u32, WizardError> {
        self.set_guest_count(self.draft.guest_count.saturating_sub(1))
    }

    pub fn set_guest_details(
        &mut self,
        name: impl Into<String>,
        email: impl Into<String>,
        phone: impl Into<String>,
    ) -> Result<(), WizardError> {
        self.ensure_editable("change guest details")?;

        self.draft.guest_name = name.into();
        self.draft.guest_email = email.into();
        self.draft.guest_phone = phone.into();
        self.draft_changed();
        Ok(())
    }

    /// Moves one step forward. From Payment this submits the booking and
    /// only returns once the gateway has answered.
    pub async fn advance(&mut self) -> Result<WizardStep, WizardError> {
        match self.step {
            WizardStep::Dates => {
                if !self.draft.has_date_range() {
                    return Err(WizardError::IncompleteDateRange);
                }
                Ok(self.move_to(WizardStep::Guests))
            }
            WizardStep::Guests => {
                if !self.guests_complete() {
                    return Err(WizardError::IncompleteGuestDetails);
                }
                Ok(self.move_to(WizardStep::Payment))
            }
            WizardStep::Payment => self.confirm().await,
            WizardStep::Confirmation => Err(WizardError::InvalidTransition {
                step: self.step,
                action: "advance",
            }),
        }
    }

    pub fn back(&mut self) -> Result<WizardStep, WizardError> {
        let previous = match self.step {
            WizardStep::Guests | WizardStep::Payment => self.step.previous(),
            WizardStep::Dates | WizardStep::Confirmation => None,
        };

        match previous {
            Some(step) => {
                self.pending_reference = None;
                Ok(self.move_to(step))
            }
            None => Err(WizardError::InvalidTransition {
                step: self.step,
                action: "go back",
            }),
        }
    }

    // Closing the wizard discards the draft
    pub fn cancel(self) {
        info!(room_id = %self.room.id, step = ?self.step, "Booking wizard cancelled");
    }

    // Closing after confirmation hands back the record for display
    pub fn close(self) -> Option<BookingRecord> {
        debug!(room_id = %self.room.id, step = ?self.step, "Booking wizard closed");
        self.record
    }

    async fn confirm(&mut self) -> Result<WizardStep, WizardError> {
        // Draft may have been edited while on Payment
        let (Some(check_in), Some(check_out)) = (self.draft.check_in, self.draft.check_out) else {
            return Err(WizardError::IncompleteDateRange);
        };
        if !self.draft.has_date_range() {
            return Err(WizardError::IncompleteDateRange);
        }
        if !self.guests_complete() {
            return Err(WizardError::IncompleteGuestDetails);
        }

        let prefix = self.config.brand_prefix.clone();
        let reference = self
            .pending_reference
            .get_or_insert_with(|| BookingReference::generate(&prefix))
            .clone();
        let submission = self.submission(reference.clone(), check_in, check_out);
        let gateway = Arc::clone(&self.gateway);
        let timeout = self.config.submission_timeout();

        self.processing = true;
        self.last_error = None;
        self.publish();
        info!(room_id = %self.room.id, reference = %reference, "Submitting booking");

        let result = {
            let _guard = ProcessingGuard { wizard: &mut *self };
            match tokio::time::timeout(timeout, gateway.submit_booking(submission)).await {
                Ok(result) => result,
                Err(_) => Err(PaymentError::Timeout(timeout.as_millis() as u64)),
            }
        };

        match result {
            Ok(record) => {
                info!(reference = %record.reference(), "Booking confirmed");
                self.record = Some(record);
                self.pending_reference = None;
                Ok(self.move_to(WizardStep::Confirmation))
            }
            Err(e) => {
                warn!(reference = %reference, error = %e, "Booking payment failed");
                self.last_error = Some(e.clone());
                self.publish();
                Err(WizardError::Payment(e))
            }
        }
    }

    fn submission(
        &self,
        reference: BookingReference,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> BookingSubmission {
        let totals = self.totals();
        BookingSubmission {
            reference,
            room_id: self.room.id.clone(),
            room_name: self.room.name.clone(),
            check_in,
            check_out,
            nights: totals.nights,
            guest_count: self.draft.guest_count,
            guest_name: self.draft.guest_name.trim().to_string(),
            guest_email: self.draft.guest_email.trim().to_string(),
            guest_phone: self.draft.guest_phone.trim().to_string(),
            final_price: totals.total,
        }
    }

    fn guests_complete(&self) -> bool {
        (1..=self.room.capacity).contains(&self.draft.guest_count) && self.draft.has_guest_details()
    }

    fn ensure_editable(&self, action: &'static str) -> Result<(), WizardError> {
        if self.step == WizardStep::Confirmation {
            return Err(WizardError::InvalidTransition {
                step: self.step,
                action,
            });
        }
        Ok(())
    }

    fn draft_changed(&mut self) {
        // A different draft must not reuse the previous idempotency key
        self.pending_reference = None;
        self.publish();
    }

    fn move_to(&mut self, step: WizardStep) -> WizardStep {
        debug!(from = ?self.step, to = ?step, "Wizard step changed");
        self.step = step;
        self.publish();
        step
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status());
    }
}
