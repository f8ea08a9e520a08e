//! Abstract seams to the external collaborators of the flow.
//!
//! The core never talks to a real OTP gateway, capacity ledger, or SMS
//! transport; concrete backends implement these traits and the flow stays
//! testable against the in-memory versions in [`super::mocks`].

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use super::domain::{
    OtpChallenge, PhoneNumber, RegistrationForm, RegistrationResult, SlotStatus, WorkshopTime,
};
use super::validation::FieldError;

/// Sends OTP challenges and verifies submitted codes.
#[async_trait]
pub trait VerificationService: Send + Sync {
    /// Issue a fresh challenge for `phone`, superseding any outstanding one.
    async fn request_otp(&self, phone: &PhoneNumber) -> Result<OtpChallenge, VerifyError>;

    /// Check `code` against the outstanding challenge and consume it.
    async fn verify_otp(&self, phone: &PhoneNumber, code: &str) -> Result<(), VerifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("not a valid subscriber number")]
    InvalidPhone,
    #[error("verification codes are six digits")]
    InvalidFormat,
    #[error("code does not match the outstanding challenge")]
    CodeMismatch,
    #[error("challenge was superseded or already consumed")]
    Expired,
    #[error("verification backend unavailable: {0}")]
    Unavailable(String),
}

/// Reports remaining capacity for a bookable (date, time) slot.
///
/// Real backends must key their ledger by (date, time) and decrement
/// atomically when a registration lands; the demo mock is stateless.
#[async_trait]
pub trait CapacityService: Send + Sync {
    async fn slot_status(
        &self,
        date: NaiveDate,
        time: WorkshopTime,
    ) -> Result<SlotStatus, CapacityError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapacityError {
    #[error("capacity backend unavailable: {0}")]
    Unavailable(String),
}

/// Accepts a finished registration and triggers the confirmation message.
///
/// Implementations re-validate the draft and re-fetch slot availability at
/// submit time, closing the race between the slot being shown as available
/// and the registration landing.
#[async_trait]
pub trait RegistrationService: Send + Sync {
    async fn submit(&self, form: &RegistrationForm) -> Result<RegistrationResult, RegistrationError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Validation(#[from] FieldError),
    #[error("no capacity left for the requested slot")]
    SlotUnavailable,
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error("registration backend unavailable: {0}")]
    Unavailable(String),
}

/// Outbound confirmation hook so demos and tests can observe deliveries.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, message: ConfirmationSms) -> Result<(), NotifyError>;
}

/// Confirmation message payload addressed to the registering parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationSms {
    pub to: PhoneNumber,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}
