//! Guided registration flow for the promotional workshop event.
//!
//! One participant traverses Login → OtpPending → OtpVerify → FormEntry →
//! SlotCheck → Completion. The controller owns the per-flow state, the
//! validation module gates each transition, and the three service traits are
//! the seams to the real backends (mocked in [`mocks`] for demos and tests).

pub mod controller;
pub mod domain;
pub mod mocks;
pub mod router;
pub mod services;
pub mod validation;

#[cfg(test)]
mod tests;

pub use controller::{FlowController, FlowError, FormPatch};
pub use domain::{
    CompletedForm, FlowConfig, FlowStep, Notice, NoticeKind, OtpChallenge, PhoneNumber,
    ReceiptUpload, RegistrationForm, RegistrationResult, Session, SlotStatus, WorkshopTime,
};
pub use mocks::{
    RecordingSink, SimulatedRegistration, SimulatedVerification, SimulationConfig, StaticCapacity,
};
pub use router::{registration_router, FlowRegistry, FlowView};
pub use services::{
    CapacityError, CapacityService, ConfirmationSms, NotificationSink, NotifyError,
    RegistrationError, RegistrationService, VerificationService, VerifyError,
};
pub use validation::{validate_form, Field, FieldError, InvalidReason};
