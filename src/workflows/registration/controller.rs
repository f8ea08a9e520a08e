//! The flow state machine.
//!
//! [`FlowController`] owns the session and the form draft for one end-to-end
//! traversal. Every mutation goes through a named transition operation;
//! operations called out of order are rejected, so the only reachable
//! transitions are the ones written down here.

use std::future::Future;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::time::timeout;
use tracing::{info, warn};

use super::domain::{
    FlowConfig, FlowStep, Notice, PhoneNumber, ReceiptUpload, RegistrationForm,
    RegistrationResult, Session, SlotStatus, WorkshopTime,
};
use super::services::{
    CapacityError, CapacityService, RegistrationError, RegistrationService, VerificationService,
    VerifyError,
};
use super::validation::{self, Field, FieldError, InvalidReason, validate_form};

/// Error raised by a flow transition.
///
/// Every variant is recoverable: the controller lands in a well-defined step
/// and records the single user-facing notice before returning.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("{action} is not allowed in step {from}")]
    InvalidTransition {
        from: FlowStep,
        action: &'static str,
    },
    #[error(transparent)]
    Validation(#[from] FieldError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("no capacity left for the requested slot")]
    SlotUnavailable,
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// Single-field edits applied to the form draft while in the form step.
#[derive(Debug, Clone, Default)]
pub struct FormPatch {
    pub child_name: Option<String>,
    pub child_age: Option<String>,
    pub workshop_date: Option<NaiveDate>,
    pub workshop_time: Option<WorkshopTime>,
    pub parent_phone: Option<String>,
    pub receipt: Option<ReceiptUpload>,
}

/// Orchestrates one traversal of the registration flow.
pub struct FlowController<V, C, R> {
    config: FlowConfig,
    verification: Arc<V>,
    capacity: Arc<C>,
    registration: Arc<R>,
    session: Session,
    form: RegistrationForm,
    slot_status: Option<SlotStatus>,
    last_notice: Option<Notice>,
    result: Option<RegistrationResult>,
}

impl<V, C, R> FlowController<V, C, R>
where
    V: VerificationService,
    C: CapacityService,
    R: RegistrationService,
{
    pub fn new(
        config: FlowConfig,
        verification: Arc<V>,
        capacity: Arc<C>,
        registration: Arc<R>,
    ) -> Self {
        Self {
            config,
            verification,
            capacity,
            registration,
            session: Session::new(),
            form: RegistrationForm::default(),
            slot_status: None,
            last_notice: None,
            result: None,
        }
    }

    pub fn step(&self) -> FlowStep {
        self.session.step
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn form(&self) -> &RegistrationForm {
        &self.form
    }

    pub fn slot_status(&self) -> Option<SlotStatus> {
        self.slot_status
    }

    pub fn last_notice(&self) -> Option<&Notice> {
        self.last_notice.as_ref()
    }

    pub fn result(&self) -> Option<&RegistrationResult> {
        self.result.as_ref()
    }

    /// Enter the flow from the login step.
    ///
    /// With the OTP gate on, a challenge is requested for `phone` and the
    /// flow moves to code entry; without it the flow goes straight to the
    /// form, as the no-login variant of the event does.
    pub async fn begin(&mut self, phone: &str) -> Result<FlowStep, FlowError> {
        self.expect_step(FlowStep::Login, "begin")?;

        let phone = match PhoneNumber::parse(phone) {
            Ok(phone) => phone,
            Err(_reason) => {
                self.last_notice = Some(Notice::error(
                    "Enter a valid phone number of at least 9 digits",
                ));
                return Err(FlowError::Verify(VerifyError::InvalidPhone));
            }
        };

        self.session.phone = Some(phone.clone());

        if !self.config.requires_otp {
            self.session.step = FlowStep::FormEntry;
            self.last_notice = Some(Notice::info("Fill in the registration form"));
            info!(phone = %phone, "flow entered without verification gate");
            return Ok(self.session.step);
        }

        let verification = Arc::clone(&self.verification);
        let outcome = self
            .bounded("otp request", verification.request_otp(&phone))
            .await;
        match outcome {
            Ok(_challenge) => {
                self.session.step = FlowStep::OtpPending;
                self.last_notice = Some(Notice::info(format!(
                    "Verification code sent to {}",
                    phone.with_country_code()
                )));
                info!(phone = %phone, "otp challenge requested");
                Ok(self.session.step)
            }
            Err(error) => {
                self.fail_recoverable(&error);
                Err(error)
            }
        }
    }

    /// Check the submitted code and open the form on success.
    pub async fn verify(&mut self, code: &str) -> Result<FlowStep, FlowError> {
        self.expect_step(FlowStep::OtpPending, "verify")?;
        let Some(phone) = self.session.phone.clone() else {
            return Err(FlowError::InvalidTransition {
                from: self.session.step,
                action: "verify",
            });
        };

        if validation::validate_otp_code(code).is_err() {
            self.last_notice = Some(Notice::error("Verification codes are six digits"));
            return Err(FlowError::Verify(VerifyError::InvalidFormat));
        }

        self.session.step = FlowStep::OtpVerify;
        let verification = Arc::clone(&self.verification);
        let outcome = self
            .bounded("otp verification", verification.verify_otp(&phone, code))
            .await;
        match outcome {
            Ok(()) => {
                self.session.otp_verified = true;
                self.session.step = FlowStep::FormEntry;
                self.last_notice = Some(Notice::success("Phone number verified"));
                info!(phone = %phone, "otp verified");
                Ok(self.session.step)
            }
            Err(FlowError::Verify(VerifyError::Expired)) => {
                // A superseded or consumed challenge forces a fresh request.
                let verification = Arc::clone(&self.verification);
                let reissued = self
                    .bounded("otp request", verification.request_otp(&phone))
                    .await;
                match reissued {
                    Ok(_challenge) => {
                        self.session.step = FlowStep::OtpPending;
                        self.last_notice =
                            Some(Notice::error("That code expired. A new one was sent."));
                        Err(FlowError::Verify(VerifyError::Expired))
                    }
                    Err(error) => {
                        self.session.step = FlowStep::Login;
                        self.fail_recoverable(&error);
                        Err(error)
                    }
                }
            }
            Err(error @ FlowError::Verify(_)) => {
                self.session.step = FlowStep::OtpPending;
                self.last_notice = Some(Notice::error(
                    "The verification code was not accepted. Try again.",
                ));
                Err(error)
            }
            Err(error) => {
                self.session.step = FlowStep::OtpPending;
                self.fail_recoverable(&error);
                Err(error)
            }
        }
    }

    /// Apply field edits to the draft. Only allowed while the form is open.
    pub fn update_form(&mut self, patch: FormPatch) -> Result<(), FlowError> {
        self.expect_step(FlowStep::FormEntry, "update form")?;

        let FormPatch {
            child_name,
            child_age,
            workshop_date,
            workshop_time,
            parent_phone,
            receipt,
        } = patch;

        if let Some(value) = child_name {
            self.form.child_name = value;
        }
        if let Some(value) = child_age {
            self.form.child_age = value;
        }
        if let Some(value) = workshop_date {
            self.form.workshop_date = Some(value);
        }
        if let Some(value) = workshop_time {
            self.form.workshop_time = Some(value);
        }
        if let Some(value) = parent_phone {
            self.form.parent_phone = value;
        }
        if let Some(value) = receipt {
            self.form.receipt = Some(value);
        }

        Ok(())
    }

    /// Validate the draft and advance to the slot availability step.
    ///
    /// The slot status for the chosen (date, time) is fetched on entry so
    /// the caller has something to display.
    pub async fn submit_form(&mut self) -> Result<FlowStep, FlowError> {
        self.expect_step(FlowStep::FormEntry, "submit form")?;

        let completed = match validate_form(&self.form) {
            Ok(completed) => completed,
            Err(error) => {
                self.last_notice = Some(notice_for(error));
                return Err(FlowError::Validation(error));
            }
        };

        let capacity = Arc::clone(&self.capacity);
        let outcome = self
            .bounded(
                "slot lookup",
                capacity.slot_status(completed.workshop_date, completed.workshop_time),
            )
            .await;
        match outcome {
            Ok(status) => {
                self.slot_status = Some(status);
                self.session.step = FlowStep::SlotCheck;
                self.last_notice = Some(Notice::info(format!(
                    "{} of {} slots remaining for {} at {}",
                    status.remaining,
                    status.total,
                    completed.workshop_date,
                    completed.workshop_time.label()
                )));
                Ok(self.session.step)
            }
            Err(error) => {
                self.fail_recoverable(&error);
                Err(error)
            }
        }
    }

    /// Re-check availability and submit the registration.
    ///
    /// The re-fetch happens after the most recent form validation and before
    /// the registration lands, so a slot that filled up since the check in
    /// [`Self::submit_form`] bounces the flow back to the form.
    pub async fn confirm(&mut self) -> Result<FlowStep, FlowError> {
        self.expect_step(FlowStep::SlotCheck, "confirm")?;

        let completed = match validate_form(&self.form) {
            Ok(completed) => completed,
            Err(error) => {
                self.session.step = FlowStep::FormEntry;
                self.last_notice = Some(notice_for(error));
                return Err(FlowError::Validation(error));
            }
        };

        let capacity = Arc::clone(&self.capacity);
        let lookup = self
            .bounded(
                "slot lookup",
                capacity.slot_status(completed.workshop_date, completed.workshop_time),
            )
            .await;
        let status = match lookup {
            Ok(status) => status,
            Err(error) => {
                self.fail_recoverable(&error);
                return Err(error);
            }
        };
        self.slot_status = Some(status);

        if !status.is_available() {
            self.session.step = FlowStep::FormEntry;
            self.last_notice = Some(Notice::error(
                "No slots left for the chosen time. Please pick another.",
            ));
            warn!(
                date = %completed.workshop_date,
                time = completed.workshop_time.starts_at(),
                "slot filled up before confirmation"
            );
            return Err(FlowError::SlotUnavailable);
        }

        let registration = Arc::clone(&self.registration);
        let outcome = self
            .bounded("registration submit", registration.submit(&self.form))
            .await;
        match outcome {
            Ok(result) => {
                self.last_notice = Some(Notice::success(format!(
                    "Registration complete. A confirmation SMS is on its way to {}",
                    result.confirmation_sent_to.with_country_code()
                )));
                self.session.step = FlowStep::Completion;
                self.result = Some(result);
                info!("registration accepted");
                Ok(self.session.step)
            }
            Err(error @ FlowError::SlotUnavailable) => {
                self.session.step = FlowStep::FormEntry;
                self.last_notice = Some(Notice::error(
                    "No slots left for the chosen time. Please pick another.",
                ));
                Err(error)
            }
            Err(FlowError::Validation(field_error)) => {
                self.session.step = FlowStep::FormEntry;
                self.last_notice = Some(notice_for(field_error));
                Err(FlowError::Validation(field_error))
            }
            Err(error) => {
                self.fail_recoverable(&error);
                Err(error)
            }
        }
    }

    /// Explicit back action: code entry returns to login, the slot step
    /// returns to the form.
    ///
    /// No validated data is discarded and no request is re-triggered; a
    /// verification finishing for the abandoned challenge is rejected as
    /// expired rather than applied.
    pub fn back(&mut self) -> Result<FlowStep, FlowError> {
        match self.session.step {
            FlowStep::OtpPending | FlowStep::OtpVerify => {
                self.session.otp_verified = false;
                self.session.step = FlowStep::Login;
                Ok(self.session.step)
            }
            FlowStep::SlotCheck => {
                self.session.step = FlowStep::FormEntry;
                Ok(self.session.step)
            }
            from => Err(FlowError::InvalidTransition {
                from,
                action: "back",
            }),
        }
    }

    /// Abandon the current traversal and start over with a cleared session.
    pub fn reset(&mut self) -> FlowStep {
        self.session = Session::new();
        self.form = RegistrationForm::default();
        self.slot_status = None;
        self.last_notice = None;
        self.result = None;
        self.session.step
    }

    fn expect_step(&self, expected: FlowStep, action: &'static str) -> Result<(), FlowError> {
        if self.session.step == expected {
            Ok(())
        } else {
            Err(FlowError::InvalidTransition {
                from: self.session.step,
                action,
            })
        }
    }

    /// Run one service call bounded by the configured timeout, folding
    /// transport errors into [`FlowError`].
    async fn bounded<T, E, F>(&self, action: &'static str, call: F) -> Result<T, FlowError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<FlowError>,
    {
        match timeout(self.config.call_timeout, call).await {
            Ok(result) => result.map_err(Into::into),
            Err(_) => Err(FlowError::Timeout(action)),
        }
    }

    fn fail_recoverable(&mut self, error: &FlowError) {
        warn!(%error, step = %self.session.step, "service call failed");
        self.last_notice = Some(Notice::error(
            "Service temporarily unavailable. Please try again.",
        ));
    }
}

impl From<CapacityError> for FlowError {
    fn from(value: CapacityError) -> Self {
        let CapacityError::Unavailable(message) = value;
        Self::Unavailable(message)
    }
}

impl From<RegistrationError> for FlowError {
    fn from(value: RegistrationError) -> Self {
        match value {
            RegistrationError::Validation(error) => Self::Validation(error),
            RegistrationError::SlotUnavailable => Self::SlotUnavailable,
            RegistrationError::Notify(error) => Self::Unavailable(error.to_string()),
            RegistrationError::Unavailable(message) => Self::Unavailable(message),
        }
    }
}

/// Single-notice message for a failed field, mirroring the one-toast-at-a-time
/// reporting of the registration form.
fn notice_for(error: FieldError) -> Notice {
    let text = match (error.field, error.reason) {
        (Field::ChildName, _) => "Enter the child's full name",
        (Field::ChildAge, _) => "Child age must be between 3 and 15",
        (Field::WorkshopDate, _) => "Choose a workshop date",
        (Field::WorkshopTime, _) => "Choose a workshop time",
        (Field::ParentPhone, _) | (Field::Phone, _) => "Enter a valid contact phone number",
        (Field::Receipt, InvalidReason::TooLarge) => "Receipt photo must be under 5 MB",
        (Field::Receipt, InvalidReason::BadType) => "Receipt photo must be a JPG or PNG",
        (Field::Receipt, _) => "Upload a receipt photo",
        (Field::OtpCode, _) => "Verification codes are six digits",
    };
    Notice::error(text)
}
