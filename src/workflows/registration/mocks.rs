//! In-memory service implementations simulating the real backends.
//!
//! Latencies are injected so the HTTP demo feels like a network round trip
//! while tests run with [`SimulationConfig::instant`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::time::sleep;
use tracing::warn;

use super::domain::{
    OtpChallenge, PhoneNumber, RegistrationForm, RegistrationResult, SlotStatus, WorkshopTime,
};
use super::services::{
    CapacityError, CapacityService, ConfirmationSms, NotificationSink, NotifyError,
    RegistrationError, RegistrationService, VerificationService, VerifyError,
};
use super::validation::{self, validate_form};

/// Tunable delays for the simulated backends.
#[derive(Debug, Clone, Copy)]
pub struct SimulationConfig {
    /// Round-trip latency applied to every simulated call.
    pub latency: Duration,
    /// Delay before the confirmation message goes out after a registration.
    pub confirmation_delay: Duration,
}

impl SimulationConfig {
    /// Zero-latency settings for tests.
    pub const fn instant() -> Self {
        Self {
            latency: Duration::ZERO,
            confirmation_delay: Duration::ZERO,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(1500),
            confirmation_delay: Duration::from_millis(2000),
        }
    }
}

static CHALLENGE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_challenge_code() -> String {
    let seq = CHALLENGE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{:06}", (seq * 9973) % 1_000_000)
}

/// Verification backend keeping one outstanding challenge per phone.
///
/// Verification accepts any well-formed six-digit code while a live challenge
/// exists. That permissiveness is a demo stand-in, not a template for a real
/// verifier; `CodeMismatch` stays reserved for backends that compare codes.
#[derive(Default)]
pub struct SimulatedVerification {
    config: SimulationConfig,
    challenges: Mutex<HashMap<PhoneNumber, OtpChallenge>>,
}

impl SimulatedVerification {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            challenges: Mutex::new(HashMap::new()),
        }
    }

    /// Outstanding challenge for `phone`, if any.
    pub fn outstanding(&self, phone: &PhoneNumber) -> Option<OtpChallenge> {
        let guard = self.challenges.lock().expect("challenge mutex poisoned");
        guard.get(phone).cloned()
    }
}

#[async_trait]
impl VerificationService for SimulatedVerification {
    async fn request_otp(&self, phone: &PhoneNumber) -> Result<OtpChallenge, VerifyError> {
        validation::validate_phone(phone.digits()).map_err(|_| VerifyError::InvalidPhone)?;

        sleep(self.config.latency).await;

        let challenge = OtpChallenge {
            phone: phone.clone(),
            code: next_challenge_code(),
            issued_at: Utc::now(),
            consumed: false,
        };

        let mut guard = self.challenges.lock().expect("challenge mutex poisoned");
        guard.insert(phone.clone(), challenge.clone());
        Ok(challenge)
    }

    async fn verify_otp(&self, phone: &PhoneNumber, code: &str) -> Result<(), VerifyError> {
        validation::validate_otp_code(code).map_err(|_| VerifyError::InvalidFormat)?;

        sleep(self.config.latency).await;

        let mut guard = self.challenges.lock().expect("challenge mutex poisoned");
        match guard.get_mut(phone) {
            Some(challenge) if !challenge.consumed => {
                challenge.consumed = true;
                Ok(())
            }
            _ => Err(VerifyError::Expired),
        }
    }
}

/// Capacity backend returning a fixed status regardless of the queried slot.
pub struct StaticCapacity {
    config: SimulationConfig,
    status: SlotStatus,
}

impl StaticCapacity {
    pub fn new(status: SlotStatus, config: SimulationConfig) -> Self {
        Self { config, status }
    }

    pub fn sold_out(config: SimulationConfig) -> Self {
        Self::new(SlotStatus::new(0, 20), config)
    }
}

impl Default for StaticCapacity {
    fn default() -> Self {
        Self::new(SlotStatus::new(12, 20), SimulationConfig::default())
    }
}

#[async_trait]
impl CapacityService for StaticCapacity {
    async fn slot_status(
        &self,
        _date: NaiveDate,
        _time: WorkshopTime,
    ) -> Result<SlotStatus, CapacityError> {
        sleep(self.config.latency).await;
        Ok(self.status)
    }
}

/// Registration backend that re-checks capacity at submit time and schedules
/// the confirmation message after the configured delay.
pub struct SimulatedRegistration<C, N> {
    config: SimulationConfig,
    capacity: Arc<C>,
    notifications: Arc<N>,
}

impl<C, N> SimulatedRegistration<C, N> {
    pub fn new(capacity: Arc<C>, notifications: Arc<N>, config: SimulationConfig) -> Self {
        Self {
            config,
            capacity,
            notifications,
        }
    }
}

#[async_trait]
impl<C, N> RegistrationService for SimulatedRegistration<C, N>
where
    C: CapacityService + 'static,
    N: NotificationSink + 'static,
{
    async fn submit(&self, form: &RegistrationForm) -> Result<RegistrationResult, RegistrationError> {
        let completed = validate_form(form)?;

        sleep(self.config.latency).await;

        let status = self
            .capacity
            .slot_status(completed.workshop_date, completed.workshop_time)
            .await
            .map_err(|CapacityError::Unavailable(message)| {
                RegistrationError::Unavailable(message)
            })?;
        if !status.is_available() {
            return Err(RegistrationError::SlotUnavailable);
        }

        let message = ConfirmationSms {
            to: completed.parent_phone.clone(),
            body: format!(
                "Workshop registration confirmed for {} on {} at {}",
                completed.child_name,
                completed.workshop_date,
                completed.workshop_time.label()
            ),
        };

        let sink = Arc::clone(&self.notifications);
        let delay = self.config.confirmation_delay;
        tokio::spawn(async move {
            sleep(delay).await;
            if let Err(err) = sink.deliver(message) {
                warn!(%err, "confirmation delivery failed");
            }
        });

        Ok(RegistrationResult {
            accepted: true,
            confirmation_sent_to: completed.parent_phone,
        })
    }
}

/// Notification sink capturing delivered messages for assertions and demos.
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<ConfirmationSms>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<ConfirmationSms> {
        self.messages.lock().expect("sink mutex poisoned").clone()
    }
}

impl NotificationSink for RecordingSink {
    fn deliver(&self, message: ConfirmationSms) -> Result<(), NotifyError> {
        let mut guard = self.messages.lock().expect("sink mutex poisoned");
        guard.push(message);
        Ok(())
    }
}
