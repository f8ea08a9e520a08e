use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use mime::Mime;
use tokio::time::sleep;

use crate::workflows::registration::controller::{FlowController, FormPatch};
use crate::workflows::registration::domain::{
    FlowConfig, OtpChallenge, PhoneNumber, ReceiptUpload, SlotStatus, WorkshopTime,
};
use crate::workflows::registration::mocks::{
    RecordingSink, SimulatedRegistration, SimulatedVerification, SimulationConfig, StaticCapacity,
};
use crate::workflows::registration::services::{
    CapacityError, CapacityService, VerificationService, VerifyError,
};

pub(super) type SimRegistration = SimulatedRegistration<StaticCapacity, RecordingSink>;
pub(super) type SimController =
    FlowController<SimulatedVerification, StaticCapacity, SimRegistration>;

pub(super) struct Stack {
    pub(super) verification: Arc<SimulatedVerification>,
    pub(super) capacity: Arc<StaticCapacity>,
    pub(super) notifications: Arc<RecordingSink>,
    pub(super) registration: Arc<SimRegistration>,
}

pub(super) fn stack_with_capacity(status: SlotStatus) -> Stack {
    let simulation = SimulationConfig::instant();
    let verification = Arc::new(SimulatedVerification::new(simulation));
    let capacity = Arc::new(StaticCapacity::new(status, simulation));
    let notifications = Arc::new(RecordingSink::default());
    let registration = Arc::new(SimulatedRegistration::new(
        Arc::clone(&capacity),
        Arc::clone(&notifications),
        simulation,
    ));
    Stack {
        verification,
        capacity,
        notifications,
        registration,
    }
}

pub(super) fn stack() -> Stack {
    stack_with_capacity(SlotStatus::new(12, 20))
}

pub(super) fn flow_config(requires_otp: bool) -> FlowConfig {
    FlowConfig {
        requires_otp,
        call_timeout: Duration::from_secs(1),
    }
}

pub(super) fn controller(stack: &Stack, requires_otp: bool) -> SimController {
    FlowController::new(
        flow_config(requires_otp),
        Arc::clone(&stack.verification),
        Arc::clone(&stack.capacity),
        Arc::clone(&stack.registration),
    )
}

pub(super) fn phone() -> PhoneNumber {
    PhoneNumber::parse("912345678").expect("valid phone")
}

pub(super) fn workshop_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 11, 22).expect("valid date")
}

pub(super) fn receipt(size_bytes: u64, content_type: Mime) -> ReceiptUpload {
    ReceiptUpload {
        file_name: "receipt.jpg".to_string(),
        content_type,
        size_bytes,
    }
}

pub(super) fn filled_patch() -> FormPatch {
    FormPatch {
        child_name: Some("Minh An".to_string()),
        child_age: Some("8".to_string()),
        workshop_date: Some(workshop_date()),
        workshop_time: Some(WorkshopTime::Morning),
        parent_phone: Some("912345678".to_string()),
        receipt: Some(receipt(256 * 1024, mime::IMAGE_JPEG)),
    }
}

/// Drive a fresh OTP-gated controller to the form step.
pub(super) async fn reach_form_entry(controller: &mut SimController) {
    controller.begin("912345678").await.expect("begin succeeds");
    controller
        .verify("123456")
        .await
        .expect("verification succeeds");
}

/// Verification double that never accepts a code, for the mismatch path the
/// permissive simulation cannot produce.
pub(super) struct MismatchVerification;

#[async_trait]
impl VerificationService for MismatchVerification {
    async fn request_otp(&self, phone: &PhoneNumber) -> Result<OtpChallenge, VerifyError> {
        Ok(OtpChallenge {
            phone: phone.clone(),
            code: "000000".to_string(),
            issued_at: Utc::now(),
            consumed: false,
        })
    }

    async fn verify_otp(&self, _phone: &PhoneNumber, _code: &str) -> Result<(), VerifyError> {
        Err(VerifyError::CodeMismatch)
    }
}

/// Verification double that outlives any reasonable call timeout.
pub(super) struct HangingVerification;

#[async_trait]
impl VerificationService for HangingVerification {
    async fn request_otp(&self, phone: &PhoneNumber) -> Result<OtpChallenge, VerifyError> {
        sleep(Duration::from_millis(500)).await;
        Ok(OtpChallenge {
            phone: phone.clone(),
            code: "000000".to_string(),
            issued_at: Utc::now(),
            consumed: false,
        })
    }

    async fn verify_otp(&self, _phone: &PhoneNumber, _code: &str) -> Result<(), VerifyError> {
        sleep(Duration::from_millis(500)).await;
        Ok(())
    }
}

/// Capacity double replaying a scripted sequence of statuses, then sticking
/// to the last one.
pub(super) struct ScriptedCapacity {
    script: Mutex<VecDeque<SlotStatus>>,
    fallback: SlotStatus,
}

impl ScriptedCapacity {
    pub(super) fn new(sequence: Vec<SlotStatus>) -> Self {
        let fallback = sequence
            .last()
            .copied()
            .unwrap_or_else(|| SlotStatus::new(0, 1));
        Self {
            script: Mutex::new(sequence.into()),
            fallback,
        }
    }
}

#[async_trait]
impl CapacityService for ScriptedCapacity {
    async fn slot_status(
        &self,
        _date: NaiveDate,
        _time: WorkshopTime,
    ) -> Result<SlotStatus, CapacityError> {
        let mut script = self.script.lock().expect("script mutex poisoned");
        Ok(script.pop_front().unwrap_or(self.fallback))
    }
}
