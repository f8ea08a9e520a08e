use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::time::sleep;

use super::common::*;
use crate::workflows::registration::domain::{RegistrationForm, SlotStatus, WorkshopTime};
use crate::workflows::registration::mocks::{
    RecordingSink, SimulatedRegistration, SimulatedVerification, SimulationConfig, StaticCapacity,
};
use crate::workflows::registration::services::{
    CapacityService, RegistrationError, RegistrationService, VerificationService, VerifyError,
};
use crate::workflows::registration::validation::{Field, InvalidReason};

fn filled_form() -> RegistrationForm {
    RegistrationForm {
        child_name: "Minh An".to_string(),
        child_age: "8".to_string(),
        workshop_date: Some(workshop_date()),
        workshop_time: Some(WorkshopTime::Morning),
        parent_phone: "912345678".to_string(),
        receipt: Some(receipt(256 * 1024, mime::IMAGE_JPEG)),
    }
}

#[tokio::test]
async fn challenges_carry_six_digit_codes() {
    let verification = SimulatedVerification::new(SimulationConfig::instant());
    let challenge = verification
        .request_otp(&phone())
        .await
        .expect("challenge issued");

    assert_eq!(challenge.code.len(), 6);
    assert!(challenge.code.chars().all(|ch| ch.is_ascii_digit()));
    assert!(!challenge.consumed);
    assert_eq!(challenge.phone, phone());
}

#[tokio::test]
async fn a_fresh_request_supersedes_the_outstanding_challenge() {
    let verification = SimulatedVerification::new(SimulationConfig::instant());
    let first = verification
        .request_otp(&phone())
        .await
        .expect("first challenge");
    let second = verification
        .request_otp(&phone())
        .await
        .expect("second challenge");

    assert_ne!(first.code, second.code);
    let outstanding = verification.outstanding(&phone()).expect("tracked");
    assert_eq!(outstanding.code, second.code);
}

#[tokio::test]
async fn verification_is_one_shot() {
    let verification = SimulatedVerification::new(SimulationConfig::instant());
    verification
        .request_otp(&phone())
        .await
        .expect("challenge issued");

    verification
        .verify_otp(&phone(), "123456")
        .await
        .expect("first attempt consumes");
    assert_eq!(
        verification.verify_otp(&phone(), "123456").await,
        Err(VerifyError::Expired)
    );
}

#[tokio::test]
async fn verification_without_a_challenge_is_expired() {
    let verification = SimulatedVerification::new(SimulationConfig::instant());
    assert_eq!(
        verification.verify_otp(&phone(), "123456").await,
        Err(VerifyError::Expired)
    );
}

#[tokio::test]
async fn malformed_codes_are_rejected_before_the_challenge_lookup() {
    let verification = SimulatedVerification::new(SimulationConfig::instant());
    verification
        .request_otp(&phone())
        .await
        .expect("challenge issued");

    assert_eq!(
        verification.verify_otp(&phone(), "12345").await,
        Err(VerifyError::InvalidFormat)
    );
    // The challenge is still live afterwards.
    verification
        .verify_otp(&phone(), "654321")
        .await
        .expect("well-formed code accepted");
}

#[tokio::test]
async fn static_capacity_ignores_the_queried_slot() {
    let capacity = StaticCapacity::new(SlotStatus::new(12, 20), SimulationConfig::instant());
    let other_date = NaiveDate::from_ymd_opt(2026, 1, 10).expect("valid date");

    for (date, time) in [
        (workshop_date(), WorkshopTime::Morning),
        (workshop_date(), WorkshopTime::LateAfternoon),
        (other_date, WorkshopTime::Afternoon),
    ] {
        let status = capacity
            .slot_status(date, time)
            .await
            .expect("status reported");
        assert_eq!(status, SlotStatus::new(12, 20));
    }
}

#[tokio::test]
async fn submit_rejects_an_invalid_draft() {
    let stack = stack();
    let mut form = filled_form();
    form.child_age = "2".to_string();

    let error = stack
        .registration
        .submit(&form)
        .await
        .expect_err("validation rejects");
    match error {
        RegistrationError::Validation(field_error) => {
            assert_eq!(field_error.field, Field::ChildAge);
            assert_eq!(field_error.reason, InvalidReason::OutOfRange);
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(stack.notifications.messages().is_empty());
}

#[tokio::test]
async fn submit_rechecks_capacity_at_submit_time() {
    let stack = stack_with_capacity(SlotStatus::new(0, 20));
    let error = stack
        .registration
        .submit(&filled_form())
        .await
        .expect_err("sold out");
    assert_eq!(error, RegistrationError::SlotUnavailable);
    assert!(stack.notifications.messages().is_empty());
}

#[tokio::test]
async fn accepted_submission_schedules_the_confirmation() {
    let capacity = Arc::new(StaticCapacity::new(
        SlotStatus::new(1, 20),
        SimulationConfig::instant(),
    ));
    let notifications = Arc::new(RecordingSink::default());
    let registration = SimulatedRegistration::new(
        Arc::clone(&capacity),
        Arc::clone(&notifications),
        SimulationConfig::instant(),
    );

    let result = registration
        .submit(&filled_form())
        .await
        .expect("registration lands");
    assert!(result.accepted);
    assert_eq!(result.confirmation_sent_to, phone());

    sleep(Duration::from_millis(20)).await;
    let messages = notifications.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].to, phone());
    assert!(messages[0].body.contains("2025-11-22"));
    assert!(messages[0].body.contains("09:00 - 11:00"));
}
