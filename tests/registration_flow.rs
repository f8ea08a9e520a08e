//! End-to-end specifications for the registration flow through the public
//! API: login gate, form validation, slot availability, and confirmation.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use workshop_flow::workflows::registration::{
    FlowConfig, FlowController, FlowError, FlowStep, FormPatch, PhoneNumber, ReceiptUpload,
    RecordingSink, SimulatedRegistration, SimulatedVerification, SimulationConfig, SlotStatus,
    StaticCapacity, VerifyError, WorkshopTime,
};

type DemoController =
    FlowController<SimulatedVerification, StaticCapacity, SimulatedRegistration<StaticCapacity, RecordingSink>>;

fn build_flow(requires_otp: bool, status: SlotStatus) -> (DemoController, Arc<RecordingSink>) {
    let simulation = SimulationConfig::instant();
    let verification = Arc::new(SimulatedVerification::new(simulation));
    let capacity = Arc::new(StaticCapacity::new(status, simulation));
    let notifications = Arc::new(RecordingSink::default());
    let registration = Arc::new(SimulatedRegistration::new(
        Arc::clone(&capacity),
        Arc::clone(&notifications),
        simulation,
    ));
    let controller = FlowController::new(
        FlowConfig {
            requires_otp,
            call_timeout: Duration::from_secs(1),
        },
        verification,
        capacity,
        registration,
    );
    (controller, notifications)
}

fn patch() -> FormPatch {
    FormPatch {
        child_name: Some("Minh An".to_string()),
        child_age: Some("8".to_string()),
        workshop_date: NaiveDate::from_ymd_opt(2025, 11, 22),
        workshop_time: Some(WorkshopTime::Afternoon),
        parent_phone: Some("912345678".to_string()),
        receipt: Some(ReceiptUpload {
            file_name: "receipt.png".to_string(),
            content_type: mime::IMAGE_PNG,
            size_bytes: 640 * 1024,
        }),
    }
}

#[tokio::test]
async fn a_participant_registers_from_login_to_confirmation() {
    let (mut flow, notifications) = build_flow(true, SlotStatus::new(12, 20));

    assert_eq!(flow.begin("912345678").await.unwrap(), FlowStep::OtpPending);
    assert_eq!(flow.verify("123456").await.unwrap(), FlowStep::FormEntry);

    flow.update_form(patch()).unwrap();
    assert_eq!(flow.submit_form().await.unwrap(), FlowStep::SlotCheck);
    assert_eq!(flow.slot_status(), Some(SlotStatus::new(12, 20)));

    assert_eq!(flow.confirm().await.unwrap(), FlowStep::Completion);
    let result = flow.result().expect("result stored");
    assert!(result.accepted);
    assert_eq!(
        result.confirmation_sent_to,
        PhoneNumber::parse("912345678").expect("valid phone")
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    let messages = notifications.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].to.with_country_code(), "+84912345678");
    assert!(messages[0].body.contains("14:00 - 16:00"));
}

#[tokio::test]
async fn the_no_login_variant_skips_the_verification_gate() {
    let (mut flow, _notifications) = build_flow(false, SlotStatus::new(12, 20));

    assert_eq!(flow.begin("912345678").await.unwrap(), FlowStep::FormEntry);
    assert!(!flow.session().otp_verified);

    flow.update_form(patch()).unwrap();
    assert_eq!(flow.submit_form().await.unwrap(), FlowStep::SlotCheck);
    assert_eq!(flow.confirm().await.unwrap(), FlowStep::Completion);
}

#[tokio::test]
async fn an_incomplete_form_never_reaches_the_slot_step() {
    let (mut flow, _notifications) = build_flow(false, SlotStatus::new(12, 20));
    flow.begin("912345678").await.unwrap();

    let mut incomplete = patch();
    incomplete.receipt = None;
    flow.update_form(incomplete).unwrap();

    assert!(matches!(
        flow.submit_form().await,
        Err(FlowError::Validation(_))
    ));
    assert_eq!(flow.step(), FlowStep::FormEntry);
}

#[tokio::test]
async fn a_sold_out_slot_sends_the_participant_back_to_the_form() {
    let (mut flow, notifications) = build_flow(false, SlotStatus::new(0, 20));
    flow.begin("912345678").await.unwrap();
    flow.update_form(patch()).unwrap();
    flow.submit_form().await.unwrap();

    assert_eq!(flow.confirm().await, Err(FlowError::SlotUnavailable));
    assert_eq!(flow.step(), FlowStep::FormEntry);
    assert!(notifications.messages().is_empty());
}

#[tokio::test]
async fn restarting_after_completion_clears_the_session() {
    let (mut flow, _notifications) = build_flow(true, SlotStatus::new(12, 20));
    flow.begin("912345678").await.unwrap();
    flow.verify("123456").await.unwrap();
    flow.update_form(patch()).unwrap();
    flow.submit_form().await.unwrap();
    flow.confirm().await.unwrap();

    assert_eq!(flow.reset(), FlowStep::Login);
    assert!(flow.session().phone.is_none());
    assert!(flow.result().is_none());

    // A new traversal starts from scratch, including a fresh challenge.
    assert_eq!(flow.begin("912345678").await.unwrap(), FlowStep::OtpPending);
    assert_eq!(
        flow.verify("999999").await.unwrap(),
        FlowStep::FormEntry,
        "permissive demo verification accepts any well-formed code"
    );
}

#[tokio::test]
async fn abandoning_code_entry_discards_the_challenge_result() {
    let (mut flow, _notifications) = build_flow(true, SlotStatus::new(12, 20));
    flow.begin("912345678").await.unwrap();

    assert_eq!(flow.back().unwrap(), FlowStep::Login);

    // The abandoned challenge cannot be applied from the login step.
    assert_eq!(
        flow.verify("123456").await,
        Err(FlowError::InvalidTransition {
            from: FlowStep::Login,
            action: "verify",
        })
    );
    assert!(!flow.session().otp_verified);

    // Re-entering issues a fresh challenge rather than resuming the old one.
    assert_eq!(flow.begin("912345678").await.unwrap(), FlowStep::OtpPending);
}

#[tokio::test]
async fn service_errors_keep_the_flow_in_a_recoverable_state() {
    let (mut flow, _notifications) = build_flow(true, SlotStatus::new(12, 20));

    let error = flow.begin("12345").await.expect_err("phone rejected");
    assert_eq!(error, FlowError::Verify(VerifyError::InvalidPhone));
    assert_eq!(flow.step(), FlowStep::Login);

    // The same flow instance can still proceed normally.
    assert_eq!(flow.begin("912345678").await.unwrap(), FlowStep::OtpPending);
}
