use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use mime::Mime;
use serde::{Deserialize, Serialize};

use super::validation::{self, InvalidReason};

/// Steps of the guided registration flow, in traversal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStep {
    Login,
    OtpPending,
    OtpVerify,
    FormEntry,
    SlotCheck,
    Completion,
}

impl FlowStep {
    pub const fn ordered() -> [Self; 6] {
        [
            Self::Login,
            Self::OtpPending,
            Self::OtpVerify,
            Self::FormEntry,
            Self::SlotCheck,
            Self::Completion,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Login => "Login",
            Self::OtpPending => "Code Sent",
            Self::OtpVerify => "Verifying Code",
            Self::FormEntry => "Registration Form",
            Self::SlotCheck => "Slot Availability",
            Self::Completion => "Completed",
        }
    }
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Digit-only subscriber number, at least nine digits.
///
/// The `+84` country prefix is a rendering concern and never part of the
/// stored value; [`PhoneNumber::with_country_code`] attaches it for outbound
/// message text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub fn parse(raw: &str) -> Result<Self, InvalidReason> {
        validation::validate_phone(raw)?;
        Ok(Self(raw.to_string()))
    }

    pub fn digits(&self) -> &str {
        &self.0
    }

    pub fn with_country_code(&self) -> String {
        format!("+84{}", self.0)
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Workshop times bookable for the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkshopTime {
    #[serde(rename = "09:00")]
    Morning,
    #[serde(rename = "14:00")]
    Afternoon,
    #[serde(rename = "16:30")]
    LateAfternoon,
}

impl WorkshopTime {
    pub const fn ordered() -> [Self; 3] {
        [Self::Morning, Self::Afternoon, Self::LateAfternoon]
    }

    /// Start-of-session key as it appears in schedules and queries.
    pub const fn starts_at(self) -> &'static str {
        match self {
            Self::Morning => "09:00",
            Self::Afternoon => "14:00",
            Self::LateAfternoon => "16:30",
        }
    }

    /// Full session range shown to participants.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Morning => "09:00 - 11:00",
            Self::Afternoon => "14:00 - 16:00",
            Self::LateAfternoon => "16:30 - 18:30",
        }
    }

    pub fn from_start(raw: &str) -> Option<Self> {
        Self::ordered()
            .into_iter()
            .find(|time| time.starts_at() == raw.trim())
    }
}

/// One-shot verification challenge issued for a phone number.
///
/// A fresh challenge supersedes any outstanding one for the same phone;
/// consumption invalidates it permanently.
#[derive(Debug, Clone, Serialize)]
pub struct OtpChallenge {
    pub phone: PhoneNumber,
    pub code: String,
    pub issued_at: DateTime<Utc>,
    pub consumed: bool,
}

/// Metadata for the uploaded proof-of-purchase image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptUpload {
    pub file_name: String,
    pub content_type: Mime,
    pub size_bytes: u64,
}

/// Mutable draft of the registration form.
///
/// Fields hold raw input and stay unset until the participant provides them;
/// [`super::validation::validate_form`] freezes a draft into a
/// [`CompletedForm`].
#[derive(Debug, Clone, Default)]
pub struct RegistrationForm {
    pub child_name: String,
    pub child_age: String,
    pub workshop_date: Option<NaiveDate>,
    pub workshop_time: Option<WorkshopTime>,
    pub parent_phone: String,
    pub receipt: Option<ReceiptUpload>,
}

/// Snapshot of a fully validated form, frozen at submission time.
#[derive(Debug, Clone)]
pub struct CompletedForm {
    pub child_name: String,
    pub child_age: u8,
    pub workshop_date: NaiveDate,
    pub workshop_time: WorkshopTime,
    pub parent_phone: PhoneNumber,
    pub receipt: ReceiptUpload,
}

/// Remaining capacity for one bookable (date, time) slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotStatus {
    pub remaining: u32,
    pub total: u32,
}

impl SlotStatus {
    /// Build a status upholding `remaining <= total` and `total > 0`.
    pub fn new(remaining: u32, total: u32) -> Self {
        let total = total.max(1);
        Self {
            remaining: remaining.min(total),
            total,
        }
    }

    pub const fn is_available(self) -> bool {
        self.remaining > 0
    }
}

/// Terminal outcome of a submitted registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationResult {
    pub accepted: bool,
    pub confirmation_sent_to: PhoneNumber,
}

/// Per-flow session state, owned exclusively by the controller.
#[derive(Debug, Clone)]
pub struct Session {
    pub step: FlowStep,
    pub phone: Option<PhoneNumber>,
    pub otp_verified: bool,
}

impl Session {
    pub fn new() -> Self {
        Self {
            step: FlowStep::Login,
            phone: None,
            otp_verified: false,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Behavior switches for one flow instance.
///
/// `requires_otp` selects between the phone+OTP login gate and the
/// straight-to-form variant; `call_timeout` bounds every service call.
#[derive(Debug, Clone, Copy)]
pub struct FlowConfig {
    pub requires_otp: bool,
    pub call_timeout: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            requires_otp: true,
            call_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Info,
    Success,
    Error,
}

impl NoticeKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Single user-facing message slot, overwritten on every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Info,
            text: text.into(),
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_number_keeps_prefix_out_of_storage() {
        let phone = PhoneNumber::parse("912345678").expect("valid phone");
        assert_eq!(phone.digits(), "912345678");
        assert_eq!(phone.with_country_code(), "+84912345678");
    }

    #[test]
    fn phone_number_rejects_short_or_non_digit_input() {
        assert!(PhoneNumber::parse("12345678").is_err());
        assert!(PhoneNumber::parse("09-123-456").is_err());
    }

    #[test]
    fn workshop_time_round_trips_start_keys() {
        for time in WorkshopTime::ordered() {
            assert_eq!(WorkshopTime::from_start(time.starts_at()), Some(time));
        }
        assert_eq!(WorkshopTime::from_start("10:00"), None);
    }

    #[test]
    fn slot_status_upholds_invariants() {
        let status = SlotStatus::new(25, 20);
        assert_eq!(status.remaining, 20);
        assert_eq!(status.total, 20);
        assert!(status.is_available());

        let empty = SlotStatus::new(0, 20);
        assert!(!empty.is_available());

        let degenerate = SlotStatus::new(0, 0);
        assert_eq!(degenerate.total, 1);
    }
}
