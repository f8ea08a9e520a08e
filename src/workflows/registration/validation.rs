//! Pure field predicates gating the flow transitions.
//!
//! Every predicate is synchronous and side-effect free; the whole-form check
//! walks the fields in a fixed order and reports the first failure so the
//! single-notice reporting model stays deterministic.

use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

use super::domain::{CompletedForm, PhoneNumber, ReceiptUpload, RegistrationForm, WorkshopTime};

pub const PHONE_MIN_DIGITS: usize = 9;
pub const OTP_CODE_DIGITS: usize = 6;
pub const CHILD_AGE_RANGE: std::ops::RangeInclusive<u8> = 3..=15;
pub const MAX_RECEIPT_BYTES: u64 = 5 * 1024 * 1024;

/// Input fields of the flow, in the order the form check reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Phone,
    OtpCode,
    ChildName,
    ChildAge,
    WorkshopDate,
    WorkshopTime,
    ParentPhone,
    Receipt,
}

impl Field {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::OtpCode => "otp_code",
            Self::ChildName => "child_name",
            Self::ChildAge => "child_age",
            Self::WorkshopDate => "workshop_date",
            Self::WorkshopTime => "workshop_time",
            Self::ParentPhone => "parent_phone",
            Self::Receipt => "receipt",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Reason codes for a failed predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    TooShort,
    WrongLength,
    Empty,
    OutOfRange,
    Missing,
    TooLarge,
    BadType,
}

impl InvalidReason {
    pub const fn code(self) -> &'static str {
        match self {
            Self::TooShort => "too_short",
            Self::WrongLength => "wrong_length",
            Self::Empty => "empty",
            Self::OutOfRange => "out_of_range",
            Self::Missing => "missing",
            Self::TooLarge => "too_large",
            Self::BadType => "bad_type",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Field-level validation failure surfaced inline to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, Serialize)]
#[error("{field} is invalid: {reason}")]
pub struct FieldError {
    pub field: Field,
    pub reason: InvalidReason,
}

impl FieldError {
    pub const fn new(field: Field, reason: InvalidReason) -> Self {
        Self { field, reason }
    }
}

/// Digits only and at least nine of them.
pub fn validate_phone(raw: &str) -> Result<(), InvalidReason> {
    let digits_only = !raw.is_empty() && raw.chars().all(|ch| ch.is_ascii_digit());
    if digits_only && raw.len() >= PHONE_MIN_DIGITS {
        Ok(())
    } else {
        Err(InvalidReason::TooShort)
    }
}

/// Exactly six digits.
pub fn validate_otp_code(raw: &str) -> Result<(), InvalidReason> {
    if raw.len() == OTP_CODE_DIGITS && raw.chars().all(|ch| ch.is_ascii_digit()) {
        Ok(())
    } else {
        Err(InvalidReason::WrongLength)
    }
}

pub fn validate_child_name(raw: &str) -> Result<(), InvalidReason> {
    if raw.trim().is_empty() {
        Err(InvalidReason::Empty)
    } else {
        Ok(())
    }
}

/// Parseable integer within the eligible age band, returned on success.
pub fn validate_child_age(raw: &str) -> Result<u8, InvalidReason> {
    raw.trim()
        .parse::<u8>()
        .ok()
        .filter(|age| CHILD_AGE_RANGE.contains(age))
        .ok_or(InvalidReason::OutOfRange)
}

pub fn validate_date(date: Option<NaiveDate>) -> Result<NaiveDate, InvalidReason> {
    date.ok_or(InvalidReason::Missing)
}

pub fn validate_time(time: Option<WorkshopTime>) -> Result<WorkshopTime, InvalidReason> {
    time.ok_or(InvalidReason::Missing)
}

/// Present, at most 5 MiB, and a jpeg or png image.
pub fn validate_receipt(receipt: Option<&ReceiptUpload>) -> Result<(), InvalidReason> {
    let receipt = receipt.ok_or(InvalidReason::Missing)?;
    if receipt.size_bytes > MAX_RECEIPT_BYTES {
        return Err(InvalidReason::TooLarge);
    }

    let permitted = receipt.content_type.type_() == mime::IMAGE
        && matches!(
            receipt.content_type.subtype().as_str(),
            "jpeg" | "png"
        );
    if permitted {
        Ok(())
    } else {
        Err(InvalidReason::BadType)
    }
}

/// Whole-form check in fixed field order: name, age, date, time, phone,
/// receipt. The first failing field is reported; on success the draft is
/// frozen into a [`CompletedForm`].
pub fn validate_form(form: &RegistrationForm) -> Result<CompletedForm, FieldError> {
    validate_child_name(&form.child_name)
        .map_err(|reason| FieldError::new(Field::ChildName, reason))?;
    let child_age = validate_child_age(&form.child_age)
        .map_err(|reason| FieldError::new(Field::ChildAge, reason))?;
    let workshop_date = validate_date(form.workshop_date)
        .map_err(|reason| FieldError::new(Field::WorkshopDate, reason))?;
    let workshop_time = validate_time(form.workshop_time)
        .map_err(|reason| FieldError::new(Field::WorkshopTime, reason))?;
    let parent_phone = PhoneNumber::parse(&form.parent_phone)
        .map_err(|reason| FieldError::new(Field::ParentPhone, reason))?;
    validate_receipt(form.receipt.as_ref())
        .map_err(|reason| FieldError::new(Field::Receipt, reason))?;

    let receipt = form
        .receipt
        .clone()
        .ok_or(FieldError::new(Field::Receipt, InvalidReason::Missing))?;

    Ok(CompletedForm {
        child_name: form.child_name.trim().to_string(),
        child_age,
        workshop_date,
        workshop_time,
        parent_phone,
        receipt,
    })
}
