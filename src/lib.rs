//! Core library for the workshop registration orchestrator.
//!
//! The interesting part lives in [`workflows::registration`]: the finite-state
//! flow that walks one participant from phone login through OTP verification,
//! form intake, and slot availability to a confirmed registration.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
