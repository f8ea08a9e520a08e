//! HTTP surface driving registration flows by id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use mime::Mime;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::controller::{FlowController, FlowError, FormPatch};
use super::domain::{
    FlowConfig, FlowStep, Notice, ReceiptUpload, RegistrationResult, SlotStatus, WorkshopTime,
};
use super::services::{CapacityService, RegistrationService, VerificationService, VerifyError};
use super::validation::{Field, FieldError, InvalidReason};

type SharedFlow<V, C, R> = Arc<tokio::sync::Mutex<FlowController<V, C, R>>>;

static FLOW_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_flow_id() -> String {
    let id = FLOW_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("flow-{id:06}")
}

/// Registry of live flows keyed by sequence-derived ids.
///
/// Each flow sits behind its own async mutex, so a second action on the same
/// flow queues behind the in-flight one instead of racing it.
pub struct FlowRegistry<V, C, R> {
    flow_config: FlowConfig,
    verification: Arc<V>,
    capacity: Arc<C>,
    registration: Arc<R>,
    flows: Mutex<HashMap<String, SharedFlow<V, C, R>>>,
}

impl<V, C, R> FlowRegistry<V, C, R>
where
    V: VerificationService,
    C: CapacityService,
    R: RegistrationService,
{
    pub fn new(
        flow_config: FlowConfig,
        verification: Arc<V>,
        capacity: Arc<C>,
        registration: Arc<R>,
    ) -> Self {
        Self {
            flow_config,
            verification,
            capacity,
            registration,
            flows: Mutex::new(HashMap::new()),
        }
    }

    /// Open a fresh flow and hand back its id.
    pub fn open(&self) -> String {
        let controller = FlowController::new(
            self.flow_config,
            Arc::clone(&self.verification),
            Arc::clone(&self.capacity),
            Arc::clone(&self.registration),
        );
        let id = next_flow_id();
        let mut guard = self.flows.lock().expect("flow registry mutex poisoned");
        guard.insert(id.clone(), Arc::new(tokio::sync::Mutex::new(controller)));
        id
    }

    pub fn get(&self, id: &str) -> Option<SharedFlow<V, C, R>> {
        let guard = self.flows.lock().expect("flow registry mutex poisoned");
        guard.get(id).cloned()
    }
}

/// Snapshot of one flow as reported to HTTP callers.
#[derive(Debug, Serialize)]
pub struct FlowView {
    pub flow_id: String,
    pub step: FlowStep,
    pub step_label: &'static str,
    pub otp_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_status: Option<SlotStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<Notice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RegistrationResult>,
}

fn view<V, C, R>(flow_id: &str, controller: &FlowController<V, C, R>) -> FlowView
where
    V: VerificationService,
    C: CapacityService,
    R: RegistrationService,
{
    FlowView {
        flow_id: flow_id.to_string(),
        step: controller.step(),
        step_label: controller.step().label(),
        otp_verified: controller.session().otp_verified,
        slot_status: controller.slot_status(),
        notice: controller.last_notice().cloned(),
        result: controller.result().cloned(),
    }
}

/// Router builder exposing the flow over HTTP.
pub fn registration_router<V, C, R>(registry: Arc<FlowRegistry<V, C, R>>) -> Router
where
    V: VerificationService + 'static,
    C: CapacityService + 'static,
    R: RegistrationService + 'static,
{
    Router::new()
        .route("/api/v1/flows", post(create_handler::<V, C, R>))
        .route("/api/v1/flows/:flow_id", get(status_handler::<V, C, R>))
        .route(
            "/api/v1/flows/:flow_id/begin",
            post(begin_handler::<V, C, R>),
        )
        .route(
            "/api/v1/flows/:flow_id/verify",
            post(verify_handler::<V, C, R>),
        )
        .route("/api/v1/flows/:flow_id/form", post(form_handler::<V, C, R>))
        .route(
            "/api/v1/flows/:flow_id/submit",
            post(submit_handler::<V, C, R>),
        )
        .route(
            "/api/v1/flows/:flow_id/confirm",
            post(confirm_handler::<V, C, R>),
        )
        .route("/api/v1/flows/:flow_id/back", post(back_handler::<V, C, R>))
        .with_state(registry)
}

#[derive(Debug, Deserialize)]
pub(crate) struct BeginRequest {
    pub(crate) phone: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VerifyRequest {
    pub(crate) code: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct FormUpdateRequest {
    pub(crate) child_name: Option<String>,
    pub(crate) child_age: Option<String>,
    pub(crate) workshop_date: Option<String>,
    pub(crate) workshop_time: Option<String>,
    pub(crate) parent_phone: Option<String>,
    pub(crate) receipt: Option<ReceiptPayload>,
}

/// Receipt metadata as uploaded by the client.
#[derive(Debug, Deserialize)]
pub(crate) struct ReceiptPayload {
    pub(crate) file_name: String,
    pub(crate) content_type: String,
    pub(crate) size_bytes: u64,
}

fn parse_patch(request: FormUpdateRequest) -> Result<FormPatch, FieldError> {
    let mut patch = FormPatch {
        child_name: request.child_name,
        child_age: request.child_age,
        parent_phone: request.parent_phone,
        ..FormPatch::default()
    };

    if let Some(raw) = request.workshop_date {
        let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map_err(|_| FieldError::new(Field::WorkshopDate, InvalidReason::Missing))?;
        patch.workshop_date = Some(date);
    }
    if let Some(raw) = request.workshop_time {
        let time = WorkshopTime::from_start(&raw)
            .ok_or(FieldError::new(Field::WorkshopTime, InvalidReason::Missing))?;
        patch.workshop_time = Some(time);
    }
    if let Some(receipt) = request.receipt {
        let content_type: Mime = receipt
            .content_type
            .parse()
            .map_err(|_| FieldError::new(Field::Receipt, InvalidReason::BadType))?;
        patch.receipt = Some(ReceiptUpload {
            file_name: receipt.file_name,
            content_type,
            size_bytes: receipt.size_bytes,
        });
    }

    Ok(patch)
}

fn error_status(error: &FlowError) -> StatusCode {
    match error {
        FlowError::InvalidTransition { .. } | FlowError::SlotUnavailable => StatusCode::CONFLICT,
        FlowError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        FlowError::Verify(VerifyError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        FlowError::Verify(_) => StatusCode::UNPROCESSABLE_ENTITY,
        FlowError::Timeout(_) | FlowError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn flow_error_response<V, C, R>(
    controller: &FlowController<V, C, R>,
    error: &FlowError,
) -> Response
where
    V: VerificationService,
    C: CapacityService,
    R: RegistrationService,
{
    let mut body = match error {
        FlowError::Validation(field_error) => json!({
            "error": error.to_string(),
            "field": field_error.field.code(),
            "reason": field_error.reason.code(),
        }),
        _ => json!({ "error": error.to_string() }),
    };
    if let Some(object) = body.as_object_mut() {
        object.insert(
            "step".to_string(),
            serde_json::to_value(controller.step()).unwrap_or_default(),
        );
    }
    (error_status(error), Json(body)).into_response()
}

fn not_found(flow_id: &str) -> Response {
    let payload = json!({
        "error": "flow not found",
        "flow_id": flow_id,
    });
    (StatusCode::NOT_FOUND, Json(payload)).into_response()
}

pub(crate) async fn create_handler<V, C, R>(
    State(registry): State<Arc<FlowRegistry<V, C, R>>>,
) -> Response
where
    V: VerificationService + 'static,
    C: CapacityService + 'static,
    R: RegistrationService + 'static,
{
    let flow_id = registry.open();
    let Some(flow) = registry.get(&flow_id) else {
        return not_found(&flow_id);
    };
    let controller = flow.lock().await;
    (StatusCode::CREATED, Json(view(&flow_id, &controller))).into_response()
}

pub(crate) async fn status_handler<V, C, R>(
    State(registry): State<Arc<FlowRegistry<V, C, R>>>,
    Path(flow_id): Path<String>,
) -> Response
where
    V: VerificationService + 'static,
    C: CapacityService + 'static,
    R: RegistrationService + 'static,
{
    let Some(flow) = registry.get(&flow_id) else {
        return not_found(&flow_id);
    };
    let controller = flow.lock().await;
    (StatusCode::OK, Json(view(&flow_id, &controller))).into_response()
}

pub(crate) async fn begin_handler<V, C, R>(
    State(registry): State<Arc<FlowRegistry<V, C, R>>>,
    Path(flow_id): Path<String>,
    Json(request): Json<BeginRequest>,
) -> Response
where
    V: VerificationService + 'static,
    C: CapacityService + 'static,
    R: RegistrationService + 'static,
{
    let Some(flow) = registry.get(&flow_id) else {
        return not_found(&flow_id);
    };
    let mut controller = flow.lock().await;
    match controller.begin(&request.phone).await {
        Ok(_) => (StatusCode::OK, Json(view(&flow_id, &controller))).into_response(),
        Err(error) => flow_error_response(&controller, &error),
    }
}

pub(crate) async fn verify_handler<V, C, R>(
    State(registry): State<Arc<FlowRegistry<V, C, R>>>,
    Path(flow_id): Path<String>,
    Json(request): Json<VerifyRequest>,
) -> Response
where
    V: VerificationService + 'static,
    C: CapacityService + 'static,
    R: RegistrationService + 'static,
{
    let Some(flow) = registry.get(&flow_id) else {
        return not_found(&flow_id);
    };
    let mut controller = flow.lock().await;
    match controller.verify(&request.code).await {
        Ok(_) => (StatusCode::OK, Json(view(&flow_id, &controller))).into_response(),
        Err(error) => flow_error_response(&controller, &error),
    }
}

pub(crate) async fn form_handler<V, C, R>(
    State(registry): State<Arc<FlowRegistry<V, C, R>>>,
    Path(flow_id): Path<String>,
    Json(request): Json<FormUpdateRequest>,
) -> Response
where
    V: VerificationService + 'static,
    C: CapacityService + 'static,
    R: RegistrationService + 'static,
{
    let Some(flow) = registry.get(&flow_id) else {
        return not_found(&flow_id);
    };
    let mut controller = flow.lock().await;
    let patch = match parse_patch(request) {
        Ok(patch) => patch,
        Err(field_error) => {
            return flow_error_response(&controller, &FlowError::Validation(field_error));
        }
    };
    match controller.update_form(patch) {
        Ok(()) => (StatusCode::OK, Json(view(&flow_id, &controller))).into_response(),
        Err(error) => flow_error_response(&controller, &error),
    }
}

pub(crate) async fn submit_handler<V, C, R>(
    State(registry): State<Arc<FlowRegistry<V, C, R>>>,
    Path(flow_id): Path<String>,
) -> Response
where
    V: VerificationService + 'static,
    C: CapacityService + 'static,
    R: RegistrationService + 'static,
{
    let Some(flow) = registry.get(&flow_id) else {
        return not_found(&flow_id);
    };
    let mut controller = flow.lock().await;
    match controller.submit_form().await {
        Ok(_) => (StatusCode::OK, Json(view(&flow_id, &controller))).into_response(),
        Err(error) => flow_error_response(&controller, &error),
    }
}

pub(crate) async fn confirm_handler<V, C, R>(
    State(registry): State<Arc<FlowRegistry<V, C, R>>>,
    Path(flow_id): Path<String>,
) -> Response
where
    V: VerificationService + 'static,
    C: CapacityService + 'static,
    R: RegistrationService + 'static,
{
    let Some(flow) = registry.get(&flow_id) else {
        return not_found(&flow_id);
    };
    let mut controller = flow.lock().await;
    match controller.confirm().await {
        Ok(_) => (StatusCode::OK, Json(view(&flow_id, &controller))).into_response(),
        Err(error) => flow_error_response(&controller, &error),
    }
}

pub(crate) async fn back_handler<V, C, R>(
    State(registry): State<Arc<FlowRegistry<V, C, R>>>,
    Path(flow_id): Path<String>,
) -> Response
where
    V: VerificationService + 'static,
    C: CapacityService + 'static,
    R: RegistrationService + 'static,
{
    let Some(flow) = registry.get(&flow_id) else {
        return not_found(&flow_id);
    };
    let mut controller = flow.lock().await;
    match controller.back() {
        Ok(_) => (StatusCode::OK, Json(view(&flow_id, &controller))).into_response(),
        Err(error) => flow_error_response(&controller, &error),
    }
}
