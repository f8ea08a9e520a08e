use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json};
use axum_prometheus::PrometheusMetricLayer;
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tracing::info;
use workshop_flow::config::AppConfig;
use workshop_flow::error::AppError;
use workshop_flow::telemetry;
use workshop_flow::workflows::registration::{
    registration_router, CapacityService, Field, FieldError, FlowController, FlowError,
    FlowRegistry, FlowStep, FormPatch, PhoneNumber, ReceiptUpload, RecordingSink,
    RegistrationService, SimulatedRegistration, SimulatedVerification, SimulationConfig,
    StaticCapacity, VerificationService, WorkshopTime,
};

#[derive(Clone)]
struct AppState {
    readiness: Arc<AtomicBool>,
    metrics: PrometheusHandle,
}

#[derive(Parser, Debug)]
#[command(
    name = "Workshop Registration Orchestrator",
    about = "Run and demonstrate the workshop registration flow from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Drive the registration flow against the simulated backends
    Flow {
        #[command(subcommand)]
        command: FlowCommand,
    },
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum FlowCommand {
    /// Walk one scripted registration from login to confirmation
    Demo(DemoArgs),
}

#[derive(Args, Debug)]
struct DemoArgs {
    /// Participant phone number (digits, without the +84 prefix)
    #[arg(long, default_value = "912345678")]
    phone: String,
    /// Child name for the registration form
    #[arg(long, default_value = "Minh An")]
    child_name: String,
    /// Child age (3-15)
    #[arg(long, default_value = "8")]
    child_age: String,
    /// Workshop date (YYYY-MM-DD, defaults to one week out)
    #[arg(long, value_parser = parse_date)]
    date: Option<NaiveDate>,
    /// Workshop start time (09:00, 14:00, or 16:30)
    #[arg(long, value_parser = parse_time, default_value = "09:00")]
    time: WorkshopTime,
    /// Receipt image to attach (size and type are read from the file)
    #[arg(long)]
    receipt: Option<PathBuf>,
    /// Skip the simulated network delays
    #[arg(long)]
    fast: bool,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_cli().await {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => run_server(args).await,
        Command::Flow {
            command: FlowCommand::Demo(args),
        } => run_flow_demo(args).await,
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

fn parse_time(raw: &str) -> Result<WorkshopTime, String> {
    WorkshopTime::from_start(raw)
        .ok_or_else(|| format!("'{raw}' is not a bookable time (09:00, 14:00, or 16:30)"))
}

async fn run_server(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let state = AppState {
        readiness: readiness_flag.clone(),
        metrics: prometheus_handle,
    };

    let simulation = config.flow.simulation_config();
    let verification = Arc::new(SimulatedVerification::new(simulation));
    let capacity = Arc::new(StaticCapacity::new(config.flow.slot_status(), simulation));
    let notifications = Arc::new(RecordingSink::default());
    let registration = Arc::new(SimulatedRegistration::new(
        Arc::clone(&capacity),
        notifications,
        simulation,
    ));
    let registry = Arc::new(FlowRegistry::new(
        config.flow.flow_config(),
        verification,
        capacity,
        registration,
    ));

    let app = registration_router(registry)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
        .layer(prometheus_layer)
        .layer(Extension(state));

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "workshop registration orchestrator ready");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

async fn run_flow_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let simulation = if args.fast {
        SimulationConfig::instant()
    } else {
        config.flow.simulation_config()
    };

    let verification = Arc::new(SimulatedVerification::new(simulation));
    let capacity = Arc::new(StaticCapacity::new(config.flow.slot_status(), simulation));
    let notifications = Arc::new(RecordingSink::default());
    let registration = Arc::new(SimulatedRegistration::new(
        Arc::clone(&capacity),
        Arc::clone(&notifications),
        simulation,
    ));
    let mut flow = FlowController::new(
        config.flow.flow_config(),
        Arc::clone(&verification),
        capacity,
        registration,
    );

    println!("Workshop registration demo");
    println!("Participant phone: +84{}", args.phone);

    flow.begin(&args.phone).await?;
    render_step(&flow);

    if flow.step() == FlowStep::OtpPending {
        let phone = PhoneNumber::parse(&args.phone)
            .map_err(|reason| FlowError::Validation(FieldError::new(Field::Phone, reason)))?;
        let code = verification
            .outstanding(&phone)
            .map(|challenge| challenge.code)
            .unwrap_or_else(|| "123456".to_string());
        println!("Entering verification code {code}");
        flow.verify(&code).await?;
        render_step(&flow);
    }

    let date = args
        .date
        .unwrap_or_else(|| Local::now().date_naive() + chrono::Duration::days(7));
    flow.update_form(FormPatch {
        child_name: Some(args.child_name),
        child_age: Some(args.child_age),
        workshop_date: Some(date),
        workshop_time: Some(args.time),
        parent_phone: Some(args.phone.clone()),
        receipt: Some(demo_receipt(args.receipt.as_deref())?),
    })?;

    flow.submit_form().await?;
    render_step(&flow);

    flow.confirm().await?;
    render_step(&flow);

    if let Some(result) = flow.result() {
        println!(
            "\nRegistration accepted; confirmation queued for {}",
            result.confirmation_sent_to.with_country_code()
        );
    }

    // Give the delayed delivery a moment past the configured delay.
    tokio::time::sleep(simulation.confirmation_delay + Duration::from_millis(100)).await;
    for message in notifications.messages() {
        println!("SMS to {}: {}", message.to.with_country_code(), message.body);
    }

    Ok(())
}

fn render_step<V, C, R>(flow: &FlowController<V, C, R>)
where
    V: VerificationService,
    C: CapacityService,
    R: RegistrationService,
{
    println!("\n[{}]", flow.step().label());
    if let Some(status) = flow.slot_status() {
        println!("Slots: {} of {} remaining", status.remaining, status.total);
    }
    if let Some(notice) = flow.last_notice() {
        println!("{}: {}", notice.kind.label(), notice.text);
    }
}

fn demo_receipt(path: Option<&Path>) -> Result<ReceiptUpload, AppError> {
    match path {
        Some(path) => {
            let metadata = std::fs::metadata(path)?;
            let content_type = mime_guess::from_path(path).first_or(mime::IMAGE_JPEG);
            let file_name = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("receipt")
                .to_string();
            Ok(ReceiptUpload {
                file_name,
                content_type,
                size_bytes: metadata.len(),
            })
        }
        None => Ok(ReceiptUpload {
            file_name: "receipt.jpg".to_string(),
            content_type: mime::IMAGE_JPEG,
            size_bytes: 512 * 1024,
        }),
    }
}
