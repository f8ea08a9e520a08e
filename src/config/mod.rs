use std::env;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::workflows::registration::{FlowConfig, SimulationConfig, SlotStatus};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub flow: FlowSettings,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            flow: FlowSettings::load()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Knobs for the registration flow and its simulated backends.
#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub require_otp: bool,
    pub call_timeout_ms: u64,
    pub simulated_latency_ms: u64,
    pub confirmation_delay_ms: u64,
    pub slot_remaining: u32,
    pub slot_total: u32,
}

impl FlowSettings {
    fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            require_otp: flag_var("APP_REQUIRE_OTP", true)?,
            call_timeout_ms: number_var("APP_CALL_TIMEOUT_MS", 10_000)?,
            simulated_latency_ms: number_var("APP_SIMULATED_LATENCY_MS", 1_500)?,
            confirmation_delay_ms: number_var("APP_CONFIRMATION_DELAY_MS", 2_000)?,
            slot_remaining: small_number_var("APP_SLOT_REMAINING", 12)?,
            slot_total: small_number_var("APP_SLOT_TOTAL", 20)?,
        })
    }

    pub fn flow_config(&self) -> FlowConfig {
        FlowConfig {
            requires_otp: self.require_otp,
            call_timeout: Duration::from_millis(self.call_timeout_ms),
        }
    }

    pub fn simulation_config(&self) -> SimulationConfig {
        SimulationConfig {
            latency: Duration::from_millis(self.simulated_latency_ms),
            confirmation_delay: Duration::from_millis(self.confirmation_delay_ms),
        }
    }

    pub fn slot_status(&self) -> SlotStatus {
        SlotStatus::new(self.slot_remaining, self.slot_total)
    }
}

fn flag_var(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidFlag { name }),
        },
    }
}

fn number_var(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { name }),
    }
}

fn small_number_var(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    number_var(name, u64::from(default))?
        .try_into()
        .map_err(|_| ConfigError::InvalidNumber { name })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("APP_PORT must be a valid u16")]
    InvalidPort,
    #[error("APP_HOST must parse to an IPv4 or IPv6 address")]
    InvalidHost { source: std::net::AddrParseError },
    #[error("{name} must be a boolean flag (true/false)")]
    InvalidFlag { name: &'static str },
    #[error("{name} must be a non-negative integer")]
    InvalidNumber { name: &'static str },
}
