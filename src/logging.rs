//! # Structured Logging Module
//!
//! Environment-aware structured logging for the orchestrator binaries.
//! `RUST_LOG` wins when set; otherwise the level follows the environment.

use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

use crate::config::{ConfigLoader, LogFormat, TelemetryConfig};
use crate::models::{EntityKind, PromptType};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process
pub fn init_structured_logging(telemetry: &TelemetryConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigLoader::detect_environment();
        let log_level = get_log_level(&environment);
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let layer = match telemetry.log_format {
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(filter)
                .boxed(),
        };

        // A subscriber may already be installed (tests, embedding host)
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            log_format = ?telemetry.log_format,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log one step of an entity's generation lifecycle
pub fn log_generation_operation(
    operation: &str,
    entity_kind: EntityKind,
    entity_id: Uuid,
    prompt_type: Option<PromptType>,
    task_id: Option<Uuid>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        entity_kind = %entity_kind,
        entity_id = %entity_id,
        prompt_type = prompt_type.map(|p| p.as_str()),
        task_id = task_id.map(|t| t.to_string()),
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📖 GENERATION_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
