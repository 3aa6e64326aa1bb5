//! Tracing initialization for the vox binaries.
//!
//! One call at startup wires up an env-filtered subscriber; `RUST_LOG`
//! overrides the configured defaults as usual.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by the RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "vox_broker" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit newline-delimited JSON instead of the human-readable format.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

/// Build the env-filter directive string from a config.
fn filter_directives(config: &TelemetryConfig) -> String {
    let mut directives = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        directives.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    directives
}

/// Initialize the tracing subscriber. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(&config)));

    let builder = tracing_subscriber::fmt().with_env_filter(env_filter).with_target(true);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
