pub mod metrics;
mod reporter;

pub use reporter::TracingReporter;

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "badgecast_engine" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Include the event target (module path) in each line.
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
            with_target: true,
        }
    }
}

/// Handle to the installed subscriber. Keeps runtime level changes working.
pub struct TelemetryGuard {
    base_level: Level,
    module_levels: Arc<RwLock<Vec<(String, Level)>>>,
    reload_handle: Option<reload::Handle<EnvFilter, Registry>>,
}

impl TelemetryGuard {
    /// Change the log level for a specific module at runtime.
    pub fn set_module_level(&self, module: &str, level: Level) {
        let filter_str = {
            let mut levels = self.module_levels.write();
            if let Some(entry) = levels.iter_mut().find(|(m, _)| m == module) {
                entry.1 = level;
            } else {
                levels.push((module.to_string(), level));
            }
            filter_string(self.base_level, &levels)
        };

        if let Some(handle) = &self.reload_handle {
            if let Err(e) = handle.reload(EnvFilter::new(&filter_str)) {
                tracing::warn!(error = %e, "failed to reload log filter");
            }
        }
    }

    /// Get current per-module log level overrides.
    pub fn module_levels(&self) -> Vec<(String, Level)> {
        self.module_levels.read().clone()
    }

    /// Whether this guard owns the global subscriber.
    pub fn is_installed(&self) -> bool {
        self.reload_handle.is_some()
    }
}

/// Initialize logging. Call once at startup; later calls leave the first
/// subscriber in place and return a guard that cannot reload it.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let filter_str = filter_string(config.log_level, &config.module_levels);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));
    let (filter_layer, handle) = reload::Layer::new(env_filter);

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(config.with_target)
            .with_span_list(true)
    });
    let text_layer = (!config.json)
        .then(|| tracing_subscriber::fmt::layer().with_target(config.with_target));

    let installed = tracing_subscriber::registry()
        .with(filter_layer)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .is_ok();

    if !installed {
        eprintln!("badgecast-telemetry: a global subscriber is already installed");
    }

    TelemetryGuard {
        base_level: config.log_level,
        module_levels: Arc::new(RwLock::new(config.module_levels)),
        reload_handle: installed.then_some(handle),
    }
}

fn filter_string(base: Level, module_levels: &[(String, Level)]) -> String {
    let mut filter_str = base.to_string().to_lowercase();
    for (module, level) in module_levels {
        filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter_str
}
