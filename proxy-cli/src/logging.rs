use std::collections::HashMap;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration for the proxy binary
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Whether to enable JSON formatted logs
    pub json_format: bool,

    /// Whether to enable colored output (only for non-JSON format)
    pub enable_colors: bool,

    /// Module-specific log levels
    pub module_levels: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut module_levels = HashMap::new();

        // Engine internals are noisy at info
        module_levels.insert("hudsucker".to_string(), "warn".to_string());
        module_levels.insert("hyper".to_string(), "warn".to_string());
        module_levels.insert("rustls".to_string(), "warn".to_string());
        module_levels.insert("tower_http".to_string(), "info".to_string());

        Self {
            level: "info".to_string(),
            json_format: false,
            enable_colors: true,
            module_levels,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: &str, json_format: bool) -> Self {
        Self {
            level: level.to_string(),
            json_format,
            enable_colors: !json_format,
            ..Self::default()
        }
    }

    /// Build the filter; `RUST_LOG` takes precedence over the configured level.
    pub fn filter(&self) -> anyhow::Result<EnvFilter> {
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        for (module, level) in &self.module_levels {
            let directive = format!("{}={}", module, level);
            filter = filter.add_directive(
                directive
                    .parse()
                    .map_err(|e| anyhow::anyhow!("Invalid log directive {}: {}", directive, e))?,
            );
        }
        Ok(filter)
    }
}

/// Initialize logging based on the provided configuration
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = config.filter()?;

    // Try to initialize logging, ignore if already initialized
    let result = if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_ansi(config.enable_colors),
            )
            .try_init()
    };

    match result {
        Ok(_) => tracing::info!("Logging initialized with config level: {}", config.level),
        Err(_) => tracing::debug!("Logging already initialized, skipping"),
    }

    Ok(())
}

/// Log level utilities
pub mod levels {
    /// Check if a log level string is valid
    pub fn is_valid_level(level: &str) -> bool {
        matches!(level.to_lowercase().as_str(), "trace" | "debug" | "info" | "warn" | "error")
    }
}
