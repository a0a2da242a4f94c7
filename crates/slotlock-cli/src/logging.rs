//! Console logging for the `slotlock` binary
//!
//! Events go to stderr so command output on stdout stays machine-readable.
//! `RUST_LOG` wins over the configured level when set.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            ansi: true,
        }
    }
}

impl LoggingConfig {
    /// `SLOTLOCK_LOG_LEVEL` and `SLOTLOCK_LOG_ANSI`, falling back to defaults
    pub fn from_env() -> Self {
        let level = std::env::var("SLOTLOCK_LOG_LEVEL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Level::WARN);

        let ansi = std::env::var("SLOTLOCK_LOG_ANSI")
            .map(|v| v.to_lowercase() != "false" && v != "0")
            .unwrap_or(true);

        Self { level, ansi }
    }

    pub fn with_level(mut self, level: Option<Level>) -> Self {
        if let Some(level) = level {
            self.level = level;
        }
        self
    }
}

pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.ansi)
        .with_target(true)
        .with_filter(filter);

    Registry::default().with(console_layer).try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_level_overrides_config() {
        let config = LoggingConfig::default().with_level(Some(Level::DEBUG));
        assert_eq!(config.level, Level::DEBUG);

        let config = LoggingConfig::default().with_level(None);
        assert_eq!(config.level, Level::WARN);
    }
}
