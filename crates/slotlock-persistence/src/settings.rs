//! Lock backend settings
//!
//! Sources, lowest precedence first: the optional settings file
//! (`conf/slotlock.yml` by default), `SLOTLOCK_*` environment variables, then
//! any overrides the caller sets on the builder (the CLI's flags).

use std::sync::Arc;
use std::time::Duration;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

use slotlock_common::{DEFAULT_KEY_PREFIX, DEFAULT_MAX_CONNECTIONS, LockError, Result};

use crate::document::DocumentLockService;
use crate::memory::MemoryLockService;
use crate::model::StorageMode;
use crate::sql::ExternalDbLockService;
use crate::traits::LockService;

pub const DEFAULT_SETTINGS_FILE: &str = "conf/slotlock.yml";
pub const ENV_PREFIX: &str = "SLOTLOCK";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    pub storage_mode: StorageMode,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub max_connections: u32,
    /// Background reclamation period; 0 disables it
    pub cleanup_interval_ms: u64,
    /// Create the relational tables on connect
    pub auto_migrate: bool,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            storage_mode: StorageMode::Memory,
            database_url: None,
            redis_url: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            cleanup_interval_ms: 0,
            auto_migrate: false,
        }
    }
}

impl LockSettings {
    /// `SLOTLOCK_STORAGE_MODE=document` maps to `storage_mode`
    pub fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    /// Builder with the settings file and environment sources attached
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn builder(path: Option<&str>) -> ConfigBuilder<DefaultState> {
        let file = match path {
            Some(path) => File::with_name(path),
            None => File::with_name(DEFAULT_SETTINGS_FILE).required(false),
        };
        Config::builder()
            .add_source(file)
            .add_source(Self::environment())
    }

    pub fn load(path: Option<&str>) -> Result<Self> {
        Self::from_builder(Self::builder(path))
    }

    /// Build, deserialize and validate
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let settings: Self = builder
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| LockError::configuration(format!("invalid lock settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        match self.storage_mode {
            StorageMode::Relational if self.database_url.as_deref().is_none_or(str::is_empty) => {
                return Err(LockError::configuration(
                    "database_url is required for relational storage",
                ));
            }
            StorageMode::Document if self.redis_url.as_deref().is_none_or(str::is_empty) => {
                return Err(LockError::configuration(
                    "redis_url is required for document storage",
                ));
            }
            _ => {}
        }
        if self.max_connections == 0 {
            return Err(LockError::configuration(
                "max_connections must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn cleanup_interval(&self) -> Option<Duration> {
        (self.cleanup_interval_ms > 0).then(|| Duration::from_millis(self.cleanup_interval_ms))
    }
}

/// Build the backend selected by `settings`
///
/// With a cleanup interval the memory and relational backends own a sweep
/// task that stops when the returned service is dropped.
pub async fn create_lock_service(settings: &LockSettings) -> Result<Arc<dyn LockService>> {
    settings.validate()?;
    tracing::info!("Lock storage mode: {}", settings.storage_mode);

    let service: Arc<dyn LockService> = match settings.storage_mode {
        StorageMode::Memory => {
            let service = MemoryLockService::new();
            match settings.cleanup_interval() {
                Some(period) => Arc::new(service.with_cleanup(period)),
                None => Arc::new(service),
            }
        }
        StorageMode::Relational => {
            let url = settings.database_url.as_deref().unwrap_or_default();
            let service = ExternalDbLockService::connect(url, settings.max_connections).await?;
            if settings.auto_migrate {
                service.ensure_schema().await?;
            }
            match settings.cleanup_interval() {
                Some(period) => Arc::new(service.with_cleanup(period)),
                None => Arc::new(service),
            }
        }
        StorageMode::Document => {
            let url = settings.redis_url.as_deref().unwrap_or_default();
            Arc::new(DocumentLockService::connect(url, Some(&settings.key_prefix)).await?)
        }
    };
    Ok(service)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::traits::SharedLockAdapter;

    fn settings_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let settings = LockSettings::from_builder(Config::builder()).unwrap();
        assert_eq!(settings.storage_mode, StorageMode::Memory);
        assert_eq!(settings.key_prefix, DEFAULT_KEY_PREFIX);
        assert_eq!(settings.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert!(settings.cleanup_interval().is_none());
    }

    #[test]
    fn test_load_from_file() {
        let file = settings_file(
            "storage_mode: relational\n\
             database_url: \"sqlite::memory:\"\n\
             max_connections: 3\n\
             cleanup_interval_ms: 500\n\
             auto_migrate: true\n",
        );
        let path = file.path().to_str().unwrap();
        let settings = LockSettings::load(Some(path)).unwrap();

        assert_eq!(settings.storage_mode, StorageMode::Relational);
        assert_eq!(settings.database_url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(settings.max_connections, 3);
        assert_eq!(settings.cleanup_interval(), Some(Duration::from_millis(500)));
        assert!(settings.auto_migrate);
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = settings_file("storage_mode: memory\nkey_prefix: \"file:\"\n");
        let env = config::Map::from([
            ("SLOTLOCK_STORAGE_MODE".to_string(), "document".to_string()),
            ("SLOTLOCK_REDIS_URL".to_string(), "redis://127.0.0.1/".to_string()),
        ]);
        let builder = Config::builder()
            .add_source(File::from(file.path()))
            .add_source(LockSettings::environment().source(Some(env)));
        let settings = LockSettings::from_builder(builder).unwrap();

        assert_eq!(settings.storage_mode, StorageMode::Document);
        assert_eq!(settings.key_prefix, "file:");
    }

    #[test]
    fn test_missing_url_is_configuration_error() {
        let builder = Config::builder()
            .set_override("storage_mode", "relational")
            .unwrap();
        let err = LockSettings::from_builder(builder).unwrap_err();
        assert!(matches!(err, LockError::Configuration(_)));

        let settings = LockSettings {
            storage_mode: StorageMode::Document,
            redis_url: Some(String::new()),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_unknown_storage_mode_is_rejected() {
        let builder = Config::builder()
            .set_override("storage_mode", "cassandra")
            .unwrap();
        assert!(LockSettings::from_builder(builder).is_err());
    }

    #[tokio::test]
    async fn test_create_memory_service() {
        let service = create_lock_service(&LockSettings::default()).await.unwrap();
        assert_eq!(service.storage_mode(), StorageMode::Memory);
        service.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_relational_service_with_migration() {
        let settings = LockSettings {
            storage_mode: StorageMode::Relational,
            database_url: Some("sqlite::memory:".to_string()),
            max_connections: 1,
            auto_migrate: true,
            ..Default::default()
        };
        let service = create_lock_service(&settings).await.unwrap();
        assert_eq!(service.storage_mode(), StorageMode::Relational);
        assert!(
            service
                .acquire_writer("doc", "o1", None)
                .await
                .unwrap()
        );
    }
}
