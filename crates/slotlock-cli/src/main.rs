//! `slotlock` - operator tool for semaphores and shared locks
//!
//! Loads `LockSettings` (file, `SLOTLOCK_*` environment, then flags), builds
//! the configured backend and runs one operation against it.

mod logging;

use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{Level, info};

use slotlock_common::DEFAULT_CLEANUP_INTERVAL_MS;
use slotlock_persistence::{
    ExternalDbLockService, LockService, LockSettings, ReaderAcquireRequest,
    SemaphoreAcquireRequest, SemaphoreAdapter, SharedLockAdapter, StorageMode,
    create_lock_service, metrics,
};

use logging::{LoggingConfig, init_logging};

#[derive(Debug, Parser)]
#[command(name = "slotlock", version, about = "Inspect and operate Slotlock locks")]
struct Cli {
    /// Settings file (defaults to conf/slotlock.yml when present)
    #[arg(short = 'c', long = "config")]
    config: Option<String>,
    #[arg(short = 'm', long = "storage-mode")]
    storage_mode: Option<StorageMode>,
    #[arg(long = "db-url", env = "DATABASE_URL")]
    database_url: Option<String>,
    #[arg(long = "redis-url", env = "REDIS_URL")]
    redis_url: Option<String>,
    #[arg(long = "key-prefix")]
    key_prefix: Option<String>,
    #[arg(long = "log-level")]
    log_level: Option<Level>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check that the backend is reachable
    Check,
    /// Create the relational lock tables
    Migrate,
    /// Delete expired relational rows
    Purge {
        /// Keep purging every `--interval-ms` until interrupted
        #[arg(long)]
        watch: bool,
        #[arg(long = "interval-ms", default_value_t = DEFAULT_CLEANUP_INTERVAL_MS)]
        interval_ms: u64,
    },
    /// Counting semaphore operations
    #[command(subcommand)]
    Semaphore(SemaphoreCommand),
    /// Reader/writer shared lock operations
    #[command(subcommand)]
    Shared(SharedCommand),
}

#[derive(Debug, Args)]
struct Ttl {
    /// Time to live in milliseconds; omitted means never expires
    #[arg(long = "ttl-ms")]
    ttl_ms: Option<u64>,
}

impl Ttl {
    fn duration(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Subcommand)]
enum SemaphoreCommand {
    Acquire {
        key: String,
        slot_id: String,
        #[arg(long)]
        limit: u32,
        #[command(flatten)]
        ttl: Ttl,
    },
    Release {
        key: String,
        slot_id: String,
    },
    ForceReleaseAll {
        key: String,
    },
    Refresh {
        key: String,
        slot_id: String,
        #[arg(long = "ttl-ms")]
        ttl_ms: u64,
    },
    State {
        key: String,
    },
}

#[derive(Debug, Subcommand)]
enum SharedCommand {
    AcquireWriter {
        key: String,
        lock_id: String,
        #[command(flatten)]
        ttl: Ttl,
    },
    ReleaseWriter {
        key: String,
        lock_id: String,
    },
    ForceReleaseWriter {
        key: String,
    },
    RefreshWriter {
        key: String,
        lock_id: String,
        #[arg(long = "ttl-ms")]
        ttl_ms: u64,
    },
    AcquireReader {
        key: String,
        lock_id: String,
        #[arg(long)]
        limit: u32,
        #[command(flatten)]
        ttl: Ttl,
    },
    ReleaseReader {
        key: String,
        lock_id: String,
    },
    ForceReleaseAllReaders {
        key: String,
    },
    RefreshReader {
        key: String,
        lock_id: String,
        #[arg(long = "ttl-ms")]
        ttl_ms: u64,
    },
    ForceRelease {
        key: String,
    },
    State {
        key: String,
    },
}

impl Cli {
    fn settings(&self) -> anyhow::Result<LockSettings> {
        let mut builder = LockSettings::builder(self.config.as_deref());
        if let Some(v) = self.storage_mode {
            builder = builder.set_override("storage_mode", v.to_string())?;
        }
        if let Some(v) = &self.database_url {
            builder = builder.set_override("database_url", v.as_str())?;
        }
        if let Some(v) = &self.redis_url {
            builder = builder.set_override("redis_url", v.as_str())?;
        }
        if let Some(v) = &self.key_prefix {
            builder = builder.set_override("key_prefix", v.as_str())?;
        }
        Ok(LockSettings::from_builder(builder)?)
    }
}

fn print_outcome(operation: &str, outcome: bool) {
    println!("{}: {}", operation, outcome);
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Settings for a command that runs one operation and exits; no background sweep
fn one_shot(settings: &LockSettings) -> LockSettings {
    LockSettings {
        cleanup_interval_ms: 0,
        ..settings.clone()
    }
}

async fn relational_service(settings: &LockSettings) -> anyhow::Result<ExternalDbLockService> {
    if settings.storage_mode != StorageMode::Relational {
        bail!(
            "this command needs relational storage, configured mode is {}",
            settings.storage_mode
        );
    }
    let url = settings
        .database_url
        .as_deref()
        .context("database_url is not configured")?;
    Ok(ExternalDbLockService::connect(url, settings.max_connections).await?)
}

async fn run_semaphore(service: &dyn LockService, command: SemaphoreCommand) -> anyhow::Result<()> {
    match command {
        SemaphoreCommand::Acquire {
            key,
            slot_id,
            limit,
            ttl,
        } => {
            let mut request = SemaphoreAcquireRequest::new(key, slot_id, limit);
            request.ttl = ttl.duration();
            print_outcome("acquired", service.acquire(request).await?);
        }
        SemaphoreCommand::Release { key, slot_id } => {
            print_outcome("released", service.release(&key, &slot_id).await?);
        }
        SemaphoreCommand::ForceReleaseAll { key } => {
            print_outcome("released", service.force_release_all(&key).await?);
        }
        SemaphoreCommand::Refresh {
            key,
            slot_id,
            ttl_ms,
        } => {
            let ttl = Duration::from_millis(ttl_ms);
            print_outcome("refreshed", service.refresh(&key, &slot_id, ttl).await?);
        }
        SemaphoreCommand::State { key } => {
            print_json(&SemaphoreAdapter::get_state(service, &key).await?)?;
        }
    }
    Ok(())
}

async fn run_shared(service: &dyn LockService, command: SharedCommand) -> anyhow::Result<()> {
    match command {
        SharedCommand::AcquireWriter { key, lock_id, ttl } => {
            let acquired = service.acquire_writer(&key, &lock_id, ttl.duration()).await?;
            print_outcome("acquired", acquired);
        }
        SharedCommand::ReleaseWriter { key, lock_id } => {
            print_outcome("released", service.release_writer(&key, &lock_id).await?);
        }
        SharedCommand::ForceReleaseWriter { key } => {
            print_outcome("released", service.force_release_writer(&key).await?);
        }
        SharedCommand::RefreshWriter {
            key,
            lock_id,
            ttl_ms,
        } => {
            let ttl = Duration::from_millis(ttl_ms);
            print_outcome("refreshed", service.refresh_writer(&key, &lock_id, ttl).await?);
        }
        SharedCommand::AcquireReader {
            key,
            lock_id,
            limit,
            ttl,
        } => {
            let mut request = ReaderAcquireRequest::new(key, lock_id, limit);
            request.ttl = ttl.duration();
            print_outcome("acquired", service.acquire_reader(request).await?);
        }
        SharedCommand::ReleaseReader { key, lock_id } => {
            print_outcome("released", service.release_reader(&key, &lock_id).await?);
        }
        SharedCommand::ForceReleaseAllReaders { key } => {
            print_outcome("released", service.force_release_all_readers(&key).await?);
        }
        SharedCommand::RefreshReader {
            key,
            lock_id,
            ttl_ms,
        } => {
            let ttl = Duration::from_millis(ttl_ms);
            print_outcome("refreshed", service.refresh_reader(&key, &lock_id, ttl).await?);
        }
        SharedCommand::ForceRelease { key } => {
            print_outcome("released", service.force_release(&key).await?);
        }
        SharedCommand::State { key } => {
            print_json(&SharedLockAdapter::get_state(service, &key).await?)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logging_config = LoggingConfig::from_env().with_level(cli.log_level);
    init_logging(&logging_config)?;
    metrics::describe_metrics();

    let settings = cli.settings()?;
    info!("Lock storage mode: {}", settings.storage_mode);

    match cli.command {
        Command::Migrate => {
            relational_service(&settings).await?.ensure_schema().await?;
            println!("lock tables are ready");
        }
        Command::Purge { watch, interval_ms } => {
            let service = relational_service(&settings).await?;
            if watch {
                let handle = service.spawn_cleanup(Duration::from_millis(interval_ms));
                tokio::signal::ctrl_c().await?;
                handle.abort();
            } else {
                println!("removed: {}", service.purge_expired().await?);
            }
        }
        Command::Check => {
            let service = create_lock_service(&one_shot(&settings)).await?;
            service.health_check().await?;
            println!("{} backend is healthy", service.storage_mode());
        }
        Command::Semaphore(command) => {
            let service = create_lock_service(&one_shot(&settings)).await?;
            run_semaphore(service.as_ref(), command).await?;
        }
        Command::Shared(command) => {
            let service = create_lock_service(&one_shot(&settings)).await?;
            run_shared(service.as_ref(), command).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_semaphore_acquire() {
        let cli = Cli::try_parse_from([
            "slotlock",
            "--storage-mode",
            "relational",
            "semaphore",
            "acquire",
            "jobs",
            "worker-1",
            "--limit",
            "3",
            "--ttl-ms",
            "5000",
        ])
        .unwrap();

        assert_eq!(cli.storage_mode, Some(StorageMode::Relational));
        match cli.command {
            Command::Semaphore(SemaphoreCommand::Acquire {
                key,
                slot_id,
                limit,
                ttl,
            }) => {
                assert_eq!(key, "jobs");
                assert_eq!(slot_id, "worker-1");
                assert_eq!(limit, 3);
                assert_eq!(ttl.duration(), Some(Duration::from_millis(5000)));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_flags_override_settings() {
        let cli = Cli::try_parse_from([
            "slotlock",
            "--storage-mode",
            "document",
            "--redis-url",
            "redis://127.0.0.1/",
            "--key-prefix",
            "jobs:",
            "check",
        ])
        .unwrap();

        let settings = cli.settings().unwrap();
        assert_eq!(settings.storage_mode, StorageMode::Document);
        assert_eq!(settings.redis_url.as_deref(), Some("redis://127.0.0.1/"));
        assert_eq!(settings.key_prefix, "jobs:");
    }

    #[test]
    fn test_one_shot_commands_skip_cleanup() {
        let settings = LockSettings {
            cleanup_interval_ms: 30_000,
            key_prefix: "jobs:".to_string(),
            ..Default::default()
        };
        let command_settings = one_shot(&settings);
        assert!(command_settings.cleanup_interval().is_none());
        assert_eq!(command_settings.key_prefix, "jobs:");
    }

    #[test]
    fn test_writer_without_ttl_never_expires() {
        let cli = Cli::try_parse_from(["slotlock", "shared", "acquire-writer", "doc", "owner"])
            .unwrap();
        match cli.command {
            Command::Shared(SharedCommand::AcquireWriter { ttl, .. }) => {
                assert_eq!(ttl.duration(), None);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
