//! CLI runner - executes commands

use crate::backend::FileBackend;
use crate::changelog::{Change, Tailer};
use crate::cli::commands::{Cli, Commands, OutputFormat};
use crate::config::RegistryConfig;
use crate::cursor::{gc, Store};
use crate::error::Result;
use crate::statestore::Registry;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        match &self.cli.command {
            Commands::Dump { store, prefix } => self.dump(store, prefix.as_deref()).await,
            Commands::Tail {
                file,
                follow,
                interval_ms,
            } => {
                self.tail(file, *follow, Duration::from_millis(*interval_ms))
                    .await
            }
            Commands::Gc { store, prefix } => self.gc(store, prefix).await,
        }
    }

    /// Load the registry config, applying command line overrides
    fn load_config(&self) -> Result<RegistryConfig> {
        let mut config = match &self.cli.config {
            Some(path) => RegistryConfig::from_file(path)?,
            None => RegistryConfig::default(),
        };
        if let Some(path) = &self.cli.path {
            config.path.clone_from(path);
        }
        config.validate()?;
        Ok(config)
    }

    fn open_registry(config: &RegistryConfig) -> Result<Registry> {
        let backend = FileBackend::new(config.file_backend_config())?;
        debug!(path = %config.path.display(), "opened registry");
        Ok(Registry::new(Arc::new(backend)))
    }

    /// Print every persisted record of a store
    async fn dump(&self, store: &str, prefix: Option<&str>) -> Result<()> {
        let config = self.load_config()?;
        let registry = Self::open_registry(&config)?;

        {
            let handle = registry.get(store)?;
            handle.each(|key, dec| {
                if prefix.map_or(true, |p| key.starts_with(p)) {
                    self.output_message(&json!({
                        "type": "RECORD",
                        "key": key,
                        "state": dec.raw(),
                    }));
                }
                Ok(true)
            })?;
        }

        registry.close_timeout(config.shutdown_timeout()).await
    }

    /// Replay a change log and print changes, optionally following it
    async fn tail(&self, file: &Path, follow: bool, interval: Duration) -> Result<()> {
        let mut tailer = Tailer::open(file)?;
        for (key, value) in tailer.table() {
            self.output_message(&json!({
                "type": "STATE",
                "key": key,
                "state": value,
            }));
        }

        if !follow {
            return Ok(());
        }

        info!(file = %file.display(), "following change log");
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = ticker.tick() => {
                    for change in tailer.poll()? {
                        self.output_message(&change_message(&change));
                    }
                }
            }
        }
        Ok(())
    }

    /// Run a single garbage collection pass
    async fn gc(&self, store: &str, prefix: &str) -> Result<()> {
        let config = self.load_config()?;
        let registry = Self::open_registry(&config)?;

        let removed = {
            let store = Store::open_in(&registry, store, prefix)?;
            // offline pass: age resources from their last update only
            gc::collect(&store, DateTime::<Utc>::UNIX_EPOCH, Utc::now())
        };

        self.output_message(&json!({
            "type": "GC",
            "store": store,
            "prefix": prefix,
            "removed": removed,
        }));

        registry.close_timeout(config.shutdown_timeout()).await
    }

    /// Output a message
    fn output_message(&self, msg: &Value) {
        match self.cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(msg).unwrap_or_default());
            }
            OutputFormat::Pretty => {
                println!("{}", serde_json::to_string_pretty(msg).unwrap_or_default());
            }
        }
    }
}

fn change_message(change: &Change) -> Value {
    json!({
        "type": "CHANGE",
        "key": change.key,
        "old_offset": change.old_offset,
        "new_offset": change.new_offset,
        "meta": change.meta,
        "removed": change.removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Record, Ttl};
    use clap::Parser;
    use serde_json::json;

    fn runner(args: &[&str]) -> Runner {
        Runner::new(Cli::parse_from(args.iter().copied()))
    }

    #[test]
    fn test_path_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();
        let runner = runner(&[
            "cursor-registry",
            "--path",
            &path,
            "gc",
            "--store",
            "s",
            "--prefix",
            "p",
        ]);
        assert_eq!(runner.load_config().unwrap().path, dir.path());
    }

    #[tokio::test]
    async fn test_gc_removes_expired_records() {
        let dir = tempfile::tempdir().unwrap();
        let config = RegistryConfig {
            path: dir.path().to_path_buf(),
            file_sync: false,
            ..RegistryConfig::default()
        };

        {
            let registry = Runner::open_registry(&config).unwrap();
            let handle = registry.get("filebeat").unwrap();
            handle
                .set("p::gone", &Record::new().with_ttl(Ttl::ZERO))
                .unwrap();
            handle
                .set(
                    "p::live",
                    &Record::new()
                        .with_ttl(Ttl::from_secs(3600))
                        .with_updated(Utc::now())
                        .with_cursor(json!({"offset": 1})),
                )
                .unwrap();
            drop(handle);
            registry.close().await.unwrap();
        }

        let path = dir.path().to_string_lossy().to_string();
        runner(&[
            "cursor-registry",
            "--path",
            &path,
            "gc",
            "--store",
            "filebeat",
            "--prefix",
            "p",
        ])
        .run()
        .await
        .unwrap();

        let registry = Runner::open_registry(&config).unwrap();
        let handle = registry.get("filebeat").unwrap();
        assert!(!handle.has("p::gone").unwrap());
        assert!(handle.has("p::live").unwrap());
    }

    #[test]
    fn test_change_message() {
        let msg = change_message(&Change {
            key: "k".into(),
            old_offset: Some(1),
            new_offset: Some(2),
            meta: None,
            removed: false,
        });
        assert_eq!(msg["type"], "CHANGE");
        assert_eq!(msg["new_offset"], 2);
        assert!(msg["meta"].is_null());
    }
}
