//! Hot reload of the endpoint list.
//!
//! The parent directory is watched rather than the file itself so that
//! editors which save by rename keep triggering reloads. Only validated
//! configs whose endpoint list differs from the last one are forwarded.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::BalancerConfig;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Forwards reloaded configurations over a channel.
pub struct ConfigWatcher {
    path: PathBuf,
    last_endpoints: Vec<String>,
    update_tx: mpsc::UnboundedSender<BalancerConfig>,
}

impl ConfigWatcher {
    /// `current` is the configuration already applied; reloads that leave
    /// its endpoints unchanged are not forwarded.
    pub fn new(path: &Path, current: &BalancerConfig) -> (Self, mpsc::UnboundedReceiver<BalancerConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            last_endpoints: current.endpoints.clone(),
            update_tx,
        };
        (watcher, update_rx)
    }

    /// Start watching. Dropping the returned handle stops the watch.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self {
            path,
            last_endpoints,
            update_tx,
        } = self;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = path.file_name().map(|name| name.to_os_string());
        let last = Mutex::new(last_endpoints);
        let config_path = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(error = ?e, "Config watch error");
                        return;
                    }
                };
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }
                let touches_config = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if !touches_config {
                    return;
                }

                let new_config = match load_config(&config_path) {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to reload config, keeping current endpoints");
                        return;
                    }
                };

                let mut last = last.lock().unwrap_or_else(PoisonError::into_inner);
                if *last == new_config.endpoints {
                    tracing::debug!(path = ?config_path, "Config changed but endpoints did not");
                    return;
                }
                *last = new_config.endpoints.clone();
                tracing::info!(path = ?config_path, endpoints = last.len(), "Endpoint list changed");
                let _ = update_tx.send(new_config);
            },
            Config::default().with_poll_interval(POLL_INTERVAL),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}
