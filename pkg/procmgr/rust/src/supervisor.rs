// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Top-level owner of the event bus, the cron scheduler and the process
//! registry, driven by a configuration directory.

use crate::config::{ProgramSet, load_configs};
use crate::cron::CronScheduler;
use crate::error::{Result, SupervisorError};
use crate::events::{Event, EventBus, EventSink};
use crate::manager::ProcessManager;
use crate::process::{Process, ProcessInfo};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::signals::parse_signal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};

pub struct Supervisor {
    config_dir: PathBuf,
    events: Arc<EventBus>,
    cron: Arc<CronScheduler>,
    manager: ProcessManager,
    /// Serializes reloads.
    reload_lock: Mutex<()>,
}

impl Supervisor {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        let events = Arc::new(EventBus::new());
        let cron = Arc::new(CronScheduler::new());
        let manager = ProcessManager::new(
            Arc::clone(&events) as Arc<dyn EventSink>,
            Some(Arc::clone(&cron)),
        );
        Self {
            config_dir: config_dir.into(),
            events,
            cron,
            manager,
            reload_lock: Mutex::new(()),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn manager(&self) -> &ProcessManager {
        &self.manager
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Initial load. Same as [`Supervisor::reload`] on an empty registry, so
    /// every auto-start program is started.
    pub async fn load(&self) -> anyhow::Result<ReconcileReport> {
        self.reload().await
    }

    /// Re-read the configuration directory and reconcile the registry with
    /// it. A missing directory is treated as an empty configuration.
    pub async fn reload(&self) -> anyhow::Result<ReconcileReport> {
        let _guard = self.reload_lock.lock().await;
        let programs = if self.config_dir.is_dir() {
            load_configs(&self.config_dir)?
        } else {
            warn!(dir = %self.config_dir.display(), "config directory does not exist");
            ProgramSet::default()
        };
        info!(
            dir = %self.config_dir.display(),
            count = programs.len(),
            "loaded program configs"
        );
        let report = Reconciler::new(&self.manager, &*self.events)
            .reconcile(&programs)
            .await?;
        Ok(report)
    }

    /// Status of every program in dependency/priority order.
    pub fn process_infos(&self) -> Vec<ProcessInfo> {
        self.manager.processes().iter().map(|p| p.info()).collect()
    }

    fn matching(&self, pattern: &str) -> Result<Vec<Arc<Process>>> {
        let matched = self.manager.find_match(pattern);
        if matched.is_empty() {
            return Err(SupervisorError::NotFound(pattern.to_string()));
        }
        Ok(matched)
    }

    fn group_members(&self, group: &str) -> Result<Vec<Arc<Process>>> {
        let members: Vec<_> = self
            .manager
            .processes()
            .into_iter()
            .filter(|p| p.group() == group)
            .collect();
        if members.is_empty() {
            return Err(SupervisorError::NotFound(group.to_string()));
        }
        Ok(members)
    }

    /// Start every program matching `pattern`, in dependency order.
    pub async fn start_process(&self, pattern: &str, wait: bool) -> Result<Vec<ProcessInfo>> {
        let matched = self.matching(pattern)?;
        start_all(&matched, wait).await;
        Ok(matched.iter().map(|p| p.info()).collect())
    }

    pub async fn stop_process(&self, pattern: &str, wait: bool) -> Result<Vec<ProcessInfo>> {
        let matched = self.matching(pattern)?;
        stop_all(&matched, wait).await;
        Ok(matched.iter().map(|p| p.info()).collect())
    }

    /// Deliver a named signal (`TERM`, `SIGHUP`, ...) to every program
    /// matching `pattern`. Stops at the first program that cannot be
    /// signalled.
    pub fn signal_process(&self, pattern: &str, signal: &str, to_group: bool) -> Result<()> {
        let sig = parse_signal(signal)?;
        for process in self.matching(pattern)? {
            process.signal(sig, to_group)?;
        }
        Ok(())
    }

    pub async fn start_group(&self, group: &str, wait: bool) -> Result<Vec<ProcessInfo>> {
        let members = self.group_members(group)?;
        start_all(&members, wait).await;
        Ok(members.iter().map(|p| p.info()).collect())
    }

    pub async fn stop_group(&self, group: &str, wait: bool) -> Result<Vec<ProcessInfo>> {
        let members = self.group_members(group)?;
        stop_all(&members, wait).await;
        Ok(members.iter().map(|p| p.info()).collect())
    }

    /// Stop cron triggers, then every program concurrently.
    pub async fn shutdown(&self) {
        info!("shutting down supervisor");
        self.cron.shutdown();
        self.manager.stop_all_processes().await;
    }
}

async fn start_all(processes: &[Arc<Process>], wait: bool) {
    for process in processes {
        process.start(wait).await;
    }
}

// Dependents are stopped before what they depend on.
async fn stop_all(processes: &[Arc<Process>], wait: bool) {
    for process in processes.iter().rev() {
        process.stop(wait).await;
    }
}
