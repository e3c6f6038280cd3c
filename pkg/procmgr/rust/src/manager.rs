// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Registry of supervised processes keyed by program name.

use crate::config::ProgramSpec;
use crate::cron::CronScheduler;
use crate::error::{Result, SupervisorError};
use crate::events::EventSink;
use crate::process::Process;
use crate::sorter::sort_programs;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct ProcessManager {
    procs: Mutex<HashMap<String, Arc<Process>>>,
    events: Arc<dyn EventSink>,
    cron: Option<Arc<CronScheduler>>,
}

impl ProcessManager {
    pub fn new(events: Arc<dyn EventSink>, cron: Option<Arc<CronScheduler>>) -> Self {
        Self {
            procs: Mutex::new(HashMap::new()),
            events,
            cron,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Process>>> {
        self.procs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a process for `spec`, or return the one already registered
    /// under that name untouched. The flag is true when a new process was
    /// created.
    pub fn create_process(&self, spec: Arc<ProgramSpec>) -> (Arc<Process>, bool) {
        let mut procs = self.lock();
        if let Some(existing) = procs.get(&spec.name) {
            return (Arc::clone(existing), false);
        }
        let name = spec.name.clone();
        let process = Process::new(spec, Arc::clone(&self.events), self.cron.clone());
        procs.insert(name.clone(), Arc::clone(&process));
        info!(program = %name, "created process");
        (process, true)
    }

    /// Detach a process from the registry. It is not stopped.
    pub fn remove(&self, name: &str) -> Option<Arc<Process>> {
        let removed = self.lock().remove(name);
        if removed.is_some() {
            info!(program = %name, "removed process");
        }
        removed
    }

    /// Exact name, or a single `group.program` / `group:program` match.
    pub fn find(&self, name: &str) -> Result<Arc<Process>> {
        if let Some(process) = self.lock().get(name) {
            return Ok(Arc::clone(process));
        }
        if split_address(name).is_some_and(|(_, program)| !is_glob(program)) {
            let mut matches = self.find_match(name);
            if matches.len() == 1 {
                return Ok(matches.remove(0));
            }
        }
        Err(SupervisorError::NotFound(name.to_string()))
    }

    /// Look up processes by `program`, `group.program`, `group.*` (or with
    /// `:` as separator). The program part may be a glob. An exact
    /// registered name always wins. Results are in dependency order.
    pub fn find_match(&self, pattern: &str) -> Vec<Arc<Process>> {
        if let Some(process) = self.lock().get(pattern) {
            return vec![Arc::clone(process)];
        }

        let result: Vec<Arc<Process>> = match split_address(pattern) {
            Some((group, program)) => self
                .processes()
                .into_iter()
                .filter(|p| p.group() == group && name_matches(program, p.name()))
                .collect(),
            None if is_glob(pattern) => self
                .processes()
                .into_iter()
                .filter(|p| name_matches(pattern, p.name()))
                .collect(),
            None => Vec::new(),
        };
        if result.is_empty() {
            debug!(pattern = %pattern, "no process matches");
        }
        result
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of every process in dependency/priority order. The registry
    /// lock is released before the snapshot is returned.
    pub fn processes(&self) -> Vec<Arc<Process>> {
        let mut snapshot: Vec<Arc<Process>> = self.lock().values().cloned().collect();
        snapshot.sort_by(|a, b| a.name().cmp(b.name()));

        let specs: Vec<Arc<ProgramSpec>> = snapshot.iter().map(|p| p.spec()).collect();
        match sort_programs(&specs) {
            Ok(sorted) => {
                let mut by_name: HashMap<String, Arc<Process>> = snapshot
                    .into_iter()
                    .map(|p| (p.name().to_string(), p))
                    .collect();
                sorted
                    .iter()
                    .filter_map(|spec| by_name.remove(&spec.name))
                    .collect()
            }
            Err(e) => {
                warn!(error = %e, "cannot order processes, falling back to name order");
                snapshot
            }
        }
    }

    /// Run `f` on each process in order, one at a time.
    pub fn for_each_process(&self, mut f: impl FnMut(&Arc<Process>)) {
        for process in self.processes() {
            f(&process);
        }
    }

    /// Run `f` on every process concurrently. Each process is sent on `done`
    /// once its `f` completes. Returns how many were dispatched, so the
    /// caller knows how many completions to wait for.
    pub fn async_for_each_process<F, Fut>(
        &self,
        f: F,
        done: mpsc::UnboundedSender<Arc<Process>>,
    ) -> usize
    where
        F: Fn(Arc<Process>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let procs = self.processes();
        let count = procs.len();
        for process in procs {
            let f = f.clone();
            let done = done.clone();
            tokio::spawn(async move {
                f(Arc::clone(&process)).await;
                let _ = done.send(process);
            });
        }
        count
    }

    /// Start every process whose spec asks for auto-start, in order.
    /// Returns how many were started.
    pub async fn start_auto_start_programs(&self) -> usize {
        let auto: Vec<_> = self
            .processes()
            .into_iter()
            .filter(|p| p.spec().auto_start)
            .collect();
        start_in_order(&auto).await;
        auto.len()
    }

    /// Stop everything concurrently and wait until each stop has finished.
    pub async fn stop_all_processes(&self) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let count = self.async_for_each_process(
            |process: Arc<Process>| async move { process.stop(true).await },
            tx,
        );
        info!(count, "stopping all processes");
        for _ in 0..count {
            if rx.recv().await.is_none() {
                break;
            }
        }
    }
}

/// Start `processes` one after another. A program that a later one in the
/// batch depends on is awaited until its first attempt has an outcome.
pub(crate) async fn start_in_order(processes: &[Arc<Process>]) {
    let needed: HashSet<String> = processes
        .iter()
        .flat_map(|p| {
            p.spec()
                .dependencies()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect();
    for process in processes {
        let wait = needed.contains(process.name());
        let state = process.start(wait).await;
        if wait {
            debug!(program = %process.name(), state = %state, "dependency started");
        }
    }
}

fn split_address(address: &str) -> Option<(&str, &str)> {
    address
        .find(['.', ':'])
        .map(|pos| (&address[..pos], &address[pos + 1..]))
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

fn name_matches(pattern: &str, name: &str) -> bool {
    pattern == "*" || pattern == name || (is_glob(pattern) && glob_match::glob_match(pattern, name))
}
