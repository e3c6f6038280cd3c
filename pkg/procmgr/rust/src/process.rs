// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Supervision of a single program.
//!
//! Each [`Process`] owns at most one child at a time. `start` launches a
//! control task that spawns the child, promotes it to Running once it has
//! survived `start_secs`, retries early exits until `start_retries` is used
//! up, and applies the auto-restart policy when a running child exits on its
//! own. `stop` walks the configured stop signals and finishes with SIGKILL.
//!
//! Field guards:
//! - lifecycle fields (state, pid, timestamps, exit status, start/stop flags,
//!   cancel token, exit watch) sit in one `std::sync::Mutex`, never held
//!   across an await point;
//! - the retry counter is an atomic, read by event emission and written by
//!   the control task;
//! - the program spec is swapped whole behind an `RwLock`;
//! - stdin is a `tokio::sync::Mutex` since writes await.

use crate::config::ProgramSpec;
use crate::cron::{CronJob, CronScheduler};
use crate::credentials;
use crate::env::load_environment_file;
use crate::error::{Result, SupervisorError};
use crate::events::{Event, EventSink, ProcessStateEvent};
use crate::logger::{ProcessLogger, create_logger};
use crate::signals;
use crate::state::ProcessState;
use chrono::{DateTime, Local};
use nix::sys::signal::Signal;
use serde::Serialize;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A child that exits sooner than this after spawning waits out the rest
/// before being restarted.
const MIN_RESTART_INTERVAL: Duration = Duration::from_secs(1);

/// How long `stop(true)` waits for the control task to wind down once the
/// child is gone.
const SUPERVISOR_SETTLE: Duration = Duration::from_secs(2);

const LOG_READ_BUF: usize = 8192;

/// Snapshot of a process for status listings.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub name: String,
    pub group: String,
    pub state: ProcessState,
    pub statename: String,
    pub pid: Option<u32>,
    /// Unix seconds of the last spawn.
    pub start: Option<i64>,
    /// Unix seconds of the last exit.
    pub stop: Option<i64>,
    pub exit_status: Option<i32>,
    pub description: String,
    pub stdout_logfile: Option<PathBuf>,
    pub stderr_logfile: Option<PathBuf>,
}

struct Inner {
    state: ProcessState,
    pid: Option<u32>,
    /// Pid of the most recent child, kept after it exits for event bodies.
    last_pid: Option<u32>,
    in_start: bool,
    stop_by_user: bool,
    start_time: Option<DateTime<Local>>,
    stop_time: Option<DateTime<Local>>,
    exit_code: Option<i32>,
    exit_signal: Option<i32>,
    /// Cancelled by `stop` to cut pauses short.
    cancel: CancellationToken,
    /// Flipped once the current child has been reaped.
    exited: Option<watch::Receiver<bool>>,
    /// Flipped once the control task has finished.
    supervisor_done: Option<watch::Receiver<bool>>,
}

struct LogSinks {
    stdout: Arc<dyn ProcessLogger>,
    stderr: Arc<dyn ProcessLogger>,
}

impl LogSinks {
    fn for_spec(spec: &ProgramSpec) -> Self {
        let stdout = create_logger(spec.stdout_logfile.as_deref());
        let stderr = if spec.redirect_stderr {
            stdout.clone()
        } else {
            create_logger(spec.stderr_logfile.as_deref())
        };
        Self { stdout, stderr }
    }
}

enum StopAction {
    Escalate {
        pid: u32,
        exited: watch::Receiver<bool>,
    },
    AwaitExit(watch::Receiver<bool>),
    /// Starting with no pid yet: the control task escalates once it spawns.
    AwaitSpawn,
    Nothing,
}

enum AttemptOutcome {
    Done,
    Retry,
}

pub struct Process {
    name: String,
    spec: RwLock<Arc<ProgramSpec>>,
    inner: Mutex<Inner>,
    retries: AtomicU32,
    events: Arc<dyn EventSink>,
    logs: Mutex<LogSinks>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    cron: Option<Arc<CronScheduler>>,
    cron_job: Mutex<Option<CronJob>>,
}

impl Process {
    /// Create a stopped process. When the program spec carries a cron expression and
    /// a scheduler is given, the schedule is registered right away.
    pub fn new(
        spec: Arc<ProgramSpec>,
        events: Arc<dyn EventSink>,
        cron: Option<Arc<CronScheduler>>,
    ) -> Arc<Self> {
        let process = Arc::new(Self {
            name: spec.name.clone(),
            logs: Mutex::new(LogSinks::for_spec(&spec)),
            spec: RwLock::new(spec),
            inner: Mutex::new(Inner {
                state: ProcessState::Stopped,
                pid: None,
                last_pid: None,
                in_start: false,
                stop_by_user: false,
                start_time: None,
                stop_time: None,
                exit_code: None,
                exit_signal: None,
                cancel: CancellationToken::new(),
                exited: None,
                supervisor_done: None,
            }),
            retries: AtomicU32::new(0),
            events,
            stdin: tokio::sync::Mutex::new(None),
            cron,
            cron_job: Mutex::new(None),
        });
        process.register_cron();
        process
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> Arc<ProgramSpec> {
        self.spec.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn group(&self) -> String {
        self.spec().group.clone()
    }

    pub fn state(&self) -> ProcessState {
        self.lock_inner().state
    }

    pub fn pid(&self) -> Option<u32> {
        self.lock_inner().pid
    }

    /// Start attempts made by the current start sequence.
    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::SeqCst)
    }

    pub fn stdout_logger(&self) -> Arc<dyn ProcessLogger> {
        self.lock_logs().stdout.clone()
    }

    pub fn stderr_logger(&self) -> Arc<dyn ProcessLogger> {
        self.lock_logs().stderr.clone()
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_logs(&self) -> MutexGuard<'_, LogSinks> {
        self.logs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the program spec. Returns false when nothing changed. Log sinks and the
    /// cron registration follow the new spec; a live child keeps running
    /// with the old one until it is restarted.
    pub fn update_spec(self: &Arc<Self>, spec: Arc<ProgramSpec>) -> bool {
        let old = self.spec();
        if *old == *spec {
            return false;
        }
        let logs_changed = old.stdout_logfile != spec.stdout_logfile
            || old.stderr_logfile != spec.stderr_logfile
            || old.redirect_stderr != spec.redirect_stderr;
        let cron_changed = old.cron != spec.cron;

        if logs_changed {
            *self.lock_logs() = LogSinks::for_spec(&spec);
        }
        *self.spec.write().unwrap_or_else(|e| e.into_inner()) = spec;
        if cron_changed {
            self.register_cron();
        }
        debug!(program = %self.name, "program spec updated");
        true
    }

    fn register_cron(self: &Arc<Self>) {
        let mut slot = self.cron_job.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut job) = slot.take() {
            job.cancel();
        }
        let spec = self.spec();
        let (Some(scheduler), Some(expr)) = (&self.cron, spec.cron.as_deref()) else {
            return;
        };

        let weak: Weak<Process> = Arc::downgrade(self);
        let callback = Arc::new(move || {
            let Some(process) = weak.upgrade() else {
                return;
            };
            if process.state().is_alive() {
                debug!(program = %process.name, "cron fired while program is running");
                return;
            }
            info!(program = %process.name, "starting program on cron schedule");
            process.begin_start();
        });

        match scheduler.schedule(&self.name, expr, callback) {
            Ok(job) => *slot = Some(job),
            Err(e) => warn!(program = %self.name, error = %e, "failed to register cron schedule"),
        }
    }

    /// Start the program. A no-op while a start sequence is already in
    /// flight. With `wait`, returns once the first attempt has an outcome:
    /// Running, Fatal, or Stopped if a stop arrived first.
    pub async fn start(self: &Arc<Self>, wait: bool) -> ProcessState {
        info!(program = %self.name, "starting program");
        match self.begin_start() {
            Some(outcome) if wait => outcome.await.unwrap_or_else(|_| self.state()),
            _ => self.state(),
        }
    }

    fn begin_start(self: &Arc<Self>) -> Option<oneshot::Receiver<ProcessState>> {
        let (done_tx, done_rx) = watch::channel(false);
        {
            let mut inner = self.lock_inner();
            if inner.in_start {
                info!(program = %self.name, "program is already started");
                return None;
            }
            inner.in_start = true;
            inner.stop_by_user = false;
            inner.cancel = CancellationToken::new();
            inner.supervisor_done = Some(done_rx);
        }

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.supervise(outcome_tx).await;
            let _ = done_tx.send(true);
        });
        Some(outcome_rx)
    }

    /// Control task: run start sequences until a stop, a restart policy
    /// refusal, or a Fatal outcome.
    async fn supervise(self: Arc<Self>, outcome: oneshot::Sender<ProcessState>) {
        let mut outcome = Some(outcome);
        loop {
            self.run(&mut outcome).await;

            let (cancel, started) = {
                let inner = self.lock_inner();
                (inner.cancel.clone(), inner.start_time)
            };
            if let Some(started) = started {
                let elapsed = (Local::now() - started).to_std().unwrap_or_default();
                if elapsed < MIN_RESTART_INTERVAL {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = sleep(MIN_RESTART_INTERVAL - elapsed) => {}
                    }
                }
            }

            let spec = self.spec();
            let inner = self.lock_inner();
            if inner.stop_by_user {
                info!(program = %self.name, "stopped by user, not restarting");
                break;
            }
            if inner.state != ProcessState::Exited {
                break;
            }
            if !spec.auto_restart.should_restart(inner.exit_code, &spec.exit_codes) {
                info!(
                    program = %self.name,
                    exit_code = ?inner.exit_code,
                    policy = %spec.auto_restart,
                    "not restarting exited program"
                );
                break;
            }
            info!(program = %self.name, exit_code = ?inner.exit_code, "restarting exited program");
        }

        let state = {
            let mut inner = self.lock_inner();
            inner.in_start = false;
            inner.state
        };
        report(&mut outcome, state);
    }

    /// One start sequence: attempts until the child reaches Running and later
    /// exits, the retry budget is spent, or a stop is requested.
    async fn run(self: &Arc<Self>, outcome: &mut Option<oneshot::Sender<ProcessState>>) {
        if self.lock_inner().pid.is_some() {
            info!(program = %self.name, "program is already running");
            report(outcome, self.state());
            return;
        }
        self.retries.store(0, Ordering::SeqCst);

        loop {
            let spec = self.spec();
            let cancel = {
                let mut inner = self.lock_inner();
                if inner.stop_by_user {
                    if inner.state == ProcessState::Backoff {
                        self.set_state(&mut inner, &spec, ProcessState::Stopped);
                    }
                    break;
                }
                inner.cancel.clone()
            };

            if !spec.restart_pause.is_zero() && self.retries.load(Ordering::SeqCst) != 0 {
                info!(
                    program = %self.name,
                    pause = ?spec.restart_pause,
                    "pausing before next start attempt"
                );
                tokio::select! {
                    _ = cancel.cancelled() => continue,
                    _ = sleep(spec.restart_pause) => {}
                }
            }

            let tries = self.retries.fetch_add(1, Ordering::SeqCst) + 1;
            {
                let mut inner = self.lock_inner();
                if inner.stop_by_user {
                    continue;
                }
                self.set_state(&mut inner, &spec, ProcessState::Starting);
            }

            match self.attempt(&spec, tries, outcome).await {
                AttemptOutcome::Done => break,
                AttemptOutcome::Retry => continue,
            }
        }
    }

    async fn attempt(
        self: &Arc<Self>,
        spec: &Arc<ProgramSpec>,
        tries: u32,
        outcome: &mut Option<oneshot::Sender<ProcessState>>,
    ) -> AttemptOutcome {
        let mut child = match self.spawn_child(spec) {
            Ok(child) => child,
            Err(e) => {
                let mut inner = self.lock_inner();
                if tries >= spec.start_retries {
                    error!(program = %self.name, error = %e, tries, "failed to start program, giving up");
                    self.set_state(&mut inner, spec, ProcessState::Fatal);
                    drop(inner);
                    report(outcome, ProcessState::Fatal);
                    return AttemptOutcome::Done;
                }
                warn!(program = %self.name, error = %e, tries, "failed to start program");
                self.set_state(&mut inner, spec, ProcessState::Backoff);
                return AttemptOutcome::Retry;
            }
        };

        let pid = child.id().unwrap_or_default();
        let pumps = self.attach_io(&mut child, pid).await;
        let (exit_tx, exit_rx) = watch::channel(false);
        let stop_requested = {
            let mut inner = self.lock_inner();
            inner.pid = Some(pid);
            inner.last_pid = Some(pid);
            inner.start_time = Some(Local::now());
            inner.exit_code = None;
            inner.exit_signal = None;
            inner.exited = Some(exit_rx.clone());
            // A stop that landed between Starting and the spawn found no pid.
            inner.stop_by_user && self.set_state(&mut inner, spec, ProcessState::Stopping)
        };
        info!(program = %self.name, pid, command = %spec.command, "Spawned program");
        if stop_requested {
            let this = Arc::clone(self);
            let spec = Arc::clone(spec);
            tokio::spawn(async move { this.escalate(pid, exit_rx, spec).await });
        }

        let early_exit = if spec.start_secs.is_zero() {
            self.promote(spec, outcome);
            None
        } else {
            tokio::select! {
                status = child.wait() => Some(status),
                _ = sleep(spec.start_secs) => {
                    self.promote(spec, outcome);
                    None
                }
            }
        };
        let status = match early_exit {
            Some(status) => status,
            None => child.wait().await,
        };

        let (exit_code, exit_signal) = match &status {
            Ok(st) => (st.code(), st.signal()),
            Err(e) => {
                warn!(program = %self.name, pid, error = %e, "failed to wait for program");
                (None, None)
            }
        };
        self.stdin.lock().await.take();
        self.close_logs_when_drained(pumps);

        let mut inner = self.lock_inner();
        inner.pid = None;
        inner.stop_time = Some(Local::now());
        inner.exit_code = exit_code;
        inner.exit_signal = exit_signal;
        info!(program = %self.name, pid, exit_code = ?exit_code, signal = ?exit_signal, "program exited");

        let result = match inner.state {
            ProcessState::Running => {
                self.set_state(&mut inner, spec, ProcessState::Exited);
                AttemptOutcome::Done
            }
            ProcessState::Stopping => {
                let next = if inner.stop_by_user {
                    ProcessState::Stopped
                } else {
                    ProcessState::Exited
                };
                self.set_state(&mut inner, spec, next);
                AttemptOutcome::Done
            }
            _ => {
                info!(program = %self.name, tries, "program exited before start_secs elapsed");
                self.set_state(&mut inner, spec, ProcessState::Backoff);
                if tries >= spec.start_retries {
                    error!(
                        program = %self.name,
                        retries = spec.start_retries,
                        "start retries exhausted"
                    );
                    self.set_state(&mut inner, spec, ProcessState::Fatal);
                    AttemptOutcome::Done
                } else {
                    AttemptOutcome::Retry
                }
            }
        };
        let state = inner.state;
        drop(inner);
        let _ = exit_tx.send(true);
        if matches!(result, AttemptOutcome::Done) {
            report(outcome, state);
        }
        result
    }

    fn promote(&self, spec: &ProgramSpec, outcome: &mut Option<oneshot::Sender<ProcessState>>) {
        let mut inner = self.lock_inner();
        if inner.state == ProcessState::Starting {
            self.set_state(&mut inner, spec, ProcessState::Running);
            drop(inner);
            info!(program = %self.name, "program is running");
            report(outcome, ProcessState::Running);
        }
    }

    fn spawn_child(&self, spec: &ProgramSpec) -> Result<Child> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args);
        cmd.env("PROCVISOR_PROCESS_NAME", &spec.name);
        cmd.env("PROCVISOR_GROUP_NAME", &spec.group);

        if let Some(ref file) = spec.environment_file {
            for (k, v) in load_environment_file(file)? {
                cmd.env(k, v);
            }
        }
        for (k, v) in &spec.environment {
            cmd.env(k, v);
        }

        if let Some(ref dir) = spec.directory {
            cmd.current_dir(dir);
        }

        if let Some(ref user) = spec.user {
            let creds = credentials::resolve(&spec.name, user)?;
            cmd.uid(creds.uid);
            cmd.gid(creds.gid);
        }

        // Each child leads its own group so group signals always have a target.
        cmd.process_group(0);

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        cmd.spawn().map_err(|source| SupervisorError::Spawn {
            program: spec.name.clone(),
            source,
        })
    }

    async fn attach_io(&self, child: &mut Child, pid: u32) -> Vec<JoinHandle<()>> {
        let (stdout_log, stderr_log) = {
            let logs = self.lock_logs();
            (logs.stdout.clone(), logs.stderr.clone())
        };
        stdout_log.set_pid(pid);
        stderr_log.set_pid(pid);

        let mut pumps = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            pumps.push(pump(out, stdout_log, self.name.clone(), "stdout"));
        }
        if let Some(err) = child.stderr.take() {
            pumps.push(pump(err, stderr_log, self.name.clone(), "stderr"));
        }
        *self.stdin.lock().await = child.stdin.take();
        pumps
    }

    fn close_logs_when_drained(&self, pumps: Vec<JoinHandle<()>>) {
        let (stdout_log, stderr_log) = {
            let logs = self.lock_logs();
            (logs.stdout.clone(), logs.stderr.clone())
        };
        let name = self.name.clone();
        tokio::spawn(async move {
            for pump in pumps {
                let _ = pump.await;
            }
            for log in [stdout_log, stderr_log] {
                if let Err(e) = log.close() {
                    debug!(program = %name, error = %e, "failed to close program log");
                }
            }
        });
    }

    /// Stop the program: deliver each stop signal in turn, waiting up to
    /// `stop_wait` after each, then SIGKILL and wait up to `kill_wait`.
    /// Also cancels a pending retry or restart. With `wait`, returns once the
    /// escalation has finished.
    pub async fn stop(self: &Arc<Self>, wait: bool) {
        let spec = self.spec();
        let (action, done) = {
            let mut inner = self.lock_inner();
            inner.stop_by_user = true;
            inner.cancel.cancel();
            let done = inner.supervisor_done.clone();
            let action = match (inner.state, inner.pid, inner.exited.clone()) {
                (ProcessState::Starting | ProcessState::Running, Some(pid), Some(exited)) => {
                    self.set_state(&mut inner, &spec, ProcessState::Stopping);
                    StopAction::Escalate { pid, exited }
                }
                (ProcessState::Stopping, Some(_), Some(exited)) => StopAction::AwaitExit(exited),
                (ProcessState::Starting, None, _) => StopAction::AwaitSpawn,
                _ => StopAction::Nothing,
            };
            (action, done)
        };

        let mut settle = SUPERVISOR_SETTLE;
        match action {
            StopAction::Nothing => info!(program = %self.name, "program is not running"),
            StopAction::AwaitSpawn => {
                info!(program = %self.name, "stopping program before it spawned");
                settle += stop_budget(&spec);
            }
            StopAction::Escalate { pid, exited } => {
                info!(program = %self.name, pid, "stopping program");
                let this = Arc::clone(self);
                let escalation = tokio::spawn(async move { this.escalate(pid, exited, spec).await });
                if wait && let Err(e) = escalation.await {
                    warn!(program = %self.name, error = %e, "stop escalation task failed");
                }
            }
            StopAction::AwaitExit(mut exited) => {
                if wait {
                    let _ = timeout(stop_budget(&spec), wait_until_set(&mut exited)).await;
                }
            }
        }

        if wait && let Some(mut done) = done {
            let _ = timeout(settle, wait_until_set(&mut done)).await;
        }
    }

    async fn escalate(&self, pid: u32, mut exited: watch::Receiver<bool>, spec: Arc<ProgramSpec>) {
        for &sig in &spec.stop_signals {
            if *exited.borrow() {
                return;
            }
            info!(program = %self.name, pid, signal = %sig, "sending stop signal");
            if let Err(e) = signals::kill(pid, sig, spec.stop_as_group) {
                warn!(program = %self.name, pid, signal = %sig, error = %e, "failed to send stop signal");
            }
            if timeout(spec.stop_wait, wait_until_set(&mut exited)).await.is_ok() {
                return;
            }
        }
        if *exited.borrow() {
            return;
        }

        warn!(
            program = %self.name,
            pid,
            stop_wait = ?spec.stop_wait,
            "program did not stop in time, sending SIGKILL"
        );
        if let Err(e) = signals::kill(pid, Signal::SIGKILL, spec.kill_as_group) {
            warn!(program = %self.name, pid, error = %e, "failed to send SIGKILL");
        }
        if timeout(spec.kill_wait, wait_until_set(&mut exited)).await.is_err() {
            warn!(program = %self.name, pid, "program still running after SIGKILL, giving up");
        }
    }

    /// Deliver `sig` to the live child, or to its whole process group.
    pub fn signal(&self, sig: Signal, to_group: bool) -> Result<()> {
        let pid = self
            .pid()
            .ok_or_else(|| SupervisorError::NotStarted(self.name.clone()))?;
        info!(program = %self.name, pid, signal = %sig, to_group, "sending signal");
        signals::kill(pid, sig, to_group)
    }

    pub async fn send_stdin(&self, data: &[u8]) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        let pipe = stdin
            .as_mut()
            .ok_or_else(|| SupervisorError::NotStarted(self.name.clone()))?;
        pipe.write_all(data).await?;
        pipe.flush().await?;
        Ok(())
    }

    /// Detach from schedulers and cancel pending restarts. Used when the
    /// process is dropped from the registry.
    pub fn destroy(&self) {
        if let Some(mut job) = self
            .cron_job
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            job.cancel();
        }
        let mut inner = self.lock_inner();
        inner.stop_by_user = true;
        inner.cancel.cancel();
    }

    pub fn info(&self) -> ProcessInfo {
        let spec = self.spec();
        let inner = self.lock_inner();
        let description = match (inner.state, inner.pid, inner.start_time) {
            (ProcessState::Running, Some(pid), Some(started)) => {
                let uptime = (Local::now() - started).num_seconds().max(0);
                describe_uptime(pid, uptime)
            }
            (ProcessState::Stopped, _, _) => String::new(),
            _ => inner
                .stop_time
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
        };
        let exit_status = match inner.state {
            ProcessState::Exited | ProcessState::Backoff => inner.exit_code,
            _ => None,
        };
        ProcessInfo {
            name: self.name.clone(),
            group: spec.group.clone(),
            state: inner.state,
            statename: inner.state.to_string(),
            pid: inner.pid,
            start: inner.start_time.map(|t| t.timestamp()),
            stop: inner.stop_time.map(|t| t.timestamp()),
            exit_status,
            description,
            stdout_logfile: spec.stdout_logfile.clone(),
            stderr_logfile: spec.stderr_logfile.clone(),
        }
    }

    /// Apply a transition under the caller's lock and emit its event.
    fn set_state(&self, inner: &mut Inner, spec: &ProgramSpec, to: ProcessState) -> bool {
        let from = inner.state;
        if !from.can_transition_to(to) {
            warn!(program = %self.name, from = %from, to = %to, "ignoring invalid state transition");
            return false;
        }
        inner.state = to;

        let mut event = ProcessStateEvent {
            serial: self.events.next_serial(),
            state: to,
            process_name: spec.name.clone(),
            group_name: spec.group.clone(),
            from_state: from,
            tries: None,
            expected: None,
            pid: None,
        };
        match to {
            ProcessState::Starting | ProcessState::Backoff => {
                event.tries = Some(self.retries.load(Ordering::SeqCst));
            }
            ProcessState::Stopped if from == ProcessState::Backoff => {
                event.pid = inner.pid;
            }
            ProcessState::Running | ProcessState::Stopping | ProcessState::Stopped => {
                event.pid = inner.pid.or(inner.last_pid);
            }
            ProcessState::Exited => {
                event.expected = Some(spec.is_expected_exit(inner.exit_code));
                event.pid = inner.last_pid;
            }
            ProcessState::Fatal | ProcessState::Unknown => {}
        }
        debug!(program = %self.name, from = %from, to = %to, "state transition");
        self.events.emit(Event::ProcessState(event));
        true
    }
}

/// Longest a stop escalation can take: every stop signal's wait plus the
/// SIGKILL wait.
fn stop_budget(spec: &ProgramSpec) -> Duration {
    spec.stop_wait * spec.stop_signals.len() as u32 + spec.kill_wait
}

fn report(outcome: &mut Option<oneshot::Sender<ProcessState>>, state: ProcessState) {
    if let Some(tx) = outcome.take() {
        let _ = tx.send(state);
    }
}

async fn wait_until_set(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|set| *set).await;
}

fn pump<R>(mut reader: R, sink: Arc<dyn ProcessLogger>, program: String, stream: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; LOG_READ_BUF];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(e) = sink.write(&buf[..n]) {
                        warn!(program = %program, stream, error = %e, "failed to write program output");
                    }
                }
                Err(e) => {
                    debug!(program = %program, stream, error = %e, "program output closed");
                    break;
                }
            }
        }
    })
}

fn describe_uptime(pid: u32, uptime_secs: i64) -> String {
    let seconds = uptime_secs % 60;
    let minutes = (uptime_secs / 60) % 60;
    let hours = (uptime_secs / 3600) % 24;
    let days = uptime_secs / 86400;
    if days > 0 {
        format!("pid {pid}, uptime {days} days, {hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("pid {pid}, uptime {hours}:{minutes:02}:{seconds:02}")
    }
}
