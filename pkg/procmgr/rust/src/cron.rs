// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Cron-triggered callbacks.
//!
//! The [`CronScheduler`] is owned by the supervisor and handed to each
//! process that carries a cron expression. Every scheduled callback runs on
//! its own task until the returned [`CronJob`] is cancelled or dropped, or
//! the scheduler shuts down.

use crate::error::{Result, SupervisorError};
use chrono::Local;
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub type CronCallback = Arc<dyn Fn() + Send + Sync>;

/// Accept standard 5-field cron ("m h dom mon dow") by prepending seconds=0.
fn normalize_cron_expr(expr: &str) -> String {
    let expr = expr.trim();
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    Schedule::from_str(&normalize_cron_expr(expr)).map_err(|e| SupervisorError::InvalidCron {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

pub struct CronScheduler {
    shutdown: CancellationToken,
}

impl CronScheduler {
    pub fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
        }
    }

    /// Run `callback` at every occurrence of `expr`. Must be called from
    /// within a tokio runtime.
    pub fn schedule(&self, name: &str, expr: &str, callback: CronCallback) -> Result<CronJob> {
        let schedule = parse_schedule(expr)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| SupervisorError::InvalidCron {
            expr: expr.to_string(),
            reason: e.to_string(),
        })?;

        let token = self.shutdown.child_token();
        let task_token = token.clone();
        let job_name = name.to_string();
        let handle = runtime.spawn(async move {
            let mut upcoming = schedule.upcoming(Local).next();
            while let Some(next) = upcoming {
                let wait = (next - Local::now()).to_std().unwrap_or_default();
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                debug!(program = %job_name, at = %next, "cron schedule fired");
                callback();
                upcoming = schedule.after(&next).next();
            }
            if upcoming.is_none() {
                warn!(program = %job_name, "cron schedule has no further occurrences");
            }
        });

        debug!(program = %name, schedule = %expr, "cron job registered");
        Ok(CronJob {
            token,
            handle: Some(handle),
        })
    }

    /// Cancel every job scheduled through this scheduler.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a scheduled callback; dropping it cancels the schedule.
pub struct CronJob {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl CronJob {
    pub fn cancel(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for CronJob {
    fn drop(&mut self) {
        self.cancel();
    }
}
