// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Process supervision engine: per-program lifecycle state machines, a
//! registry with dependency-ordered bulk operations, and configuration
//! reconciliation.

pub mod config;
pub mod credentials;
pub mod cron;
pub mod env;
pub mod error;
pub mod events;
pub mod logger;
pub mod manager;
pub mod process;
pub mod reconcile;
pub mod signals;
pub mod sorter;
pub mod state;
pub mod supervisor;

pub use config::{AutoRestart, ProgramSet, ProgramSpec};
pub use error::{Result, SupervisorError};
pub use events::{Event, EventBus, EventSink};
pub use manager::ProcessManager;
pub use process::{Process, ProcessInfo};
pub use reconcile::ReconcileReport;
pub use state::ProcessState;
pub use supervisor::Supervisor;
