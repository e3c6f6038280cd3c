// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Lifecycle events.
//!
//! Processes publish through an [`EventSink`] handed to them at construction.
//! [`EventBus`] is the sink the supervisor owns; subscribers get every event
//! emitted after they subscribe.

use crate::state::ProcessState;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::trace;

const EVENT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStateEvent {
    pub serial: u64,
    /// The state being entered.
    pub state: ProcessState,
    pub process_name: String,
    pub group_name: String,
    pub from_state: ProcessState,
    /// Start attempts so far; set for Starting and Backoff.
    pub tries: Option<u32>,
    /// Whether the exit code was in the expected set; set for Exited.
    pub expected: Option<bool>,
    pub pid: Option<u32>,
}

impl ProcessStateEvent {
    pub fn event_type(&self) -> String {
        format!("PROCESS_STATE_{}", self.state)
    }

    pub fn body(&self) -> String {
        let mut body = format!(
            "processname:{} groupname:{} from_state:{}",
            self.process_name, self.group_name, self.from_state
        );
        if let Some(tries) = self.tries {
            body.push_str(&format!(" tries:{tries}"));
        }
        if let Some(expected) = self.expected {
            body.push_str(&format!(" expected:{}", u8::from(expected)));
        }
        if let Some(pid) = self.pid {
            body.push_str(&format!(" pid:{pid}"));
        }
        body
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupChange {
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessGroupEvent {
    pub serial: u64,
    pub change: GroupChange,
    pub group_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ProcessState(ProcessStateEvent),
    ProcessGroup(ProcessGroupEvent),
}

impl Event {
    pub fn serial(&self) -> u64 {
        match self {
            Event::ProcessState(e) => e.serial,
            Event::ProcessGroup(e) => e.serial,
        }
    }

    pub fn event_type(&self) -> String {
        match self {
            Event::ProcessState(e) => e.event_type(),
            Event::ProcessGroup(e) => match e.change {
                GroupChange::Added => "PROCESS_GROUP_ADDED".to_string(),
                GroupChange::Removed => "PROCESS_GROUP_REMOVED".to_string(),
            },
        }
    }

    pub fn body(&self) -> String {
        match self {
            Event::ProcessState(e) => e.body(),
            Event::ProcessGroup(e) => format!("groupname:{}", e.group_name),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.event_type(), self.body())
    }
}

/// Fire-and-forget destination for lifecycle events.
pub trait EventSink: Send + Sync {
    /// Next serial number; sinks hand these out so that serials are unique per sink.
    fn next_serial(&self) -> u64;

    fn emit(&self, event: Event);
}

/// Broadcast event bus owned by the supervisor.
pub struct EventBus {
    serial: AtomicU64,
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            serial: AtomicU64::new(1),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventBus {
    fn next_serial(&self) -> u64 {
        self.serial.fetch_add(1, Ordering::Relaxed)
    }

    fn emit(&self, event: Event) {
        trace!(event = %event, "emitting event");
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}
