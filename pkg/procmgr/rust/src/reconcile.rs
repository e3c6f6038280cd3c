// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Bringing the registry in line with a freshly loaded configuration.

use crate::config::ProgramSet;
use crate::error::Result;
use crate::events::{Event, EventSink, GroupChange, ProcessGroupEvent};
use crate::manager::{ProcessManager, start_in_order};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

pub type GroupMap = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub added_groups: Vec<String>,
    pub changed_groups: Vec<String>,
    pub removed_groups: Vec<String>,
    pub added_programs: Vec<String>,
    pub updated_programs: Vec<String>,
    pub removed_programs: Vec<String>,
}

/// Classify groups as added, changed (member set differs) or removed
/// between two snapshots.
pub fn diff_groups(previous: &GroupMap, next: &GroupMap) -> (Vec<String>, Vec<String>, Vec<String>) {
    let added = next
        .keys()
        .filter(|g| !previous.contains_key(*g))
        .cloned()
        .collect();
    let removed = previous
        .keys()
        .filter(|g| !next.contains_key(*g))
        .cloned()
        .collect();
    let changed = next
        .iter()
        .filter(|(g, members)| previous.get(*g).is_some_and(|prev| prev != *members))
        .map(|(g, _)| g.clone())
        .collect();
    (added, changed, removed)
}

pub struct Reconciler<'a> {
    manager: &'a ProcessManager,
    events: &'a dyn EventSink,
}

impl<'a> Reconciler<'a> {
    pub fn new(manager: &'a ProcessManager, events: &'a dyn EventSink) -> Self {
        Self { manager, events }
    }

    fn current_groups(&self) -> GroupMap {
        let mut groups = GroupMap::new();
        for process in self.manager.processes() {
            groups
                .entry(process.group())
                .or_default()
                .insert(process.name().to_string());
        }
        groups
    }

    /// Apply `programs`: stop and drop programs that disappeared, register
    /// new ones, push changed specs into existing processes (restarting
    /// them if live), then start the new auto-start programs. A set with a
    /// dependency cycle is rejected before anything is touched.
    pub async fn reconcile(&self, programs: &ProgramSet) -> Result<ReconcileReport> {
        let ordered = programs.ordered()?;

        let previous_groups = self.current_groups();
        let next_groups = programs.groups();
        let (added_groups, changed_groups, removed_groups) =
            diff_groups(&previous_groups, &next_groups);

        let mut report = ReconcileReport {
            added_groups,
            changed_groups,
            removed_groups,
            ..Default::default()
        };

        // Dependents go first when tearing down.
        let wanted = programs.names();
        for process in self.manager.processes().into_iter().rev() {
            if wanted.contains(process.name()) {
                continue;
            }
            info!(program = %process.name(), "removing program");
            process.stop(true).await;
            if let Some(removed) = self.manager.remove(process.name()) {
                removed.destroy();
            }
            report.removed_programs.push(process.name().to_string());
        }

        let mut created = Vec::new();
        for spec in &ordered {
            let (process, is_new) = self.manager.create_process(Arc::clone(spec));
            if is_new {
                report.added_programs.push(spec.name.clone());
                created.push(process);
                continue;
            }
            if process.update_spec(Arc::clone(spec)) {
                report.updated_programs.push(spec.name.clone());
                if process.state().is_alive() {
                    info!(program = %spec.name, "restarting program with updated configuration");
                    process.stop(true).await;
                    process.start(false).await;
                }
            }
        }

        for group in &report.added_groups {
            self.emit_group(GroupChange::Added, group);
        }
        for group in &report.removed_groups {
            self.emit_group(GroupChange::Removed, group);
        }

        created.retain(|p| p.spec().auto_start);
        start_in_order(&created).await;

        info!(
            added = ?report.added_programs,
            updated = ?report.updated_programs,
            removed = ?report.removed_programs,
            "configuration reconciled"
        );
        Ok(report)
    }

    fn emit_group(&self, change: GroupChange, group: &str) {
        self.events.emit(Event::ProcessGroup(ProcessGroupEvent {
            serial: self.events.next_serial(),
            change,
            group_name: group.to_string(),
        }));
    }
}
