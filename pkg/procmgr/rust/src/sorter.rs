// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Dependency and priority ordering of programs.
//!
//! Programs that take part in a dependency relation (they declare
//! dependencies, or something depends on them) come first, each placed only
//! after everything it depends on. All other programs follow, ordered by
//! ascending priority.

use crate::config::ProgramSpec;
use crate::error::{Result, SupervisorError};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// Order `programs` for startup. Stopping uses the reverse.
///
/// Dependencies naming programs outside `programs` are treated as already
/// satisfied. A cycle fails with [`SupervisorError::CircularDependency`].
pub fn sort_programs<S>(programs: &[S]) -> Result<Vec<S>>
where
    S: AsRef<ProgramSpec> + Clone,
{
    let graph: BTreeMap<&str, Vec<&str>> = programs
        .iter()
        .map(|p| p.as_ref())
        .filter_map(|spec| {
            let deps: Vec<&str> = spec.dependencies().collect();
            (!deps.is_empty()).then_some((spec.name.as_str(), deps))
        })
        .collect();

    let mut in_graph: BTreeSet<&str> = BTreeSet::new();
    for (&name, deps) in &graph {
        in_graph.insert(name);
        in_graph.extend(deps.iter().copied());
    }

    let by_name: BTreeMap<&str, &S> = programs
        .iter()
        .map(|p| (p.as_ref().name.as_str(), p))
        .collect();
    let priority_of = |name: &str| {
        by_name
            .get(name)
            .map_or(crate::config::DEFAULT_PRIORITY, |p| p.as_ref().priority)
    };

    // Dependency targets that declare nothing themselves are ready at once.
    let mut leaves: Vec<&str> = in_graph
        .iter()
        .copied()
        .filter(|name| !graph.contains_key(name))
        .collect();
    leaves.sort_by_key(|name| (priority_of(*name), *name));

    let mut finished: HashSet<&str> = leaves.iter().copied().collect();
    let mut order: Vec<&str> = leaves;

    while finished.len() < in_graph.len() {
        let mut progressed = false;
        for (&name, deps) in &graph {
            if !finished.contains(name) && deps.iter().all(|d| finished.contains(d)) {
                finished.insert(name);
                order.push(name);
                progressed = true;
            }
        }
        if !progressed {
            let stuck: Vec<String> = graph
                .keys()
                .filter(|name| !finished.contains(*name))
                .map(|name| name.to_string())
                .collect();
            return Err(SupervisorError::CircularDependency(stuck));
        }
    }

    let mut result: Vec<S> = Vec::with_capacity(programs.len());
    for name in order {
        match by_name.get(name) {
            Some(p) => result.push((*p).clone()),
            None => debug!(dependency = %name, "dependency is not a configured program"),
        }
    }

    let mut independent: Vec<&S> = programs
        .iter()
        .filter(|p| !in_graph.contains(p.as_ref().name.as_str()))
        .collect();
    independent.sort_by_key(|p| p.as_ref().priority);
    result.extend(independent.into_iter().cloned());

    Ok(result)
}
