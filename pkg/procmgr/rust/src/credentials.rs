// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::error::{Result, SupervisorError};
use nix::unistd::{Gid, Group, Uid, User};

/// Resolved uid/gid for a `user` or `user:group` setting. Names and numeric
/// ids are both accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

pub fn resolve(program: &str, setting: &str) -> Result<Credentials> {
    let fail = |reason: String| SupervisorError::Credentials {
        program: program.to_string(),
        user: setting.to_string(),
        reason,
    };

    let (user_part, group_part) = match setting.split_once(':') {
        Some((u, g)) => (u.trim(), Some(g.trim())),
        None => (setting.trim(), None),
    };

    let user = match user_part.parse::<u32>() {
        Ok(uid) => User::from_uid(Uid::from_raw(uid)),
        Err(_) => User::from_name(user_part),
    }
    .map_err(|e| fail(e.to_string()))?
    .ok_or_else(|| fail(format!("unknown user '{user_part}'")))?;

    let gid = match group_part.filter(|g| !g.is_empty()) {
        None => user.gid,
        Some(g) => match g.parse::<u32>() {
            Ok(gid) => Group::from_gid(Gid::from_raw(gid)),
            Err(_) => Group::from_name(g),
        }
        .map_err(|e| fail(e.to_string()))?
        .ok_or_else(|| fail(format!("unknown group '{g}'")))?
        .gid,
    };

    Ok(Credentials {
        uid: user.uid.as_raw(),
        gid: gid.as_raw(),
    })
}
