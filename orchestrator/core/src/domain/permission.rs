// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Permission Domain Model
//!
//! Capabilities run with a [`PermissionSet`]. When a tool reports that it was
//! denied, the message is parsed into a [`PermissionInference`] describing the
//! access it most likely needs, and the executor raises a
//! [`PermissionEscalationRequest`] for an external approver.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Permission sets, denial inference and escalation requests

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::workflow::{RunId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
    Network,
    Execute,
    Env,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Network => "network",
            Permission::Execute => "execute",
            Permission::Env => "env",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" | "filesystem-read" | "fs-read" => Ok(Permission::Read),
            "write" | "filesystem-write" | "fs-write" => Ok(Permission::Write),
            "network" | "net" | "http" => Ok(Permission::Network),
            "execute" | "exec" | "process" | "subprocess" => Ok(Permission::Execute),
            "env" | "environment" => Ok(Permission::Env),
            other => Err(format!("unknown permission: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Read-only access, the default for unregistered capabilities.
    pub fn minimal() -> Self {
        Self::from_iter([Permission::Read])
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn insert(&mut self, permission: Permission) -> bool {
        self.0.insert(permission)
    }

    pub fn union(&self, other: &PermissionSet) -> PermissionSet {
        Self(self.0.union(&other.0).copied().collect())
    }

    pub fn is_superset(&self, other: &PermissionSet) -> bool {
        self.0.is_superset(&other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = self.0.iter().map(|p| p.as_str()).collect();
        f.write_str(&names.join("+"))
    }
}

/// What a denial message says the tool needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionInference {
    pub requested: PermissionSet,
    pub detected_operation: String,
    pub confidence: f64,
}

// Keyword fallbacks, checked in order when the message has no explicit
// "requires X access" clause.
const KEYWORDS: &[(&str, Permission, f64)] = &[
    ("network", Permission::Network, 0.7),
    ("connect", Permission::Network, 0.7),
    ("dns", Permission::Network, 0.6),
    ("read-only", Permission::Write, 0.7),
    ("write", Permission::Write, 0.7),
    ("spawn", Permission::Execute, 0.6),
    ("exec", Permission::Execute, 0.6),
    ("environment", Permission::Env, 0.6),
    ("env var", Permission::Env, 0.6),
    ("read", Permission::Read, 0.5),
];

/// Infer the permissions a denied tool needs. The requested set always
/// contains the current one.
pub fn infer_from_denial(message: &str, current: &PermissionSet) -> PermissionInference {
    let lower = message.to_ascii_lowercase();

    if let Some((permission, target)) = parse_requires_clause(&lower) {
        let mut requested = current.clone();
        requested.insert(permission);
        return PermissionInference {
            requested,
            detected_operation: match target {
                Some(target) => format!("{} {}", permission, target),
                None => permission.to_string(),
            },
            confidence: 0.95,
        };
    }

    for (keyword, permission, confidence) in KEYWORDS {
        if lower.contains(keyword) {
            let mut requested = current.clone();
            requested.insert(*permission);
            return PermissionInference {
                requested,
                detected_operation: permission.to_string(),
                confidence: *confidence,
            };
        }
    }

    PermissionInference {
        requested: current.clone(),
        detected_operation: "unknown".to_string(),
        confidence: 0.1,
    }
}

/// Parses `requires <perm> access [to <target>]`.
fn parse_requires_clause(lower: &str) -> Option<(Permission, Option<String>)> {
    let start = lower.find("requires ")? + "requires ".len();
    let rest = &lower[start..];
    let end = rest.find(" access")?;
    let permission = rest[..end].parse::<Permission>().ok()?;

    let after = &rest[end + " access".len()..];
    let target = after
        .trim_start()
        .strip_prefix("to ")
        .map(|t| t.trim().trim_end_matches('.').to_string())
        .filter(|t| !t.is_empty());
    Some((permission, target))
}

/// Raised when a task is denied. Resolved only by an external approver; it
/// never expires on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionEscalationRequest {
    pub id: Uuid,
    pub run_id: RunId,
    pub task_id: TaskId,
    pub capability_id: String,
    pub current_set: PermissionSet,
    pub requested_set: PermissionSet,
    pub reason: String,
    pub detected_operation: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl PermissionEscalationRequest {
    pub fn from_denial(
        run_id: RunId,
        task_id: TaskId,
        capability_id: impl Into<String>,
        current_set: PermissionSet,
        message: &str,
    ) -> Self {
        let inference = infer_from_denial(message, &current_set);
        Self {
            id: Uuid::new_v4(),
            run_id,
            task_id,
            capability_id: capability_id.into(),
            current_set,
            requested_set: inference.requested,
            reason: message.to_string(),
            detected_operation: inference.detected_operation,
            confidence: inference.confidence.clamp(0.0, 1.0),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_requires_clause() {
        let inference = infer_from_denial(
            "Requires network access to api.example.com.",
            &PermissionSet::minimal(),
        );
        assert!(inference.requested.contains(Permission::Network));
        assert!(inference.requested.contains(Permission::Read));
        assert_eq!(inference.detected_operation, "network api.example.com");
        assert_eq!(inference.confidence, 0.95);
    }

    #[test]
    fn test_keyword_fallback() {
        let inference = infer_from_denial("EROFS: read-only file system", &PermissionSet::empty());
        assert_eq!(inference.requested, PermissionSet::from_iter([Permission::Write]));
        assert!(inference.confidence < 0.95);
    }

    #[test]
    fn test_unrecognised_message_keeps_current_set() {
        let current = PermissionSet::minimal();
        let inference = infer_from_denial("nope", &current);
        assert_eq!(inference.requested, current);
        assert_eq!(inference.detected_operation, "unknown");
    }

    #[test]
    fn test_escalation_request_from_denial() {
        let request = PermissionEscalationRequest::from_denial(
            RunId::new(),
            "b".into(),
            "fs:write",
            PermissionSet::minimal(),
            "Requires write access to /etc/hosts",
        );
        assert_eq!(request.current_set.to_string(), "read");
        assert_eq!(request.requested_set.to_string(), "read+write");
        assert_eq!(request.detected_operation, "write /etc/hosts");
    }
}
