// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Execution metadata for capabilities: granted permissions and whether a
//! failed attempt may be retried.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::domain::permission::PermissionSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityMetadata {
    pub permissions: PermissionSet,
    /// Safe to run again after a failure. Capabilities are idempotent unless
    /// registered otherwise.
    pub idempotent: bool,
}

impl Default for CapabilityMetadata {
    fn default() -> Self {
        Self {
            permissions: PermissionSet::minimal(),
            idempotent: true,
        }
    }
}

#[derive(Default)]
pub struct CapabilityRegistry {
    entries: RwLock<HashMap<String, CapabilityMetadata>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, capability_id: impl Into<String>, metadata: CapabilityMetadata) {
        self.entries.write().insert(capability_id.into(), metadata);
    }

    /// Metadata for `capability_id`, or the defaults when unregistered.
    pub fn metadata(&self, capability_id: &str) -> CapabilityMetadata {
        self.entries
            .read()
            .get(capability_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn permissions(&self, capability_id: &str) -> PermissionSet {
        self.metadata(capability_id).permissions
    }

    pub fn is_idempotent(&self, capability_id: &str) -> bool {
        self.metadata(capability_id).idempotent
    }

    /// Grant `additional` on top of what the capability holds. Returns the
    /// resulting set.
    pub fn upgrade_permissions(&self, capability_id: &str, additional: &PermissionSet) -> PermissionSet {
        let mut entries = self.entries.write();
        let entry = entries.entry(capability_id.to_string()).or_default();
        let before = entry.permissions.clone();
        entry.permissions = before.union(additional);
        info!(
            capability = capability_id,
            from = %before,
            to = %entry.permissions,
            "Capability permissions upgraded"
        );
        entry.permissions.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::permission::Permission;

    #[test]
    fn test_unregistered_capabilities_get_defaults() {
        let registry = CapabilityRegistry::new();
        assert!(registry.is_idempotent("fs:read"));
        assert_eq!(registry.permissions("fs:read"), PermissionSet::minimal());
    }

    #[test]
    fn test_non_idempotent_registration() {
        let registry = CapabilityRegistry::new();
        registry.register(
            "payments:charge",
            CapabilityMetadata {
                permissions: PermissionSet::from_iter([Permission::Network]),
                idempotent: false,
            },
        );
        assert!(!registry.is_idempotent("payments:charge"));
    }

    #[test]
    fn test_upgrade_is_a_union() {
        let registry = CapabilityRegistry::new();
        let upgraded =
            registry.upgrade_permissions("fs:write", &PermissionSet::from_iter([Permission::Write]));
        assert!(upgraded.contains(Permission::Read));
        assert!(upgraded.contains(Permission::Write));
        assert_eq!(registry.permissions("fs:write"), upgraded);
    }
}
