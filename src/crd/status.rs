//! # Conditions
//!
//! Condition and reference types shared by every parent status, plus the condition
//! vocabulary consumers outside the operator depend on.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition types
pub mod condition_type {
    /// Workload children exist and their pods are ready
    pub const PROVISIONED: &str = "Provisioned";
    /// Parent is ready to serve
    pub const READY: &str = "Ready";
    /// The referenced Konnect control plane exists and is programmed
    pub const CONTROL_PLANE_REF_VALID: &str = "ControlPlaneRefValid";
    /// A KonnectExtension is applied to this DataPlane/ControlPlane
    pub const KONNECT_EXTENSION_APPLIED: &str = "KonnectExtensionApplied";
    /// Konnect entity has been programmed
    pub const PROGRAMMED: &str = "Programmed";
    /// Watch namespaces are authorized by grants
    pub const WATCH_NAMESPACES_GRANTED: &str = "WatchNamespaceGrantValid";
}

/// Condition reasons
pub mod condition_reason {
    pub const PODS_NOT_READY: &str = "PodsNotReady";
    pub const PODS_READY: &str = "PodsReady";
    pub const NO_DATA_PLANE: &str = "NoDataPlane";
    pub const VALID: &str = "Valid";
    pub const INVALID: &str = "Invalid";
    pub const APPLIED: &str = "Applied";
    pub const PENDING: &str = "Pending";
    pub const NOT_FOUND: &str = "NotFound";
    pub const READY: &str = "Ready";
    pub const NOT_READY: &str = "NotReady";
    pub const INVALID_SPEC: &str = "InvalidSpec";
    pub const GRANT_MISSING: &str = "GrantMissing";
    pub const GRANTED: &str = "Granted";
}

/// Status of a condition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => f.write_str("True"),
            Self::False => f.write_str("False"),
            Self::Unknown => f.write_str("Unknown"),
        }
    }
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,
    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: String,
    /// Human-readable message describing the condition
    #[serde(default)]
    pub message: String,
    /// Last time the status changed (RFC3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    /// Generation of the parent the condition was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    pub fn new(
        r#type: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            r#type: r#type.to_string(),
            status,
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: None,
            observed_generation: None,
        }
    }

    pub fn with_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// Same observable state, ignoring timestamps
    fn same_state(&self, other: &Self) -> bool {
        self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
            && self.observed_generation == other.observed_generation
    }
}

/// Reference to an object by namespace and name
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl NamespacedRef {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
        }
    }

    /// `namespace/name` key used for ordering
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace.as_deref().unwrap_or_default(), self.name)
    }
}

/// Reference to a secret in the same namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub name: String,
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], r#type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == r#type)
}

/// Whether the condition of the given type is present and True
pub fn is_condition_true(conditions: &[Condition], r#type: &str) -> bool {
    find_condition(conditions, r#type).is_some_and(Condition::is_true)
}

/// Insert or replace a condition by type.
///
/// `lastTransitionTime` is kept when the status does not change. The list stays
/// sorted by type. Returns true when the observable state changed.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) -> bool {
    let changed = match conditions.iter().position(|c| c.r#type == condition.r#type) {
        Some(idx) => {
            let existing = &conditions[idx];
            if existing.same_state(&condition) {
                return false;
            }
            condition.last_transition_time = if existing.status == condition.status {
                existing.last_transition_time.clone()
            } else {
                Some(chrono::Utc::now().to_rfc3339())
            };
            conditions[idx] = condition;
            true
        }
        None => {
            condition.last_transition_time = Some(chrono::Utc::now().to_rfc3339());
            conditions.push(condition);
            true
        }
    };
    conditions.sort_by(|a, b| a.r#type.cmp(&b.r#type));
    changed
}

/// Remove a condition by type, returning true if one was removed
pub fn remove_condition(conditions: &mut Vec<Condition>, r#type: &str) -> bool {
    let before = conditions.len();
    conditions.retain(|c| c.r#type != r#type);
    before != conditions.len()
}
