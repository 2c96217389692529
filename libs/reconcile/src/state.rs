//! State model for managed remote resources.
//!
//! Two views of one object:
//!
//! - [`DesiredState`]: what the caller wants the remote object to look like.
//!   Supplied once per reconciliation pass and immutable within it.
//! - [`Observation`]: the last-read snapshot of the remote object, including
//!   its status and the concurrency token required for the next mutation.
//!   Never mutated in place, only replaced by a fresh read.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use steward_id::ResourceId;

/// Remote-issued version stamp required on every mutation.
///
/// Every successful read or mutation yields the current token; a mutation
/// carrying a stale token is rejected by the remote system with a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConcurrencyToken(String);

impl ConcurrencyToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConcurrencyToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phase of the remote object's own asynchronous state machine.
///
/// Remote APIs report kind-specific raw status strings; `RemoteClient`
/// implementations normalize them onto these four phases.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// The remote system is still applying a change.
    Provisioning,

    /// The object has settled and is serving.
    Ready,

    /// Deletion is in progress.
    Deleting,

    /// The remote system reports the object as failed.
    Failed,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Provisioning => "provisioning",
            Status::Ready => "ready",
            Status::Deleting => "deleting",
            Status::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Identity key of a collection sub-element.
///
/// Identifies the element within its collection independent of its mutable
/// attributes; removal calls only need this key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementId(String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One sub-element of an order-independent collection (e.g. a subnet
/// attachment): an identity key plus mutable attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    pub attrs: BTreeMap<String, Value>,
}

impl Element {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: ElementId::new(id),
            attrs: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attr(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }
}

/// The caller-declared target configuration for one managed object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    /// Scalar configuration fields, each independently mutable remotely.
    pub scalars: BTreeMap<String, Value>,

    /// Named order-independent collections of sub-elements.
    pub collections: BTreeMap<String, Vec<Element>>,
}

impl DesiredState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scalar(mut self, field: impl Into<String>, value: Value) -> Self {
        self.scalars.insert(field.into(), value);
        self
    }

    pub fn with_collection(
        mut self,
        name: impl Into<String>,
        elements: Vec<Element>,
    ) -> Self {
        self.collections.insert(name.into(), elements);
        self
    }
}

/// Snapshot of the remote object as last read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: ResourceId,
    pub token: ConcurrencyToken,
    pub status: Status,
    pub scalars: BTreeMap<String, Value>,
    pub collections: BTreeMap<String, Vec<Element>>,
    pub observed_at: DateTime<Utc>,
}

/// One full lifecycle operation for one managed object.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Create the object remotely and wait for it to become ready.
    Create { desired: DesiredState },

    /// Converge the remote object toward `desired`, starting from the
    /// supplied snapshot.
    Update {
        desired: DesiredState,
        observed: Box<Observation>,
    },

    /// Delete the object remotely and wait for it to be gone.
    Delete { id: ResourceId },
}

impl Operation {
    /// Short operation name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Create { .. } => "create",
            Operation::Update { .. } => "update",
            Operation::Delete { .. } => "delete",
        }
    }
}
