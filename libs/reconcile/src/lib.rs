//! Reconciliation engine for remotely-hosted managed resources.
//!
//! This library drives a locally declared desired configuration to a
//! matching remote state and observes the remote system's own asynchronous
//! state transitions until they settle. Key concepts:
//!
//! - **Desired state**: the target configuration for one managed object.
//! - **Observation**: the last-read remote snapshot, with status and
//!   concurrency token.
//! - **Convergence**: computing the minimal add/remove/update delta and
//!   applying it in a safe order, waiting out asynchronous transitions.
//!
//! # Invariants
//!
//! - Mutations within one pass are strictly sequential, never pipelined
//! - Every mutation carries the most recently observed concurrency token;
//!   a token is never reused after a mutation succeeds with it
//! - The remote system is the sole source of truth; conflicts are surfaced,
//!   never resolved locally
//! - Partial progress is never rolled back; idempotent re-reconciliation is
//!   the recovery path

pub mod client;
pub mod config;
pub mod diff;
pub mod error;
pub mod kind;
pub mod reconciler;
pub mod state;
pub mod waiter;

pub use client::{Created, InMemoryRemote, RemoteClient};
pub use config::EngineConfig;
pub use diff::{diff_elements, ChangeSet, CollectionDelta, ScalarChange};
pub use error::{classify, is_inaccessible, ErrorClass, ReconcileError, RemoteError};
pub use kind::{Binding, CollectionSpec, FieldClass, FieldSpec, KindSpec, Registry};
pub use reconciler::Reconciler;
pub use state::{
    ConcurrencyToken, DesiredState, Element, ElementId, Observation, Operation, Status,
};
pub use waiter::{wait, Step, WaitError, WaitSpec};
