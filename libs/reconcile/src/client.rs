//! Remote API client interface and an in-memory implementation.
//!
//! The [`RemoteClient`] trait is the engine's only view of the remote
//! system: create/read/update/associate/disassociate/delete against one
//! remote object type. Every mutation carries the caller's concurrency
//! token and returns the next one.
//!
//! [`InMemoryRemote`] is provided for testing and development. It simulates
//! the remote system's asynchronous settling (a configurable number of
//! pending reads before a transition completes), enforces the concurrency
//! token check, and records a call log for ordering assertions.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use steward_id::ResourceId;
use tracing::debug;

use crate::error::{codes, RemoteError};
use crate::state::{ConcurrencyToken, DesiredState, Element, ElementId, Observation, Status};

/// Response to a successful create call.
#[derive(Debug, Clone)]
pub struct Created {
    pub id: ResourceId,
    pub token: ConcurrencyToken,
}

/// Capability set the engine consumes against one remote object type.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Create the object. The remote begins provisioning asynchronously.
    async fn create(&self, desired: &DesiredState) -> Result<Created, RemoteError>;

    /// Read the current snapshot, including status and concurrency token.
    async fn read(&self, id: &ResourceId) -> Result<Observation, RemoteError>;

    /// Update one scalar field. Synchronous on the remote side.
    async fn update_scalar(
        &self,
        id: &ResourceId,
        field: &str,
        value: &Value,
        token: &ConcurrencyToken,
    ) -> Result<ConcurrencyToken, RemoteError>;

    /// Attach elements to a collection. The remote settles asynchronously
    /// and the returned token may race the real state transition.
    async fn add_elements(
        &self,
        id: &ResourceId,
        collection: &str,
        elements: &[Element],
        token: &ConcurrencyToken,
    ) -> Result<ConcurrencyToken, RemoteError>;

    /// Detach elements from a collection by identity key.
    async fn remove_elements(
        &self,
        id: &ResourceId,
        collection: &str,
        keys: &[ElementId],
        token: &ConcurrencyToken,
    ) -> Result<ConcurrencyToken, RemoteError>;

    /// Delete the object. The remote transitions to Deleting and the object
    /// disappears once deletion completes.
    async fn delete(&self, id: &ResourceId) -> Result<(), RemoteError>;
}

/// One simulated remote object.
#[derive(Debug, Clone)]
struct RemoteObject {
    id: ResourceId,
    token: u64,
    status: Status,
    scalars: BTreeMap<String, Value>,
    collections: BTreeMap<String, Vec<Element>>,
    /// Reads remaining before the in-flight transition settles.
    pending_reads: u32,
    settles_to: SettleTo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettleTo {
    Ready,
    Gone,
}

/// In-memory remote for testing and development.
///
/// Holds at most one object. Transitions settle after `settle_reads`
/// pending reads: a read that finds the countdown exhausted observes the
/// settled state (Ready, or absence for deletions).
pub struct InMemoryRemote {
    object: Mutex<Option<RemoteObject>>,
    settle_reads: u32,
    calls: Mutex<Vec<String>>,
    fail_next: Mutex<BTreeMap<String, RemoteError>>,
}

impl InMemoryRemote {
    pub fn new(settle_reads: u32) -> Self {
        Self {
            object: Mutex::new(None),
            settle_reads,
            calls: Mutex::new(Vec::new()),
            fail_next: Mutex::new(BTreeMap::new()),
        }
    }

    /// Script the next invocation of `op` to fail with `err`.
    pub fn fail_next(&self, op: &str, err: RemoteError) {
        self.fail_next.lock().unwrap().insert(op.to_string(), err);
    }

    /// Every call made so far, in order, as `"op"` or `"op:detail"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Clear the call log, so assertions can scope to one scenario step.
    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// The calls that mutate remote state (reads filtered out).
    pub fn mutation_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c != "read" && !c.starts_with("read:"))
            .collect()
    }

    /// Snapshot the object without consuming a pending read.
    pub fn peek(&self) -> Option<Observation> {
        self.object.lock().unwrap().as_ref().map(observation_of)
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn take_scripted_failure(&self, op: &str) -> Option<RemoteError> {
        self.fail_next.lock().unwrap().remove(op)
    }

    fn begin_transition(object: &mut RemoteObject, settle_reads: u32, settles_to: SettleTo) {
        object.status = match settles_to {
            SettleTo::Ready => Status::Provisioning,
            SettleTo::Gone => Status::Deleting,
        };
        object.pending_reads = settle_reads;
        object.settles_to = settles_to;
    }

    fn check_token(object: &RemoteObject, token: &ConcurrencyToken) -> Result<(), RemoteError> {
        if token_string(object.token) != token.as_str() {
            return Err(RemoteError::api(
                codes::INVALID_TOKEN,
                format!(
                    "token {} does not match current token {}",
                    token,
                    token_string(object.token)
                ),
            ));
        }
        Ok(())
    }
}

fn token_string(version: u64) -> String {
    format!("tok-{version}")
}

fn observation_of(object: &RemoteObject) -> Observation {
    Observation {
        id: object.id,
        token: ConcurrencyToken::new(token_string(object.token)),
        status: object.status,
        scalars: object.scalars.clone(),
        collections: object.collections.clone(),
        observed_at: Utc::now(),
    }
}

#[async_trait]
impl RemoteClient for InMemoryRemote {
    async fn create(&self, desired: &DesiredState) -> Result<Created, RemoteError> {
        self.record("create");
        if let Some(err) = self.take_scripted_failure("create") {
            return Err(err);
        }

        let mut slot = self.object.lock().unwrap();
        if slot.is_some() {
            return Err(RemoteError::api("AlreadyExists", "object already exists"));
        }

        let mut object = RemoteObject {
            id: ResourceId::new(),
            token: 1,
            status: Status::Provisioning,
            scalars: desired.scalars.clone(),
            collections: desired.collections.clone(),
            pending_reads: 0,
            settles_to: SettleTo::Ready,
        };
        Self::begin_transition(&mut object, self.settle_reads, SettleTo::Ready);
        let created = Created {
            id: object.id,
            token: ConcurrencyToken::new(token_string(object.token)),
        };
        debug!(resource_id = %created.id, "[MEM] created object");
        *slot = Some(object);
        Ok(created)
    }

    async fn read(&self, id: &ResourceId) -> Result<Observation, RemoteError> {
        self.record("read");
        if let Some(err) = self.take_scripted_failure("read") {
            return Err(err);
        }

        let mut slot = self.object.lock().unwrap();
        let Some(object) = slot.as_mut().filter(|o| o.id == *id) else {
            return Err(RemoteError::not_found(format!("no object {id}")));
        };

        if object.pending_reads > 0 {
            object.pending_reads -= 1;
            return Ok(observation_of(object));
        }

        match object.settles_to {
            SettleTo::Ready => {
                object.status = Status::Ready;
                Ok(observation_of(object))
            }
            SettleTo::Gone => {
                *slot = None;
                Err(RemoteError::not_found(format!("object {id} deleted")))
            }
        }
    }

    async fn update_scalar(
        &self,
        id: &ResourceId,
        field: &str,
        value: &Value,
        token: &ConcurrencyToken,
    ) -> Result<ConcurrencyToken, RemoteError> {
        self.record(format!("update_scalar:{field}"));
        if let Some(err) = self.take_scripted_failure("update_scalar") {
            return Err(err);
        }

        let mut slot = self.object.lock().unwrap();
        let Some(object) = slot.as_mut().filter(|o| o.id == *id) else {
            return Err(RemoteError::not_found(format!("no object {id}")));
        };
        Self::check_token(object, token)?;

        object.scalars.insert(field.to_string(), value.clone());
        object.token += 1;
        Ok(ConcurrencyToken::new(token_string(object.token)))
    }

    async fn add_elements(
        &self,
        id: &ResourceId,
        collection: &str,
        elements: &[Element],
        token: &ConcurrencyToken,
    ) -> Result<ConcurrencyToken, RemoteError> {
        self.record(format!("add_elements:{collection}"));
        if let Some(err) = self.take_scripted_failure("add_elements") {
            return Err(err);
        }

        let mut slot = self.object.lock().unwrap();
        let Some(object) = slot.as_mut().filter(|o| o.id == *id) else {
            return Err(RemoteError::not_found(format!("no object {id}")));
        };
        Self::check_token(object, token)?;

        object
            .collections
            .entry(collection.to_string())
            .or_default()
            .extend_from_slice(elements);
        object.token += 1;
        Self::begin_transition(object, self.settle_reads, SettleTo::Ready);
        Ok(ConcurrencyToken::new(token_string(object.token)))
    }

    async fn remove_elements(
        &self,
        id: &ResourceId,
        collection: &str,
        keys: &[ElementId],
        token: &ConcurrencyToken,
    ) -> Result<ConcurrencyToken, RemoteError> {
        self.record(format!("remove_elements:{collection}"));
        if let Some(err) = self.take_scripted_failure("remove_elements") {
            return Err(err);
        }

        let mut slot = self.object.lock().unwrap();
        let Some(object) = slot.as_mut().filter(|o| o.id == *id) else {
            return Err(RemoteError::not_found(format!("no object {id}")));
        };
        Self::check_token(object, token)?;

        if let Some(elements) = object.collections.get_mut(collection) {
            elements.retain(|e| !keys.contains(&e.id));
        }
        object.token += 1;
        Self::begin_transition(object, self.settle_reads, SettleTo::Ready);
        Ok(ConcurrencyToken::new(token_string(object.token)))
    }

    async fn delete(&self, id: &ResourceId) -> Result<(), RemoteError> {
        self.record("delete");
        if let Some(err) = self.take_scripted_failure("delete") {
            return Err(err);
        }

        let mut slot = self.object.lock().unwrap();
        let Some(object) = slot.as_mut().filter(|o| o.id == *id) else {
            return Err(RemoteError::not_found(format!("no object {id}")));
        };

        Self::begin_transition(object, self.settle_reads, SettleTo::Gone);
        debug!(resource_id = %id, "[MEM] deletion started");
        Ok(())
    }
}
