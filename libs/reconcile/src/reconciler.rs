//! Orchestration of one full lifecycle operation for one managed object.
//!
//! A reconciler instance owns one pass: it reads state, computes the delta,
//! issues mutations strictly in precedence order while carrying the
//! concurrency token forward, and waits out the remote system's asynchronous
//! transitions. Mutations are never pipelined or reordered; each one
//! synchronously awaits its response (and, where required, the waiter)
//! before the next is issued.
//!
//! Multiple distinct objects may be reconciled concurrently by independent
//! instances; serialization against any single object is delegated to the
//! remote system's token check, and a conflict is surfaced, never resolved
//! locally.

use std::sync::Arc;

use steward_id::{RequestId, ResourceId};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::client::RemoteClient;
use crate::diff::ChangeSet;
use crate::error::{classify, is_inaccessible, ErrorClass, ReconcileError};
use crate::kind::KindSpec;
use crate::state::{DesiredState, Observation, Operation};
use crate::waiter::wait;

/// Drives create/update/delete passes for one resource kind.
pub struct Reconciler {
    client: Arc<dyn RemoteClient>,
    spec: KindSpec,
}

impl Reconciler {
    pub fn new(client: Arc<dyn RemoteClient>, spec: KindSpec) -> Self {
        Self { client, spec }
    }

    /// Run one full reconciliation pass to completion or a surfaced failure.
    ///
    /// Returns the final settled snapshot, or `None` after a delete.
    #[instrument(
        skip(self, op, cancel),
        fields(kind = %self.spec.kind, op = op.name(), request_id = %RequestId::new())
    )]
    pub async fn reconcile(
        &self,
        op: Operation,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<Option<Observation>, ReconcileError> {
        match op {
            Operation::Create { desired } => {
                self.create(&desired, &mut cancel).await.map(Some)
            }
            Operation::Update { desired, observed } => self
                .update(&desired, *observed, &mut cancel)
                .await
                .map(Some),
            Operation::Delete { id } => self.delete(&id, &mut cancel).await.map(|()| None),
        }
    }

    async fn create(
        &self,
        desired: &DesiredState,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Observation, ReconcileError> {
        let created = self
            .client
            .create(desired)
            .await
            .map_err(|e| ReconcileError::from_remote("create", &self.spec.kind, e))?;
        let id = created.id;
        info!(resource_id = %id, "created remotely, waiting for ready");

        // Creation is not rolled back on a failed or timed-out wait; the
        // object is left as created and the error is surfaced.
        let settled = wait(&self.spec.create_wait, || self.client.read(&id), cancel)
            .await
            .map_err(|e| ReconcileError::from_wait("create", id.to_string(), e))?;

        settled.ok_or(ReconcileError::NotFound {
            op: "create",
            resource: id.to_string(),
        })
    }

    async fn delete(
        &self,
        id: &ResourceId,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), ReconcileError> {
        match self.client.delete(id).await {
            Ok(()) => {}
            Err(e) if classify(&e) == ErrorClass::NotFound => {
                debug!(resource_id = %id, "already deleted");
                return Ok(());
            }
            Err(e) => return Err(ReconcileError::from_remote("delete", id.to_string(), e)),
        }

        wait(&self.spec.delete_wait, || self.client.read(id), cancel)
            .await
            .map_err(|e| ReconcileError::from_wait("delete", id.to_string(), e))?;
        info!(resource_id = %id, "deletion complete");
        Ok(())
    }

    async fn update(
        &self,
        desired: &DesiredState,
        observed: Observation,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Observation, ReconcileError> {
        let changes = ChangeSet::compute(&self.spec, desired, &observed);
        if changes.is_empty() {
            debug!(resource_id = %observed.id, "already converged, nothing to do");
            return Ok(observed);
        }

        let id = observed.id;
        let mut token = observed.token.clone();

        // Phases 1-4: scalar fields, guard-disabling toggles first, policy
        // references last. Each response's token feeds the next mutation.
        for change in changes.scalars_in_order() {
            token = self
                .client
                .update_scalar(&id, &change.field, &change.value, &token)
                .await
                .map_err(|e| ReconcileError::from_remote("update", id.to_string(), e))?;
            debug!(resource_id = %id, field = %change.field, "updated scalar field");
        }

        // Phase 5: collection additions, before removals, so a dependent
        // capability is never under-provisioned in between. The token an
        // associate-type call returns can race the real state transition, so
        // the trustworthy token is the one from the settled re-read.
        for delta in &changes.collections {
            if delta.to_add.is_empty() {
                continue;
            }
            self.client
                .add_elements(&id, &delta.name, &delta.to_add, &token)
                .await
                .map_err(|e| ReconcileError::from_remote("update", id.to_string(), e))?;
            debug!(
                resource_id = %id,
                collection = %delta.name,
                added = delta.to_add.len(),
                "associated elements, waiting for ready"
            );
            token = self.settled_token(&id, cancel).await?;
        }

        // Phase 6: collection removals.
        for delta in &changes.collections {
            if delta.to_remove.is_empty() {
                continue;
            }
            match self
                .client
                .remove_elements(&id, &delta.name, &delta.to_remove, &token)
                .await
            {
                // The response token is discarded; the settled re-read below
                // provides the next trustworthy one.
                Ok(_premature) => {
                    debug!(
                        resource_id = %id,
                        collection = %delta.name,
                        removed = delta.to_remove.len(),
                        "disassociated elements, waiting for ready"
                    );
                    token = self.settled_token(&id, cancel).await?;
                }
                Err(e) if delta.ignore_inaccessible_removal && is_inaccessible(&e) => {
                    warn!(
                        resource_id = %id,
                        collection = %delta.name,
                        error = %e,
                        "removal target inaccessible, treating as already detached"
                    );
                }
                Err(e) => {
                    return Err(ReconcileError::from_remote("update", id.to_string(), e))
                }
            }
        }

        let settled = self
            .client
            .read(&id)
            .await
            .map_err(|e| ReconcileError::from_remote("update", id.to_string(), e))?;
        info!(
            resource_id = %id,
            status = %settled.status,
            "reconciliation pass complete"
        );
        Ok(settled)
    }

    /// Wait for the object to leave its pending status, then return the
    /// token from the settled snapshot.
    async fn settled_token(
        &self,
        id: &ResourceId,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<crate::state::ConcurrencyToken, ReconcileError> {
        let settled = wait(&self.spec.update_wait, || self.client.read(id), cancel)
            .await
            .map_err(|e| ReconcileError::from_wait("update", id.to_string(), e))?;
        settled
            .map(|o| o.token)
            .ok_or(ReconcileError::NotFound {
                op: "update",
                resource: id.to_string(),
            })
    }
}
