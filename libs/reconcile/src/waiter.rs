//! Polling waiter for asynchronous remote state transitions.
//!
//! A waiter repeatedly probes the remote object until it reaches a target
//! status, disappears (when the target set is empty), fails terminally, or a
//! wall-clock deadline expires. The per-probe transition logic is a pure
//! function ([`step`]) over an explicit state machine, so tests can assert
//! transitions without timers; [`wait`] adds the timing, the deadline, and
//! cancellation around it.
//!
//! # States
//!
//! Polling → Succeeded | Failed | TimedOut (the latter three terminal).

use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{classify, ErrorClass, RemoteError};
use crate::state::{Observation, Status};

/// What a wait is looking for, and how patiently.
#[derive(Debug, Clone)]
pub struct WaitSpec {
    /// Statuses that mean "still settling"; keep polling.
    pub pending: BTreeSet<Status>,

    /// Statuses that mean "done". Empty means the object must no longer
    /// exist.
    pub target: BTreeSet<Status>,

    /// Wall-clock deadline for the whole wait.
    pub timeout: Duration,

    /// Sleep once before the first probe. Guards against remote APIs that
    /// report an "already settled" status for a brief window right after a
    /// mutating call returns.
    pub initial_delay: Duration,

    /// Sleep between probes.
    pub poll_interval: Duration,
}

impl WaitSpec {
    /// Wait for one of `target`, treating `pending` as still-settling.
    ///
    /// Invariant: `pending` and `target` are disjoint.
    pub fn new(
        pending: impl IntoIterator<Item = Status>,
        target: impl IntoIterator<Item = Status>,
        timeout: Duration,
    ) -> Self {
        let pending: BTreeSet<Status> = pending.into_iter().collect();
        let target: BTreeSet<Status> = target.into_iter().collect();
        debug_assert!(
            pending.is_disjoint(&target),
            "pending and target statuses must be disjoint"
        );
        Self {
            pending,
            target,
            timeout,
            initial_delay: Duration::ZERO,
            poll_interval: crate::kind::DEFAULT_POLL_INTERVAL,
        }
    }

    /// Wait for the object to no longer exist.
    pub fn until_gone(pending: impl IntoIterator<Item = Status>, timeout: Duration) -> Self {
        Self::new(pending, BTreeSet::new(), timeout)
    }

    pub fn poll_every(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn delay_first_poll(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }
}

/// Terminal wait failures.
#[derive(Debug, Error)]
pub enum WaitError {
    /// Deadline expired while still polling.
    #[error("timed out after {elapsed:?} (last status: {last_status:?})")]
    Timeout {
        elapsed: Duration,
        last_status: Option<Status>,
    },

    /// The object reached a status in neither the pending nor target set.
    #[error("unexpected terminal status {status}")]
    UnexpectedStatus { status: Status },

    /// A probe failed with an unclassifiable error.
    #[error("probe failed: {0}")]
    Fatal(RemoteError),

    /// The caller canceled the wait.
    #[error("wait canceled")]
    Canceled,
}

/// Outcome of evaluating one probe result against a [`WaitSpec`].
#[derive(Debug)]
pub enum Step {
    /// Still settling (or a retryable probe failure); poll again.
    Pending,

    /// Terminal success. `None` means the object is gone, which is the
    /// success condition when the target set is empty.
    Succeeded(Option<Observation>),

    /// Terminal failure.
    Failed(WaitError),
}

/// The per-probe transition rule. Pure; all timing lives in [`wait`].
pub fn step(spec: &WaitSpec, probed: Result<Observation, RemoteError>) -> Step {
    match probed {
        Ok(observation) => {
            if spec.target.contains(&observation.status) {
                Step::Succeeded(Some(observation))
            } else if spec.pending.contains(&observation.status) {
                Step::Pending
            } else {
                Step::Failed(WaitError::UnexpectedStatus {
                    status: observation.status,
                })
            }
        }
        Err(err) => match classify(&err) {
            ErrorClass::NotFound if spec.target.is_empty() => Step::Succeeded(None),
            // Not visible yet (or deleted out from under a non-empty target
            // wait, which the deadline will catch): keep polling.
            ErrorClass::NotFound => Step::Pending,
            ErrorClass::Fatal => Step::Failed(WaitError::Fatal(err)),
            ErrorClass::Conflict | ErrorClass::Transient => {
                warn!(error = %err, "retryable probe failure, continuing to poll");
                Step::Pending
            }
        },
    }
}

/// Poll `probe` under `spec` until a terminal state.
///
/// Returns the settled snapshot, or `None` when an empty target set was
/// satisfied by the object's absence. The wait is aborted promptly when
/// `cancel` flips to `true` (or its sender is dropped).
pub async fn wait<P, Fut>(
    spec: &WaitSpec,
    mut probe: P,
    cancel: &mut watch::Receiver<bool>,
) -> Result<Option<Observation>, WaitError>
where
    P: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Observation, RemoteError>>,
{
    let started = Instant::now();
    let mut last_status: Option<Status> = None;

    if spec.initial_delay > Duration::ZERO {
        sleep_or_cancel(spec.initial_delay, cancel).await?;
    }

    loop {
        let probed = probe().await;
        if let Ok(observation) = &probed {
            last_status = Some(observation.status);
        }

        match step(spec, probed) {
            Step::Succeeded(observation) => {
                debug!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "wait succeeded"
                );
                return Ok(observation);
            }
            Step::Failed(err) => return Err(err),
            Step::Pending => {}
        }

        let elapsed = started.elapsed();
        if elapsed >= spec.timeout {
            return Err(WaitError::Timeout {
                elapsed,
                last_status,
            });
        }

        let remaining = spec.timeout - elapsed;
        sleep_or_cancel(spec.poll_interval.min(remaining), cancel).await?;
    }
}

async fn sleep_or_cancel(
    duration: Duration,
    cancel: &mut watch::Receiver<bool>,
) -> Result<(), WaitError> {
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return Ok(()),
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    return Err(WaitError::Canceled);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::Utc;
    use steward_id::ResourceId;

    use crate::state::ConcurrencyToken;

    fn snapshot(status: Status) -> Observation {
        Observation {
            id: ResourceId::new(),
            token: ConcurrencyToken::new("tok-1"),
            status,
            scalars: BTreeMap::new(),
            collections: BTreeMap::new(),
            observed_at: Utc::now(),
        }
    }

    fn ready_wait(timeout: Duration) -> WaitSpec {
        WaitSpec::new([Status::Provisioning], [Status::Ready], timeout)
            .poll_every(Duration::from_secs(1))
    }

    fn unused_cancel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[test]
    fn test_step_target_status_succeeds() {
        let spec = ready_wait(Duration::from_secs(10));
        match step(&spec, Ok(snapshot(Status::Ready))) {
            Step::Succeeded(Some(obs)) => assert_eq!(obs.status, Status::Ready),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_step_pending_status_keeps_polling() {
        let spec = ready_wait(Duration::from_secs(10));
        assert!(matches!(
            step(&spec, Ok(snapshot(Status::Provisioning))),
            Step::Pending
        ));
    }

    #[test]
    fn test_step_unexpected_status_fails() {
        let spec = ready_wait(Duration::from_secs(10));
        match step(&spec, Ok(snapshot(Status::Failed))) {
            Step::Failed(WaitError::UnexpectedStatus { status }) => {
                assert_eq!(status, Status::Failed)
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_step_not_found_with_empty_target_succeeds() {
        let spec = WaitSpec::until_gone([Status::Deleting], Duration::from_secs(10));
        assert!(matches!(
            step(&spec, Err(RemoteError::not_found("gone"))),
            Step::Succeeded(None)
        ));
    }

    #[test]
    fn test_step_not_found_with_target_keeps_polling() {
        let spec = ready_wait(Duration::from_secs(10));
        assert!(matches!(
            step(&spec, Err(RemoteError::not_found("not visible yet"))),
            Step::Pending
        ));
    }

    #[test]
    fn test_step_transient_error_keeps_polling() {
        let spec = ready_wait(Duration::from_secs(10));
        let err = RemoteError::api(crate::error::codes::THROTTLING, "slow down");
        assert!(matches!(step(&spec, Err(err)), Step::Pending));
    }

    #[test]
    fn test_step_fatal_error_fails_immediately() {
        let spec = ready_wait(Duration::from_secs(10));
        let err = RemoteError::api("AccessDenied", "nope");
        assert!(matches!(step(&spec, Err(err)), Step::Failed(WaitError::Fatal(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_succeeds_on_third_probe() {
        let spec = ready_wait(Duration::from_secs(60));
        let calls = AtomicU32::new(0);
        let (_tx, mut cancel) = unused_cancel();

        let started = Instant::now();
        let result = wait(
            &spec,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Ok(snapshot(Status::Provisioning))
                    } else {
                        Ok(snapshot(Status::Ready))
                    }
                }
            },
            &mut cancel,
        )
        .await;

        assert_eq!(result.unwrap().unwrap().status, Status::Ready);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Exactly two inter-probe delays elapsed.
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_at_deadline() {
        // Timeout shorter than 3 poll intervals.
        let spec = ready_wait(Duration::from_millis(2500));
        let (_tx, mut cancel) = unused_cancel();

        let started = Instant::now();
        let err = wait(
            &spec,
            || async { Ok(snapshot(Status::Provisioning)) },
            &mut cancel,
        )
        .await
        .unwrap_err();

        match err {
            WaitError::Timeout { last_status, .. } => {
                assert_eq!(last_status, Some(Status::Provisioning));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        // At the deadline, not earlier and not indefinitely.
        assert_eq!(started.elapsed(), Duration::from_millis(2500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_gone_succeeds_immediately_on_not_found() {
        let spec = WaitSpec::until_gone([Status::Deleting], Duration::from_secs(60))
            .poll_every(Duration::from_secs(1));
        let calls = AtomicU32::new(0);
        let (_tx, mut cancel) = unused_cancel();

        let result = wait(
            &spec,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::not_found("already gone")) }
            },
            &mut cancel,
        )
        .await;

        assert!(result.unwrap().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_respects_initial_delay() {
        let spec = ready_wait(Duration::from_secs(60)).delay_first_poll(Duration::from_secs(30));
        let (_tx, mut cancel) = unused_cancel();

        let started = Instant::now();
        let result = wait(&spec, || async { Ok(snapshot(Status::Ready)) }, &mut cancel).await;

        assert!(result.is_ok());
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_cancellation_aborts_promptly() {
        let spec = ready_wait(Duration::from_secs(3600));
        let (tx, mut cancel) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            let _ = tx.send(true);
        });

        let started = Instant::now();
        let err = wait(
            &spec,
            || async { Ok(snapshot(Status::Provisioning)) },
            &mut cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, WaitError::Canceled));
        // Aborted during the second inter-probe sleep, well before timeout.
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
