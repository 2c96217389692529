//! Failure taxonomy for the engine.
//!
//! Raw failures from a [`RemoteClient`](crate::client::RemoteClient) are
//! classified in exactly one place ([`classify`]) into four buckets:
//!
//! - **NotFound**: the object or sub-resource does not exist remotely
//! - **Conflict**: the supplied concurrency token is stale
//! - **Transient**: retryable infrastructure failure (throttling, transport)
//! - **Fatal**: everything else, propagated immediately
//!
//! Both the reconciler and the waiter consult this classification. Surfaced
//! errors ([`ReconcileError`]) always name the failing operation, the object
//! identifier, and the classified reason.

use std::time::Duration;

use thiserror::Error;

use crate::state::Status;

/// Error codes recognized by the classifier.
///
/// RemoteClient implementations map their API's native error codes onto
/// these when constructing [`RemoteError::Api`].
pub mod codes {
    pub const RESOURCE_NOT_FOUND: &str = "ResourceNotFound";
    pub const INVALID_TOKEN: &str = "InvalidToken";
    pub const THROTTLING: &str = "Throttling";
    pub const SERVICE_UNAVAILABLE: &str = "ServiceUnavailable";
    pub const INVALID_REQUEST: &str = "InvalidRequest";
}

/// A raw failure returned by a remote API call, before classification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote API rejected the call with a coded error.
    #[error("remote API error {code}: {message}")]
    Api { code: String, message: String },

    /// The call never reached the remote API.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl RemoteError {
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::api(codes::RESOURCE_NOT_FOUND, message)
    }

    pub fn stale_token(message: impl Into<String>) -> Self {
        Self::api(codes::INVALID_TOKEN, message)
    }
}

/// Classification of a raw remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    Conflict,
    Transient,
    Fatal,
}

/// Map a raw failure into its class.
pub fn classify(err: &RemoteError) -> ErrorClass {
    match err {
        RemoteError::Transport(_) => ErrorClass::Transient,
        RemoteError::Api { code, .. } => match code.as_str() {
            codes::RESOURCE_NOT_FOUND => ErrorClass::NotFound,
            codes::INVALID_TOKEN => ErrorClass::Conflict,
            codes::THROTTLING | codes::SERVICE_UNAVAILABLE => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        },
    }
}

/// True for the "element currently inaccessible" rejection some remote APIs
/// return when detaching an element that a prior operation already detached.
///
/// Collection removals may treat this as a soft success when the collection's
/// [`CollectionSpec`](crate::kind::CollectionSpec) policy allows it.
pub fn is_inaccessible(err: &RemoteError) -> bool {
    matches!(
        err,
        RemoteError::Api { code, message }
            if code == codes::INVALID_REQUEST && message.contains("inaccessible")
    )
}

/// A classified, surfaced reconciliation failure.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The object no longer exists remotely; the caller should drop any
    /// cached reference.
    #[error("{op} {resource}: object no longer exists")]
    NotFound { op: &'static str, resource: String },

    /// A concurrent external mutation invalidated the concurrency token.
    /// Never retried internally; re-reconcile from a fresh read.
    #[error("{op} {resource}: concurrency token conflict: {source}")]
    Conflict {
        op: &'static str,
        resource: String,
        source: RemoteError,
    },

    /// A retryable infrastructure failure that aborted the pass.
    #[error("{op} {resource}: transient remote failure: {source}")]
    Transient {
        op: &'static str,
        resource: String,
        source: RemoteError,
    },

    /// An unclassifiable remote failure.
    #[error("{op} {resource}: {source}")]
    Fatal {
        op: &'static str,
        resource: String,
        source: RemoteError,
    },

    /// The waiter's deadline expired before the object settled.
    #[error("{op} {resource}: timed out after {elapsed:?} (last status: {last_status:?})")]
    Timeout {
        op: &'static str,
        resource: String,
        elapsed: Duration,
        last_status: Option<Status>,
    },

    /// The object reached a terminal status outside the expected sets.
    #[error("{op} {resource}: unexpected terminal status {status}")]
    UnexpectedStatus {
        op: &'static str,
        resource: String,
        status: Status,
    },

    /// The pass was canceled by the caller.
    #[error("{op} {resource}: canceled")]
    Canceled { op: &'static str, resource: String },
}

impl ReconcileError {
    /// Attach operation and identifier context to a raw remote failure.
    pub fn from_remote(op: &'static str, resource: impl Into<String>, err: RemoteError) -> Self {
        let resource = resource.into();
        match classify(&err) {
            ErrorClass::NotFound => ReconcileError::NotFound { op, resource },
            ErrorClass::Conflict => ReconcileError::Conflict {
                op,
                resource,
                source: err,
            },
            ErrorClass::Transient => ReconcileError::Transient {
                op,
                resource,
                source: err,
            },
            ErrorClass::Fatal => ReconcileError::Fatal {
                op,
                resource,
                source: err,
            },
        }
    }

    /// Attach operation and identifier context to a waiter failure.
    pub fn from_wait(
        op: &'static str,
        resource: impl Into<String>,
        err: crate::waiter::WaitError,
    ) -> Self {
        use crate::waiter::WaitError;

        let resource = resource.into();
        match err {
            WaitError::Timeout {
                elapsed,
                last_status,
            } => ReconcileError::Timeout {
                op,
                resource,
                elapsed,
                last_status,
            },
            WaitError::UnexpectedStatus { status } => ReconcileError::UnexpectedStatus {
                op,
                resource,
                status,
            },
            WaitError::Fatal(source) => ReconcileError::Fatal {
                op,
                resource,
                source,
            },
            WaitError::Canceled => ReconcileError::Canceled { op, resource },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_not_found() {
        let err = RemoteError::not_found("no such object");
        assert_eq!(classify(&err), ErrorClass::NotFound);
    }

    #[test]
    fn test_classify_conflict() {
        let err = RemoteError::stale_token("token expired");
        assert_eq!(classify(&err), ErrorClass::Conflict);
    }

    #[test]
    fn test_classify_transient() {
        assert_eq!(
            classify(&RemoteError::api(codes::THROTTLING, "slow down")),
            ErrorClass::Transient
        );
        assert_eq!(
            classify(&RemoteError::Transport("connection reset".into())),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_classify_fatal_by_default() {
        let err = RemoteError::api("AccessDenied", "nope");
        assert_eq!(classify(&err), ErrorClass::Fatal);
    }

    #[test]
    fn test_is_inaccessible() {
        let soft = RemoteError::api(
            codes::INVALID_REQUEST,
            "subnet is currently inaccessible",
        );
        assert!(is_inaccessible(&soft));

        // Same code, different message: not the soft-success case.
        let hard = RemoteError::api(codes::INVALID_REQUEST, "malformed element id");
        assert!(!is_inaccessible(&hard));
    }

    #[test]
    fn test_surfaced_error_names_op_and_resource() {
        let err = ReconcileError::from_remote(
            "update",
            "res_01HV4Z2WQXKJNM8GPQY6VBKC3D",
            RemoteError::stale_token("version 7 expected"),
        );
        let msg = err.to_string();
        assert!(msg.contains("update"));
        assert!(msg.contains("res_01HV4Z2WQXKJNM8GPQY6VBKC3D"));
        assert!(msg.contains("conflict"));
    }
}
