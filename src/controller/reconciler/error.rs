//! Reconcile errors and their classification.

use crate::certificates::CertificateError;
use crate::grants::GrantError;
use crate::owned::{IncompleteOwner, OwnedError};
use crate::rbac::DiscoveryError;
use crate::resources::GenerateError;
use kube::runtime::finalizer;

/// How the runtime reacts to a failed pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Short fixed requeue: conflicts, reduced duplicates, recreated bindings
    Requeue,
    /// A referenced object is missing or not ready yet
    Dependency,
    /// The parent spec is invalid; reported on a condition
    InvalidInput,
    Internal,
}

impl ErrorClass {
    pub fn metric_label(self) -> &'static str {
        match self {
            Self::Requeue => "requeue",
            Self::Dependency => "dependency",
            Self::InvalidInput => "invalid-input",
            Self::Internal => "internal",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcilerError {
    #[error(transparent)]
    Owned(#[from] OwnedError),

    #[error(transparent)]
    Generate(#[from] GenerateError),

    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error(transparent)]
    Grant(#[from] GrantError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Owner(#[from] IncompleteOwner),

    #[error("failed to compute fingerprint: {0}")]
    Fingerprint(#[from] serde_json::Error),

    /// A referenced object is missing or not ready
    #[error("{0}")]
    Dependency(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("status of {0} was modified concurrently")]
    StatusConflict(String),

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error("finalizer error: {0}")]
    Finalizer(#[source] Box<finalizer::Error<ReconcilerError>>),
}

impl ReconcilerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Owned(e) if e.is_requeue() => ErrorClass::Requeue,
            Self::Generate(GenerateError::InvalidSpec(_)) => ErrorClass::InvalidInput,
            Self::Generate(GenerateError::CaBundleMissing) => ErrorClass::Dependency,
            Self::Certificate(e) => match e {
                CertificateError::CaSecretMissing { .. }
                | CertificateError::CaSecretInvalid { .. }
                | CertificateError::SecretNotFound { .. } => ErrorClass::Dependency,
                CertificateError::Owned(owned) if owned.is_requeue() => ErrorClass::Requeue,
                CertificateError::Owned(_) | CertificateError::Pki(_) => ErrorClass::Internal,
            },
            Self::Grant(GrantError::EmptyWatchNamespaces) | Self::InvalidInput(_) => {
                ErrorClass::InvalidInput
            }
            Self::Grant(GrantError::GrantMissing { .. }) | Self::Dependency(_) => {
                ErrorClass::Dependency
            }
            Self::StatusConflict(_) => ErrorClass::Requeue,
            Self::Kube(kube::Error::Api(response)) if response.code == 409 => ErrorClass::Requeue,
            Self::Finalizer(e) => match e.as_ref() {
                finalizer::Error::ApplyFailed(inner) | finalizer::Error::CleanupFailed(inner) => {
                    inner.class()
                }
                _ => ErrorClass::Internal,
            },
            _ => ErrorClass::Internal,
        }
    }
}
