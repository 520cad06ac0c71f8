use crate::coordinator::InstanceState;
use thiserror::Error;

/// Boxed OS level cause of a failure
pub type PlatformError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("The application identity is missing from the build metadata")]
    MissingIdentity,
    #[error("Invalid application identity {0:?}: {1}")]
    InvalidIdentity(String, String),
    #[error("Unable to acquire the instance lock {key}: {source}")]
    AcquisitionDenied {
        key: String,
        #[source]
        source: PlatformError,
    },
    #[error("Unable to signal the running instance on {key}: {source}")]
    SignalDeliveryFailed {
        key: String,
        #[source]
        source: PlatformError,
    },
    #[error("Unable to listen for show requests on {key}: {source}")]
    ListenerRegistrationFailed {
        key: String,
        #[source]
        source: PlatformError,
    },
    #[error("Unable to release the instance lock {key}: {source}")]
    ReleaseFailed {
        key: String,
        #[source]
        source: PlatformError,
    },
    #[error("Operation {operation} is not valid in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: InstanceState,
    },
}

impl Error {
    pub(crate) fn denied<E: Into<PlatformError>>(key: &crate::InstanceKey, e: E) -> Self {
        Error::AcquisitionDenied {
            key: key.to_string(),
            source: e.into(),
        }
    }

    pub(crate) fn undelivered<E: Into<PlatformError>>(key: &crate::InstanceKey, e: E) -> Self {
        Error::SignalDeliveryFailed {
            key: key.to_string(),
            source: e.into(),
        }
    }

    pub(crate) fn unregistered<E: Into<PlatformError>>(key: &crate::InstanceKey, e: E) -> Self {
        Error::ListenerRegistrationFailed {
            key: key.to_string(),
            source: e.into(),
        }
    }
}
