//! Error types for fleet reconciliation.
//!
//! Every error aborts the current fleet pass. The classes below only differ
//! in what an operator should look at when the process exits.

use fleet_id::{IdError, PoolRef};
use thiserror::Error;

/// Result type for reconciliation operations.
pub type ScaleResult<T> = Result<T, ScaleError>;

/// Maximum number of response body bytes carried in an error.
const MAX_ERROR_BODY: usize = 512;

/// Errors that can occur while reconciling the fleet.
#[derive(Debug, Error)]
pub enum ScaleError {
    /// A configuration or secret record does not exist.
    #[error("{kind} '{namespace}/{name}' not found")]
    MissingRecord {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// A required field is absent from a record.
    #[error("{field} not specified in {record}")]
    MissingField { record: String, field: &'static str },

    /// A field is present but fails validation.
    #[error("invalid value in {record}: {source}")]
    InvalidValue {
        record: String,
        #[source]
        source: IdError,
    },

    /// The credential cannot be sent as an HTTP header value.
    #[error("credential in {record} contains characters not allowed in a header")]
    InvalidCredential { record: String },

    /// The HTTP client could not be built.
    #[error("failed to set up {service} client: {message}")]
    ClientSetup {
        service: &'static str,
        message: String,
    },

    /// The request never produced a response.
    #[error("{service} request failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// A cluster API call failed before producing a status.
    #[error("{service} request failed: {source}")]
    Cluster {
        service: &'static str,
        #[source]
        source: kube::Error,
    },

    /// The remote answered with a non-success status.
    #[error("{service} returned {status}: {body}")]
    RemoteStatus {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// The response body could not be decoded.
    #[error("failed to decode {service} response: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },

    /// Some launches of a batch succeeded before one failed.
    #[error("launched {launched} of {requested} workers for {pool}: {source}")]
    PartialLaunch {
        pool: PoolRef,
        launched: u32,
        requested: u32,
        #[source]
        source: Box<ScaleError>,
    },
}

/// Coarse error classes, used as a log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A pool is misconfigured and will not heal by itself.
    Configuration,
    /// A gateway call failed.
    Transport,
    /// Some workers were launched before a launch failed.
    PartialLaunch,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Configuration => write!(f, "configuration"),
            ErrorClass::Transport => write!(f, "transport"),
            ErrorClass::PartialLaunch => write!(f, "partial_launch"),
        }
    }
}

impl ScaleError {
    /// Build a transport error for a service.
    pub fn transport(service: &'static str, source: reqwest::Error) -> Self {
        ScaleError::Transport { service, source }
    }

    /// Build a remote status error, truncating the body.
    pub fn remote_status(service: &'static str, status: u16, body: &str) -> Self {
        let body = match body.char_indices().nth(MAX_ERROR_BODY) {
            Some((idx, _)) => format!("{}...", &body[..idx]),
            None => body.to_string(),
        };
        ScaleError::RemoteStatus {
            service,
            status,
            body,
        }
    }

    /// Translate a cluster client error. Status responses keep their code.
    pub fn cluster(service: &'static str, source: kube::Error) -> Self {
        match source {
            kube::Error::Api(response) => {
                Self::remote_status(service, response.code, &response.message)
            }
            kube::Error::SerdeError(e) => Self::decode(service, e),
            source => ScaleError::Cluster { service, source },
        }
    }

    /// Build a decode error for a service.
    pub fn decode(service: &'static str, message: impl std::fmt::Display) -> Self {
        ScaleError::Decode {
            service,
            message: message.to_string(),
        }
    }

    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            ScaleError::MissingRecord { .. }
            | ScaleError::MissingField { .. }
            | ScaleError::InvalidValue { .. }
            | ScaleError::InvalidCredential { .. }
            | ScaleError::ClientSetup { .. } => ErrorClass::Configuration,
            ScaleError::Transport { .. }
            | ScaleError::Cluster { .. }
            | ScaleError::RemoteStatus { .. }
            | ScaleError::Decode { .. } => ErrorClass::Transport,
            ScaleError::PartialLaunch { .. } => ErrorClass::PartialLaunch,
        }
    }
}
