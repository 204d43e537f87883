use std::time::Duration;

use thiserror::Error;

/// Failure to locate the endpoints of a partition.
#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    #[error("partition substrate unavailable: {0}")]
    Unavailable(String),
    #[error("partition not found: {0}")]
    NotFound(String),
}

impl ResolutionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ResolutionError::Unavailable(_))
    }
}

/// Failure of one dispatch attempt against a replica.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("replica unavailable, status {0}")]
    Unavailable(u16),
    #[error("invalid endpoint address '{0}': {1}")]
    InvalidEndpoint(String, String),
    #[error("malformed request: {0}")]
    InvalidRequest(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("request cancelled")]
    Cancelled,
}

impl DispatchError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DispatchError::Connect(_)
                | DispatchError::Timeout(_)
                | DispatchError::Unavailable(_)
        )
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DispatchError::Connect(format!("timeout: {err}"))
        } else if err.is_connect() {
            DispatchError::Connect(err.to_string())
        } else if err.is_builder() {
            DispatchError::InvalidRequest(err.to_string())
        } else if err.is_request() {
            // failed while sending, e.g. the peer reset the connection
            DispatchError::Connect(err.to_string())
        } else {
            DispatchError::Protocol(err.to_string())
        }
    }
}

/// Either kind of failure an attempt can end with.
#[derive(Debug, Clone, Error)]
pub enum Fault {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl Fault {
    pub fn is_transient(&self) -> bool {
        match self {
            Fault::Resolution(e) => e.is_transient(),
            Fault::Dispatch(e) => e.is_transient(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RetryError {
    #[error("gave up after {attempts} attempts, last fault: {last}")]
    Exhausted { attempts: u32, last: Fault },
    #[error(transparent)]
    Fatal(Fault),
}

impl RetryError {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

/// Errors building or mutating a partition table.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("invalid topology for service '{0}': {1}")]
    InvalidTopology(String, String),
    #[error("no such service: {0}")]
    UnknownService(String),
    #[error("service '{0}' has no partition {1}")]
    UnknownPartition(String, usize),
}
