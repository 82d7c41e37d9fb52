//! Actuator error type
//!
//! Callers branch on [`Error::kind`] and [`Error::requeue_after`] rather than
//! on message text.

use std::time::Duration;

use thiserror::Error;

use crate::cloud::CloudError;
use crate::store::StoreError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The machine's configuration can never succeed as written
    #[error("invalid machine configuration: {0}")]
    InvalidConfiguration(String),

    #[error("failed to create machine: {0}")]
    CreateMachine(String),

    #[error("failed to update machine: {0}")]
    UpdateMachine(String),

    #[error("failed to delete machine: {0}")]
    DeleteMachine(String),

    /// Not a failure: the caller should reconcile again after the delay
    #[error("requeue in {0:?}")]
    RequeueAfter(Duration),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode or decode {what}: {source}")]
    Serialization {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Several independent attempts failed
    #[error("[{}]", join(.0))]
    Aggregate(Vec<Error>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidConfiguration,
    CreateMachine,
    UpdateMachine,
    DeleteMachine,
    RequeueAfter,
    Cloud,
    Store,
    Serialization,
    Aggregate,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidConfiguration(_) => ErrorKind::InvalidConfiguration,
            Error::CreateMachine(_) => ErrorKind::CreateMachine,
            Error::UpdateMachine(_) => ErrorKind::UpdateMachine,
            Error::DeleteMachine(_) => ErrorKind::DeleteMachine,
            Error::RequeueAfter(_) => ErrorKind::RequeueAfter,
            Error::Cloud(_) => ErrorKind::Cloud,
            Error::Store(_) => ErrorKind::Store,
            Error::Serialization { .. } => ErrorKind::Serialization,
            Error::Aggregate(_) => ErrorKind::Aggregate,
        }
    }

    /// Retry delay, when this is a deliberate requeue
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Error::RequeueAfter(delay) => Some(*delay),
            _ => None,
        }
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Error::InvalidConfiguration(message.into())
    }

    pub fn create(message: impl Into<String>) -> Self {
        Error::CreateMachine(message.into())
    }

    pub fn update(message: impl Into<String>) -> Self {
        Error::UpdateMachine(message.into())
    }

    pub fn delete(message: impl Into<String>) -> Self {
        Error::DeleteMachine(message.into())
    }

    pub fn serialization(what: &'static str, source: serde_json::Error) -> Self {
        Error::Serialization { what, source }
    }

    /// Combine collected errors. `None` when nothing failed; nested
    /// aggregates are flattened.
    pub fn aggregate(errors: Vec<Error>) -> Option<Self> {
        let mut flat = Vec::with_capacity(errors.len());
        for error in errors {
            match error {
                Error::Aggregate(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.is_empty() {
            None
        } else {
            Some(Error::Aggregate(flat))
        }
    }
}

fn join(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requeue_is_distinguishable() {
        let err = Error::RequeueAfter(Duration::from_secs(20));
        assert_eq!(err.kind(), ErrorKind::RequeueAfter);
        assert_eq!(err.requeue_after(), Some(Duration::from_secs(20)));
        assert_eq!(Error::update("no instance").requeue_after(), None);
    }

    #[test]
    fn test_aggregate_flattens_and_formats() {
        assert!(Error::aggregate(vec![]).is_none());

        let nested = Error::aggregate(vec![Error::create("a"), Error::create("b")]).unwrap();
        let err = Error::aggregate(vec![nested, Error::delete("c")]).unwrap();
        match &err {
            Error::Aggregate(inner) => assert_eq!(inner.len(), 3),
            other => panic!("expected aggregate, got {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "[failed to create machine: a, failed to create machine: b, failed to delete machine: c]"
        );
    }

    #[test]
    fn test_cloud_error_converts() {
        let err: Error = CloudError::new("Throttling", "slow down").into();
        assert_eq!(err.kind(), ErrorKind::Cloud);
        assert_eq!(err.to_string(), "Throttling: slow down");
    }
}
