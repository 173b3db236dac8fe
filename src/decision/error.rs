use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionErrorKind {
    DataUnavailable,
    TreatmentNotFound,
    PermissionDenied,
    CapacityExhausted,
    OracleFailure,
    NoAvailableTreatments,
    InvalidInput,
    Internal,
}

impl DecisionErrorKind {
    /// Kinds that trigger an alternative search instead of ending the pipeline.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            DecisionErrorKind::PermissionDenied | DecisionErrorKind::CapacityExhausted
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DecisionError {
    pub kind: DecisionErrorKind,
    pub message: String,
}

impl DecisionError {
    pub fn new(kind: DecisionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

pub fn data_unavailable(message: impl Into<String>) -> DecisionError {
    DecisionError::new(DecisionErrorKind::DataUnavailable, message)
}

pub fn treatment_not_found(message: impl Into<String>) -> DecisionError {
    DecisionError::new(DecisionErrorKind::TreatmentNotFound, message)
}

pub fn permission_denied(message: impl Into<String>) -> DecisionError {
    DecisionError::new(DecisionErrorKind::PermissionDenied, message)
}

pub fn capacity_exhausted(message: impl Into<String>) -> DecisionError {
    DecisionError::new(DecisionErrorKind::CapacityExhausted, message)
}

pub fn oracle_failure(message: impl Into<String>) -> DecisionError {
    DecisionError::new(DecisionErrorKind::OracleFailure, message)
}

pub fn no_available_treatments(message: impl Into<String>) -> DecisionError {
    DecisionError::new(DecisionErrorKind::NoAvailableTreatments, message)
}

pub fn invalid_input(message: impl Into<String>) -> DecisionError {
    DecisionError::new(DecisionErrorKind::InvalidInput, message)
}

pub fn internal_error(message: impl Into<String>) -> DecisionError {
    DecisionError::new(DecisionErrorKind::Internal, message)
}
