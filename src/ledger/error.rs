use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerErrorKind {
    NotFound,
    Exhausted,
    InvalidInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct LedgerError {
    pub kind: LedgerErrorKind,
    pub message: String,
}

impl LedgerError {
    pub fn new(kind: LedgerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.kind == LedgerErrorKind::Exhausted
    }
}

pub fn not_found(message: impl Into<String>) -> LedgerError {
    LedgerError::new(LedgerErrorKind::NotFound, message)
}

pub fn exhausted(message: impl Into<String>) -> LedgerError {
    LedgerError::new(LedgerErrorKind::Exhausted, message)
}

pub fn invalid_input(message: impl Into<String>) -> LedgerError {
    LedgerError::new(LedgerErrorKind::InvalidInput, message)
}
