use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogErrorKind {
    NotFound,
    Duplicate,
    NotCustom,
    InvalidInput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogError {
    pub kind: CatalogErrorKind,
    pub message: String,
}

impl CatalogError {
    pub fn new(kind: CatalogErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CatalogError {}

pub fn not_found(message: impl Into<String>) -> CatalogError {
    CatalogError::new(CatalogErrorKind::NotFound, message)
}

pub fn duplicate(message: impl Into<String>) -> CatalogError {
    CatalogError::new(CatalogErrorKind::Duplicate, message)
}

pub fn not_custom(message: impl Into<String>) -> CatalogError {
    CatalogError::new(CatalogErrorKind::NotCustom, message)
}

pub fn invalid_input(message: impl Into<String>) -> CatalogError {
    CatalogError::new(CatalogErrorKind::InvalidInput, message)
}
