pub mod catalog;
pub mod classify;
pub mod error;
pub mod parser;

pub use catalog::TreatmentCatalog;
pub use classify::{classification, classify_in_place};
pub use error::{CatalogError, CatalogErrorKind};
pub use parser::{ParsedTreatment, parse_treatment_text};
