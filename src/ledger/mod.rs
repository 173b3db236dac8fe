pub mod error;
pub mod ledger;
pub mod types;

pub use error::{LedgerError, LedgerErrorKind};
pub use ledger::AllocationLedger;
pub use types::{AllocationReceipt, AllocationRecord, Availability, LedgerEntry};
