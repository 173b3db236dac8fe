pub mod json_files;
pub mod memory;

pub use json_files::{JsonDirectoryProfileProvider, JsonPermissionProvider};
pub use memory::{InMemoryPermissionProvider, InMemoryProfileProvider};
