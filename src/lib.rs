pub mod app;
pub mod cli;
pub mod clock;
pub mod config;
pub mod decision;
pub mod journey;
pub mod ledger;
pub mod logging;
pub mod oracle;
pub mod permissions;
pub mod providers;
pub mod treatments;
pub mod types;
