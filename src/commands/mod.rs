//! Command implementations
//!
//! Each module corresponds to a subcommand in the CLI.

pub mod dashboard;
pub mod report;

pub use report::OutputFormat;
