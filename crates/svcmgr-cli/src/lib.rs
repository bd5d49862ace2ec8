//! Service Manager CLI Library
//!
//! Exposes the pieces of the `svcmgr` binary so they can be tested on their own.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;

pub use app::{DemoApp, DemoSummary};
pub use config::AppConfig;
pub use error::{CliError, Result};
