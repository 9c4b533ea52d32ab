//! covvar-web library crate.
//!
//! Job service that runs a multi-phase sequence classifier in the
//! background and serves its results as JSON, spreadsheet, PDF or CSV.

pub mod api;
pub mod config;
pub mod error;
pub mod job;
pub mod logging;
pub mod purge;
pub mod report;
pub mod results;
pub mod sequence;
pub mod submission;
pub mod utils;

pub use error::{Error, Result};
