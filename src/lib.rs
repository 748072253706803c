//! Academic records with AI-assisted pass/fail reports.
//!
//! Students, subjects and grades live in Postgres. For a selected subject the
//! grade rows and roster are sent to a hosted text-generation model, whose
//! answer is decoded defensively and rendered into a paginated report.

pub mod analysis;
pub mod db;
pub mod error;
pub mod form;
pub mod grading;
pub mod models;
pub mod narrative;
pub mod report;
pub mod store;

pub use error::{GradebookError, Result};
