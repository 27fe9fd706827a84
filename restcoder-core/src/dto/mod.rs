//! Data Transfer Objects
//!
//! Messages exchanged with collaborators outside the pipeline:
//! progress notifications pushed to the grading API and the line-delimited
//! protocol spoken with the isolated test-runner process.

pub mod progress;
pub mod runner;
