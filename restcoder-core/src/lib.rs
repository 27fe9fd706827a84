//! RestCoder Core
//!
//! Core types shared by the RestCoder grading worker and its clients.
//!
//! This crate contains:
//! - Domain types: submissions, services, processes and results
//! - DTOs: progress notifications and the test-runner child protocol
//! - Validation of raw submission jobs

pub mod domain;
pub mod dto;
pub mod validation;

pub use validation::ValidationError;
