//! Core domain types
//!
//! These types describe a graded submission and its outcome. They are
//! shared between the worker (which executes submissions) and the API
//! client (which reports on them).

pub mod result;
pub mod submission;
