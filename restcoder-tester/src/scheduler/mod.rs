//! Scheduler layer for the worker
//!
//! This layer polls the submission queue and hands every submission to the
//! pipeline, bounding how many run at the same time.

pub mod poller;

pub use poller::JobPoller;
