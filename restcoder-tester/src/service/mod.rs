//! Service layer
//!
//! Services contain the per-run machinery the pipeline is assembled from:
//! log collection, the operator run log, ordered progress delivery, user
//! process launching and the bridge to the test runner.
//!
//! Services with an external collaborator are trait-based to enable testing
//! and dependency injection.

pub mod bridge;
pub mod launcher;
pub mod log_collector;
pub mod relay;
pub mod run_log;

// Re-export traits
pub use bridge::TestRunner;

// Re-export implementations
pub use bridge::TestRunnerBridge;
