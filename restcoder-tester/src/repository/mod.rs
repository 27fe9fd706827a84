//! Repository layer
//!
//! Repositories abstract the worker's external collaborators: the
//! submission queue, the notification API and the log object store. They
//! hold no business logic.
//!
//! All repositories are trait-based so the pipeline can be exercised
//! against in-memory doubles.

mod notifications;
mod storage;
mod submissions;

// Re-export traits
pub use notifications::ProgressNotifier;
pub use storage::LogStorage;
pub use submissions::SubmissionSource;
