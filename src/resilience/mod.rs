//! Error classification, tracking and the coordinator that ties them to
//! breakers and retry policies

pub mod classify;
pub mod coordinator;
pub mod tracker;

pub use classify::{classify, Classification};
pub use coordinator::{ErrorHandlingCoordinator, OperationOptions};
pub use tracker::{ErrorPatterns, ErrorRecord, ErrorTracker, MessageCount};
