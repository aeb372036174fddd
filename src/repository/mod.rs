//! Repository access coordination
//!
//! The working copy is the only shared mutable resource of the gate. Every
//! git-mutating sequence runs while holding a [`RepositoryLock`] so that
//! concurrent landings never interleave.

pub mod coordinator;
pub mod error;
pub mod lock;
pub mod operations;

pub use coordinator::RepositoryCoordinator;
pub use error::RepositoryError;
pub use lock::RepositoryLock;
pub use operations::{Committer, WorkingCopy};
