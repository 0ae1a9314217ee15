//! Typed errors for the swap dispatcher.

use thiserror::Error;

/// Staging protocol violations.
///
/// These are never user-facing: they mean the caller drove the dispatcher
/// out of order, which is a bug in the caller. No state is changed when one
/// is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// `queue_staging` while a staging set already exists.
    #[error("A staging listener set is already queued")]
    AlreadyQueued,

    /// `promote_staging` / `unqueue_staging` without a queued staging set.
    #[error("No staging listener set is queued")]
    NotQueued,
}
