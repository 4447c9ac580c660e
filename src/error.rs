//! Error type shared by the proxy, its promises and its scopes.

use thiserror::Error;

/// Result alias for proxy operations over a backend with error type `E`.
pub type Result<T, E> = std::result::Result<T, Error<E>>;

/// Everything that can go wrong while dispatching or flushing commands.
///
/// Errors are `Clone` because a single flush failure is handed to every
/// promise of the failed batch, and each promise replays its error on every
/// later force.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error<E> {
    /// The backend rejected a command or a transaction. The backend's own
    /// error is passed through unchanged.
    #[error(transparent)]
    Backend(E),

    /// The backend returned a different number of replies than there were
    /// queued commands, so replies can't be matched to their promises.
    #[error("transaction returned {actual} replies for {expected} queued commands")]
    ReplyCountMismatch { expected: usize, actual: usize },

    /// A reply callback was passed with a command that would have been
    /// deferred. The callback can't be carried across the eventual flush.
    #[error("reply callbacks are not supported for deferred command `{command}`")]
    CallbackNotSupported { command: String },

    /// The batch holding this command was abandoned because the backend
    /// panicked while running it. The command may or may not have reached
    /// the store.
    #[error("batch aborted: the backend panicked while running it")]
    Aborted,
}
