//! The interface a key-value client has to provide to be batched.

use std::fmt::Debug;

/// A connection to a key-value store that can run named commands, either one
/// at a time or inside a transaction.
///
/// The proxy owns its backend and serializes all access to it, so methods
/// take `&mut self` and implementations need no locking of their own. The
/// bounds on the associated types let a proxy and its promises be shared
/// between threads.
///
/// A transaction is `multi`, then one `queue` per command, then `exec`, which
/// must return exactly one reply per queued command, in queue order.
pub trait Backend: Send {
    /// A single command argument.
    type Arg: Send;

    /// A single command reply. Cloned when a promise is forced.
    type Reply: Clone + Send + Sync;

    /// The backend's error type. Cloned into every promise of a failed
    /// batch.
    type Error: Clone + Debug + Send + Sync;

    /// Run a single command directly and return its reply.
    fn call(&mut self, command: &str, args: &[Self::Arg]) -> Result<Self::Reply, Self::Error>;

    /// Open a transaction.
    fn multi(&mut self) -> Result<(), Self::Error>;

    /// Issue a command inside an open transaction. The interim reply (for
    /// instance a `QUEUED` status) is discarded; the real reply comes from
    /// [`exec`](Backend::exec).
    fn queue(&mut self, command: &str, args: &[Self::Arg]) -> Result<(), Self::Error> {
        self.call(command, args).map(drop)
    }

    /// Commit the open transaction and return one reply per queued command.
    fn exec(&mut self) -> Result<Vec<Self::Reply>, Self::Error>;

    /// Abandon the open transaction. Called on a best-effort basis after a
    /// failure between `multi` and `exec`.
    fn discard(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
