use std::{
    fmt::{self, Debug, Formatter},
    num::NonZeroUsize,
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{
    backend::Backend,
    buffer::{Buffer, Slot},
    command::{classify, Category},
    error::{Error, Result},
    promise::Promise,
};

const DEFAULT_MAX_BUFFERED: NonZeroUsize = match NonZeroUsize::new(1000) {
    Some(max) => max,
    None => panic!("default buffer limit must be nonzero"),
};

/// Configuration for a [`Proxy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRules {
    /// The number of buffered commands at which the buffer is flushed, even
    /// if none of their promises have been forced. This bounds the memory a
    /// proxy holds on behalf of callers that never look at their results.
    pub max_buffered: NonZeroUsize,
}

impl Default for BatchRules {
    fn default() -> Self {
        Self {
            max_buffered: DEFAULT_MAX_BUFFERED,
        }
    }
}

/// A promise for the reply to a deferred command.
pub type ReplyPromise<'a, B> =
    Promise<'a, <B as Backend>::Reply, Error<<B as Backend>::Error>>;

/// What [`Proxy::call`] hands back: an immediate command's reply, or a
/// promise for a deferred command's reply.
pub enum Response<'a, B: Backend> {
    Ready(B::Reply),
    Deferred(ReplyPromise<'a, B>),
}

impl<'a, B: Backend + 'a> Response<'a, B> {
    #[inline]
    pub fn is_deferred(&self) -> bool {
        matches!(self, Response::Deferred(..))
    }

    /// Get the reply, forcing the promise (and so flushing the buffer) if
    /// the command was deferred.
    pub fn wait(self) -> Result<B::Reply, B::Error> {
        match self {
            Response::Ready(reply) => Ok(reply),
            Response::Deferred(promise) => promise.force(),
        }
    }

    /// Convert into a promise. An immediate reply becomes an already
    /// fulfilled promise.
    pub fn into_promise(self) -> ReplyPromise<'a, B> {
        match self {
            Response::Ready(reply) => Promise::resolved(reply),
            Response::Deferred(promise) => promise,
        }
    }
}

impl<'a, B> Debug for Response<'a, B>
where
    B: Backend,
    B::Reply: Debug,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ready(reply) => f.debug_tuple("Ready").field(reply).finish(),
            Response::Deferred(promise) => f.debug_tuple("Deferred").field(promise).finish(),
        }
    }
}

struct Queue<B: Backend> {
    buffer: Buffer<B>,
    in_unit_of_work: bool,
}

/// A batching front for a [`Backend`].
///
/// Every command goes through [`call`](Proxy::call) and is classified by
/// name:
///
/// - Immediate commands flush whatever is buffered, then run directly
///   against the backend. Their reply is returned right away.
/// - Everything else is appended to the buffer, and a promise for its reply
///   is returned. Nothing is sent yet.
///
/// Forcing *any* buffered promise flushes the *whole* buffer: a single
/// command is run directly, and two or more are run as one transaction.
/// Replies are handed back to the promises by position, so every promise of
/// that batch is resolved by the same round trip. The buffer is also flushed
/// when it reaches [`BatchRules::max_buffered`], at unit-of-work boundaries
/// (see [`Proxy::unit_of_work`]), before every immediate command, and when
/// the proxy is dropped, so a buffered command always runs eventually.
///
/// A proxy can be shared by reference between threads. It owns two locks:
/// one over the buffer and the unit-of-work flag, held only for short
/// bookkeeping, and one over the backend itself, held for the whole of a
/// flush or an immediate command. The backend lock is always taken first.
/// Because a flush snapshots and distributes a generation while holding the
/// backend lock, a promise whose command is mid-flight on another thread
/// simply waits for that flush to finish.
pub struct Proxy<B: Backend> {
    rules: BatchRules,
    queue: Mutex<Queue<B>>,
    conn: Mutex<B>,
}

impl<B: Backend> Proxy<B> {
    pub fn new(backend: B) -> Self {
        Self::with_rules(backend, BatchRules::default())
    }

    pub fn with_rules(backend: B, rules: BatchRules) -> Self {
        Self {
            rules,
            queue: Mutex::new(Queue {
                buffer: Buffer::default(),
                in_unit_of_work: false,
            }),
            conn: Mutex::new(backend),
        }
    }

    #[inline]
    pub fn rules(&self) -> BatchRules {
        self.rules
    }

    /// The number of commands currently waiting to be flushed.
    pub fn buffered(&self) -> usize {
        self.queue.lock().buffer.len()
    }

    pub fn in_unit_of_work(&self) -> bool {
        self.queue.lock().in_unit_of_work
    }

    /// Dispatch a command.
    ///
    /// Immediate commands return [`Response::Ready`]; an error from one of
    /// them, or from the flush that precedes it, is returned here. Deferred
    /// commands return [`Response::Deferred`]; an error is only returned
    /// here if queueing the command tripped a flush (opening an implicit
    /// unit of work, or reaching the buffer limit) and that flush failed.
    ///
    /// Deferred commands issued outside of a unit of work implicitly open
    /// one, which stays open until the next explicit scope ends.
    pub fn call(&self, command: &str, args: Vec<B::Arg>) -> Result<Response<'_, B>, B::Error> {
        match classify(command) {
            Category::Immediate => self.call_now(command, &args).map(Response::Ready),
            Category::Deferred => self.defer(command, args).map(Response::Deferred),
        }
    }

    /// Dispatch a command and pass its reply to `callback`.
    ///
    /// Only immediate commands accept a callback. A command that would be
    /// deferred is rejected with [`Error::CallbackNotSupported`] and is not
    /// buffered.
    pub fn call_with<R>(
        &self,
        command: &str,
        args: Vec<B::Arg>,
        callback: impl FnOnce(&B::Reply) -> R,
    ) -> Result<R, B::Error> {
        match classify(command) {
            Category::Immediate => self
                .call_now(command, &args)
                .map(move |reply| callback(&reply)),
            Category::Deferred => Err(Error::CallbackNotSupported {
                command: command.to_owned(),
            }),
        }
    }

    /// Run every buffered command and resolve their promises. A no-op if the
    /// buffer is empty.
    ///
    /// If the batch fails, every promise in it fails with the same error,
    /// which is also returned here.
    pub fn flush(&self) -> Result<(), B::Error> {
        let mut conn = self.conn.lock();
        self.flush_locked(&mut conn)
    }

    fn call_now(&self, command: &str, args: &[B::Arg]) -> Result<B::Reply, B::Error> {
        let mut conn = self.conn.lock();
        self.flush_locked(&mut conn)?;

        trace!(command, "Running immediate command");
        conn.call(command, args).map_err(Error::Backend)
    }

    fn defer(&self, command: &str, args: Vec<B::Arg>) -> Result<ReplyPromise<'_, B>, B::Error> {
        if !self.in_unit_of_work() {
            self.begin_unit_of_work()?;
        }

        let (slot, full) = {
            let mut queue = self.queue.lock();
            let slot = queue.buffer.push(command.to_owned(), args);
            (slot, queue.buffer.len() >= self.rules.max_buffered.get())
        };
        trace!(command, "Deferred command");

        let promise = self.promise_for(slot);

        if full {
            debug!(
                max_buffered = self.rules.max_buffered.get(),
                "Buffer limit reached, flushing"
            );
            self.flush()?;
        }

        Ok(promise)
    }

    fn promise_for(&self, slot: Slot<B>) -> ReplyPromise<'_, B> {
        // The flush that runs this command writes the slot directly, so a
        // promise resolved by a buffer-mate's force never runs its thunk.
        Promise::with_outcome(Arc::clone(&slot), move || {
            // Skip the flush if the slot was filled after the fast path
            // checked; flushing here would send the *next* generation early.
            if slot.get().is_none() {
                self.flush()?;
            }

            // Any flush that returned after this slot was queued has
            // distributed it, so this never actually blocks.
            slot.wait().clone()
        })
    }

    fn flush_locked(&self, conn: &mut B) -> Result<(), B::Error> {
        let generation = self.queue.lock().buffer.take();
        if generation.is_empty() {
            return Ok(());
        }

        let size = generation.len();
        let transaction = size > 1;
        debug!(commands = size, transaction, "Flushing buffer");

        let _guard = generation.guard();
        let outcome = execute(conn, &generation);
        let distributed = generation.distribute(outcome);
        if let Err(ref err) = distributed {
            warn!(commands = size, error = ?err, "Flush failed");
        }
        distributed
    }

    /// Flush, then mark a unit of work as active. Returns the flag as it was
    /// before the flush.
    pub(crate) fn begin_unit_of_work(&self) -> Result<bool, B::Error> {
        let previous = self.in_unit_of_work();
        self.flush()?;
        self.queue.lock().in_unit_of_work = true;
        Ok(previous)
    }

    /// Flush, then restore the unit-of-work flag to `previous`. The flag is
    /// restored even if the flush fails.
    pub(crate) fn end_unit_of_work(&self, previous: bool) -> Result<(), B::Error> {
        let flushed = self.flush();
        self.queue.lock().in_unit_of_work = previous;
        flushed
    }
}

/// Run one generation against the backend: directly if it holds a single
/// command, otherwise as a transaction.
fn execute<B: Backend>(
    conn: &mut B,
    generation: &Buffer<B>,
) -> Result<Vec<B::Reply>, B::Error> {
    if let (1, Some((command, args))) = (generation.len(), generation.commands().next()) {
        return conn
            .call(command, args)
            .map(|reply| vec![reply])
            .map_err(Error::Backend);
    }

    conn.multi().map_err(Error::Backend)?;

    let queued = generation
        .commands()
        .try_for_each(|(command, args)| conn.queue(command, args));

    match queued {
        Ok(()) => conn.exec().map_err(Error::Backend),
        Err(err) => {
            if let Err(discard_err) = conn.discard() {
                warn!(error = ?discard_err, "Failed to discard aborted transaction");
            }
            Err(Error::Backend(err))
        }
    }
}

impl<B: Backend> Drop for Proxy<B> {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!(error = ?err, "Failed to flush buffered commands on drop");
        }
    }
}

impl<B: Backend> Debug for Proxy<B> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let queue = self.queue.lock();
        f.debug_struct("Proxy")
            .field("rules", &self.rules)
            .field("buffered", &queue.buffer.len())
            .field("in_unit_of_work", &queue.in_unit_of_work)
            .field("backend", &"<backend>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Echoes each key back as its reply and logs everything it's asked to
    /// do.
    #[derive(Default)]
    struct Echo {
        log: Arc<Mutex<Vec<String>>>,
        queued: Vec<String>,
    }

    impl Backend for Echo {
        type Arg = String;
        type Reply = String;
        type Error = String;

        fn call(&mut self, command: &str, args: &[String]) -> std::result::Result<String, String> {
            self.log.lock().push(format!("{} {}", command, args.join(" ")));
            Ok(args.join(" "))
        }

        fn multi(&mut self) -> std::result::Result<(), String> {
            self.log.lock().push("multi".into());
            Ok(())
        }

        fn queue(&mut self, command: &str, args: &[String]) -> std::result::Result<(), String> {
            self.log.lock().push(format!("{} {}", command, args.join(" ")));
            self.queued.push(args.join(" "));
            Ok(())
        }

        fn exec(&mut self) -> std::result::Result<Vec<String>, String> {
            self.log.lock().push("exec".into());
            Ok(std::mem::take(&mut self.queued))
        }
    }

    fn echo() -> (Proxy<Echo>, Arc<Mutex<Vec<String>>>) {
        let backend = Echo::default();
        let log = Arc::clone(&backend.log);
        (Proxy::new(backend), log)
    }

    fn args(key: &str) -> Vec<String> {
        vec![key.to_string()]
    }

    #[test]
    fn deferred_commands_wait_for_a_force() {
        let (proxy, log) = echo();

        let first = proxy.call("get", args("a")).unwrap();
        let second = proxy.call("get", args("b")).unwrap();

        assert!(first.is_deferred());
        assert_eq!(proxy.buffered(), 2);
        assert!(log.lock().is_empty());

        assert_eq!(second.wait().unwrap(), "b");
        assert_eq!(first.wait().unwrap(), "a");
        assert_eq!(*log.lock(), ["multi", "get a", "get b", "exec"]);
    }

    #[test]
    fn implicit_unit_of_work() {
        let (proxy, _log) = echo();
        assert!(!proxy.in_unit_of_work());

        proxy.call("get", args("a")).unwrap();
        assert!(proxy.in_unit_of_work());
    }

    #[test]
    fn immediate_commands_are_ready() {
        let (proxy, log) = echo();

        let pending = proxy.call("get", args("a")).unwrap().into_promise();
        let expired = proxy.call("expire", args("a")).unwrap();

        assert!(!expired.is_deferred());
        assert!(pending.is_fulfilled());
        assert_eq!(*log.lock(), ["get a", "expire a"]);
        assert_eq!(pending.force().unwrap(), "a");
    }

    #[test]
    fn callbacks_only_for_immediate_commands() {
        let (proxy, _log) = echo();

        let length = proxy.call_with("publish", args("news"), |reply| reply.len());
        assert_eq!(length, Ok(4));

        let rejected = proxy.call_with("get", args("a"), |reply| reply.len());
        assert_eq!(
            rejected,
            Err(Error::CallbackNotSupported {
                command: "get".into()
            })
        );
        assert_eq!(proxy.buffered(), 0);
    }

    #[test]
    fn threshold_flushes_without_a_force() {
        let backend = Echo::default();
        let log = Arc::clone(&backend.log);
        let rules = BatchRules {
            max_buffered: NonZeroUsize::new(3).unwrap(),
        };
        let proxy = Proxy::with_rules(backend, rules);

        let responses: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|key| proxy.call("get", args(key)).unwrap().into_promise())
            .collect();

        assert_eq!(proxy.buffered(), 0);
        assert!(responses.iter().all(Promise::is_fulfilled));
        assert_eq!(log.lock().len(), 5);
    }

    #[test]
    fn drop_flushes_the_buffer() {
        let (proxy, log) = echo();
        proxy.call("set", args("a")).unwrap();

        drop(proxy);
        assert_eq!(*log.lock(), ["set a"]);
    }
}
