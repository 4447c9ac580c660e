//! A lazily evaluated, single-assignment value cell.
//!
//! A [`Promise`] wraps a zero-argument computation (the "thunk"). Nothing
//! happens when the promise is created; the thunk runs the first time the
//! promise is [forced](Promise::force), and its outcome, value or error, is
//! cached and replayed to every later force. All clones of a promise share
//! the same cell, so forcing any one of them resolves all of them.

use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

type Thunk<'a, T, E> = Box<dyn FnOnce() -> Result<T, E> + Send + 'a>;

/// The write-once outcome of a promise. It can be shared with whoever
/// computes the value, so the outcome can be delivered without going through
/// the evaluation lock.
pub(crate) type Outcome<T, E> = Arc<OnceCell<Result<T, E>>>;

struct Cell<'a, T, E> {
    outcome: Outcome<T, E>,

    // Held for the whole of an evaluation. `None` once the thunk has been
    // taken; if the outcome is still unset at that point, the thunk panicked.
    thunk: Mutex<Option<Thunk<'a, T, E>>>,
}

/// A lazily computed value that is evaluated at most once.
///
/// Promises are handed out by [`Proxy`](crate::Proxy) for every deferred
/// command, but they're a general purpose primitive and can wrap any
/// computation:
///
/// ```
/// use kvbatch::Promise;
///
/// let answer: Promise<u32, ()> = Promise::new(|| Ok(6 * 7));
/// assert!(answer.is_pending());
///
/// let text = answer.chain(|n| n.to_string());
/// assert!(answer.is_pending());
///
/// assert_eq!(text.force(), Ok(String::from("42")));
/// assert!(answer.is_fulfilled());
/// ```
///
/// Forcing blocks the calling thread until the thunk completes. If several
/// threads force the same promise at once, exactly one of them runs the
/// thunk and the rest wait for its outcome. A thunk must not force the
/// promise that owns it; that deadlocks.
pub struct Promise<'a, T, E> {
    cell: Arc<Cell<'a, T, E>>,
}

impl<'a, T, E> Clone for Promise<'a, T, E> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<'a, T, E> Promise<'a, T, E> {
    /// Create a pending promise. The thunk is not called.
    pub fn new(thunk: impl FnOnce() -> Result<T, E> + Send + 'a) -> Self {
        Self::with_outcome(Arc::new(OnceCell::new()), thunk)
    }

    /// Create a promise that is already fulfilled with `value`.
    pub fn resolved(value: T) -> Self {
        Self {
            cell: Arc::new(Cell {
                outcome: Arc::new(OnceCell::with_value(Ok(value))),
                thunk: Mutex::new(None),
            }),
        }
    }

    /// Create a pending promise whose outcome may also be delivered from
    /// outside, through `outcome`, before it is ever forced. Whichever of the
    /// thunk or the outside writer finishes first decides the outcome.
    pub(crate) fn with_outcome(
        outcome: Outcome<T, E>,
        thunk: impl FnOnce() -> Result<T, E> + Send + 'a,
    ) -> Self {
        Self {
            cell: Arc::new(Cell {
                outcome,
                thunk: Mutex::new(Some(Box::new(thunk))),
            }),
        }
    }

    /// True until the promise has an outcome, including while its thunk is
    /// running. Never blocks.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.cell.outcome.get().is_none()
    }

    #[inline]
    pub fn is_fulfilled(&self) -> bool {
        matches!(self.cell.outcome.get(), Some(Ok(..)))
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        matches!(self.cell.outcome.get(), Some(Err(..)))
    }
}

impl<'a, T, E> Promise<'a, T, E>
where
    T: Clone + Send + Sync + 'a,
    E: Clone + Send + Sync + 'a,
{
    /// Evaluate the promise if it hasn't been evaluated yet, and return its
    /// outcome.
    ///
    /// The first call runs the thunk. Its value or error is cached, and every
    /// later call returns a clone of that same outcome without running
    /// anything. Errors are never retried.
    ///
    /// # Panics
    ///
    /// Panics if an earlier evaluation of the thunk panicked.
    pub fn force(&self) -> Result<T, E> {
        if let Some(outcome) = self.cell.outcome.get() {
            return outcome.clone();
        }

        // Concurrent forces queue up here behind the one running the thunk.
        let mut guard = self.cell.thunk.lock();

        if let Some(outcome) = self.cell.outcome.get() {
            return outcome.clone();
        }

        let thunk = match guard.take() {
            Some(thunk) => thunk,
            None => {
                drop(guard);
                panic!("Promise forced after its thunk panicked");
            }
        };

        let result = thunk();
        match self.cell.outcome.try_insert(result) {
            Ok(outcome) => outcome.clone(),
            // Delivered from outside while the thunk ran; the first outcome
            // stands.
            Err((existing, _)) => existing.clone(),
        }
    }

    /// Create a new promise that forces this one and passes its value
    /// through `transform`. Neither promise is evaluated by this call. An
    /// error from this promise is passed through untouched.
    pub fn chain<U>(&self, transform: impl FnOnce(T) -> U + Send + 'a) -> Promise<'a, U, E> {
        let parent = self.clone();
        Promise::new(move || parent.force().map(transform))
    }

    /// Create a new promise that forces this promise, then `other`, and
    /// pairs their values. The first error wins.
    pub fn zip<U>(&self, other: &Promise<'a, U, E>) -> Promise<'a, (T, U), E>
    where
        U: Clone + Send + Sync + 'a,
    {
        let left = self.clone();
        let right = other.clone();
        Promise::new(move || Ok((left.force()?, right.force()?)))
    }
}

impl<'a, T: Debug, E: Debug> Debug for Promise<'a, T, E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.cell.outcome.get() {
            Some(Ok(value)) => write!(f, "Promise(fulfilled: {:?})", value),
            Some(Err(err)) => write!(f, "Promise(error: {:?})", err),
            // Never wait on the thunk lock: it is held for the whole
            // duration of a running thunk.
            None => match self.cell.thunk.try_lock() {
                Some(ref thunk) if thunk.is_some() => write!(f, "Promise(pending: <thunk>)"),
                _ => write!(f, "Promise(evaluating)"),
            },
        }
    }
}
