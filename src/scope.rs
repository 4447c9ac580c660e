//! Explicit unit-of-work brackets.
//!
//! A unit of work is a window during which deferred commands accumulate in
//! the buffer. Opening one flushes whatever was buffered before it, and
//! closing one flushes whatever was buffered inside it, so commands from
//! different units of work never share a batch. Scopes nest: closing an
//! inner scope restores the flag exactly as the outer scope left it.

use tracing::warn;

use crate::{backend::Backend, error::Result, proxy::Proxy};

/// An open unit of work. Created by [`Proxy::scope`].
///
/// Close it with [`end`](Scope::end) to observe the final flush's outcome.
/// A scope that is dropped without being ended (an early return, or a
/// panic) is still closed; a failure of that final flush is logged.
#[must_use = "dropping a Scope ends the unit of work immediately"]
pub struct Scope<'a, B: Backend> {
    proxy: &'a Proxy<B>,
    previous: bool,
    open: bool,
}

impl<'a, B: Backend> Scope<'a, B> {
    /// Flush the commands buffered during this unit of work and restore the
    /// unit-of-work flag to what it was when the scope was opened.
    pub fn end(mut self) -> Result<(), B::Error> {
        self.open = false;
        self.proxy.end_unit_of_work(self.previous)
    }
}

impl<'a, B: Backend> Drop for Scope<'a, B> {
    fn drop(&mut self) {
        if self.open {
            if let Err(err) = self.proxy.end_unit_of_work(self.previous) {
                warn!(error = ?err, "Failed to flush at the end of a dropped unit of work");
            }
        }
    }
}

impl<B: Backend> Proxy<B> {
    /// Open a unit of work: flush anything already buffered and mark a unit
    /// of work as active until the returned [`Scope`] is ended or dropped.
    pub fn scope(&self) -> Result<Scope<'_, B>, B::Error> {
        let previous = self.begin_unit_of_work()?;
        Ok(Scope {
            proxy: self,
            previous,
            open: true,
        })
    }

    /// Run `work` inside a unit of work.
    ///
    /// Commands deferred by `work` are batched together and flushed no later
    /// than the end of the unit of work, whether `work` returns or panics.
    ///
    /// If that closing flush fails, its error is returned and whatever `work`
    /// returned is dropped. The promises of the failed batch carry the same
    /// error.
    ///
    /// ```
    /// # use kvbatch::{Backend, Proxy};
    /// # struct Keys;
    /// # impl Backend for Keys {
    /// #     type Arg = String;
    /// #     type Reply = String;
    /// #     type Error = ();
    /// #     fn call(&mut self, _: &str, args: &[String]) -> Result<String, ()> { Ok(args.concat()) }
    /// #     fn multi(&mut self) -> Result<(), ()> { Ok(()) }
    /// #     fn queue(&mut self, _: &str, _: &[String]) -> Result<(), ()> { Ok(()) }
    /// #     fn exec(&mut self) -> Result<Vec<String>, ()> { Ok(vec!["k1".into(), "k2".into()]) }
    /// # }
    /// let proxy = Proxy::new(Keys);
    ///
    /// let values = proxy.unit_of_work(|| -> kvbatch::Result<_, ()> {
    ///     let first = proxy.call("get", vec!["k1".into()])?;
    ///     let second = proxy.call("get", vec!["k2".into()])?;
    ///
    ///     // A single transaction resolves both.
    ///     Ok((first.wait()?, second.wait()?))
    /// });
    ///
    /// assert_eq!(values, Ok(Ok(("k1".into(), "k2".into()))));
    /// ```
    pub fn unit_of_work<R>(&self, work: impl FnOnce() -> R) -> Result<R, B::Error> {
        let scope = self.scope()?;
        let result = work();
        scope.end()?;
        Ok(result)
    }
}
