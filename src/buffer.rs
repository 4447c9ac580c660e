//! The ordered buffer of deferred commands, and the per-command result slots
//! that replies are distributed into.

use std::{mem, sync::Arc};

use once_cell::sync::OnceCell;
use tracing::warn;

use crate::{backend::Backend, error::Error, promise::Outcome};

/// The single-assignment cell a deferred command's outcome is written into.
/// It is shared between the buffer entry and the command's promise.
pub(crate) type Slot<B> = Outcome<<B as Backend>::Reply, Error<<B as Backend>::Error>>;

struct Entry<B: Backend> {
    command: String,
    args: Vec<B::Arg>,
    slot: Slot<B>,
}

/// An ordered sequence of deferred commands.
///
/// The invariant that makes positional distribution sound: reply `i` of a
/// flush always belongs to entry `i`. Entries are only ever appended, and
/// a buffer is only ever consumed whole (see [`Buffer::take`]), so a batch
/// is never partially flushed.
pub(crate) struct Buffer<B: Backend> {
    entries: Vec<Entry<B>>,
}

impl<B: Backend> Default for Buffer<B> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<B: Backend> Buffer<B> {
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a command, returning the slot its outcome will be written to.
    pub(crate) fn push(&mut self, command: String, args: Vec<B::Arg>) -> Slot<B> {
        let slot: Slot<B> = Arc::new(OnceCell::new());
        self.entries.push(Entry {
            command,
            args,
            slot: Arc::clone(&slot),
        });
        slot
    }

    /// Take the whole buffer, leaving an empty one in its place. This is the
    /// "snapshot and clear" half of a flush; the returned generation is then
    /// executed and distributed without touching the live buffer again.
    pub(crate) fn take(&mut self) -> Self {
        Self {
            entries: mem::take(&mut self.entries),
        }
    }

    /// The buffered commands, in the order they were issued.
    pub(crate) fn commands(&self) -> impl Iterator<Item = (&str, &[B::Arg])> {
        self.entries
            .iter()
            .map(|entry| (entry.command.as_str(), entry.args.as_slice()))
    }

    /// Hand the outcome of executing this generation to its slots.
    ///
    /// On success each reply goes to the entry at the same position. If the
    /// batch failed, or the reply count doesn't match the entry count, every
    /// slot receives the same error, which is also returned.
    pub(crate) fn distribute(
        self,
        outcome: Result<Vec<B::Reply>, Error<B::Error>>,
    ) -> Result<(), Error<B::Error>> {
        let error = match outcome {
            Ok(replies) if replies.len() == self.entries.len() => {
                self.entries
                    .into_iter()
                    .zip(replies)
                    .for_each(|(entry, reply)| {
                        let fresh = entry.slot.set(Ok(reply)).is_ok();
                        debug_assert!(fresh, "slot resolved before distribution");
                    });
                return Ok(());
            }
            Ok(replies) => Error::ReplyCountMismatch {
                expected: self.entries.len(),
                actual: replies.len(),
            },
            Err(err) => err,
        };

        self.entries.into_iter().for_each(|entry| {
            let fresh = entry.slot.set(Err(error.clone())).is_ok();
            debug_assert!(fresh, "slot resolved before distribution");
        });

        Err(error)
    }

    /// Arm a guard over this generation's slots. If the guard is dropped
    /// while any of them is still unset (the backend panicked before the
    /// generation was distributed), those slots fail with
    /// [`Error::Aborted`] so that no promise waits on them forever.
    pub(crate) fn guard(&self) -> AbortGuard<B> {
        AbortGuard {
            slots: self
                .entries
                .iter()
                .map(|entry| Arc::clone(&entry.slot))
                .collect(),
        }
    }
}

pub(crate) struct AbortGuard<B: Backend> {
    slots: Vec<Slot<B>>,
}

impl<B: Backend> Drop for AbortGuard<B> {
    fn drop(&mut self) {
        // After a normal distribution every slot is already set and this
        // writes nothing.
        let aborted = self
            .slots
            .iter()
            .filter(|slot| slot.set(Err(Error::Aborted)).is_ok())
            .count();

        if aborted > 0 {
            warn!(commands = aborted, "Backend panicked mid-flush, batch aborted");
        }
    }
}
