//! Kvbatch is a client-side request batcher for key-value stores. It sits in
//! front of a store connection and turns many logically independent commands
//! into as few round trips as possible, without the code issuing those
//! commands having to know anything about batching.
//!
//! ## Overview
//!
//! Suppose a request handler needs the friend counts of a handful of users.
//! Issued one by one, each lookup is a separate network round trip:
//!
//! ```text
//! SCARD users:1:friends   ->  round trip
//! SCARD users:2:friends   ->  round trip
//! SCARD users:3:friends   ->  round trip
//! ```
//!
//! Routed through a [`Proxy`], each call returns immediately with a
//! [`Promise`] for its reply, and nothing is sent. The first time any of
//! those promises is [forced](Promise::force), every command buffered so far
//! is sent as a single transaction and every promise is resolved with its
//! own reply:
//!
//! ```text
//! MULTI
//! SCARD users:1:friends
//! SCARD users:2:friends
//! SCARD users:3:friends
//! EXEC                    ->  one round trip
//! ```
//!
//! To use the proxy, adapt your connection to the [`Backend`] trait. A
//! backend runs named commands, either directly or between `multi` and
//! `exec`:
//!
//! ```
//! use kvbatch::Backend;
//!
//! # #[derive(Debug, Clone)] struct ConnError;
//! # struct Connection;
//! # impl Connection {
//! #     fn send(&mut self, _: &str, _: &[String]) -> Result<String, ConnError> { Ok(String::new()) }
//! #     fn send_all(&mut self) -> Result<Vec<String>, ConnError> { Ok(Vec::new()) }
//! # }
//! impl Backend for Connection {
//!     type Arg = String;
//!     type Reply = String;
//!     type Error = ConnError;
//!
//!     fn call(&mut self, command: &str, args: &[String]) -> Result<String, ConnError> {
//!         self.send(command, args)
//!     }
//!
//!     fn multi(&mut self) -> Result<(), ConnError> {
//!         self.send("multi", &[]).map(drop)
//!     }
//!
//!     fn exec(&mut self) -> Result<Vec<String>, ConnError> {
//!         self.send_all()
//!     }
//! }
//! ```
//!
//! Then wrap it in a [`Proxy`] and issue commands through
//! [`Proxy::call`]. Group related work in a [unit of work](Proxy::unit_of_work);
//! everything deferred inside it is flushed no later than its end.
//!
//! ```
//! # use kvbatch::{Backend, Proxy};
//! # #[derive(Debug, Clone)] struct ConnError;
//! # struct Connection;
//! # impl Backend for Connection {
//! #     type Arg = String;
//! #     type Reply = String;
//! #     type Error = ConnError;
//! #     fn call(&mut self, _: &str, _: &[String]) -> Result<String, ConnError> { Ok("1".into()) }
//! #     fn multi(&mut self) -> Result<(), ConnError> { Ok(()) }
//! #     fn queue(&mut self, _: &str, _: &[String]) -> Result<(), ConnError> { Ok(()) }
//! #     fn exec(&mut self) -> Result<Vec<String>, ConnError> {
//! #         Ok(vec!["174".into(), "12".into(), "9".into()])
//! #     }
//! # }
//! let proxy = Proxy::new(Connection);
//!
//! let counts = proxy.unit_of_work(|| -> kvbatch::Result<Vec<String>, ConnError> {
//!     let counts: Vec<_> = [1, 2, 3]
//!         .iter()
//!         .map(|id| proxy.call("scard", vec![format!("users:{}:friends", id)]))
//!         .collect::<Result<_, _>>()?;
//!
//!     // Nothing has been sent yet. This wait sends all three commands.
//!     counts
//!         .into_iter()
//!         .map(|count| count.wait())
//!         .collect::<Result<Vec<_>, _>>()
//! });
//!
//! assert_eq!(counts.unwrap().unwrap(), ["174", "12", "9"]);
//! ```
//!
//! ## Immediate and deferred commands
//!
//! Most commands, reads and ordinary writes alike, are *deferred*: buffered
//! and answered with a promise. Because reads and writes share one ordered
//! buffer, a read issued after a write in the same batch sees that write.
//!
//! A fixed set of commands is *immediate* (see [`classify`]): expirations,
//! pub/sub control, blocking pops, connection and administrative commands.
//! An immediate command first flushes the buffer, then runs on its own, and
//! its reply is returned directly as [`Response::Ready`].
//!
//! ## Design notes
//!
//! ### Explicit forcing
//!
//! A promise is not a transparent stand-in for its value; callers unwrap it
//! with [`Promise::force`] (or [`Response::wait`]) before using the value.
//! Forcing is blocking: it may perform the flush, and so the network round
//! trip, on the calling thread. There is no asynchronous forcing.
//!
//! ### One generation, one outcome
//!
//! Each flush takes the entire buffer, a *generation*, and executes it as a
//! whole. The generation is never split. Replies are matched to promises by
//! position. If the batch fails, every promise of the generation fails with
//! a clone of the same [`Error`], and the caller that triggered the flush
//! receives it too. If the backend panics mid-flush, the promises of that
//! generation fail with [`Error::Aborted`]. Promises cache their outcome,
//! value or error, and never retry.
//!
//! ### Thread safety
//!
//! A [`Proxy`] is shared by reference. Buffer bookkeeping and backend access
//! sit behind separate locks, always acquired backend first, and a promise's
//! thunk may freely trigger a flush while another thread's enqueue trips the
//! buffer limit. A [`Backend`] implementation must not call back into the
//! proxy that owns it.

mod backend;
mod buffer;
mod command;
mod error;
mod promise;
mod proxy;
mod scope;

pub use backend::Backend;
pub use command::{access, classify, Access, Category};
pub use error::{Error, Result};
pub use promise::Promise;
pub use proxy::{BatchRules, Proxy, ReplyPromise, Response};
pub use scope::Scope;
