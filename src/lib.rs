//! The completion-based core of an I/O event loop.
//!
//! A [Poller] owns one completion [Channel]. Sockets are watched through
//! [begin_watching][Poller::begin_watching], which hands out an [IoContext]
//! holding one op-context per [Direction]. Overlapped operations are
//! [submitted][Poller::submit] over a direction and their completions are
//! dispatched to the callback of that direction by [drain][Poller::drain].
//!
//! Cancellation is cooperative. [retire][Poller::retire] and
//! [end_watching][Poller::end_watching] never abort what the OS is doing,
//! they cause the eventual completion to be swallowed instead. An op-context
//! is only released once the OS no longer holds on to it.
//!
//! ```
//! use proactor::loopback::LoopbackPort;
//! use proactor::{Direction, Event, OpKind, Poller};
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use std::sync::atomic::AtomicBool;
//!
//! # fn main() -> std::io::Result<()> {
//! let port = LoopbackPort::new();
//! let poller = Poller::new(port.clone());
//! let stop = AtomicBool::new(false);
//!
//! let context = poller.begin_watching(7)?;
//! let written = Rc::new(Cell::new(0));
//! let written2 = written.clone();
//!
//! context.set_callback(Direction::Write, move |_, event, _| {
//!     if let Event::Complete(n) = event {
//!         written2.set(n);
//!     }
//! });
//!
//! let mut pending = None;
//!
//! poller.issue(Direction::Write, &context);
//! poller.submit(Direction::Write, &context, OpKind::Write, |submission| {
//!     pending = Some(port.start(submission));
//!     Ok(())
//! })?;
//!
//! port.complete(pending.take().unwrap(), 128);
//! assert_eq!(poller.drain(None, &stop)?, 1);
//! assert_eq!(written.get(), 128);
//!
//! context.clear_callback(Direction::Write);
//! poller.end_watching(&context);
//! # Ok(()) }
//! ```

#[macro_use]
mod macros;

#[cfg(windows)]
#[path = "sys/windows.rs"]
mod sys;

#[cfg(not(windows))]
#[path = "sys/portable.rs"]
mod sys;

pub use self::sys::RawSocket;

mod errors;

mod flags;
pub use self::flags::{Direction, Interest, OpKind, SlotState};

mod channel;
pub use self::channel::{Channel, Entry, Waker};

mod event;
pub use self::event::{Callback, Event};

mod stats;
pub use self::stats::Stats;

mod options;
pub use self::options::{Options, DEFAULT_BATCH};

mod operation;
pub use self::operation::{Scratch, Submission};

mod context;
pub use self::context::IoContext;

mod poller;
pub use self::poller::Poller;

mod multiplexer;
pub use self::multiplexer::Multiplexer;

pub mod loopback;

#[cfg(windows)]
pub mod iocp;

#[cfg(feature = "background")]
pub mod background;
