//! Stepped asynchronous operations
//!
//! Picture yourself in a situation where: you want to write an operation which
//! chains several pieces of asynchronous work, each of which depends on the
//! outcome of the previous one. Some of that work finishes immediately, some
//! of it finishes later on another thread, any of it may fail, and some of the
//! failures should be recovered from while others should clean things up and
//! give up. And you would like to expose the whole thing through the same
//! Begin/End contract that each piece of work uses, so that operations can be
//! chained and nested in turn.
//!
//! Written by hand, this means a web of callbacks, flags and locks which gets
//! subtly wrong as soon as some work completes synchronously: the stack grows
//! with each synchronous completion, the caller gets told that the operation
//! completed asynchronously when it did not, and cleanup code gets skipped on
//! some failure path.
//!
//! This crate lets you write such an operation as a linear sequence of plain
//! code blocks, steps, loops and cleanup blocks, with typed fault handlers
//! attached to individual steps, and takes care of driving it:
//!
//! - `handle` provides the Begin/End result handle and its producer side.
//! - `step` and `catch` describe units of Begin/End work and their handlers.
//! - `script` builds the sequence of steps of an operation.
//! - `operation` exposes operations through the Begin/End contract.
//! - `status` and `monitor` let observers poll a running operation.

mod engine;

pub mod catch;
pub mod fault;
pub mod handle;
pub mod monitor;
pub mod operation;
pub mod script;
pub mod status;
pub mod step;

pub use crate::fault::Fault;
pub use crate::handle::{Callback, Completer, ResultHandle, State};
pub use crate::operation::{AsyncOperation, ResultSlot, SyncFaults};
pub use crate::script::{Script, Sequence};
pub use crate::step::Step;
