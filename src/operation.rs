//! Author-facing asynchronous operations
//!
//! An asynchronous operation is a type which implements `AsyncOperation`. Its
//! value holds whatever state the operation needs, and also serves as the
//! context in which the operation's steps and plain code run. The operation
//! provides a sequence of steps, usually a `Script`, and a result slot which
//! that sequence fills in at any point, including from cleanup blocks.
//!
//! Operations are started with `start()`, which drives them until they first
//! suspend or finish, and hands out a result handle. They are ended with
//! `end()`, which yields the final content of the result slot or the fault
//! which escaped the sequence. Since this is the same Begin/End contract that
//! steps are built upon, an operation can be used as a step of another
//! operation through `Step::operation`.

use crate::engine;
use crate::fault::Fault;
use crate::handle::{Callback, ResultHandle, State};
use crate::monitor::StatusPublisher;
use crate::script::Sequence;
use crate::step::Step;
use std::any;
use std::borrow::Cow;
use std::mem;


/// Asynchronous operation made of a sequence of steps
pub trait AsyncOperation: Send + Sized + 'static {
    /// Type of value produced by the operation
    type Output: Default + Send + 'static;

    /// Sequence of steps of the operation
    type Steps: Sequence<Self> + 'static;

    /// Produce the sequence of steps, called once when the operation starts
    fn steps(&mut self) -> Self::Steps;

    /// Access the slot where the operation's result is stored
    fn result(&mut self) -> &mut ResultSlot<Self::Output>;

    /// Name of the operation in log records
    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed(any::type_name::<Self>())
    }

    /// What to do with faults which occur before the operation first suspends
    fn sync_faults(&self) -> SyncFaults {
        SyncFaults::Raise
    }

    /// Start the operation, driving it until it first suspends or finishes
    ///
    /// The callback, if any, is invoked once the operation is finished. If
    /// that happens before this function returns, it is invoked before this
    /// function returns, with the handle that this function returns.
    ///
    fn start(self,
             callback: Option<Callback<Self::Output>>,
             state: Option<State>) -> Result<ResultHandle<Self::Output>, Fault> {
        engine::start(self, callback, state, None)
    }

    /// Variant of start() which publishes the engine's status as it goes
    fn start_monitored(
        self,
        callback: Option<Callback<Self::Output>>,
        state: Option<State>,
        publisher: StatusPublisher
    ) -> Result<ResultHandle<Self::Output>, Fault> {
        engine::start(self, callback, state, Some(publisher))
    }

    /// End the operation, retrieving its result or its fault
    fn end(handle: &ResultHandle<Self::Output>) -> Result<Self::Output, Fault> {
        handle.end()
    }
}


/// Policy for faults which occur before an operation first suspends
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncFaults {
    /// Return the fault from start(), without invoking the callback
    Raise,

    /// Complete the handle returned by start() with the fault
    Defer,
}


/// Settable result of an asynchronous operation
#[derive(Debug, Default)]
pub struct ResultSlot<R> {
    value: R,
}
//
impl<R: Default> ResultSlot<R> {
    /// Start with the default value
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with some value
    pub fn with_value(value: R) -> Self {
        ResultSlot { value }
    }

    /// Replace the result
    pub fn set(&mut self, value: R) {
        self.value = value;
    }

    /// Access the result
    pub fn get(&self) -> &R {
        &self.value
    }

    /// Modify the result in place
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.value
    }

    /// Extract the result, leaving the default value behind
    pub(crate) fn take(&mut self) -> R {
        mem::take(&mut self.value)
    }
}


impl<C: 'static> Step<C> {
    /// Use another asynchronous operation as a step
    ///
    /// The end function receives the operation's result. If the operation
    /// faults, the fault is raised by the step instead.
    ///
    pub fn operation<O, E>(operation: O, end: E) -> Self
        where O: AsyncOperation,
              E: FnOnce(&mut C, O::Output) -> Result<(), Fault> + Send + 'static
    {
        let name = operation.name();
        Step::new(
            move |_: &mut C, callback| operation.start(Some(callback), None),
            move |context, handle| end(context, O::end(&handle)?)
        ).named(name)
    }
}
