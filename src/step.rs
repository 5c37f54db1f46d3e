//! Steps of an asynchronous operation
//!
//! A step is one unit of asynchronous work, expressed in Begin/End style: a
//! begin function starts the work and returns a result handle, and an end
//! function consumes the completed handle and applies its outcome to the
//! operation (storing a value, triggering a side effect, or faulting). Each
//! step may also carry handlers for the faults which its begin and end
//! functions can raise.
//!
//! The begin function receives a callback which it must hand over to the
//! result handle that it builds. This is how the engine learns about the
//! completion of work which did not finish synchronously.

use crate::catch::{Catch, CatchAll, Matcher};
use crate::fault::Fault;
use crate::handle::{Callback, ResultHandle};
use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::sync::Arc;


/// Notification used by the engine to resume an operation
pub(crate) type Wake = Arc<dyn Fn() + Send + Sync>;

/// Type-erased begin function of a step
pub(crate) type Begin<C> =
    Box<dyn FnOnce(&mut C, Wake) -> Result<Box<dyn Begun<C>>, Fault> + Send>;


/// One unit of Begin/End work, along with its fault handlers
pub struct Step<C> {
    /// Name used in log records
    name: Option<Cow<'static, str>>,

    /// Type-erased begin function, which also remembers the end function
    begin: Begin<C>,

    /// Fault handlers, in the order in which they should be tried
    handlers: Vec<Box<dyn Matcher<C>>>,
}
//
impl<C: 'static> Step<C> {
    /// Build a step out of a begin function and an end function
    pub fn new<T, B, E>(begin: B, end: E) -> Self
        where T: Send + 'static,
              B: FnOnce(&mut C, Callback<T>) -> Result<ResultHandle<T>, Fault>
                 + Send + 'static,
              E: FnOnce(&mut C, ResultHandle<T>) -> Result<(), Fault>
                 + Send + 'static
    {
        let begin = move |context: &mut C, wake: Wake|
                          -> Result<Box<dyn Begun<C>>, Fault> {
            // Work which completes synchronously is handled by the engine as
            // soon as begin returns, so only asynchronous completions wake it
            let callback: Callback<T> = Box::new(move |handle: &ResultHandle<T>| {
                if !handle.completed_synchronously() {
                    wake();
                }
            });
            let handle = begin(context, callback)?;
            Ok(Box::new(BegunStep { handle, end }) as Box<dyn Begun<C>>)
        };
        Step {
            name: None,
            begin: Box::new(begin),
            handlers: Vec::new(),
        }
    }

    /// Give this step a name, for logging purposes
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Handle faults of type E which this step raises
    pub fn catch<E, F>(self, handler: F) -> Self
        where E: Error + 'static,
              F: FnMut(&mut C, &E) -> Result<bool, Fault> + Send + 'static
    {
        self.with_handler(Box::new(Catch::<E, F>::and_handle(handler)))
    }

    /// Handle any fault which this step raises
    pub fn catch_all<F>(self, handler: F) -> Self
        where F: FnMut(&mut C, &Fault) -> Result<bool, Fault> + Send + 'static
    {
        self.with_handler(Box::new(CatchAll::and_handle(handler)))
    }

    /// Append a custom fault handler to this step
    pub fn with_handler(mut self, handler: Box<dyn Matcher<C>>) -> Self {
        self.handlers.push(handler);
        self
    }
}
//
impl<C> Step<C> {
    /// Name of this step, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Split this step into what the engine needs to drive it
    pub(crate) fn into_parts(self) -> (Begin<C>, Vec<Box<dyn Matcher<C>>>) {
        (self.begin, self.handlers)
    }
}
//
impl<C> fmt::Debug for Step<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kinds: Vec<&str> = self.handlers.iter().map(|h| h.kind()).collect();
        f.debug_struct("Step")
         .field("name", &self.name)
         .field("handlers", &kinds)
         .finish()
    }
}


/// A step whose work was begun, as seen by the engine
pub(crate) trait Begun<C>: Send {
    /// Truth that the work was finished when begin returned
    fn completed_synchronously(&self) -> bool;

    /// Apply the outcome of the work to the operation
    fn end(self: Box<Self>, context: &mut C) -> Result<(), Fault>;
}
//
struct BegunStep<T, E> {
    /// Handle returned by the begin function
    handle: ResultHandle<T>,

    /// End function of the step
    end: E,
}
//
impl<C, T, E> Begun<C> for BegunStep<T, E>
    where T: Send,
          E: FnOnce(&mut C, ResultHandle<T>) -> Result<(), Fault> + Send
{
    fn completed_synchronously(&self) -> bool {
        self.handle.completed_synchronously()
    }

    fn end(self: Box<Self>, context: &mut C) -> Result<(), Fault> {
        let this = *self;
        (this.end)(context, this.handle)
    }
}
