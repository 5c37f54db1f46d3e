//! Typed fault handlers attached to steps
//!
//! Steps may carry an ordered list of handlers, each of which targets one kind
//! of fault. When a step faults, the handlers are tried in declaration order.
//! A handler which matches the fault decides whether it is resolved, in which
//! case the operation carries on as if the step had succeeded. If it is not,
//! the next matching handler gets a chance. If a handler faults itself, its
//! fault replaces the one it was examining and no other handler is tried.

use crate::fault::Fault;
use std::any;
use std::error::Error;
use std::marker::PhantomData;


/// Fault handler, as seen by the engine
pub trait Matcher<C>: Send {
    /// Name of the fault kind which this handler targets
    fn kind(&self) -> &'static str;

    /// Check if a fault is of the kind targeted by this handler
    fn matches(&self, fault: &Fault) -> bool;

    /// Examine a matching fault, telling whether it is resolved
    fn handle(&mut self, context: &mut C, fault: &Fault) -> Result<bool, Fault>;
}


/// Handler for faults of a specific error type
pub struct Catch<E, F> {
    /// User-provided handler
    handler: F,

    /// Targeted error type
    kind: PhantomData<fn(&E)>,
}
//
impl<E: Error + 'static, F> Catch<E, F> {
    /// Handle faults of type E using some function
    pub fn and_handle<C>(handler: F) -> Self
        where F: FnMut(&mut C, &E) -> Result<bool, Fault> + Send
    {
        Catch { handler, kind: PhantomData }
    }
}
//
impl<C, E, F> Matcher<C> for Catch<E, F>
    where E: Error + 'static,
          F: FnMut(&mut C, &E) -> Result<bool, Fault> + Send
{
    fn kind(&self) -> &'static str {
        any::type_name::<E>()
    }

    fn matches(&self, fault: &Fault) -> bool {
        fault.is::<E>()
    }

    fn handle(&mut self, context: &mut C, fault: &Fault) -> Result<bool, Fault> {
        match fault.downcast_ref::<E>() {
            Some(error) => (self.handler)(context, error),
            None => Ok(false),
        }
    }
}


/// Handler for faults of any kind
pub struct CatchAll<F> {
    /// User-provided handler
    handler: F,
}
//
impl<F> CatchAll<F> {
    /// Handle every fault using some function
    pub fn and_handle<C>(handler: F) -> Self
        where F: FnMut(&mut C, &Fault) -> Result<bool, Fault> + Send
    {
        CatchAll { handler }
    }
}
//
impl<C, F> Matcher<C> for CatchAll<F>
    where F: FnMut(&mut C, &Fault) -> Result<bool, Fault> + Send
{
    fn kind(&self) -> &'static str {
        "*"
    }

    fn matches(&self, _fault: &Fault) -> bool {
        true
    }

    fn handle(&mut self, context: &mut C, fault: &Fault) -> Result<bool, Fault> {
        (self.handler)(context, fault)
    }
}


/// Run a fault through an ordered list of handlers
///
/// Returns Ok if some handler resolved the fault, otherwise the fault which
/// remains in flight: either the original one, or one raised by a handler.
///
pub(crate) fn recover<C>(handlers: &mut [Box<dyn Matcher<C>>],
                         context: &mut C,
                         fault: Fault) -> Result<(), Fault> {
    for handler in handlers.iter_mut().filter(|h| h.matches(&fault)) {
        match handler.handle(context, &fault) {
            Ok(true) => return Ok(()),
            Ok(false) => continue,
            Err(superseding) => return Err(superseding),
        }
    }
    Err(fault)
}
