//! Faults flowing through asynchronous operations
//!
//! A fault is the error value which is raised by a step, carried through the
//! step sequence of an operation, examined by exception handlers, and finally
//! re-raised to whoever ends the operation. It plays the same role as an
//! exception does in languages which have them.
//!
//! Faults are type-erased, but remember their concrete error type so that
//! handlers can match them by kind. They are also shared rather than copied
//! when cloned, which allows checking that the fault which comes out of an
//! operation is the very one which was raised inside of it.

use std::error::Error;
use std::fmt::{self, Debug, Display};
use std::sync::Arc;


/// Error value raised while running an asynchronous operation
#[derive(Clone)]
pub struct Fault {
    /// Shared, type-erased error
    inner: Arc<dyn Error + Send + Sync + 'static>,
}
//
impl Fault {
    /// Wrap an error into a fault
    pub fn new<E>(error: E) -> Self
        where E: Error + Send + Sync + 'static
    {
        Fault { inner: Arc::new(error) }
    }

    /// Build a fault out of a plain message
    pub fn msg<M>(message: M) -> Self
        where M: Display + Debug + Send + Sync + 'static
    {
        Fault::new(Message(message))
    }

    /// Build a fault out of an already boxed error
    pub fn from_boxed(error: Box<dyn Error + Send + Sync + 'static>) -> Self {
        Fault { inner: Arc::from(error) }
    }

    /// Check whether this fault is of a certain kind
    pub fn is<E: Error + 'static>(&self) -> bool {
        self.inner.is::<E>()
    }

    /// Access the underlying error as its concrete type, if it has that type
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// Check whether two faults originate from the same raise
    pub fn same_as(&self, other: &Fault) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Access the underlying error
    pub fn as_error(&self) -> &(dyn Error + Send + Sync + 'static) {
        &*self.inner
    }
}
//
impl<E> From<E> for Fault
    where E: Error + Send + Sync + 'static
{
    fn from(error: E) -> Self {
        Fault::new(error)
    }
}
//
impl Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&*self.inner, f)
    }
}
//
impl Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Fault").field(&self.inner).finish()
    }
}


/// Error type behind Fault::msg
struct Message<M>(M);
//
impl<M: Display> Display for Message<M> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}
//
impl<M: Debug> Debug for Message<M> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}
//
impl<M: Display + Debug> Error for Message<M> {}
