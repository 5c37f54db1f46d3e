//! Begin/End completion handles
//!
//! A result handle is the object which a caller gets back when it begins an
//! asynchronous operation. It can be used to check whether the operation is
//! done, to wait for it, to find out whether it ended before the call which
//! began it returned, and eventually to end the operation, which yields either
//! the value that the operation produced or the fault that it raised.
//!
//! Handles come in two flavors. Some work is already finished by the time the
//! handle is built, in which case `ResultHandle::completed` produces a handle
//! which is born complete. Other work finishes later, in which case
//! `ResultHandle::pending` produces a handle along with a `Completer`, which
//! the producer of the value keeps around and eventually uses to complete the
//! handle from whichever thread it runs on.
//!
//! A caller may register a callback when the handle is built. That callback is
//! invoked exactly once, after the outcome has been stored, on the thread which
//! completed the handle.

use crate::fault::Fault;
use log::debug;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;


/// Completion notification, invoked once a handle is completed
pub type Callback<T> = Box<dyn FnOnce(&ResultHandle<T>) + Send + 'static>;

/// Opaque caller state, carried by a handle on behalf of its callback
pub type State = Arc<dyn Any + Send + Sync>;


/// Consumer side of an asynchronous result
pub struct ResultHandle<T> {
    /// Reference-counted shared state
    shared: Arc<SharedState<T>>,
}
//
impl<T> ResultHandle<T> {
    /// Build a handle for work which is already finished
    ///
    /// The callback, if any, is invoked before this function returns.
    ///
    pub fn completed(outcome: Result<T, Fault>,
                     callback: Option<Callback<T>>,
                     state: Option<State>) -> Self {
        let handle = ResultHandle {
            shared: Arc::new(
                SharedState {
                    completed_synchronously: true,
                    state,
                    completed: AtomicBool::new(true),
                    outcome_lock: Mutex::new(
                        OutcomeWithCallback {
                            outcome: Outcome::Ready(outcome),
                            callback: None,
                        }
                    ),
                    completion_cv: Condvar::new(),
                }
            )
        };
        if let Some(callback) = callback {
            callback(&handle);
        }
        handle
    }

    /// Build a handle for work which will finish later, along with the
    /// completer which the producer will use to finish it
    pub fn pending(callback: Option<Callback<T>>,
                   state: Option<State>) -> (Completer<T>, Self) {
        let handle = ResultHandle {
            shared: Arc::new(
                SharedState {
                    completed_synchronously: false,
                    state,
                    completed: AtomicBool::new(false),
                    outcome_lock: Mutex::new(
                        OutcomeWithCallback {
                            outcome: Outcome::Pending,
                            callback,
                        }
                    ),
                    completion_cv: Condvar::new(),
                }
            )
        };
        (Completer { handle: Some(handle.clone()) }, handle)
    }

    /// Truth that the outcome of the work is available
    pub fn is_completed(&self) -> bool {
        self.shared.completed.load(Ordering::Acquire)
    }

    /// Truth that the work was already finished when the handle was built
    pub fn completed_synchronously(&self) -> bool {
        self.shared.completed_synchronously
    }

    /// Opaque state which the caller attached to this handle
    pub fn state(&self) -> Option<&State> {
        self.shared.state.as_ref()
    }

    /// Check whether two handles refer to the same asynchronous result
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Block until the handle is completed
    ///
    /// Note that the callback, if any, may still be running on the producer
    /// thread when this returns.
    ///
    pub fn wait(&self) {
        let mut outcome_lock = self.shared.outcome_lock.lock();
        while outcome_lock.outcome.is_pending() {
            self.shared.completion_cv.wait(&mut outcome_lock);
        }
    }

    /// Block until the handle is completed or some time has elapsed, telling
    /// whether the handle was completed
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut outcome_lock = self.shared.outcome_lock.lock();
        while outcome_lock.outcome.is_pending() {
            let wait_result = self.shared.completion_cv.wait_until(
                &mut outcome_lock,
                deadline
            );
            if wait_result.timed_out() {
                return !outcome_lock.outcome.is_pending();
            }
        }
        true
    }

    /// End the asynchronous operation, retrieving its value or its fault
    ///
    /// Ending a handle which is not completed yet, or which was already ended,
    /// violates the Begin/End contract and panics.
    ///
    pub fn end(&self) -> Result<T, Fault> {
        match self.try_end() {
            Ok(outcome) => outcome,
            Err(misuse) => panic!("{}", misuse),
        }
    }

    /// Variant of end() which reports contract violations as errors
    pub fn try_end(&self) -> Result<Result<T, Fault>, HandleError> {
        let mut outcome_lock = self.shared.outcome_lock.lock();
        match mem::replace(&mut outcome_lock.outcome, Outcome::Ended) {
            Outcome::Ready(outcome) => Ok(outcome),
            Outcome::Pending => {
                outcome_lock.outcome = Outcome::Pending;
                Err(HandleError::NotCompleted)
            },
            Outcome::Ended => Err(HandleError::AlreadyEnded),
        }
    }

    /// Store the outcome, then notify waiters and the callback
    fn set_outcome(&self, outcome: Result<T, Fault>) {
        let callback = {
            let mut outcome_lock = self.shared.outcome_lock.lock();
            assert!(outcome_lock.outcome.is_pending(),
                    "result handle was completed twice");
            outcome_lock.outcome = Outcome::Ready(outcome);
            self.shared.completed.store(true, Ordering::Release);
            outcome_lock.callback.take()
        };
        self.shared.completion_cv.notify_all();
        if let Some(callback) = callback {
            callback(self);
        }
    }
}
//
impl<T> Clone for ResultHandle<T> {
    fn clone(&self) -> Self {
        ResultHandle { shared: self.shared.clone() }
    }
}
//
impl<T> fmt::Debug for ResultHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ResultHandle")
         .field("is_completed", &self.is_completed())
         .field("completed_synchronously", &self.completed_synchronously())
         .finish()
    }
}


/// Producer side of an asynchronous result
///
/// Completing consumes the completer, so a handle cannot be completed twice.
/// If the completer is dropped before the handle is completed, the handle is
/// completed with the `Abandoned` fault, so that its consumers do not hang.
///
pub struct Completer<T> {
    /// Handle to be completed, until it is
    handle: Option<ResultHandle<T>>,
}
//
impl<T> Completer<T> {
    /// Complete the handle with some outcome
    pub fn complete(mut self, outcome: Result<T, Fault>) {
        if let Some(handle) = self.handle.take() {
            handle.set_outcome(outcome);
        }
    }

    /// Complete the handle with a value
    pub fn succeed(self, value: T) {
        self.complete(Ok(value));
    }

    /// Complete the handle with a fault
    pub fn fail(self, fault: impl Into<Fault>) {
        self.complete(Err(fault.into()));
    }
}
//
impl<T> Drop for Completer<T> {
    /// If the producer goes away before completing the handle, notify the
    /// consumer in order to prevent it from hanging
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Result handle abandoned by its producer");
            handle.set_outcome(Err(Fault::new(Abandoned)));
        }
    }
}


/// Fault used to complete handles whose producer went away
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("the producer of an asynchronous result went away without completing it")]
pub struct Abandoned;


/// Violations of the Begin/End contract by a handle's consumer
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum HandleError {
    /// The handle was ended before it was completed
    #[error("a result handle was ended before being completed")]
    NotCompleted,

    /// The handle was ended more than once
    #[error("a result handle was ended more than once")]
    AlreadyEnded,
}


/// State shared between the producer and the consumers of a result
struct SharedState<T> {
    /// Whether the handle was born complete (never changes)
    completed_synchronously: bool,

    /// Opaque caller state
    state: Option<State>,

    /// Atomic boolean for lock-free completion checks
    completed: AtomicBool,

    /// Outcome and pending callback (mutex-protected)
    outcome_lock: Mutex<OutcomeWithCallback<T>>,

    /// Condition variable used to wake up waiters on completion
    completion_cv: Condvar,
}
//
struct OutcomeWithCallback<T> {
    /// Current outcome of the work
    outcome: Outcome<T>,

    /// Callback to be invoked on completion, until it is
    callback: Option<Callback<T>>,
}


/// Lifecycle of a result's outcome
enum Outcome<T> {
    /// The work is still in progress
    Pending,

    /// The work is done and its outcome was not retrieved yet
    Ready(Result<T, Fault>),

    /// The outcome was retrieved by ending the handle
    Ended,
}
//
impl<T> Outcome<T> {
    fn is_pending(&self) -> bool {
        match *self {
            Outcome::Pending => true,
            Outcome::Ready(_) | Outcome::Ended => false,
        }
    }
}


/// Unit tests
#[cfg(test)]
mod tests {
    use crate::handle::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    /// Check the initial state of pending handles
    #[test]
    fn initial_state() {
        let (_completer, handle) = ResultHandle::<u32>::pending(None, None);
        assert!(!handle.is_completed());
        assert!(!handle.completed_synchronously());
        assert!(handle.state().is_none());
        assert_eq!(handle.try_end().unwrap_err(), HandleError::NotCompleted);
    }

    /// Check that born-complete handles invoke their callback immediately
    #[test]
    fn completed_handle() {
        // This callback will increment a counter if called
        let counter = Arc::new(AtomicUsize::new(0));
        let c_counter = counter.clone();
        let callback: Callback<u32> = Box::new(move |h: &ResultHandle<u32>| {
            assert!(h.is_completed());
            assert!(h.completed_synchronously());
            c_counter.fetch_add(1, Ordering::Relaxed);
        });

        // The callback must have been called during construction
        let handle = ResultHandle::completed(Ok(42), Some(callback), None);
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert!(handle.is_completed());
        assert!(handle.completed_synchronously());
        assert_eq!(handle.end().unwrap(), 42);
    }

    /// Check that the callback is called exactly once, after completion, with
    /// the very handle that was returned to the consumer
    #[test]
    fn callback_on_completion() {
        let state: State = Arc::new(String::from("some state"));
        let seen = Arc::new(Mutex::new(None));
        let c_seen = seen.clone();
        let callback: Callback<u32> = Box::new(move |h: &ResultHandle<u32>| {
            assert!(h.is_completed());
            *c_seen.lock() = Some(h.clone());
        });

        let (completer, handle) =
            ResultHandle::pending(Some(callback), Some(state.clone()));
        assert!(seen.lock().is_none());
        assert!(Arc::ptr_eq(handle.state().unwrap(), &state));

        completer.succeed(1234);
        let seen = seen.lock().take().unwrap();
        assert!(seen.ptr_eq(&handle));
        assert!(handle.is_completed());
        assert!(!handle.completed_synchronously());
        assert_eq!(handle.end().unwrap(), 1234);
    }

    /// Check that faults are stored and retrieved unchanged
    #[test]
    fn fault_outcome() {
        let expected = Fault::msg("Expected.");
        let (completer, handle) = ResultHandle::<u32>::pending(None, None);
        completer.fail(expected.clone());
        assert!(handle.end().unwrap_err().same_as(&expected));
    }

    /// Check that dropping the producer side completes the handle
    #[test]
    fn abandoned() {
        let (completer, handle) = ResultHandle::<u32>::pending(None, None);
        drop(completer);
        assert!(handle.is_completed());
        assert!(handle.end().unwrap_err().is::<Abandoned>());
    }

    /// Check that a handle can only be ended once
    #[test]
    fn end_twice() {
        let handle = ResultHandle::completed(Ok(()), None, None);
        assert!(handle.try_end().is_ok());
        assert_eq!(handle.try_end().unwrap_err(), HandleError::AlreadyEnded);
    }

    /// Check that ending an incomplete handle is treated as a fatal error
    #[test]
    #[should_panic(expected = "ended before being completed")]
    fn end_too_early() {
        let (_completer, handle) = ResultHandle::<u32>::pending(None, None);
        let _ = handle.end();
    }

    /// Check that waiting for completion works across threads
    #[test]
    fn wait() {
        let (completer, handle) = ResultHandle::pending(None, None);

        // Nothing will complete the handle for now
        assert!(!handle.wait_timeout(Duration::from_millis(50)));

        // Complete it from another thread, and wait for that
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.succeed(7u8);
        });
        handle.wait();
        assert!(handle.is_completed());
        assert!(handle.wait_timeout(Duration::from_millis(0)));
        assert_eq!(handle.end().unwrap(), 7);
        producer.join().unwrap();
    }
}
