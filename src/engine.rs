//! Engine driving asynchronous operations
//!
//! The engine pulls steps out of an operation's sequence, one at a time, and
//! drives each of them through its Begin/End pair. Steps which complete
//! synchronously are ended on the spot, and the engine moves on to the next
//! step without returning, using a plain loop rather than recursion so that
//! any number of synchronous steps can run back to back in constant stack.
//!
//! Steps which do not complete synchronously suspend the operation. The engine
//! is then parked in a slot which is shared with the step's completion
//! callback, and the stretch of code which was driving it returns. Once the
//! step completes, the callback takes the engine back out of the slot and
//! resumes it on whichever thread delivered the completion.
//!
//! A step may also complete on another thread while the engine is still
//! getting ready to park. This race is resolved under the slot's lock: if the
//! completion came first, the engine does not park and carries on where it
//! is, so there is never more than one stretch driving a given operation.
//!
//! The first stretch is the one which runs inside of `AsyncOperation::start`.
//! Until the operation suspends, its outer result handle does not exist yet:
//! if the operation finishes within that stretch, `start` hands out a handle
//! which is born complete. Otherwise, a pending handle is built at the first
//! suspension, returned by `start`, and completed by the stretch which
//! eventually finishes the operation.

use crate::catch::{self, Matcher};
use crate::fault::Fault;
use crate::handle::{Callback, Completer, ResultHandle, State};
use crate::monitor::StatusPublisher;
use crate::operation::{AsyncOperation, SyncFaults};
use crate::script::Sequence;
use crate::status::{Completion, OperationStatus};
use crate::step::{Begun, Wake};
use log::{debug, trace};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::sync::Arc;


/// Start an operation, driving it until it suspends or finishes
pub(crate) fn start<O: AsyncOperation>(
    mut operation: O,
    callback: Option<Callback<O::Output>>,
    state: Option<State>,
    publisher: Option<StatusPublisher>
) -> Result<ResultHandle<O::Output>, Fault> {
    let steps = operation.steps();
    let engine = Box::new(Engine {
        label: operation.name(),
        sync_faults: operation.sync_faults(),
        operation,
        steps,
        steps_begun: 0,
        in_flight: None,
        publisher,
        outer: Outer::Unpublished { callback, state },
    });
    debug!("{}: starting", engine.label);

    let shared = Arc::new(Shared {
        parking: Mutex::new(Parking { engine: None, current: 0, woken: false }),
    });
    match engine.drive(&shared) {
        Stretch::Inline(outcome) => outcome,
        Stretch::Detached(Some(handle)) => Ok(handle),
        Stretch::Detached(None) => {
            unreachable!("an operation was suspended without a result handle")
        },
    }
}


/// State of an operation which is being driven
struct Engine<O: AsyncOperation> {
    /// Name used in log records
    label: Cow<'static, str>,

    /// What to do with faults which occur before the first suspension
    sync_faults: SyncFaults,

    /// The operation, which is also the context of its steps
    operation: O,

    /// Sequence of steps of the operation
    steps: O::Steps,

    /// Number of steps which were begun so far
    steps_begun: usize,

    /// Step which did not complete synchronously, if any
    in_flight: Option<InFlight<O>>,

    /// Status updates are sent there, if someone is watching
    publisher: Option<StatusPublisher>,

    /// Outer result handle of the operation, or what is needed to build it
    outer: Outer<O::Output>,
}
//
impl<O: AsyncOperation> Engine<O> {
    /// Drive the operation until it suspends or finishes
    ///
    /// If a step is in flight, its completion is what brought us here, so we
    /// start by ending it.
    ///
    fn drive(mut self: Box<Self>, shared: &Arc<Shared<O>>) -> Stretch<O::Output> {
        let mut published = None;
        let mut input = self.collect();
        loop {
            // Ask the sequence for its next step, feeding it that outcome
            let this = &mut *self;
            let step = match this.steps.resume(&mut this.operation, input) {
                Ok(Some(step)) => step,
                Ok(None) => return self.finish(Ok(()), published),
                Err(fault) => return self.finish(Err(fault), published),
            };
            let index = self.steps_begun;
            self.steps_begun += 1;
            self.publish(OperationStatus::Running(index));
            trace!("{}: beginning step #{} ({})",
                   self.label, index, step.name().unwrap_or("unnamed"));

            // Begin it
            let (begin, mut handlers) = step.into_parts();
            let begun = match begin(&mut self.operation, waker(shared, index)) {
                Ok(begun) => begun,
                Err(fault) => {
                    trace!("{}: step #{} failed to begin", self.label, index);
                    input = catch::recover(&mut handlers, &mut self.operation, fault);
                    continue;
                },
            };
            let in_flight = InFlight { index, begun, handlers };

            // Synchronous steps are ended immediately
            if in_flight.begun.completed_synchronously() {
                trace!("{}: step #{} completed synchronously", self.label, index);
                input = in_flight.end(&mut self.operation);
                continue;
            }

            // Asynchronous ones suspend the operation, which needs an outer
            // result handle from now on
            trace!("{}: suspending at step #{}", self.label, index);
            if let Some(handle) = self.outer.build_handle() {
                published = Some(handle);
            }
            self.in_flight = Some(in_flight);
            self.publish(OperationStatus::Suspended(index));
            match self.park(shared) {
                Some(engine) => {
                    trace!("{}: step #{} completed before suspension",
                           engine.label, index);
                    self = engine;
                    input = self.collect();
                },
                None => return Stretch::Detached(published),
            }
        }
    }

    /// End the step in flight, if any, and tell how it went
    fn collect(&mut self) -> Result<(), Fault> {
        match self.in_flight.take() {
            Some(in_flight) => {
                trace!("{}: resuming after step #{}", self.label, in_flight.index);
                self.publish(OperationStatus::Running(in_flight.index));
                in_flight.end(&mut self.operation)
            },
            None => Ok(()),
        }
    }

    /// Park the engine until the step in flight completes, unless it already
    /// has, in which case the engine is handed back
    fn park(self: Box<Self>, shared: &Shared<O>) -> Option<Box<Self>> {
        let mut parking = shared.parking.lock();
        if parking.woken {
            parking.woken = false;
            Some(self)
        } else {
            parking.engine = Some(self);
            None
        }
    }

    /// Publish the outcome of the operation
    fn finish(mut self: Box<Self>,
              outcome: Result<(), Fault>,
              published: Option<ResultHandle<O::Output>>) -> Stretch<O::Output> {
        let outcome = outcome.map(|()| self.operation.result().take());
        self.publish(OperationStatus::Finished(Completion::of(&outcome)));
        match outcome {
            Ok(_) => debug!("{}: finished after {} step(s)",
                            self.label, self.steps_begun),
            Err(ref fault) => debug!("{}: failed after {} step(s): {}",
                                     self.label, self.steps_begun, fault),
        }

        let Engine { outer, sync_faults, .. } = *self;
        match outer {
            Outer::Published(completer) => {
                completer.complete(outcome);
                Stretch::Detached(published)
            },
            Outer::Unpublished { callback, state } => Stretch::Inline(
                match (outcome, sync_faults) {
                    (Err(fault), SyncFaults::Raise) => Err(fault),
                    (outcome, _) => {
                        Ok(ResultHandle::completed(outcome, callback, state))
                    },
                }
            ),
            Outer::Publishing => {
                unreachable!("an operation finished while publishing its handle")
            },
        }
    }

    /// Send a status update to the monitor, if any
    fn publish(&mut self, status: OperationStatus) {
        if let Some(ref mut publisher) = self.publisher {
            publisher.update(status);
        }
    }
}


/// Step which did not complete synchronously
struct InFlight<O: AsyncOperation> {
    /// Position of the step in the order of beginning
    index: usize,

    /// Begun step, awaiting its end
    begun: Box<dyn Begun<O>>,

    /// Fault handlers of the step
    handlers: Vec<Box<dyn Matcher<O>>>,
}
//
impl<O: AsyncOperation> InFlight<O> {
    /// End the step, handing any fault that it raises over to its handlers
    fn end(self, operation: &mut O) -> Result<(), Fault> {
        let InFlight { index: _, begun, mut handlers } = self;
        match begun.end(operation) {
            Ok(()) => Ok(()),
            Err(fault) => catch::recover(&mut handlers, operation, fault),
        }
    }
}


/// Outer result handle of an operation
enum Outer<T> {
    /// The operation never suspended, so the handle does not exist yet
    Unpublished {
        /// Callback to be attached to the handle
        callback: Option<Callback<T>>,

        /// Opaque caller state to be attached to the handle
        state: Option<State>,
    },

    /// Transient state of build_handle()
    Publishing,

    /// The handle was handed out, and will be completed through this
    Published(Completer<T>),
}
//
impl<T> Outer<T> {
    /// Make sure that the outer handle exists, returning it if it was just
    /// built
    fn build_handle(&mut self) -> Option<ResultHandle<T>> {
        match std::mem::replace(self, Outer::Publishing) {
            Outer::Unpublished { callback, state } => {
                let (completer, handle) = ResultHandle::pending(callback, state);
                *self = Outer::Published(completer);
                Some(handle)
            },
            other => {
                *self = other;
                None
            },
        }
    }
}


/// What a driving stretch leaves behind
enum Stretch<T> {
    /// The operation was suspended at some point, so its outer handle was
    /// handed out. If it was built during this stretch, here it is.
    Detached(Option<ResultHandle<T>>),

    /// The operation finished without ever being suspended
    Inline(Result<ResultHandle<T>, Fault>),
}


/// Meeting point between a suspended engine and the step it waits for
struct Shared<O: AsyncOperation> {
    /// Parking slot (never locked while user code runs)
    parking: Mutex<Parking<O>>,
}
//
struct Parking<O: AsyncOperation> {
    /// Engine waiting for its step in flight to complete
    engine: Option<Box<Engine<O>>>,

    /// Index of the latest step which was begun
    current: usize,

    /// Truth that the current step completed while the engine was not parked
    /// yet
    woken: bool,
}


/// Build the notification which a step uses to resume the engine
///
/// Notifications are tied to their step. Those of earlier steps, for example
/// steps whose begin function faulted after handing out its callback, are
/// ignored.
///
fn waker<O: AsyncOperation>(shared: &Arc<Shared<O>>, index: usize) -> Wake {
    {
        let mut parking = shared.parking.lock();
        parking.current = index;
        parking.woken = false;
    }
    let shared = shared.clone();
    Arc::new(move || wake(&shared, index))
}


/// Resume a parked engine, or tell it not to park if it is not parked yet
fn wake<O: AsyncOperation>(shared: &Arc<Shared<O>>, index: usize) {
    let engine = {
        let mut parking = shared.parking.lock();
        if parking.current != index {
            trace!("Ignoring a stray completion from step #{}", index);
            return;
        }
        match parking.engine.take() {
            Some(engine) => engine,
            None => {
                parking.woken = true;
                return;
            },
        }
    };
    match engine.drive(shared) {
        Stretch::Detached(_) => {},
        Stretch::Inline(_) => {
            unreachable!("a resumed operation finished without a result handle")
        },
    }
}


/// Unit tests
#[cfg(test)]
mod tests {
    use crate::engine::*;
    use crate::monitor;
    use crate::operation::ResultSlot;
    use crate::script::Script;
    use crate::step::Step;
    use std::thread;

    /// Producers of pending step results are stored there
    type Producer = Arc<Mutex<Option<Completer<u64>>>>;

    /// Operation which adds up the values produced by its steps
    struct Sum {
        total: ResultSlot<u64>,
        script: Option<Script<Sum>>,
    }
    //
    impl Sum {
        fn new(script: Script<Sum>) -> Self {
            Sum { total: ResultSlot::new(), script: Some(script) }
        }
    }
    //
    impl AsyncOperation for Sum {
        type Output = u64;
        type Steps = Script<Sum>;

        fn steps(&mut self) -> Script<Sum> {
            self.script.take().unwrap_or_default()
        }

        fn result(&mut self) -> &mut ResultSlot<u64> {
            &mut self.total
        }
    }

    /// Step which adds one, completing synchronously
    fn add_one_now() -> Step<Sum> {
        Step::new(
            |_: &mut Sum, callback| Ok(ResultHandle::completed(Ok(1), Some(callback), None)),
            |sum, handle| {
                *sum.total.get_mut() += handle.end()?;
                Ok(())
            }
        )
    }

    /// Step which adds one, completing asynchronously but before its begin
    /// function has returned
    fn add_one_early() -> Step<Sum> {
        Step::new(
            |_: &mut Sum, callback| {
                let (completer, handle) = ResultHandle::pending(Some(callback), None);
                completer.succeed(1);
                Ok(handle)
            },
            |sum, handle| {
                *sum.total.get_mut() += handle.end()?;
                Ok(())
            }
        )
    }

    /// Step which adds whatever its producer provides, later on
    fn add_later(producer: &Producer) -> Step<Sum> {
        let producer = producer.clone();
        Step::new(
            move |_: &mut Sum, callback| {
                let (completer, handle) = ResultHandle::pending(Some(callback), None);
                *producer.lock() = Some(completer);
                Ok(handle)
            },
            |sum, handle| {
                *sum.total.get_mut() += handle.end()?;
                Ok(())
            }
        )
    }

    /// Run some code on a thread with a small stack
    fn with_small_stack<F: FnOnce() + Send + 'static>(f: F) {
        thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(f)
            .unwrap()
            .join()
            .unwrap();
    }

    /// Check that long chains of synchronous steps do not grow the stack
    #[test]
    fn many_synchronous_steps() {
        with_small_stack(|| {
            let sum = Sum::new(
                Script::new().repeat(100_000, |body| body.step(|_| add_one_now()))
            );
            let handle = sum.start(None, None).unwrap();
            assert!(handle.is_completed());
            assert!(handle.completed_synchronously());
            assert_eq!(Sum::end(&handle).unwrap(), 100_000);
        });
    }

    /// Check that steps which complete before the engine has parked do not
    /// grow the stack either
    #[test]
    fn many_early_completions() {
        with_small_stack(|| {
            let sum = Sum::new(
                Script::new().repeat(20_000, |body| body.step(|_| add_one_early()))
            );
            let handle = sum.start(None, None).unwrap();
            assert!(handle.is_completed());
            assert!(!handle.completed_synchronously());
            assert_eq!(Sum::end(&handle).unwrap(), 20_000);
        });
    }

    /// Check that an operation suspended on one thread is resumed on the thread
    /// which completes its step, then suspends again
    #[test]
    fn resumption() {
        let producer = Producer::default();
        let c_producer = producer.clone();
        let sum = Sum::new(
            Script::new().repeat(2, move |body| {
                body.step(move |_| add_later(&c_producer))
                    .step(|_| add_one_now())
            })
        );
        let handle = sum.start(None, None).unwrap();
        assert!(!handle.is_completed());

        // Complete the first step from another thread
        let completer = producer.lock().take().unwrap();
        thread::spawn(move || completer.succeed(10)).join().unwrap();
        assert!(!handle.is_completed());

        // That thread must have driven the operation up to the second
        // asynchronous step, which is now waiting
        let completer = producer.lock().take().unwrap();
        completer.succeed(20);
        assert!(handle.is_completed());
        assert_eq!(Sum::end(&handle).unwrap(), 32);
    }

    /// Check the status transitions reported by a monitored operation
    #[test]
    fn monitoring() {
        let producer = Producer::default();
        let c_producer = producer.clone();
        let sum = Sum::new(
            Script::new().step(|_| add_one_now())
                         .step(move |_| add_later(&c_producer))
        );
        let (publisher, mut monitor) = monitor::channel();
        assert_eq!(*monitor.status(), OperationStatus::Idle);

        let handle = sum.start_monitored(None, None, publisher).unwrap();
        assert_eq!(*monitor.status(), OperationStatus::Suspended(1));

        let completer = producer.lock().take().unwrap();
        completer.succeed(41);
        assert_eq!(*monitor.status(), OperationStatus::Finished(Completion::Success));
        assert_eq!(Sum::end(&handle).unwrap(), 42);
    }

    /// Check that the monitor reports the fault which ended an operation
    #[test]
    fn monitoring_fault() {
        let expected = Fault::msg("Expected.");
        let c_expected = expected.clone();
        let sum = Sum::new(Script::new().run(move |_| Err(c_expected.clone())));
        let (publisher, mut monitor) = monitor::channel();
        assert!(sum.start_monitored(None, None, publisher).is_err());
        assert_eq!(*monitor.status(),
                   OperationStatus::Finished(Completion::Fault(expected)));
    }
}
