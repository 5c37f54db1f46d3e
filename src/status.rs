//! Facilities to represent the status of asynchronous operations
//!
//! The engine which drives an asynchronous operation is a small state machine.
//! It starts idle, then alternates between running the operation's code and
//! waiting for some step to complete, and finally ends up in a successful or
//! unsuccessful final state. This module provides a representation of that
//! state, which the engine can publish to interested observers.
//!
//! Steps are numbered from zero in the order in which they are begun. A step
//! which is begun several times, for example from within a loop, gets a new
//! number each time.

use crate::fault::Fault;


/// Representation of an asynchronous operation's status
///
/// Here are the possible state transitions:
///
/// - Idle -> Running(0) / Finished
/// - Running(i) -> Running(i+1) / Suspended(i) / Finished
/// - Suspended(i) -> Running(i)
///
/// Once the operation is Finished, its status won't change anymore.
///
#[derive(Clone, Debug, PartialEq)]
pub enum OperationStatus {
    /// The operation has not been started yet
    Idle,

    /// The engine is working on the operation's code around some step
    Running(usize),

    /// The engine is waiting for some step to complete
    Suspended(usize),

    /// The operation is over
    Finished(Completion),
}
//
impl OperationStatus {
    /// Check if an operation status is final (i.e. won't change anymore)
    pub fn is_final(&self) -> bool {
        use self::OperationStatus::*;
        match *self {
            Idle | Running(_) | Suspended(_) => false,
            Finished(_) => true,
        }
    }

    /// Index of the step which the engine is at, if any
    pub fn step(&self) -> Option<usize> {
        use self::OperationStatus::*;
        match *self {
            Running(index) | Suspended(index) => Some(index),
            Idle | Finished(_) => None,
        }
    }
}


/// How an asynchronous operation ended
#[derive(Clone, Debug)]
pub enum Completion {
    /// The operation produced a value
    Success,

    /// The operation ended with a fault
    Fault(Fault),
}
//
impl Completion {
    /// Summarize the outcome of an operation
    pub fn of<T>(outcome: &Result<T, Fault>) -> Self {
        match *outcome {
            Ok(_) => Completion::Success,
            Err(ref fault) => Completion::Fault(fault.clone()),
        }
    }
}
//
impl PartialEq for Completion {
    /// Faults are compared by identity
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Completion::Success, Completion::Success) => true,
            (Completion::Fault(a), Completion::Fault(b)) => a.same_as(b),
            _ => false,
        }
    }
}


/// Unit tests
#[cfg(test)]
mod tests {
    use crate::status::*;

    /// Test that only finished operations have a final status
    #[test]
    fn finality() {
        assert!(!OperationStatus::Idle.is_final());
        assert!(!OperationStatus::Running(3).is_final());
        assert!(!OperationStatus::Suspended(3).is_final());
        assert!(OperationStatus::Finished(Completion::Success).is_final());
        assert_eq!(OperationStatus::Suspended(3).step(), Some(3));
        assert_eq!(OperationStatus::Idle.step(), None);
    }

    /// Test that completions compare faults by identity
    #[test]
    fn completion() {
        let fault = Fault::msg("Expected.");
        let failed = Completion::of::<()>(&Err(fault.clone()));
        assert_eq!(failed, Completion::Fault(fault));
        assert_ne!(failed, Completion::Fault(Fault::msg("Expected.")));
        assert_ne!(failed, Completion::Success);
        assert_eq!(Completion::of(&Ok(42)), Completion::Success);
    }
}
