//! Step sequences of asynchronous operations
//!
//! The body of an asynchronous operation reads like sequential code: some
//! plain code, then a step, then more plain code which may use the outcome of
//! that step, possibly within loops and cleanup blocks which must run however
//! the code inside of them is left. But since steps may suspend the operation
//! and resume it later from another thread, this body cannot be a plain Rust
//! function. Instead, it must be a resumable state machine which hands out one
//! step at a time and is resumed by the engine once that step is over.
//!
//! The `Sequence` trait is the interface between such a state machine and the
//! engine. Any type can implement it, but most operations will want to use
//! `Script`, a builder which compiles a body made of plain code blocks, steps,
//! loops, early exits and cleanup blocks into a flat program, and runs that
//! program one step at a time. Cleanup blocks are tied to the range of the
//! program which they guard: whenever the program is left from within that
//! range, be it by a fault or an early exit, the active cleanup blocks run
//! from the innermost to the outermost one.

use crate::fault::Fault;
use crate::step::Step;
use thiserror::Error;


/// Resumable sequence of steps
pub trait Sequence<C>: Send {
    /// Run the sequence until it produces its next step or ends
    ///
    /// The input is the outcome of the previous step: Ok if it went fine, or
    /// the fault which it left unresolved, which the sequence must raise at the
    /// point where it stopped. The sequence then yields its next step, ends
    /// normally with None, or ends with the fault that escaped from it.
    ///
    fn resume(&mut self,
              context: &mut C,
              input: Result<(), Fault>) -> Result<Option<Step<C>>, Fault>;
}


/// Plain code, run between steps
type Action<C> = Box<dyn FnMut(&mut C) -> Result<(), Fault> + Send>;

/// Loop condition
type Condition<C> = Box<dyn FnMut(&mut C) -> bool + Send>;

/// Step constructor
type StepFactory<C> = Box<dyn FnMut(&mut C) -> Result<Step<C>, Fault> + Send>;


/// Step sequence built out of structured code blocks
pub struct Script<C> {
    /// Compiled program
    program: Vec<Instruction<C>>,

    /// Cleanup blocks, indexed by the Enter/Leave instructions of the program
    cleanups: Vec<Action<C>>,

    /// Index of the next instruction to be run
    pc: usize,

    /// Cleanup blocks guarding the current instruction, innermost last
    active: Vec<usize>,

    /// Truth that the program is over
    finished: bool,
}
//
impl<C: 'static> Script<C> {
    /// Start an empty script
    pub fn new() -> Self {
        Script {
            program: Vec::new(),
            cleanups: Vec::new(),
            pc: 0,
            active: Vec::new(),
            finished: false,
        }
    }

    /// Run some plain code
    pub fn run<F>(mut self, action: F) -> Self
        where F: FnMut(&mut C) -> Result<(), Fault> + Send + 'static
    {
        self.program.push(Instruction::Run(Box::new(action)));
        self
    }

    /// Build a step and hand it over to the engine
    pub fn step<F>(self, mut factory: F) -> Self
        where F: FnMut(&mut C) -> Step<C> + Send + 'static
    {
        self.try_step(move |context| Ok(factory(context)))
    }

    /// Variant of step() for step constructors which can fault
    pub fn try_step<F>(mut self, factory: F) -> Self
        where F: FnMut(&mut C) -> Result<Step<C>, Fault> + Send + 'static
    {
        self.program.push(Instruction::Step(Box::new(factory)));
        self
    }

    /// Hand over a ready-made step to the engine
    ///
    /// Such a step can only be used once. Reaching it again, from within a
    /// loop, raises the StepReused fault.
    ///
    pub fn then(self, step: Step<C>) -> Self {
        let mut step = Some(step);
        self.try_step(move |_| step.take().ok_or_else(|| Fault::new(StepReused)))
    }

    /// Run a cleanup block whenever the body is left, whichever way it is left
    ///
    /// A fault raised by the cleanup block replaces the fault in flight, if
    /// any.
    ///
    pub fn try_finally<B, F>(mut self, body: B, cleanup: F) -> Self
        where B: FnOnce(Script<C>) -> Script<C>,
              F: FnMut(&mut C) -> Result<(), Fault> + Send + 'static
    {
        let id = self.cleanups.len();
        self.cleanups.push(Box::new(cleanup));
        self.program.push(Instruction::Enter(id));
        self.splice(body(Script::new()));
        self.program.push(Instruction::Leave(id));
        self
    }

    /// Run the body for as long as a condition holds
    pub fn repeat_while<P, B>(mut self, condition: P, body: B) -> Self
        where P: FnMut(&mut C) -> bool + Send + 'static,
              B: FnOnce(Script<C>) -> Script<C>
    {
        let body = body(Script::new());
        let head = self.program.len();
        let exit = head + body.program.len() + 2;
        self.program.push(Instruction::Unless(Box::new(condition), exit));
        self.splice(body);
        self.program.push(Instruction::Jump(head));
        self
    }

    /// Run the body a fixed number of times
    pub fn repeat<B>(self, count: usize, body: B) -> Self
        where B: FnOnce(Script<C>) -> Script<C>
    {
        let mut iteration = 0;
        self.repeat_while(
            move |_| {
                if iteration < count {
                    iteration += 1;
                    true
                } else {
                    // Get ready for the next time the loop is entered
                    iteration = 0;
                    false
                }
            },
            body
        )
    }

    /// End the script early, running the active cleanup blocks
    pub fn exit(mut self) -> Self {
        self.program.push(Instruction::Exit);
        self
    }

    /// Append another script's program to this one
    fn splice(&mut self, other: Script<C>) {
        let base_pc = self.program.len();
        let base_id = self.cleanups.len();
        self.cleanups.extend(other.cleanups);
        self.program.extend(
            other.program
                 .into_iter()
                 .map(|instruction| instruction.relocate(base_pc, base_id))
        );
    }
}
//
impl<C: 'static> Default for Script<C> {
    fn default() -> Self {
        Script::new()
    }
}
//
impl<C> Sequence<C> for Script<C> {
    fn resume(&mut self,
              context: &mut C,
              input: Result<(), Fault>) -> Result<Option<Step<C>>, Fault> {
        if self.finished {
            return Ok(None);
        }
        let mut unwinding = input.err().map(Unwind::Fault);
        loop {
            // Leaving the program runs the active cleanup blocks, innermost
            // first, and a faulting cleanup block replaces the reason to leave
            if let Some(reason) = unwinding.take() {
                match self.active.pop() {
                    Some(id) => {
                        unwinding = match (self.cleanups[id])(context) {
                            Ok(()) => Some(reason),
                            Err(superseding) => Some(Unwind::Fault(superseding)),
                        };
                        continue;
                    },
                    None => {
                        self.finished = true;
                        return match reason {
                            Unwind::Exit => Ok(None),
                            Unwind::Fault(fault) => Err(fault),
                        };
                    },
                }
            }

            match self.program.get_mut(self.pc) {
                None => {
                    debug_assert!(self.active.is_empty());
                    self.finished = true;
                    return Ok(None);
                },
                Some(Instruction::Step(factory)) => {
                    self.pc += 1;
                    match factory(context) {
                        Ok(step) => return Ok(Some(step)),
                        Err(fault) => unwinding = Some(Unwind::Fault(fault)),
                    }
                },
                Some(Instruction::Run(action)) => {
                    self.pc += 1;
                    if let Err(fault) = action(context) {
                        unwinding = Some(Unwind::Fault(fault));
                    }
                },
                Some(Instruction::Enter(id)) => {
                    self.active.push(*id);
                    self.pc += 1;
                },
                Some(Instruction::Leave(id)) => {
                    let id = *id;
                    debug_assert_eq!(self.active.last(), Some(&id));
                    self.active.pop();
                    self.pc += 1;
                    if let Err(fault) = (self.cleanups[id])(context) {
                        unwinding = Some(Unwind::Fault(fault));
                    }
                },
                Some(Instruction::Unless(condition, exit)) => {
                    self.pc = if condition(context) { self.pc + 1 } else { *exit };
                },
                Some(Instruction::Jump(target)) => {
                    self.pc = *target;
                },
                Some(Instruction::Exit) => {
                    unwinding = Some(Unwind::Exit);
                },
            }
        }
    }
}


/// Fault raised when a step handed over with Script::then() is reached twice
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("a ready-made step was reached more than once")]
pub struct StepReused;


/// Instructions of a compiled script
enum Instruction<C> {
    /// Build a step and yield it
    Step(StepFactory<C>),

    /// Run plain code
    Run(Action<C>),

    /// Enter the range guarded by some cleanup block
    Enter(usize),

    /// Leave that range normally, running the cleanup block
    Leave(usize),

    /// Jump to some instruction unless a condition holds
    Unless(Condition<C>, usize),

    /// Jump to some instruction
    Jump(usize),

    /// End the program early
    Exit,
}
//
impl<C> Instruction<C> {
    /// Adjust instruction and cleanup indices when a program is spliced
    fn relocate(self, base_pc: usize, base_id: usize) -> Self {
        use self::Instruction::*;
        match self {
            Enter(id) => Enter(id + base_id),
            Leave(id) => Leave(id + base_id),
            Unless(condition, target) => Unless(condition, target + base_pc),
            Jump(target) => Jump(target + base_pc),
            other => other,
        }
    }
}


/// Reasons for leaving a script before its end
enum Unwind {
    /// A fault escaped
    Fault(Fault),

    /// The script asked to end early
    Exit,
}
