//! Polling-based operation status monitoring
//!
//! This module provides a way to monitor asynchronous operations through
//! polling. It provides maximal performance in scenarios where a client does
//! not need to synchronize with an asynchronous operation, but only to
//! periodically check its status, as is the case for example when updating
//! progress bars and status graphs in user interfaces.
//!
//! The engine never blocks on the monitor: status updates go through a triple
//! buffer, so the monitor always sees the latest status which was published,
//! possibly missing intermediate ones.

use crate::fault::Fault;
use crate::handle::Abandoned;
use crate::status::{Completion, OperationStatus};
use log::debug;
use triple_buffer::{Input, Output, TripleBuffer};


/// Create a publisher/monitor pair, starting from the Idle status
///
/// The publisher is handed over to the operation when it is started (see
/// `AsyncOperation::start_monitored`), and the monitor is kept by whoever
/// wants to watch that operation.
///
pub fn channel() -> (StatusPublisher, StatusMonitor) {
    let (buf_input, buf_output) = TripleBuffer::new(&OperationStatus::Idle).split();
    (
        StatusPublisher { buf_input, finished: false },
        StatusMonitor { buf_output },
    )
}


/// Engine interface, used to send operation status updates to the monitor
pub struct StatusPublisher {
    /// New operation statuses will be sent through this triple buffer
    buf_input: Input<OperationStatus>,

    /// Truth that a final status was published
    finished: bool,
}
//
impl StatusPublisher {
    /// Send a status update to the monitor
    pub(crate) fn update(&mut self, status: OperationStatus) {
        debug_assert!(!self.finished, "a finished operation changed status");
        self.finished = status.is_final();
        self.buf_input.write(status);
    }
}
//
impl Drop for StatusPublisher {
    /// If the engine goes away before the operation is finished, notify the
    /// monitor in order to prevent it from watching forever
    fn drop(&mut self) {
        if !self.finished {
            debug!("Status publisher dropped before its operation finished");
            self.update(OperationStatus::Finished(
                Completion::Fault(Fault::new(Abandoned))
            ));
        }
    }
}


/// Client interface, used to poll the operation status
pub struct StatusMonitor {
    /// Current operation status will be read through this triple buffer
    buf_output: Output<OperationStatus>,
}
//
impl StatusMonitor {
    /// Access the latest operation status
    pub fn status(&mut self) -> &OperationStatus {
        self.buf_output.read()
    }

    /// Truth that the operation is over
    pub fn is_finished(&mut self) -> bool {
        self.status().is_final()
    }
}
