//! Events flowing into the manager task.
//!
//! Supervisors and the probe worker run on their own tasks; everything they
//! produce funnels through this channel so the manager is the only place
//! that touches shared application state.

use tokio::sync::mpsc;

use crate::probe::AvailabilityStatus;
use crate::recorder::StatusSnapshot;

/// An event produced outside the manager task.
#[derive(Debug)]
pub enum CoreEvent {
    /// A supervisor changed state or refreshed its file size.
    StatusChanged {
        identifier: String,
        snapshot: StatusSnapshot,
    },
    /// The probe worker finished checking an identifier.
    ProbeResult {
        identifier: String,
        status: AvailabilityStatus,
    },
}

pub type EventSender = mpsc::UnboundedSender<CoreEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<CoreEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
