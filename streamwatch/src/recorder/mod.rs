//! External recorder supervision.

pub mod classify;
pub mod process;
pub mod supervisor;

pub use supervisor::{
    RecordingSupervisor, StatusSnapshot, SupervisorConfig, SupervisorHandle, SupervisorTuning,
    TaskState,
};
