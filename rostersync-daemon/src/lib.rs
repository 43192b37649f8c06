//! Background reconciliation: member-snapshot watcher, per-roster scheduler
//! and a newline-JSON control socket.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod scheduler;

pub use error::DaemonError;
pub use protocol::{
    notify_changed, request_run_status, request_status, request_stop, request_trigger,
    send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{run, start_blocking};
pub use scheduler::{
    LocalExecutor, RunExecutor, RunHandle, RunState, RunStatus, Scheduler, SchedulerHandle,
    SchedulerOverview, SlotView,
};
