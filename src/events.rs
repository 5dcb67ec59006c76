use chrono::{DateTime, Local};
use serde::Serialize;

use crate::command::Command;
use crate::grbl::messages::{ControllerState, ControllerStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Everything observable about the controller, fanned out on a broadcast
/// channel. Lagging subscribers lose the oldest events, never block the
/// controller task.
#[derive(Debug, Clone, Serialize)]
pub enum StreamerEvent {
    CommandQueued(Command),
    CommandSent(Command),
    CommandComplete(Command),
    CommandSkipped(Command),
    StatusUpdated(ControllerStatus),
    StateChanged {
        from: ControllerState,
        to: ControllerState,
    },
    Message {
        severity: Severity,
        text: String,
        at: DateTime<Local>,
    },
}
