pub mod command;
pub mod config;
pub mod connection;
pub mod events;
pub mod grbl;
pub mod machine;
pub mod queue;
pub mod stream_job;

pub use command::{Command, CommandOutcome, Lifecycle};
pub use config::{Dialect, StreamerConfig, Units};
pub use events::{Severity, StreamerEvent};
pub use grbl::messages::{ControllerState, ControllerStatus};
pub use machine::{start_streamer, StreamerHandle};
pub use queue::SubmitError;
