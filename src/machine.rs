use std::collections::{BTreeSet, HashMap};

use chrono::Local;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    select, spawn,
    sync::{broadcast, mpsc, oneshot, watch},
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::command::{Command, CommandOutcome, Lifecycle};
use crate::config::StreamerConfig;
use crate::events::{Severity, StreamerEvent};
use crate::grbl::alarm::{extract_alarms, LimitAlarm, LIMIT_MARKER};
use crate::grbl::messages::{
    alarm_description, error_description, ControllerState, ControllerStatus, FirmwareMessage,
    ResidualStatus, StatusReport,
};
use crate::grbl::parser::parse_line;
use crate::grbl::realtime::{RealtimeCommand, SpeedOverride};
use crate::queue::{CommandQueue, SubmitError};

#[derive(Debug)]
enum Request {
    Submit {
        text: String,
        generated: bool,
        done: Option<oneshot::Sender<CommandOutcome>>,
        reply: oneshot::Sender<Result<u64, SubmitError>>,
    },
    Cancel,
    Reopen,
    Pause,
    Resume,
    Reset,
    OverrideSpeed(SpeedOverride),
    GetStatus {
        reply: oneshot::Sender<ControllerStatus>,
    },
    UnlockLimits {
        reply: oneshot::Sender<Vec<u64>>,
    },
    RelockLimits {
        reply: oneshot::Sender<Vec<u64>>,
    },
}

/// Cloneable handle to a running controller task. Every method is a channel
/// exchange; `SubmitError::Disconnected` means the task has ended.
#[derive(Clone)]
pub struct StreamerHandle {
    requests: mpsc::Sender<Request>,
    events: broadcast::Sender<StreamerEvent>,
    status: watch::Receiver<ControllerStatus>,
}

impl StreamerHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<StreamerEvent> {
        self.events.subscribe()
    }

    /// Last published snapshot; `Disconnected` until the firmware greets us.
    pub fn status(&self) -> ControllerStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ControllerStatus> {
        self.status.clone()
    }

    async fn request(&self, request: Request) -> Result<(), SubmitError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| SubmitError::Disconnected)
    }

    async fn submit_inner(
        &self,
        text: String,
        generated: bool,
        done: Option<oneshot::Sender<CommandOutcome>>,
    ) -> Result<u64, SubmitError> {
        let (reply_send, reply) = oneshot::channel();
        self.request(Request::Submit {
            text,
            generated,
            done,
            reply: reply_send,
        })
        .await?;
        reply.await.map_err(|_| SubmitError::Disconnected)?
    }

    pub async fn submit(&self, text: impl Into<String>) -> Result<u64, SubmitError> {
        self.submit_inner(text.into(), false, None).await
    }

    /// Submits a generated command; these bypass a closed queue and may run
    /// during alarm hold.
    pub async fn submit_system(&self, text: impl Into<String>) -> Result<u64, SubmitError> {
        self.submit_inner(text.into(), true, None).await
    }

    /// Submits and returns a receiver resolved with the command's terminal
    /// outcome.
    pub async fn submit_tracked(
        &self,
        text: impl Into<String>,
    ) -> Result<(u64, oneshot::Receiver<CommandOutcome>), SubmitError> {
        let (done_send, done) = oneshot::channel();
        let id = self.submit_inner(text.into(), false, Some(done_send)).await?;
        Ok((id, done))
    }

    pub async fn cancel(&self) -> Result<(), SubmitError> {
        self.request(Request::Cancel).await
    }
    pub async fn reopen(&self) -> Result<(), SubmitError> {
        self.request(Request::Reopen).await
    }
    pub async fn pause(&self) -> Result<(), SubmitError> {
        self.request(Request::Pause).await
    }
    pub async fn resume(&self) -> Result<(), SubmitError> {
        self.request(Request::Resume).await
    }
    pub async fn reset(&self) -> Result<(), SubmitError> {
        self.request(Request::Reset).await
    }
    pub async fn override_speed(&self, change: SpeedOverride) -> Result<(), SubmitError> {
        self.request(Request::OverrideSpeed(change)).await
    }

    pub async fn get_status(&self) -> Result<ControllerStatus, SubmitError> {
        let (reply_send, reply) = oneshot::channel();
        self.request(Request::GetStatus { reply: reply_send }).await?;
        reply.await.map_err(|_| SubmitError::Disconnected)
    }

    /// Enqueues hard-limit disable commands for every limit switch reported
    /// since the last reset; returns the command ids.
    pub async fn unlock_limits(&self) -> Result<Vec<u64>, SubmitError> {
        let (reply_send, reply) = oneshot::channel();
        self.request(Request::UnlockLimits { reply: reply_send }).await?;
        reply.await.map_err(|_| SubmitError::Disconnected)
    }

    pub async fn relock_limits(&self) -> Result<Vec<u64>, SubmitError> {
        let (reply_send, reply) = oneshot::channel();
        self.request(Request::RelockLimits { reply: reply_send }).await?;
        reply.await.map_err(|_| SubmitError::Disconnected)
    }
}

struct Streamer<Write: AsyncWrite + Unpin> {
    writer: Write,
    config: StreamerConfig,
    queue: CommandQueue,
    state: ControllerState,
    residual: ResidualStatus,
    current: ControllerStatus,
    alarms: BTreeSet<LimitAlarm>,
    waiting_done: HashMap<u64, oneshot::Sender<CommandOutcome>>,
    events: broadcast::Sender<StreamerEvent>,
    status_send: watch::Sender<ControllerStatus>,
}

impl<Write: AsyncWrite + Unpin> Streamer<Write> {
    fn emit(&self, event: StreamerEvent) {
        // No subscribers is fine.
        drop(self.events.send(event));
    }

    fn message(&mut self, severity: Severity, text: String) {
        match severity {
            Severity::Info => info!("{}", text),
            Severity::Warning => warn!("{}", text),
            Severity::Error => error!("{}", text),
        }
        self.emit(StreamerEvent::Message {
            severity,
            text,
            at: Local::now(),
        });
    }

    fn transition(&mut self, to: ControllerState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        // Job commands wait out an alarm; recovery commands do not.
        self.queue.set_alarm_hold(to == ControllerState::Alarm);
        self.current.state = to;
        self.status_send.send_replace(self.current.clone());
        self.emit(StreamerEvent::StateChanged { from, to });
    }

    async fn send_realtime(&mut self, command: RealtimeCommand) -> Result<(), std::io::Error> {
        self.writer.write_all(&[command.byte()]).await?;
        self.writer.flush().await?;
        debug!(byte = command.byte(), "sent realtime byte");
        Ok(())
    }

    /// Moves queued commands onto the wire while they fit in the firmware
    /// buffer.
    async fn drain(&mut self) -> Result<(), std::io::Error> {
        if self.state == ControllerState::Disconnected {
            return Ok(());
        }
        while let Some(command) = self.queue.start_next() {
            let command = command.clone();
            self.writer.write_all(command.text.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
            self.writer.flush().await?;
            if command.generated {
                debug!(id = command.id, text = %command.text, "sent system command");
            } else {
                info!(id = command.id, text = %command.text, "sent command");
            }
            self.emit(StreamerEvent::CommandSent(command));
        }
        Ok(())
    }

    fn notify_terminal(&mut self, command: Command) {
        let outcome = match command.lifecycle {
            Lifecycle::Done { ok: true } => CommandOutcome::Ok,
            Lifecycle::Done { ok: false } => CommandOutcome::Rejected(command.response.clone()),
            Lifecycle::Skipped => CommandOutcome::Skipped,
            Lifecycle::Queued | Lifecycle::Sent => return,
        };
        if let Some(done) = self.waiting_done.remove(&command.id) {
            drop(done.send(outcome));
        }
        let event = if command.lifecycle == Lifecycle::Skipped {
            StreamerEvent::CommandSkipped(command)
        } else {
            StreamerEvent::CommandComplete(command)
        };
        self.emit(event);
    }

    async fn acknowledge(
        &mut self,
        ok: bool,
        error_text: Option<String>,
    ) -> Result<(), std::io::Error> {
        match self.queue.ack(ok, error_text.as_deref()) {
            Some(command) => {
                if let Some(code) = &error_text {
                    self.message(
                        Severity::Error,
                        format!("command {} failed: {}", command.id, error_description(code)),
                    );
                }
                self.notify_terminal(command);
            }
            None => debug!("acknowledgement with nothing in flight"),
        }
        self.drain().await
    }

    fn apply_status(&mut self, report: StatusReport) {
        let status = report.into_status(&mut self.residual);
        self.current = status.clone();
        if self.state == status.state {
            self.status_send.send_replace(self.current.clone());
        } else {
            // transition publishes the updated snapshot itself.
            self.transition(status.state);
        }
        self.emit(StreamerEvent::StatusUpdated(status));
    }

    /// The welcome banner doubles as the post-reset resynchronization point:
    /// bytes previously in the firmware buffer died with the reset.
    async fn on_welcome(&mut self) -> Result<(), std::io::Error> {
        for command in self.queue.flush_sent() {
            self.notify_terminal(command);
        }
        self.alarms.clear();
        self.residual = ResidualStatus::new();
        self.transition(ControllerState::Idle);
        self.message(Severity::Info, "firmware ready".to_string());
        self.drain().await
    }

    async fn on_line(&mut self, raw: String) -> Result<(), std::io::Error> {
        let line = raw.trim_end_matches('\r');
        debug!(line, "received");
        match parse_line(self.config.dialect, line) {
            FirmwareMessage::Status(report) => {
                self.apply_status(report);
                self.drain().await
            }
            FirmwareMessage::Ok => self.acknowledge(true, None).await,
            FirmwareMessage::Error(code) => self.acknowledge(false, Some(code)).await,
            FirmwareMessage::Alarm(code) => {
                self.message(
                    Severity::Error,
                    format!("ALARM:{}: {}", code, alarm_description(&code)),
                );
                self.transition(ControllerState::Alarm);
                Ok(())
            }
            FirmwareMessage::Feedback { severity, text } => {
                if severity == Severity::Warning && text.contains(LIMIT_MARKER) {
                    self.alarms.extend(extract_alarms(&text));
                }
                self.message(severity, text);
                Ok(())
            }
            FirmwareMessage::Welcome => self.on_welcome().await,
            FirmwareMessage::Unrecognized(text) => {
                let appended = match self.queue.oldest_sent_mut() {
                    // Firmware echo of the command itself is not response text.
                    Some(command) if command.original_text == text => {
                        debug!(id = command.id, "discarding echo");
                        false
                    }
                    Some(command) => {
                        command.append_response(&text);
                        true
                    }
                    None => {
                        debug!(%text, "discarding unrecognized line");
                        false
                    }
                };
                // Response lines reach listeners as they arrive, not only in
                // the final CommandComplete record.
                if appended {
                    self.message(Severity::Info, text);
                }
                Ok(())
            }
        }
    }

    async fn enqueue_recovery(
        &mut self,
        relock: bool,
        reply: oneshot::Sender<Vec<u64>>,
    ) -> Result<(), std::io::Error> {
        let mut ids = Vec::new();
        for alarm in self.alarms.clone() {
            let text = if relock {
                alarm.relock_command()
            } else {
                alarm.unlock_command()
            };
            match self.queue.enqueue(text, true) {
                Ok(command) => {
                    ids.push(command.id);
                    let command = command.clone();
                    self.emit(StreamerEvent::CommandQueued(command));
                }
                Err(error) => warn!(%error, "could not enqueue recovery command"),
            }
        }
        drop(reply.send(ids));
        self.drain().await
    }

    async fn on_request(&mut self, request: Request) -> Result<(), std::io::Error> {
        match request {
            Request::Submit {
                text,
                generated,
                done,
                reply,
            } => {
                match self.queue.enqueue(text, generated) {
                    Ok(command) => {
                        let command = command.clone();
                        if let Some(done) = done {
                            self.waiting_done.insert(command.id, done);
                        }
                        drop(reply.send(Ok(command.id)));
                        self.emit(StreamerEvent::CommandQueued(command));
                        self.drain().await?;
                    }
                    Err(error) => {
                        warn!(%error, "rejected submission");
                        drop(reply.send(Err(error)));
                    }
                }
                Ok(())
            }
            Request::Cancel => {
                for command in self.queue.cancel() {
                    self.notify_terminal(command);
                }
                Ok(())
            }
            Request::Reopen => {
                self.queue.reopen();
                Ok(())
            }
            Request::Pause => self.send_realtime(RealtimeCommand::FeedHold).await,
            Request::Resume => self.send_realtime(RealtimeCommand::CycleStart).await,
            Request::Reset => self.send_realtime(RealtimeCommand::Reset).await,
            Request::OverrideSpeed(change) => self.send_realtime(change.realtime()).await,
            Request::GetStatus { reply } => {
                drop(reply.send(self.current.clone()));
                Ok(())
            }
            Request::UnlockLimits { reply } => self.enqueue_recovery(false, reply).await,
            Request::RelockLimits { reply } => self.enqueue_recovery(true, reply).await,
        }
    }

    fn transport_failed(&mut self) {
        error!("connection to the controller lost");
        for command in self.queue.fail_all() {
            self.notify_terminal(command);
        }
        self.transition(ControllerState::Disconnected);
        self.emit(StreamerEvent::Message {
            severity: Severity::Error,
            text: "connection to the controller lost".to_string(),
            at: Local::now(),
        });
    }
}

/// Spawns the controller task over a connected transport and returns its
/// handle. The task owns reader, writer, queue and state model; it ends on
/// transport failure or when every handle is dropped.
pub fn start_streamer<Read, Write>(
    reader: Read,
    writer: Write,
    config: StreamerConfig,
) -> StreamerHandle
where
    Read: AsyncRead + Unpin + Send + 'static,
    Write: AsyncWrite + Unpin + Send + 'static,
{
    let (request_send, mut requests) = mpsc::channel(64);
    let (events, _) = broadcast::channel(256);
    let (status_send, status) = watch::channel(ControllerStatus::disconnected());
    let handle = StreamerHandle {
        requests: request_send,
        events: events.clone(),
        status,
    };
    let poll_period = config.status_poll_interval();
    spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        let mut streamer = Streamer {
            writer,
            queue: CommandQueue::new(config.buffer_capacity),
            config,
            state: ControllerState::Disconnected,
            residual: ResidualStatus::new(),
            current: ControllerStatus::disconnected(),
            alarms: BTreeSet::new(),
            waiting_done: HashMap::new(),
            events,
            status_send,
        };
        let mut poll = interval_at(Instant::now() + poll_period, poll_period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let step = select! {
                biased;
                line = lines.next_line() => match line {
                    Ok(Some(line)) => streamer.on_line(line).await,
                    _ => {
                        streamer.transport_failed();
                        return;
                    }
                },
                request = requests.recv() => match request {
                    Some(request) => streamer.on_request(request).await,
                    // Every handle dropped; nobody left to stream for.
                    None => return,
                },
                _ = poll.tick(), if streamer.state != ControllerState::Disconnected => {
                    streamer.send_realtime(RealtimeCommand::StatusReport).await
                },
            };
            if step.is_err() {
                streamer.transport_failed();
                return;
            }
        }
    });
    handle
}
