use std::collections::VecDeque;

use thiserror::Error;

use crate::command::Command;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("command is {len} bytes on the wire but the firmware buffer holds {capacity}")]
    CommandTooLarge { len: usize, capacity: usize },
    #[error("queue is closed to new commands until reopened")]
    QueueClosed,
    #[error("controller is disconnected")]
    Disconnected,
}

/// Ledger of commands on their way to the firmware. Purely synchronous; owned
/// by the controller task and never shared.
///
/// Invariant: `bytes_in_flight` is exactly the sum of `wire_len()` over the
/// commands in `sent`, and never exceeds `capacity`.
#[derive(Debug)]
pub struct CommandQueue {
    capacity: usize,
    next_id: u64,
    queued: VecDeque<Command>,
    sent: VecDeque<Command>,
    bytes_in_flight: usize,
    open: bool,
    alarm_hold: bool,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        CommandQueue {
            capacity,
            next_id: 0,
            queued: VecDeque::new(),
            sent: VecDeque::new(),
            bytes_in_flight: 0,
            open: true,
            alarm_hold: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
    pub fn bytes_in_flight(&self) -> usize {
        self.bytes_in_flight
    }
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }
    pub fn sent_len(&self) -> usize {
        self.sent.len()
    }
    pub fn is_open(&self) -> bool {
        self.open
    }
    pub fn is_idle(&self) -> bool {
        self.queued.is_empty() && self.sent.is_empty()
    }

    /// While true, only generated commands may start; job commands wait.
    pub fn set_alarm_hold(&mut self, hold: bool) {
        self.alarm_hold = hold;
    }

    pub fn enqueue(&mut self, text: String, generated: bool) -> Result<&Command, SubmitError> {
        let wire_len = text.len() + 1;
        if wire_len > self.capacity {
            return Err(SubmitError::CommandTooLarge {
                len: wire_len,
                capacity: self.capacity,
            });
        }
        // Recovery and other internal commands may enter a closed queue.
        if !self.open && !generated {
            return Err(SubmitError::QueueClosed);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.queued.push_back(Command::new(id, text, generated));
        Ok(self.queued.back().unwrap())
    }

    /// Moves the next eligible queued command to the sent list if it fits in
    /// the remaining firmware buffer. Under alarm hold the next eligible
    /// command is the first *generated* one, out of queue order; recovery
    /// commands come from a different producer than the held job.
    pub fn start_next(&mut self) -> Option<&Command> {
        let index = if self.alarm_hold {
            self.queued.iter().position(|command| command.generated)?
        } else {
            if self.queued.is_empty() {
                return None;
            }
            0
        };
        let wire_len = self.queued[index].wire_len();
        if self.bytes_in_flight + wire_len > self.capacity {
            return None;
        }
        let mut command = self.queued.remove(index).unwrap();
        command.mark_sent();
        self.bytes_in_flight += wire_len;
        self.sent.push_back(command);
        self.sent.back()
    }

    /// Consumes one `ok`/`error:` acknowledgement: completes the oldest sent
    /// command and releases its buffer bytes. Returns `None` on a spurious
    /// acknowledgement with nothing in flight.
    pub fn ack(&mut self, ok: bool, error_text: Option<&str>) -> Option<Command> {
        let mut command = self.sent.pop_front()?;
        self.bytes_in_flight -= command.wire_len();
        if let Some(text) = error_text {
            command.append_response(text);
        }
        command.complete(ok);
        Some(command)
    }

    pub fn oldest_sent(&self) -> Option<&Command> {
        self.sent.front()
    }
    pub fn oldest_sent_mut(&mut self) -> Option<&mut Command> {
        self.sent.front_mut()
    }
    pub fn sent_commands(&self) -> impl Iterator<Item = &Command> {
        self.sent.iter()
    }

    /// Skips everything not yet sent and closes the queue to job submissions.
    /// Sent commands stay in flight; their acknowledgements are still owed.
    pub fn cancel(&mut self) -> Vec<Command> {
        self.open = false;
        self.queued
            .drain(..)
            .map(|mut command| {
                command.skip();
                command
            })
            .collect()
    }

    pub fn reopen(&mut self) {
        self.open = true;
    }

    /// Skips all sent commands and zeroes the ledger. Used when the bytes on
    /// the wire are known dead: firmware reset or transport loss.
    pub fn flush_sent(&mut self) -> Vec<Command> {
        self.bytes_in_flight = 0;
        self.sent
            .drain(..)
            .map(|mut command| {
                command.skip();
                command
            })
            .collect()
    }

    /// Skips every non-terminal command, sent and queued both.
    pub fn fail_all(&mut self) -> Vec<Command> {
        let mut skipped = self.flush_sent();
        skipped.extend(self.cancel());
        skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Lifecycle;
    use proptest::prelude::*;

    #[test]
    fn completes_in_fifo_order() {
        let mut queue = CommandQueue::new(127);
        queue.enqueue("G0 X1".to_string(), false).unwrap();
        queue.enqueue("G1 X2".to_string(), false).unwrap();
        queue.enqueue("G1 X3".to_string(), false).unwrap();
        while queue.start_next().is_some() {}
        assert_eq!(queue.sent_len(), 3);
        let first = queue.ack(true, None).unwrap();
        let second = queue.ack(false, Some("9")).unwrap();
        let third = queue.ack(true, None).unwrap();
        assert_eq!((first.id, first.lifecycle), (0, Lifecycle::Done { ok: true }));
        assert_eq!((second.id, second.lifecycle), (1, Lifecycle::Done { ok: false }));
        assert_eq!(second.response, "9");
        assert_eq!(third.id, 2);
        assert_eq!(queue.bytes_in_flight(), 0);
    }

    #[test]
    fn stalls_at_capacity_until_acknowledged() {
        let mut queue = CommandQueue::new(16);
        queue.enqueue("G0 X1.5".to_string(), false).unwrap(); // 8 bytes
        queue.enqueue("G1 X2.5".to_string(), false).unwrap(); // 8 bytes
        queue.enqueue("G1 X3.5".to_string(), false).unwrap(); // would overflow
        assert!(queue.start_next().is_some());
        assert!(queue.start_next().is_some());
        assert_eq!(queue.bytes_in_flight(), 16);
        assert!(queue.start_next().is_none());
        queue.ack(true, None).unwrap();
        assert_eq!(queue.bytes_in_flight(), 8);
        assert!(queue.start_next().is_some());
    }

    #[test]
    fn rejects_commands_larger_than_the_buffer() {
        let mut queue = CommandQueue::new(8);
        let error = queue.enqueue("G1 X100 Y100".to_string(), false).unwrap_err();
        assert_eq!(
            error,
            SubmitError::CommandTooLarge { len: 13, capacity: 8 }
        );
        assert!(queue.is_idle());
    }

    #[test]
    fn cancel_skips_queued_and_closes() {
        let mut queue = CommandQueue::new(127);
        queue.enqueue("G0 X1".to_string(), false).unwrap();
        queue.enqueue("G1 X2".to_string(), false).unwrap();
        queue.enqueue("G1 X3".to_string(), false).unwrap();
        queue.enqueue("G1 X4".to_string(), false).unwrap();
        queue.start_next().unwrap();
        let skipped = queue.cancel();
        assert_eq!(skipped.len(), 3);
        assert!(skipped.iter().all(|c| c.lifecycle == Lifecycle::Skipped));
        assert_eq!(
            queue.enqueue("G1 X5".to_string(), false).unwrap_err(),
            SubmitError::QueueClosed
        );
        // System commands may still enter, and the in-flight one completes.
        queue.enqueue("$X".to_string(), true).unwrap();
        let done = queue.ack(true, None).unwrap();
        assert_eq!(done.lifecycle, Lifecycle::Done { ok: true });
        queue.reopen();
        queue.enqueue("G1 X5".to_string(), false).unwrap();
    }

    #[test]
    fn alarm_hold_lets_generated_commands_pass() {
        let mut queue = CommandQueue::new(127);
        queue.enqueue("G1 X2".to_string(), false).unwrap();
        queue
            .enqueue("$/axes/x/motor0/hard_limits=false".to_string(), true)
            .unwrap();
        queue.set_alarm_hold(true);
        let started = queue.start_next().unwrap();
        assert!(started.generated);
        assert!(queue.start_next().is_none());
        queue.set_alarm_hold(false);
        assert_eq!(queue.start_next().unwrap().id, 0);
    }

    #[test]
    fn flush_sent_zeroes_the_ledger() {
        let mut queue = CommandQueue::new(127);
        queue.enqueue("G0 X1".to_string(), false).unwrap();
        queue.enqueue("G1 X2".to_string(), false).unwrap();
        queue.start_next().unwrap();
        queue.start_next().unwrap();
        let skipped = queue.flush_sent();
        assert_eq!(skipped.len(), 2);
        assert_eq!(queue.bytes_in_flight(), 0);
        assert!(queue.ack(true, None).is_none());
    }

    proptest! {
        // Drive a random interleaving of enqueue/start/ack and check the
        // ledger stays exact and bounded throughout.
        #[test]
        fn flow_ledger_stays_exact(ops in proptest::collection::vec(0u8..3, 1..200)) {
            let mut queue = CommandQueue::new(32);
            let mut line = 0usize;
            for op in ops {
                match op {
                    0 => {
                        line += 1;
                        let _ = queue.enqueue(format!("G1 X{line}"), false);
                    }
                    1 => {
                        queue.start_next();
                    }
                    _ => {
                        queue.ack(true, None);
                    }
                }
                let expected: usize = queue.sent_commands().map(|c| c.wire_len()).sum();
                prop_assert_eq!(queue.bytes_in_flight(), expected);
                prop_assert!(queue.bytes_in_flight() <= queue.capacity());
            }
        }
    }
}
