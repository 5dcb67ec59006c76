use serde::Serialize;

/// Where a command is in its life. `Done` and `Skipped` are terminal and a
/// command reaches exactly one of them exactly once; violating that is a bug
/// in the queue, not a recoverable condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Lifecycle {
    Queued,
    Sent,
    Done { ok: bool },
    Skipped,
}

/// One line of firmware-directed text plus everything we learn about it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub id: u64,
    pub text: String,
    /// The line as originally submitted; used to recognize firmware echo.
    pub original_text: String,
    /// True for internally synthesized commands (status plumbing, limit
    /// unlock/relock) that stay out of user-visible logs at normal verbosity.
    pub generated: bool,
    /// Response lines accumulated until the terminal acknowledgement.
    pub response: String,
    pub lifecycle: Lifecycle,
}

impl Command {
    pub(crate) fn new(id: u64, text: String, generated: bool) -> Self {
        Command {
            id,
            original_text: text.clone(),
            text,
            generated,
            response: String::new(),
            lifecycle: Lifecycle::Queued,
        }
    }

    /// Bytes this command occupies in the firmware receive buffer, newline
    /// included.
    pub fn wire_len(&self) -> usize {
        self.text.len() + 1
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Done { .. } | Lifecycle::Skipped)
    }

    pub(crate) fn mark_sent(&mut self) {
        assert_eq!(
            self.lifecycle,
            Lifecycle::Queued,
            "command {} sent while not queued",
            self.id
        );
        self.lifecycle = Lifecycle::Sent;
    }

    pub(crate) fn complete(&mut self, ok: bool) {
        assert_eq!(
            self.lifecycle,
            Lifecycle::Sent,
            "command {} reached a terminal state twice",
            self.id
        );
        self.lifecycle = Lifecycle::Done { ok };
    }

    pub(crate) fn skip(&mut self) {
        assert!(
            !self.is_terminal(),
            "command {} reached a terminal state twice",
            self.id
        );
        self.lifecycle = Lifecycle::Skipped;
    }

    pub(crate) fn append_response(&mut self, line: &str) {
        if !self.response.is_empty() {
            self.response.push('\n');
        }
        self.response.push_str(line);
    }
}

/// Terminal result reported back to a tracked submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Ok,
    Rejected(String),
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_lines_accumulate() {
        let mut command = Command::new(0, "$$".to_string(), false);
        command.append_response("$0=10");
        command.append_response("$1=25");
        assert_eq!(command.response, "$0=10\n$1=25");
    }

    #[test]
    #[should_panic(expected = "terminal state twice")]
    fn completing_twice_panics() {
        let mut command = Command::new(7, "G0 X1".to_string(), false);
        command.mark_sent();
        command.complete(true);
        command.complete(true);
    }

    #[test]
    #[should_panic(expected = "terminal state twice")]
    fn skipping_a_done_command_panics() {
        let mut command = Command::new(8, "G0 X1".to_string(), false);
        command.mark_sent();
        command.complete(false);
        command.skip();
    }
}
