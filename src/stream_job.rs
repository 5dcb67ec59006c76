use futures::{pin_mut, stream, Stream, StreamExt};
use tracing::info;

use crate::command::CommandOutcome;
use crate::machine::StreamerHandle;
use crate::queue::SubmitError;

/// Per-line accounting for one streamed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobSummary {
    pub submitted: usize,
    pub completed: usize,
    pub rejected: usize,
    pub skipped: usize,
}

/// Splits program text into streamable lines.
pub fn lines_of(text: &str) -> impl Stream<Item = String> + '_ {
    stream::iter(text.lines().map(|line| line.to_string()))
}

fn is_streamable(line: &str) -> bool {
    !line.is_empty() && !line.starts_with(';') && !line.starts_with('(')
}

/// Feeds a G-code program through the controller line by line, letting the
/// flow controller pace the wire, and waits for every line's terminal
/// outcome. Comment and blank lines are dropped before submission. Firmware
/// `error:` rejections are counted, not fatal; the job keeps going the way
/// the firmware itself does.
pub async fn stream_lines<S>(
    handle: &StreamerHandle,
    lines: S,
) -> Result<JobSummary, SubmitError>
where
    S: Stream<Item = String>,
{
    let mut summary = JobSummary::default();
    let mut outcomes = Vec::new();
    pin_mut!(lines);
    while let Some(line) = lines.next().await {
        let line = line.trim().to_string();
        if !is_streamable(&line) {
            continue;
        }
        let (_, done) = handle.submit_tracked(line).await?;
        summary.submitted += 1;
        outcomes.push(done);
    }
    for done in outcomes {
        match done.await {
            Ok(CommandOutcome::Ok) => summary.completed += 1,
            Ok(CommandOutcome::Rejected(_)) => summary.rejected += 1,
            Ok(CommandOutcome::Skipped) | Err(_) => summary.skipped += 1,
        }
    }
    info!(
        submitted = summary.submitted,
        completed = summary.completed,
        rejected = summary.rejected,
        skipped = summary.skipped,
        "job finished"
    );
    Ok(summary)
}
