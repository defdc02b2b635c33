//! Completion wait: read frames until the submission's terminal event,
//! a deadline, cancellation, or channel loss.

use crate::channel::EventChannel;
use comfyrelay_core::{Frame, ProgressEvent, SubmissionId};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    TimedOut,
    Cancelled,
    ChannelClosed(String),
}

pub async fn wait_for_completion(
    channel: &mut dyn EventChannel,
    submission: &SubmissionId,
    timeout: Duration,
    cancel: &CancellationToken,
) -> WaitOutcome {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut frames_seen: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return WaitOutcome::Cancelled,
            _ = &mut deadline => {
                debug!("Deadline hit for {} after {} frames", submission, frames_seen);
                return WaitOutcome::TimedOut;
            }
            frame = channel.next_frame() => {
                let frame = match frame {
                    Ok(Some(frame)) => frame,
                    Ok(None) => return WaitOutcome::ChannelClosed("closed by engine".into()),
                    Err(e) => return WaitOutcome::ChannelClosed(e.to_string()),
                };
                frames_seen += 1;
                if frame.completes(submission) {
                    debug!("Submission {} completed after {} frames", submission, frames_seen);
                    return WaitOutcome::Completed;
                }
                if let Frame::Text(text) = &frame {
                    if let Some(event) = ProgressEvent::parse(text) {
                        trace!("event {} for {}", event.kind, submission);
                    }
                }
            }
        }
    }
}
