use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tracing::{info, warn};

use crate::engine::ollama::SummaryEngine;
use crate::engine::whisper::SpeechEngine;
use crate::error::Error;
use crate::model::transcript::{merge_segments, render_transcript, TranscriptSegment};
use crate::model::types::UserId;
use crate::recorder::artifacts::SessionArtifacts;

/// Outcome of the post-stop pipeline.  Partial results are the norm:
/// individual speakers may have failed to transcribe, and the summary
/// may have failed while the transcript survived.
pub struct PipelineReport {
    pub segments: Vec<TranscriptSegment>,
    /// Rendered speaker-labeled transcript; `None` when no speaker
    /// produced any text.
    pub transcript: Option<String>,
    /// Per-speaker transcription failures.  These never abort the run.
    pub failures: Vec<Error>,
    /// `None` when there was nothing to summarize.
    pub summary: Option<Result<String, Error>>,
}

impl PipelineReport {
    /// True when every speaker failed to transcribe.  The caller keeps
    /// the audio artifacts in that case; nothing derived from them has
    /// been delivered.
    pub fn total_transcription_failure(&self) -> bool {
        self.transcript.is_none() && !self.failures.is_empty()
    }
}

/// Transcribe every speaker artifact, merge the segments, and ask for
/// a summary.  Speakers transcribe independently so one corrupt or
/// silent artifact never costs the others their text; stage order is
/// fixed (transcribe, merge, summarize) and the caller publishes.
pub async fn run(
    artifacts: &SessionArtifacts,
    labels: &HashMap<UserId, String>,
    speech: Arc<dyn SpeechEngine>,
    summarizer: Arc<dyn SummaryEngine>,
) -> PipelineReport {
    let mut jobs = FuturesUnordered::new();
    for artifact in artifacts.speakers.iter().cloned() {
        let speech = speech.clone();
        jobs.push(async move { speech.transcribe(&artifact).await });
    }

    let mut segments = Vec::new();
    let mut failures = Vec::new();
    while let Some(result) = jobs.next().await {
        match result {
            Ok(speaker_segments) => segments.extend(speaker_segments),
            Err(error) => {
                warn!(%error, "speaker transcription failed, continuing");
                failures.push(error);
            }
        }
    }

    let segments = merge_segments(segments);
    if segments.is_empty() {
        info!("no transcribable audio in session");
        return PipelineReport {
            segments,
            transcript: None,
            failures,
            summary: None,
        };
    }

    let transcript = render_transcript(&segments, labels);
    let summary = summarizer.summarize(&transcript).await;
    if let Err(error) = &summary {
        // the transcript still gets delivered
        warn!(%error, "summarization failed");
    }

    PipelineReport {
        segments,
        transcript: Some(transcript),
        failures,
        summary: Some(summary),
    }
}
