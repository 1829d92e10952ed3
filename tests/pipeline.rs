//! End-to-end pipeline tests with stub engines, covering per-speaker
//! failure isolation, merge ordering, and the retention signal.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use minutary::engine::ollama::SummaryEngine;
use minutary::engine::whisper::SpeechEngine;
use minutary::error::Error;
use minutary::model::transcript::TranscriptSegment;
use minutary::model::types::UserId;
use minutary::pipeline;
use minutary::recorder::artifacts::{SessionArtifacts, SpeakerArtifact};
use minutary::recorder::session::SessionDescriptor;

/// Returns canned segments per user id, and fails for listed users.
struct ScriptedSpeech {
    segments: HashMap<UserId, Vec<TranscriptSegment>>,
    failing: Vec<UserId>,
}

#[async_trait]
impl SpeechEngine for ScriptedSpeech {
    async fn transcribe(
        &self,
        artifact: &SpeakerArtifact,
    ) -> Result<Vec<TranscriptSegment>, Error> {
        if self.failing.contains(&artifact.user_id) {
            return Err(Error::TranscriptionFailed {
                user_id: artifact.user_id,
                reason: "scripted failure".to_string(),
            });
        }
        Ok(self
            .segments
            .get(&artifact.user_id)
            .cloned()
            .unwrap_or_default())
    }
}

struct EchoSummarizer;

#[async_trait]
impl SummaryEngine for EchoSummarizer {
    async fn summarize(&self, transcript: &str) -> Result<String, Error> {
        Ok(format!("summary of {} bytes", transcript.len()))
    }
}

struct FailingSummarizer;

#[async_trait]
impl SummaryEngine for FailingSummarizer {
    async fn summarize(&self, _transcript: &str) -> Result<String, Error> {
        Err(Error::SummarizationFailed("scripted failure".to_string()))
    }
}

fn artifacts_for(user_ids: &[UserId]) -> SessionArtifacts {
    SessionArtifacts {
        descriptor: SessionDescriptor {
            voice_channel_id: 10,
            guild_id: 20,
            text_channel_id: 30,
        },
        session_dir: PathBuf::from("unused"),
        recording_duration: Duration::from_secs(120),
        speakers: user_ids
            .iter()
            .map(|&user_id| SpeakerArtifact {
                user_id,
                path: PathBuf::from(format!("unused/user_{}.wav", user_id)),
                duration: Duration::from_secs(60),
            })
            .collect(),
    }
}

fn segment(user_id: UserId, start_ms: u32, end_ms: u32, text: &str) -> TranscriptSegment {
    TranscriptSegment {
        user_id,
        start_offset_ms: start_ms,
        end_offset_ms: end_ms,
        text: text.to_string(),
    }
}

fn labels(pairs: &[(UserId, &str)]) -> HashMap<UserId, String> {
    pairs
        .iter()
        .map(|&(id, name)| (id, name.to_string()))
        .collect()
}

#[tokio::test]
async fn interleaves_speakers_chronologically() {
    let speech = ScriptedSpeech {
        segments: HashMap::from([
            (
                1,
                vec![
                    segment(1, 0, 5_000, "Let's get started."),
                    segment(1, 12_000, 15_000, "Agreed, next item."),
                ],
            ),
            (2, vec![segment(2, 6_000, 11_000, "I have one question.")]),
        ]),
        failing: vec![],
    };

    let report = pipeline::run(
        &artifacts_for(&[1, 2]),
        &labels(&[(1, "Alice"), (2, "Bob")]),
        Arc::new(speech),
        Arc::new(EchoSummarizer),
    )
    .await;

    let transcript = report.transcript.expect("transcript");
    let lines: Vec<&str> = transcript.lines().collect();
    assert_eq!(lines[0], "[00:00 - 00:05] Alice: Let's get started.");
    assert_eq!(lines[1], "[00:06 - 00:11] Bob: I have one question.");
    assert_eq!(lines[2], "[00:12 - 00:15] Alice: Agreed, next item.");
    assert!(report.failures.is_empty());
    assert!(matches!(report.summary, Some(Ok(_))));
}

#[tokio::test]
async fn overlapping_speakers_merge_by_start_offset() {
    // A speaks over 0-5s, B interjects at 2-4s; A's segment started
    // first so it leads the merged transcript
    let speech = ScriptedSpeech {
        segments: HashMap::from([
            (1, vec![segment(1, 0, 5_000, "hello")]),
            (2, vec![segment(2, 2_000, 4_000, "hi")]),
        ]),
        failing: vec![],
    };

    let report = pipeline::run(
        &artifacts_for(&[1, 2]),
        &labels(&[(1, "A"), (2, "B")]),
        Arc::new(speech),
        Arc::new(EchoSummarizer),
    )
    .await;

    let transcript = report.transcript.expect("transcript");
    assert_eq!(
        transcript,
        "[00:00 - 00:05] A: hello\n[00:02 - 00:04] B: hi"
    );
}

#[tokio::test]
async fn one_failing_speaker_does_not_sink_the_others() {
    let speech = ScriptedSpeech {
        segments: HashMap::from([(1, vec![segment(1, 0, 2_000, "Still here.")])]),
        failing: vec![2],
    };

    let report = pipeline::run(
        &artifacts_for(&[1, 2]),
        &labels(&[(1, "Alice")]),
        Arc::new(speech),
        Arc::new(EchoSummarizer),
    )
    .await;

    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        report.failures[0],
        Error::TranscriptionFailed { user_id: 2, .. }
    ));
    let transcript = report.transcript.clone().expect("transcript");
    assert!(transcript.contains("Alice: Still here."));
    assert!(!report.total_transcription_failure());
}

#[tokio::test]
async fn all_speakers_failing_signals_retention() {
    let speech = ScriptedSpeech {
        segments: HashMap::new(),
        failing: vec![1, 2],
    };

    let report = pipeline::run(
        &artifacts_for(&[1, 2]),
        &HashMap::new(),
        Arc::new(speech),
        Arc::new(EchoSummarizer),
    )
    .await;

    assert!(report.transcript.is_none());
    assert!(report.summary.is_none());
    assert_eq!(report.failures.len(), 2);
    assert!(report.total_transcription_failure());
}

#[tokio::test]
async fn summary_failure_keeps_the_transcript() {
    let speech = ScriptedSpeech {
        segments: HashMap::from([(1, vec![segment(1, 0, 2_000, "Worth keeping.")])]),
        failing: vec![],
    };

    let report = pipeline::run(
        &artifacts_for(&[1]),
        &labels(&[(1, "Alice")]),
        Arc::new(speech),
        Arc::new(FailingSummarizer),
    )
    .await;

    assert!(report.transcript.is_some());
    assert!(matches!(
        report.summary,
        Some(Err(Error::SummarizationFailed(_)))
    ));
}

#[tokio::test]
async fn unlabeled_speakers_get_fallback_names() {
    let speech = ScriptedSpeech {
        segments: HashMap::from([(42, vec![segment(42, 0, 1_000, "Who am I?")])]),
        failing: vec![],
    };

    let report = pipeline::run(
        &artifacts_for(&[42]),
        &HashMap::new(),
        Arc::new(speech),
        Arc::new(EchoSummarizer),
    )
    .await;

    let transcript = report.transcript.expect("transcript");
    assert!(transcript.contains("User_42: Who am I?"));
}
