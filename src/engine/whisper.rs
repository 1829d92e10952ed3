use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext};

use crate::config::Config;
use crate::error::Error;
use crate::model::constants::DOWNSAMPLE_GROUP_SIZE;
use crate::model::transcript::TranscriptSegment;
use crate::model::types::{DiscordAudioSample, UserId, WhisperAudioSample};
use crate::recorder::artifacts::SpeakerArtifact;

/// Seam for the speech-recognition engine, so the pipeline can be
/// exercised without model weights on disk.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Transcribe one speaker's artifact into segments attributed to
    /// that speaker.  A failure here is scoped to the one speaker.
    async fn transcribe(&self, artifact: &SpeakerArtifact)
        -> Result<Vec<TranscriptSegment>, Error>;
}

/// whisper.cpp invoker.  The context is loaded once at startup and
/// shared; each transcription gets its own state on a blocking thread.
pub struct WhisperEngine {
    context: Arc<WhisperContext>,
    language: String,
    model_name: String,
}

impl WhisperEngine {
    pub fn load(config: &Config) -> Result<Self, Error> {
        let path = config.whisper_model_path();
        if !path.is_file() {
            return Err(Error::EngineUnavailable(format!(
                "whisper model {} not found at {}",
                config.whisper_model,
                path.display()
            )));
        }
        info!(model = %config.whisper_model, path = %path.display(), "loading whisper model");
        let context = WhisperContext::new(&path.to_string_lossy()).map_err(|error| {
            Error::EngineUnavailable(format!(
                "failed to load whisper model {}: {:?}",
                path.display(),
                error
            ))
        })?;
        Ok(Self {
            context: Arc::new(context),
            language: config.whisper_language.clone(),
            model_name: config.whisper_model.clone(),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[async_trait]
impl SpeechEngine for WhisperEngine {
    async fn transcribe(
        &self,
        artifact: &SpeakerArtifact,
    ) -> Result<Vec<TranscriptSegment>, Error> {
        let context = self.context.clone();
        let language = self.language.clone();
        let path = artifact.path.clone();
        let user_id = artifact.user_id;

        tokio::task::spawn_blocking(move || {
            transcribe_artifact(&context, &path, &language, user_id)
        })
        .await
        .map_err(|error| Error::TranscriptionFailed {
            user_id,
            reason: format!("transcription task failed: {}", error),
        })?
    }
}

/// Runs on a blocking thread; a full whisper pass takes a while.
fn transcribe_artifact(
    context: &WhisperContext,
    path: &Path,
    language: &str,
    user_id: UserId,
) -> Result<Vec<TranscriptSegment>, Error> {
    let fail = |reason: String| Error::TranscriptionFailed { user_id, reason };

    let samples = read_artifact(path).map_err(|error| fail(error.to_string()))?;
    let audio = downmix_for_whisper(&samples);
    if audio.is_empty() {
        return Ok(Vec::new());
    }

    let mut state = context
        .create_state()
        .map_err(|error| fail(format!("failed to create whisper state: {:?}", error)))?;

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
    params.set_print_special(false);
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);
    params.set_suppress_blank(true);
    params.set_suppress_non_speech_tokens(true);
    params.set_language(Some(language));

    state
        .full(params, &audio)
        .map_err(|error| fail(format!("whisper inference failed: {:?}", error)))?;

    let num_segments = state
        .full_n_segments()
        .map_err(|error| fail(format!("{:?}", error)))?;
    let mut segments = Vec::with_capacity(num_segments as usize);
    for i in 0..num_segments {
        let text = state
            .full_get_segment_text(i)
            .map_err(|error| fail(format!("{:?}", error)))?;
        if text.trim().is_empty() {
            continue;
        }
        // whisper reports offsets in centiseconds
        let start_offset_ms = 10
            * state
                .full_get_segment_t0(i)
                .map_err(|error| fail(format!("{:?}", error)))? as u32;
        let end_offset_ms = 10
            * state
                .full_get_segment_t1(i)
                .map_err(|error| fail(format!("{:?}", error)))? as u32;
        segments.push(TranscriptSegment {
            user_id,
            start_offset_ms,
            end_offset_ms,
            text: text.trim().to_string(),
        });
    }
    debug!(user_id, segments = segments.len(), "transcription complete");
    Ok(segments)
}

fn read_artifact(path: &Path) -> Result<Vec<DiscordAudioSample>, Error> {
    let reader = hound::WavReader::open(path)?;
    let samples = reader
        .into_samples::<DiscordAudioSample>()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(samples)
}

/// Convert interleaved stereo 48kHz i16 to mono 16kHz f32 in [-1, 1]
/// by averaging each group of six interleaved samples.  The exact 3:1
/// rate ratio makes this a simple decimation.
fn downmix_for_whisper(samples: &[DiscordAudioSample]) -> Vec<WhisperAudioSample> {
    let scale = DOWNSAMPLE_GROUP_SIZE as f32 * DiscordAudioSample::MAX as f32;
    samples
        .chunks_exact(DOWNSAMPLE_GROUP_SIZE)
        .map(|group| {
            group
                .iter()
                .map(|sample| *sample as WhisperAudioSample)
                .sum::<WhisperAudioSample>()
                / scale
        })
        .collect()
}
