use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::{debug, warn};

use crate::error::Error;
use crate::model::constants::{
    DISCORD_AUDIO_CHANNELS, DISCORD_SAMPLES_PER_SECOND, WAV_BITS_PER_SAMPLE,
};
use crate::model::types::{DiscordAudioSample, UserId};
use crate::recorder::session::{Session, SessionDescriptor};

/// One flushed per-speaker WAV file.
#[derive(Clone, Debug)]
pub struct SpeakerArtifact {
    pub user_id: UserId,
    pub path: PathBuf,
    pub duration: Duration,
}

/// Everything a stopped session leaves behind: metadata plus one WAV
/// artifact per speaker who actually produced audio.
#[derive(Clone, Debug)]
pub struct SessionArtifacts {
    pub descriptor: SessionDescriptor,
    pub session_dir: PathBuf,
    pub recording_duration: Duration,
    pub speakers: Vec<SpeakerArtifact>,
}

impl SessionArtifacts {
    /// Delete the per-speaker files and the session directory.  Only
    /// called after the derived transcript has been delivered; failures
    /// are logged, not propagated, since the data is already out.
    pub fn delete(&self) {
        for speaker in &self.speakers {
            if let Err(error) = fs::remove_file(&speaker.path) {
                warn!(path = %speaker.path.display(), %error, "failed to delete artifact");
            }
        }
        if let Err(error) = fs::remove_dir(&self.session_dir) {
            debug!(dir = %self.session_dir.display(), %error, "session dir not removed");
        }
    }
}

/// Flush a stopped session's tracks to disk.  Empty tracks produce no
/// file.  Explicit stop and duration-timeout stop both come through
/// here, so the resulting artifacts are identical for identical frames.
pub fn flush_session(session: Session, recordings_dir: &Path) -> Result<SessionArtifacts, Error> {
    let (descriptor, started_unix, recording_duration, tracks) = session.into_tracks();

    let session_dir = recordings_dir.join(format!(
        "session_{}_{}",
        descriptor.voice_channel_id, started_unix
    ));
    fs::create_dir_all(&session_dir)?;

    let mut user_ids: Vec<UserId> = tracks.keys().copied().collect();
    user_ids.sort_unstable();

    let mut speakers = Vec::with_capacity(user_ids.len());
    for user_id in user_ids {
        let track = &tracks[&user_id];
        if track.is_empty() {
            continue;
        }
        let path = session_dir.join(format!("user_{}.wav", user_id));
        write_speaker_wav(&path, track.samples())?;
        debug!(user_id, path = %path.display(), frames = track.frames(), "flushed speaker track");
        speakers.push(SpeakerArtifact {
            user_id,
            path,
            duration: track.duration(),
        });
    }

    Ok(SessionArtifacts {
        descriptor,
        session_dir,
        recording_duration,
        speakers,
    })
}

fn write_speaker_wav(path: &Path, samples: &[DiscordAudioSample]) -> Result<(), Error> {
    let spec = WavSpec {
        channels: DISCORD_AUDIO_CHANNELS as u16,
        sample_rate: DISCORD_SAMPLES_PER_SECOND as u32,
        bits_per_sample: WAV_BITS_PER_SAMPLE,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for sample in samples {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;
    Ok(())
}
