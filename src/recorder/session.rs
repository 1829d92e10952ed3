use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::model::constants::{DISCORD_AUDIO_CHANNELS, DISCORD_SAMPLES_PER_SECOND};
use crate::model::types::{ChannelId, DiscordAudioSample, GuildId, UserId};

/// Identity of one recording episode: the voice channel being recorded
/// and the text channel that results go back to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SessionDescriptor {
    pub voice_channel_id: ChannelId,
    pub guild_id: GuildId,
    pub text_channel_id: ChannelId,
}

/// `Recording -> Stopped`, no way back.  "Idle" is the absence of a
/// session in the registry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionStatus {
    Recording,
    Stopped,
}

/// Append-only per-speaker accumulation of interleaved stereo 48kHz
/// samples, in arrival order.
#[derive(Default)]
pub struct SpeakerTrack {
    samples: Vec<DiscordAudioSample>,
    frames: usize,
}

impl SpeakerTrack {
    pub fn push_frame(&mut self, frame: &[DiscordAudioSample]) {
        self.samples.extend_from_slice(frame);
        self.frames += 1;
    }

    pub fn samples(&self) -> &[DiscordAudioSample] {
        &self.samples
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        let per_second = (DISCORD_SAMPLES_PER_SECOND * DISCORD_AUDIO_CHANNELS) as f64;
        Duration::from_secs_f64(self.samples.len() as f64 / per_second)
    }
}

/// One active recording episode for a single voice channel.
pub struct Session {
    pub descriptor: SessionDescriptor,
    status: SessionStatus,
    started_at: Instant,
    started_unix: u64,
    max_duration: Duration,
    tracks: HashMap<UserId, SpeakerTrack>,
}

impl Session {
    pub fn new(descriptor: SessionDescriptor, max_duration: Duration) -> Self {
        let started_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        Self {
            descriptor,
            status: SessionStatus::Recording,
            started_at: Instant::now(),
            started_unix,
            max_duration,
            tracks: HashMap::new(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn over_duration_limit(&self) -> bool {
        self.elapsed() > self.max_duration
    }

    /// The single checked transition out of `Recording`.  Returns false
    /// if the session was already stopped, so callers never run the
    /// stop side effects twice.
    pub fn mark_stopped(&mut self) -> bool {
        if self.status == SessionStatus::Stopped {
            return false;
        }
        self.status = SessionStatus::Stopped;
        true
    }

    pub fn append_frame(&mut self, user_id: UserId, frame: &[DiscordAudioSample]) {
        self.tracks.entry(user_id).or_default().push_frame(frame);
    }

    pub fn speaker_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn started_unix(&self) -> u64 {
        self.started_unix
    }

    pub fn tracks(&self) -> &HashMap<UserId, SpeakerTrack> {
        &self.tracks
    }

    pub(crate) fn into_tracks(self) -> (SessionDescriptor, u64, Duration, HashMap<UserId, SpeakerTrack>) {
        let elapsed = self.started_at.elapsed();
        (self.descriptor, self.started_unix, elapsed, self.tracks)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn descriptor() -> SessionDescriptor {
        SessionDescriptor {
            voice_channel_id: 10,
            guild_id: 20,
            text_channel_id: 30,
        }
    }

    #[test]
    fn interleaved_frames_keep_per_speaker_arrival_order() {
        let mut session = Session::new(descriptor(), Duration::from_secs(60));
        session.append_frame(1, &[10, 11]);
        session.append_frame(2, &[20, 21]);
        session.append_frame(1, &[12, 13]);
        session.append_frame(3, &[30]);
        session.append_frame(2, &[22]);

        assert_eq!(session.tracks()[&1].samples(), &[10, 11, 12, 13]);
        assert_eq!(session.tracks()[&2].samples(), &[20, 21, 22]);
        assert_eq!(session.tracks()[&3].samples(), &[30]);
        assert_eq!(session.tracks()[&1].frames(), 2);
    }

    #[test]
    fn stop_transition_fires_exactly_once() {
        let mut session = Session::new(descriptor(), Duration::from_secs(60));
        assert!(session.mark_stopped());
        assert!(!session.mark_stopped());
        assert_eq!(session.status(), SessionStatus::Stopped);
    }

    #[test]
    fn track_duration_counts_interleaved_stereo_samples() {
        let mut track = SpeakerTrack::default();
        // one second of stereo 48kHz audio
        track.push_frame(&vec![0; DISCORD_SAMPLES_PER_SECOND * DISCORD_AUDIO_CHANNELS]);
        assert_eq!(track.duration(), Duration::from_secs(1));
    }
}
