use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tracing::info;

use crate::error::Error;
use crate::model::types::{ChannelId, DiscordAudioSample, GuildId, UserId};
use crate::recorder::artifacts::{flush_session, SessionArtifacts};
use crate::recorder::session::{Session, SessionDescriptor, SessionStatus};

/// What happened to one ingested frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IngestOutcome {
    Accepted,
    /// No live session for this channel; the frame was dropped.
    NotRecording,
    /// This frame pushed the session over its duration limit.  The
    /// session has transitioned to stopped, the frame was rejected, and
    /// the caller should now drive the normal stop path.  Returned at
    /// most once per session.
    AutoStopped,
}

/// Process-wide map from voice channel to its active session.
///
/// Created empty at startup; entries are inserted by `start` and
/// removed by `stop`/`discard`.  Frame ingestion happens on the voice
/// driver's tasks while commands arrive from the gateway, so every
/// access goes through the mutex; appends are cheap enough that one
/// lock over the map is fine.  Flushing to disk happens after the
/// session is removed, outside the lock, so a slow disk never blocks
/// another channel's ingestion.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<ChannelId, Session>>,
    recordings_dir: PathBuf,
    max_duration: Duration,
}

#[derive(Clone, Copy, Debug)]
pub struct SessionReport {
    pub status: SessionStatus,
    pub elapsed: Duration,
    pub speaker_count: usize,
}

impl SessionRegistry {
    pub fn new(recordings_dir: PathBuf, max_duration: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            recordings_dir,
            max_duration,
        }
    }

    /// Begin recording a voice channel.  One session per guild: the
    /// voice driver keeps a single call per guild, so a second channel
    /// would receive the same packet stream.  Rejected while any
    /// session for the guild exists, including one stopped but not yet
    /// flushed.
    pub fn start(&self, descriptor: SessionDescriptor) -> Result<(), Error> {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(existing) = sessions
            .values()
            .find(|session| session.descriptor.guild_id == descriptor.guild_id)
        {
            return Err(Error::AlreadyRecording(
                existing.descriptor.voice_channel_id,
            ));
        }
        info!(
            voice_channel_id = descriptor.voice_channel_id,
            guild_id = descriptor.guild_id,
            "recording started"
        );
        sessions.insert(
            descriptor.voice_channel_id,
            Session::new(descriptor, self.max_duration),
        );
        Ok(())
    }

    /// Append one decoded frame to the speaker's track.  Never fails;
    /// frames for channels that are not recording are dropped.
    pub fn ingest(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
        frame: &[DiscordAudioSample],
    ) -> IngestOutcome {
        let mut sessions = self.sessions.lock().unwrap();
        let Some(session) = sessions.get_mut(&channel_id) else {
            return IngestOutcome::NotRecording;
        };
        if session.status() != SessionStatus::Recording {
            return IngestOutcome::NotRecording;
        }
        if session.over_duration_limit() {
            // mark_stopped is the checked transition; it can only
            // succeed once, so only one frame ever reports AutoStopped.
            if session.mark_stopped() {
                info!(channel_id, "recording hit max duration, auto-stopping");
                return IngestOutcome::AutoStopped;
            }
            return IngestOutcome::NotRecording;
        }
        session.append_frame(user_id, frame);
        IngestOutcome::Accepted
    }

    /// Stop the channel's session and flush every non-empty speaker
    /// track to a WAV artifact.  Removing the map entry under the lock
    /// is the check-and-set that guards against a double flush when an
    /// explicit stop races the auto-stop path.
    pub fn stop(&self, channel_id: ChannelId) -> Result<SessionArtifacts, Error> {
        let session = {
            let mut sessions = self.sessions.lock().unwrap();
            sessions
                .remove(&channel_id)
                .ok_or(Error::NotRecording(channel_id))?
        };
        info!(
            channel_id,
            elapsed_secs = session.elapsed().as_secs(),
            speakers = session.speaker_count(),
            "recording stopped, flushing tracks"
        );
        flush_session(session, &self.recordings_dir)
    }

    /// Drop the channel's session without flushing anything.
    pub fn discard(&self, channel_id: ChannelId) -> Result<(), Error> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions
            .remove(&channel_id)
            .map(|_| info!(channel_id, "recording discarded"))
            .ok_or(Error::NotRecording(channel_id))
    }

    pub fn descriptor(&self, channel_id: ChannelId) -> Option<SessionDescriptor> {
        let sessions = self.sessions.lock().unwrap();
        sessions.get(&channel_id).map(|session| session.descriptor)
    }

    pub fn report(&self, channel_id: ChannelId) -> Option<SessionReport> {
        let sessions = self.sessions.lock().unwrap();
        sessions.get(&channel_id).map(|session| SessionReport {
            status: session.status(),
            elapsed: session.elapsed(),
            speaker_count: session.speaker_count(),
        })
    }

    /// The voice channel this guild is currently recording, if any.
    /// Commands like `stop` arrive without a channel argument.
    pub fn active_channel_for_guild(&self, guild_id: GuildId) -> Option<ChannelId> {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .values()
            .find(|session| session.descriptor.guild_id == guild_id)
            .map(|session| session.descriptor.voice_channel_id)
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}
