use crate::model::types::{ChannelId, UserId};

/// Everything that can go wrong between the start command and the
/// published summary.  None of these are allowed to take down the
/// process; the command layer renders them into channel messages.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("already recording in voice channel {0}; stop the current session first")]
    AlreadyRecording(ChannelId),

    #[error("no active recording in voice channel {0}")]
    NotRecording(ChannelId),

    #[error("transcription failed for speaker {user_id}: {reason}")]
    TranscriptionFailed { user_id: UserId, reason: String },

    #[error("summarization failed: {0}")]
    SummarizationFailed(String),

    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("audio artifact error: {0}")]
    Audio(#[from] hound::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the session's audio artifacts should be kept around
    /// for a retry instead of being deleted.
    pub fn retains_artifacts(&self) -> bool {
        matches!(self, Error::EngineUnavailable(_))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn user_facing_messages_name_the_channel() {
        let msg = Error::AlreadyRecording(42).to_string();
        assert!(msg.contains("42"));
        let msg = Error::NotRecording(7).to_string();
        assert!(msg.contains("7"));
    }

    #[test]
    fn engine_unavailable_retains_artifacts() {
        assert!(Error::EngineUnavailable("ollama".into()).retains_artifacts());
        assert!(!Error::SummarizationFailed("timeout".into()).retains_artifacts());
    }
}
