pub type ChannelId = u64;
pub type GuildId = u64;
pub type UserId = u64;

/// RTP source identifier; assigned by Discord when a user starts speaking.
pub type Ssrc = u32;

/// One decoded 48kHz stereo PCM sample, as delivered by the voice driver.
pub type DiscordAudioSample = i16;

/// One 16kHz mono sample in the form whisper wants.
pub type WhisperAudioSample = f32;
