// Discord hands us 16-bit stereo PCM at 48kHz in 20ms packets.
// Whisper wants f32 mono at 16kHz.  The ratio between the two
// sample rates is a whole number, so we can decimate rather than
// resample.

pub const DISCORD_AUDIO_CHANNELS: usize = 2;
pub const DISCORD_SAMPLES_PER_SECOND: usize = 48000;

pub const WHISPER_SAMPLES_PER_SECOND: usize = 16000;

pub const BITRATE_CONVERSION_RATIO: usize =
    DISCORD_SAMPLES_PER_SECOND / WHISPER_SAMPLES_PER_SECOND;

/// Interleaved samples consumed per mono whisper sample produced.
pub const DOWNSAMPLE_GROUP_SIZE: usize = BITRATE_CONVERSION_RATIO * DISCORD_AUDIO_CHANNELS;

pub const WAV_BITS_PER_SAMPLE: u16 = 16;

/// Discord rejects messages over 2000 characters; leave headroom
/// for the speaker prefix added when publishing.
pub const DISCORD_MESSAGE_LIMIT: usize = 1900;

/// How long to wait between health-check polls while the LLM engine
/// is starting up, and how many polls to make before giving up.
pub const ENGINE_POLL_INTERVAL_MS: u64 = 500;
pub const ENGINE_POLL_ATTEMPTS: usize = 12;
