use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;

/// Runtime configuration, sourced from the environment.
///
/// Only `DISCORD_TOKEN` is required; everything else has a default
/// suitable for a single-machine setup with whisper models under
/// `models/` and ollama on its standard local port.
#[derive(Clone, Debug)]
pub struct Config {
    pub discord_token: String,
    pub command_prefix: String,
    pub whisper_model: String,
    pub whisper_model_dir: PathBuf,
    pub whisper_language: String,
    pub ollama_model: String,
    pub ollama_host: String,
    pub summary_language: String,
    pub max_recording_duration: Duration,
    pub auto_delete_recordings: bool,
    pub recordings_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any string-keyed lookup.  The environment in
    /// production; a closure over a map in tests.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let discord_token = lookup("DISCORD_TOKEN")
            .filter(|token| !token.is_empty())
            .ok_or_else(|| Error::Config("DISCORD_TOKEN is required".to_string()))?;

        let max_recording_duration = Duration::from_secs(parse_number(
            "MAX_RECORDING_DURATION_SECONDS",
            lookup("MAX_RECORDING_DURATION_SECONDS"),
            3600,
        )?);

        Ok(Self {
            discord_token,
            command_prefix: lookup("COMMAND_PREFIX").unwrap_or_else(|| "!".to_string()),
            whisper_model: lookup("WHISPER_MODEL").unwrap_or_else(|| "large-v3".to_string()),
            whisper_model_dir: PathBuf::from(
                lookup("WHISPER_MODEL_DIR").unwrap_or_else(|| "models".to_string()),
            ),
            whisper_language: lookup("WHISPER_LANGUAGE").unwrap_or_else(|| "ja".to_string()),
            ollama_model: lookup("OLLAMA_MODEL").unwrap_or_else(|| "llama3.2:8b".to_string()),
            ollama_host: lookup("OLLAMA_HOST")
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            summary_language: lookup("SUMMARY_LANGUAGE").unwrap_or_else(|| "ja".to_string()),
            max_recording_duration,
            auto_delete_recordings: parse_bool(
                "AUTO_DELETE_RECORDINGS",
                lookup("AUTO_DELETE_RECORDINGS"),
                true,
            )?,
            recordings_dir: PathBuf::from(
                lookup("RECORDINGS_DIR").unwrap_or_else(|| "recordings".to_string()),
            ),
        })
    }

    /// Path to the ggml model file for the configured whisper model.
    pub fn whisper_model_path(&self) -> PathBuf {
        self.whisper_model_dir
            .join(format!("ggml-{}.bin", self.whisper_model))
    }
}

fn parse_number(key: &str, value: Option<String>, default: u64) -> Result<u64, Error> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| Error::Config(format!("{} must be a number, got {:?}", key, raw))),
    }
}

fn parse_bool(key: &str, value: Option<String>, default: bool) -> Result<bool, Error> {
    match value.as_deref() {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(Error::Config(format!(
                "{} must be true or false, got {:?}",
                key, raw
            ))),
        },
    }
}
