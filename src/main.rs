use std::sync::Arc;

use anyhow::Context as _;
use serenity::client::Client;
use serenity::model::gateway::GatewayIntents;
use songbird::driver::DecodeMode;
use songbird::{SerenityInit, Songbird};
use tokio::sync::mpsc::unbounded_channel;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use minutary::bot::commands::{spawn_auto_stop_task, BotState, Handler};
use minutary::engine::ollama::OllamaClient;
use minutary::engine::whisper::WhisperEngine;
use minutary::recorder::registry::SessionRegistry;
use minutary::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("configuration error")?;

    let summarizer = Arc::new(OllamaClient::new(&config));
    if let Err(error) = summarizer.ensure_available().await {
        // transcription still works without a summarizer; every stop
        // will report the summary failure to the channel instead
        warn!(%error, "summaries will be unavailable");
    }

    let speech = Arc::new(WhisperEngine::load(&config).context("whisper engine")?);

    let registry = Arc::new(SessionRegistry::new(
        config.recordings_dir.clone(),
        config.max_recording_duration,
    ));

    // voice packets must arrive as decoded PCM, not opus frames
    let mut voice_config = songbird::Config::default();
    voice_config.decode_mode = DecodeMode::Decode;
    let songbird = Songbird::serenity();
    songbird.set_config(voice_config);

    let (auto_stop_sender, auto_stop_receiver) = unbounded_channel();
    let state = Arc::new(BotState {
        config: config.clone(),
        registry,
        speech,
        summarizer,
        songbird: songbird.clone(),
        auto_stop_sender,
    });

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::MESSAGE_CONTENT;
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(Handler {
            state: state.clone(),
        })
        .register_songbird_with(songbird)
        .await
        .context("failed to build discord client")?;

    let shutdown_token = CancellationToken::new();
    let auto_stop_task = spawn_auto_stop_task(
        state,
        client.cache_and_http.http.clone(),
        auto_stop_receiver,
        shutdown_token.clone(),
    );

    info!("starting gateway connection");
    tokio::select! {
        result = client.start() => {
            if let Err(error) = result {
                error!(%error, "gateway connection ended");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    shutdown_token.cancel();
    let _ = auto_stop_task.await;
    Ok(())
}
