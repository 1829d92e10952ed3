use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serenity::async_trait;
use serenity::client::{Context, EventHandler};
use serenity::http::Http;
use serenity::model::channel::Message;
use serenity::model::gateway::{Activity, Ready};
use serenity::model::voice::VoiceState;
use songbird::Songbird;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bot::receiver::VoiceReceiver;
use crate::config::Config;
use crate::engine::ollama::OllamaClient;
use crate::engine::whisper::WhisperEngine;
use crate::error::Error;
use crate::model::transcript::TranscriptSegment;
use crate::model::types::{ChannelId, UserId};
use crate::pipeline;
use crate::publish::send_long_message;
use crate::recorder::artifacts::SessionArtifacts;
use crate::recorder::registry::SessionRegistry;
use crate::recorder::session::SessionDescriptor;

/// Everything the command surface needs, shared between the gateway
/// event handler and the auto-stop listener.
pub struct BotState {
    pub config: Config,
    pub registry: Arc<SessionRegistry>,
    pub speech: Arc<WhisperEngine>,
    pub summarizer: Arc<OllamaClient>,
    pub songbird: Arc<Songbird>,
    pub auto_stop_sender: UnboundedSender<SessionDescriptor>,
}

pub struct Handler {
    pub state: Arc<BotState>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(
            user = %ready.user.name,
            guilds = ready.guilds.len(),
            "connected to discord"
        );
        let prefix = &self.state.config.command_prefix;
        ctx.set_activity(Activity::listening(format!("{}commands", prefix)))
            .await;
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        // a recording stops once the last listener leaves the channel
        let Some(guild_id) = new.guild_id.or_else(|| old.as_ref().and_then(|s| s.guild_id))
        else {
            return;
        };
        let Some(active) = self.state.registry.active_channel_for_guild(guild_id.0) else {
            return;
        };
        let left_active = old.as_ref().and_then(|s| s.channel_id).map(|id| id.0) == Some(active)
            && new.channel_id.map(|id| id.0) != Some(active);
        if !left_active {
            return;
        }

        let bot_user_id = ctx.cache.current_user_id().0;
        let occupants: Vec<(UserId, bool)> = match ctx.cache.guild(guild_id) {
            Some(guild) => guild
                .voice_states
                .values()
                .filter(|state| state.channel_id.map(|id| id.0) == Some(active))
                .map(|state| {
                    let is_bot = ctx
                        .cache
                        .user(state.user_id)
                        .map_or(false, |user| user.bot);
                    (state.user_id.0, is_bot)
                })
                .collect(),
            None => return,
        };
        if !channel_is_unattended(occupants, bot_user_id) {
            return;
        }

        info!(voice_channel_id = active, "voice channel emptied, stopping recording");
        if let Some(descriptor) = self.state.registry.descriptor(active) {
            let _ = send_long_message(
                &ctx.http,
                descriptor.text_channel_id,
                "👋 Everyone left the voice channel; stopping.",
            )
            .await;
        }
        if let Err(error) = finish_recording(&self.state, &ctx.http, active).await {
            if !is_stale_stop(&error) {
                error!(%error, "empty-channel stop failed");
            }
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(rest) = msg.content.strip_prefix(&self.state.config.command_prefix) else {
            return;
        };
        let command = rest.trim().to_ascii_lowercase();

        let result = match command.as_str() {
            "record" | "rec" => self.cmd_record(&ctx, &msg).await,
            "stop" => self.cmd_stop(&ctx, &msg).await,
            "cancel" => self.cmd_cancel(&ctx, &msg).await,
            "status" => self.cmd_status(&ctx, &msg).await,
            "check" => self.cmd_check(&ctx, &msg).await,
            "commands" => self.cmd_commands(&ctx, &msg).await,
            _ => return,
        };

        // no command is allowed to take the process down; everything
        // surfaces as a message in the originating channel
        if let Err(error) = result {
            error!(%error, command, "command failed");
            let _ = msg
                .channel_id
                .say(&ctx.http, format!("❌ {}", error))
                .await;
        }
    }
}

impl Handler {
    async fn cmd_record(&self, ctx: &Context, msg: &Message) -> anyhow::Result<()> {
        let Some(guild) = msg.guild(&ctx.cache) else {
            msg.channel_id
                .say(&ctx.http, "❌ This command only works in a server.")
                .await?;
            return Ok(());
        };
        let voice_channel = guild
            .voice_states
            .get(&msg.author.id)
            .and_then(|state| state.channel_id);
        let Some(voice_channel) = voice_channel else {
            msg.channel_id
                .say(&ctx.http, "❌ Join a voice channel first, then try again.")
                .await?;
            return Ok(());
        };

        let descriptor = SessionDescriptor {
            voice_channel_id: voice_channel.0,
            guild_id: guild.id.0,
            text_channel_id: msg.channel_id.0,
        };
        if let Err(error) = self.state.registry.start(descriptor) {
            msg.channel_id
                .say(&ctx.http, format!("⚠️ {}", error))
                .await?;
            return Ok(());
        }

        let (call, join_result) = self.state.songbird.join(guild.id, voice_channel).await;
        if let Err(error) = join_result {
            // roll back so the channel isn't stuck "recording"
            let _ = self.state.registry.discard(descriptor.voice_channel_id);
            msg.channel_id
                .say(&ctx.http, format!("❌ Failed to join voice: {}", error))
                .await?;
            return Ok(());
        }
        {
            let mut call = call.lock().await;
            VoiceReceiver::register(
                &mut call,
                descriptor,
                self.state.registry.clone(),
                self.state.auto_stop_sender.clone(),
            );
        }

        msg.channel_id
            .say(
                &ctx.http,
                format!(
                    "🎙️ **Recording started** in <#{}>.\nUse `{}stop` to finish, `{}cancel` to discard.",
                    voice_channel.0, self.state.config.command_prefix, self.state.config.command_prefix
                ),
            )
            .await?;
        Ok(())
    }

    async fn cmd_stop(&self, ctx: &Context, msg: &Message) -> anyhow::Result<()> {
        let Some(voice_channel) = self.active_channel(msg) else {
            msg.channel_id
                .say(&ctx.http, "❌ Not currently recording here.")
                .await?;
            return Ok(());
        };

        if let Some(report) = self.state.registry.report(voice_channel) {
            msg.channel_id
                .say(
                    &ctx.http,
                    format!(
                        "⏹️ Stopping the recording ({})...",
                        format_elapsed(report.elapsed)
                    ),
                )
                .await?;
        }
        finish_recording(&self.state, &ctx.http, voice_channel).await
    }

    async fn cmd_cancel(&self, ctx: &Context, msg: &Message) -> anyhow::Result<()> {
        let Some(voice_channel) = self.active_channel(msg) else {
            msg.channel_id
                .say(&ctx.http, "❌ Not currently recording here.")
                .await?;
            return Ok(());
        };

        self.state.registry.discard(voice_channel)?;
        leave_voice(&self.state, voice_channel, msg.guild_id.map(|id| id.0)).await;
        msg.channel_id
            .say(&ctx.http, "🚫 Recording cancelled; nothing was processed.")
            .await?;
        Ok(())
    }

    async fn cmd_status(&self, ctx: &Context, msg: &Message) -> anyhow::Result<()> {
        let report = self
            .active_channel(msg)
            .and_then(|channel| self.state.registry.report(channel));
        let reply = match report {
            Some(report) => format!(
                "📊 **Recording** for {}, {} speaker(s) so far.",
                format_elapsed(report.elapsed),
                report.speaker_count
            ),
            None => "📊 Not currently recording.".to_string(),
        };
        msg.channel_id.say(&ctx.http, reply).await?;
        Ok(())
    }

    async fn cmd_check(&self, ctx: &Context, msg: &Message) -> anyhow::Result<()> {
        let ollama_line = match self.state.summarizer.health_check().await {
            Ok(()) => format!(
                "✅ Ollama: model `{}` is available",
                self.state.summarizer.model()
            ),
            Err(error) => format!("❌ Ollama: {}", error),
        };
        let reply = format!(
            "🔧 **System status**\n{}\n✅ Whisper: model `{}`\nActive recordings: {}",
            ollama_line,
            self.state.speech.model_name(),
            self.state.registry.active_session_count(),
        );
        msg.channel_id.say(&ctx.http, reply).await?;
        Ok(())
    }

    async fn cmd_commands(&self, ctx: &Context, msg: &Message) -> anyhow::Result<()> {
        let prefix = &self.state.config.command_prefix;
        let reply = format!(
            "📖 **Commands**\n\
             `{p}record` — start recording your voice channel\n\
             `{p}stop` — stop, transcribe, and summarize\n\
             `{p}cancel` — discard the recording without processing\n\
             `{p}status` — show the current recording state\n\
             `{p}check` — check the transcription and summary engines\n\
             `{p}commands` — this help",
            p = prefix
        );
        msg.channel_id.say(&ctx.http, reply).await?;
        Ok(())
    }

    fn active_channel(&self, msg: &Message) -> Option<ChannelId> {
        msg.guild_id
            .and_then(|guild_id| self.state.registry.active_channel_for_guild(guild_id.0))
    }
}

/// The shared stop path: flush, transcribe, merge, summarize, publish,
/// then apply the artifact deletion policy.  Both the explicit `stop`
/// command and the duration auto-stop end up here.
pub async fn finish_recording(
    state: &BotState,
    http: &Http,
    voice_channel_id: ChannelId,
) -> anyhow::Result<()> {
    let artifacts = state.registry.stop(voice_channel_id)?;
    let text_channel = artifacts.descriptor.text_channel_id;

    leave_voice(state, voice_channel_id, Some(artifacts.descriptor.guild_id)).await;

    if artifacts.speakers.is_empty() {
        send_long_message(http, text_channel, "⚠️ No audio was captured; nothing to transcribe.")
            .await?;
        artifacts.delete();
        return Ok(());
    }

    send_long_message(
        http,
        text_channel,
        "🔄 Processing the recording; this may take a while...",
    )
    .await?;

    let labels = resolve_labels(http, &artifacts).await;
    let report = pipeline::run(
        &artifacts,
        &labels,
        state.speech.clone(),
        state.summarizer.clone(),
    )
    .await;

    for failure in &report.failures {
        send_long_message(http, text_channel, &format!("⚠️ {}", failure)).await?;
    }
    for notice in speaker_notices(&report.segments, &labels) {
        send_long_message(http, text_channel, &notice).await?;
    }

    match &report.transcript {
        Some(transcript) => {
            send_long_message(http, text_channel, &format!("## 📝 Transcript\n{}", transcript))
                .await?;
            match &report.summary {
                Some(Ok(summary)) => {
                    send_long_message(http, text_channel, &format!("## 📋 Summary\n\n{}", summary))
                        .await?;
                }
                Some(Err(error)) => {
                    send_long_message(http, text_channel, &format!("⚠️ {}", error)).await?;
                }
                None => {}
            }
            // the transcript is delivered; artifacts are now disposable
            if should_delete_artifacts(&report, state.config.auto_delete_recordings) {
                artifacts.delete();
            }
        }
        None if report.total_transcription_failure() => {
            // nothing derived from the audio reached the user; keep the
            // recordings so a retry is possible
            send_long_message(
                http,
                text_channel,
                "❌ Transcription failed for every speaker; recordings were kept for a retry.",
            )
            .await?;
        }
        None => {
            send_long_message(
                http,
                text_channel,
                "⚠️ The transcript came back empty; nothing to summarize.",
            )
            .await?;
        }
    }

    send_long_message(http, text_channel, "✅ Done.").await?;
    Ok(())
}

/// Listens for sessions that hit their duration limit and drives them
/// through the same stop path as an explicit command.
pub fn spawn_auto_stop_task(
    state: Arc<BotState>,
    http: Arc<Http>,
    mut auto_stop_receiver: UnboundedReceiver<SessionDescriptor>,
    shutdown_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => break,
                descriptor = auto_stop_receiver.recv() => {
                    let Some(descriptor) = descriptor else { break };
                    if state.registry.descriptor(descriptor.voice_channel_id).is_none() {
                        // an explicit stop already handled this session
                        continue;
                    }
                    let _ = send_long_message(
                        &http,
                        descriptor.text_channel_id,
                        "⏱️ Maximum recording duration reached; stopping.",
                    )
                    .await;
                    if let Err(error) =
                        finish_recording(&state, &http, descriptor.voice_channel_id).await
                    {
                        // an explicit stop may have won the race and
                        // already removed the session
                        if is_stale_stop(&error) {
                            debug!(
                                voice_channel_id = descriptor.voice_channel_id,
                                "session already stopped"
                            );
                        } else {
                            error!(%error, "auto-stop pipeline failed");
                            let _ = send_long_message(
                                &http,
                                descriptor.text_channel_id,
                                &format!("❌ {}", error),
                            )
                            .await;
                        }
                    }
                }
            }
        }
    })
}

async fn leave_voice(state: &BotState, voice_channel_id: ChannelId, guild_id: Option<u64>) {
    let Some(guild_id) = guild_id else { return };
    if let Err(error) = state
        .songbird
        .remove(songbird::id::GuildId::from(guild_id))
        .await
    {
        debug!(%error, voice_channel_id, "not connected to voice on leave");
    }
}

async fn resolve_labels(http: &Http, artifacts: &SessionArtifacts) -> HashMap<UserId, String> {
    let guild_id = artifacts.descriptor.guild_id;
    let mut labels = HashMap::new();
    for speaker in &artifacts.speakers {
        // prefer the server nickname over the global username
        let label = match http.get_member(guild_id, speaker.user_id).await {
            Ok(member) => Some(speaker_label(member.nick, member.user.name)),
            Err(_) => match http.get_user(speaker.user_id).await {
                Ok(user) => Some(user.name),
                Err(error) => {
                    warn!(user_id = speaker.user_id, %error, "could not resolve speaker name");
                    None
                }
            },
        };
        if let Some(label) = label {
            labels.insert(speaker.user_id, label);
        }
    }
    labels
}

fn speaker_label(nick: Option<String>, username: String) -> String {
    nick.unwrap_or(username)
}

/// True when nobody but bots (ours included) remains in the channel.
fn channel_is_unattended(
    occupants: impl IntoIterator<Item = (UserId, bool)>,
    bot_user_id: UserId,
) -> bool {
    occupants
        .into_iter()
        .all(|(user_id, is_bot)| user_id == bot_user_id || is_bot)
}

/// The session was already gone when a deferred stop arrived; nothing
/// to report to the channel.
fn is_stale_stop(error: &anyhow::Error) -> bool {
    matches!(error.downcast_ref::<Error>(), Some(Error::NotRecording(_)))
}

const SPEAKER_PREVIEW_CHARS: usize = 500;

/// One progress line per speaker, in order of first appearance, with a
/// short preview of what they said.
fn speaker_notices(
    segments: &[TranscriptSegment],
    labels: &HashMap<UserId, String>,
) -> Vec<String> {
    let mut order: Vec<UserId> = Vec::new();
    let mut texts: HashMap<UserId, String> = HashMap::new();
    for segment in segments {
        let text = texts.entry(segment.user_id).or_insert_with(|| {
            order.push(segment.user_id);
            String::new()
        });
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(&segment.text);
    }

    order
        .into_iter()
        .map(|user_id| {
            let label = labels
                .get(&user_id)
                .cloned()
                .unwrap_or_else(|| format!("User_{}", user_id));
            let text = &texts[&user_id];
            let preview: String = text.chars().take(SPEAKER_PREVIEW_CHARS).collect();
            if text.chars().count() > SPEAKER_PREVIEW_CHARS {
                format!("🗣️ **{}**: {}...", label, preview)
            } else {
                format!("🗣️ **{}**: {}", label, preview)
            }
        })
        .collect()
}

/// Recordings are disposable only once a transcript has been delivered,
/// and only when the operator opted into deletion.  A failure that
/// retains artifacts (an engine outage) keeps them even then.
fn should_delete_artifacts(report: &pipeline::PipelineReport, auto_delete: bool) -> bool {
    auto_delete
        && report.transcript.is_some()
        && !report.failures.iter().any(Error::retains_artifacts)
}

fn format_elapsed(elapsed: Duration) -> String {
    let total_seconds = elapsed.as_secs();
    format!("{}m {:02}s", total_seconds / 60, total_seconds % 60)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pipeline::PipelineReport;

    fn report(transcript: Option<&str>) -> PipelineReport {
        PipelineReport {
            segments: Vec::new(),
            transcript: transcript.map(str::to_string),
            failures: Vec::new(),
            summary: None,
        }
    }

    #[test]
    fn artifacts_survive_when_auto_delete_is_off() {
        assert!(!should_delete_artifacts(&report(Some("text")), false));
        assert!(should_delete_artifacts(&report(Some("text")), true));
    }

    #[test]
    fn artifacts_survive_without_a_transcript() {
        assert!(!should_delete_artifacts(&report(None), true));
    }

    #[test]
    fn engine_outage_retains_artifacts() {
        let mut outage = report(Some("text"));
        outage
            .failures
            .push(Error::EngineUnavailable("ollama down".to_string()));
        assert!(!should_delete_artifacts(&outage, true));
    }

    fn segment(user_id: UserId, start: u32, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            user_id,
            start_offset_ms: start,
            end_offset_ms: start + 1000,
            text: text.to_string(),
        }
    }

    #[test]
    fn speaker_notices_group_in_first_appearance_order() {
        let mut labels = HashMap::new();
        labels.insert(1, "Alice".to_string());
        let notices = speaker_notices(
            &[
                segment(1, 0, "hello"),
                segment(2, 2000, "hi"),
                segment(1, 4000, "bye"),
            ],
            &labels,
        );
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0], "🗣️ **Alice**: hello bye");
        assert_eq!(notices[1], "🗣️ **User_2**: hi");
    }

    #[test]
    fn speaker_notices_truncate_long_previews() {
        let long = "あ".repeat(SPEAKER_PREVIEW_CHARS + 50);
        let notices = speaker_notices(&[segment(1, 0, &long)], &HashMap::new());
        assert_eq!(notices.len(), 1);
        assert!(notices[0].ends_with("..."));
        let preview: String = "あ".repeat(SPEAKER_PREVIEW_CHARS);
        assert!(notices[0].contains(&preview));
        assert!(!notices[0].contains(&long));
    }

    #[test]
    fn speaker_label_prefers_the_server_nick() {
        assert_eq!(
            speaker_label(Some("nick".to_string()), "name".to_string()),
            "nick"
        );
        assert_eq!(speaker_label(None, "name".to_string()), "name");
    }

    #[test]
    fn unattended_channel_detection_ignores_bots() {
        let bot = 99;
        assert!(channel_is_unattended(vec![], bot));
        assert!(channel_is_unattended(vec![(bot, true)], bot));
        assert!(channel_is_unattended(vec![(bot, true), (50, true)], bot));
        assert!(!channel_is_unattended(vec![(bot, true), (7, false)], bot));
    }

    #[test]
    fn stale_stop_errors_are_recognized() {
        let stale = anyhow::Error::from(Error::NotRecording(5));
        assert!(is_stale_stop(&stale));
        let other = anyhow::Error::from(Error::SummarizationFailed("x".to_string()));
        assert!(!is_stale_stop(&other));
    }

    #[test]
    fn elapsed_formatting() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "0m 00s");
        assert_eq!(format_elapsed(Duration::from_secs(59)), "0m 59s");
        assert_eq!(format_elapsed(Duration::from_secs(61)), "1m 01s");
        assert_eq!(format_elapsed(Duration::from_secs(3600)), "60m 00s");
    }
}
