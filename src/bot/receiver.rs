use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use songbird::model::payload::Speaking;
use songbird::{Call, CoreEvent, Event, EventContext, EventHandler as VoiceEventHandler};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::model::types::{DiscordAudioSample, Ssrc, UserId};
use crate::recorder::registry::{IngestOutcome, SessionRegistry};
use crate::recorder::session::SessionDescriptor;

/// Receives decoded voice packets for one call and feeds them into the
/// session registry.
///
/// Users are assigned an SSRC when they start speaking; the speaking
/// state update is where we learn the mapping, and voice packets only
/// carry the SSRC.  An SSRC seen before its mapping arrives is dropped.
pub struct VoiceReceiver {
    descriptor: SessionDescriptor,
    ssrc_to_user_id: RwLock<HashMap<Ssrc, UserId>>,
    registry: Arc<SessionRegistry>,
    auto_stop_sender: UnboundedSender<SessionDescriptor>,
}

impl VoiceReceiver {
    /// Attach a receiver to a call's voice events.
    pub fn register(
        call: &mut Call,
        descriptor: SessionDescriptor,
        registry: Arc<SessionRegistry>,
        auto_stop_sender: UnboundedSender<SessionDescriptor>,
    ) {
        let receiver = Arc::new(Self {
            descriptor,
            ssrc_to_user_id: RwLock::new(HashMap::new()),
            registry,
            auto_stop_sender,
        });
        call.add_global_event(
            CoreEvent::SpeakingStateUpdate.into(),
            ReceiverHandle(receiver.clone()),
        );
        call.add_global_event(CoreEvent::VoicePacket.into(), ReceiverHandle(receiver));
    }

    fn on_speaking_state(&self, speaking: &Speaking) {
        // only users speaking through a microphone get recorded;
        // screen-share audio is ignored
        if !speaking.speaking.microphone() {
            return;
        }
        if let Some(user_id) = speaking.user_id {
            self.ssrc_to_user_id
                .write()
                .unwrap()
                .insert(speaking.ssrc, user_id.0);
        } else {
            debug!(ssrc = speaking.ssrc, "speaking state update without a user id");
        }
    }

    fn on_voice_packet(&self, ssrc: Ssrc, audio: &[DiscordAudioSample]) {
        let Some(user_id) = self.user_id_from_ssrc(ssrc) else {
            return;
        };
        let outcome = self
            .registry
            .ingest(self.descriptor.voice_channel_id, user_id, audio);
        if outcome == IngestOutcome::AutoStopped {
            if let Err(error) = self.auto_stop_sender.send(self.descriptor) {
                warn!(%error, "auto-stop listener is gone");
            }
        }
    }

    fn user_id_from_ssrc(&self, ssrc: Ssrc) -> Option<UserId> {
        self.ssrc_to_user_id.read().unwrap().get(&ssrc).copied()
    }
}

struct ReceiverHandle(Arc<VoiceReceiver>);

#[async_trait]
impl VoiceEventHandler for ReceiverHandle {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        match ctx {
            EventContext::SpeakingStateUpdate(speaking) => {
                self.0.on_speaking_state(speaking);
            }
            EventContext::VoicePacket(data) => {
                // fires for every received packet, with the decoded PCM
                if let Some(audio) = data.audio.as_ref() {
                    self.0.on_voice_packet(data.packet.ssrc, audio);
                }
            }
            _ => {}
        }
        None
    }
}
