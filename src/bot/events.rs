use serenity::{async_trait, model::id::GuildId};
use songbird::{Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, error, info, warn};

use crate::audio::transport::TransportEvents;

/// Handler para el final de un track (natural o por error del stream)
pub struct TrackEndNotifier {
    pub guild_id: GuildId,
    pub generation: u64,
    /// Compartido entre los handlers de un mismo track; se marca cuando el
    /// track se corta a propósito o cuando ya se avisó su final
    pub settled: Arc<AtomicBool>,
    pub events: TransportEvents,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        if self.settled.swap(true, Ordering::AcqRel) {
            debug!("Final de track ya atendido en guild {}", self.guild_id);
            return None;
        }

        if let EventContext::Track(track_list) = ctx {
            for (state, _handle) in *track_list {
                if let songbird::tracks::PlayMode::Errored(e) = &state.playing {
                    error!("❌ Error en track para guild {}: {:?}", self.guild_id, e);
                }
            }
        }

        info!("🎵 Track terminó en guild {}", self.guild_id);
        self.events.track_ended(self.generation);

        Some(VoiceEvent::Cancel)
    }
}

/// Handler para la caída del driver de voz
pub struct DisconnectNotifier {
    pub guild_id: GuildId,
    pub events: TransportEvents,
}

#[async_trait]
impl VoiceEventHandler for DisconnectNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        if let EventContext::DriverDisconnect(data) = ctx {
            warn!(
                "🔌 Conexión de voz perdida en guild {}: {:?}",
                self.guild_id, data.reason
            );
            self.events.dropped();
        }

        None
    }
}
