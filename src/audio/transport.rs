//! Voice transport seam.
//!
//! A [`VoiceTransport`] hands out one [`VoiceConnection`] per voice
//! endpoint. The connection streams a resolved track's audio and reports
//! what happens to it asynchronously through [`TransportEvents`]; the
//! owning session turns those reports into state transitions.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use tokio::sync::mpsc;
use tracing::trace;

use crate::{
    audio::track::{ResolvedTrack, Volume},
    error::{ConnectError, TransportError},
};

/// Canal de voz destino
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceEndpoint {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
}

/// Lo que el transporte reporta de vuelta a la sesión
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// El track iniciado con esta generación terminó solo
    TrackEnded { generation: u64 },
    /// La conexión con este id se cayó
    Dropped { connection: u64 },
}

/// Emisor de eventos entregado a cada conexión.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    tx: mpsc::UnboundedSender<TransportEvent>,
    connection: u64,
}

impl TransportEvents {
    pub fn new(tx: mpsc::UnboundedSender<TransportEvent>, connection: u64) -> Self {
        Self { tx, connection }
    }

    pub fn track_ended(&self, generation: u64) {
        self.send(TransportEvent::TrackEnded { generation });
    }

    pub fn dropped(&self) {
        self.send(TransportEvent::Dropped {
            connection: self.connection,
        });
    }

    fn send(&self, event: TransportEvent) {
        // la sesión ya no existe: nadie escucha
        if self.tx.send(event).is_err() {
            trace!("evento de transporte descartado: {:?}", event);
        }
    }
}

#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn connect(
        &self,
        endpoint: VoiceEndpoint,
        events: TransportEvents,
    ) -> Result<Box<dyn VoiceConnection>, ConnectError>;
}

#[async_trait]
pub trait VoiceConnection: Send + Sync {
    fn endpoint(&self) -> VoiceEndpoint;

    /// Empieza a emitir el audio del track, reemplazando al anterior.
    ///
    /// Retorna en cuanto el stream arrancó; el final natural llega como
    /// [`TransportEvent::TrackEnded`] con la misma `generation`.
    async fn play(
        &mut self,
        track: &ResolvedTrack,
        volume: Volume,
        generation: u64,
    ) -> Result<(), TransportError>;

    fn set_paused(&mut self, paused: bool) -> Result<(), TransportError>;

    fn set_volume(&mut self, volume: Volume) -> Result<(), TransportError>;

    /// Corta el track actual sin emitir `TrackEnded`.
    fn stop_track(&mut self);

    /// Libera la conexión. Idempotente.
    async fn close(&mut self);
}
