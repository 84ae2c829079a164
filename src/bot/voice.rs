//! Songbird-backed implementation of the voice transport seam.
//!
//! Each [`SongbirdConnection`] owns one songbird `Call`. Audio comes
//! straight from the resolved stream URL through songbird's HTTP input, and
//! the end of every track is reported back tagged with the generation the
//! session handed to [`VoiceConnection::play`].
//!
//! Songbird keeps a single `Call` per guild, so a connection only leaves the
//! channel while it still holds the guild's lease; a stale connection that
//! gets closed after a newer one joined leaves the call alone.

use async_trait::async_trait;
use dashmap::DashMap;
use serenity::model::id::GuildId;
use songbird::{
    error::ControlError,
    events::CoreEvent,
    input::HttpRequest,
    tracks::TrackHandle,
    Call, Event as VoiceEvent, Songbird, TrackEvent,
};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::events::{DisconnectNotifier, TrackEndNotifier};
use crate::{
    audio::{
        track::{ResolvedTrack, Volume},
        transport::{TransportEvents, VoiceConnection, VoiceEndpoint, VoiceTransport},
    },
    error::{ConnectError, TransportError},
};

/// Transporte de voz sobre songbird
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    /// Conexión dueña del `Call` de cada guild
    leases: Arc<DashMap<GuildId, u64>>,
    next_lease: AtomicU64,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>, http: reqwest::Client) -> Self {
        Self {
            manager,
            http,
            leases: Arc::new(DashMap::new()),
            next_lease: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn connect(
        &self,
        endpoint: VoiceEndpoint,
        events: TransportEvents,
    ) -> Result<Box<dyn VoiceConnection>, ConnectError> {
        let call = self
            .manager
            .join(endpoint.guild_id, endpoint.channel_id)
            .await
            .map_err(|e| ConnectError::Join(e.to_string()))?;

        let lease = self.next_lease.fetch_add(1, Ordering::Relaxed);
        self.leases.insert(endpoint.guild_id, lease);

        {
            let mut handler = call.lock().await;
            // Handlers de una conexión anterior en la misma guild
            handler.remove_all_global_events();
            handler.add_global_event(
                VoiceEvent::Core(CoreEvent::DriverDisconnect),
                DisconnectNotifier {
                    guild_id: endpoint.guild_id,
                    events: events.clone(),
                },
            );
        }

        info!(
            "🔊 Conectado al canal de voz {} en guild {}",
            endpoint.channel_id, endpoint.guild_id
        );

        Ok(Box::new(SongbirdConnection {
            manager: self.manager.clone(),
            leases: self.leases.clone(),
            lease,
            call,
            endpoint,
            http: self.http.clone(),
            events,
            current: None,
            closed: false,
        }))
    }
}

/// Track en curso y su marca de final ya atendido
struct ActiveTrack {
    handle: TrackHandle,
    settled: Arc<AtomicBool>,
}

impl ActiveTrack {
    fn cut(self) {
        self.settled.store(true, Ordering::Release);
        if let Err(e) = self.handle.stop() {
            debug!("Track ya detenido: {}", e);
        }
    }
}

pub struct SongbirdConnection {
    manager: Arc<Songbird>,
    leases: Arc<DashMap<GuildId, u64>>,
    lease: u64,
    call: Arc<Mutex<Call>>,
    endpoint: VoiceEndpoint,
    http: reqwest::Client,
    events: TransportEvents,
    current: Option<ActiveTrack>,
    closed: bool,
}

impl SongbirdConnection {
    fn current(&self) -> Result<&ActiveTrack, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.current.as_ref().ok_or(TransportError::NoTrack)
    }

    /// Suelta el lease de la guild; `true` si todavía era nuestro.
    fn release_lease(&self) -> bool {
        let lease = self.lease;
        self.leases
            .remove_if(&self.endpoint.guild_id, |_, owner| *owner == lease)
            .is_some()
    }
}

/// Un track que terminó solo no es un fallo de la conexión: su final
/// llega como evento.
fn control_result(result: Result<(), ControlError>) -> Result<(), TransportError> {
    match result {
        Ok(()) | Err(ControlError::Finished) => Ok(()),
        Err(e) => Err(TransportError::Driver(e.to_string())),
    }
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    fn endpoint(&self) -> VoiceEndpoint {
        self.endpoint
    }

    async fn play(
        &mut self,
        track: &ResolvedTrack,
        volume: Volume,
        generation: u64,
    ) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if let Some(previous) = self.current.take() {
            previous.cut();
        }

        let input = HttpRequest::new(self.http.clone(), track.stream_url.clone());
        let handle = {
            let mut handler = self.call.lock().await;
            handler.play_input(input.into())
        };

        let settled = Arc::new(AtomicBool::new(false));
        self.current = Some(ActiveTrack {
            handle: handle.clone(),
            settled: settled.clone(),
        });

        control_result(handle.set_volume(volume.as_gain()))?;
        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    VoiceEvent::Track(event),
                    TrackEndNotifier {
                        guild_id: self.endpoint.guild_id,
                        generation,
                        settled: settled.clone(),
                        events: self.events.clone(),
                    },
                )
                .map_err(|e| TransportError::Driver(e.to_string()))?;
        }

        debug!(
            "▶️ Stream iniciado en guild {} (generación {})",
            self.endpoint.guild_id, generation
        );
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) -> Result<(), TransportError> {
        let track = self.current()?;
        if paused {
            control_result(track.handle.pause())
        } else {
            control_result(track.handle.play())
        }
    }

    fn set_volume(&mut self, volume: Volume) -> Result<(), TransportError> {
        let track = self.current()?;
        control_result(track.handle.set_volume(volume.as_gain()))
    }

    fn stop_track(&mut self) {
        if let Some(track) = self.current.take() {
            track.cut();
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stop_track();

        if !self.release_lease() {
            debug!(
                "Otra conexión tomó el canal en guild {}, no se sale",
                self.endpoint.guild_id
            );
            return;
        }

        self.call.lock().await.remove_all_global_events();
        if let Err(e) = self.manager.remove(self.endpoint.guild_id).await {
            warn!(
                "Error al salir del canal de voz en guild {}: {:?}",
                self.endpoint.guild_id, e
            );
        } else {
            info!("👋 Desconectado de guild {}", self.endpoint.guild_id);
        }
    }
}

impl Drop for SongbirdConnection {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.stop_track();
        if !self.release_lease() {
            return;
        }

        // Una conexión soltada sin cerrar no debe dejar al bot en el canal
        let manager = self.manager.clone();
        let guild_id = self.endpoint.guild_id;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(e) = manager.remove(guild_id).await {
                    debug!("Conexión ya liberada en guild {}: {:?}", guild_id, e);
                }
            });
        }
    }
}
