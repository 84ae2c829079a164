//! Process-wide map from guild to [`Session`].
//!
//! The registry is the only structure shared by every guild's control
//! path. It never holds a map guard across an `.await`: lookups clone the
//! `Arc<Session>` out and release the shard before the session is used.

use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tokio::{sync::broadcast, task::JoinHandle, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    audio::{
        command::{Command, CommandOutcome},
        session::{PlaybackContext, PlaybackState, Session, SessionNotice, SessionView},
        track::TrackRequest,
        transport::VoiceEndpoint,
    },
    error::SessionError,
};

pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<Session>>,
    ctx: PlaybackContext,
}

impl SessionRegistry {
    pub fn new(ctx: PlaybackContext) -> Self {
        Self {
            sessions: DashMap::new(),
            ctx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.ctx.subscribe()
    }

    /// Devuelve la sesión del guild, creándola si no existe.
    ///
    /// La creación ocurre con el shard del mapa bloqueado, así que dos
    /// llamadas simultáneas para el mismo guild obtienen la misma sesión.
    pub fn get_or_create(&self, guild_id: GuildId) -> Arc<Session> {
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| Session::new(guild_id, self.ctx.clone()))
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Result<Arc<Session>, SessionError> {
        self.sessions
            .get(&guild_id)
            .map(|session| session.clone())
            .ok_or(SessionError::NoActiveSession)
    }

    /// Foto del estado para `/queue` y `/nowplaying`
    pub fn view(&self, guild_id: GuildId) -> Option<SessionView> {
        self.sessions.get(&guild_id).map(|session| session.view())
    }

    pub fn contains(&self, guild_id: GuildId) -> bool {
        self.sessions.contains_key(&guild_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Copia de las sesiones vivas en este instante.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Ejecuta un comando sobre la sesión de `guild_id`.
    pub async fn execute(
        &self,
        guild_id: GuildId,
        command: Command,
    ) -> Result<CommandOutcome, SessionError> {
        debug!("Ejecutando {} en guild {}", command, guild_id);
        match command {
            Command::Play { request, endpoint } => self.play(guild_id, request, endpoint).await,
            Command::Skip => self.get(guild_id)?.skip().await,
            Command::Pause => self.get(guild_id)?.pause().await,
            Command::Resume => self.get(guild_id)?.resume().await,
            Command::Stop => self.get(guild_id)?.stop().await,
            Command::SetVolume(percent) => self.get(guild_id)?.set_volume(percent).await,
            Command::Leave => Ok(CommandOutcome::Left {
                disconnected: self.leave(guild_id).await,
            }),
        }
    }

    async fn play(
        &self,
        guild_id: GuildId,
        request: TrackRequest,
        endpoint: VoiceEndpoint,
    ) -> Result<CommandOutcome, SessionError> {
        loop {
            let session = self.get_or_create(guild_id);
            match session.play(request.clone(), endpoint).await {
                // un `leave` o el barrido la cerró mientras esperábamos el lock
                Err(SessionError::NoActiveSession) => {
                    debug!("Sesión cerrada en guild {}, creando otra", guild_id);
                    self.remove_if_same(&session);
                }
                result => return result,
            }
        }
    }

    /// Cierra la sesión y la saca del registro. Idempotente.
    ///
    /// Devuelve `true` si había algo sonando, en cola o conectado.
    pub async fn leave(&self, guild_id: GuildId) -> bool {
        let Some(session) = self.sessions.get(&guild_id).map(|entry| entry.clone()) else {
            return false;
        };
        let disconnected = session.close().await;
        self.remove_if_same(&session);
        disconnected
    }

    /// Cierra las sesiones que llevan `idle_timeout` sin actividad.
    pub async fn sweep_idle(&self, idle_timeout: Duration) -> usize {
        let mut expired = 0;
        for session in self.sessions() {
            let view = session.view();
            let candidate = view.state == PlaybackState::Idle
                && view.queue.is_empty()
                && view.last_activity.elapsed() >= idle_timeout;
            if candidate && session.try_expire(idle_timeout).await {
                self.remove_if_same(&session);
                expired += 1;
            }
        }
        expired
    }

    /// Cierra todas las sesiones, para el apagado del proceso.
    pub async fn shutdown(&self) {
        let sessions = self.sessions();
        for session in &sessions {
            session.close().await;
            self.remove_if_same(session);
        }
        info!("👋 {} sesiones cerradas", sessions.len());
    }

    /// Lanza el barrido periódico de sesiones inactivas.
    pub fn spawn_idle_sweeper(
        self: &Arc<Self>,
        idle_timeout: Duration,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let Some(registry) = registry.upgrade() else { break };

                let expired = registry.sweep_idle(idle_timeout).await;
                if expired > 0 {
                    info!("🧹 {} sesiones inactivas cerradas", expired);
                }
            }
            debug!("Barrido de sesiones inactivas detenido");
        })
    }

    fn remove_if_same(&self, session: &Arc<Session>) {
        self.sessions
            .remove_if(&session.guild_id(), |_, current| Arc::ptr_eq(current, session));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        mock::{MockResolver, MockTransport},
        session::SessionPolicy,
        track::{Provider, Requester},
    };
    use serenity::model::id::{ChannelId, UserId};

    const IDLE: Duration = Duration::from_secs(60);

    fn registry() -> SessionRegistry {
        registry_with(Arc::new(MockTransport::new()))
    }

    fn registry_with(transport: Arc<MockTransport>) -> SessionRegistry {
        SessionRegistry::new(PlaybackContext::new(
            Arc::new(MockResolver::new()),
            transport,
            SessionPolicy::default(),
        ))
    }

    fn play(query: &str) -> Command {
        Command::Play {
            request: TrackRequest::new(
                query,
                Provider::YouTube,
                Requester { id: UserId::new(1), name: "ana".into() },
            ),
            endpoint: VoiceEndpoint {
                guild_id: GuildId::new(1),
                channel_id: ChannelId::new(2),
            },
        }
    }

    #[tokio::test]
    async fn get_returns_no_active_session_for_unknown_guild() {
        let registry = registry();
        assert!(matches!(
            registry.get(GuildId::new(9)),
            Err(SessionError::NoActiveSession)
        ));
        assert!(matches!(
            registry.execute(GuildId::new(9), Command::Skip).await,
            Err(SessionError::NoActiveSession)
        ));
    }

    #[tokio::test]
    async fn get_or_create_reuses_the_session() {
        let registry = registry();
        let first = registry.get_or_create(GuildId::new(1));
        let second = registry.get_or_create(GuildId::new(1));
        let other = registry.get_or_create(GuildId::new(2));

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn leave_on_unknown_guild_is_not_an_error() {
        let registry = registry();
        let outcome = registry.execute(GuildId::new(4), Command::Leave).await;
        assert_eq!(outcome, Ok(CommandOutcome::Left { disconnected: false }));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_spares_recent_sessions() {
        let registry = registry();
        registry.get_or_create(GuildId::new(1));

        assert_eq!(registry.sweep_idle(Duration::from_secs(60)).await, 0);
        assert_eq!(registry.len(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(registry.sweep_idle(Duration::from_secs(60)).await, 1);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_spares_playing_sessions() {
        let registry = registry();
        let guild = GuildId::new(1);
        registry.execute(guild, play("a")).await.unwrap();

        tokio::time::advance(IDLE * 2).await;
        assert_eq!(registry.sweep_idle(IDLE).await, 0);

        let session = registry.get(guild).unwrap();
        assert!(!session.try_expire(IDLE).await);
        assert_eq!(session.state(), PlaybackState::Playing);
        assert!(registry.contains(guild));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_spares_idle_sessions_with_queued_tracks() {
        let transport = Arc::new(MockTransport::new());
        let registry = registry_with(transport.clone());
        let guild = GuildId::new(1);
        registry.execute(guild, play("a")).await.unwrap();
        registry.execute(guild, play("b")).await.unwrap();

        // la conexión se cae: queda Idle pero con `b` en cola
        let session = registry.get(guild).unwrap();
        session.on_transport_dropped(1).await;
        assert_eq!(session.state(), PlaybackState::Idle);
        assert_eq!(session.view().queue.len(), 1);

        tokio::time::advance(IDLE * 2).await;
        assert_eq!(registry.sweep_idle(IDLE).await, 0);
        assert!(!session.try_expire(IDLE).await);
        assert!(!session.is_closed());
        assert!(registry.contains(guild));
        assert_eq!(transport.open_connections(), 0);
    }
}
