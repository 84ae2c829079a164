//! Per-guild playback session.
//!
//! A [`Session`] owns one [`TrackQueue`], at most one voice connection and
//! the playback state of a guild. Every mutating operation takes the
//! session's async mutex, so commands for one guild are applied one at a
//! time and in arrival order. Slow work (resolving a track, joining a voice
//! channel) runs with the mutex released; its result is committed only if
//! the session's generation has not moved in the meantime, which is how a
//! `skip`, `stop` or `leave` that arrives mid-resolution wins.
//!
//! Readers never take the mutex: after each committed change the session
//! publishes a [`SessionView`] that display commands can clone freely.

use parking_lot::RwLock;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tokio::{
    sync::{broadcast, mpsc, Mutex, MutexGuard},
    time::{timeout, Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    audio::{
        command::CommandOutcome,
        queue::{QueueSnapshot, TrackQueue},
        resolver::TrackResolver,
        track::{QueueEntry, ResolvedTrack, TrackRequest, Volume},
        transport::{
            TransportEvent, TransportEvents, VoiceConnection, VoiceEndpoint, VoiceTransport,
        },
    },
    error::{ConnectError, FailedResolution, ResolveError, SessionError, TransportError},
};

/// Estado de reproducción de una sesión
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackState {
    /// Sin track activo (puede seguir conectada al canal)
    Idle,
    /// Activación en curso: conectando y/o resolviendo
    Connecting,
    Playing,
    Paused,
    /// Cerrándose; la sesión está por salir del registro
    Stopping,
}

/// Reglas que comparten todas las sesiones
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub default_volume: Volume,
    pub max_queue_size: usize,
    /// Fallos de resolución seguidos antes de rendirse
    pub max_consecutive_failures: usize,
    /// Salir del canal de voz cuando la cola se agota
    pub auto_leave_on_empty: bool,
    pub resolve_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            default_volume: Volume::MAX,
            max_queue_size: 1000,
            max_consecutive_failures: 3,
            auto_leave_on_empty: false,
            resolve_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(15),
        }
    }
}

/// Colaboradores externos inyectados en cada sesión.
#[derive(Clone)]
pub struct PlaybackContext {
    pub resolver: Arc<dyn TrackResolver>,
    pub transport: Arc<dyn VoiceTransport>,
    pub policy: SessionPolicy,
    pub notices: broadcast::Sender<SessionNotice>,
}

impl PlaybackContext {
    pub fn new(
        resolver: Arc<dyn TrackResolver>,
        transport: Arc<dyn VoiceTransport>,
        policy: SessionPolicy,
    ) -> Self {
        let (notices, _) = broadcast::channel(64);
        Self {
            resolver,
            transport,
            policy,
            notices,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }
}

/// Aviso de algo que pasó sin que un comando lo pidiera.
#[derive(Debug, Clone)]
pub struct SessionNotice {
    pub guild_id: GuildId,
    pub kind: NoticeKind,
}

#[derive(Debug, Clone)]
pub enum NoticeKind {
    NowPlaying(ResolvedTrack),
    Failed(SessionError),
    QueueFinished,
    TransportDropped { interrupted: Option<String> },
    IdleTimeout,
}

/// Foto consistente del estado, para mostrar.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub state: PlaybackState,
    /// Track sonando, o el que se está activando si `state` es `Connecting`
    pub now_playing: Option<QueueEntry>,
    pub queue: QueueSnapshot,
    pub volume: Volume,
    pub connected: bool,
    pub last_activity: Instant,
    pub closed: bool,
}

/// Resultado de una corrida de activación
#[derive(Debug)]
enum Activation {
    Started {
        track: ResolvedTrack,
        skipped: Vec<FailedResolution>,
    },
    Superseded,
}

/// Permiso para comprometer el resultado de una activación
struct Ticket {
    generation: u64,
    cancel: CancellationToken,
}

struct SessionInner {
    state: PlaybackState,
    active: Option<QueueEntry>,
    pending: Option<QueueEntry>,
    queue: TrackQueue,
    volume: Volume,
    connection: Option<Box<dyn VoiceConnection>>,
    connection_id: u64,
    next_connection_id: u64,
    endpoint: Option<VoiceEndpoint>,
    generation: u64,
    in_flight: CancellationToken,
    last_activity: Instant,
    closed: bool,
}

impl SessionInner {
    /// Invalida cualquier activación en vuelo y abre una nueva.
    fn begin(&mut self, state: PlaybackState) -> Ticket {
        self.invalidate();
        self.state = state;
        Ticket {
            generation: self.generation,
            cancel: self.in_flight.clone(),
        }
    }

    fn invalidate(&mut self) {
        self.in_flight.cancel();
        self.in_flight = CancellationToken::new();
        self.generation += 1;
    }

    fn is_current(&self, ticket: &Ticket) -> bool {
        !self.closed && self.generation == ticket.generation
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    async fn release_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
    }

    /// Pasa a `Idle`; suelta la conexión solo si la política lo pide.
    async fn settle_idle(&mut self, auto_leave: bool) {
        self.active = None;
        self.pending = None;
        self.state = PlaybackState::Idle;
        if auto_leave {
            self.release_connection().await;
        }
        self.touch();
    }

    /// Error del transporte: nunca queda una conexión a medias.
    async fn fail_transport(&mut self, error: TransportError) -> SessionError {
        self.invalidate();
        self.release_connection().await;
        self.active = None;
        self.pending = None;
        self.state = PlaybackState::Idle;
        self.touch();
        SessionError::TransportDropped(error.to_string())
    }

    fn view(&self) -> SessionView {
        SessionView {
            state: self.state,
            now_playing: self.active.clone().or_else(|| self.pending.clone()),
            queue: self.queue.peek_all(),
            volume: self.volume,
            connected: self.connection.is_some(),
            last_activity: self.last_activity,
            closed: self.closed,
        }
    }
}

pub struct Session {
    guild_id: GuildId,
    ctx: PlaybackContext,
    inner: Mutex<SessionInner>,
    view: RwLock<SessionView>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    shutdown: CancellationToken,
}

impl Session {
    /// Crea la sesión y lanza la tarea que escucha eventos del transporte.
    pub fn new(guild_id: GuildId, ctx: PlaybackContext) -> Arc<Self> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let inner = SessionInner {
            state: PlaybackState::Idle,
            active: None,
            pending: None,
            queue: TrackQueue::new(ctx.policy.max_queue_size),
            volume: ctx.policy.default_volume,
            connection: None,
            connection_id: 0,
            next_connection_id: 0,
            endpoint: None,
            generation: 0,
            in_flight: CancellationToken::new(),
            last_activity: Instant::now(),
            closed: false,
        };
        let view = RwLock::new(inner.view());

        let session = Arc::new(Self {
            guild_id,
            ctx,
            inner: Mutex::new(inner),
            view,
            events_tx,
            shutdown: CancellationToken::new(),
        });

        let weak = Arc::downgrade(&session);
        let shutdown = session.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events_rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                let Some(session) = weak.upgrade() else { break };
                session.handle_transport_event(event).await;
            }
            debug!("Eventos de transporte cerrados para guild {}", guild_id);
        });

        debug!("🆕 Sesión creada para guild {}", guild_id);
        session
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Última foto publicada; no bloquea a los comandos en curso.
    pub fn view(&self) -> SessionView {
        self.view.read().clone()
    }

    pub fn state(&self) -> PlaybackState {
        self.view.read().state
    }

    pub fn is_closed(&self) -> bool {
        self.view.read().closed
    }

    /// `/play`: activa de inmediato si está libre, si no encola.
    pub async fn play(
        &self,
        request: TrackRequest,
        endpoint: VoiceEndpoint,
    ) -> Result<CommandOutcome, SessionError> {
        let mut inner = self.lock_open().await?;
        inner.touch();

        match inner.state {
            PlaybackState::Connecting | PlaybackState::Playing | PlaybackState::Paused => {
                self.ctx.resolver.prefetch(&request);
                let entry = QueueEntry::new(request);
                let title = entry.title().to_string();
                let position = inner.queue.enqueue(entry)?;
                self.publish(&inner);
                Ok(CommandOutcome::Queued { position, title })
            }
            PlaybackState::Stopping => Err(SessionError::NoActiveSession),
            PlaybackState::Idle => {
                let moved = inner
                    .connection
                    .as_ref()
                    .is_some_and(|connection| connection.endpoint() != endpoint);
                if moved {
                    info!("🔀 Cambiando de canal de voz en guild {}", self.guild_id);
                    inner.release_connection().await;
                }
                inner.endpoint = Some(endpoint);

                let query = request.query.clone();
                let entry = QueueEntry::new(request);
                let ticket = inner.begin(PlaybackState::Connecting);
                inner.pending = Some(entry.clone());
                self.publish(&inner);
                drop(inner);

                match self.drive(entry, ticket).await? {
                    Activation::Started { track, skipped } => {
                        Ok(CommandOutcome::NowPlaying { track, skipped })
                    }
                    Activation::Superseded => Ok(CommandOutcome::Superseded { query }),
                }
            }
        }
    }

    /// `/skip`: termina el track actual como si hubiera acabado solo.
    pub async fn skip(&self) -> Result<CommandOutcome, SessionError> {
        let mut inner = self.lock_open().await?;
        let skipped = match inner.state {
            PlaybackState::Playing | PlaybackState::Paused => inner.active.take(),
            PlaybackState::Connecting => inner.pending.take(),
            PlaybackState::Idle | PlaybackState::Stopping => {
                return Err(SessionError::QueueEmpty)
            }
        };
        let skipped = skipped
            .map(|entry| entry.title().to_string())
            .unwrap_or_default();

        if let Some(connection) = inner.connection.as_mut() {
            connection.stop_track();
        }
        inner.touch();
        info!("⏭️ Saltando en guild {}: {}", self.guild_id, skipped);

        match inner.queue.pop_next() {
            Some(next) => {
                let ticket = inner.begin(PlaybackState::Connecting);
                inner.pending = Some(next.clone());
                self.publish(&inner);
                drop(inner);

                let (now_playing, failed) = match self.drive(next, ticket).await? {
                    Activation::Started { track, skipped } => (Some(track), skipped),
                    Activation::Superseded => (None, Vec::new()),
                };
                Ok(CommandOutcome::Skipped {
                    skipped,
                    now_playing,
                    failed,
                })
            }
            None => {
                inner.invalidate();
                inner.settle_idle(self.ctx.policy.auto_leave_on_empty).await;
                self.publish(&inner);
                Ok(CommandOutcome::Skipped {
                    skipped,
                    now_playing: None,
                    failed: Vec::new(),
                })
            }
        }
    }

    pub async fn pause(&self) -> Result<CommandOutcome, SessionError> {
        let mut inner = self.lock_open().await?;
        match inner.state {
            PlaybackState::Paused => Ok(CommandOutcome::Paused),
            PlaybackState::Playing => {
                inner.touch();
                let result = match inner.connection.as_mut() {
                    Some(connection) => connection.set_paused(true),
                    None => Err(TransportError::Closed),
                };
                if let Err(error) = result {
                    let error = inner.fail_transport(error).await;
                    self.publish(&inner);
                    return Err(error);
                }
                inner.state = PlaybackState::Paused;
                self.publish(&inner);
                info!("⏸️ Reproducción pausada en guild {}", self.guild_id);
                Ok(CommandOutcome::Paused)
            }
            _ => Err(SessionError::QueueEmpty),
        }
    }

    pub async fn resume(&self) -> Result<CommandOutcome, SessionError> {
        let mut inner = self.lock_open().await?;
        match inner.state {
            PlaybackState::Playing => Ok(CommandOutcome::Resumed),
            PlaybackState::Paused => {
                inner.touch();
                let result = match inner.connection.as_mut() {
                    Some(connection) => connection.set_paused(false),
                    None => Err(TransportError::Closed),
                };
                if let Err(error) = result {
                    let error = inner.fail_transport(error).await;
                    self.publish(&inner);
                    return Err(error);
                }
                inner.state = PlaybackState::Playing;
                self.publish(&inner);
                info!("▶️ Reproducción reanudada en guild {}", self.guild_id);
                Ok(CommandOutcome::Resumed)
            }
            _ => Err(SessionError::QueueEmpty),
        }
    }

    /// `/stop`: corta lo que suena, vacía la cola y queda en `Idle`.
    pub async fn stop(&self) -> Result<CommandOutcome, SessionError> {
        let mut inner = self.lock_open().await?;
        let active = matches!(
            inner.state,
            PlaybackState::Connecting | PlaybackState::Playing | PlaybackState::Paused
        );
        if !active && inner.queue.is_empty() {
            return Err(SessionError::QueueEmpty);
        }

        inner.invalidate();
        if let Some(connection) = inner.connection.as_mut() {
            connection.stop_track();
        }
        let cleared = inner.queue.clear();
        inner.settle_idle(self.ctx.policy.auto_leave_on_empty).await;
        self.publish(&inner);

        info!("⏹️ Reproducción detenida en guild {}", self.guild_id);
        Ok(CommandOutcome::Stopped { cleared })
    }

    /// Cambia el volumen; vale para el track actual y los siguientes.
    pub async fn set_volume(&self, percent: i64) -> Result<CommandOutcome, SessionError> {
        let mut inner = self.lock_open().await?;
        let volume = Volume::try_from(percent)?;
        inner.touch();
        inner.volume = volume;

        if matches!(inner.state, PlaybackState::Playing | PlaybackState::Paused) {
            let result = match inner.connection.as_mut() {
                Some(connection) => connection.set_volume(volume),
                None => Err(TransportError::Closed),
            };
            if let Err(error) = result {
                let error = inner.fail_transport(error).await;
                self.publish(&inner);
                return Err(error);
            }
        }

        self.publish(&inner);
        info!("🔊 Volumen ajustado a {} en guild {}", volume, self.guild_id);
        Ok(CommandOutcome::VolumeSet(volume))
    }

    /// Cierra la sesión: cancela lo que esté en vuelo, suelta la conexión
    /// y la marca como cerrada. Devuelve si había algo que cerrar.
    pub async fn close(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return false;
        }
        self.shut_down(&mut inner).await
    }

    /// Cierre por inactividad. Vuelve a comprobar la condición con el
    /// lock tomado, por si empezó a sonar algo desde la última foto.
    pub async fn try_expire(&self, idle_timeout: Duration) -> bool {
        let mut inner = self.inner.lock().await;
        let idle = !inner.closed
            && inner.state == PlaybackState::Idle
            && inner.queue.is_empty()
            && inner.last_activity.elapsed() >= idle_timeout;
        if !idle {
            return false;
        }

        info!("💤 Sesión inactiva en guild {}, cerrando", self.guild_id);
        self.shut_down(&mut inner).await;
        self.notify(NoticeKind::IdleTimeout);
        true
    }

    pub async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::TrackEnded { generation } => self.on_track_end(generation).await,
            TransportEvent::Dropped { connection } => self.on_transport_dropped(connection).await,
        }
    }

    /// Fin natural del track iniciado con `generation`.
    pub async fn on_track_end(&self, generation: u64) {
        let mut inner = self.inner.lock().await;
        let current = !inner.closed
            && inner.generation == generation
            && matches!(inner.state, PlaybackState::Playing | PlaybackState::Paused);
        if !current {
            debug!("Fin de track obsoleto (gen {}) en guild {}", generation, self.guild_id);
            return;
        }

        if let Some(finished) = inner.active.take() {
            debug!("🎵 Track terminó en guild {}: {}", self.guild_id, finished.title());
        }
        inner.touch();

        match inner.queue.pop_next() {
            Some(next) => {
                let ticket = inner.begin(PlaybackState::Connecting);
                inner.pending = Some(next.clone());
                self.publish(&inner);
                drop(inner);

                let result = self.drive(next, ticket).await;
                self.announce(result);
            }
            None => {
                inner.invalidate();
                inner.settle_idle(self.ctx.policy.auto_leave_on_empty).await;
                self.publish(&inner);
                self.notify(NoticeKind::QueueFinished);
            }
        }
    }

    /// La conexión `connection` se cayó en medio de la reproducción.
    pub async fn on_transport_dropped(&self, connection: u64) {
        let mut inner = self.inner.lock().await;
        if inner.closed || inner.connection.is_none() || inner.connection_id != connection {
            return;
        }

        let interrupted = inner
            .active
            .as_ref()
            .or(inner.pending.as_ref())
            .map(|entry| entry.title().to_string());
        warn!("🔌 Conexión de voz perdida en guild {}", self.guild_id);

        let _ = inner.fail_transport(TransportError::Closed).await;
        self.publish(&inner);
        self.notify(NoticeKind::TransportDropped { interrupted });
    }

    /// Lleva `entry` hasta `Playing`, avanzando por la cola si no se puede
    /// resolver. Corre sin el lock salvo para comprometer cada paso.
    async fn drive(&self, mut entry: QueueEntry, ticket: Ticket) -> Result<Activation, SessionError> {
        let mut failures: Vec<FailedResolution> = Vec::new();

        loop {
            let (endpoint, connection_id) = {
                let mut inner = self.inner.lock().await;
                if !inner.is_current(&ticket) {
                    return Ok(Activation::Superseded);
                }
                if inner.connection.is_some() {
                    (None, inner.connection_id)
                } else {
                    inner.next_connection_id += 1;
                    (inner.endpoint, inner.next_connection_id)
                }
            };

            if let Some(endpoint) = endpoint {
                let result = self.connect(endpoint, connection_id, &ticket).await;
                let mut inner = self.inner.lock().await;
                if !inner.is_current(&ticket) {
                    if let Ok(mut connection) = result {
                        connection.close().await;
                    }
                    return Ok(Activation::Superseded);
                }
                match result {
                    Ok(connection) => {
                        info!("🔊 Conectado al canal de voz en guild {}", self.guild_id);
                        inner.connection = Some(connection);
                        inner.connection_id = connection_id;
                        self.publish(&inner);
                    }
                    Err(error) => {
                        warn!("❌ Error al conectar en guild {}: {}", self.guild_id, error);
                        inner.pending = None;
                        inner.state = PlaybackState::Idle;
                        inner.touch();
                        self.publish(&inner);
                        return Err(SessionError::TransportConnectFailed(error));
                    }
                }
            }

            let resolved = match entry.resolved.clone() {
                Some(track) => Ok(track),
                None => self.resolve(&entry.request, &ticket).await,
            };

            let mut inner = self.inner.lock().await;
            if !inner.is_current(&ticket) {
                return Ok(Activation::Superseded);
            }

            match resolved {
                Ok(track) => {
                    let volume = inner.volume;
                    let started = match inner.connection.as_mut() {
                        Some(connection) => connection.play(&track, volume, ticket.generation).await,
                        None => Err(TransportError::Closed),
                    };
                    if let Err(error) = started {
                        let error = inner.fail_transport(error).await;
                        self.publish(&inner);
                        return Err(error);
                    }

                    entry.resolved = Some(track.clone());
                    inner.pending = None;
                    inner.active = Some(entry);
                    inner.state = PlaybackState::Playing;
                    inner.touch();
                    self.publish(&inner);

                    info!("🎵 Reproduciendo en guild {}: {}", self.guild_id, track.title);
                    return Ok(Activation::Started {
                        track,
                        skipped: failures,
                    });
                }
                Err(error) => {
                    warn!(
                        "❌ No se pudo resolver `{}` en guild {}: {}",
                        entry.request.query, self.guild_id, error
                    );
                    failures.push(FailedResolution {
                        query: entry.request.query.clone(),
                        error: error.clone(),
                    });

                    if failures.len() >= self.ctx.policy.max_consecutive_failures.max(1) {
                        warn!(
                            "🚨 {} fallos seguidos en guild {}, deteniendo",
                            failures.len(),
                            self.guild_id
                        );
                        inner.settle_idle(self.ctx.policy.auto_leave_on_empty).await;
                        self.publish(&inner);
                        return Err(SessionError::ConsecutiveResolutionFailureLimitExceeded {
                            failures,
                        });
                    }

                    match inner.queue.pop_next() {
                        Some(next) => {
                            inner.pending = Some(next.clone());
                            self.publish(&inner);
                            entry = next;
                        }
                        None => {
                            inner.settle_idle(self.ctx.policy.auto_leave_on_empty).await;
                            self.publish(&inner);
                            drop(inner);

                            // los anteriores de esta corrida no llegan en el error
                            failures.pop();
                            for failure in failures {
                                self.notify(NoticeKind::Failed(failure.into()));
                            }
                            return Err(SessionError::ResolutionFailed {
                                query: entry.request.query,
                                source: error,
                            });
                        }
                    }
                }
            }
        }
    }

    async fn connect(
        &self,
        endpoint: VoiceEndpoint,
        connection_id: u64,
        ticket: &Ticket,
    ) -> Result<Box<dyn VoiceConnection>, ConnectError> {
        let limit = self.ctx.policy.connect_timeout;
        let events = TransportEvents::new(self.events_tx.clone(), connection_id);
        tokio::select! {
            biased;
            _ = ticket.cancel.cancelled() => Err(ConnectError::Cancelled),
            result = timeout(limit, self.ctx.transport.connect(endpoint, events)) => {
                result.unwrap_or_else(|_| Err(ConnectError::TimedOut(limit.as_secs())))
            }
        }
    }

    async fn resolve(
        &self,
        request: &TrackRequest,
        ticket: &Ticket,
    ) -> Result<ResolvedTrack, ResolveError> {
        let limit = self.ctx.policy.resolve_timeout;
        tokio::select! {
            biased;
            _ = ticket.cancel.cancelled() => Err(ResolveError::Cancelled),
            result = timeout(limit, self.ctx.resolver.resolve(request)) => {
                result.unwrap_or_else(|_| Err(ResolveError::TimedOut(limit.as_secs())))
            }
        }
    }

    async fn shut_down(&self, inner: &mut SessionInner) -> bool {
        let had_anything = inner.connection.is_some()
            || inner.active.is_some()
            || inner.pending.is_some()
            || !inner.queue.is_empty();

        inner.state = PlaybackState::Stopping;
        self.publish(inner);

        inner.invalidate();
        if let Some(connection) = inner.connection.as_mut() {
            connection.stop_track();
        }
        inner.active = None;
        inner.pending = None;
        inner.queue.clear();
        inner.release_connection().await;
        inner.closed = true;
        self.shutdown.cancel();
        self.publish(inner);

        info!("👋 Sesión cerrada en guild {}", self.guild_id);
        had_anything
    }

    /// Publica el resultado de una activación que no pidió ningún comando
    fn announce(&self, result: Result<Activation, SessionError>) {
        match result {
            Ok(Activation::Started { track, skipped }) => {
                for failure in skipped {
                    self.notify(NoticeKind::Failed(failure.into()));
                }
                self.notify(NoticeKind::NowPlaying(track));
            }
            Ok(Activation::Superseded) => {}
            Err(SessionError::ConsecutiveResolutionFailureLimitExceeded { failures }) => {
                for failure in &failures {
                    self.notify(NoticeKind::Failed(failure.clone().into()));
                }
                self.notify(NoticeKind::Failed(
                    SessionError::ConsecutiveResolutionFailureLimitExceeded { failures },
                ));
            }
            Err(error) => self.notify(NoticeKind::Failed(error)),
        }
    }

    fn notify(&self, kind: NoticeKind) {
        // sin suscriptores no hay a quién avisar
        let _ = self.ctx.notices.send(SessionNotice {
            guild_id: self.guild_id,
            kind,
        });
    }

    fn publish(&self, inner: &SessionInner) {
        *self.view.write() = inner.view();
    }

    async fn lock_open(&self) -> Result<MutexGuard<'_, SessionInner>, SessionError> {
        let inner = self.inner.lock().await;
        if inner.closed {
            return Err(SessionError::NoActiveSession);
        }
        Ok(inner)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        mock::{MockResolver, MockTransport},
        resolver::MockTrackResolver,
        track::{Provider, Requester},
    };
    use pretty_assertions::assert_eq;
    use serenity::model::id::{ChannelId, UserId};

    const GUILD: GuildId = GuildId::new(10);

    fn endpoint() -> VoiceEndpoint {
        VoiceEndpoint {
            guild_id: GUILD,
            channel_id: ChannelId::new(20),
        }
    }

    fn request(query: &str) -> TrackRequest {
        TrackRequest::new(query, Provider::YouTube, Requester { id: UserId::new(1), name: "ana".into() })
    }

    fn session_with(resolver: Arc<dyn TrackResolver>, transport: Arc<MockTransport>) -> Arc<Session> {
        Session::new(GUILD, PlaybackContext::new(resolver, transport, SessionPolicy::default()))
    }

    #[tokio::test]
    async fn resolver_error_is_reported_and_session_stays_idle() {
        let mut resolver = MockTrackResolver::new();
        resolver
            .expect_resolve()
            .times(1)
            .returning(|request| Err(ResolveError::NotFound(request.query.clone())));
        let transport = Arc::new(MockTransport::new());
        let session = session_with(Arc::new(resolver), transport.clone());

        let result = session.play(request("nada"), endpoint()).await;

        assert_eq!(
            result,
            Err(SessionError::ResolutionFailed {
                query: "nada".into(),
                source: ResolveError::NotFound("nada".into()),
            })
        );
        assert_eq!(session.state(), PlaybackState::Idle);
        // la conexión se mantiene salvo que la política diga lo contrario
        assert_eq!(transport.open_connections(), 1);
    }

    #[tokio::test]
    async fn queued_requests_are_prefetched() {
        let mut resolver = MockTrackResolver::new();
        resolver
            .expect_resolve()
            .returning(|request| Ok(MockResolver::track_for(request)));
        resolver
            .expect_prefetch()
            .withf(|request| request.query == "segunda")
            .times(1)
            .return_const(());
        let session = session_with(Arc::new(resolver), Arc::new(MockTransport::new()));

        session.play(request("primera"), endpoint()).await.unwrap();
        let queued = session.play(request("segunda"), endpoint()).await.unwrap();

        assert_eq!(
            queued,
            CommandOutcome::Queued { position: 1, title: "segunda".into() }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_resolution_times_out() {
        let resolver = Arc::new(MockResolver::new());
        resolver.hold("lenta");
        let session = session_with(resolver, Arc::new(MockTransport::new()));

        let result = session.play(request("lenta"), endpoint()).await;

        assert_eq!(
            result,
            Err(SessionError::ResolutionFailed {
                query: "lenta".into(),
                source: ResolveError::TimedOut(30),
            })
        );
        assert_eq!(session.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn stale_track_end_is_ignored() {
        let transport = Arc::new(MockTransport::new());
        let session = session_with(Arc::new(MockResolver::new()), transport.clone());

        session.play(request("a"), endpoint()).await.unwrap();
        session.play(request("b"), endpoint()).await.unwrap();
        let generation = transport.state().generation;

        session.on_track_end(generation + 5).await;
        assert_eq!(transport.state().playing.as_deref(), Some("a"));

        session.on_track_end(generation).await;
        assert_eq!(transport.state().playing.as_deref(), Some("b"));
        // el fin de `a` ya no vale
        session.on_track_end(generation).await;
        assert_eq!(transport.state().playing.as_deref(), Some("b"));
        assert_eq!(session.view().queue.len(), 0);
    }

    #[tokio::test]
    async fn dropped_transport_keeps_the_queue() {
        let transport = Arc::new(MockTransport::new());
        let session = session_with(Arc::new(MockResolver::new()), transport.clone());
        let mut notices = session.ctx.subscribe();

        session.play(request("a"), endpoint()).await.unwrap();
        session.play(request("b"), endpoint()).await.unwrap();
        session.on_transport_dropped(1).await;

        let view = session.view();
        assert_eq!(view.state, PlaybackState::Idle);
        assert!(!view.connected);
        assert_eq!(view.queue.len(), 1);
        assert_eq!(transport.open_connections(), 0);

        let notice = notices.recv().await.unwrap();
        assert!(matches!(
            notice.kind,
            NoticeKind::TransportDropped { interrupted: Some(ref title) } if title == "a"
        ));

        // el siguiente play reconecta
        session.play(request("c"), endpoint()).await.unwrap();
        assert_eq!(transport.connect_count(), 2);
        assert_eq!(transport.state().playing.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn auto_leave_releases_connection_when_queue_runs_dry() {
        let transport = Arc::new(MockTransport::new());
        let policy = SessionPolicy {
            auto_leave_on_empty: true,
            ..SessionPolicy::default()
        };
        let session = Session::new(
            GUILD,
            PlaybackContext::new(Arc::new(MockResolver::new()), transport.clone(), policy),
        );

        session.play(request("a"), endpoint()).await.unwrap();
        let outcome = session.skip().await.unwrap();

        assert_eq!(
            outcome,
            CommandOutcome::Skipped {
                skipped: "a".into(),
                now_playing: None,
                failed: Vec::new(),
            }
        );
        assert_eq!(transport.open_connections(), 0);
        assert_eq!(session.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn volume_applies_live_and_to_next_track() {
        let transport = Arc::new(MockTransport::new());
        let session = session_with(Arc::new(MockResolver::new()), transport.clone());

        session.play(request("a"), endpoint()).await.unwrap();
        session.play(request("b"), endpoint()).await.unwrap();
        session.set_volume(35).await.unwrap();
        assert_eq!(transport.state().volume.percent(), 35);

        session.skip().await.unwrap();
        assert_eq!(transport.state().playing.as_deref(), Some("b"));
        assert_eq!(transport.state().volume.percent(), 35);
    }

    #[tokio::test]
    async fn closed_session_rejects_commands() {
        let session = session_with(Arc::new(MockResolver::new()), Arc::new(MockTransport::new()));
        session.play(request("a"), endpoint()).await.unwrap();

        assert!(session.close().await);
        assert!(!session.close().await);
        assert!(session.is_closed());
        assert_eq!(session.pause().await, Err(SessionError::NoActiveSession));
    }
}
