//! In-memory resolver and transport.
//!
//! Both record what the session asked of them and let a test script the
//! answers: fail a query, hold a resolution until released, refuse to
//! connect, end the current track or drop the connection on demand.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Notify;

use crate::{
    audio::{
        resolver::TrackResolver,
        track::{ResolvedTrack, TrackRequest, Volume},
        transport::{TransportEvents, VoiceConnection, VoiceEndpoint, VoiceTransport},
    },
    error::{ConnectError, ResolveError, TransportError},
};

/// Resolver que devuelve un track con el título igual a la query.
#[derive(Default)]
pub struct MockResolver {
    failures: Mutex<HashMap<String, ResolveError>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    calls: Mutex<Vec<String>>,
    prefetched: Mutex<Vec<String>>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// `query` fallará con `error` hasta nuevo aviso
    pub fn fail(&self, query: &str, error: ResolveError) {
        self.failures.lock().insert(query.to_string(), error);
    }

    /// Retiene la resolución de `query` hasta llamar a [`Self::release`].
    pub fn hold(&self, query: &str) {
        self.gates
            .lock()
            .insert(query.to_string(), Arc::new(Notify::new()));
    }

    pub fn release(&self, query: &str) {
        if let Some(gate) = self.gates.lock().remove(query) {
            gate.notify_one();
        }
    }

    /// Queries resueltas, en orden de llegada
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn prefetched(&self) -> Vec<String> {
        self.prefetched.lock().clone()
    }

    pub fn track_for(request: &TrackRequest) -> ResolvedTrack {
        ResolvedTrack {
            title: request.query.clone(),
            duration: Some(Duration::from_secs(180)),
            stream_url: format!("mock://{}", request.query),
            page_url: None,
            thumbnail: None,
            request: request.clone(),
        }
    }
}

#[async_trait]
impl TrackResolver for MockResolver {
    async fn resolve(&self, request: &TrackRequest) -> Result<ResolvedTrack, ResolveError> {
        self.calls.lock().push(request.query.clone());

        let gate = self.gates.lock().get(&request.query).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(error) = self.failures.lock().get(&request.query).cloned() {
            return Err(error);
        }
        Ok(Self::track_for(request))
    }

    fn prefetch(&self, request: &TrackRequest) {
        self.prefetched.lock().push(request.query.clone());
    }
}

/// Lo que se ve del lado del canal de voz
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockConnectionState {
    /// Título del track sonando
    pub playing: Option<String>,
    pub generation: u64,
    pub paused: bool,
    pub volume: Volume,
    /// Todos los títulos que empezaron a sonar, en orden
    pub played: Vec<String>,
    pub connected: bool,
}

#[derive(Default)]
pub struct MockTransport {
    refuse: AtomicBool,
    close_delay: Mutex<Duration>,
    connects: AtomicUsize,
    open: Arc<AtomicUsize>,
    state: Arc<Mutex<MockConnectionState>>,
    events: Mutex<Option<TransportEvents>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hace que los próximos `connect` fallen (o vuelvan a funcionar)
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Cada `close` tarda `delay`, como el ida y vuelta con el gateway
    pub fn slow_close(&self, delay: Duration) {
        *self.close_delay.lock() = delay;
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Conexiones abiertas que nadie cerró todavía
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> MockConnectionState {
        self.state.lock().clone()
    }

    /// Simula que el track actual terminó solo.
    pub fn finish_current_track(&self) {
        let generation = self.state.lock().generation;
        if let Some(events) = self.events.lock().as_ref() {
            events.track_ended(generation);
        }
    }

    /// Simula una desconexión del lado del servidor de voz.
    pub fn drop_connection(&self) {
        if let Some(events) = self.events.lock().as_ref() {
            events.dropped();
        }
    }
}

#[async_trait]
impl VoiceTransport for MockTransport {
    async fn connect(
        &self,
        endpoint: VoiceEndpoint,
        events: TransportEvents,
    ) -> Result<Box<dyn VoiceConnection>, ConnectError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ConnectError::Join("canal rechazado".into()));
        }

        *self.events.lock() = Some(events);
        self.open.fetch_add(1, Ordering::SeqCst);
        self.state.lock().connected = true;

        Ok(Box::new(MockConnection {
            endpoint,
            state: self.state.clone(),
            open: self.open.clone(),
            close_delay: *self.close_delay.lock(),
            closed: false,
        }))
    }
}

struct MockConnection {
    endpoint: VoiceEndpoint,
    state: Arc<Mutex<MockConnectionState>>,
    open: Arc<AtomicUsize>,
    close_delay: Duration,
    closed: bool,
}

impl MockConnection {
    fn ensure_track(&self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.state.lock().playing.is_none() {
            return Err(TransportError::NoTrack);
        }
        Ok(())
    }
}

#[async_trait]
impl VoiceConnection for MockConnection {
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
        let mut state = self.state.lock();
        state.playing = Some(track.title.clone());
        state.generation = generation;
        state.paused = false;
        state.volume = volume;
        state.played.push(track.title.clone());
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) -> Result<(), TransportError> {
        self.ensure_track()?;
        self.state.lock().paused = paused;
        Ok(())
    }

    fn set_volume(&mut self, volume: Volume) -> Result<(), TransportError> {
        self.ensure_track()?;
        self.state.lock().volume = volume;
        Ok(())
    }

    fn stop_track(&mut self) {
        let mut state = self.state.lock();
        state.playing = None;
        state.paused = false;
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        self.closed = true;
        self.open.fetch_sub(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.playing = None;
        state.connected = false;
    }
}
