//! # Cache Module
//!
//! Stream-locator cache for the yt-dlp resolver.
//!
//! Resolving a query through yt-dlp takes seconds, and the signed stream
//! URLs it returns stay valid for a while, so resolutions are kept per
//! `(provider, query)`:
//!
//! - **TTL**: `STREAM_CACHE_TTL_SECS` (900 by default), shortened to the
//!   URL's own `expire` parameter minus a 60 second margin
//! - **Bounded**: `STREAM_CACHE_SIZE` entries, oldest evicted first
//! - **De-duplicated**: concurrent lookups of a missing key share a single
//!   resolution, which keeps running even if every waiter gives up

pub mod ttl_cache;

use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{debug, warn};
use url::Url;

use crate::{
    audio::track::{Provider, ResolvedTrack},
    error::ResolveError,
};
use ttl_cache::TtlCache;

/// Margen antes del `expire` de la URL firmada
const EXPIRY_MARGIN_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub provider: Provider,
    pub query: String,
}

impl StreamKey {
    pub fn new(provider: Provider, query: &str) -> Self {
        Self {
            provider,
            query: query.trim().to_string(),
        }
    }
}

type SharedResolve = Shared<BoxFuture<'static, Result<ResolvedTrack, ResolveError>>>;

pub struct StreamCache {
    entries: TtlCache<StreamKey, ResolvedTrack>,
    inflight: DashMap<StreamKey, SharedResolve>,
    ttl: Duration,
}

impl StreamCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: TtlCache::new(capacity),
            inflight: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, key: &StreamKey) -> Option<ResolvedTrack> {
        self.entries.get(key)
    }

    pub fn insert(&self, key: StreamKey, track: ResolvedTrack) {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        let ttl = expiry_for(&track.stream_url, self.ttl, now);
        if ttl.is_zero() {
            debug!("URL de stream por vencer, no se guarda: {}", key.query);
            return;
        }
        self.entries.insert_with_ttl(key, track, ttl);
    }

    /// Devuelve lo guardado o resuelve con `resolve`, compartiendo la
    /// resolución con cualquier otra búsqueda simultánea de la misma clave.
    ///
    /// La resolución corre en su propia tarea: soltar el future devuelto
    /// no la cancela, y su resultado queda guardado igual.
    pub async fn get_or_resolve<F, Fut>(
        self: &Arc<Self>,
        key: StreamKey,
        resolve: F,
    ) -> Result<ResolvedTrack, ResolveError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ResolvedTrack, ResolveError>> + Send + 'static,
    {
        if let Some(hit) = self.get(&key) {
            debug!("💾 Cache hit: {}", key.query);
            return Ok(hit);
        }

        let shared = match self.inflight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!("⏳ Resolución en curso, esperando: {}", key.query);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let cache = Arc::clone(self);
                let task_key = key;
                let work = resolve();
                let handle = tokio::spawn(async move {
                    let result = work.await;
                    if let Ok(track) = &result {
                        cache.insert(task_key.clone(), track.clone());
                    }
                    cache.inflight.remove(&task_key);
                    result
                });

                let shared = async move {
                    handle.await.unwrap_or_else(|e| {
                        warn!("Tarea de resolución abortada: {}", e);
                        Err(ResolveError::Unknown(e.to_string()))
                    })
                }
                .boxed()
                .shared();
                entry.insert(shared.clone());
                shared
            }
        };

        shared.await
    }

    /// Limpia entradas vencidas y retorna cuántas se quitaron
    pub fn cleanup_expired(&self) -> usize {
        self.entries.cleanup_expired()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// TTL efectivo para una URL: el configurado, salvo que el parámetro
/// `expire` de la URL venza antes.
pub fn expiry_for(stream_url: &str, ttl: Duration, now_unix: u64) -> Duration {
    match url_expiry(stream_url) {
        Some(expire) => {
            let until = expire.saturating_sub(EXPIRY_MARGIN_SECS).max(now_unix);
            ttl.min(Duration::from_secs(until - now_unix))
        }
        None => ttl,
    }
}

fn url_expiry(stream_url: &str) -> Option<u64> {
    let url = Url::parse(stream_url).ok()?;
    let (_, value) = url.query_pairs().find(|(name, _)| name == "expire")?;
    value.parse().ok()
}
