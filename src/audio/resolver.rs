use async_trait::async_trait;

use crate::{
    audio::track::{ResolvedTrack, TrackRequest},
    error::ResolveError,
};

/// Convierte una petición en un track reproducible.
///
/// Puede tardar varios segundos. La sesión cancela una resolución
/// soltando el future, así que las implementaciones no deben dejar
/// trabajo a medias que dependa de llegar al final.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve(&self, request: &TrackRequest) -> Result<ResolvedTrack, ResolveError>;

    /// Calienta la caché para una petición que quedó en cola.
    fn prefetch(&self, _request: &TrackRequest) {}
}
