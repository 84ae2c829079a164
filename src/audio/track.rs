use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::{fmt, time::Duration};

use crate::error::SessionError;

/// Proveedores de audio soportados
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    YouTube,
    SoundCloud,
}

impl Provider {
    /// Interpreta el nombre elegido por el usuario.
    ///
    /// `auto` se decide mirando la query: enlaces de soundcloud.com van a
    /// SoundCloud, todo lo demás a YouTube. Nombres desconocidos usan YouTube.
    pub fn detect(name: &str, query: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "youtube" => Self::YouTube,
            "soundcloud" => Self::SoundCloud,
            "auto" if query.to_ascii_lowercase().contains("soundcloud.com") => Self::SoundCloud,
            _ => Self::YouTube,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YouTube => "YouTube",
            Self::SoundCloud => "SoundCloud",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Usuario que pidió la canción
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub id: UserId,
    pub name: String,
}

/// Lo que el usuario pidió con `/play`, tal cual llegó.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRequest {
    pub query: String,
    pub provider: Provider,
    pub requested_by: Requester,
    pub submitted_at: DateTime<Utc>,
}

impl TrackRequest {
    pub fn new(query: impl Into<String>, provider: Provider, requested_by: Requester) -> Self {
        Self {
            query: query.into(),
            provider,
            requested_by,
            submitted_at: Utc::now(),
        }
    }
}

/// Resultado de resolver un [`TrackRequest`]. Nunca se modifica después de creado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTrack {
    pub title: String,
    pub duration: Option<Duration>,
    /// URL directa del stream de audio (firmada por el proveedor)
    pub stream_url: String,
    /// Página pública del track, para mostrar
    pub page_url: Option<String>,
    pub thumbnail: Option<String>,
    pub request: TrackRequest,
}

/// Entrada de la cola: la petición más su resolución, si ya existe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub request: TrackRequest,
    pub resolved: Option<ResolvedTrack>,
}

impl QueueEntry {
    pub fn new(request: TrackRequest) -> Self {
        Self { request, resolved: None }
    }

    /// Título para mostrar: el resuelto si existe, si no la query original.
    pub fn title(&self) -> &str {
        self.resolved
            .as_ref()
            .map(|track| track.title.as_str())
            .unwrap_or(self.request.query.as_str())
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }
}

impl From<ResolvedTrack> for QueueEntry {
    fn from(track: ResolvedTrack) -> Self {
        Self {
            request: track.request.clone(),
            resolved: Some(track),
        }
    }
}

/// Volumen de una sesión, siempre dentro de `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Volume(u8);

impl Volume {
    pub const MAX: Volume = Volume(100);

    pub fn percent(self) -> u8 {
        self.0
    }

    /// Factor lineal para el mezclador (`1.0` = volumen original).
    pub fn as_gain(self) -> f32 {
        f32::from(self.0) / 100.0
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::MAX
    }
}

impl TryFrom<i64> for Volume {
    type Error = SessionError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if (0..=100).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(SessionError::InvalidVolume(value))
        }
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_provider_follows_the_link() {
        assert_eq!(
            Provider::detect("auto", "https://soundcloud.com/artist/track"),
            Provider::SoundCloud
        );
        assert_eq!(Provider::detect("auto", "never gonna give you up"), Provider::YouTube);
        assert_eq!(Provider::detect("SoundCloud", "anything"), Provider::SoundCloud);
        assert_eq!(Provider::detect("spotify", "anything"), Provider::YouTube);
    }

    #[test]
    fn volume_bounds_are_inclusive() {
        assert_eq!(Volume::try_from(0).map(Volume::percent), Ok(0));
        assert_eq!(Volume::try_from(100).map(Volume::percent), Ok(100));
        assert_eq!(Volume::try_from(150), Err(SessionError::InvalidVolume(150)));
        assert_eq!(Volume::try_from(-1), Err(SessionError::InvalidVolume(-1)));
        assert_eq!(Volume::default(), Volume::MAX);
    }

    #[test]
    fn entry_title_falls_back_to_query() {
        let request = TrackRequest::new(
            "lofi beats",
            Provider::YouTube,
            Requester { id: UserId::new(7), name: "ana".into() },
        );
        let entry = QueueEntry::new(request.clone());
        assert_eq!(entry.title(), "lofi beats");
        assert!(!entry.is_resolved());

        let resolved = QueueEntry::from(ResolvedTrack {
            title: "Lofi Girl - beats".into(),
            duration: Some(Duration::from_secs(180)),
            stream_url: "https://cdn.example/audio".into(),
            page_url: None,
            thumbnail: None,
            request,
        });
        assert_eq!(resolved.title(), "Lofi Girl - beats");
    }
}
