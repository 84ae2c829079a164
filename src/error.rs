//! Typed errors for the playback core.
//!
//! Everything that can go wrong inside a session is recovered at the
//! session boundary and handed back to the caller as a [`SessionError`].
//! The resolver and transport seams have their own error types so that
//! adapters can classify failures without knowing about sessions.

use thiserror::Error;

/// Failure classes reported by a [`TrackResolver`](crate::audio::resolver::TrackResolver).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no se encontró ningún resultado para `{0}`")]
    NotFound(String),

    #[error("el proveedor no está disponible: {0}")]
    ProviderUnavailable(String),

    #[error("el proveedor limitó las solicitudes, intenta más tarde")]
    RateLimited,

    #[error("error desconocido al resolver: {0}")]
    Unknown(String),

    #[error("la resolución fue cancelada")]
    Cancelled,

    #[error("la resolución excedió el tiempo límite de {0}s")]
    TimedOut(u64),
}

/// Failure to acquire a voice connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("no se pudo unir al canal de voz: {0}")]
    Join(String),

    #[error("la conexión de voz excedió el tiempo límite de {0}s")]
    TimedOut(u64),

    #[error("la conexión fue cancelada")]
    Cancelled,
}

/// Failure while driving an established connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("la conexión de voz está cerrada")]
    Closed,

    #[error("no hay ninguna pista activa en la conexión")]
    NoTrack,

    #[error("error del transporte de voz: {0}")]
    Driver(String),
}

/// One request dropped because its track could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedResolution {
    pub query: String,
    pub error: ResolveError,
}

/// Errors returned by session commands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no hay ninguna sesión activa en este servidor")]
    NoActiveSession,

    #[error("no hay nada reproduciéndose")]
    QueueEmpty,

    #[error("la cola está llena (máximo {max} canciones)")]
    QueueFull { max: usize },

    #[error("no se pudo reproducir `{query}`: {source}")]
    ResolutionFailed {
        query: String,
        #[source]
        source: ResolveError,
    },

    #[error(transparent)]
    TransportConnectFailed(#[from] ConnectError),

    #[error("se perdió la conexión de voz: {0}")]
    TransportDropped(String),

    #[error("el volumen debe estar entre 0 y 100, se recibió {0}")]
    InvalidVolume(i64),

    #[error("se descartaron {} canciones seguidas que no se pudieron resolver", failures.len())]
    ConsecutiveResolutionFailureLimitExceeded { failures: Vec<FailedResolution> },
}

impl SessionError {
    /// Short title used for user-facing error embeds.
    pub fn title(&self) -> &'static str {
        match self {
            Self::NoActiveSession => "Sin sesión",
            Self::QueueEmpty => "Nada que hacer",
            Self::QueueFull { .. } => "Cola llena",
            Self::ResolutionFailed { .. } => "No se pudo reproducir",
            Self::TransportConnectFailed(_) => "Error de conexión",
            Self::TransportDropped(_) => "Conexión perdida",
            Self::InvalidVolume(_) => "Volumen inválido",
            Self::ConsecutiveResolutionFailureLimitExceeded { .. } => "Demasiados errores",
        }
    }
}

impl From<FailedResolution> for SessionError {
    fn from(failure: FailedResolution) -> Self {
        SessionError::ResolutionFailed {
            query: failure.query,
            source: failure.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_exceeded_message_counts_failures() {
        let err = SessionError::ConsecutiveResolutionFailureLimitExceeded {
            failures: vec![
                FailedResolution { query: "a".into(), error: ResolveError::RateLimited },
                FailedResolution { query: "b".into(), error: ResolveError::NotFound("b".into()) },
            ],
        };
        assert!(err.to_string().contains("2 canciones"));
    }

    #[test]
    fn connect_error_is_transparent() {
        let err: SessionError = ConnectError::TimedOut(15).into();
        assert_eq!(err.to_string(), ConnectError::TimedOut(15).to_string());
        assert_eq!(err.title(), "Error de conexión");
    }
}
