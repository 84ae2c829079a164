use std::fmt;

use crate::{
    audio::{
        track::{ResolvedTrack, TrackRequest, Volume},
        transport::VoiceEndpoint,
    },
    error::FailedResolution,
};

/// Comandos que acepta una sesión.
///
/// El conjunto es cerrado: agregar un comando obliga a tratarlo en
/// [`SessionRegistry::execute`](crate::audio::registry::SessionRegistry::execute).
#[derive(Debug, Clone)]
pub enum Command {
    Play {
        request: TrackRequest,
        endpoint: VoiceEndpoint,
    },
    Skip,
    Pause,
    Resume,
    Stop,
    Leave,
    SetVolume(i64),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Play { .. } => "play",
            Self::Skip => "skip",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Stop => "stop",
            Self::Leave => "leave",
            Self::SetVolume(_) => "volume",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Play { request, .. } => write!(f, "play `{}` ({})", request.query, request.provider),
            Self::SetVolume(value) => write!(f, "volume {}", value),
            other => f.write_str(other.name()),
        }
    }
}

/// Resultado exitoso de un comando, con lo necesario para mostrarlo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// La petición empezó a sonar; `skipped` son las que fallaron antes
    NowPlaying {
        track: ResolvedTrack,
        skipped: Vec<FailedResolution>,
    },
    Queued {
        position: usize,
        title: String,
    },
    /// Un comando posterior (`skip`, `stop`, `leave`) ganó a esta activación
    Superseded {
        query: String,
    },
    Skipped {
        skipped: String,
        now_playing: Option<ResolvedTrack>,
        failed: Vec<FailedResolution>,
    },
    Paused,
    Resumed,
    Stopped {
        cleared: usize,
    },
    VolumeSet(Volume),
    Left {
        disconnected: bool,
    },
}
