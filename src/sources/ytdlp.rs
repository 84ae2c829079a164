use anyhow::Context;
use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{classify_failure, search_target};
use crate::{
    audio::{
        resolver::TrackResolver,
        track::{ResolvedTrack, TrackRequest},
    },
    cache::{StreamCache, StreamKey},
    error::ResolveError,
};

/// Invocaciones simultáneas de yt-dlp
const MAX_CONCURRENT: usize = 3;

/// Límite para un proceso de yt-dlp que no responde
const PROCESS_TIMEOUT: Duration = Duration::from_secs(60);

/// Información extraída de yt-dlp
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    url: Option<String>,
    requested_formats: Option<Vec<Format>>,
    formats: Option<Vec<Format>>,
    entries: Option<Vec<YtDlpInfo>>,
}

#[derive(Debug, Deserialize)]
struct Format {
    url: Option<String>,
    acodec: Option<String>,
    abr: Option<f64>,
}

impl YtDlpInfo {
    /// Resultados de búsqueda vienen envueltos en `entries`
    fn into_first_entry(self) -> Option<YtDlpInfo> {
        match self.entries {
            Some(entries) => entries.into_iter().next(),
            None => Some(self),
        }
    }

    /// URL del mejor formato con audio, por bitrate.
    fn best_stream_url(&self) -> Option<String> {
        self.requested_formats
            .iter()
            .chain(self.formats.iter())
            .flatten()
            .filter(|format| {
                format.url.is_some()
                    && format.acodec.as_deref().is_some_and(|codec| codec != "none")
            })
            .max_by(|a, b| a.abr.unwrap_or(0.0).total_cmp(&b.abr.unwrap_or(0.0)))
            .and_then(|format| format.url.clone())
            .or_else(|| self.url.clone())
    }
}

/// Resolver de YouTube y SoundCloud basado en yt-dlp.
pub struct YtDlpResolver {
    binary: Arc<str>,
    cache: Arc<StreamCache>,
    limiter: Arc<Semaphore>,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<String>, cache: Arc<StreamCache>) -> Self {
        Self {
            binary: Arc::from(binary.into()),
            cache,
            limiter: Arc::new(Semaphore::new(MAX_CONCURRENT)),
        }
    }

    /// Verifica que yt-dlp esté instalado y devuelve su versión
    pub async fn verify(&self) -> anyhow::Result<String> {
        let output = Command::new(&*self.binary)
            .arg("--version")
            .output()
            .await
            .with_context(|| format!("Error al ejecutar {}", self.binary))?;

        if !output.status.success() {
            anyhow::bail!("yt-dlp error: {}", String::from_utf8_lossy(&output.stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn lookup(&self, request: &TrackRequest) -> Result<ResolvedTrack, ResolveError> {
        let target = search_target(request)?;
        let key = StreamKey::new(request.provider, &request.query);

        let binary = self.binary.clone();
        let limiter = self.limiter.clone();
        let owned = request.clone();
        self.cache
            .get_or_resolve(key, move || run_ytdlp(binary, limiter, target, owned))
            .await
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(&self, request: &TrackRequest) -> Result<ResolvedTrack, ResolveError> {
        let track = self.lookup(request).await?;
        // lo cacheado puede venir de otra petición
        Ok(ResolvedTrack {
            request: request.clone(),
            ..track
        })
    }

    fn prefetch(&self, request: &TrackRequest) {
        let Ok(target) = search_target(request) else {
            return;
        };
        let key = StreamKey::new(request.provider, &request.query);
        if self.cache.get(&key).is_some() {
            return;
        }

        let cache = self.cache.clone();
        let binary = self.binary.clone();
        let limiter = self.limiter.clone();
        let owned = request.clone();
        tokio::spawn(async move {
            let query = owned.query.clone();
            match cache
                .get_or_resolve(key, move || run_ytdlp(binary, limiter, target, owned))
                .await
            {
                Ok(track) => debug!("🔥 Precargado: {}", track.title),
                Err(e) => debug!("No se pudo precargar `{}`: {}", query, e),
            }
        });
    }
}

async fn run_ytdlp(
    binary: Arc<str>,
    limiter: Arc<Semaphore>,
    target: String,
    request: TrackRequest,
) -> Result<ResolvedTrack, ResolveError> {
    let _permit = limiter
        .acquire_owned()
        .await
        .map_err(|_| ResolveError::ProviderUnavailable("resolver cerrado".to_string()))?;

    info!("🔍 Resolviendo en {}: {}", request.provider, request.query);

    let mut command = Command::new(&*binary);
    command
        .args([
            "-j",
            "--no-playlist",
            "--no-warnings",
            "-f",
            "bestaudio/best",
            target.as_str(),
        ])
        .kill_on_drop(true);

    let output = match tokio::time::timeout(PROCESS_TIMEOUT, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!("❌ No se pudo ejecutar yt-dlp: {}", e);
            return Err(ResolveError::ProviderUnavailable(format!("yt-dlp: {}", e)));
        }
        Err(_) => return Err(ResolveError::TimedOut(PROCESS_TIMEOUT.as_secs())),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let error = classify_failure(&request.query, &stderr);
        warn!("❌ yt-dlp falló para `{}`: {}", request.query, error);
        return Err(error);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let info = stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .find_map(|line| serde_json::from_str::<YtDlpInfo>(line).ok())
        .and_then(YtDlpInfo::into_first_entry)
        .ok_or_else(|| ResolveError::NotFound(request.query.clone()))?;

    let stream_url = info
        .best_stream_url()
        .ok_or_else(|| ResolveError::Unknown("sin stream de audio".to_string()))?;

    Ok(ResolvedTrack {
        title: info.title.unwrap_or_else(|| "Desconocido".to_string()),
        duration: info
            .duration
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64),
        stream_url,
        page_url: info.webpage_url,
        thumbnail: info.thumbnail,
        request,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_highest_bitrate_audio_format() {
        let info: YtDlpInfo = serde_json::from_str(
            r#"{
                "title": "Canción",
                "duration": 212.0,
                "formats": [
                    {"url": "https://a/video", "acodec": "none", "abr": 0},
                    {"url": "https://a/low", "acodec": "opus", "abr": 48.0},
                    {"url": "https://a/high", "acodec": "opus", "abr": 160.0},
                    {"acodec": "mp4a", "abr": 320.0}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(info.best_stream_url().as_deref(), Some("https://a/high"));
    }

    #[test]
    fn falls_back_to_top_level_url() {
        let info: YtDlpInfo =
            serde_json::from_str(r#"{"title": "x", "url": "https://sc/stream"}"#).unwrap();
        assert_eq!(info.best_stream_url().as_deref(), Some("https://sc/stream"));
    }

    #[test]
    fn search_wrapper_yields_first_entry() {
        let info: YtDlpInfo = serde_json::from_str(
            r#"{"entries": [{"title": "primera", "url": "https://1"}, {"title": "segunda"}]}"#,
        )
        .unwrap();
        let first = info.into_first_entry().unwrap();
        assert_eq!(first.title.as_deref(), Some("primera"));

        let empty: YtDlpInfo = serde_json::from_str(r#"{"entries": []}"#).unwrap();
        assert!(empty.into_first_entry().is_none());
    }
}
