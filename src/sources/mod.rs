//! # Sources Module
//!
//! Track resolution for YouTube and SoundCloud through `yt-dlp`.
//!
//! Free-text queries become provider searches (`ytsearch1:` / `scsearch1:`);
//! links are accepted only from the hosts in [`ALLOWED_HOSTS`]. The actual
//! invocation and the stream-locator cache live in [`ytdlp`].

pub mod ytdlp;

use url::Url;

use crate::{
    audio::track::{Provider, TrackRequest},
    error::ResolveError,
};

pub use ytdlp::YtDlpResolver;

/// Hosts aceptados para enlaces directos
pub const ALLOWED_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtu.be",
    "soundcloud.com",
    "on.soundcloud.com",
    "m.soundcloud.com",
];

/// Verifica si un enlace apunta a un sitio soportado y tiene ruta.
pub fn is_allowed_url(candidate: &str) -> bool {
    let Ok(url) = Url::parse(candidate) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    if url.path().trim_matches('/').is_empty() {
        return false;
    }
    url.host_str()
        .is_some_and(|host| ALLOWED_HOSTS.contains(&host.to_ascii_lowercase().as_str()))
}

/// Lo que se le pasa a yt-dlp para una petición.
pub fn search_target(request: &TrackRequest) -> Result<String, ResolveError> {
    let query = request.query.trim();
    if query.is_empty() {
        return Err(ResolveError::NotFound(String::new()));
    }

    if query.starts_with("http") {
        if is_allowed_url(query) {
            return Ok(query.to_string());
        }
        return Err(ResolveError::NotFound(query.to_string()));
    }

    let prefix = match request.provider {
        Provider::YouTube => "ytsearch1",
        Provider::SoundCloud => "scsearch1",
    };
    Ok(format!("{}:{}", prefix, query))
}

/// Clasifica el stderr de yt-dlp.
pub fn classify_failure(query: &str, stderr: &str) -> ResolveError {
    let lower = stderr.to_lowercase();

    if lower.contains("429") || lower.contains("too many requests") || lower.contains("rate limit") {
        return ResolveError::RateLimited;
    }
    if lower.contains("403") || lower.contains("forbidden") {
        return ResolveError::ProviderUnavailable(
            "el proveedor rechazó la solicitud (403)".to_string(),
        );
    }
    if ["404", "not found", "unavailable"]
        .iter()
        .any(|token| lower.contains(token))
    {
        return ResolveError::NotFound(query.to_string());
    }

    let detail = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("yt-dlp terminó con error")
        .trim()
        .to_string();
    ResolveError::Unknown(detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::track::Requester;
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;

    fn request(query: &str, provider: Provider) -> TrackRequest {
        TrackRequest::new(query, provider, Requester { id: UserId::new(1), name: "ana".into() })
    }

    #[test]
    fn only_supported_hosts_with_a_path() {
        assert!(is_allowed_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_allowed_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(is_allowed_url("https://soundcloud.com/artist/track"));
        assert!(!is_allowed_url("https://soundcloud.com/"));
        assert!(!is_allowed_url("https://evil.example/watch?v=1"));
        assert!(!is_allowed_url("ftp://youtube.com/watch"));
        assert!(!is_allowed_url("youtube.com/watch?v=1"));
    }

    #[test]
    fn free_text_becomes_a_provider_search() {
        assert_eq!(
            search_target(&request("  lofi beats ", Provider::YouTube)),
            Ok("ytsearch1:lofi beats".to_string())
        );
        assert_eq!(
            search_target(&request("lofi beats", Provider::SoundCloud)),
            Ok("scsearch1:lofi beats".to_string())
        );
        assert_eq!(
            search_target(&request("https://youtu.be/abc", Provider::SoundCloud)),
            Ok("https://youtu.be/abc".to_string())
        );
        assert_eq!(
            search_target(&request("https://evil.example/x", Provider::YouTube)),
            Err(ResolveError::NotFound("https://evil.example/x".to_string()))
        );
    }

    #[test]
    fn stderr_is_classified() {
        assert_eq!(
            classify_failure("q", "ERROR: HTTP Error 429: Too Many Requests"),
            ResolveError::RateLimited
        );
        assert!(matches!(
            classify_failure("q", "ERROR: HTTP Error 403: Forbidden"),
            ResolveError::ProviderUnavailable(_)
        ));
        assert_eq!(
            classify_failure("q", "ERROR: [youtube] abc: Video unavailable"),
            ResolveError::NotFound("q".to_string())
        );
        assert_eq!(
            classify_failure("q", "WARNING: algo\nERROR: se rompió\n"),
            ResolveError::Unknown("ERROR: se rompió".to_string())
        );
    }
}
