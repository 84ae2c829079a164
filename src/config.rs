use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};

use crate::audio::{session::SessionPolicy, track::Volume};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Sesiones
    pub default_volume: u8,
    pub max_queue_size: usize,
    pub max_consecutive_failures: usize,
    pub auto_leave_on_empty: bool,
    pub idle_timeout_secs: u64,
    pub idle_sweep_interval_secs: u64,

    // Tiempos límite
    pub resolve_timeout_secs: u64,
    pub connect_timeout_secs: u64,

    // Resolución
    pub ytdlp_path: String,
    pub stream_cache_ttl_secs: u64,
    pub stream_cache_size: usize,
}

/// Lee una variable opcional; si falta usa `default`, si no se puede
/// interpretar es un error con el nombre de la variable.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .with_context(|| format!("{} inválido: `{}`", key, value)),
        _ => Ok(default),
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN").context("falta DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")
                .context("falta APPLICATION_ID")?
                .parse()
                .context("APPLICATION_ID inválido")?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Sesiones
            default_volume: env_or("DEFAULT_VOLUME", defaults.default_volume)?,
            max_queue_size: env_or("MAX_QUEUE_SIZE", defaults.max_queue_size)?,
            max_consecutive_failures: env_or(
                "MAX_CONSECUTIVE_FAILURES",
                defaults.max_consecutive_failures,
            )?,
            auto_leave_on_empty: env_or("AUTO_LEAVE_ON_EMPTY", defaults.auto_leave_on_empty)?,
            idle_timeout_secs: env_or("IDLE_TIMEOUT_SECS", defaults.idle_timeout_secs)?,
            idle_sweep_interval_secs: env_or(
                "IDLE_SWEEP_INTERVAL_SECS",
                defaults.idle_sweep_interval_secs,
            )?,

            // Tiempos límite
            resolve_timeout_secs: env_or("RESOLVE_TIMEOUT_SECS", defaults.resolve_timeout_secs)?,
            connect_timeout_secs: env_or("CONNECT_TIMEOUT_SECS", defaults.connect_timeout_secs)?,

            // Resolución
            ytdlp_path: env_or("YTDLP_PATH", defaults.ytdlp_path)?,
            stream_cache_ttl_secs: env_or("STREAM_CACHE_TTL_SECS", defaults.stream_cache_ttl_secs)?,
            stream_cache_size: env_or("STREAM_CACHE_SIZE", defaults.stream_cache_size)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0 and 100
    /// - Queue, cache and failure limits must be greater than 0
    /// - Timeouts and sweep interval must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.default_volume > 100 {
            anyhow::bail!("Default volume must be between 0 and 100, got: {}", self.default_volume);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_consecutive_failures == 0 {
            anyhow::bail!("Max consecutive failures must be greater than 0");
        }

        if self.stream_cache_size == 0 {
            anyhow::bail!("Stream cache size must be greater than 0");
        }

        if self.resolve_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            anyhow::bail!("Timeouts must be greater than 0");
        }

        if self.idle_sweep_interval_secs == 0 {
            anyhow::bail!("Idle sweep interval must be greater than 0");
        }

        if self.ytdlp_path.trim().is_empty() {
            anyhow::bail!("YTDLP_PATH cannot be empty");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Never includes the Discord token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Sessions: {}% vol, {} queue, {} failures max, auto-leave={}\n  \
            Idle: {}s timeout, sweep every {}s\n  \
            Timeouts: resolve {}s, connect {}s\n  \
            Stream cache: {} entries, {}s TTL ({})",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.default_volume,
            self.max_queue_size,
            self.max_consecutive_failures,
            self.auto_leave_on_empty,
            self.idle_timeout_secs,
            self.idle_sweep_interval_secs,
            self.resolve_timeout_secs,
            self.connect_timeout_secs,
            self.stream_cache_size,
            self.stream_cache_ttl_secs,
            self.ytdlp_path,
        )
    }

    /// Reglas para el núcleo de reproducción
    pub fn session_policy(&self) -> Result<SessionPolicy> {
        Ok(SessionPolicy {
            default_volume: Volume::try_from(i64::from(self.default_volume))?,
            max_queue_size: self.max_queue_size,
            max_consecutive_failures: self.max_consecutive_failures,
            auto_leave_on_empty: self.auto_leave_on_empty,
            resolve_timeout: Duration::from_secs(self.resolve_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        })
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn idle_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.idle_sweep_interval_secs)
    }

    pub fn stream_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.stream_cache_ttl_secs)
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            // Session defaults
            default_volume: 100,
            max_queue_size: 1000,
            max_consecutive_failures: 3,
            auto_leave_on_empty: false,
            idle_timeout_secs: 300,     // 5 minutos
            idle_sweep_interval_secs: 30,

            resolve_timeout_secs: 30,
            connect_timeout_secs: 15,

            ytdlp_path: "yt-dlp".to_string(),
            stream_cache_ttl_secs: 900, // 15 minutos
            stream_cache_size: 128,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        let policy = config.session_policy().unwrap();
        assert_eq!(policy.default_volume, Volume::MAX);
        assert_eq!(policy.max_consecutive_failures, 3);
        assert!(!policy.auto_leave_on_empty);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let config = Config {
            default_volume: 150,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            max_consecutive_failures: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn summary_hides_the_token() {
        let config = Config {
            discord_token: "super-secreto".into(),
            ..Config::default()
        };
        assert!(!config.summary().contains("super-secreto"));
    }
}
