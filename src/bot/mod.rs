//! # Bot Module
//!
//! Discord front end for Symphony.
//!
//! This module contains everything that talks to Discord:
//! - Slash command registration ([`commands`]) and handling ([`handlers`])
//! - The songbird voice adapter ([`voice`]) and its event handlers ([`events`])
//! - Background tasks: idle sweeping, stream cache cleanup and posting
//!   session notices to text channels
//!
//! ## Architecture
//!
//! [`SymphonyBot`] implements Serenity's [`EventHandler`] trait. Interactions
//! are translated into [`Command`](crate::audio::Command)s and executed on
//! the [`SessionRegistry`]; nothing here touches playback state directly.
//! Transitions that no command triggered (a track ending on its own, a
//! dropped voice connection, idle teardown) come back as
//! [`SessionNotice`](crate::audio::SessionNotice)s and are posted to the
//! text channel that last asked for music in the guild.

use anyhow::Result;
use dashmap::DashMap;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Http, Interaction, Ready, VoiceState},
    async_trait,
    builder::CreateMessage,
};
use songbird::Songbird;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod events;
pub mod handlers;
pub mod voice;

use crate::{
    audio::{NoticeKind, SessionNotice, SessionRegistry},
    cache::StreamCache,
    config::Config,
    ui::embeds,
};

/// Main Discord handler.
///
/// Owns nothing playback-related itself: sessions live in the registry,
/// and the songbird manager is only consulted to find the bot's current
/// voice channel.
pub struct SymphonyBot {
    config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    cache: Arc<StreamCache>,
    songbird: Arc<Songbird>,
    /// Canal de texto para los avisos de cada guild
    announce_channels: Arc<DashMap<GuildId, ChannelId>>,
    background_started: AtomicBool,
    shutdown: CancellationToken,
}

impl SymphonyBot {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<SessionRegistry>,
        cache: Arc<StreamCache>,
        songbird: Arc<Songbird>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            registry,
            cache,
            songbird,
            announce_channels: Arc::new(DashMap::new()),
            background_started: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Recuerda dónde publicar los avisos de la guild
    pub fn announce_in(&self, guild_id: GuildId, channel_id: ChannelId) {
        self.announce_channels.insert(guild_id, channel_id);
    }

    /// Sale de la guild y olvida su canal de avisos
    pub async fn leave_guild(&self, guild_id: GuildId) -> bool {
        self.announce_channels.remove(&guild_id);
        self.registry.leave(guild_id).await
    }

    /// Registers slash commands with Discord.
    ///
    /// With `GUILD_ID` set the commands are registered on that guild only,
    /// which propagates in about a second; otherwise they are global.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);
                let guild_id = GuildId::new(guild_id);

                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }

    /// Canal de voz donde está el bot en la guild, según songbird
    async fn bot_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        let call = self.songbird.get(guild_id)?;
        let channel = call.lock().await.current_channel()?;
        Some(ChannelId::from(channel.0))
    }

    fn start_background_tasks(&self, http: Arc<Http>) {
        if self.background_started.swap(true, Ordering::AcqRel) {
            return;
        }

        self.registry.spawn_idle_sweeper(
            self.config.idle_timeout(),
            self.config.idle_sweep_interval(),
            self.shutdown.clone(),
        );

        tokio::spawn(maintenance_tasks(
            self.config.clone(),
            self.cache.clone(),
            self.shutdown.clone(),
        ));

        tokio::spawn(post_notices(
            http,
            self.registry.clone(),
            self.announce_channels.clone(),
            self.shutdown.clone(),
        ));
    }
}

#[async_trait]
impl EventHandler for SymphonyBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        // Registrar comandos
        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        // Iniciar tareas de mantenimiento
        self.start_background_tasks(ctx.http.clone());
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };
        if !self.registry.contains(guild_id) {
            return;
        }

        let Some(bot_channel) = self.bot_channel(guild_id).await else {
            return;
        };

        // Solo interesa alguien saliendo del canal del bot
        let previous = old.as_ref().and_then(|state| state.channel_id);
        if previous != Some(bot_channel) || new.channel_id == Some(bot_channel) {
            return;
        }

        match count_listeners(&ctx, guild_id, bot_channel) {
            Some(0) => {
                info!(
                    "🚪 Canal de voz vacío en guild {}, saliendo",
                    guild_id
                );
                self.leave_guild(guild_id).await;
            }
            Some(listeners) => debug!("👥 Quedan {} oyentes en guild {}", listeners, guild_id),
            None => debug!("Guild {} fuera de caché, no se revisa el canal", guild_id),
        }
    }
}

/// Miembros humanos en el canal de voz
fn count_listeners(ctx: &Context, guild_id: GuildId, channel_id: ChannelId) -> Option<usize> {
    let bot_id = ctx.cache.current_user().id;
    let guild = guild_id.to_guild_cached(&ctx.cache)?;

    let listeners = guild
        .voice_states
        .values()
        .filter(|state| state.channel_id == Some(channel_id))
        .filter(|state| state.user_id != bot_id)
        .filter(|state| !state.member.as_ref().is_some_and(|member| member.user.bot))
        .count();

    Some(listeners)
}

async fn maintenance_tasks(config: Arc<Config>, cache: Arc<StreamCache>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(config.stream_cache_ttl().min(config.idle_sweep_interval()));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        // Limpiar streams vencidos
        let removed = cache.cleanup_expired();
        if removed > 0 {
            debug!("🧹 {} streams vencidos quitados del cache", removed);
        }
    }

    debug!("Tareas de mantenimiento detenidas");
}

/// Publica los avisos de las sesiones en el canal de texto de cada guild
async fn post_notices(
    http: Arc<Http>,
    registry: Arc<SessionRegistry>,
    channels: Arc<DashMap<GuildId, ChannelId>>,
    shutdown: CancellationToken,
) {
    let mut notices = registry.subscribe();

    loop {
        let notice: SessionNotice = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = notices.recv() => match received {
                Ok(notice) => notice,
                Err(RecvError::Lagged(missed)) => {
                    warn!("⚠️ Se perdieron {} avisos de sesión", missed);
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };

        let Some(channel_id) = notice_channel(&channels, &notice) else {
            debug!("Sin canal de avisos para guild {}", notice.guild_id);
            continue;
        };

        let message = CreateMessage::new().embed(embeds::notice_embed(&notice.kind));
        if let Err(e) = channel_id.send_message(&*http, message).await {
            warn!(
                "No se pudo publicar aviso en guild {}: {:?}",
                notice.guild_id, e
            );
        }
    }

    debug!("Publicación de avisos detenida");
}

/// Canal donde publicar `notice`. El cierre por inactividad es el último
/// aviso de la sesión, así que se lleva el canal consigo.
fn notice_channel(
    channels: &DashMap<GuildId, ChannelId>,
    notice: &SessionNotice,
) -> Option<ChannelId> {
    match notice.kind {
        NoticeKind::IdleTimeout => channels.remove(&notice.guild_id).map(|(_, channel)| channel),
        _ => channels.get(&notice.guild_id).map(|entry| *entry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(guild: u64, kind: NoticeKind) -> SessionNotice {
        SessionNotice {
            guild_id: GuildId::new(guild),
            kind,
        }
    }

    #[test]
    fn idle_timeout_forgets_the_channel() {
        let channels = DashMap::new();
        channels.insert(GuildId::new(1), ChannelId::new(10));
        channels.insert(GuildId::new(2), ChannelId::new(20));

        assert_eq!(
            notice_channel(&channels, &notice(1, NoticeKind::QueueFinished)),
            Some(ChannelId::new(10))
        );
        assert_eq!(channels.len(), 2);

        assert_eq!(
            notice_channel(&channels, &notice(1, NoticeKind::IdleTimeout)),
            Some(ChannelId::new(10))
        );
        assert!(!channels.contains_key(&GuildId::new(1)));
        assert_eq!(notice_channel(&channels, &notice(1, NoticeKind::QueueFinished)), None);
        assert_eq!(channels.len(), 1);
    }
}
