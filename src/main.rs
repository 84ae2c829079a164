use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use symphony::{
    audio::{PlaybackContext, SessionRegistry},
    bot::{voice::SongbirdTransport, SymphonyBot},
    cache::StreamCache,
    config::Config,
    sources::YtDlpResolver,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("symphony=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Symphony v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    // Resolver de YouTube/SoundCloud con su cache de streams
    let cache = Arc::new(StreamCache::new(
        config.stream_cache_size,
        config.stream_cache_ttl(),
    ));
    let resolver = YtDlpResolver::new(config.ytdlp_path.clone(), cache.clone());
    match resolver.verify().await {
        Ok(version) => info!("✅ yt-dlp {}", version),
        Err(e) => warn!("⚠️ yt-dlp no disponible, /play va a fallar: {:?}", e),
    }

    // Transporte de voz
    let songbird = Songbird::serenity();
    let transport = SongbirdTransport::new(songbird.clone(), reqwest::Client::new());

    let registry = Arc::new(SessionRegistry::new(PlaybackContext::new(
        Arc::new(resolver),
        Arc::new(transport),
        config.session_policy()?,
    )));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let shutdown = CancellationToken::new();
    let handler = SymphonyBot::new(
        config.clone(),
        registry.clone(),
        cache,
        songbird.clone(),
        shutdown.clone(),
    );

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        shutdown.cancel();
        registry.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}
