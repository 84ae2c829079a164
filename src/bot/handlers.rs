use anyhow::Result;
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use crate::{
    audio::{
        command::{Command, CommandOutcome},
        track::{Provider, Requester, TrackRequest},
        transport::VoiceEndpoint,
    },
    bot::SymphonyBot,
    error::SessionError,
    ui::embeds,
};

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &SymphonyBot,
) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        let embed = embeds::create_error_embed(
            "Solo en servidores",
            "Los comandos de música solo funcionan dentro de un servidor",
        );
        return respond(ctx, &command, embed, true).await;
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id).await?,
        "skip" => {
            // saltar puede resolver la siguiente canción
            defer(ctx, &command).await?;
            let result = bot.registry.execute(guild_id, Command::Skip).await;
            edit(ctx, &command, result_embed(&result)).await?;
        }
        "pause" => run_and_respond(ctx, &command, bot, guild_id, Command::Pause).await?,
        "resume" => run_and_respond(ctx, &command, bot, guild_id, Command::Resume).await?,
        "stop" => run_and_respond(ctx, &command, bot, guild_id, Command::Stop).await?,
        "leave" => {
            let disconnected = bot.leave_guild(guild_id).await;
            let result = Ok(CommandOutcome::Left { disconnected });
            respond(ctx, &command, result_embed(&result), false).await?
        }
        "volume" => {
            let level = integer_option(&command, "level")
                .ok_or_else(|| anyhow::anyhow!("Nivel de volumen no proporcionado"))?;
            run_and_respond(ctx, &command, bot, guild_id, Command::SetVolume(level)).await?
        }
        "queue" => handle_queue(ctx, &command, bot, guild_id).await?,
        "nowplaying" => handle_nowplaying(ctx, &command, bot, guild_id).await?,
        _ => {
            let embed = embeds::create_error_embed("Comando desconocido", "❌ Comando no reconocido");
            respond(ctx, &command, embed, true).await?;
        }
    }

    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &SymphonyBot,
    guild_id: GuildId,
) -> Result<()> {
    let query = string_option(command, "query")
        .ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?;
    let provider = Provider::detect(string_option(command, "provider").unwrap_or("auto"), query);

    // Verificar que el usuario esté en un canal de voz
    let Some(channel_id) = get_user_voice_channel(ctx, guild_id, command.user.id) else {
        let embed = embeds::create_error_embed(
            "Sin canal de voz",
            "Debes estar en un canal de voz para usar `/play`",
        );
        return respond(ctx, command, embed, true).await;
    };

    // Defer la respuesta ya que puede tomar tiempo
    defer(ctx, command).await?;

    // Los avisos de esta guild van al último canal que pidió música
    bot.announce_in(guild_id, command.channel_id);

    let requester = Requester {
        id: command.user.id,
        name: requester_name(command),
    };
    let request = TrackRequest::new(query, provider, requester);
    let endpoint = VoiceEndpoint {
        guild_id,
        channel_id,
    };

    let result = bot
        .registry
        .execute(guild_id, Command::Play { request, endpoint })
        .await;
    edit(ctx, command, result_embed(&result)).await
}

async fn handle_queue(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &SymphonyBot,
    guild_id: GuildId,
) -> Result<()> {
    let page = integer_option(command, "page")
        .and_then(|page| usize::try_from(page).ok())
        .unwrap_or(1);

    let embed = match bot.registry.view(guild_id) {
        Some(view) => embeds::create_queue_embed(&view, page),
        None => embeds::session_error_embed(&SessionError::NoActiveSession),
    };
    respond(ctx, command, embed, false).await
}

async fn handle_nowplaying(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &SymphonyBot,
    guild_id: GuildId,
) -> Result<()> {
    let embed = match bot.registry.view(guild_id) {
        Some(view) => embeds::create_now_playing_view_embed(&view),
        None => embeds::session_error_embed(&SessionError::NoActiveSession),
    };
    respond(ctx, command, embed, false).await
}

/// Comandos rápidos: se ejecutan y se responden sin defer
async fn run_and_respond(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &SymphonyBot,
    guild_id: GuildId,
    action: Command,
) -> Result<()> {
    let result = bot.registry.execute(guild_id, action).await;
    let ephemeral = result.is_err();
    respond(ctx, command, result_embed(&result), ephemeral).await
}

fn result_embed(result: &Result<CommandOutcome, SessionError>) -> CreateEmbed {
    match result {
        Ok(outcome) => embeds::outcome_embed(outcome),
        Err(e) => {
            warn!("⚠️ Comando rechazado: {}", e);
            embeds::session_error_embed(e)
        }
    }
}

async fn defer(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;
    Ok(())
}

async fn edit(ctx: &Context, command: &CommandInteraction, embed: CreateEmbed) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;
    Ok(())
}

async fn respond(
    ctx: &Context,
    command: &CommandInteraction,
    embed: CreateEmbed,
    ephemeral: bool,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .embed(embed)
                    .ephemeral(ephemeral),
            ),
        )
        .await?;
    Ok(())
}

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn integer_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

/// Apodo en el servidor, o el nombre visible del usuario
fn requester_name(command: &CommandInteraction) -> String {
    command
        .member
        .as_ref()
        .and_then(|member| member.nick.clone())
        .unwrap_or_else(|| command.user.display_name().to_string())
}

/// Obtiene el canal de voz del usuario
fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}
