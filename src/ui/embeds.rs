use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{
    audio::{
        command::CommandOutcome,
        session::{NoticeKind, PlaybackState, SessionView},
        track::{QueueEntry, ResolvedTrack},
    },
    error::{FailedResolution, SessionError},
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Symphony";

const ITEMS_PER_PAGE: usize = 10;

/// Embed para la respuesta de un comando exitoso
pub fn outcome_embed(outcome: &CommandOutcome) -> CreateEmbed {
    match outcome {
        CommandOutcome::NowPlaying { track, skipped } => {
            with_skipped(create_now_playing_embed(track), skipped)
        }
        CommandOutcome::Queued { position, title } => create_success_embed(
            "Agregada a la cola",
            &format!("**{}** quedó en la posición **{}**", escape_markdown(title), position),
        ),
        CommandOutcome::Superseded { query } => create_info_embed(
            "Petición reemplazada",
            &format!(
                "`{}` no llegó a sonar: otro comando cambió la reproducción",
                escape_markdown(query)
            ),
        ),
        CommandOutcome::Skipped {
            skipped,
            now_playing,
            failed,
        } => {
            let skipped = format!("⏭️ Saltada: **{}**", escape_markdown(skipped));
            match now_playing {
                Some(track) => with_skipped(create_now_playing_embed(track), failed)
                    .description(format!(
                        "{}\n\n**{}**",
                        skipped,
                        escape_markdown(&track.title)
                    )),
                None => create_info_embed("Canción saltada", &format!("{}\n\nLa cola está vacía", skipped)),
            }
        }
        CommandOutcome::Paused => create_success_embed("Pausado", "⏸️ Reproducción pausada"),
        CommandOutcome::Resumed => create_success_embed("Reanudado", "▶️ Reproducción reanudada"),
        CommandOutcome::Stopped { cleared } => create_success_embed(
            "Detenido",
            &format!("⏹️ Reproducción detenida, {} canciones quitadas de la cola", cleared),
        ),
        CommandOutcome::VolumeSet(volume) => create_success_embed(
            "Volumen",
            &format!("{} Volumen ajustado a **{}**", volume_emoji(volume.percent()), volume),
        ),
        CommandOutcome::Left { disconnected } => {
            if *disconnected {
                create_success_embed("Desconectado", "👋 Cola limpiada y canal de voz liberado")
            } else {
                create_info_embed("Sin sesión", "No estaba conectado en este servidor")
            }
        }
    }
}

/// Embed para un error de sesión
pub fn session_error_embed(error: &SessionError) -> CreateEmbed {
    let mut description = escape_markdown(&error.to_string());
    if let SessionError::ConsecutiveResolutionFailureLimitExceeded { failures } = error {
        description.push_str("\n\n");
        description.push_str(&failure_list(failures));
    }
    create_error_embed(error.title(), &description)
}

/// Embed para un aviso en segundo plano
pub fn notice_embed(kind: &NoticeKind) -> CreateEmbed {
    match kind {
        NoticeKind::NowPlaying(track) => create_now_playing_embed(track),
        NoticeKind::Failed(error) => session_error_embed(error),
        NoticeKind::QueueFinished => create_info_embed(
            "Cola terminada",
            "📭 No quedan canciones. Usa `/play` para seguir escuchando",
        ),
        NoticeKind::TransportDropped { interrupted } => {
            let detail = match interrupted {
                Some(title) => format!("Se interrumpió **{}**.", escape_markdown(title)),
                None => String::new(),
            };
            CreateEmbed::default()
                .title("🔌 Conexión de voz perdida")
                .description(format!("{} La cola se conserva: usa `/play` para reconectar", detail))
                .color(colors::WARNING_ORANGE)
                .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
                .timestamp(Timestamp::now())
        }
        NoticeKind::IdleTimeout => create_info_embed(
            "Desconectado por inactividad",
            "💤 No hubo actividad durante un rato, salí del canal de voz",
        ),
    }
}

/// Crea un embed para mostrar la canción actual
pub fn create_now_playing_embed(track: &ResolvedTrack) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", escape_markdown(&track.title)))
        .color(colors::SUCCESS_GREEN);

    embed = match track.duration {
        Some(duration) => embed.field("⏱️ Duración", format_duration(duration), true),
        None => embed.field("⏱️ Duración", "🔴 En vivo", true),
    };

    embed = embed
        .field("👤 Solicitado por", format!("<@{}>", track.request.requested_by.id), true)
        .field("🔗 Fuente", track.request.provider.as_str(), true);

    if let Some(thumbnail) = &track.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }
    if let Some(page_url) = &track.page_url {
        embed = embed.url(page_url);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(format!(
            "Solicitado por {}",
            track.request.requested_by.name
        )))
}

/// Crea un embed para `/nowplaying`
pub fn create_now_playing_view_embed(view: &SessionView) -> CreateEmbed {
    let Some(entry) = &view.now_playing else {
        return create_info_embed("Nada sonando", "😴 No hay nada reproduciéndose");
    };

    let mut embed = match &entry.resolved {
        Some(track) => create_now_playing_embed(track),
        None => CreateEmbed::default()
            .title("⏳ Preparando")
            .description(format!("**{}**", escape_markdown(entry.title())))
            .color(colors::WARNING_ORANGE)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER)),
    };

    embed = embed
        .field("📡 Estado", state_label(view.state), true)
        .field("🔊 Volumen", view.volume.to_string(), true)
        .field("📋 En cola", view.queue.len().to_string(), true);

    embed
}

/// Crea un embed para mostrar la cola de reproducción
pub fn create_queue_embed(view: &SessionView, page: usize) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE);

    if view.now_playing.is_none() && view.queue.is_empty() {
        return embed
            .description("😴 **La cola está vacía**\n\n💡 Usa `/play <canción>` para agregar música")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    // Canción actual
    if let Some(current) = &view.now_playing {
        let status = match view.state {
            PlaybackState::Paused => "⏸️",
            PlaybackState::Connecting => "⏳",
            _ => "▶️",
        };
        embed = embed.field(
            format!("{} Reproduciendo", status),
            entry_line(current),
            false,
        );
    }

    // Próximas canciones
    let queue_page = view.queue.page(page, ITEMS_PER_PAGE);
    if !queue_page.items.is_empty() {
        let description: String = queue_page
            .items
            .iter()
            .enumerate()
            .map(|(i, entry)| format!("**{}**. {}\n", queue_page.first_position + i, entry_line(entry)))
            .collect();

        embed = embed.field("Próximas canciones", description, false);
    }

    // Información adicional
    let mut info = format!("**Total:** {} canciones en cola", view.queue.len());
    info.push_str(&format!(" • **Volumen:** {}", view.volume));
    embed = embed.field("Información", info, false);

    // Paginación
    if queue_page.total_pages > 1 {
        embed = embed.footer(CreateEmbedFooter::new(format!(
            "Página {} de {} • Symphony",
            queue_page.current_page, queue_page.total_pages
        )));
    } else {
        embed = embed.footer(CreateEmbedFooter::new(STANDARD_FOOTER));
    }

    embed.timestamp(Timestamp::now())
}

/// Crea un embed de error
pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de éxito
pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de información
pub fn create_info_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("ℹ️ {}", title))
        .description(description)
        .color(colors::MUSIC_PURPLE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

fn with_skipped(embed: CreateEmbed, skipped: &[FailedResolution]) -> CreateEmbed {
    if skipped.is_empty() {
        return embed;
    }
    embed.field("⚠️ Omitidas por error", failure_list(skipped), false)
}

fn failure_list(failures: &[FailedResolution]) -> String {
    failures
        .iter()
        .map(|failure| format!("• `{}`: {}", escape_markdown(&failure.query), failure.error))
        .collect::<Vec<_>>()
        .join("\n")
}

fn entry_line(entry: &QueueEntry) -> String {
    let duration = entry
        .resolved
        .as_ref()
        .and_then(|track| track.duration)
        .map(|duration| format!(" `[{}]`", format_duration(duration)))
        .unwrap_or_default();
    format!(
        "{}{} • {}",
        escape_markdown(entry.title()),
        duration,
        entry.request.requested_by.name
    )
}

fn state_label(state: PlaybackState) -> &'static str {
    match state {
        PlaybackState::Idle => "Inactivo",
        PlaybackState::Connecting => "Preparando",
        PlaybackState::Playing => "Reproduciendo",
        PlaybackState::Paused => "En pausa",
        PlaybackState::Stopping => "Cerrando",
    }
}

fn volume_emoji(percent: u8) -> &'static str {
    match percent {
        0 => "🔇",
        1..=33 => "🔈",
        34..=66 => "🔉",
        _ => "🔊",
    }
}

/// Escapa los caracteres con significado en markdown de Discord
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '_' | '`' | '~' | '\\' | '|') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Formatea una duración en formato legible
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolveError;

    #[test]
    fn markdown_is_escaped() {
        assert_eq!(escape_markdown("**hola** _x_"), "\\*\\*hola\\*\\* \\_x\\_");
        assert_eq!(escape_markdown("a|b`c~d\\"), "a\\|b\\`c\\~d\\\\");
        assert_eq!(escape_markdown("sin cambios"), "sin cambios");
    }

    #[test]
    fn durations_are_formatted() {
        assert_eq!(format_duration(Duration::from_secs(59)), "0:59");
        assert_eq!(format_duration(Duration::from_secs(212)), "3:32");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1:02:05");
    }

    #[test]
    fn failure_list_names_each_query() {
        let list = failure_list(&[
            FailedResolution { query: "a_b".into(), error: ResolveError::RateLimited },
            FailedResolution { query: "c".into(), error: ResolveError::NotFound("c".into()) },
        ]);
        assert_eq!(list.lines().count(), 2);
        assert!(list.starts_with("• `a\\_b`"));
    }
}
