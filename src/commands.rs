use std::{fmt::Write, sync::Arc};

use futures::StreamExt;

use crate::{
    bot::Bot,
    command::{CommandDescriptor, Invocation, Router, handler},
    permission::PermissionError,
    player::PlayerError,
    queue::{QueueError, QueueItem},
    resolver::ResolveError,
    transport::TransportError,
};

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error(transparent)]
    Player(#[from] PlayerError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Unsupported(String),
}

/// Router with every built-in command registered.
pub fn router() -> Router {
    let mut router = Router::new();
    router.register(builtin());
    router
}

pub fn builtin() -> Vec<CommandDescriptor> {
    vec![
        CommandDescriptor::new("join", ["join", "j"], handler(join)).no_arguments(),
        CommandDescriptor::new("quit", ["quit", "leave"], handler(quit)).no_arguments(),
        CommandDescriptor::new("queue", ["queue", "q", "p"], handler(queue)).arguments(1, None),
        CommandDescriptor::new("search", ["search", "s", "find"], handler(search))
            .arguments(1, None),
        CommandDescriptor::new("queueList", ["queuelist", "qlist", "ql"], handler(queue_list))
            .arguments(1, None),
        CommandDescriptor::new("skip", ["skip"], handler(skip)).no_arguments(),
        CommandDescriptor::new("pause", ["pause", "resume"], handler(pause)).no_arguments(),
        CommandDescriptor::new("stop", ["stop"], handler(stop)).no_arguments(),
        CommandDescriptor::new("playlist", ["playlist", "list", "pls"], handler(playlist))
            .no_arguments(),
        CommandDescriptor::new("move", ["move", "mov", "m"], handler(move_item))
            .arguments(1, Some(2)),
        CommandDescriptor::new("remove", ["remove", "rem", "r"], handler(remove))
            .arguments(1, Some(1)),
        CommandDescriptor::new("info", ["info", "i"], handler(info)).arguments(0, Some(1)),
        CommandDescriptor::new("setPermissions", ["setperm"], handler(set_permissions))
            .deny_by_default()
            .arguments(3, Some(3)),
    ]
}

/// Parses a 1-based position as typed by users.
fn position(raw: &str) -> Result<i64, CommandError> {
    raw.parse()
        .map_err(|_| CommandError::InvalidArgument(format!("{raw} is not a number")))
}

fn index(raw: &str) -> Result<usize, CommandError> {
    match position(raw)? {
        n if n >= 1 => Ok((n - 1) as usize),
        _ => Err(CommandError::InvalidArgument(format!(
            "{raw} is not a valid position"
        ))),
    }
}

async fn join(bot: Arc<Bot>, inv: Invocation) -> Result<(), CommandError> {
    let channel = bot
        .transport()
        .voice_channel_of(&inv.message.author.id)
        .await?
        .ok_or(TransportError::NoVoiceChannel)?;
    bot.join(&channel).await?;
    Ok(())
}

async fn quit(bot: Arc<Bot>, _inv: Invocation) -> Result<(), CommandError> {
    bot.quit().await
}

async fn queue(bot: Arc<Bot>, inv: Invocation) -> Result<(), CommandError> {
    let player = bot.player().await?;
    for link in inv.args() {
        match bot.resolver().resolve(link).await {
            Ok(resolved) => {
                player
                    .add([resolved.into_item(&inv.message.author.name)])
                    .await?
            }
            Err(err) => {
                tracing::info!(link = %link, "no match: {err}");
                bot.reply(&inv.message, &format!("No video matched: {link}"))
                    .await;
            }
        }
    }
    Ok(())
}

async fn search(bot: Arc<Bot>, inv: Invocation) -> Result<(), CommandError> {
    let player = bot.player().await?;
    let query = inv.args().join(" ");
    let resolved = bot.resolver().search(&query).await?;
    let title = resolved.info.title.clone();
    player
        .add([resolved.into_item(&inv.message.author.name)])
        .await?;
    bot.reply(&inv.message, &format!("Queued: {title}")).await;
    Ok(())
}

async fn queue_list(bot: Arc<Bot>, inv: Invocation) -> Result<(), CommandError> {
    let player = bot.player().await?;
    for reference in inv.args() {
        let mut entries = match bot.resolver().playlist(reference).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::info!(reference = %reference, "playlist failed: {err}");
                bot.reply(&inv.message, &format!("Error: {err}")).await;
                continue;
            }
        };

        let (mut queued, mut skipped) = (0usize, 0usize);
        while let Some(entry) = entries.next().await {
            match entry {
                Ok(resolved) => {
                    player
                        .add([resolved.into_item(&inv.message.author.name)])
                        .await?;
                    queued += 1;
                }
                Err(err) => {
                    tracing::warn!(reference = %reference, "skipping playlist entry: {err}");
                    skipped += 1;
                }
            }
        }

        let mut text = format!("Queued {queued} items from {reference}");
        if skipped > 0 {
            let _ = write!(text, " ({skipped} skipped)");
        }
        bot.reply(&inv.message, &text).await;
    }
    Ok(())
}

async fn skip(bot: Arc<Bot>, _inv: Invocation) -> Result<(), CommandError> {
    let player = bot.player().await?;
    if player.is_streaming() {
        tracing::info!("requesting skip");
        player.skip().await?;
    }
    Ok(())
}

async fn pause(bot: Arc<Bot>, _inv: Invocation) -> Result<(), CommandError> {
    bot.player().await?.pause().await?;
    Ok(())
}

async fn stop(bot: Arc<Bot>, _inv: Invocation) -> Result<(), CommandError> {
    bot.player().await?.stop().await?;
    Ok(())
}

async fn playlist(bot: Arc<Bot>, inv: Invocation) -> Result<(), CommandError> {
    let player = bot.player().await?;
    let (items, remaining) = player
        .queue()
        .get_first_n(bot.config().queue_preview)?;
    bot.reply(&inv.message, &format_playlist(&items, remaining))
        .await;
    Ok(())
}

fn format_playlist(items: &[Arc<QueueItem>], remaining: usize) -> String {
    let mut text = String::new();
    for (i, item) in items.iter().enumerate() {
        let _ = writeln!(text, "{}. {}", i + 1, item.info.title);
    }
    if remaining > 0 {
        let _ = writeln!(text, "+ {remaining} more...");
    }
    text
}

async fn move_item(bot: Arc<Bot>, inv: Invocation) -> Result<(), CommandError> {
    let player = bot.player().await?;
    let from = index(inv.arg(0).unwrap_or_default())?;
    let to = match inv.arg(1) {
        Some(raw) => index(raw)?,
        None => 1,
    };
    player.queue().move_item(from, to)?;
    Ok(())
}

async fn remove(bot: Arc<Bot>, inv: Invocation) -> Result<(), CommandError> {
    let player = bot.player().await?;
    let n = position(inv.arg(0).unwrap_or_default())?;
    match n {
        ..=0 => {}
        1 => {
            return Err(CommandError::Unsupported(
                "Cannot remove currently playing song".to_string(),
            ));
        }
        n => {
            player.queue().remove((n - 1) as usize)?;
        }
    }
    Ok(())
}

async fn info(bot: Arc<Bot>, inv: Invocation) -> Result<(), CommandError> {
    let player = bot.player().await?;
    let i = match inv.arg(0) {
        Some(raw) => index(raw)?,
        None => 0,
    };

    let item = player.queue().get(i)?;
    let text = format!(
        "Title: {}\nRequested by: {}\nLength: {}\nLink: {}",
        item.info.title,
        item.requested_by,
        item.info.display_duration(),
        item.info.link,
    );
    bot.reply(&inv.message, &text).await;
    Ok(())
}

async fn set_permissions(bot: Arc<Bot>, inv: Invocation) -> Result<(), CommandError> {
    let user = inv
        .message
        .mentions
        .first()
        .ok_or_else(|| CommandError::InvalidArgument("No user specified".to_string()))?;
    let capability = inv.arg(1).unwrap_or_default();
    let value = match inv.arg(2).unwrap_or_default() {
        "true" => true,
        "false" => false,
        other => {
            return Err(CommandError::InvalidArgument(format!(
                "{other} is not true or false"
            )));
        }
    };

    bot.permissions().set(user, capability, value)?;
    bot.reply(&inv.message, "Permission set!").await;
    Ok(())
}
