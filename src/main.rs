use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use tanuki::{
    bot::Bot,
    config::BotConfig,
    permission::FilePersister,
    resolver::LocalResolver,
    transport::{Author, ConsoleTransport},
};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

const FRAME_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long, env = "TANUKI_CONFIG")]
    config: Option<PathBuf>,

    /// Enable development mode preset
    #[arg(short, long)]
    dev: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.dev { "tanuki=debug" } else { "tanuki=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(env_filter);
    if args.dev {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true).with_ansi(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    }

    let config = BotConfig::load(args.config.as_deref()).context("loading config")?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    rt.block_on(run(config))
}

async fn run(config: BotConfig) -> anyhow::Result<()> {
    let persister = FilePersister::new(&config.permissions_path);
    let blob = persister
        .load()
        .with_context(|| format!("reading {}", persister.path().display()))?;

    let author = Author {
        id: config.console.user.clone(),
        name: config.console.user.clone(),
    };
    let mut transport =
        ConsoleTransport::new(config.text_channel.clone(), author, &config.console.output);
    if config.console.realtime {
        transport = transport.with_frame_interval(FRAME_INTERVAL);
    }
    let transport = Arc::new(transport);
    let resolver = Arc::new(LocalResolver::new(
        config.downloader.clone(),
        config.library.clone(),
    ));

    let mut incoming = transport.incoming();
    let bot = Bot::builder(config, transport, resolver)
        .persister(Box::new(persister))
        .permissions(blob)
        .build();

    tracing::info!(
        channel = %bot.config().text_channel,
        prefix = %bot.config().prefix,
        "tanuki is listening"
    );

    loop {
        tokio::select! {
            msg = incoming.recv() => {
                let Some(msg) = msg else {
                    tracing::info!("input closed, shutting down");
                    break;
                };
                let bot = bot.clone();
                tokio::spawn(async move {
                    let res = bot.handle_message(msg).await;
                    tracing::debug!(?res, "message handled");
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down gracefully...");
                break;
            }
        }
    }

    bot.shutdown().await;
    Ok(())
}
