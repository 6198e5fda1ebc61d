use std::sync::Arc;

use poise::serenity_prelude::{self as serenity};
use serenity::GatewayIntents;
use tracing::{error, info};
use warden_daemon::config::{self, BotConfig, CONFIG_FILE};
use warden_daemon::handlers::Handler;
use warden_daemon::moderation::{
    ModerationPipeline, ModerationStore, PunishmentScheduler, SerenityActionPort, YamlPersistence,
};
use warden_daemon::{BOT_NAME, Data, Error, commands, logging};

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    logging::init()?;

    let config = BotConfig::load(CONFIG_FILE).await?;
    let token = config::discord_token()?;

    // Kick and ban checks compare the target against the bot's own top role
    let http = Arc::new(serenity::Http::new(&token));
    let bot_user = http.get_current_user().await?;
    info!("Authenticated as {} ({})", bot_user.name, bot_user.id);

    let pipeline = ModerationPipeline::new(
        ModerationStore::new(),
        Arc::new(SerenityActionPort::new(http)),
        Arc::new(YamlPersistence::new(&config.data_dir)),
        config.pipeline_settings(bot_user.id.get()),
    );
    let scheduler =
        PunishmentScheduler::new(pipeline.clone(), config.scheduler_config()).start();
    let data = Data::new(pipeline.clone(), config);

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx);
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                logging::log_console("Registering commands");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                Ok(data)
            })
        })
        .build();

    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS;
    let mut client = serenity::ClientBuilder::new(&token, intents)
        .event_handler(Handler::new(pipeline.clone()))
        .framework(framework)
        .await?;
    let shard_manager = client.shard_manager.clone();

    info!("Starting {BOT_NAME}...");
    tokio::select! {
        result = client.start() => {
            if let Err(e) = result {
                error!("Client stopped with error: {e}");
            }
        }
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received Ctrl-C, shutting down"),
                Err(e) => error!("Failed to listen for Ctrl-C: {e}"),
            }
        }
    }

    scheduler.shutdown().await;
    shard_manager.shutdown_all().await;

    for guild_id in pipeline.store().guild_ids() {
        if let Err(e) = pipeline.unload_guild(guild_id).await {
            error!(guild_id, "Failed to save moderation state: {e}");
        }
    }
    info!("Shutdown complete");

    Ok(())
}

fn main() {
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::from)
        .and_then(|runtime| runtime.block_on(async_main()));

    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
