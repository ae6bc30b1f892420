use std::sync::Arc;

use secrecy::ExposeSecret;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{debug, info};
use tracing_subscriber::prelude::*;

use devopsguru::config::Config;
use devopsguru::pipeline::{InboundMessage, MessagePipeline, PipelineError, TelegramClient};

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
enum Command {
    #[command(description = "introduce the bot.")]
    Start,
    #[command(description = "show how to ask a question.")]
    Help,
}

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        eprintln!("Failed to read .env: {e}");
    }

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    // Keep the guard alive so buffered file logs are flushed on exit
    let (file_layer, _guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "devopsguru.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(env_filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(env_filter()),
        )
        .with(file_layer)
        .init();

    info!("Starting {} (provider: {})", config.bot_name, config.provider);

    let bot = Bot::new(config.telegram_token.expose_secret());
    let chat = Arc::new(TelegramClient::new(bot.clone()));
    let pipeline = match MessagePipeline::from_config(&config, chat) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            tracing::error!("Failed to start: {e}");
            std::process::exit(1);
        }
    };

    let handler = Update::filter_message()
        .branch(dptree::entry().filter_command::<Command>().endpoint(on_command))
        .branch(dptree::filter(|msg: Message| msg.voice().is_some()).endpoint(on_voice))
        .branch(
            dptree::filter(|msg: Message| msg.text().is_some_and(|t| !t.starts_with('/')))
                .endpoint(on_text),
        );

    info!("Listening for messages");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![pipeline])
        .default_handler(|upd| async move {
            debug!("Unhandled update {}", upd.id.0);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "An error has occurred in the message handler",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn on_command(
    msg: Message,
    cmd: Command,
    pipeline: Arc<MessagePipeline>,
) -> Result<(), PipelineError> {
    match cmd {
        Command::Start | Command::Help => {
            pipeline.handle_command(&InboundMessage::from_telegram(&msg)).await
        }
    }
}

async fn on_voice(msg: Message, pipeline: Arc<MessagePipeline>) -> Result<(), PipelineError> {
    pipeline.handle_voice(&InboundMessage::from_telegram(&msg)).await
}

async fn on_text(msg: Message, pipeline: Arc<MessagePipeline>) -> Result<(), PipelineError> {
    pipeline.handle_text(&InboundMessage::from_telegram(&msg)).await
}
