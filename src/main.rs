//! hbot - Main Entry Point
//!
//! Logs into a Telegram user account, loads the command plugins and routes
//! new messages to them until interrupted or asked to restart.

use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::{Input, Password};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use hbot::commands::Dispatcher;
use hbot::config::{self, BotSettings, JsonStore, TelegramConfig};
use hbot::logging;
use hbot::plugins::{Lifecycle, PluginContext, load_plugins};
use hbot::telegram::{TelegramBot, TelegramError, Update};

/// Telegram userbot with command plugins.
#[derive(Parser, Debug)]
#[command(name = "hbot")]
#[command(about = "Telegram userbot with command plugins")]
#[command(version)]
struct Args {
    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,
}

/// Why the update loop ended.
#[derive(Debug, PartialEq, Eq)]
enum Exit {
    Stop,
    Restart,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let dotenv = dotenvy::from_filename(&args.env_file);

    let settings = BotSettings::from_env();
    logging::init(&settings.log).context("Failed to initialize logging")?;

    if let Err(e) = dotenv {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    settings
        .validate()
        .context("Persist directory is missing")?;

    let tg_config =
        TelegramConfig::from_env().context("API_ID and API_HASH must be exported!")?;

    let bot = TelegramBot::connect(&tg_config)
        .await
        .context("Failed to connect to Telegram")?;

    if !bot.is_authorized().await.context("Failed to check authorization")? {
        authenticate(&bot, &tg_config).await?;
    }

    let bot = Arc::new(bot);
    let me = bot.me().await.context("Failed to fetch own account")?;
    info!("Logged in as {}", me);

    let exit = run(Arc::clone(&bot), Arc::new(settings), me).await?;

    bot.disconnect();
    info!("Disconnected");

    if exit == Exit::Restart {
        return restart();
    }
    Ok(())
}

async fn run(bot: Arc<TelegramBot>, settings: Arc<BotSettings>, me: i64) -> Result<Exit> {
    let mut shared = JsonStore::open(&settings.persist_dir, config::SHARED_NAMESPACE)
        .context("Failed to open shared configuration")?;
    let prefixes = config::load_prefixes(&mut shared).context("Failed to load prefixes")?;
    info!("Command prefixes: {:?}", prefixes);

    let (lifecycle_tx, mut lifecycle_rx) = mpsc::unbounded_channel();
    let ctx = PluginContext {
        bot: Arc::clone(&bot),
        settings,
        prefixes: Arc::new(prefixes),
        catalog: Arc::new(OnceLock::new()),
        lifecycle: lifecycle_tx,
    };

    let mut plugins = load_plugins(&ctx);
    let dispatcher = Dispatcher::new(plugins.take_handlers());
    info!(
        "Loaded {} plugins with {} handlers",
        plugins.len(),
        dispatcher.len()
    );

    let mut updates = bot.updates().await.context("Failed to start updates")?;
    plugins.start_all().await;

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;

    info!("Bot is running. Use Ctrl+C to stop.");
    let exit = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break Exit::Stop;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                break Exit::Stop;
            }
            request = lifecycle_rx.recv() => {
                if let Some(Lifecycle::Restart) = request {
                    info!("Restart requested, shutting down...");
                    break Exit::Restart;
                }
            }
            update = updates.next() => match update {
                Ok(Update::NewMessage(message)) => {
                    let message = bot.snapshot(&message);
                    dispatcher.dispatch(&bot, message, me);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Update stream failed: {}", e);
                    break Exit::Stop;
                }
            }
        }
    };

    plugins.shutdown_all().await;
    Ok(exit)
}

/// Replaces the process with a fresh copy of the executable.
fn restart() -> Result<()> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe().context("Failed to locate executable")?;
    info!("Restarting {}", exe.display());

    let err = std::process::Command::new(&exe)
        .args(std::env::args_os().skip(1))
        .exec();
    Err(err).context("Failed to restart")
}

/// Handles Telegram authentication.
async fn authenticate(bot: &TelegramBot, config: &TelegramConfig) -> Result<()> {
    info!("Authentication required");

    let phone: String = Input::new()
        .with_prompt("Enter your phone number (with country code)")
        .interact_text()?;

    let token = bot
        .request_login_code(&phone, &config.api_hash)
        .await
        .context("Failed to request login code")?;

    info!("Login code sent to your Telegram app");

    let code: String = Input::new()
        .with_prompt("Enter the login code")
        .interact_text()?;

    match bot.sign_in(&token, &code).await {
        Ok(()) => {
            info!("Successfully signed in!");
            Ok(())
        }
        Err(TelegramError::PasswordRequired(password_token)) => {
            info!("Two-factor authentication is enabled");
            info!("Password hint: {}", password_token.hint().unwrap_or("no hint"));

            let password: String = Password::new()
                .with_prompt("Enter your 2FA password")
                .interact()?;

            bot.check_password(password_token, &password)
                .await
                .context("2FA authentication failed")?;

            info!("Successfully signed in with 2FA!");
            Ok(())
        }
        Err(e) => Err(e).context("Authentication failed"),
    }
}
