use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info, warn, LevelFilter};
use signal_panel::api::{AnalyzeRequest, ApiClient, BotConfig};
use signal_panel::config::ClientConfig;
use signal_panel::panel::Panel;
use signal_panel::Error;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "signal-panel",
    about = "Control panel for a remote trading-signal backend",
    version
)]
struct Cli {
    /// Backend base URL (overrides API_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// API key for authenticated endpoints (overrides API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check backend liveness
    Status,

    /// Store the Telegram notification channel on the backend
    SaveConfig {
        #[arg(long)]
        telegram_token: Option<String>,
        #[arg(long)]
        chat_id: Option<String>,
    },

    /// Enable the automated signal bot
    Enable,

    /// Disable the automated signal bot
    Disable,

    /// Request an on-demand market analysis
    Analyze {
        #[arg(long, default_value = "EUR/USD")]
        symbol: String,
        #[arg(long, default_value = "1min")]
        interval: String,
        #[arg(long)]
        broker: Option<String>,
        /// Ask the backend to forward the signal to the notification channel
        #[arg(long)]
        auto_send: bool,
    },

    /// Fetch the most recent live signal without triggering analysis
    Live,

    /// Enable the bot and keep refreshing the signal until Ctrl-C
    Watch {
        #[arg(long, default_value = "EUR/USD")]
        symbol: String,
        #[arg(long, default_value = "1min")]
        interval: String,
    },
}

// Initialize environment logger
fn setup_logger() {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
}

/// Echo the result surface to the operator. Returns false when the last
/// action ended in an error.
fn report(panel: &Panel) -> bool {
    let state = panel.state();
    let panel_state = state.lock().unwrap();
    if let Some(message) = &panel_state.result().message {
        if panel_state.result().is_error {
            error!("{}", message);
        } else {
            info!("{}", message);
            println!("{}", message);
        }
    }
    !panel_state.result().is_error
}

/// Disable can collide with a poller tick that is still in flight; wait the
/// tick out instead of giving up.
async fn toggle_until_idle(panel: &mut Panel, enable: bool) -> Result<(), Error> {
    let mut attempts = 0;
    loop {
        match panel.toggle_bot(enable).await {
            Err(Error::Busy) if attempts < 40 => {
                attempts += 1;
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
            outcome => return outcome,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logger();
    let cli = Cli::parse();

    let mut config = ClientConfig::from_env()?;
    if let Some(base_url) = cli.base_url {
        config = config.with_base_url(&base_url)?;
    }
    if let Some(api_key) = cli.api_key {
        config.api_key = api_key;
    }

    let mut panel = Panel::new(ApiClient::new(config));

    let ok = match cli.command {
        Command::Status => match panel.check_status().await {
            Ok(health) => {
                if health.is_healthy() {
                    info!("Backend is up");
                    println!("Backend is up");
                } else {
                    warn!("Backend responded but does not report healthy");
                }
                health.is_healthy()
            }
            Err(error) => {
                error!("{}", error);
                false
            }
        },
        Command::SaveConfig {
            telegram_token,
            chat_id,
        } => {
            let _ = panel
                .save_config(BotConfig::new(telegram_token, chat_id))
                .await;
            report(&panel)
        }
        Command::Enable => {
            let _ = panel.toggle_bot(true).await;
            let ok = report(&panel);
            // One-shot command; the process exits, so drop the timer here.
            // The backend keeps the bot running either way.
            panel.shutdown().await;
            ok
        }
        Command::Disable => {
            let _ = panel.toggle_bot(false).await;
            report(&panel)
        }
        Command::Analyze {
            symbol,
            interval,
            broker,
            auto_send,
        } => {
            let mut request = AnalyzeRequest::new(&symbol, &interval);
            request.broker = broker;
            request.auto_send = auto_send.then_some(true);
            let _ = panel.request_analysis(request).await;
            report(&panel)
        }
        Command::Live => {
            let _ = panel.fetch_live().await;
            report(&panel)
        }
        Command::Watch { symbol, interval } => {
            panel.set_watch_target(AnalyzeRequest::new(&symbol, &interval));
            match panel.toggle_bot(true).await {
                Ok(()) => {
                    report(&panel);
                    info!(
                        "Watching {} on {} every {}s, Ctrl-C to stop",
                        symbol,
                        interval,
                        panel_poll_secs(&panel)
                    );
                    tokio::signal::ctrl_c().await?;
                    info!("Stopping...");
                    let _ = toggle_until_idle(&mut panel, false).await;
                    let ok = report(&panel);
                    panel.shutdown().await;
                    ok
                }
                Err(_) => {
                    report(&panel);
                    false
                }
            }
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn panel_poll_secs(panel: &Panel) -> u64 {
    panel.poll_interval().as_secs()
}
