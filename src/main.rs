//! Astral - Entry Point
//!
//! Modes:
//! - --telegram / -t: Telegram bot mode
//! - --console (default): read messages from stdin, print replies

use astralbot::{App, Config, IncomingText, MemorySink};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let telegram_mode = args.iter().any(|a| a == "--telegram" || a == "-t");
    let json_logs = args.iter().any(|a| a == "--json-logs");
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");

    if help_mode {
        println!("Astral v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: astralbot [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --telegram, -t     Run as Telegram bot");
        println!("  --console          Read messages from stdin (default)");
        println!("  --json-logs        Log as JSON to stderr");
        println!("  --help, -h         Show this help");
        println!();
        println!("Console input: '<text>' or '><message-id> <text>' to reply");
        println!();
        println!("Environment variables:");
        println!("  TELEGRAM_BOT_TOKEN       Telegram bot token");
        println!("  ASTRAL_ALLOWED_USERS     Comma separated Telegram user IDs");
        println!("  ASTRAL_COMMAND_PREFIX    Command prefix (default: /)");
        println!("  ASTRAL_CACHE_DIR         Download cache directory");
        println!("  ASTRAL_SELECTION_TTL     Pending selection lifetime in seconds, 0 = never");
        println!("  ASTRAL_CHRISTUSGPT_KEY   API key for the christusgpt backend");
        println!("  ASTRAL_COSPLAY_KEY       API key for the cosplay video backend");
        println!("  ASTRAL_*_URL             Backend URL overrides");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    // console mode owns stdout, so logs go to stderr there
    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(telegram_mode)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let config = Config::from_env()?;

    if telegram_mode {
        info!("Astral Telegram Bot v{}", env!("CARGO_PKG_VERSION"));
        astralbot::telegram::run_telegram_bot(config).await?;
    } else {
        info!("Astral console v{}", env!("CARGO_PKG_VERSION"));
        run_console(config).await?;
    }

    Ok(())
}

/// Line-based local session: every line is a message from user "console"
async fn run_console(config: Config) -> anyhow::Result<()> {
    let app = App::open(config).await?;
    let sweeper = app.spawn_sweeper();
    let sink = MemorySink::with_prefix("m").echoing();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (replied_to, text) = match line.strip_prefix('>') {
            Some(rest) => match rest.split_once(char::is_whitespace) {
                Some((id, text)) => (Some(id.to_string()), text.trim()),
                None => (Some(rest.to_string()), ""),
            },
            None => (None, line),
        };

        let incoming = IncomingText {
            text: text.to_string(),
            sender_id: "console".to_string(),
            chat_id: "console".to_string(),
            replied_to,
            reply_context: None,
        };
        let handled = app.handle(incoming, &sink).await;
        tracing::debug!("{:?}", handled);
    }

    sweeper.abort();
    Ok(())
}
