use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use parley_core::{
    ChatSession, Config, ConversationLog, FlushMode, InlineCompleter, OllamaClient,
};

mod app;
mod bridge;
mod complete;
mod handler;
mod logging;
mod tui;
mod ui;

use app::App;
use tui::EventHandler;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Chat with a local Ollama model from the terminal or your editor")]
struct Cli {
    /// Ollama server URL
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Model to use (chat model, or completion model for `complete`)
    #[arg(short, long, global = true)]
    model: Option<String>,
    /// How replies are streamed: delta-only, full-log-snapshot, full-reply-snapshot
    #[arg(long, global = true)]
    flush_mode: Option<FlushMode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat in the terminal (default)
    Chat,
    /// JSON-lines bridge for an editor extension on stdin/stdout
    Bridge,
    /// Suggest code at a cursor position
    Complete {
        /// Source file
        #[arg(short, long)]
        file: PathBuf,
        /// Cursor line, 1-based
        #[arg(short, long)]
        line: usize,
        /// Cursor column in characters, 1-based
        #[arg(short, long)]
        column: usize,
        /// Insert the suggestion into the file instead of printing it
        #[arg(short, long)]
        write: bool,
    },
    /// List available Ollama models
    Models,
    /// Show the effective settings and where they are stored
    Config {
        /// Write the effective settings (with any flags applied) to the config file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Chat);

    match &command {
        Commands::Chat => logging::init_file()?,
        _ => logging::init_stderr(),
    }

    let mut config = Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "could not load config, using defaults");
        Config::default()
    });
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    if let Some(flush_mode) = cli.flush_mode {
        config.flush_mode = flush_mode;
    }

    match command {
        Commands::Chat => {
            if let Some(model) = cli.model {
                config.chat_model = model;
            }
            run_chat(chat_session(&config)).await
        }
        Commands::Bridge => {
            if let Some(model) = cli.model {
                config.chat_model = model;
            }
            bridge::run(chat_session(&config)).await
        }
        Commands::Complete {
            file,
            line,
            column,
            write,
        } => {
            if let Some(model) = cli.model {
                config.completion_model = model;
            }
            let client = OllamaClient::new(&config.base_url, &config.completion_model);
            let completer = InlineCompleter::new(client);
            let suggestion = complete::complete_file(&completer, &file, line, column, write).await?;
            if !write {
                println!("{}", suggestion);
            }
            Ok(())
        }
        Commands::Models => list_models(&config).await,
        Commands::Config { init } => {
            if let Some(model) = cli.model {
                config.chat_model = model;
            }
            show_config(&config, init)
        }
    }
}

fn chat_session(config: &Config) -> ChatSession<OllamaClient> {
    tracing::info!(
        base_url = %config.base_url,
        model = %config.chat_model,
        flush_mode = config.flush_mode.as_str(),
        "starting chat session"
    );
    let client = OllamaClient::new(&config.base_url, &config.chat_model);
    let log = ConversationLog::with_system_prompt(&config.system_prompt);
    ChatSession::with_log(client, log, config.flush_policy())
}

async fn run_chat(session: ChatSession<OllamaClient>) -> Result<()> {
    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut app = App::new(session);
    let mut events = EventHandler::new();

    let result = async {
        while !app.should_quit {
            terminal.draw(|frame| ui::render(&mut app, frame))?;
            match events.next().await {
                Some(event) => handler::handle_event(&mut app, event, events.sink()).await?,
                None => break,
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    tui::restore()?;
    result
}

fn show_config(config: &Config, init: bool) -> Result<()> {
    let path = Config::config_path()?;
    if init {
        config.save()?;
        tracing::info!(path = %path.display(), "config written");
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let state = if path.exists() { "" } else { " (not created yet)" };
    println!("# {}{}", path.display(), state);
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

async fn list_models(config: &Config) -> Result<()> {
    let client = OllamaClient::new(&config.base_url, &config.chat_model);
    let models = client.list_models().await?;

    if models.is_empty() {
        println!("No models installed on {}", client.base_url());
        return Ok(());
    }
    for model in models {
        let marker = if model == config.chat_model { "*" } else { " " };
        println!("{} {}", marker, model);
    }
    Ok(())
}
