mod providers;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use roundtable_config::{find_config_path, load_config, resolve_path, save_config, Config};
use roundtable_core::{
    ConversationStore, EngineSettings, Message, ModelAdapter, RateLimiter, TurnEngine,
};

/// Render markdown text to the terminal using termimad.
fn render_markdown(text: &str) {
    let skin = termimad::MadSkin::default();
    skin.print_text(text);
}

#[derive(Parser)]
#[command(
    name = "roundtable",
    about = "Round-robin discussions between language-model agents",
    version
)]
struct Cli {
    /// Path to config file (default: $ROUNDTABLE_CONFIG, ./config.json, ~/.roundtable/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log request assembly and rate limiting
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new conversation and run it
    New {
        /// Topic the agents discuss
        #[arg(short, long)]
        topic: String,

        /// Number of agents (defaults to discussion.agents)
        #[arg(short, long)]
        agents: Option<usize>,

        /// Rounds to run (defaults to discussion.turns)
        #[arg(long)]
        turns: Option<usize>,
    },
    /// Continue a stored conversation
    Resume {
        /// Conversation ID
        id: String,

        /// Rounds to run (defaults to discussion.turns)
        #[arg(long)]
        turns: Option<usize>,
    },
    /// List stored conversations
    List,
    /// Print a conversation transcript
    Show {
        /// Conversation ID
        id: String,

        /// Include each agent's private thoughts
        #[arg(long)]
        private: bool,

        /// Emit JSON instead of rendered markdown
        #[arg(long)]
        json: bool,
    },
    /// Show configuration and storage status
    Status,
    /// Write a default configuration file
    Onboard,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let base_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = if cli.verbose {
        format!("{base_filter},roundtable_core=debug")
    } else {
        base_filter
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let config_path = cli.config.unwrap_or_else(find_config_path);

    match cli.command {
        Commands::Onboard => run_onboard(&config_path),
        Commands::Status => run_status(&config_path),
        Commands::List => {
            let config = load_config(&config_path)?;
            run_list(&open_store(&config)?)
        }
        Commands::Show { id, private, json } => {
            let config = load_config(&config_path)?;
            run_show(&open_store(&config)?, &id, private, json)
        }
        Commands::New {
            topic,
            agents,
            turns,
        } => {
            let config = load_config(&config_path)?;
            let agents = agents.unwrap_or(config.discussion.agents);
            let turns = turns.unwrap_or(config.discussion.turns);
            let engine = build_engine(&config)?;
            run_new(&engine, &topic, agents, turns).await
        }
        Commands::Resume { id, turns } => {
            let config = load_config(&config_path)?;
            let turns = turns.unwrap_or(config.discussion.turns);
            let engine = build_engine(&config)?;
            run_resume(&engine, &id, turns).await
        }
    }
}

fn open_store(config: &Config) -> Result<ConversationStore> {
    let db_path = resolve_path(&config.storage.database);
    ConversationStore::open(&db_path)
        .with_context(|| format!("failed to open database '{}'", db_path.display()))
}

/// Validate the configuration and wire store, backend and engine together.
fn build_engine(config: &Config) -> Result<TurnEngine> {
    if config.discussion.requests_per_minute == 0 {
        anyhow::bail!("discussion.requestsPerMinute must be at least 1.");
    }

    let backend = providers::create_backend(config)?;
    let store = open_store(config)?;
    let limiter = RateLimiter::new(config.discussion.requests_per_minute);
    let adapter = ModelAdapter::new(Arc::new(backend), limiter);
    let settings = EngineSettings::from_config(&config.discussion);

    Ok(TurnEngine::new(store, adapter, settings))
}

fn print_reply(msg: &Message) {
    let name = msg.agent_name.as_deref().unwrap_or("system");
    render_markdown(&format!("**{name}**: {}", msg.content));
    println!();
}

async fn run_new(engine: &TurnEngine, topic: &str, agents: usize, turns: usize) -> Result<()> {
    if agents == 0 {
        anyhow::bail!("A conversation needs at least one agent.");
    }
    if topic.trim().is_empty() {
        anyhow::bail!("Topic must not be empty.");
    }

    let mut conversation = engine.create_conversation(topic.trim(), agents)?;
    println!("Conversation {}", conversation.id);
    println!(
        "{} agents, {} turns, backend {}",
        agents,
        turns,
        engine.adapter().backend_name()
    );
    println!();
    if let Some(seed) = conversation.messages.first() {
        render_markdown(&format!("*{}*", seed.content));
        println!();
    }

    engine
        .run_conversation_with(&mut conversation, turns, print_reply)
        .await
        .with_context(|| format!("conversation {} stopped", conversation.id))?;

    println!(
        "Done. Resume with `roundtable resume {}`.",
        conversation.id
    );
    Ok(())
}

async fn run_resume(engine: &TurnEngine, id: &str, turns: usize) -> Result<()> {
    let mut conversation = engine
        .load_conversation(id)?
        .ok_or_else(|| anyhow::anyhow!("No conversation with id '{id}'. See `roundtable list`."))?;

    println!(
        "Resuming \"{}\" ({} replies so far, {} agents)",
        conversation.topic,
        conversation.reply_count(),
        conversation.agents.len()
    );
    println!();

    engine
        .run_conversation_with(&mut conversation, turns, print_reply)
        .await
        .with_context(|| format!("conversation {id} stopped"))?;

    println!("Done. {} replies in total.", conversation.reply_count());
    Ok(())
}

fn run_list(store: &ConversationStore) -> Result<()> {
    let conversations = store.list_conversations()?;
    if conversations.is_empty() {
        println!("No conversations yet. Start one with `roundtable new --topic \"...\"`.");
        return Ok(());
    }

    println!(
        "{:<36}  {:>6}  {:>8}  {:<16}  TOPIC",
        "ID", "AGENTS", "MESSAGES", "UPDATED"
    );
    for c in conversations {
        println!(
            "{:<36}  {:>6}  {:>8}  {:<16}  {}",
            c.id,
            c.agent_count,
            c.public_message_count,
            c.updated_at.format("%Y-%m-%d %H:%M"),
            c.topic
        );
    }
    Ok(())
}

fn run_show(store: &ConversationStore, id: &str, private: bool, json: bool) -> Result<()> {
    let conversation = store
        .load_conversation(id)?
        .ok_or_else(|| anyhow::anyhow!("No conversation with id '{id}'."))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&conversation)?);
    } else {
        render_markdown(&conversation.to_markdown(private));
    }
    Ok(())
}

fn run_onboard(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("Config already exists: {}", config_path.display());
        println!("To reset, delete it and run `roundtable onboard` again.");
        return Ok(());
    }

    let mut cfg = Config::default();
    cfg.model.provider = "ollama".into();
    cfg.model.model = "llama3".into();
    save_config(config_path, &cfg)?;

    println!("Created config: {}", config_path.display());
    println!();
    println!("Next steps:");
    println!(
        "  1. Edit {} to choose a provider and model",
        config_path.display()
    );
    println!("  2. Run `roundtable new --topic \"...\"` to start a discussion");
    Ok(())
}

/// Show configuration and storage summary.
fn run_status(config_path: &Path) -> Result<()> {
    println!("roundtable status");
    println!();

    if config_path.exists() {
        println!("  Config:    {} (found)", config_path.display());
    } else {
        println!(
            "  Config:    {} (not found, run `roundtable onboard`)",
            config_path.display()
        );
        return Ok(());
    }

    let config = load_config(config_path)?;
    let or_unset = |s: &str| {
        if s.is_empty() {
            "(not set)".to_string()
        } else {
            s.to_string()
        }
    };
    println!("  Provider:  {}", or_unset(&config.model.provider));
    println!("  Model:     {}", or_unset(&config.model.model));
    println!(
        "  API key:   {}",
        if providers::has_credentials(&config) {
            "configured"
        } else {
            "missing"
        }
    );
    println!();

    println!("  Discussion:");
    println!("    Agents: {}", config.discussion.agents);
    println!("    Turns: {}", config.discussion.turns);
    println!(
        "    Rate limit: {} requests/minute",
        config.discussion.requests_per_minute
    );
    println!();

    let db_path = resolve_path(&config.storage.database);
    if db_path.exists() {
        let store = ConversationStore::open(&db_path)?;
        println!(
            "  Database:  {} ({} conversations)",
            db_path.display(),
            store.list_conversations()?.len()
        );
    } else {
        println!("  Database:  {} (not created yet)", db_path.display());
    }

    Ok(())
}
