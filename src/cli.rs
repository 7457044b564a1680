//! Muse CLI - chat with the assistant and administer its memory
//!
//! Usage:
//!   muse chat --user <id>                  Interactive streamed chat
//!   muse phase --user <id>                 Completeness, phase and missing fields
//!   muse memories --user <id>              List stored memories
//!   muse stale --user <id>                 Report stale memories
//!   muse prune --user <id> [--dry-run]     Delete stale memories (admin)
//!   muse keywords "text"                   Show the keywords extracted from text

use clap::{Parser, Subcommand};
use colored::*;
use muse::{
    extract_keywords, ActionProviders, EngineConfig, HashEmbeddingProvider, MaintenanceConfigBuilder,
    MaintenanceReport, MemoryCortex, MemoryStore, Muse, OpenAiCompatModel, OpenAiConfig,
    OpenAiEmbeddings, OpenAiSearch, PhaseReport, TurnEvent, UserLocks,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "muse")]
#[command(about = "Muse - creator assistant orchestration engine")]
#[command(version)]
struct Cli {
    /// Path to data directory
    #[arg(short, long, env = "MUSE_DATA_DIR", default_value = "./muse_data")]
    data_dir: PathBuf,

    /// Engine configuration (JSON); missing keys take defaults
    #[arg(short, long, env = "MUSE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the assistant; needs OPENAI_API_KEY
    Chat {
        #[arg(short, long, env = "MUSE_USER")]
        user: String,

        /// Conversation to continue; a new one is started when omitted
        #[arg(long)]
        conversation: Option<String>,

        /// Chat model, overrides MUSE_CHAT_MODEL
        #[arg(short, long)]
        model: Option<String>,

        /// Use offline hash embeddings instead of the embeddings endpoint
        #[arg(long)]
        offline_embeddings: bool,
    },

    /// Show profile completeness and workflow phase
    Phase {
        #[arg(short, long, env = "MUSE_USER")]
        user: String,
    },

    /// List stored memories
    Memories {
        #[arg(short, long, env = "MUSE_USER")]
        user: String,

        /// Maximum results
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Report stale memories without deleting them
    Stale {
        #[arg(short, long, env = "MUSE_USER")]
        user: String,
    },

    /// Delete stale memories (admin only)
    Prune {
        #[arg(short, long, env = "MUSE_USER")]
        user: String,

        /// Minimum age in days
        #[arg(long)]
        min_days: Option<f64>,

        /// Decayed score below which a memory is stale
        #[arg(long)]
        max_score: Option<f64>,

        /// Show what would be deleted
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the keywords extracted from a text
    Keywords {
        text: String,

        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Chat {
            user,
            conversation,
            model,
            offline_embeddings,
        } => cmd_chat(&cli.data_dir, config, user, conversation, model, offline_embeddings).await,
        Commands::Phase { user } => cmd_phase(&cli.data_dir, &user).await,
        Commands::Memories { user, limit } => cmd_memories(&cli.data_dir, config, &user, limit).await,
        Commands::Stale { user } => {
            let maintenance = config.maintenance.clone();
            let cortex = open_cortex(&cli.data_dir, config).await?;
            let report = cortex.prune_stale(&user, &maintenance, true).await?;
            print_report(&report);
            Ok(())
        }
        Commands::Prune {
            user,
            min_days,
            max_score,
            dry_run,
        } => {
            let mut builder = MaintenanceConfigBuilder::new().limit(config.maintenance.limit);
            builder = builder.min_days_old(min_days.unwrap_or(config.maintenance.min_days_old));
            builder = builder.max_score(max_score.unwrap_or(config.maintenance.max_score));
            let cortex = open_cortex(&cli.data_dir, config).await?;

            if dry_run {
                println!("{}", "Dry run - no changes will be made".yellow());
            }
            let report = cortex.prune_stale(&user, &builder.build(), dry_run).await?;
            print_report(&report);
            Ok(())
        }
        Commands::Keywords { text, limit } => {
            let keywords = extract_keywords(&text, limit);
            if keywords.is_empty() {
                println!("{}", "No keywords found".yellow());
            } else {
                println!("{}", keywords.join(", ").cyan());
            }
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "muse=debug" } else { "muse=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn open_store(data_dir: &Path) -> anyhow::Result<Arc<MemoryStore>> {
    Ok(MemoryStore::open(data_dir.join("muse.db")).await?)
}

/// Admin commands never embed, so the offline embedder is enough
async fn open_cortex(data_dir: &Path, config: EngineConfig) -> anyhow::Result<MemoryCortex> {
    let store = open_store(data_dir).await?;
    Ok(MemoryCortex::new(
        store,
        Arc::new(HashEmbeddingProvider::new(256)),
        Arc::new(UserLocks::new()),
        config.memory,
    ))
}

async fn cmd_chat(
    data_dir: &Path,
    config: EngineConfig,
    user: String,
    conversation: Option<String>,
    model: Option<String>,
    offline_embeddings: bool,
) -> anyhow::Result<()> {
    let mut openai = OpenAiConfig::from_env()?;
    if let Some(model) = model {
        openai.chat_model = model;
    }
    let embedder: Arc<dyn muse::EmbeddingProvider> = if offline_embeddings {
        Arc::new(HashEmbeddingProvider::new(openai.embedding_dimension))
    } else {
        Arc::new(OpenAiEmbeddings::new(&openai)?)
    };
    let text_model = Arc::new(OpenAiCompatModel::new(&openai)?);
    let mut providers = ActionProviders::default();
    if let Some(search) = OpenAiSearch::from_config(&openai)? {
        providers = providers.with_search(Arc::new(search));
    }
    let muse = Muse::open(data_dir, text_model, embedder, providers, config).await?;

    let conversation = conversation.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    println!("{}", format!("Chatting as {user} (conversation {conversation})").bold());
    println!("{}", "Type a message, or /phase, /quit".dimmed());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", ">".green().bold());
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/phase" => {
                print_phase(&muse.phase(&user).await?);
                continue;
            }
            _ => {}
        }

        let mut handle = match muse.turn(&user, &conversation, line).await {
            Ok(handle) => handle,
            Err(e) => {
                eprintln!("{} {e}", "error:".red().bold());
                continue;
            }
        };
        while let Some(event) = handle.events.recv().await {
            match event {
                TurnEvent::Token { text } => {
                    print!("{text}");
                    std::io::stdout().flush()?;
                }
                TurnEvent::Done {
                    citations,
                    interrupted,
                    scope_violation,
                } => {
                    println!();
                    for (i, url) in citations.iter().enumerate() {
                        println!("  [{}] {}", i + 1, url.dimmed());
                    }
                    if interrupted {
                        println!("{}", "(response interrupted)".yellow());
                    }
                    if scope_violation {
                        println!("{}", "(finished content before the profile allows it)".yellow());
                    }
                }
            }
        }
        // Post-processing is quick; waiting keeps the next turn's history complete
        let summary = handle.background.await?;
        if !summary.profile_fields.is_empty() {
            let fields: Vec<String> = summary.profile_fields.iter().map(|f| f.to_string()).collect();
            println!("{}", format!("profile updated: {}", fields.join(", ")).dimmed());
        }
    }
    Ok(())
}

async fn cmd_phase(data_dir: &Path, user: &str) -> anyhow::Result<()> {
    let store = open_store(data_dir).await?;
    let profile = store.load_profile(user).await?;
    print_phase(&PhaseReport::for_profile(&profile));
    Ok(())
}

fn print_phase(report: &PhaseReport) {
    println!(
        "{} {}/5 {} | completeness {}%",
        "Phase".bold(),
        report.phase_number,
        report.phase.to_string().cyan(),
        report.completeness
    );
    let flag = |on: bool| if on { "yes".green() } else { "no".red() };
    println!("  ideas: {}  content: {}", flag(report.can_generate_ideas), flag(report.can_generate_content));
    if report.missing_fields.is_empty() {
        println!("  {}", "Nothing missing for this phase".green());
    } else {
        let missing: Vec<String> = report.missing_fields.iter().map(|f| f.to_string()).collect();
        println!("  missing: {}", missing.join(", ").yellow());
    }
}

async fn cmd_memories(data_dir: &Path, config: EngineConfig, user: &str, limit: usize) -> anyhow::Result<()> {
    let cortex = open_cortex(data_dir, config).await?;
    let memories = cortex.memories(user).await?;

    if memories.is_empty() {
        println!("{}", "No memories found".yellow());
        return Ok(());
    }

    println!("{}", format!("Showing {} memories:", memories.len().min(limit)).bold());
    println!();

    let now = chrono::Utc::now();
    let half_life = cortex.config().half_life_days;
    for memory in memories.iter().take(limit) {
        let score = muse::score(memory, now, half_life, 1.0);
        let icon = if score >= 0.7 {
            "*".green()
        } else if score >= 0.3 {
            "~".yellow()
        } else {
            "?".red()
        };
        println!(
            "{} {} {} | {:.2} | {}",
            icon,
            memory.id.chars().take(8).collect::<String>().dimmed(),
            memory.source.to_string().cyan(),
            score,
            memory.content.chars().take(60).collect::<String>()
        );
    }
    Ok(())
}

fn print_report(report: &MaintenanceReport) {
    println!("{}", format!("Checked {} memories", report.checked).bold());
    if report.stale.is_empty() {
        println!("{}", "No stale memories".green());
        return;
    }
    for stale in &report.stale {
        println!(
            "  {} {:>5.0}d | {:.2} | {}",
            stale.id.chars().take(8).collect::<String>().dimmed(),
            stale.age_days,
            stale.score,
            stale.content.chars().take(60).collect::<String>()
        );
    }
    if report.dry_run {
        println!("{}", format!("{} stale, nothing deleted", report.stale.len()).yellow());
    } else {
        println!("{}", format!("Pruned {} memories", report.pruned).green());
    }
}
