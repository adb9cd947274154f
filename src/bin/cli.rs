//! ltm CLI
//!
//! Command-line access to the memory engine: management commands, the
//! per-turn `learn`/`context` calls, and the batch maintenance passes.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ltm::config::StorageMode;
use ltm::{
    CreateMemoryInput, ListOptions, LtmConfig, MemoryEngine, MemoryType, SearchFilters, ToolOutcome,
};

#[derive(Parser)]
#[command(name = "ltm")]
#[command(about = "Long-term memory engine CLI")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "LTM_CONFIG")]
    config: Option<String>,

    /// Database path (overrides the configuration file)
    #[arg(long, env = "LTM_DB_PATH")]
    db_path: Option<String>,

    /// Storage mode: local or cloud-safe
    #[arg(long, env = "LTM_STORAGE_MODE")]
    storage_mode: Option<String>,

    /// Owner the command acts for
    #[arg(short, long, env = "LTM_OWNER", default_value = "default")]
    owner: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new memory
    Create {
        /// Content to remember
        content: String,
        /// Tags (comma-separated)
        #[arg(short = 'T', long)]
        tags: String,
        /// Memory type (classified from content when omitted)
        #[arg(short, long)]
        r#type: Option<String>,
        /// Category (classified from content when omitted)
        #[arg(short, long)]
        category: Option<String>,
        /// Importance (1-10)
        #[arg(short, long, default_value = "5")]
        importance: i32,
    },
    /// Get a memory by ID
    Get {
        /// Memory ID
        id: i64,
    },
    /// List memories
    List {
        /// Maximum number to return
        #[arg(short, long, default_value = "20")]
        limit: i64,
        /// Filter by tags (comma-separated)
        #[arg(short = 'T', long)]
        tags: Option<String>,
        /// Filter by type
        #[arg(short, long)]
        r#type: Option<String>,
        /// Include archived memories
        #[arg(long)]
        archived: bool,
    },
    /// Full-text search
    Search {
        /// Search query
        query: String,
        /// Maximum results
        #[arg(short, long, default_value = "10")]
        limit: i64,
        /// Filter by category
        #[arg(short, long)]
        category: Option<String>,
    },
    /// Delete a memory
    Delete {
        /// Memory ID
        id: i64,
    },
    /// Show statistics
    Stats,
    /// Learn from one conversation turn
    Learn {
        /// What the user said
        user_input: String,
        /// What the agent answered
        #[arg(short, long, default_value = "")]
        response: String,
        /// Tool that ran during the turn
        #[arg(long)]
        tool: Option<String>,
        /// Output of that tool
        #[arg(long, default_value = "")]
        tool_output: String,
    },
    /// Print the context block for a query
    Context {
        /// Query text
        query: String,
        /// Maximum length in characters
        #[arg(short, long)]
        max_length: Option<usize>,
    },
    /// Merge near-duplicate memories
    Consolidate,
    /// Run aging, archival and duplicate removal
    Lifecycle,
    /// Run lifecycle and consolidation for every owner
    Maintain {
        /// Repeat every N seconds (0 = run once)
        #[arg(long, default_value = "0")]
        interval_seconds: u64,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
            .init();
    }
}

fn load_config(cli: &Cli) -> Result<LtmConfig> {
    let mut config = match cli.config {
        Some(ref path) => {
            let path = shellexpand::tilde(path).to_string();
            LtmConfig::load(&path).with_context(|| format!("loading config from {}", path))?
        }
        None => LtmConfig::default(),
    };
    if let Some(ref db_path) = cli.db_path {
        config.storage.db_path = db_path.clone();
    }
    if let Some(ref mode) = cli.storage_mode {
        config.storage.storage_mode = mode.parse::<StorageMode>().map_err(anyhow::Error::msg)?;
    }
    config.storage.db_path = shellexpand::tilde(&config.storage.db_path).to_string();
    Ok(config)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_type(value: &str) -> Result<MemoryType> {
    value.parse::<MemoryType>().map_err(anyhow::Error::msg)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(&cli)?;
    let engine = MemoryEngine::new(config).context("opening memory engine")?;
    let owner = cli.owner.as_str();

    match cli.command {
        Commands::Create {
            content,
            tags,
            r#type,
            category,
            importance,
        } => {
            let input = CreateMemoryInput {
                tags: split_list(&tags),
                memory_type: r#type.as_deref().map(parse_type).transpose()?,
                category,
                created_by: Some(owner.to_string()),
                source_type: Some("cli".to_string()),
                ..CreateMemoryInput::new(owner, content, &[], importance)
            };
            let memory = engine.store().create(&input)?;
            println!("Created memory #{}", memory.id);
            println!("{}", serde_json::to_string_pretty(&memory)?);
        }

        Commands::Get { id } => {
            let memory = engine.store().get(id)?;
            println!("{}", serde_json::to_string_pretty(&memory)?);
        }

        Commands::List {
            limit,
            tags,
            r#type,
            archived,
        } => {
            let options = ListOptions {
                limit: Some(limit),
                tags: tags.as_deref().map(split_list),
                memory_type: r#type.as_deref().map(parse_type).transpose()?,
                include_archived: archived,
                ..Default::default()
            };
            for memory in engine.store().list(owner, &options)? {
                println!(
                    "#{} [{}] ({}) {} - {}",
                    memory.id,
                    memory.memory_type,
                    memory.importance_score,
                    memory.tags.join(", "),
                    truncate(&memory.content, 60)
                );
            }
        }

        Commands::Search {
            query,
            limit,
            category,
        } => {
            let filters = SearchFilters {
                limit: Some(limit),
                category,
                ..Default::default()
            };
            for memory in engine.search(owner, &query, &filters)? {
                println!(
                    "#{} ({}) - {}",
                    memory.id,
                    memory.importance_score,
                    truncate(&memory.content, 60)
                );
            }
        }

        Commands::Delete { id } => {
            engine.delete(owner, id)?;
            println!("Deleted memory #{}", id);
        }

        Commands::Stats => {
            let stats = engine.stats(owner)?;
            let storage = engine.store().storage();
            let report = serde_json::json!({
                "owner": stats,
                "db_path": storage.db_path(),
                "storage_mode": storage.storage_mode(),
                "db_size_bytes": storage.db_size()?,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Learn {
            user_input,
            response,
            tool,
            tool_output,
        } => {
            let tool_result = tool.map(|tool| ToolOutcome::new(tool, tool_output));
            let learned = engine.learn(owner, &user_input, &response, tool_result);
            if learned.is_empty() {
                println!("Nothing learned");
            }
            for memory in learned {
                println!(
                    "Learned #{} [{}] ({}) - {}",
                    memory.id,
                    memory.memory_type,
                    memory.importance_score,
                    truncate(&memory.content, 60)
                );
            }
        }

        Commands::Context { query, max_length } => {
            let context = engine.retrieve_context(owner, &query, max_length)?;
            println!("{}", context);
        }

        Commands::Consolidate => {
            let report = engine.consolidate(owner)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Lifecycle => {
            let report = engine.run_lifecycle(owner)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Maintain { interval_seconds } => loop {
            let reports = engine.run_maintenance()?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
            if interval_seconds == 0 {
                break;
            }
            std::thread::sleep(Duration::from_secs(interval_seconds));
        },
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    let first_line = s.lines().next().unwrap_or(s);
    if first_line.chars().count() <= max {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
