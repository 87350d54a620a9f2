use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hyperflow_core::config::AppConfig;
use hyperflow_core::types::ProviderType;
use hyperflow_engine::{NodeExecutors, WorkflowEngine, WorkflowGraph};
use hyperflow_keys::{CredentialVault, ProviderKeyRotator, SqliteKeyStore};
use hyperflow_llm::ProviderRegistry;
use hyperflow_tools::ToolRegistry;

#[derive(Parser)]
#[command(name = "hyperflow", version, about = "Run LLM workflow graphs with rotating provider keys")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "hyperflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow graph and print the run result as JSON
    Run {
        /// Graph definition (JSON)
        graph: PathBuf,
        /// Run input as a JSON object
        #[arg(short, long)]
        input: Option<String>,
    },
    /// Check a graph definition without running it
    Validate {
        /// Graph definition (JSON)
        graph: PathBuf,
    },
    /// Manage provider API keys
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },
    /// Credential vault utilities
    Vault {
        #[command(subcommand)]
        action: VaultAction,
    },
    /// List registered tools
    Tools,
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum KeysAction {
    /// Store a new key (prompts for the secret when --secret is omitted)
    Add {
        /// openai, anthropic, gemini, or ollama
        provider: String,
        /// Name unique within the provider
        label: String,
        #[arg(long)]
        secret: Option<String>,
    },
    /// List stored keys
    List {
        #[arg(long)]
        provider: Option<String>,
    },
    /// Re-enable a key and clear its failure count
    Activate { id: i64 },
    /// Take a key out of rotation
    Deactivate { id: i64 },
}

#[derive(Subcommand)]
enum VaultAction {
    /// Print a fresh vault secret
    GenerateSecret,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("hyperflow=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Commands that need no config file
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "hyperflow", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Vault {
            action: VaultAction::GenerateSecret,
        } => {
            println!("{}", CredentialVault::generate_secret());
            return Ok(());
        }
        Commands::Validate { graph } => return validate(graph),
        _ => {}
    }

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    if run_without_vault(&cli.command, &config)? {
        return Ok(());
    }

    let vault = Arc::new(CredentialVault::from_secret(&config.vault.secret)?);

    match cli.command {
        Commands::Run { graph, input } => {
            let rotator = open_rotator(&config, vault)?;
            let success = run(&config, rotator, &graph, input.as_deref()).await?;
            if !success {
                std::process::exit(1);
            }
        }
        Commands::Keys { action } => {
            let rotator = open_rotator(&config, vault)?;
            handle_keys(&rotator, action).await?;
        }
        _ => {}
    }

    Ok(())
}

/// Handles the commands that read the config but never open the vault.
/// Returns false when the command needs the vault.
fn run_without_vault(command: &Commands, config: &AppConfig) -> anyhow::Result<bool> {
    match command {
        Commands::Tools => {
            let tools = ToolRegistry::with_builtins(config.data_dir());
            for def in tools.definitions() {
                println!("{:<14} {}", def.name, def.description);
            }
            Ok(true)
        }
        Commands::Config => {
            println!("{}", config.redacted_toml()?);
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn open_rotator(config: &AppConfig, vault: Arc<CredentialVault>) -> anyhow::Result<Arc<ProviderKeyRotator>> {
    let db_path = config.database_path();
    let store = Arc::new(
        SqliteKeyStore::open(&db_path)
            .with_context(|| format!("opening key store at {}", db_path.display()))?,
    );
    Ok(Arc::new(ProviderKeyRotator::from_config(
        store,
        vault,
        &config.rotation,
    )))
}

async fn run(
    config: &AppConfig,
    rotator: Arc<ProviderKeyRotator>,
    graph_path: &Path,
    input: Option<&str>,
) -> anyhow::Result<bool> {
    let graph = WorkflowGraph::from_file(graph_path)
        .with_context(|| format!("reading graph {}", graph_path.display()))?;
    for issue in graph.validate().iter().filter(|i| !i.is_error()) {
        warn!(issue = %issue, "Graph warning");
    }

    let input = match input {
        Some(raw) => serde_json::from_str(raw).context("--input must be valid JSON")?,
        None => serde_json::json!({}),
    };

    let executors = NodeExecutors::new(
        Arc::new(ProviderRegistry::with_defaults(&config.providers)),
        rotator,
        Arc::new(ToolRegistry::with_builtins(config.data_dir())),
        config.scripts.clone(),
    );
    let engine = WorkflowEngine::new(executors);

    let result = engine.run(&graph, input).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.success)
}

fn validate(graph_path: &Path) -> anyhow::Result<()> {
    let graph = WorkflowGraph::from_file(graph_path)
        .with_context(|| format!("reading graph {}", graph_path.display()))?;
    let issues = graph.validate();

    if issues.is_empty() {
        println!(
            "OK: {} node(s), {} edge(s), entrypoint '{}'",
            graph.nodes.len(),
            graph.edges.len(),
            graph.entry_id().unwrap_or_default()
        );
        return Ok(());
    }

    let mut errors = 0;
    for issue in &issues {
        if issue.is_error() {
            errors += 1;
            println!("error: {}", issue);
        } else {
            println!("warning: {}", issue);
        }
    }
    if errors > 0 {
        anyhow::bail!("{} error(s) in {}", errors, graph_path.display());
    }
    Ok(())
}

async fn handle_keys(rotator: &ProviderKeyRotator, action: KeysAction) -> anyhow::Result<()> {
    match action {
        KeysAction::Add {
            provider,
            label,
            secret,
        } => {
            let provider: ProviderType = provider.parse()?;
            let secret = match secret {
                Some(s) => s,
                None => dialoguer::Password::new()
                    .with_prompt(format!("{} API key", provider))
                    .interact()?,
            };
            let key = rotator.add_key(provider, &label, &secret).await?;
            info!(key_id = key.id, provider = %provider, "Key added");
            println!("Added key {} ({} / {})", key.id, key.provider, key.label);
        }
        KeysAction::List { provider } => {
            let provider = provider.map(|p| p.parse::<ProviderType>()).transpose()?;
            let keys = rotator.list_keys(provider).await?;
            if keys.is_empty() {
                println!("No keys stored.");
                return Ok(());
            }
            println!(
                "{:>5}  {:<10} {:<24} {:<8} {:>8}  LAST USED",
                "ID", "PROVIDER", "LABEL", "ACTIVE", "FAILURES"
            );
            for key in keys {
                let last_used = key
                    .last_used_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{:>5}  {:<10} {:<24} {:<8} {:>8}  {}",
                    key.id,
                    key.provider.as_str(),
                    key.label,
                    if key.is_active { "yes" } else { "no" },
                    key.failure_count,
                    last_used
                );
            }
        }
        KeysAction::Activate { id } => {
            rotator.activate(id).await?;
            println!("Key {} activated", id);
        }
        KeysAction::Deactivate { id } => {
            rotator.deactivate(id).await?;
            println!("Key {} deactivated", id);
        }
    }
    Ok(())
}
