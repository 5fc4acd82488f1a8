//! convoq CLI - manage workspaces, ingest documents, and simulate chats.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use ulid::Ulid;

use convoq_core::{now_millis, ConvoqConfig, ConvoqError, Generator, Store};
use convoq_engine::{Engine, HttpGenerator, MockGenerator, StepSpec};
use convoq_store::SqliteStore;

/// convoq - multi-tenant conversational agent engine
#[derive(Parser)]
#[command(name = "convoq")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file path (default: ~/.config/convoq/config.toml, then ./convoq.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides config)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage workspaces
    Workspace {
        #[command(subcommand)]
        action: WorkspaceAction,
    },

    /// Manage workflow templates
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },

    /// Ingest a document into a workspace knowledge base
    Ingest {
        /// Workspace id
        workspace: String,

        /// Path to the document
        path: PathBuf,

        /// Declared format (text, pdf, workbook); inferred from the
        /// extension when omitted
        #[arg(short, long)]
        format: Option<String>,
    },

    /// Manage documents
    Document {
        #[command(subcommand)]
        action: DocumentAction,
    },

    /// Send an incoming message through the engine
    Message {
        /// Workspace id
        workspace: String,

        /// Customer phone number
        phone: String,

        /// Message text
        text: String,
    },

    /// Manage chats
    Chat {
        #[command(subcommand)]
        action: ChatAction,
    },

    /// Show statistics
    Stats,
}

#[derive(Subcommand)]
enum WorkspaceAction {
    /// List all workspaces
    List,

    /// Create a new workspace
    Create {
        /// Workspace name
        name: String,

        /// Prompt instructions merged into every generation prompt
        #[arg(long)]
        instructions: Option<String>,

        /// Assistant display name
        #[arg(long)]
        bot_name: Option<String>,
    },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// Install a new workflow template version from a JSON file
    Set {
        /// Workspace id
        workspace: String,

        /// JSON file: [{"description", "required", "keywords"}]
        path: PathBuf,
    },

    /// Show the active workflow template
    Show {
        /// Workspace id
        workspace: String,
    },
}

#[derive(Subcommand)]
enum DocumentAction {
    /// List documents in a workspace
    List {
        /// Workspace id
        workspace: String,
    },

    /// Show one document's ingestion status
    Status {
        /// Workspace id
        workspace: String,

        /// Document id
        document: String,
    },

    /// Resume a failed or interrupted ingestion
    Resume {
        /// Workspace id
        workspace: String,

        /// Document id
        document: String,
    },

    /// Delete a document and its chunks and vectors
    Delete {
        /// Workspace id
        workspace: String,

        /// Document id
        document: String,
    },
}

#[derive(Subcommand)]
enum ChatAction {
    /// List chats in a workspace
    List {
        /// Workspace id
        workspace: String,
    },

    /// Toggle AI replies for a chat
    Toggle {
        /// Workspace id
        workspace: String,

        /// Chat id
        chat: String,

        /// Enable or disable AI replies
        #[arg(long)]
        enabled: bool,
    },
}

#[derive(Deserialize)]
struct StepFileEntry {
    description: String,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    keywords: Vec<String>,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn load_config(cli: &Cli) -> Result<ConvoqConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => ConvoqConfig::load(path)?,
        None => ConvoqConfig::load_default()?,
    };
    if let Some(db) = &cli.database {
        config.database.path = db.clone();
    }
    Ok(config)
}

fn build_engine(config: &ConvoqConfig) -> Result<Engine<SqliteStore>, Box<dyn std::error::Error>> {
    let store = Arc::new(SqliteStore::open(
        &config.database.path,
        config.embedding.dimension,
    )?);
    let provider = convoq_embed::provider_from_config(&config.embedding)?;
    let generator: Arc<dyn Generator> = if config.generation.endpoint.is_empty() {
        Arc::new(MockGenerator::default())
    } else {
        Arc::new(HttpGenerator::from_config(&config.generation)?)
    };
    Ok(Engine::new(store, provider, generator, config.clone()))
}

fn parse_ulid(label: &str, s: &str) -> Result<Ulid, Box<dyn std::error::Error>> {
    Ulid::from_string(s)
        .map_err(|_| ConvoqError::invalid_argument(format!("invalid {} id: {}", label, s)).into())
}

fn infer_format(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some("pdf") => "pdf".to_string(),
        Some("xlsx") | Some("xls") | Some("ods") => "workbook".to_string(),
        _ => "text".to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Init => {
            let _ = build_engine(&config)?;
            println!("Initialized database at: {}", config.database.path.display());
        }
        Commands::Workspace { action } => {
            let engine = build_engine(&config)?;
            match action {
                WorkspaceAction::List => {
                    for ws in engine.store().list_workspaces().await? {
                        println!(
                            "{}  {}  (workflow v{})",
                            ws.id, ws.name, ws.workflow_version
                        );
                    }
                }
                WorkspaceAction::Create {
                    name,
                    instructions,
                    bot_name,
                } => {
                    let ws = engine
                        .create_workspace(name, instructions.as_deref(), bot_name.as_deref())
                        .await?;
                    println!("Created workspace: {}", ws.id);
                }
            }
        }
        Commands::Workflow { action } => {
            let engine = build_engine(&config)?;
            match action {
                WorkflowAction::Set { workspace, path } => {
                    let workspace = parse_ulid("workspace", workspace)?;
                    let content = fs::read_to_string(path)?;
                    let entries: Vec<StepFileEntry> = serde_json::from_str(&content)?;
                    let steps: Vec<StepSpec> = entries
                        .into_iter()
                        .map(|e| StepSpec {
                            description: e.description,
                            required: e.required,
                            keywords: e.keywords,
                        })
                        .collect();
                    let version = engine.set_workflow(workspace, steps).await?;
                    println!("Installed workflow template v{}", version);
                }
                WorkflowAction::Show { workspace } => {
                    let workspace = parse_ulid("workspace", workspace)?;
                    let ws = engine
                        .store()
                        .get_workspace(workspace)
                        .await?
                        .ok_or_else(|| ConvoqError::WorkspaceNotFound {
                            id: workspace.to_string(),
                        })?;
                    if ws.workflow_version == 0 {
                        println!("No workflow template installed");
                    } else {
                        println!("Workflow template v{}:", ws.workflow_version);
                        for step in engine
                            .store()
                            .workflow_steps(workspace, ws.workflow_version)
                            .await?
                        {
                            let kind = if step.required { "required" } else { "optional" };
                            println!(
                                "  {}. [{}] {}  keywords: {}",
                                step.position + 1,
                                kind,
                                step.description,
                                step.keywords.join(", ")
                            );
                        }
                    }
                }
            }
        }
        Commands::Ingest {
            workspace,
            path,
            format,
        } => {
            let engine = build_engine(&config)?;
            let workspace = parse_ulid("workspace", workspace)?;
            let raw = fs::read(path)?;
            let format = format.clone().unwrap_or_else(|| infer_format(path));
            let doc = engine.ingest_document(workspace, &raw, &format).await?;
            match &doc.error {
                Some(error) => println!("{}  {}  ({})", doc.id, doc.status.as_str(), error),
                None => println!("{}  {}", doc.id, doc.status.as_str()),
            }
        }
        Commands::Document { action } => {
            let engine = build_engine(&config)?;
            match action {
                DocumentAction::List { workspace } => {
                    let workspace = parse_ulid("workspace", workspace)?;
                    for doc in engine.store().list_documents(workspace).await? {
                        println!(
                            "{}  {}  {}  {} bytes",
                            doc.id, doc.format, doc.status.as_str(), doc.byte_size
                        );
                    }
                }
                DocumentAction::Status {
                    workspace,
                    document,
                } => {
                    let workspace = parse_ulid("workspace", workspace)?;
                    let document = parse_ulid("document", document)?;
                    let doc = engine
                        .store()
                        .get_document(workspace, document)
                        .await?
                        .ok_or_else(|| ConvoqError::DocumentNotFound {
                            id: document.to_string(),
                        })?;
                    let chunks = engine.store().chunks_for_document(doc.id).await?;
                    let embedded = chunks.iter().filter(|c| c.embedded_model.is_some()).count();
                    println!("Status: {}", doc.status.as_str());
                    if let Some(hash) = doc.content_hash_hex() {
                        println!("Hash:   {}", hash);
                    }
                    println!("Chunks: {} ({} embedded)", chunks.len(), embedded);
                    if let Some(error) = &doc.error {
                        println!("Error: {}", error);
                    }
                }
                DocumentAction::Resume {
                    workspace,
                    document,
                } => {
                    let workspace = parse_ulid("workspace", workspace)?;
                    let document = parse_ulid("document", document)?;
                    let doc = engine.resume_ingestion(workspace, document).await?;
                    println!("{}  {}", doc.id, doc.status.as_str());
                }
                DocumentAction::Delete {
                    workspace,
                    document,
                } => {
                    let workspace = parse_ulid("workspace", workspace)?;
                    let document = parse_ulid("document", document)?;
                    engine.store().delete_document(workspace, document).await?;
                    println!("Deleted document: {}", document);
                }
            }
        }
        Commands::Message {
            workspace,
            phone,
            text,
        } => {
            let engine = build_engine(&config)?;
            let workspace = parse_ulid("workspace", workspace)?;
            let outcome = engine
                .handle_message(workspace, phone, text, now_millis())
                .await?;
            match &outcome.reply {
                Some(reply) => println!("{}", reply),
                None => println!("(manual mode, no reply)"),
            }
            println!("qualification: {}", outcome.qualification.as_str());
        }
        Commands::Chat { action } => {
            let engine = build_engine(&config)?;
            match action {
                ChatAction::List { workspace } => {
                    let workspace = parse_ulid("workspace", workspace)?;
                    for chat in engine.store().list_chats(workspace).await? {
                        let mode = if chat.ai_enabled { "ai" } else { "manual" };
                        let retry = if chat.pending_retry { "  pending-retry" } else { "" };
                        println!(
                            "{}  {}  {}  {}{}",
                            chat.id,
                            chat.phone,
                            mode,
                            chat.qualification.as_str(),
                            retry
                        );
                    }
                }
                ChatAction::Toggle {
                    workspace,
                    chat,
                    enabled,
                } => {
                    let workspace = parse_ulid("workspace", workspace)?;
                    let chat = parse_ulid("chat", chat)?;
                    let chat = engine.set_ai_enabled(workspace, chat, *enabled).await?;
                    let mode = if chat.ai_enabled { "ai" } else { "manual" };
                    println!("Chat {} is now in {} mode", chat.id, mode);
                }
            }
        }
        Commands::Stats => {
            let engine = build_engine(&config)?;
            let stats = engine.store().stats().await?;
            println!("Workspaces:      {}", stats.workspaces);
            println!("Documents:       {}", stats.documents);
            println!("Chunks:          {}", stats.chunks);
            println!("Embedded chunks: {}", stats.embedded_chunks);
            println!("Chats:           {}", stats.chats);
            println!("Messages:        {}", stats.messages);
            println!("Storage:         {} bytes", stats.storage_bytes);
        }
    }

    Ok(())
}
