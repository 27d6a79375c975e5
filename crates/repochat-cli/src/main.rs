//! Repochat CLI - ask questions about an indexed code repository

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use repochat_core::chat::{ChatMessage, ChatPayload};
use repochat_core::config::Config;
use repochat_core::llm::{ModelGateway, OpenAiGateway};
use repochat_core::pipeline::{ChatPipeline, ResponseBody};
use repochat_core::retrieval::SqliteVectorIndex;
use repochat_core::settings::{
    CredentialStore, EnvCredentialStore, RepositoryStore, SqliteRepositoryStore, SqliteSettingsStore,
};
use repochat_core::storage::{Database, DatabaseConfig};
use tracing::info;

#[derive(Parser)]
#[command(name = "repochat")]
#[command(author, version, about = "Ask questions about an indexed code repository", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database path (defaults to the per-user config directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage registered repositories
    Repos {
        #[command(subcommand)]
        action: RepoAction,
    },

    /// Store the API key used for embedding and completion calls
    SetKey {
        /// The API key
        key: String,
    },

    /// Index text files into a repository's namespace
    Index {
        /// Repository id to index into
        repo_id: String,
        /// Files to index, one document per file
        files: Vec<PathBuf>,
    },

    /// Ask a question about a repository and stream the answer
    Ask {
        /// Repository id to ask about
        repo_id: String,
        /// The question
        question: String,
        /// Prior turns as alternating user/assistant messages
        #[arg(long, value_name = "TEXT")]
        history: Vec<String>,
    },
}

#[derive(Subcommand)]
enum RepoAction {
    /// Register a repository
    Add {
        /// Repository id callers select it by
        id: String,
        /// Human-readable name
        name: String,
        /// Retrieval namespace (defaults to the id)
        #[arg(long)]
        namespace: Option<String>,
    },
    /// List registered repositories
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("repochat=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let db = match &cli.db {
        Some(path) => Database::new(DatabaseConfig::with_path(path)).await?,
        None => Database::open_default().await?,
    };

    match cli.command {
        Commands::Repos { action } => cmd_repos(&db, action, cli.quiet).await,
        Commands::SetKey { key } => cmd_set_key(&db, &key, cli.quiet).await,
        Commands::Index { repo_id, files } => cmd_index(&db, &repo_id, &files, cli.quiet).await,
        Commands::Ask {
            repo_id,
            question,
            history,
        } => cmd_ask(&db, &repo_id, &question, &history).await,
    }
}

async fn cmd_repos(db: &Database, action: RepoAction, quiet: bool) -> anyhow::Result<()> {
    let repos = SqliteRepositoryStore::new(db.pool().clone());

    match action {
        RepoAction::Add {
            id,
            name,
            namespace,
        } => {
            let namespace = namespace.unwrap_or_else(|| id.clone());
            repos.add_repository(&id, &name, &namespace).await?;
            if !quiet {
                println!("Registered repository '{}' (namespace: {})", id, namespace);
            }
        }
        RepoAction::List => {
            let all = repos.list_repositories().await?;
            if all.is_empty() {
                if !quiet {
                    println!("No repositories registered.");
                    println!("\nRegister one with: repochat repos add <id> <name>");
                }
            } else {
                for repo in all {
                    println!("{}  {} (namespace: {})", repo.id, repo.name, repo.namespace);
                }
            }
        }
    }

    Ok(())
}

async fn cmd_set_key(db: &Database, key: &str, quiet: bool) -> anyhow::Result<()> {
    let settings = SqliteSettingsStore::new(db.pool().clone());
    settings.store_api_key(key).await?;
    if !quiet {
        println!("API key stored.");
    }
    Ok(())
}

async fn cmd_index(
    db: &Database,
    repo_id: &str,
    files: &[PathBuf],
    quiet: bool,
) -> anyhow::Result<()> {
    if files.is_empty() {
        anyhow::bail!("No files to index. Pass one or more file paths.");
    }

    let config = Config::load()?;
    let credentials = EnvCredentialStore::new(std::sync::Arc::new(SqliteSettingsStore::new(
        db.pool().clone(),
    )));
    let repos = SqliteRepositoryStore::new(db.pool().clone());
    let index = SqliteVectorIndex::new(db.pool().clone());

    let api_key = credentials
        .stored_api_key()
        .await?
        .ok_or_else(|| anyhow::anyhow!("No API key is stored. Run `repochat set-key <key>` first."))?;

    let repo = repos
        .repository(repo_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Repository '{}' is not registered", repo_id))?;

    let gateway = OpenAiGateway::new(config.llm.clone());

    for file in files {
        let content = std::fs::read_to_string(file)?;
        let embedding = gateway.embed_query(&api_key, &content).await?;
        let source = file.to_string_lossy();
        index
            .insert_document(&repo.namespace, &content, Some(&source), &embedding)
            .await?;
        if !quiet {
            println!("Indexed {}", source);
        }
    }

    info!(repo_id = %repo_id, files = files.len(), "Indexing complete");
    Ok(())
}

async fn cmd_ask(
    db: &Database,
    repo_id: &str,
    question: &str,
    history: &[String],
) -> anyhow::Result<()> {
    let config = Config::load()?;
    let pipeline = ChatPipeline::from_database(db, &config);

    // Alternating user/assistant turns, question last
    let mut messages: Vec<ChatMessage> = history
        .iter()
        .enumerate()
        .map(|(i, text)| {
            if i % 2 == 0 {
                ChatMessage::user(text)
            } else {
                ChatMessage::assistant(text)
            }
        })
        .collect();
    messages.push(ChatMessage::user(question));

    let payload = ChatPayload::new(messages, repo_id);
    let response = pipeline.respond(&payload).await;

    match response.body {
        ResponseBody::Stream(mut stream) => {
            let mut stdout = std::io::stdout();
            while let Some(fragment) = stream.next().await {
                stdout.write_all(fragment.as_bytes())?;
                stdout.flush()?;
            }
            stdout.write_all(b"\n")?;
            Ok(())
        }
        ResponseBody::Error(body) => {
            eprintln!("{}", serde_json::to_string_pretty(&body)?);
            std::process::exit(1);
        }
    }
}
