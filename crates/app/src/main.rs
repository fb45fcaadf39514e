mod server;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use docchat_core::{
    build_language_model, ingest_folder, EmbeddingConfig, EmbeddingService, FsDocumentStore,
    LlmConfig, LlmProvider, MemoryIndex, QdrantStore, RagPipeline, VectorIndex,
    DEFAULT_EMBEDDING_BATCH, DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docchat", version, about = "Ask cited questions about your documents")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    backends: BackendArgs,
}

#[derive(Args)]
struct BackendArgs {
    /// Directory for raw uploads and cleaned text.
    #[arg(long, env = "DOCCHAT_DATA_DIR", default_value = "./data", global = true)]
    data_dir: PathBuf,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333", global = true)]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, default_value = "docchat_chunks", global = true)]
    qdrant_collection: String,

    /// Keep vectors in process memory instead of Qdrant. Nothing survives a restart.
    #[arg(long, default_value_t = false, global = true)]
    in_memory_index: bool,

    #[arg(long, value_enum, default_value_t = EmbeddingProviderArg::Ngram, global = true)]
    embedding_provider: EmbeddingProviderArg,

    #[arg(long, default_value = "https://api.openai.com/v1", global = true)]
    embedding_url: String,

    #[arg(long, default_value = "text-embedding-3-small", global = true)]
    embedding_model: String,

    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true, global = true)]
    embedding_api_key: Option<String>,

    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIMENSIONS, global = true)]
    ngram_dimensions: usize,

    #[arg(long, value_enum, default_value_t = LlmProviderArg::Openai, global = true)]
    llm_provider: LlmProviderArg,

    #[arg(long, global = true)]
    llm_url: Option<String>,

    #[arg(long, global = true)]
    llm_model: Option<String>,

    #[arg(long, env = "LLM_API_KEY", hide_env_values = true, global = true)]
    llm_api_key: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbeddingProviderArg {
    /// Offline hashed character trigrams.
    Ngram,
    /// OpenAI-compatible `/embeddings` endpoint.
    Openai,
}

#[derive(Clone, Copy, ValueEnum)]
enum LlmProviderArg {
    Openai,
    Gemini,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        #[arg(long, env = "DOCCHAT_BIND", default_value = "127.0.0.1:8080")]
        bind: String,
    },
    /// Ingest one document or every supported document under a folder.
    Ingest {
        #[arg(long, conflicts_with = "folder", required_unless_present = "folder")]
        file: Option<PathBuf>,
        /// Folder scanned recursively for pdf, txt and md files.
        #[arg(long)]
        folder: Option<PathBuf>,
    },
    /// Ask one question and print the cited answer.
    Ask {
        #[arg(long)]
        query: String,
        #[arg(long)]
        session: Option<String>,
        /// Restrict retrieval to these document ids. Repeatable.
        #[arg(long = "doc")]
        docs: Vec<String>,
    },
}

impl BackendArgs {
    fn embedding_config(&self) -> EmbeddingConfig {
        match self.embedding_provider {
            EmbeddingProviderArg::Ngram => EmbeddingConfig::Ngram {
                dimensions: self.ngram_dimensions,
            },
            EmbeddingProviderArg::Openai => EmbeddingConfig::OpenAi {
                base_url: self.embedding_url.clone(),
                model: self.embedding_model.clone(),
                api_key: self.embedding_api_key.clone(),
                batch_size: DEFAULT_EMBEDDING_BATCH,
            },
        }
    }

    fn llm_config(&self) -> LlmConfig {
        let (provider, default_url, default_model) = match self.llm_provider {
            LlmProviderArg::Openai => (LlmProvider::OpenAi, "https://api.openai.com/v1", "gpt-4o-mini"),
            LlmProviderArg::Gemini => (
                LlmProvider::Gemini,
                "https://generativelanguage.googleapis.com",
                "gemini-1.5-flash",
            ),
        };
        LlmConfig {
            provider,
            base_url: self.llm_url.clone().unwrap_or_else(|| default_url.to_string()),
            model: self.llm_model.clone().unwrap_or_else(|| default_model.to_string()),
            api_key: self.llm_api_key.clone(),
        }
    }

    fn build_pipeline(&self) -> anyhow::Result<RagPipeline> {
        let index: Arc<dyn VectorIndex> = if self.in_memory_index {
            Arc::new(MemoryIndex::new())
        } else {
            Arc::new(
                QdrantStore::new(&self.qdrant_url, self.qdrant_collection.clone())
                    .context("invalid qdrant url")?,
            )
        };
        let store = Arc::new(FsDocumentStore::new(self.data_dir.clone()));
        let model = build_language_model(&self.llm_config()).context("invalid llm settings")?;
        let embeddings = EmbeddingService::new(self.embedding_config());

        Ok(RagPipeline::new(index, store, model, embeddings))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let pipeline = cli.backends.build_pipeline()?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        data_dir = %cli.backends.data_dir.display(),
        in_memory_index = cli.backends.in_memory_index,
        "docchat boot"
    );

    match cli.command {
        Command::Serve { bind } => {
            server::serve(Arc::new(pipeline), &bind).await?;
        }
        Command::Ingest { file, folder } => {
            if let Some(folder) = folder {
                let report = ingest_folder(&pipeline, &folder).await?;
                for skipped in &report.skipped_files {
                    warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped document");
                }
                for outcome in &report.ingested {
                    println!(
                        "{}\t{}\tchunks={}\tflagged_pages={:?}",
                        outcome.doc_id, outcome.display_name, outcome.chunk_count, outcome.flagged_pages
                    );
                }
                println!(
                    "{} ingested, {} skipped",
                    report.ingested.len(),
                    report.skipped_files.len()
                );
            } else if let Some(file) = file {
                let outcome = docchat_core::ingest::ingest_path(&pipeline, &file).await?;
                println!(
                    "{}\t{}\tchunks={}\tflagged_pages={:?}",
                    outcome.doc_id, outcome.display_name, outcome.chunk_count, outcome.flagged_pages
                );
            }
        }
        Command::Ask {
            query,
            session,
            docs,
        } => {
            let target = (!docs.is_empty()).then_some(docs);
            let outcome = pipeline.ask(session.as_deref(), &query, target).await?;

            println!("session: {}", outcome.session_id);
            println!("{}", outcome.answer);
            for (position, citation) in outcome.citations.iter().enumerate() {
                println!(
                    "  [#{}] doc={} chunk={}",
                    position + 1,
                    citation.doc_id,
                    citation.chunk_ordinal
                );
            }
        }
    }

    Ok(())
}
