use anyhow::{anyhow, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use pdf_rag_core::{
    discover_documents, format_error, upload_namespace, AutoLoader, CharacterNgramEmbedder,
    ChatCompletionsClient, EmbeddingProvider, HttpEmbedder, Namespace, PipelineConfig,
    PipelineError, QdrantStore, RagPipeline, ServiceSettings,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    services: ServiceArgs,

    #[command(flatten)]
    tuning: TuningArgs,
}

#[derive(Args)]
struct ServiceArgs {
    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", global = true)]
    qdrant_url: Option<String>,

    /// Qdrant collection shared by all namespaces
    #[arg(long, env = "QDRANT_COLLECTION", global = true)]
    qdrant_collection: Option<String>,

    #[arg(long, env = "QDRANT_API_KEY", hide_env_values = true, global = true)]
    qdrant_api_key: Option<String>,

    /// Embeddings endpoint base URL
    #[arg(long, env = "EMBEDDING_BASE_URL", global = true)]
    embedding_url: Option<String>,

    #[arg(long, env = "EMBEDDING_MODEL", global = true)]
    embedding_model: Option<String>,

    #[arg(long, env = "VOYAGE_API_KEY", hide_env_values = true, global = true)]
    voyage_api_key: Option<String>,

    /// Vector size of the embedding model and the Qdrant collection.
    #[arg(long, default_value = "1024", global = true)]
    embedding_dimensions: usize,

    /// Use the offline character n-gram embedder instead of the remote service.
    #[arg(long, default_value_t = false, global = true)]
    local_embeddings: bool,

    /// Chat-completions endpoint base URL
    #[arg(long, env = "CHAT_BASE_URL", global = true)]
    chat_url: Option<String>,

    #[arg(long, env = "CHAT_MODEL", global = true)]
    chat_model: Option<String>,

    #[arg(long, env = "XAI_API_KEY", hide_env_values = true, global = true)]
    xai_api_key: Option<String>,
}

#[derive(Args)]
struct TuningArgs {
    /// JSON pipeline config; flags below override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    #[arg(long, global = true)]
    chunk_overlap: Option<usize>,

    #[arg(long, global = true)]
    batch_size: Option<usize>,

    #[arg(long, global = true)]
    max_attempts: Option<u32>,

    #[arg(long, global = true)]
    score_threshold: Option<f64>,

    #[arg(long, global = true)]
    top_k: Option<usize>,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, embed and store a document (or every document in a folder).
    Ingest {
        /// PDF, text or markdown file.
        file: Option<PathBuf>,
        /// Folder scanned recursively; each file gets its own namespace.
        #[arg(long, conflicts_with = "file")]
        folder: Option<PathBuf>,
        /// Target namespace; derived from the file name and time when omitted.
        #[arg(long)]
        namespace: Option<String>,
    },
    /// Answer a question from the documents stored in a namespace.
    Ask {
        question: String,
        #[arg(long)]
        namespace: String,
    },
}

impl ServiceArgs {
    fn settings(&self) -> ServiceSettings {
        ServiceSettings {
            embedding_url: self.embedding_url.clone(),
            embedding_model: self.embedding_model.clone(),
            embedding_api_key: self.voyage_api_key.clone(),
            vector_store_url: self.qdrant_url.clone(),
            vector_store_collection: self.qdrant_collection.clone(),
            vector_store_api_key: self.qdrant_api_key.clone(),
            chat_url: self.chat_url.clone(),
            chat_model: self.chat_model.clone(),
            chat_api_key: self.xai_api_key.clone(),
        }
    }
}

impl TuningArgs {
    fn pipeline_config(&self) -> Result<PipelineConfig, PipelineError> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(size) = self.chunk_size {
            config.chunking.size = size;
        }
        if let Some(overlap) = self.chunk_overlap {
            config.chunking.overlap = overlap;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.retry.max_attempts = max_attempts;
        }
        if let Some(threshold) = self.score_threshold {
            config.retrieval.score_threshold = threshold;
        }
        if let Some(top_k) = self.top_k {
            config.retrieval.top_k = top_k;
        }

        config.validate()?;
        Ok(config)
    }
}

fn report(error: PipelineError) -> anyhow::Error {
    anyhow!(format_error(&error))
}

fn namespace_for(path: &Path, explicit: Option<&str>) -> Result<Namespace, PipelineError> {
    match explicit {
        Some(name) => Namespace::new(name),
        None => {
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default();
            upload_namespace(name, Utc::now())
        }
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
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-rag boot"
    );

    let settings = cli.services.settings();
    let config = cli.tuning.pipeline_config().map_err(report)?;
    let dimensions = cli.services.embedding_dimensions;

    if cli.services.local_embeddings {
        let embedder = CharacterNgramEmbedder { dimensions };
        run(cli.command, &settings, config, embedder).await
    } else {
        let embedder = HttpEmbedder::new(
            &settings.embedding_url().map_err(report)?,
            settings.require_embedding_api_key().map_err(report)?,
            settings.embedding_model(),
            dimensions,
        )
        .map_err(report)?;
        run(cli.command, &settings, config, embedder).await
    }
}

async fn run<E>(
    command: Command,
    settings: &ServiceSettings,
    config: PipelineConfig,
    embedder: E,
) -> anyhow::Result<()>
where
    E: EmbeddingProvider,
{
    let store = QdrantStore::new(
        &settings.require_vector_store_url().map_err(report)?,
        settings.require_vector_store_collection().map_err(report)?,
        embedder.dimensions(),
    )
    .map_err(report)?
    .with_api_key(settings.vector_store_api_key.clone());

    let model = ChatCompletionsClient::from_settings(settings).map_err(report)?;

    let pipeline = RagPipeline::new(AutoLoader, embedder, store, model, config).map_err(report)?;

    match command {
        Command::Ingest {
            file,
            folder,
            namespace,
        } => match (file, folder) {
            (Some(file), None) => {
                let namespace = namespace_for(&file, namespace.as_deref()).map_err(report)?;
                let outcome = pipeline
                    .ingest_document(&file, &namespace, None)
                    .await
                    .map_err(report)?;

                println!(
                    "{} chunks ingested into namespace {} in {:.2}s ({:.1} chunks/s, {} retries)",
                    outcome.chunk_count,
                    outcome.namespace,
                    outcome.elapsed_seconds,
                    outcome.rate_per_second,
                    outcome.retry.retries
                );
            }
            (None, Some(folder)) => {
                let files = discover_documents(&folder);
                if files.is_empty() {
                    bail!("no .pdf, .txt or .md files found in {}", folder.display());
                }

                let base = namespace_for(&folder, namespace.as_deref()).map_err(report)?;
                let outcomes = pipeline.ingest_many(&files, &base).await;

                let mut failed = 0usize;
                for outcome in &outcomes {
                    match &outcome.result {
                        Ok(summary) => println!(
                            "{}: {} chunks -> {}",
                            outcome.path.display(),
                            summary.chunk_count,
                            outcome.namespace
                        ),
                        Err(error) => {
                            failed += 1;
                            warn!(path = %outcome.path.display(), code = error.kind.code(), "file not ingested");
                            eprintln!("{}:\n{}", outcome.path.display(), format_error(error));
                        }
                    }
                }

                if failed > 0 {
                    bail!("{failed} of {} files failed to ingest", outcomes.len());
                }
            }
            _ => bail!("pass either a file or --folder"),
        },
        Command::Ask {
            question,
            namespace,
        } => {
            let answer = pipeline.answer_question(&question, &namespace).await;
            println!("{answer}");
        }
    }

    Ok(())
}
