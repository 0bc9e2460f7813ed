use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use study_rag_core::{
    discover_text_files, read_document_from_path, Corpus, Difficulty, Embedder, EngineConfig,
    GenerationProvider, HashedNgramEmbedder, HttpEmbedder, IngestionPipeline, LocalProvider,
    ProviderKind, RemoteProvider, SessionManager, Similarity, TaskDirective,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "study-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Generation backend: `remote` (hosted API) or `local` (Ollama runtime).
    #[arg(long, default_value = "local")]
    provider: String,

    /// API credential for the remote provider.
    #[arg(long, env = "STUDY_RAG_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL of the hosted LLM API.
    #[arg(long, default_value = "https://generativelanguage.googleapis.com")]
    remote_url: String,

    /// Hosted model name.
    #[arg(long, default_value = "gemini-1.5-flash")]
    remote_model: String,

    /// Base URL of the local model runtime.
    #[arg(long, default_value = "http://localhost:11434")]
    local_url: String,

    /// Local model name.
    #[arg(long, default_value = "llama2")]
    local_model: String,

    /// Where the corpus snapshot lives between runs.
    #[arg(long, default_value = "corpus.json")]
    corpus_path: PathBuf,

    /// Optional embeddings endpoint; the built-in hashing embedder is used
    /// when unset.
    #[arg(long)]
    embedding_url: Option<String>,

    /// Embedding model name (only meaningful with --embedding-url).
    #[arg(long, default_value = "nomic-embed-text")]
    embedding_model: String,

    /// Embedding vector dimension.
    #[arg(long, default_value = "128")]
    embedding_dimensions: usize,

    /// Characters per chunk.
    #[arg(long, default_value = "800")]
    chunk_size: usize,

    /// Characters of overlap between consecutive chunks.
    #[arg(long, default_value = "150")]
    chunk_overlap: usize,

    /// How many chunks to retrieve per question.
    #[arg(long, default_value = "3")]
    top_k: usize,

    /// Per-request deadline in seconds (local CPU inference can be slow).
    #[arg(long, default_value = "300")]
    timeout_secs: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a folder of .txt/.md study files into the corpus.
    Ingest {
        /// Folder scanned recursively for text files.
        #[arg(long)]
        folder: String,
    },
    /// Ask the tutor one question grounded in the corpus.
    Ask {
        #[arg(long)]
        question: String,
    },
    /// Summarize what the corpus says about a topic.
    Summarize {
        #[arg(long)]
        topic: String,
    },
    /// Generate practice questions about a topic.
    Quiz {
        #[arg(long, default_value = "")]
        topic: String,
        #[arg(long, default_value = "medium")]
        difficulty: String,
    },
    /// Interactive tutoring session over stdin.
    Chat,
    /// Drop every chunk from the corpus and start over.
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let provider_kind: ProviderKind = cli.provider.parse()?;
    let embedder = build_embedder(&cli);
    let config = engine_config(&cli, provider_kind, embedder.as_ref());
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        provider = %provider_kind,
        embedding_model = embedder.model_id(),
        "study-rag boot"
    );

    match cli.command {
        Command::Ingest { folder } => {
            let corpus = open_or_create_corpus(&cli.corpus_path, embedder.as_ref())?;
            let pipeline = IngestionPipeline::new(embedder.clone(), config.chunking()?);

            let files = discover_text_files(Path::new(&folder));
            if files.is_empty() {
                bail!("no .txt or .md files found under {folder}");
            }

            let mut total_chunks = 0usize;
            for path in files {
                let document = read_document_from_path(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                let summary = pipeline
                    .ingest(&document, &corpus)
                    .await
                    .with_context(|| format!("ingesting {}", path.display()))?;
                info!(
                    file = %path.display(),
                    chunks = summary.chunks_indexed,
                    replaced = summary.chunks_replaced,
                    "document ingested"
                );
                total_chunks += summary.chunks_indexed;
            }

            corpus.save_to(&cli.corpus_path)?;
            println!(
                "{} chunks across the corpus ({} new) at {}",
                corpus.size(),
                total_chunks,
                Utc::now().to_rfc3339()
            );
        }
        Command::Ask { ref question } => {
            let outcome =
                run_single_turn(&cli, &config, embedder, TaskDirective::Explain, &question).await?;
            print_outcome(&outcome);
        }
        Command::Summarize { ref topic } => {
            let outcome =
                run_single_turn(&cli, &config, embedder, TaskDirective::Summarize, &topic).await?;
            print_outcome(&outcome);
        }
        Command::Quiz { ref topic, ref difficulty } => {
            let difficulty: Difficulty = difficulty.parse()?;
            let directive = TaskDirective::GenerateQuestions { difficulty };
            let outcome = run_single_turn(&cli, &config, embedder, directive, &topic).await?;
            print_outcome(&outcome);
        }
        Command::Chat => {
            let corpus = Arc::new(load_corpus(&cli.corpus_path)?);
            let provider = build_provider(&cli, &config).await?;
            let manager = SessionManager::new(embedder, &config);

            let session_id = uuid::Uuid::new_v4().to_string();
            manager.create_session(&session_id)?;
            manager.bind(&session_id, corpus, provider).await?;
            info!(session = %session_id, "chat session started");

            println!("Ask away (empty line or `exit` to quit).");
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                let question = line.trim();
                if question.is_empty() || question.eq_ignore_ascii_case("exit") {
                    break;
                }
                match manager
                    .take_turn(&session_id, TaskDirective::Explain, question)
                    .await
                {
                    Ok(outcome) => print_outcome(&outcome),
                    Err(error) => {
                        // turn-level failure; the session stays usable
                        warn!(%error, "turn failed");
                        println!("(the tutor could not answer: {error})");
                    }
                }
            }

            manager.close(&session_id).await?;
        }
        Command::Reset => {
            let corpus = load_corpus(&cli.corpus_path)?;
            corpus.reset();
            corpus.save_to(&cli.corpus_path)?;
            println!("corpus cleared");
        }
    }

    Ok(())
}

fn build_embedder(cli: &Cli) -> Arc<dyn Embedder> {
    match &cli.embedding_url {
        Some(url) => Arc::new(HttpEmbedder::new(
            url,
            &cli.embedding_model,
            cli.embedding_dimensions,
            Duration::from_secs(cli.timeout_secs),
        )),
        None => Arc::new(HashedNgramEmbedder::new(cli.embedding_dimensions)),
    }
}

/// The config's model tag comes from the embedder actually constructed, not
/// from `--embedding-model`, which only matters once `--embedding-url` is
/// set. Corpora are tagged and checked against this value.
fn engine_config(cli: &Cli, provider: ProviderKind, embedder: &dyn Embedder) -> EngineConfig {
    EngineConfig {
        provider,
        credential: cli.api_key.clone(),
        embedding_model: embedder.model_id().to_string(),
        chunk_size: cli.chunk_size,
        chunk_overlap: cli.chunk_overlap,
        retrieval_k: cli.top_k,
        request_timeout_secs: cli.timeout_secs,
        ..Default::default()
    }
}

async fn run_single_turn(
    cli: &Cli,
    config: &EngineConfig,
    embedder: Arc<dyn Embedder>,
    directive: TaskDirective,
    input: &str,
) -> anyhow::Result<study_rag_core::TurnOutcome> {
    let corpus = Arc::new(load_corpus(&cli.corpus_path)?);
    let provider = build_provider(cli, config).await?;
    let manager = SessionManager::new(embedder, config);

    let session_id = uuid::Uuid::new_v4().to_string();
    manager.create_session(&session_id)?;
    manager.bind(&session_id, corpus, provider).await?;

    let outcome = manager.take_turn(&session_id, directive, input).await?;
    manager.close(&session_id).await?;
    Ok(outcome)
}

async fn build_provider(
    cli: &Cli,
    config: &EngineConfig,
) -> anyhow::Result<Arc<dyn GenerationProvider>> {
    match config.provider {
        ProviderKind::Remote => {
            let api_key = config
                .credential
                .clone()
                .context("remote provider requires --api-key or STUDY_RAG_API_KEY")?;
            Ok(Arc::new(RemoteProvider::new(
                &cli.remote_url,
                &cli.remote_model,
                api_key,
                config.request_timeout(),
            )))
        }
        ProviderKind::Local => {
            let provider = LocalProvider::new(
                &cli.local_url,
                &cli.local_model,
                config.request_timeout(),
            );
            provider
                .ensure_ready()
                .await
                .with_context(|| format!("local model runtime at {}", cli.local_url))?;
            Ok(Arc::new(provider))
        }
    }
}

fn open_or_create_corpus(path: &Path, embedder: &dyn Embedder) -> anyhow::Result<Corpus> {
    if path.exists() {
        let corpus = Corpus::load_from(path)?;
        corpus.check_model(embedder.model_id())?;
        info!(corpus = corpus.name(), size = corpus.size(), "corpus loaded");
        return Ok(corpus);
    }
    info!("creating a fresh corpus");
    Ok(Corpus::new(
        "study",
        embedder.model_id(),
        embedder.dimensions(),
        Similarity::Cosine,
    ))
}

fn load_corpus(path: &Path) -> anyhow::Result<Corpus> {
    if !path.exists() {
        bail!(
            "no corpus at {} - run `study-rag ingest --folder <dir>` first",
            path.display()
        );
    }
    Ok(Corpus::load_from(path)?)
}

fn print_outcome(outcome: &study_rag_core::TurnOutcome) {
    println!("{}", outcome.reply);
    if outcome.grounded {
        for chunk_id in &outcome.context_chunk_ids {
            println!("  source chunk: {chunk_id}");
        }
    } else {
        println!("  (no study material matched; the answer is ungrounded)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_records_the_built_in_embedders_model() {
        let cli = Cli::try_parse_from(["study-rag", "ask", "--question", "x"]).unwrap();
        let embedder = build_embedder(&cli);
        let config = engine_config(&cli, ProviderKind::Local, embedder.as_ref());
        assert_eq!(config.embedding_model, embedder.model_id());
        assert_eq!(config.embedding_model, "hashed-trigram-128");
    }

    #[test]
    fn remote_embedder_keeps_the_named_model() {
        let cli = Cli::try_parse_from([
            "study-rag",
            "--embedding-url",
            "http://localhost:11434",
            "--embedding-model",
            "nomic-embed-text",
            "ask",
            "--question",
            "x",
        ])
        .unwrap();
        let embedder = build_embedder(&cli);
        let config = engine_config(&cli, ProviderKind::Local, embedder.as_ref());
        assert_eq!(config.embedding_model, "nomic-embed-text");
    }
}
