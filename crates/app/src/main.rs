use chrono::Utc;
use clap::{Parser, Subcommand};
use pdf_answer_core::{
    ingest_folder_chunks, ChatCompletionsClient, ChunkingLimits, Embedder, FlatIndex,
    HashedTrigramEmbedder, IndexOpenOptions, LexicalOverlapScorer, LlmConfig, ParseServiceConfig,
    QueryWorkflow, Step, Termination, VectorIndex, WorkflowSettings, WorkflowState,
};
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-answer", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the persisted vector index artifact.
    #[arg(long, default_value = "pdf_answer_index")]
    index_dir: String,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a PDF folder and build the vector index.
    Ingest {
        /// Folder that contains PDFs recursively.
        #[arg(long)]
        folder: String,
    },
    /// Answer a question over the indexed collection.
    Ask {
        /// The question to answer.
        #[arg(long, default_value = "What are the vitamin D rich foods?")]
        query: String,
        /// Number of passages retrieved per iteration.
        #[arg(long, default_value = "3")]
        top_k: usize,
        /// Maximum number of query refinements.
        #[arg(long, default_value = "3")]
        max_iter: u32,
        /// Load an index artifact with a missing or foreign-format manifest.
        #[arg(long, default_value_t = false)]
        allow_untrusted_index: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let index_dir = Path::new(&cli.index_dir);
    let embedder = HashedTrigramEmbedder::default();

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-answer boot"
    );

    match cli.command {
        Command::Ingest { folder } => {
            let parse_service = ParseServiceConfig::from_env();
            if parse_service.is_none() {
                warn!("no parsing-service key configured; using local extraction only");
            }

            let report = ingest_folder_chunks(
                Path::new(&folder),
                ChunkingLimits::default(),
                parse_service.as_ref(),
            )
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            if !report.skipped_files.is_empty() {
                warn!(
                    "skipped_files={} for folder={}",
                    report.skipped_files.len(),
                    folder
                );
                for skipped in &report.skipped_files {
                    warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
                }
            }

            info!(
                folder = %folder,
                document_count = report.documents.len(),
                chunk_count = report.chunks.len(),
                "indexing chunks"
            );

            let texts: Vec<String> = report.chunks.iter().map(|chunk| chunk.text.clone()).collect();
            let embeddings = embedder.embed_batch(&texts);

            let index = FlatIndex::new(embedder.id(), embedder.dimensions());
            index
                .add_chunks(&report.chunks, &embeddings)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            index
                .persist(index_dir)
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            println!(
                "{} chunks from {} documents indexed at {}",
                report.chunks.len(),
                report.documents.len(),
                Utc::now().to_rfc3339()
            );
        }
        Command::Ask {
            query,
            top_k,
            max_iter,
            allow_untrusted_index,
        } => {
            // missing LLM key is fatal before the workflow starts
            let llm_config = LlmConfig::from_env()?;
            let model = ChatCompletionsClient::new(&llm_config);

            let index = FlatIndex::open(
                index_dir,
                IndexOpenOptions {
                    allow_untrusted: allow_untrusted_index,
                },
            )
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            index
                .check_embedder(&embedder.id())
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            let workflow = QueryWorkflow::new(
                embedder,
                index,
                model,
                LexicalOverlapScorer::default(),
                WorkflowSettings {
                    loop_max_iter: max_iter,
                    top_k,
                    ..WorkflowSettings::default()
                },
            );

            let outcome = workflow
                .answer_observed(&query, print_step)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;

            if outcome.termination == Termination::GuardTripped {
                warn!("workflow hit its step budget without a terminal decision");
            }

            println!("\nfinal response: {}", outcome.response());
            println!(
                "refinements={} groundedness={}",
                outcome.refinements(),
                outcome
                    .state
                    .groundedness_score
                    .map(|score| format!("{score:.2}"))
                    .unwrap_or_else(|| "n/a".to_string())
            );
        }
    }

    Ok(())
}

fn print_step(step: Step, state: &WorkflowState) {
    println!("step: {}", step.name());
    println!("  expanded_query: {}", state.expanded_query);
    println!(
        "  passages={} loop={}/{}",
        state.context.len(),
        state.loop_count,
        state.loop_max_iter
    );
    if let Some(score) = state.groundedness_score {
        println!("  groundedness_score: {score:.2}");
    }
    if let Some(decision) = state.decision {
        println!("  decision: {decision:?}");
    }
}
