pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod scoring;
pub mod workflow;

pub use chunking::{build_page_chunks, normalize_whitespace, pack_chunks};
pub use config::{
    LlmConfig, ParseServiceConfig, DEFAULT_CHAT_MODEL, DEFAULT_CHAT_URL, LLM_API_KEY_VAR,
    PARSE_API_KEY_VAR,
};
pub use embeddings::{Embedder, HashedTrigramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{
    ConfigError, IndexError, IngestError, LlmError, ScoringError, WorkflowError,
};
pub use extractor::{extract_page_texts, PageText, PdfExtractor};
pub use index::{FlatIndex, IndexOpenOptions, VectorIndex, INDEX_FORMAT_VERSION};
pub use ingest::{discover_pdf_files, ingest_folder_chunks, IngestionReport, SkippedPdf};
pub use llm::{ChatCompletionsClient, LanguageModel};
pub use models::{ChunkingLimits, DocChunk, DocumentRecord, RetrievedPassage};
pub use scoring::{FixedScorer, GroundednessScorer, LexicalOverlapScorer};
pub use workflow::{
    Decision, QueryWorkflow, Step, Termination, TransitionTable, WorkflowOutcome,
    WorkflowSettings, WorkflowState, GROUNDEDNESS_THRESHOLD, REFINEMENT_MARKER,
};
