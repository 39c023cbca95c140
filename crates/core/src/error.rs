use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingSecret(&'static str),

    #[error("invalid endpoint url in {name}: {source}")]
    InvalidEndpoint {
        name: &'static str,
        source: url::ParseError,
    },
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking limits: {0}")]
    InvalidChunkLimits(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("parsing service failed: {0}")]
    ParseService(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no index artifact at {0}")]
    Missing(String),

    #[error("index artifact is untrusted ({details}); loading it requires the explicit trust flag")]
    UntrustedFormat { details: String },

    #[error("embedder mismatch: index was built with {indexed}, query side uses {current}")]
    EmbedderMismatch { indexed: String, current: String },

    #[error("vector dimension {found} does not match index dimension {expected}")]
    DimensionMismatch { found: usize, expected: usize },

    #[error("index request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("model endpoint rejected credentials ({status})")]
    Auth { status: u16 },

    #[error("model endpoint rate limited the request")]
    RateLimited,

    #[error("model endpoint returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("model returned an empty completion")]
    EmptyCompletion,
}

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("scoring backend failed: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("query is empty")]
    EmptyQuery,

    #[error("retrieval failed: {0}")]
    Retrieval(#[from] IndexError),

    #[error("generation failed: {0}")]
    Generation(#[from] LlmError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
