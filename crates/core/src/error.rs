use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("vector dimension {actual} does not match collection dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("collection not available yet: {0}")]
    NotReady(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid document id: {0:?}")]
    InvalidId(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("embedding api returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("embedding model failed to initialize: {0}")]
    Init(String),
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("model api returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("missing credentials for {0}")]
    MissingCredentials(String),

    #[error("model response contained no usable text")]
    EmptyResponse,
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("{0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("generative model failure: {0}")]
    Generation(#[from] LlmError),
}

impl RagError {
    pub fn code(&self) -> &'static str {
        match self {
            RagError::Validation(_) => "VALIDATION_ERROR",
            RagError::Store(StoreError::InvalidId(_)) => "VALIDATION_ERROR",
            RagError::Ingest(IngestError::InvalidArgument(_)) => "VALIDATION_ERROR",
            RagError::NotFound(_) => "NOT_FOUND",
            RagError::Ingest(_) => "STORAGE_ERROR",
            RagError::Index(_) => "INDEX_UNAVAILABLE",
            RagError::Store(_) => "STORAGE_ERROR",
            RagError::Embedding(_) => "EMBEDDING_FAILED",
            RagError::Generation(_) => "GENERATION_FAILED",
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self.code(), "VALIDATION_ERROR" | "NOT_FOUND")
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
