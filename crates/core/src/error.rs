use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("xml parse error in {source_id}: {details}")]
    XmlParse { source_id: String, details: String },

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("image decode error: {0}")]
    ImageDecode(String),

    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("extraction worker failed: {0}")]
    Worker(String),
}

/// Failure of one of the black-box model capabilities (embedding, OCR, completion).
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("capability unavailable: {0}")]
    Unavailable(String),

    #[error("capability timed out after {0:?}")]
    TimedOut(Duration),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BadResponse { backend: String, details: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("index database error: {0}")]
    Database(String),

    #[error("index io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("embedding dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl StoreError {
    /// Infrastructure failures end the whole indexing run; record-level ones only the current source.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Io(_))
    }
}

impl From<redb::Error> for StoreError {
    fn from(error: redb::Error) -> Self {
        match error {
            redb::Error::Io(io) => Self::Io(io),
            other => Self::Database(other.to_string()),
        }
    }
}

pub(crate) fn db_error(error: impl Into<redb::Error>) -> StoreError {
    StoreError::from(error.into())
}

#[derive(Debug, Error)]
pub enum UpsertError {
    #[error("embedding failed for chunk {chunk_id}: {source}")]
    Embedding {
        chunk_id: String,
        #[source]
        source: CapabilityError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum IndexingError {
    #[error("vector index unavailable, run aborted: {0}")]
    Storage(#[from] StoreError),

    #[error("invalid indexing request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Config(#[from] IngestError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("query is empty")]
    EmptyQuery,

    #[error("query embedding failed: {0}")]
    Embedding(#[from] CapabilityError),

    #[error("index search failed: {0}")]
    Store(#[from] StoreError),

    #[error("search request failed: {0}")]
    Request(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
