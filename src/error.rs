use thiserror::Error;

/// Failure reported by a single `next_chunk` attempt.
///
/// [`ChunkError::Http`] with a status outside the retriable set and
/// [`ChunkError::Protocol`] are fatal; the rest is treated as transient.
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The server answered successfully but broke the upload protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for ChunkError {
    fn from(err: reqwest::Error) -> Self {
        ChunkError::Transport(err.to_string())
    }
}

/// Terminal failure of an upload session.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("The upload failed with an unexpected response: {0}")]
    MalformedResponse(String),

    #[error("A non-retriable HTTP error {status} occurred: {body}")]
    NonRetriable { status: u16, body: String },

    #[error("No longer attempting to retry after {retries} retries (last error: {last_error})")]
    RetriesExhausted { retries: u32, last_error: String },

    #[error("Could not read the video file: {0}")]
    Session(String),
}

impl UploadError {
    /// True for the retry-ceiling failure, as opposed to the immediate ones.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, UploadError::RetriesExhausted { .. })
    }
}
