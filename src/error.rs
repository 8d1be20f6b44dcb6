#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),
    #[error("search error: {0}")]
    Search(#[from] SearchError),
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
    #[error("no answer after {rounds} search rounds")]
    MaxRoundsExceeded { rounds: usize },
    #[error("agent cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("API returned {status}: {body}")]
    ApiError { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    Parse(String),
    #[error("output does not match schema: {0}")]
    Schema(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("search API returned {status}: {body}")]
    ApiError { status: u16, body: String },
    #[error("failed to parse results: {0}")]
    Parse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("reader returned {status} for {url}")]
    Status { status: u16, url: String },
}
