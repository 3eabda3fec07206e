/// Transport-level failure while retrieving an upstream document.
///
/// A 404 is not represented here: the fetcher reports it as "no data".
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("Cannot build a request for {0}")]
    InvalidRequest(String),
    #[error("Failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },
}
