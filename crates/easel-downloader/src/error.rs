//! Download-layer errors; `Display` leads with the error kind recorded on
//! failed download records.

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// The HTTP request failed below the status-code level.
    #[error("DownloadNetworkError: {0}")]
    Network(#[from] reqwest::Error),

    /// The remote answered with an unexpected status.
    #[error("DownloadNetworkError: status {status} from {url}")]
    Http { status: u16, url: String },

    /// The download was cancelled via its cancellation signal.
    #[error("DownloadCancelled")]
    Cancelled,

    /// A finished file is missing or empty on disk.
    #[error("DownloadIntegrityError: {0}")]
    Integrity(String),

    /// The registry's metadata response was unusable.
    #[error("DownloadNetworkError: registry metadata: {0}")]
    Registry(String),

    /// No download with this id.
    #[error("Download '{0}' not found")]
    NotFound(String),

    #[error("IOError: {0}")]
    Io(#[from] std::io::Error),

    #[error("DBError: {0}")]
    Db(#[from] sqlx::Error),
}
