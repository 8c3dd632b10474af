use chromiumoxide::error::CdpError;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unable to reach the browser: {0}")]
    Connection(String),

    #[error("Unable to load page: {0}")]
    Fetch(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Missing mandatory field `{field}`: {reason}")]
    Extraction { field: String, reason: String },

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Csv Error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

impl Error {
    /// Errors that should end the whole run instead of a single area or item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Config(_) | Error::Io(_))
    }
}

impl From<CdpError> for Error {
    /// A broken CDP connection ends the run; everything else concerns the current page.
    fn from(value: CdpError) -> Self {
        match value {
            CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse => {
                Error::Connection(value.to_string())
            }
            other => Error::Fetch(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lost_browser_connection_is_fatal() {
        let err = Error::from(CdpError::NoResponse);
        assert!(matches!(err, Error::Connection(_)), "{err}");
        assert!(err.is_fatal());
    }

    #[test]
    fn page_level_cdp_errors_only_skip_the_page() {
        let err = Error::from(CdpError::Timeout);
        assert!(matches!(err, Error::Fetch(_)), "{err}");
        assert!(!err.is_fatal());
    }
}
