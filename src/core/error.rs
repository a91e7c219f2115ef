use reqwest::StatusCode;

/// Failure of one item attempt. Recorded on the item, never raised out of the queue.
#[derive(thiserror::Error, Debug)]
pub enum UploadError {
    #[error("{}", auth_message(.retryable))]
    Authentication { retryable: bool },

    #[error("session creation failed: {status}")]
    Session { status: StatusCode },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("upload failed: {status}")]
    Transport { status: StatusCode },

    #[error("network error during upload: {0}")]
    Network(String),

    #[error("upload timed out")]
    Timeout,

    #[error("read payload: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential unavailable: {0}")]
    Credential(String),
}

fn auth_message(retryable: &bool) -> &'static str {
    if *retryable {
        "unauthorized: token expired"
    } else {
        "not authenticated"
    }
}

impl UploadError {
    /// 401 from either phase; eligible for the one-shot credential refresh.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            UploadError::Session { status } => *status == StatusCode::UNAUTHORIZED,
            UploadError::Authentication { retryable } => *retryable,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UploadError::Timeout
        } else {
            UploadError::Network(e.to_string())
        }
    }
}
