use action_executor_core::AppError;
use http::StatusCode;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Required credentials or IDs are missing. Raised before any network call.
    #[error("{0}")]
    Configuration(String),
    /// GitHub rejected the credential exchange or the credential itself.
    #[error("GitHub authentication failed: {message}")]
    Auth { status: Option<StatusCode>, message: String },
    /// The App private key could not be found or parsed.
    #[error("{0}")]
    Key(String),
    /// Any other non-2xx response from GitHub.
    #[error("GitHub API error ({status}): {message}")]
    Upstream { status: StatusCode, message: String },
    #[error("{0}")]
    InvalidRequest(String),
    /// The request never produced an HTTP status (connection failure, unreadable body).
    #[error("GitHub request failed: {0}")]
    Transport(#[source] Box<octocrab::Error>),
}

impl Error {
    /// Classify an octocrab error from a regular API call.
    pub(crate) fn upstream(err: octocrab::Error) -> Self {
        match err {
            octocrab::Error::GitHub { source, .. } => {
                Self::Upstream { status: source.status_code, message: source.message.clone() }
            }
            err => Self::Transport(Box::new(err)),
        }
    }

    /// Classify an octocrab error from a credential exchange.
    pub(crate) fn auth(err: octocrab::Error) -> Self {
        match err {
            octocrab::Error::GitHub { source, .. } => {
                Self::Auth { status: Some(source.status_code), message: source.message.clone() }
            }
            err => Self::Transport(Box::new(err)),
        }
    }

    /// Upstream status code, if GitHub answered at all.
    pub fn upstream_status(&self) -> Option<StatusCode> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            Self::Auth { status, .. } => *status,
            _ => None,
        }
    }

    pub fn into_app_error(self) -> AppError {
        match self {
            Self::Configuration(_) | Self::Key(_) => {
                tracing::error!("GitHub integration is misconfigured: {}", self);
                AppError::Message(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "The server is not configured to talk to GitHub".to_string(),
                )
            }
            Self::Auth { .. } => AppError::Message(StatusCode::BAD_GATEWAY, self.to_string()),
            Self::Upstream { status, message } => {
                let status = if status.is_client_error() || status.is_server_error() {
                    status
                } else {
                    StatusCode::BAD_GATEWAY
                };
                AppError::Message(status, message)
            }
            Self::InvalidRequest(message) => AppError::Message(StatusCode::BAD_REQUEST, message),
            Self::Transport(_) => AppError::Message(StatusCode::BAD_GATEWAY, self.to_string()),
        }
    }
}
