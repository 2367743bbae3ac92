use crate::{
    denylist::Banned, http_client::FetchError, minify::MinifyError, reference::ParseError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Serialize)]
pub struct ErrorResponse {
    message: String,
}

/// Every way a gateway request can fail. Each one ends the request.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The request path is not of a servable shape.
    #[error("invalid path: {0}")]
    InvalidPath(#[from] ParseError),

    /// The owner or repository is on the denylist.
    #[error(transparent)]
    Forbidden(#[from] Banned),

    /// The upstream rejected an owner-only request.
    #[error("bad request: {owner}")]
    UpstreamBadOwner {
        /// Requested owner.
        owner: String,
    },

    /// The upstream rejected a request naming a repository.
    #[error("repo not found: {owner}/{repo}")]
    UpstreamRepoNotFound {
        /// Requested owner.
        owner: String,
        /// Requested repository.
        repo: String,
    },

    /// The upstream has no such file.
    #[error("file not found: {owner}/{repo}/{path}")]
    UpstreamNotFound {
        /// Requested owner.
        owner: String,
        /// Requested repository.
        repo: String,
        /// Requested file path.
        path: String,
    },

    /// The upstream answered with a status the gateway has no meaning for.
    #[error("upstream responded with {status} for {url}")]
    UpstreamUnexpected {
        /// Status the upstream responded with.
        status: StatusCode,
        /// Upstream URL that was fetched.
        url: String,
    },

    /// The upstream did not answer within the fetch timeout.
    #[error("upstream did not respond in time for {url}")]
    UpstreamTimeout {
        /// Upstream URL that was fetched.
        url: String,
    },

    /// The upstream file is larger than the configured maximum.
    #[error("{source} ({url})")]
    UpstreamTooLarge {
        /// Upstream URL that was fetched.
        url: String,
        /// The underlying size failure.
        #[source]
        source: FetchError,
    },

    /// The upstream could not be reached or the transfer broke off.
    #[error("failed to fetch {url}")]
    UpstreamFetch {
        /// Upstream URL that was fetched.
        url: String,
        /// The underlying transport failure.
        #[source]
        source: FetchError,
    },

    /// Minification was requested but the file could not be minified.
    #[error("failed to minify {path}: {source}")]
    MinifyFailure {
        /// The requested reference, as `owner/repo/ref/path`.
        path: String,
        /// Why minification failed.
        #[source]
        source: MinifyError,
    },
}

impl GatewayError {
    /// Wrap a fetch failure for the given upstream URL.
    pub fn from_fetch(url: String, source: FetchError) -> Self {
        match source {
            FetchError::Timeout => Self::UpstreamTimeout { url },
            FetchError::TooLarge { .. } => Self::UpstreamTooLarge { url, source },
            FetchError::Transport(_) => Self::UpstreamFetch { url, source },
        }
    }

    /// The status code sent to the client for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidPath(_) | Self::UpstreamBadOwner { .. } | Self::UpstreamRepoNotFound { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::UpstreamNotFound { .. } => StatusCode::NOT_FOUND,
            Self::UpstreamTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamUnexpected { .. } | Self::UpstreamFetch { .. } => StatusCode::BAD_GATEWAY,
            Self::MinifyFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(ErrorResponse {
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}
