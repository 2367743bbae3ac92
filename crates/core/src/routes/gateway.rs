use crate::{AppState, error::GatewayError, reference::ParsedReference};
use axum::{
    body::Body,
    extract::{RawQuery, State},
    http::{HeaderValue, StatusCode, Uri, header},
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn};
use url::form_urlencoded;

/// Query keys that ask for a minified file. Only their presence matters.
const MINIFY_FLAGS: &[&str] = &["minify", "min"];

/// Whether the query string carries one of the minify flags, with any value, any number of times.
fn wants_minify(raw_query: Option<&str>) -> bool {
    raw_query.is_some_and(|query| {
        form_urlencoded::parse(query.as_bytes()).any(|(key, _)| MINIFY_FLAGS.contains(&&*key))
    })
}

pub async fn gateway_handler(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    RawQuery(query): RawQuery,
) -> Result<Response, GatewayError> {
    serve_file(&state, uri.path(), wants_minify(query.as_deref()))
        .await
        .inspect_err(|err| {
            if err.status_code().is_server_error() {
                warn!("Failed to serve {}: {err}", uri.path());
            } else {
                debug!("Refused to serve {}: {err}", uri.path());
            }
        })
}

async fn serve_file(
    state: &AppState,
    request_path: &str,
    minify: bool,
) -> Result<Response, GatewayError> {
    let reference = ParsedReference::parse(request_path)?;
    state.gateway_settings.denylist.check(&reference)?;

    let upstream_url = state.gateway_settings.upstream_template.resolve(&reference);
    debug!("Fetching {reference} from {upstream_url}");
    let outcome = state
        .fetcher
        .fetch(&upstream_url)
        .await
        .map_err(|err| GatewayError::from_fetch(upstream_url.clone(), err))?;
    check_upstream_status(&reference, outcome.status, &upstream_url)?;

    let decision = state.gateway_settings.mime_resolver.resolve(
        outcome
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        &outcome.url,
        reference.extension().as_deref(),
    );

    let mut body = outcome.body;
    if minify
        && let Some(extension) = &decision.extension
        && state
            .gateway_settings
            .minify_extensions
            .iter()
            .any(|e| e == extension)
    {
        let original_size = body.len();
        body = state
            .minifier
            .minify(body, extension)
            .await
            .map_err(|source| GatewayError::MinifyFailure {
                path: reference.to_string(),
                source,
            })?;
        debug!(
            "Minified {reference} (original: {original_size} bytes, minified: {} bytes)",
            body.len()
        );
    }

    let mut response = Response::new(Body::from(body));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&decision.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        state.gateway_settings.cache_control.clone(),
    );
    Ok(response)
}

/// Turn an unsuccessful upstream status into the error reported to the client.
fn check_upstream_status(
    reference: &ParsedReference,
    status: StatusCode,
    upstream_url: &str,
) -> Result<(), GatewayError> {
    match status {
        status if status.is_success() => Ok(()),
        StatusCode::BAD_REQUEST if !reference.has_repo() => Err(GatewayError::UpstreamBadOwner {
            owner: reference.owner().to_owned(),
        }),
        StatusCode::BAD_REQUEST => Err(GatewayError::UpstreamRepoNotFound {
            owner: reference.owner().to_owned(),
            repo: reference.repo().to_owned(),
        }),
        StatusCode::NOT_FOUND if reference.has_path() => Err(GatewayError::UpstreamNotFound {
            owner: reference.owner().to_owned(),
            repo: reference.repo().to_owned(),
            path: reference.path().to_owned(),
        }),
        status => Err(GatewayError::UpstreamUnexpected {
            status,
            url: upstream_url.to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{check_upstream_status, wants_minify};
    use crate::{error::GatewayError, reference::ParsedReference};
    use axum::http::StatusCode;

    fn check(path: &str, status: StatusCode) -> Result<(), GatewayError> {
        check_upstream_status(&ParsedReference::parse(path).unwrap(), status, "upstream")
    }

    #[test]
    fn test_check_upstream_status() {
        assert!(check("/a/b/main/c", StatusCode::OK).is_ok());
        assert!(matches!(
            check("/torvalds", StatusCode::BAD_REQUEST),
            Err(GatewayError::UpstreamBadOwner { owner }) if owner == "torvalds"
        ));
        assert!(matches!(
            check("/a/b", StatusCode::BAD_REQUEST),
            Err(GatewayError::UpstreamRepoNotFound { .. })
        ));
        assert!(matches!(
            check("/a/b/main/c", StatusCode::BAD_REQUEST),
            Err(GatewayError::UpstreamRepoNotFound { .. })
        ));
        assert!(matches!(
            check("/a/b/main/c", StatusCode::NOT_FOUND),
            Err(GatewayError::UpstreamNotFound { path, .. }) if path == "c"
        ));
        assert!(matches!(
            check("/a/b", StatusCode::NOT_FOUND),
            Err(GatewayError::UpstreamUnexpected {
                status: StatusCode::NOT_FOUND,
                ..
            })
        ));
        assert!(matches!(
            check("/a/b/main/c", StatusCode::INTERNAL_SERVER_ERROR),
            Err(GatewayError::UpstreamUnexpected { .. })
        ));
    }

    #[test]
    fn test_wants_minify() {
        assert!(!wants_minify(None));
        assert!(!wants_minify(Some("")));
        assert!(!wants_minify(Some("minified=1&x=min")));
        assert!(wants_minify(Some("minify")));
        assert!(wants_minify(Some("min=false")));
        assert!(wants_minify(Some("min&min")));
        assert!(wants_minify(Some("minify=1&minify=2&x=1")));
        assert!(wants_minify(Some("x=1&%6Din")));
    }
}
