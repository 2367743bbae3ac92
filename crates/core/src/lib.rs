//! Crate for Rawgate, a raw-file gateway for source-hosting services.
//!
//! Requests of the shape `/{owner}[/{repo}[/{ref}/{path...}]]` are checked against a
//! [`Denylist`], rewritten into an upstream URL with a [`UrlTemplate`], fetched, given a
//! content type by the [`MimeResolver`] and optionally minified.

#[cfg(feature = "rustls-tls")]
#[cfg(feature = "native-tls")]
compile_error!("You can only enable one TLS backend");

pub extern crate url;

mod denylist;
mod error;
mod http_client;
mod mime_util;
mod minify;
mod reference;
mod routes;
mod upstream;

pub use denylist::{BanRule, BanRuleError, Banned, Denylist};
pub use error::GatewayError;
pub use http_client::{FetchError, FetchOutcome, Fetcher, HttpFetcher};
pub use mime_util::{DEFAULT_EXTRA_CLASSIFICATIONS, MimeDecision, MimeResolver};
pub use minify::{BuiltinMinifier, DEFAULT_MINIFY_EXTENSIONS, Minifier, MinifyError};
pub use reference::{ParseError, ParsedReference};
pub use upstream::{DEFAULT_UPSTREAM_TEMPLATE, UrlTemplate};

use anyhow::Result;
use axum::{
    Router,
    extract::Request,
    http::{HeaderValue, StatusCode},
    middleware::{self as axum_middleware, Next},
    response::Response,
    routing::get,
};
use core::{net::SocketAddr, time::Duration};
use http_client::{BuildHttpClientArgs, build_http_client};
use reqwest::{Proxy, header};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tower_http::{
    catch_panic::CatchPanicLayer,
    normalize_path::NormalizePathLayer,
    timeout::TimeoutLayer,
    trace::{self, TraceLayer},
};
use tracing::{Level, info};
use url::Url;

/// Default value of the `Cache-Control` header sent with every file.
pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=86400";

/// # Example
/// ```rust,no_run
/// use std::net::{SocketAddr, IpAddr, Ipv4Addr};
/// use rawgate::{RawgateServer, RawgateServerSettings};
///
/// # #[tokio::main]
/// # async fn main() {
/// let server = RawgateServer::new(RawgateServerSettings::default()).unwrap();
/// server.start(&SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080)).await.unwrap();
/// # }
/// ```
#[derive(Debug)]
pub struct RawgateServer {
    router_inner: Router,
}

/// Settings to run the Rawgate server with.
#[derive(Debug, Clone)]
pub struct RawgateServerSettings {
    /// How long a request may take in total before it is abandoned.
    pub request_timeout: Duration,

    /// See [`UpstreamSettings`].
    pub upstream_settings: UpstreamSettings,

    /// See [`GatewaySettings`].
    pub gateway_settings: GatewaySettings,
}

/// Configuration options used when fetching files from the upstream.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Whether to allow invalid/expired/forged TLS certificates when making upstream requests.
    ///
    /// **Enabling this is dangerous and is usually not necessary.**
    pub allow_invalid_certs: bool,

    /// How long a single upstream fetch may take before it's abandoned and considered failed.
    pub request_timeout: Duration,

    /// The maximum amount of redirects to follow when making a request to an upstream server before abandoning the request.
    pub max_redirects: usize,

    /// The proxy to use for all outgoing requests.
    pub request_proxy: Option<Url>,

    /// The largest file, in bytes, that will be fetched from the upstream.
    pub max_content_length: u64,
}

/// Configuration options used for the gateway route.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Turns parsed request paths into upstream URLs.
    pub upstream_template: UrlTemplate,

    /// Owners and repositories that must never be served.
    pub denylist: Denylist,

    /// Value of the `Cache-Control` header sent with every file.
    pub cache_control: HeaderValue,

    /// Lowercased extensions that may be minified when the client asks for it.
    pub minify_extensions: Box<[String]>,

    /// Decides the `Content-Type` of served files.
    pub mime_resolver: MimeResolver,
}

impl Default for RawgateServerSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            upstream_settings: UpstreamSettings::default(),
            gateway_settings: GatewaySettings::default(),
        }
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            allow_invalid_certs: false,
            request_timeout: Duration::from_secs(10),
            max_redirects: 5,
            request_proxy: None,
            max_content_length: 20_000_000,
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            upstream_template: UrlTemplate::default(),
            denylist: Denylist::default(),
            cache_control: HeaderValue::from_static(DEFAULT_CACHE_CONTROL),
            minify_extensions: DEFAULT_MINIFY_EXTENSIONS
                .iter()
                .map(|e| (*e).to_owned())
                .collect(),
            mime_resolver: MimeResolver::default(),
        }
    }
}

struct AppState {
    fetcher: Arc<dyn Fetcher>,
    minifier: Arc<dyn Minifier>,
    gateway_settings: GatewaySettings,
}

impl RawgateServer {
    /// Create a new server with the provided settings, fetching over HTTP and
    /// minifying with the [`BuiltinMinifier`].
    pub fn new(settings: RawgateServerSettings) -> Result<Self> {
        let upstream = &settings.upstream_settings;
        let fetcher = HttpFetcher::new(
            build_http_client(BuildHttpClientArgs {
                allow_invalid_certs: upstream.allow_invalid_certs,
                max_redirects: upstream.max_redirects,
                request_timeout: upstream.request_timeout,
                proxy: upstream
                    .request_proxy
                    .as_ref()
                    .map(|p| Proxy::all(p.as_str()))
                    .transpose()?,
            })?,
            upstream.max_content_length,
        );
        Ok(Self::with_collaborators(
            settings,
            Arc::new(fetcher),
            Arc::new(BuiltinMinifier),
        ))
    }

    /// Create a new server that fetches and minifies files with the given implementations.
    ///
    /// [`RawgateServerSettings::upstream_settings`] is not used, configure the fetcher directly.
    pub fn with_collaborators(
        settings: RawgateServerSettings,
        fetcher: Arc<dyn Fetcher>,
        minifier: Arc<dyn Minifier>,
    ) -> Self {
        let router = Router::new()
            .route("/", get(routes::gateway_handler))
            .route("/{*path}", get(routes::gateway_handler))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
            )
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                settings.request_timeout,
            ))
            .layer(NormalizePathLayer::trim_trailing_slash())
            .layer(CatchPanicLayer::new())
            .layer(axum_middleware::from_fn(RawgateServer::header_middleware))
            .with_state(Arc::new(AppState {
                fetcher,
                minifier,
                gateway_settings: settings.gateway_settings,
            }));

        Self {
            router_inner: router,
        }
    }

    /// Start the server and expose it locally on the provided [`SocketAddr`].
    pub async fn start(self, address: &SocketAddr) -> Result<()> {
        let tcp_listener = TcpListener::bind(&address).await?;
        self.serve(tcp_listener, Self::shutdown_signal()).await
    }

    /// Serve requests from an already bound listener until `shutdown` completes.
    pub async fn serve(
        self,
        tcp_listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        info!("Listening on http://{}", tcp_listener.local_addr()?);
        axum::serve(tcp_listener, self.router_inner)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }

    // https://github.com/tokio-rs/axum/blob/15917c6dbcb4a48707a20e9cfd021992a279a662/examples/graceful-shutdown/src/main.rs#L55
    async fn shutdown_signal() {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    async fn header_middleware(request: Request, next: Next) -> Response {
        let mut response = next.run(request).await;
        response.headers_mut().append(
            header::SERVER,
            HeaderValue::from_static(env!("CARGO_PKG_NAME")),
        );
        response
            .headers_mut()
            .append("X-Robots-Tag", HeaderValue::from_static("none"));
        response
    }
}
