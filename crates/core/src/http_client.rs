use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{Proxy, StatusCode, header::HeaderMap, redirect::Policy};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub type HttpClient = reqwest::Client;

pub struct BuildHttpClientArgs {
    pub allow_invalid_certs: bool,
    pub max_redirects: usize,
    pub request_timeout: Duration,
    pub proxy: Option<Proxy>,
}

/// Create a new [`HttpClient`] with the given arguments.
pub fn build_http_client(args: BuildHttpClientArgs) -> Result<HttpClient> {
    let mut builder = reqwest::ClientBuilder::default()
        .redirect(Policy::limited(args.max_redirects))
        .user_agent(concat!(
            "Mozilla/5.0",
            " (",
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION"),
            ")"
        ))
        .danger_accept_invalid_certs(args.allow_invalid_certs)
        .connect_timeout(Duration::from_secs(5))
        .timeout(args.request_timeout);
    if let Some(proxy) = args.proxy {
        builder = builder.proxy(proxy);
    }
    Ok(builder.build()?)
}

/// What the upstream answered for a single fetch.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Status code of the final response.
    pub status: StatusCode,
    /// URL of the final response, after following redirects.
    pub url: String,
    /// Headers of the final response.
    pub headers: HeaderMap,
    /// Response body. Empty for unsuccessful responses.
    pub body: Bytes,
}

/// A fetch that did not produce an upstream response.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request or body transfer exceeded the client timeout.
    #[error("upstream did not respond in time")]
    Timeout,

    /// The body is larger than allowed.
    #[error("upstream content exceeds the maximum size of {max_content_length} bytes")]
    TooLarge {
        /// The configured limit in bytes.
        max_content_length: u64,
    },

    /// Any other client failure.
    #[error("failed to fetch from upstream: {0}")]
    Transport(#[source] reqwest::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err)
        }
    }
}

/// Retrieves upstream files.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url`, returning any response the upstream gives including unsuccessful ones.
    async fn fetch(&self, url: &str) -> Result<FetchOutcome, FetchError>;
}

/// [`Fetcher`] backed by an [`HttpClient`] that caps response bodies at a maximum size.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: HttpClient,
    max_content_length: u64,
}

impl HttpFetcher {
    /// Wrap a client, refusing bodies larger than `max_content_length` bytes.
    pub fn new(client: HttpClient, max_content_length: u64) -> Self {
        Self {
            client,
            max_content_length,
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchOutcome, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let final_url = response.url().to_string();
        let headers = response.headers().clone();
        if !status.is_success() {
            debug!("Upstream responded to {url} with {status}");
            return Ok(FetchOutcome {
                status,
                url: final_url,
                headers,
                body: Bytes::new(),
            });
        }

        // Fail early when the upstream is honest about the size, the stream below
        // enforces the limit either way.
        if let Some(content_length) = response.content_length()
            && content_length > self.max_content_length
        {
            return Err(FetchError::TooLarge {
                max_content_length: self.max_content_length,
            });
        }

        let mut buffer = Vec::with_capacity(
            response
                .content_length()
                .map(|len| len.min(self.max_content_length) as usize)
                .unwrap_or_default(),
        );
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if buffer.len() as u64 + chunk.len() as u64 > self.max_content_length {
                return Err(FetchError::TooLarge {
                    max_content_length: self.max_content_length,
                });
            }
            buffer.extend_from_slice(&chunk);
        }

        Ok(FetchOutcome {
            status,
            url: final_url,
            headers,
            body: Bytes::from(buffer),
        })
    }
}
