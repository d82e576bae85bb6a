use crate::resolver::Resolver;
use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::{header::HeaderMap, Client, Method, Response};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// `Homebase` picks the backend base URL an API client should talk to and
/// makes requests against it.
///
/// Create one with a [`HomebaseBuilder`](crate::HomebaseBuilder). Every
/// method takes `&self`, so a single instance can be shared across an
/// application, for example in an [`Arc`](std::sync::Arc).
#[derive(Debug)]
pub struct Homebase {
    client: Client,
    resolver: Resolver,
    request_timeout: Duration,
}

/// A transport-level request failure surfaced by [`Homebase::request`].
///
/// These are wrapped in an [`anyhow::Error`], so callers that want to know
/// whether a fallback was attempted need to downcast:
///
/// ```ignore
/// if let Some(request_error) = err.downcast_ref::<RequestError>() { ... }
/// ```
#[derive(Debug, Error)]
pub enum RequestError {
    /// The request failed and there was nothing to fall back to, because the
    /// base URL was already the production URL.
    #[error("request to {url} failed and the production base URL was already in use")]
    Failed {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// The request failed against a development base URL and the retry
    /// against the production URL failed too.
    #[error("request to {url} failed even after falling back to the production base URL")]
    FailedAfterFallback {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Options for a single request made through [`Homebase::request`].
///
/// The default is a GET request with no body, no extra headers, and the
/// client-wide request timeout.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    method: Option<Method>,
    headers: Option<HeaderMap>,
    json: Option<serde_json::Value>,
    timeout: Option<Duration>,
}

impl RequestOptions {
    /// Returns a new empty `RequestOptions`.
    #[must_use]
    pub fn new() -> RequestOptions {
        RequestOptions::default()
    }

    /// Set the HTTP method. Defaults to GET.
    #[must_use]
    pub fn method(mut self, method: Method) -> RequestOptions {
        self.method = Some(method);
        self
    }

    /// Set extra headers for this request. These are merged over the
    /// client-wide defaults.
    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> RequestOptions {
        self.headers = Some(headers);
        self
    }

    /// Set a JSON body for this request.
    #[must_use]
    pub fn json(mut self, json: serde_json::Value) -> RequestOptions {
        self.json = Some(json);
        self
    }

    /// Override the request timeout for this request only.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> RequestOptions {
        self.timeout = Some(timeout);
        self
    }
}

impl Homebase {
    pub(crate) fn new(client: Client, resolver: Resolver, request_timeout: Duration) -> Homebase {
        Homebase {
            client,
            resolver,
            request_timeout,
        }
    }

    /// Returns the base URL that requests will go to.
    ///
    /// The first call probes the local development URLs in order and falls
    /// back to the production URL if none answer, so it may take up to the
    /// probe timeout per candidate. Every later call returns the memoized
    /// answer immediately. This never fails; when in doubt the answer is the
    /// production URL.
    pub async fn resolve(&self) -> Url {
        self.resolver.resolve(&self.client).await
    }

    /// Returns the full URL for the given path as a string, without sending
    /// anything.
    ///
    /// The path should start with a `/` and is appended to the base URL
    /// exactly as given, with no encoding or validation. Before the first
    /// [`resolve`](Homebase::resolve) settles the base URL this uses the
    /// production URL, which is also what a request made at that moment
    /// would fall back to.
    #[must_use]
    pub fn build_url(&self, path: &str) -> String {
        debug_assert!(
            path.starts_with('/'),
            "request paths must start with a slash, got {path:?}",
        );
        let base = self
            .resolver
            .cached()
            .unwrap_or_else(|| self.resolver.production().clone());
        join_base(&base, path)
    }

    /// Sends a request to the given path on the resolved base URL.
    ///
    /// If the request fails at the transport level (connection refused,
    /// timeout) and the base URL was not already the production URL, the
    /// memoized base URL is switched to production and the request is
    /// retried exactly once. An HTTP error status is not a failure; the
    /// response is returned for the caller to inspect either way.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be appended to the base URL to
    /// make a valid URL, or if the request failed at the transport level and
    /// the production fallback failed too (or was already in use). The
    /// wrapped error is a [`RequestError`] and can be downcast to find out
    /// whether a fallback was attempted.
    pub async fn request(&self, path: &str, options: RequestOptions) -> Result<Response> {
        let base = self.resolve().await;
        let url = request_url(&base, path)?;

        match self.execute(url.clone(), &options).await {
            Ok(response) => Ok(response),
            Err(e) => {
                if base == *self.resolver.production() {
                    return Err(RequestError::Failed {
                        url: url.to_string(),
                        source: e,
                    }
                    .into());
                }
                warn!("request to `{url}` failed ({e}), retrying against the production base URL");
                let production = self.resolver.force_production();
                let url = request_url(&production, path)?;
                match self.execute(url.clone(), &options).await {
                    Ok(response) => Ok(response),
                    Err(e) => Err(RequestError::FailedAfterFallback {
                        url: url.to_string(),
                        source: e,
                    }
                    .into()),
                }
            }
        }
    }

    /// Sends a GET request to the given path with the default options.
    ///
    /// # Errors
    ///
    /// The same as [`request`](Homebase::request).
    pub async fn get(&self, path: &str) -> Result<Response> {
        self.request(path, RequestOptions::new()).await
    }

    /// Sends a POST request with the given value serialized as a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be serialized, and otherwise the
    /// same as [`request`](Homebase::request).
    pub async fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<Response> {
        let json = serde_json::to_value(body).context("could not serialize the request body")?;
        self.request(path, RequestOptions::new().method(Method::POST).json(json))
            .await
    }

    /// Pins the base URL to the production URL without probing, and returns
    /// it. An in-flight probe round yields to this between candidates, and
    /// its own outcome never overwrites the pinned value.
    pub fn force_production_mode(&self) -> Url {
        let url = self.resolver.force_production();
        debug!("base URL forced to production `{url}`");
        url
    }

    /// Pins the base URL to the first local development URL without probing,
    /// and returns it.
    ///
    /// # Errors
    ///
    /// Returns an error if no local development URLs are configured.
    pub fn force_local_mode(&self) -> Result<Url> {
        let url = self.resolver.force_first_candidate()?;
        debug!("base URL forced to `{url}`");
        Ok(url)
    }

    /// Returns the memoized base URL, or `None` if nothing has resolved or
    /// pinned one yet.
    #[must_use]
    pub fn current_base_url(&self) -> Option<Url> {
        self.resolver.cached()
    }

    /// Returns the production base URL.
    #[must_use]
    pub fn production_url(&self) -> &Url {
        self.resolver.production()
    }

    /// Returns true if the memoized base URL is the production URL.
    #[must_use]
    pub fn is_using_production(&self) -> bool {
        self.current_base_url().as_ref() == Some(self.production_url())
    }

    async fn execute(
        &self,
        url: Url,
        options: &RequestOptions,
    ) -> Result<Response, reqwest::Error> {
        let method = options.method.clone().unwrap_or(Method::GET);
        debug!("{method} {url}");
        let mut req = self
            .client
            .request(method, url)
            .timeout(options.timeout.unwrap_or(self.request_timeout));
        if let Some(headers) = options.headers.clone() {
            req = req.headers(headers);
        }
        if let Some(json) = &options.json {
            req = req.json(json);
        }
        req.send().await
    }
}

fn request_url(base: &Url, path: &str) -> Result<Url> {
    debug_assert!(
        path.starts_with('/'),
        "request paths must start with a slash, got {path:?}",
    );
    let joined = join_base(base, path);
    Url::parse(&joined).with_context(|| format!("could not parse `{joined}` as a request URL"))
}

// A parsed Url always renders a bare authority with a trailing slash, so we
// glue the path on with plain string concatenation to keep `/auth/login`
// style paths intact instead of letting Url::join rewrite them.
fn join_base(base: &Url, path: &str) -> String {
    format!("{}{}", base.as_str().trim_end_matches('/'), path)
}
