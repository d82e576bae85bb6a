use crate::{
    homebase::Homebase,
    resolver::{Mode, Resolver},
    VERSION,
};
use anyhow::{anyhow, Context, Result};
use log::debug;
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT},
    Client,
};
use std::{env, time::Duration};
use url::Url;

/// The production backend that requests fall back to when no development
/// backend is reachable.
pub const DEFAULT_PRODUCTION_URL: &str = "https://real-estate-crm-backend-yfxi.onrender.com";

/// The local development URLs probed by default, in priority order. The first
/// entry is how an Android emulator reaches the host machine's loopback
/// interface.
pub const DEFAULT_LOCAL_URLS: &[&str] = &["http://10.0.2.2:8000", "http://localhost:8000"];

/// How long a probe of one candidate URL waits before moving on to the next.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// How long a request waits before timing out. The production backend spins
/// down when idle, and a cold start can eat most of this window.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Setting this environment variable to a URL pins the base URL to that value
/// and skips probing entirely. It takes precedence over
/// [`HomebaseBuilder::mode`].
pub const BASE_URL_ENV_VAR: &str = "HOMEBASE_BASE_URL";

/// `HomebaseBuilder` is used to create a [`Homebase`] instance.
#[derive(Debug, Default)]
#[allow(clippy::module_name_repetitions)]
pub struct HomebaseBuilder<'a> {
    production_url: Option<&'a str>,
    local_urls: Vec<&'a str>,
    no_local_urls: bool,
    mode: Mode,
    probe_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
}

impl<'a> HomebaseBuilder<'a> {
    /// Returns a new empty `HomebaseBuilder`.
    #[must_use]
    pub fn new() -> HomebaseBuilder<'a> {
        HomebaseBuilder::default()
    }

    /// Set the production base URL. Defaults to [`DEFAULT_PRODUCTION_URL`].
    #[must_use]
    pub fn production_url(mut self, url: &'a str) -> HomebaseBuilder<'a> {
        self.production_url = Some(url);
        self
    }

    /// Add a local development URL to probe. May be called multiple times,
    /// and candidates are probed in the order they were added. Calling this
    /// replaces the [`DEFAULT_LOCAL_URLS`] list. You cannot call
    /// `without_local_urls` if you add URLs with this.
    #[must_use]
    pub fn local_url(mut self, url: &'a str) -> HomebaseBuilder<'a> {
        self.local_urls.push(url);
        self
    }

    /// Drop the default local development URLs. Resolution then goes
    /// straight to the production URL. You cannot add URLs with `local_url`
    /// when this is set.
    #[must_use]
    pub fn without_local_urls(mut self) -> HomebaseBuilder<'a> {
        self.no_local_urls = true;
        self
    }

    /// Set the resolution mode. Defaults to [`Mode::Auto`], which probes the
    /// local URLs and falls back to production. [`Mode::Production`] and
    /// [`Mode::Local`] pin a base URL without probing.
    #[must_use]
    pub fn mode(mut self, mode: Mode) -> HomebaseBuilder<'a> {
        self.mode = mode;
        self
    }

    /// Set the per-candidate probe timeout. Defaults to
    /// [`DEFAULT_PROBE_TIMEOUT`].
    #[must_use]
    pub fn probe_timeout(mut self, timeout: Duration) -> HomebaseBuilder<'a> {
        self.probe_timeout = Some(timeout);
        self
    }

    /// Set the default timeout for requests made through
    /// [`Homebase::request`]. Defaults to [`DEFAULT_REQUEST_TIMEOUT`].
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> HomebaseBuilder<'a> {
        self.request_timeout = Some(timeout);
        self
    }

    /// Builds a new [`Homebase`] instance and returns it.
    ///
    /// # Errors
    ///
    /// Returns an error if you have set incompatible options (adding local
    /// URLs while also suppressing them), if any of the configured URLs
    /// cannot be parsed, if a URL uses a scheme other than http or https,
    /// or if local mode was requested without any local URLs to pin.
    pub fn build(self) -> Result<Homebase> {
        if self.no_local_urls && !self.local_urls.is_empty() {
            return Err(anyhow!("You cannot add local URLs and call without_local_urls"));
        }

        let production = parse_base_url(self.production_url.unwrap_or(DEFAULT_PRODUCTION_URL))
            .context("invalid production URL")?;

        let mut candidates: Vec<Url> = vec![];
        if !self.no_local_urls {
            let urls = if self.local_urls.is_empty() {
                DEFAULT_LOCAL_URLS.to_vec()
            } else {
                self.local_urls
            };
            for url in urls {
                candidates.push(parse_base_url(url).context("invalid local development URL")?);
            }
        }

        let pinned = match env_base_url()? {
            Some(url) => {
                debug!("pinning base URL from the {BASE_URL_ENV_VAR} environment variable");
                Some(url)
            }
            None => match self.mode {
                Mode::Auto => None,
                Mode::Production => Some(production.clone()),
                Mode::Local => Some(
                    candidates
                        .first()
                        .ok_or_else(|| {
                            anyhow!("cannot use local mode without any local URLs configured")
                        })?
                        .clone(),
                ),
            },
        };

        Ok(Homebase::new(
            reqwest_client()?,
            Resolver::new(
                production,
                candidates,
                self.probe_timeout.unwrap_or(DEFAULT_PROBE_TIMEOUT),
                pinned,
            ),
            self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        ))
    }
}

fn parse_base_url(url: &str) -> Result<Url> {
    let url = Url::parse(url).with_context(|| format!("could not parse `{url}` as a URL"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(anyhow!(
            "a base URL must use the http or https scheme, not `{scheme}` (from `{url}`)"
        )),
    }
}

fn env_base_url() -> Result<Option<Url>> {
    match env::var(BASE_URL_ENV_VAR).ok().filter(|v| !v.is_empty()) {
        Some(var) => Ok(Some(parse_base_url(&var).with_context(|| {
            format!("could not use the base URL set in the {BASE_URL_ENV_VAR} environment variable")
        })?)),
        None => Ok(None),
    }
}

pub(crate) fn reqwest_client() -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("homebase version {VERSION}"))?,
    );
    // The backend speaks JSON on every endpoint.
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Client::builder()
        .gzip(true)
        .default_headers(headers)
        .build()
        .context("could not construct an HTTP client")
}
