//! A library for resolving which backend base URL an API client should use.
//!
//! `homebase` was extracted from a mobile CRM client whose backend lives in two
//! places at once: a production deployment on a free hosting tier, and whatever
//! copy of the backend a developer happens to be running locally. Every screen
//! in the app asks the same two questions, "which base URL do I talk to?" and
//! "what do I do when it stops answering?", and this crate is the one answer
//! to both.
//!
//! This project also ships a CLI tool named `homebase`, useful for checking
//! from a shell which base URL the app would pick on the current network.
//!
//! The main entry point is the [`HomebaseBuilder`] struct. Here is an example
//! of its usage:
//!
//! ```ignore
//! use homebase::HomebaseBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let homebase = HomebaseBuilder::new()
//!         .production_url("https://crm.example.com")
//!         .local_url("http://localhost:8000")
//!         .build()?;
//!
//!     let response = homebase.get("/auth/profile").await?;
//!     println!("{}", response.status());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## How `homebase` Picks a Base URL
//!
//! The first call that needs a base URL triggers resolution. Resolution probes
//! each configured local development URL in order with a `GET` to its root
//! path and a short timeout. The first candidate that answers with an HTTP
//! success status wins. If none answer, the production URL is used. Whatever
//! the outcome, it is memoized for the lifetime of the process. A failed
//! probe round is not repeated, and later calls return the cached choice
//! without any I/O.
//!
//! The order of the candidate list is the priority order. Probing is
//! sequential, not raced, so a slow candidate early in the list cannot be
//! beaten to the punch by a fast one later in the list.
//!
//! Three things bypass probing entirely:
//!
//! - building with [`Mode::Production`] or [`Mode::Local`],
//! - setting the `HOMEBASE_BASE_URL` environment variable,
//! - calling [`Homebase::force_production_mode`] or
//!   [`Homebase::force_local_mode`] at runtime.
//!
//! ## What Happens When a Request Fails
//!
//! [`Homebase::request`] issues requests with a much longer timeout than the
//! probes use, because a production backend on a free hosting tier can take
//! tens of seconds to answer its first request after idling. If a request
//! fails at the transport level (timeout, connection refused) while the
//! resolved base URL is a development candidate, the resolved base URL is
//! switched to production and the request is retried exactly once. A second
//! failure is returned to the caller. HTTP error statuses are not failures in
//! this sense; a `500` from a reachable host is returned as a normal
//! response.
//!
//! ## Features
//!
//! This crate offers several features to control the TLS dependency used by
//! `reqwest`:
//!
#![doc = document_features::document_features!()]

mod builder;
mod endpoint;
mod homebase;
mod resolver;

pub use crate::{
    builder::{
        HomebaseBuilder, BASE_URL_ENV_VAR, DEFAULT_LOCAL_URLS, DEFAULT_PROBE_TIMEOUT,
        DEFAULT_PRODUCTION_URL, DEFAULT_REQUEST_TIMEOUT,
    },
    endpoint::Endpoint,
    homebase::{Homebase, RequestError, RequestOptions},
    resolver::Mode,
};

// The version of the `homebase` crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(feature = "logging")]
use fern::{
    colors::{Color, ColoredLevelConfig},
    Dispatch,
};

/// This function initializes logging for the application. It's public for the
/// sake of the `homebase` binary, but it lives in the library crate so that
/// test code can also enable logging.
///
/// # Errors
///
/// This can return a `log::SetLoggerError` error.
#[cfg(feature = "logging")]
pub fn init_logger(level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    let line_colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::BrightBlack)
        .debug(Color::BrightBlack)
        .trace(Color::BrightBlack);
    let level_colors = line_colors.info(Color::Green).debug(Color::Black);

    Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{color_line}[{target}][{level}{color_line}] {message}\x1B[0m",
                color_line = format_args!(
                    "\x1B[{}m",
                    line_colors.get_color(&record.level()).to_fg_str()
                ),
                target = record.target(),
                level = level_colors.color(record.level()),
                message = message,
            ));
        })
        .level(level)
        // This is very noisy.
        .level_for("hyper", log::LevelFilter::Error)
        .chain(std::io::stderr())
        .apply()
}
