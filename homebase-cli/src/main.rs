use anyhow::{Context, Error, Result};
use clap::{Arg, ArgAction, ArgGroup, ArgMatches, Command};
use homebase::{Endpoint, Homebase, HomebaseBuilder, Mode, RequestOptions};
use log::error;
use reqwest::Method;
use std::{str::FromStr, time::Duration};
use strum::VariantNames;
use thiserror::Error;

#[derive(Debug, Error)]
enum HomebaseError {
    #[error("{0:}")]
    InvalidArgsError(String),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cmd = cmd();
    let matches = cmd.get_matches();
    let res = init_logger_from_matches(&matches);
    if let Err(e) = res {
        eprintln!("Error creating logger: {e}");
        std::process::exit(126);
    }

    let status = match make_homebase(&matches) {
        Ok(homebase) => match run(&homebase, &matches).await {
            Ok(()) => 0,
            Err(e) => {
                print_err(&e);
                1
            }
        },
        Err(e) => {
            print_err(&e);
            127
        }
    };
    std::process::exit(status);
}

const MAX_TERM_WIDTH: usize = 100;

#[allow(clippy::too_many_lines)]
fn cmd() -> Command {
    Command::new("homebase")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Picks the backend base URL an API client should talk to")
        .arg(
            Arg::new("production-url")
                .long("production-url")
                .help(concat!(
                    "The production base URL to fall back to when no development backend",
                    " answers. Defaults to the CRM backend on Render.",
                )),
        )
        .arg(
            Arg::new("local-url")
                .long("local-url")
                .action(ArgAction::Append)
                .help(concat!(
                    "A local development URL to probe. May be passed multiple times, and the",
                    " candidates are probed in the order given. Defaults to the Android",
                    " emulator loopback address followed by localhost, both on port 8000.",
                )),
        )
        .arg(
            Arg::new("mode")
                .long("mode")
                .value_parser(clap::builder::PossibleValuesParser::new(Mode::VARIANTS))
                .help(concat!(
                    "How to pick the base URL. In auto mode the local URLs are probed in",
                    " order and production is the fallback. The production and local modes",
                    " pin a base URL without probing anything.",
                )),
        )
        .arg(
            Arg::new("probe-timeout")
                .long("probe-timeout")
                .value_parser(clap::value_parser!(u64))
                .help("The per-candidate probe timeout, in seconds. Defaults to 3."),
        )
        .arg(
            Arg::new("request-timeout")
                .long("request-timeout")
                .value_parser(clap::value_parser!(u64))
                .help(concat!(
                    "The request timeout, in seconds. Defaults to 30, which is long enough",
                    " to ride out a cold start of the production backend.",
                )),
        )
        .arg(
            Arg::new("endpoint")
                .long("endpoint")
                .short('e')
                .value_parser(clap::builder::PossibleValuesParser::new(
                    Endpoint::VARIANTS,
                ))
                .help("A named backend endpoint to send a request to after resolving."),
        )
        .arg(Arg::new("path").long("path").short('p').help(concat!(
            "A request path to send a request to after resolving, like `/auth/profile`.",
            " This can be passed instead of --endpoint for paths the endpoint list does",
            " not cover. It must start with a slash.",
        )))
        .arg(Arg::new("method").long("method").short('m').help(concat!(
            "The HTTP method for the request. Defaults to GET, or to POST when --body",
            " is passed.",
        )))
        .arg(Arg::new("body").long("body").short('b').help(concat!(
            "A JSON body to send with the request. Implies POST unless --method is",
            " passed.",
        )))
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output."),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .action(ArgAction::SetTrue)
                .help("Enable debugging output."),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppresses most output."),
        )
        .group(ArgGroup::new("log-level").args(["verbose", "debug", "quiet"]))
        .max_term_width(MAX_TERM_WIDTH)
}

pub(crate) fn init_logger_from_matches(matches: &ArgMatches) -> Result<(), log::SetLoggerError> {
    let level = if matches.get_flag("debug") {
        log::LevelFilter::Debug
    } else if matches.get_flag("verbose") {
        log::LevelFilter::Info
    } else if matches.get_flag("quiet") {
        log::LevelFilter::Error
    } else {
        log::LevelFilter::Warn
    };

    homebase::init_logger(level)
}

fn make_homebase(matches: &ArgMatches) -> Result<Homebase> {
    validate_args(matches)?;

    let mut builder = HomebaseBuilder::new();
    if let Some(u) = matches.get_one::<String>("production-url") {
        builder = builder.production_url(u);
    }
    if let Some(urls) = matches.get_many::<String>("local-url") {
        for u in urls {
            builder = builder.local_url(u);
        }
    }
    if let Some(m) = matches.get_one::<String>("mode") {
        builder = builder.mode(Mode::from_str(m)?);
    }
    if let Some(secs) = matches.get_one::<u64>("probe-timeout") {
        builder = builder.probe_timeout(Duration::from_secs(*secs));
    }
    if let Some(secs) = matches.get_one::<u64>("request-timeout") {
        builder = builder.request_timeout(Duration::from_secs(*secs));
    }

    builder.build()
}

fn validate_args(matches: &ArgMatches) -> Result<()> {
    if matches.contains_id("endpoint") && matches.contains_id("path") {
        return Err(HomebaseError::InvalidArgsError(
            "You cannot combine the --endpoint and --path options".to_string(),
        )
        .into());
    }

    if !(matches.contains_id("endpoint") || matches.contains_id("path")) {
        for a in &["method", "body"] {
            if matches.contains_id(a) {
                return Err(HomebaseError::InvalidArgsError(format!(
                    "You must pass an --endpoint or --path to use the --{a} option"
                ))
                .into());
            }
        }
    }

    if let Some(path) = matches.get_one::<String>("path") {
        if !path.starts_with('/') {
            return Err(HomebaseError::InvalidArgsError(format!(
                "The --path value must start with a slash, got `{path}`"
            ))
            .into());
        }
    }

    Ok(())
}

async fn run(homebase: &Homebase, matches: &ArgMatches) -> Result<()> {
    let base = homebase.resolve().await;
    println!("{base}");

    let Some(path) = request_path(matches)? else {
        return Ok(());
    };

    let response = homebase.request(&path, request_options(matches)?).await?;
    println!("{}", response.status());
    let body = response.text().await?;
    if !body.is_empty() {
        println!("{body}");
    }

    Ok(())
}

fn request_path(matches: &ArgMatches) -> Result<Option<String>> {
    if let Some(endpoint) = matches.get_one::<String>("endpoint") {
        return Ok(Some(Endpoint::from_str(endpoint)?.path().to_string()));
    }
    Ok(matches.get_one::<String>("path").cloned())
}

fn request_options(matches: &ArgMatches) -> Result<RequestOptions> {
    let mut options = RequestOptions::new();
    if let Some(body) = matches.get_one::<String>("body") {
        let json = serde_json::from_str(body).context("could not parse the --body value as JSON")?;
        options = options.method(Method::POST).json(json);
    }
    if let Some(method) = matches.get_one::<String>("method") {
        options = options.method(Method::from_str(&method.to_uppercase())?);
    }
    Ok(options)
}

fn print_err(e: &Error) {
    error!("{e}");
    if let Some(he) = e.downcast_ref::<HomebaseError>() {
        match he {
            HomebaseError::InvalidArgsError(_) => {
                println!();
                cmd().print_help().unwrap();
            }
        }
    }
}
