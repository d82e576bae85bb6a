use anyhow::{anyhow, Result};
use itertools::Itertools;
use log::{debug, info};
use reqwest::Client;
use std::{sync::RwLock, time::Duration};
use tokio::sync::Mutex;
use url::Url;

// It'd be nice to use clap::ValueEnum here, but then we'd need to add clap as a dependency for the
// library code, which would be annoying for downstream users who just want to use the library.
#[derive(
    strum::AsRefStr, Clone, Debug, Default, strum::EnumString, PartialEq, Eq, strum::VariantNames,
)]
pub enum Mode {
    /// Probe the local development URLs in order and fall back to production.
    #[strum(serialize = "auto")]
    #[default]
    Auto,
    /// Pin the production URL without probing.
    #[strum(serialize = "production")]
    Production,
    /// Pin the first local development URL without probing.
    #[strum(serialize = "local")]
    Local,
}

#[derive(Debug)]
pub(crate) struct Resolver {
    production: Url,
    candidates: Vec<Url>,
    probe_timeout: Duration,
    resolved: RwLock<Option<Url>>,
    // Serializes probe rounds so that concurrent first callers await one
    // round instead of each racing their own.
    probing: Mutex<()>,
}

impl Resolver {
    pub(crate) fn new(
        production: Url,
        candidates: Vec<Url>,
        probe_timeout: Duration,
        pinned: Option<Url>,
    ) -> Resolver {
        Resolver {
            production,
            candidates,
            probe_timeout,
            resolved: RwLock::new(pinned),
            probing: Mutex::new(()),
        }
    }

    pub(crate) fn production(&self) -> &Url {
        &self.production
    }

    pub(crate) fn cached(&self) -> Option<Url> {
        self.resolved
            .read()
            .expect("resolved base URL lock was poisoned")
            .clone()
    }

    /// Returns the base URL all requests should go to, probing the candidate
    /// list first if no previous call has settled the question.
    pub(crate) async fn resolve(&self, client: &Client) -> Url {
        if let Some(url) = self.cached() {
            return url;
        }

        let _guard = self.probing.lock().await;

        // Another caller may have finished a probe round, or pinned a mode,
        // while we waited for the guard.
        if let Some(url) = self.cached() {
            return url;
        }

        debug!(
            "probing {} candidate base URL(s): {}",
            self.candidates.len(),
            self.candidates.iter().map(Url::as_str).join(", "),
        );

        for candidate in &self.candidates {
            // A force_* call made mid-round wins over the round itself.
            if let Some(url) = self.cached() {
                debug!("base URL was pinned to `{url}` while probing, keeping it");
                return url;
            }
            if self.probe(client, candidate).await {
                let url = self.pin_if_unset(candidate.clone());
                info!("resolved base URL to `{url}`");
                return url;
            }
        }

        // The round may also have been beaten while the last candidate's
        // probe was in flight.
        if let Some(url) = self.cached() {
            debug!("base URL was pinned to `{url}` while probing, keeping it");
            return url;
        }

        let url = self.pin_if_unset(self.production.clone());
        info!("no development backend answered, using production base URL `{url}`");
        url
    }

    async fn probe(&self, client: &Client, url: &Url) -> bool {
        debug!("probing `{url}`");
        match client
            .get(url.clone())
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(
                    "candidate `{url}` answered with {}, treating it as unreachable",
                    response.status(),
                );
                false
            }
            Err(e) => {
                debug!("candidate `{url}` is unreachable: {e}");
                false
            }
        }
    }

    /// Pins the production URL as the resolved base URL, bypassing probing.
    pub(crate) fn force_production(&self) -> Url {
        let url = self.production.clone();
        self.pin(url.clone());
        url
    }

    /// Pins the first candidate as the resolved base URL, bypassing probing.
    pub(crate) fn force_first_candidate(&self) -> Result<Url> {
        let url = self
            .candidates
            .first()
            .ok_or_else(|| anyhow!("cannot force local mode without any local URLs configured"))?
            .clone();
        self.pin(url.clone());
        Ok(url)
    }

    fn pin(&self, url: Url) {
        *self
            .resolved
            .write()
            .expect("resolved base URL lock was poisoned") = Some(url);
    }

    // A probe round defers to any value that appeared while it was busy with
    // the network; only pin() overwrites unconditionally.
    fn pin_if_unset(&self, url: Url) -> Url {
        let mut slot = self
            .resolved
            .write()
            .expect("resolved base URL lock was poisoned");
        if let Some(existing) = slot.as_ref() {
            existing.clone()
        } else {
            *slot = Some(url.clone());
            url
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use std::{net::TcpListener, str::FromStr, sync::Arc};
    use test_log::test;

    fn resolver_for(production: &str, candidates: &[&str]) -> Result<Resolver> {
        Ok(Resolver::new(
            Url::parse(production)?,
            candidates
                .iter()
                .map(|c| Url::parse(c))
                .collect::<Result<Vec<_>, _>>()?,
            Duration::from_secs(2),
            None,
        ))
    }

    #[test(tokio::test)]
    async fn picks_first_reachable_candidate() -> Result<()> {
        let mut first = Server::new_async().await;
        let mut second = Server::new_async().await;
        let first_probe = first.mock("GET", "/").with_status(200).create_async().await;
        let second_probe = second.mock("GET", "/").expect(0).create_async().await;

        let resolver = resolver_for("http://production.test:9", &[&first.url(), &second.url()])?;
        let resolved = resolver.resolve(&Client::new()).await;
        assert_eq!(resolved, Url::parse(&first.url())?);

        first_probe.assert_async().await;
        second_probe.assert_async().await;

        Ok(())
    }

    #[test(tokio::test)]
    async fn skips_unreachable_and_failing_candidates() -> Result<()> {
        let mut erroring = Server::new_async().await;
        let mut healthy = Server::new_async().await;
        let error_probe = erroring
            .mock("GET", "/")
            .with_status(500)
            .create_async()
            .await;
        let healthy_probe = healthy
            .mock("GET", "/")
            .with_status(200)
            .create_async()
            .await;

        // Nothing listens on port 1, so the first candidate's probe fails
        // immediately with a connection error.
        let resolver = resolver_for(
            "http://production.test:9",
            &["http://127.0.0.1:1", &erroring.url(), &healthy.url()],
        )?;
        let resolved = resolver.resolve(&Client::new()).await;
        assert_eq!(resolved, Url::parse(&healthy.url())?);

        error_probe.assert_async().await;
        healthy_probe.assert_async().await;

        Ok(())
    }

    #[test(tokio::test)]
    async fn falls_back_to_production_when_nothing_answers() -> Result<()> {
        let mut erroring = Server::new_async().await;
        let probe = erroring
            .mock("GET", "/")
            .with_status(503)
            .create_async()
            .await;

        let resolver = resolver_for(
            "http://production.test:9",
            &["http://127.0.0.1:1", &erroring.url()],
        )?;
        let resolved = resolver.resolve(&Client::new()).await;
        assert_eq!(resolved, Url::parse("http://production.test:9")?);

        probe.assert_async().await;

        Ok(())
    }

    #[test(tokio::test)]
    async fn resolves_straight_to_production_without_candidates() -> Result<()> {
        let resolver = resolver_for("http://production.test:9", &[])?;
        let resolved = resolver.resolve(&Client::new()).await;
        assert_eq!(resolved, Url::parse("http://production.test:9")?);
        Ok(())
    }

    #[test(tokio::test)]
    async fn memoizes_the_first_outcome() -> Result<()> {
        let mut server = Server::new_async().await;
        let probe = server
            .mock("GET", "/")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let resolver = resolver_for("http://production.test:9", &[&server.url()])?;
        let client = Client::new();
        let first = resolver.resolve(&client).await;
        let second = resolver.resolve(&client).await;
        assert_eq!(first, second);

        probe.assert_async().await;

        Ok(())
    }

    #[test(tokio::test)]
    async fn concurrent_callers_share_one_probe_round() -> Result<()> {
        let mut server = Server::new_async().await;
        let probe = server
            .mock("GET", "/")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let resolver = resolver_for("http://production.test:9", &[&server.url()])?;
        let client = Client::new();
        let (first, second) = tokio::join!(resolver.resolve(&client), resolver.resolve(&client));
        assert_eq!(first, second);

        probe.assert_async().await;

        Ok(())
    }

    #[test(tokio::test)]
    async fn forcing_production_short_circuits_probing() -> Result<()> {
        let mut server = Server::new_async().await;
        let probe = server.mock("GET", "/").expect(0).create_async().await;

        let resolver = resolver_for("http://production.test:9", &[&server.url()])?;
        let forced = resolver.force_production();
        assert_eq!(forced, Url::parse("http://production.test:9")?);

        let resolved = resolver.resolve(&Client::new()).await;
        assert_eq!(resolved, forced);

        probe.assert_async().await;

        Ok(())
    }

    #[test(tokio::test)]
    async fn forcing_local_pins_the_first_candidate() -> Result<()> {
        let mut server = Server::new_async().await;
        let probe = server.mock("GET", "/").expect(0).create_async().await;

        let resolver = resolver_for(
            "http://production.test:9",
            &[&server.url(), "http://127.0.0.1:1"],
        )?;
        let forced = resolver.force_first_candidate()?;
        assert_eq!(forced, Url::parse(&server.url())?);

        let resolved = resolver.resolve(&Client::new()).await;
        assert_eq!(resolved, forced);

        probe.assert_async().await;

        Ok(())
    }

    #[test]
    fn forcing_local_requires_candidates() -> Result<()> {
        let resolver = resolver_for("http://production.test:9", &[])?;
        assert!(resolver.force_first_candidate().is_err());
        Ok(())
    }

    #[test(tokio::test)]
    async fn forcing_production_mid_round_stops_the_round() -> Result<()> {
        // Bound but never accepted, so the first candidate's probe hangs
        // until the probe timeout fires.
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let hanging = format!("http://{}", listener.local_addr()?);

        let mut second = Server::new_async().await;
        let second_probe = second.mock("GET", "/").expect(0).create_async().await;

        let resolver = Arc::new(resolver_for(
            "http://production.test:9",
            &[&hanging, &second.url()],
        )?);
        let resolving = tokio::spawn({
            let resolver = Arc::clone(&resolver);
            async move { resolver.resolve(&Client::new()).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        let forced = resolver.force_production();

        let resolved = tokio::time::timeout(Duration::from_secs(10), resolving).await??;
        assert_eq!(resolved, forced);
        assert_eq!(resolver.cached(), Some(forced));

        second_probe.assert_async().await;

        Ok(())
    }

    #[test(tokio::test)]
    async fn forcing_local_mid_round_is_not_overwritten_by_the_fallback() -> Result<()> {
        // With the only candidate's probe hanging, the round's own outcome
        // would be the production fallback. The forced value has to win.
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let hanging = format!("http://{}", listener.local_addr()?);

        let resolver = Arc::new(resolver_for("http://production.test:9", &[&hanging])?);
        let resolving = tokio::spawn({
            let resolver = Arc::clone(&resolver);
            async move { resolver.resolve(&Client::new()).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        let forced = resolver.force_first_candidate()?;
        assert_eq!(forced, Url::parse(&hanging)?);

        let resolved = tokio::time::timeout(Duration::from_secs(10), resolving).await??;
        assert_eq!(resolved, forced);
        assert_eq!(resolver.cached(), Some(forced));

        Ok(())
    }

    #[test(tokio::test)]
    async fn respects_a_pinned_url() -> Result<()> {
        let mut server = Server::new_async().await;
        let probe = server.mock("GET", "/").expect(0).create_async().await;

        let pinned = Url::parse("http://pinned.test:8000")?;
        let resolver = Resolver::new(
            Url::parse("http://production.test:9")?,
            vec![Url::parse(&server.url())?],
            Duration::from_secs(2),
            Some(pinned.clone()),
        );
        assert_eq!(resolver.resolve(&Client::new()).await, pinned);

        probe.assert_async().await;

        Ok(())
    }

    #[test]
    fn mode_parses_from_strings() -> Result<()> {
        assert_eq!(Mode::from_str("auto")?, Mode::Auto);
        assert_eq!(Mode::from_str("production")?, Mode::Production);
        assert_eq!(Mode::from_str("local")?, Mode::Local);
        assert!(Mode::from_str("staging").is_err());
        Ok(())
    }
}
