mod client;

use std::collections::BTreeMap;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use ::time::OffsetDateTime;
use anyhow::{Context, Result};
use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, SeedableRng};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, trace_span, warn, Instrument};

use crate::source::{FetchWindow, ProviderKind, Source};
use crate::state::Provider;
use crate::storage::{Storage, UpsertOutcome};

pub use self::client::Client;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
}

impl Summary {
    pub fn stored(&self) -> usize {
        self.inserted + self.updated
    }
}

/// The window for a fetch starting now.
pub fn current_window() -> FetchWindow {
    FetchWindow::ending_on(OffsetDateTime::now_utc().date())
}

/// Fetches one provider's articles and stores them.
///
/// Never fails: problems are logged and `None` is returned, in which case nothing was stored.
/// Articles are stored one transaction each, so a failure partway keeps what came before it.
pub async fn run_unit(
    client: &Client,
    storage: &Storage,
    source: &dyn Source,
    window: &FetchWindow,
) -> Option<Summary> {
    match fetch_and_store(client, storage, source, window).await {
        Ok(summary) => Some(summary),

        Err(e) => {
            error!("Could not fetch articles from {}: {e:#}", source.kind());

            None
        }
    }
}

async fn fetch_and_store(
    client: &Client,
    storage: &Storage,
    source: &dyn Source,
    window: &FetchWindow,
) -> Result<Summary> {
    let articles = client.fetch(source, window).await?;
    let mut summary = Summary::default();

    for (idx, article) in articles.iter().enumerate() {
        let result = async {
            let mut tx = storage.begin().await?;
            let outcome = tx.upsert_article(article).await?;
            tx.commit().await?;

            anyhow::Ok(outcome)
        }
        .instrument(trace_span!("upsert", %idx))
        .await;

        match result {
            Ok(UpsertOutcome::Inserted) => summary.inserted += 1,
            Ok(UpsertOutcome::Updated) => summary.updated += 1,

            Err(e) => {
                warn!(url = %article.url, "Could not store an article: {e:#}");
                summary.failed += 1;
            }
        }
    }

    let mut tx = storage.begin().await?;
    tx.record_provider_run(source.kind().as_str(), summary.stored())
        .await?;
    tx.commit().await?;

    info!(
        inserted = summary.inserted,
        updated = summary.updated,
        failed = summary.failed,
        "Fetched {} articles from {}",
        articles.len(),
        source.kind(),
    );

    Ok(summary)
}

/// Runs every enabled provider once, concurrently, and waits for all of them (or a cancellation).
pub async fn fetch_all_once(
    providers: Arc<BTreeMap<ProviderKind, Provider>>,
    client: Client,
    storage: Arc<Storage>,
    cancel: CancellationToken,
) -> Result<()> {
    let window = current_window();
    let mut units = JoinSet::new();

    for (&kind, provider) in &*providers {
        if !provider.enabled {
            info!("Skipping {kind}: disabled in the config");

            continue;
        }

        let providers = providers.clone();
        let client = client.clone();
        let storage = storage.clone();

        units.spawn(
            async move {
                let source = &*providers[&kind].source;

                run_unit(&client, &storage, source, &window).await
            }
            .instrument(info_span!("run", provider = %kind)),
        );
    }

    let mut failed = 0;

    loop {
        let result = select! {
            _ = cancel.cancelled() => {
                debug!("Received a cancellation signal; aborting the remaining fetches");
                units.abort_all();

                return Ok(());
            }

            result = units.join_next() => result,
        };

        let Some(result) = result else { break };

        match result {
            Ok(Some(_)) => {}
            Ok(None) => failed += 1,

            Err(e) => {
                error!("A fetch task failed: {e}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        warn!("{failed} provider(s) could not be fetched from");
    }

    let mut tx = storage.begin().await?;
    let total = tx.count_articles().await?;
    tx.commit().await?;
    info!("{total} articles are stored");

    Ok(())
}

/// Spawns one scheduling task per enabled provider.
pub struct Fetcher {
    providers: Arc<BTreeMap<ProviderKind, Provider>>,
    client: Client,
    storage: Arc<Storage>,
    fetch_interval: Duration,
    max_initial_sleep: Duration,
}

impl Fetcher {
    pub fn new(
        providers: Arc<BTreeMap<ProviderKind, Provider>>,
        client: Client,
        storage: Arc<Storage>,
        fetch_interval: Duration,
        max_initial_sleep: Duration,
    ) -> Self {
        Self {
            providers,
            client,
            storage,
            fetch_interval,
            max_initial_sleep,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        async move {
            {
                let mut thread_rng = thread_rng();

                for (&kind, provider) in &*self.providers {
                    if !provider.enabled {
                        info!("Skipping {kind}: disabled in the config");

                        continue;
                    }

                    let rng = SmallRng::from_rng(&mut thread_rng)
                        .context("could not seed an RNG")?;
                    let task = Task {
                        providers: self.providers.clone(),
                        client: self.client.clone(),
                        storage: self.storage.clone(),
                        kind,
                        rng,
                        cancel: cancel.clone(),
                        fetch_interval: self.fetch_interval,
                        max_initial_sleep: self.max_initial_sleep,
                    };

                    tokio::spawn(task.run().instrument(info_span!("run", provider = %kind)));
                }
            }

            cancel.cancelled_owned().await;

            Ok(())
        }
        .instrument(info_span!("fetcher"))
        .await
    }
}

struct Task {
    providers: Arc<BTreeMap<ProviderKind, Provider>>,
    client: Client,
    storage: Arc<Storage>,
    kind: ProviderKind,
    rng: SmallRng,
    cancel: CancellationToken,
    fetch_interval: Duration,
    max_initial_sleep: Duration,
}

impl Task {
    async fn run(mut self) {
        let offset = if self.max_initial_sleep.is_zero() {
            Duration::ZERO
        } else {
            self.rng.gen_range(Duration::ZERO..self.max_initial_sleep)
        };

        let initial_sleep = match self.last_fetched().await {
            Ok(Some(last_fetched)) => {
                trace!(%last_fetched, "Found the last fetch time");
                let next_fetch = last_fetched + self.fetch_interval;
                let remaining =
                    (next_fetch - OffsetDateTime::now_utc()).max(::time::Duration::ZERO);

                (remaining + offset).try_into().unwrap_or(offset)
            }

            Ok(None) => offset,

            Err(e) => {
                warn!("Could not look up the last fetch time: {e:#}");

                offset
            }
        };

        debug!("Scheduling the next fetch in {}s", initial_sleep.as_secs());
        let mut next_fetch = pin!(time::sleep(initial_sleep));
        let force_update_notify = self.provider().force_update.clone();
        let mut force_update = pin!(force_update_notify.notified());

        loop {
            select! {
                _ = self.cancel.cancelled() => {
                    debug!("Received a cancellation signal; exiting");
                    break;
                }

                _ = &mut force_update => {
                    force_update.set(force_update_notify.notified());

                    let deadline = next_fetch.deadline();
                    let now = Instant::now();
                    let preempted_by = deadline.saturating_duration_since(now).as_secs();
                    info!(
                        "Received a dispatch request \
                            (preempted the next scheduled fetch by {preempted_by}s)"
                    );
                }

                _ = &mut next_fetch => {}
            }

            let window = current_window();
            run_unit(
                &self.client,
                &self.storage,
                &*self.provider().source,
                &window,
            )
            .await;

            debug!(
                "Scheduling the next fetch in {}s",
                self.fetch_interval.as_secs()
            );
            next_fetch
                .as_mut()
                .reset(Instant::now() + self.fetch_interval);
        }
    }

    fn provider(&self) -> &Provider {
        &self.providers[&self.kind]
    }

    async fn last_fetched(&self) -> Result<Option<OffsetDateTime>> {
        let mut tx = self.storage.begin().await?;
        let last_fetched = tx.get_provider_last_fetched(self.kind.as_str()).await?;
        tx.commit().await?;

        Ok(last_fetched)
    }
}
