use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;
use tracing::warn;

use crate::config::Config;
use crate::fetch::Client;
use crate::source::{Guardian, NewYorkTimes, NewsApi, ProviderKind, Source};
use crate::storage::Storage;

#[derive(Clone)]
pub struct State {
    pub storage: Arc<Storage>,
    pub cfg: Arc<Config>,
    pub providers: Arc<BTreeMap<ProviderKind, Provider>>,
    pub client: Client,
}

impl State {
    pub async fn new(cfg: Config) -> Result<Self> {
        let storage = Storage::new(&cfg.db_path).await?;

        Self::with_storage(cfg, storage)
    }

    pub fn with_storage(cfg: Config, storage: Storage) -> Result<Self> {
        let providers = Arc::new(make_providers(&cfg)?);
        let client = Client::new(&cfg)?;

        Ok(State {
            storage: Arc::new(storage),
            cfg: Arc::new(cfg),
            providers,
            client,
        })
    }
}

pub struct Provider {
    pub source: Box<dyn Source>,
    pub enabled: bool,
    pub force_update: Arc<Notify>,
}

impl Provider {
    fn new(source: Box<dyn Source>, enabled: bool, api_key: &str) -> Self {
        let kind = source.kind();
        let has_key = !api_key.trim().is_empty();

        if enabled && !has_key {
            warn!("No API key is configured for {kind}; it will not be fetched from");
        }

        Self {
            source,
            enabled: enabled && has_key,
            force_update: Default::default(),
        }
    }
}

fn make_providers(cfg: &Config) -> Result<BTreeMap<ProviderKind, Provider>> {
    let mut providers = BTreeMap::new();
    let mut add = |provider: Provider| {
        providers.insert(provider.source.kind(), provider);
    };

    if let Some(news_api) = &cfg.providers.news_api {
        add(Provider::new(
            Box::new(NewsApi::from_cfg(news_api)?),
            news_api.enabled,
            &news_api.api_key,
        ));
    }

    if let Some(nyt) = &cfg.providers.nyt {
        add(Provider::new(
            Box::new(NewYorkTimes::from_cfg(nyt)?),
            nyt.enabled,
            &nyt.api_key,
        ));
    }

    if let Some(guardian) = &cfg.providers.guardian {
        add(Provider::new(
            Box::new(Guardian::from_cfg(guardian)?),
            guardian.enabled,
            &guardian.api_key,
        ));
    }

    Ok(providers)
}
