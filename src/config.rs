mod types;

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use take_mut::take;
use tracing::{debug, info};

pub use self::types::*;

fn default_bind_addr() -> String {
    Config::default().bind_addr
}

fn default_db_path() -> PathBuf {
    Config::default().db_path
}

fn default_fetch_interval() -> Duration {
    Config::default().fetch_interval
}

fn default_max_initial_fetch_sleep() -> Duration {
    Config::default().max_initial_fetch_sleep
}

fn default_user_agent() -> String {
    Config::default().user_agent
}

fn default_request_timeout() -> Duration {
    Config::default().request_timeout
}

fn default_max_retries() -> u32 {
    Config::default().max_retries
}

fn default_retry_backoff() -> Duration {
    Config::default().retry_backoff
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// On-disk HTTP cache. Cache keys omit API keys, but the stored responses record the full
    /// request URL, so keep this directory as private as the config file.
    pub cache_dir: Option<PathBuf>,

    #[serde(default)]
    pub providers: Providers,

    #[serde(default = "default_fetch_interval")]
    pub fetch_interval: Duration,

    #[serde(default = "default_max_initial_fetch_sleep")]
    pub max_initial_fetch_sleep: Duration,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: Duration,

    /// Skips TLS certificate verification for provider requests.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Config {
    pub fn update(&mut self, args: crate::cli::Args) {
        fn set_if_some<T>(dst: &mut T, v: Option<T>) {
            if let Some(v) = v {
                *dst = v;
            }
        }

        set_if_some(&mut self.bind_addr, args.bind_addr);
        set_if_some(&mut self.db_path, args.db_path);
        set_if_some(&mut self.cache_dir, args.cache_dir.map(Some));

        if let Some(api_key) = args.news_api_key {
            self.providers.news_api.get_or_insert_with(Default::default).api_key = api_key;
        }

        if let Some(api_key) = args.nyt_api_key {
            self.providers.nyt.get_or_insert_with(Default::default).api_key = api_key;
        }

        if let Some(api_key) = args.guardian_api_key {
            self.providers.guardian.get_or_insert_with(Default::default).api_key = api_key;
        }
    }

    pub fn resolve_relative_paths(&mut self, config_dir: impl AsRef<Path>) {
        let config_dir = config_dir.as_ref();

        // rebuild the whole struct so that a new path field can't be forgotten here.
        take(self, |this| Self {
            bind_addr: this.bind_addr,
            db_path: config_dir.join(&this.db_path),
            cache_dir: this.cache_dir.map(|cache_dir| config_dir.join(cache_dir)),
            providers: this.providers,
            fetch_interval: this.fetch_interval,
            max_initial_fetch_sleep: this.max_initial_fetch_sleep,
            user_agent: this.user_agent,
            request_timeout: this.request_timeout,
            max_retries: this.max_retries,
            retry_backoff: this.retry_backoff,
            accept_invalid_certs: this.accept_invalid_certs,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "127.0.0.1:20655".into(),
            db_path: "./newsagg.sqlite3".into(),
            cache_dir: None,
            providers: Default::default(),
            fetch_interval: Duration::from_secs(86_400),
            max_initial_fetch_sleep: Duration::from_secs(45),
            user_agent: concat!("newsagg/", env!("CARGO_PKG_VERSION")).into(),
            request_timeout: Duration::from_secs(300),
            max_retries: 2,
            retry_backoff: Duration::from_secs(2),
            accept_invalid_certs: false,
        }
    }
}

/// Provider sections. A provider without a section is not fetched from.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Providers {
    pub news_api: Option<NewsApiConfig>,
    pub nyt: Option<ProviderConfig>,
    pub guardian: Option<ProviderConfig>,
}

fn default_provider_enabled() -> bool {
    true
}

fn default_news_api_query() -> String {
    "apple".into()
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_enabled")]
    pub enabled: bool,

    /// Overrides the provider's public endpoint.
    pub request_url: Option<Url>,

    #[serde(default)]
    pub api_key: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: default_provider_enabled(),
            request_url: None,
            api_key: String::new(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct NewsApiConfig {
    #[serde(default = "default_provider_enabled")]
    pub enabled: bool,

    pub request_url: Option<Url>,

    #[serde(default)]
    pub api_key: String,

    /// The search query sent as `q`.
    #[serde(default = "default_news_api_query")]
    pub query: String,
}

impl Default for NewsApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_provider_enabled(),
            request_url: None,
            api_key: String::new(),
            query: default_news_api_query(),
        }
    }
}

pub fn load(search_paths: &[PathBuf]) -> Result<Config> {
    for path in search_paths {
        debug!("Trying to load {}", path.display());
        let mut contents = String::new();

        {
            let mut f = match File::open(path) {
                Ok(f) => f,

                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(file = %path.display(), "File not found, skipping");
                    continue;
                }

                Err(e) => {
                    return Err(e)
                        .context(anyhow!("could not load a config file `{}`", path.display()));
                }
            };

            f.read_to_string(&mut contents).with_context(|| {
                anyhow!(
                    "could not read the contents of a config file `{}`",
                    path.display()
                )
            })?;
        }

        let mut cfg: Config = toml::from_str(&contents)
            .with_context(|| anyhow!("could not load the config file `{}`", path.display()))?;

        if let Some(parent) = path.parent() {
            cfg.resolve_relative_paths(parent);
        }

        info!("Loaded a config file `{}`", path.display());

        return Ok(cfg);
    }

    info!("Using the default config");

    Ok(Default::default())
}
