use clap::ValueHint;

use std::path::PathBuf;

#[derive(clap::Parser, Debug, Clone)]
#[command(version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to the config file.
    ///
    /// By default, newsagg looks for a file named `newsagg.toml` in the following directories
    /// (in order):
    ///
    /// - `./` (the current directory)
    /// - `/etc`
    #[arg(
        short,
        global = true,
        env = "NEWSAGG_CONFIG",
        value_hint(ValueHint::FilePath)
    )]
    pub config_path: Option<PathBuf>,

    /// HTTP API address to bind to.
    #[arg(long, global = true, env = "NEWSAGG_BIND_ADDR")]
    pub bind_addr: Option<String>,

    /// Path to the database file.
    #[arg(long, global = true, env = "NEWSAGG_DB", value_hint(ValueHint::FilePath))]
    pub db_path: Option<PathBuf>,

    /// Path to the HTTP cache directory.
    #[arg(
        long,
        global = true,
        env = "NEWSAGG_CACHE_DIR",
        value_hint(ValueHint::DirPath)
    )]
    pub cache_dir: Option<PathBuf>,

    /// API key for NewsAPI.
    #[arg(long, global = true, env = "NEWSAGG_NEWS_API_KEY", hide_env_values = true)]
    pub news_api_key: Option<String>,

    /// API key for the New York Times API.
    #[arg(long, global = true, env = "NEWSAGG_NYT_API_KEY", hide_env_values = true)]
    pub nyt_api_key: Option<String>,

    /// API key for the Guardian content API.
    #[arg(long, global = true, env = "NEWSAGG_GUARDIAN_API_KEY", hide_env_values = true)]
    pub guardian_api_key: Option<String>,
}

#[derive(clap::Subcommand, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Command {
    /// Serve the HTTP API and fetch articles on a schedule (the default).
    #[default]
    Serve,

    /// Fetch articles from every enabled provider once, then exit.
    Fetch,
}

impl Args {
    pub fn parse() -> Self {
        clap::Parser::parse()
    }
}
