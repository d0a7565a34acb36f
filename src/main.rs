mod cli;
mod config;
mod fetch;
mod server;
mod source;
mod state;
mod storage;
mod timestamp;

use std::process::ExitCode;

use anyhow::Result;
use cli::{Args, Command};
use fetch::Fetcher;
use server::Server;
use state::State;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing::{error, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

fn set_up_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_regex(false)
                .with_default_directive(Level::INFO.into())
                .with_env_var("NEWSAGG_LOG")
                .from_env_lossy(),
        )
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    set_up_logging();

    let cancel = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();

        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Could not listen for Ctrl-C: {e}");

                return;
            }

            cancel.cancel();
        }
    });

    let mut tasks = match start(cancel.clone()).await {
        Ok(tasks) => tasks,

        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    let mut exit_code = ExitCode::SUCCESS;

    while let Some(task_result) = tasks.join_next().await {
        cancel.cancel();

        match task_result {
            Ok(Ok(())) => {}

            Ok(Err(e)) => {
                error!("{e:#}");
                exit_code = ExitCode::FAILURE;
            }

            Err(e) => {
                error!("{e:#}");
                exit_code = ExitCode::FAILURE;
            }
        }
    }

    exit_code
}

async fn start(cancel: CancellationToken) -> Result<JoinSet<Result<()>>> {
    let mut args = Args::parse();
    let command = args.command.take().unwrap_or_default();
    let config_paths = args
        .config_path
        .take()
        .into_iter()
        .chain(["./newsagg.toml".into(), "/etc/newsagg.toml".into()])
        .collect::<Vec<_>>();
    let mut config = config::load(&config_paths)?;
    config.update(args);
    let state = State::new(config).await?;

    let mut tasks = JoinSet::new();

    match command {
        Command::Serve => {
            let fetcher = Fetcher::new(
                state.providers.clone(),
                state.client.clone(),
                state.storage.clone(),
                state.cfg.fetch_interval.into(),
                state.cfg.max_initial_fetch_sleep.into(),
            );
            let server = Server::new(state).await?;

            tasks.spawn(fetcher.run(cancel.clone()));
            tasks.spawn(server.serve(cancel.clone()));
        }

        Command::Fetch => {
            tasks.spawn(fetch::fetch_all_once(
                state.providers.clone(),
                state.client.clone(),
                state.storage.clone(),
                cancel.clone(),
            ));
        }
    }

    Ok(tasks)
}
