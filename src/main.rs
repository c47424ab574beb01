mod config;
mod credentials;
mod error;
mod fetcher;
mod hrv;
mod pipeline;
mod reconstruction;
mod records;
mod scheduler;
mod timeseries;
mod token;

use config::Config;
use credentials::{CredentialStore, FileCredentialStore};
use fetcher::SampleFetcher;
use pipeline::Pipeline;
use records::{FileRecordStore, RecordLog};
use scheduler::PollScheduler;
use std::sync::Arc;
use token::TokenRefresher;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let data_dir = config.data_dir()?;
    log::info!("Using data directory {}", data_dir.display());

    let credentials: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::in_dir(&data_dir));
    // Fail early with a clear message when the document was never seeded
    let seeded = credentials.read().await?;
    log::info!("Loaded credentials for client {}", seeded.client_id);

    let records = Arc::new(RecordLog::new(
        Arc::new(FileRecordStore::open_in_dir(&data_dir)?),
        config.store.sequence_mode,
    ));
    if config.store.reset_on_start {
        records.reset().await?;
    }
    log::info!("Record sequencing: {:?}", records.mode());

    let client = fetcher::http_client(config.request_timeout())?;
    let refresher = TokenRefresher::new(client.clone(), config.provider.token_url.clone());
    let fetcher = SampleFetcher::new(
        client,
        config.provider.api_base.clone(),
        config.provider.user_id.clone(),
        refresher,
        config.poll.retry_after_refresh,
    );

    let pipeline = Arc::new(Pipeline::new(
        credentials,
        records,
        fetcher,
        config.poll.window_secs,
        config.poll.jitter_seed,
    ));

    let shutdown = CancellationToken::new();
    let scheduler = PollScheduler::new(pipeline, config.poll_interval(), config.poll.cycle_mode);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    log::info!("Ctrl-C received, shutting down");
    shutdown.cancel();
    scheduler_task.await?;

    Ok(())
}
