use std::sync::Arc;

use clap::Parser;
use log::info;

use progression_pool::app::{config::Config, server};
use progression_pool::manager::pool::Pool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    let pool = Arc::new(Pool::new(config.worker_count())?);
    pool.workers_run()?;

    let served = server::serve(&config, Arc::clone(&pool)).await;

    pool.shutdown();
    let drained = pool.drained();
    tokio::task::spawn_blocking(move || {
        let _ = drained.recv();
    })
    .await?;
    info!("Graceful shutdown (:");

    served
}
