//! Aggregate Job - incremental partitioned event counts
//!
//! Counts new events per time partition for every configured parser and
//! interval, merges them into the sorted index and records the cursor.
//! Runs until SIGINT/SIGTERM.
//!
//! Usage:
//!   cargo run --release --bin aggregate_job -- [--limit N] [--parser NAME] ...
//!
//! Environment variables:
//!   MAINEVENT_DB_PATH - event store (default: data/mainevent.db)
//!   MAINEVENT_INDEX_DB_PATH - sorted index + cursor (default: data/mainevent-index.db)
//!   MAINEVENT_PARSERS / MAINEVENT_INTERVALS - permutations (default: Json / 1h,1d,7d,30d,365d)
//!
//! Exit codes: 0 clean shutdown, 1 startup failure, 3 cursor write failure

use clap::Parser;
use dotenv::dotenv;
use log::{error, info};
use mainevent::aggregate::CountAllPartitioned;
use mainevent::cli::JobArgs;
use mainevent::config::JobConfig;
use mainevent::context::JobContext;
use mainevent::job::PartitionedAggregationJob;
use mainevent::scheduler::{listen_for_termination, CycleScheduler, ShutdownHandle};
use std::sync::Arc;

const STARTUP_FAILURE: i32 = 1;

#[tokio::main]
async fn main() {
    dotenv().ok();
    let args = JobArgs::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_level()))
        .init();

    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("❌ Startup failed: {}", e);
            STARTUP_FAILURE
        }
    };
    std::process::exit(code);
}

async fn run(args: JobArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let config = args.apply(JobConfig::from_env()?)?;

    info!("🚀 Aggregate Job");
    info!("   ├─ Events: {}", config.db_path.display());
    info!("   ├─ Index: {}", config.index_db_path.display());
    info!("   ├─ Namespace: {}", config.namespace);
    info!("   ├─ Chunk size: {}", config.chunk_size);
    info!(
        "   └─ Waits: job {:?}, chunk {:?}, idle {:?}",
        config.job_wait, config.chunk_wait, config.idle_wait
    );

    let ctx = JobContext::open(config)?;
    let job = PartitionedAggregationJob::new(&ctx, Arc::new(CountAllPartitioned))?;
    for permutation in job.permutations() {
        info!("   ├─ {} -> {}", permutation, permutation.index_key);
    }

    let shutdown = ShutdownHandle::new();
    let listener = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = listen_for_termination(listener.clone()).await {
            error!("❌ Failed to listen for termination signals: {}", e);
            listener.request();
        }
    });

    let scheduler = CycleScheduler::new(
        job,
        shutdown,
        ctx.config.chunk_wait,
        ctx.config.idle_wait,
    )
    .with_start_id(ctx.config.start_id);

    let exit = scheduler.run().await;
    info!("✅ Aggregate job stopped ({:?})", exit);
    Ok(exit.exit_code())
}
