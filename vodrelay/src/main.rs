use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use vodrelay::config::Config;
use vodrelay::media::ffmpeg::Ffmpeg;
use vodrelay::pipeline::queue::JobQueue;
use vodrelay::pipeline::run::RunContext;
use vodrelay::pipeline::worker::{PoolConfig, WorkerPool};
use vodrelay::telegram::api::BotClient;
use vodrelay::telegram::bot::BotFrontEnd;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = config.ensure_dirs() {
        eprintln!("could not create working directories: {e}");
        std::process::exit(1);
    }

    let _log_guard = match vodrelay::logging::init_logging(&config.log_dir()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("could not initialize logging: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        error!(error = %e, "fatal startup error");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> vodrelay::Result<()> {
    // Nothing enqueued may run without the toolchain
    let ffmpeg = Ffmpeg::new(config.ffmpeg_path.clone());
    let version = ffmpeg.verify().await?;
    info!(version, "toolchain verified");

    let client = Arc::new(BotClient::new(&config.bot_token));
    let me = client.get_me().await?;
    info!(bot = me.username.as_deref().unwrap_or("unknown"), "bot token verified");

    let queue = Arc::new(JobQueue::new());
    let pool = WorkerPool::new(
        PoolConfig {
            workers: config.workers,
            poll_interval_ms: config.poll_interval_ms,
        },
        queue.clone(),
    );
    let run_context = Arc::new(RunContext::resolve(&config, ffmpeg, client.clone()).await);
    pool.start(run_context);

    let cancel = CancellationToken::new();
    vodrelay::logging::start_retention_cleanup(config.log_dir(), cancel.clone());

    let mut front_end = BotFrontEnd::new(client, queue.clone(), config.admin_id);
    let bot_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { front_end.run(cancel).await })
    };

    info!("vodrelay started, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "could not listen for shutdown signal");
    }

    info!("shutdown requested, draining the job queue");
    cancel.cancel();
    let _ = bot_task.await;
    pool.stop().await;
    info!("shutdown complete");
    Ok(())
}
