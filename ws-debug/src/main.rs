mod data_container;
mod workload;

use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use workload::WorkloadError;

const WORKER_THREADS: usize = 12;
const INPUT_FILE: &str = "input.txt";

/// Load the point file on a worker thread and report its first element.
async fn do_work() -> Result<(), WorkloadError> {
    let input = PathBuf::from(INPUT_FILE);
    let spill_dir = PathBuf::from(".");
    let data = tokio::spawn(async move { workload::read_data(&input, &spill_dir).await })
        .await
        .map_err(|e| WorkloadError::Join { source: e })??;

    if data.is_empty() {
        tracing::warn!("input contained no points");
        return Ok(());
    }
    let first = data.get(0)?;
    tracing::info!("x = {:.6}, y = {:.6}, z = {:.6}", first.x, first.y, first.z);
    Ok(())
}

fn main() {
    // Thread ids tell the main thread apart from the pool workers.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ws_debug=info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    tracing::info!("main thread");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(WORKER_THREADS)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to start worker pool");
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(do_work());
    drop(runtime);
    tracing::debug!("worker pool shut down");

    if let Err(e) = result {
        tracing::error!(error = %e, "workload failed");
        std::process::exit(1);
    }
    tracing::info!("done");
}
