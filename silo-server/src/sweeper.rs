//! Sweeper — background task that prunes aged jobs, idempotency keys
//! and upload/export files.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{info, warn};

use crate::state::AppState;

/// Spawn the sweeper as a background tokio task on a fixed tick.
pub fn spawn_sweeper(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(state.config.sweep_interval_secs));
        loop {
            interval.tick().await;
            sweep(&state).await;
        }
    });
}

async fn sweep(state: &AppState) {
    let job_max_age = chrono::Duration::seconds(state.config.job_max_age_secs as i64);

    let (imports, exports) = state.registry.cleanup_old(job_max_age).await;
    let keys = state.ledger.prune(job_max_age).await;
    if imports + exports + keys > 0 {
        info!(
            "sweeper dropped {} import jobs, {} export jobs, {} idempotency keys",
            imports, exports, keys
        );
    }

    for (dir, max_age_secs) in [
        (&state.config.uploads_dir, state.config.upload_max_age_secs),
        (&state.config.exports_dir, state.config.export_max_age_secs),
    ] {
        match prune_files(dir, max_age_secs) {
            Ok(0) => {}
            Ok(removed) => info!("sweeper removed {} files from {:?}", removed, dir),
            Err(e) => warn!("sweeper failed on {:?}: {}", dir, e),
        }
    }
}

/// Remove regular files whose mtime is older than `max_age_secs`.
fn prune_files(dir: &Path, max_age_secs: u64) -> std::io::Result<usize> {
    let cutoff = SystemTime::now() - Duration::from_secs(max_age_secs);
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        if meta.modified()? < cutoff {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}
