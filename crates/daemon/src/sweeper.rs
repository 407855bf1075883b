//! Periodic eviction of expired signed links.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use access::{unix_now, LinkSigner};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::files::archive::remove_ephemeral;

/// Purge tickets expired at `now` and delete the archives they orphaned.
///
/// Returns the number of archives removed.
pub fn sweep_once(signer: &LinkSigner, temp_root: &Path, now: i64) -> usize {
    let orphaned = match signer.purge_expired(now) {
        Ok(paths) => paths,
        Err(e) => {
            error!("Failed to purge expired links: {}", e);
            return 0;
        }
    };
    let removed = orphaned
        .iter()
        .filter(|path| remove_ephemeral(temp_root, path))
        .count();
    if removed > 0 {
        info!("Removed {} expired archives", removed);
    }
    removed
}

/// Spawn the sweeper task. It runs until `shutdown` is cancelled.
pub fn spawn_sweeper(
    signer: Arc<LinkSigner>,
    temp_root: PathBuf,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Link sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    sweep_once(&signer, &temp_root, unix_now());
                    debug!(outstanding = signer.outstanding(), "Link sweep complete");
                }
            }
        }
    })
}
