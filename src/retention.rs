use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::RetentionCfg;
use crate::store::UploadStore;

/// Periodically prunes the upload store. The first sweep runs immediately.
pub fn spawn_sweeper(store: Arc<UploadStore>, cfg: RetentionCfg) -> JoinHandle<()> {
    let max_age = Duration::from_secs(cfg.max_age_secs);
    let every = Duration::from_secs(cfg.sweep_every_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.prune(max_age).await {
                Ok(r) if r.removed > 0 => {
                    info!(removed = r.removed, kept = r.kept, dir = %store.dir().display(), "pruned uploads")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "upload sweep failed"),
            }
        }
    })
}
