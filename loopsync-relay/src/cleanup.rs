//! Background cleanup: prune expired pairing links.

use crate::storage::RelayStorage;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

pub fn spawn_cleanup_task(
    storage: RelayStorage,
    interval_secs: u64,
    link_ttl_secs: i64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            interval.tick().await;
            if let Err(e) = run_cleanup(&storage, link_ttl_secs) {
                tracing::error!("Cleanup error: {}", e);
            }
        }
    })
}

fn run_cleanup(storage: &RelayStorage, link_ttl_secs: i64) -> Result<(), String> {
    let now = chrono::Utc::now().timestamp();
    let removed = storage
        .prune_links(now, link_ttl_secs)
        .map_err(|e| e.to_string())?;

    if removed > 0 {
        tracing::debug!("Pruned {} expired pairing links", removed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_cleanup_prunes_expired_links() {
        let storage = RelayStorage::in_memory().unwrap();
        let now = chrono::Utc::now().timestamp();
        let stale = storage.insert_link("key", now - 1_000).unwrap();
        let live = storage.insert_link("key", now).unwrap();

        run_cleanup(&storage, 300).unwrap();

        assert!(storage.find_link(&stale.id, now - 1_000, 300).unwrap().is_none());
        assert!(storage.find_link(&live.id, now, 300).unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_task_runs_on_interval() {
        let storage = RelayStorage::in_memory().unwrap();
        let now = chrono::Utc::now().timestamp();
        let stale = storage.insert_link("key", now - 1_000).unwrap();

        let handle = spawn_cleanup_task(storage.clone(), 60, 300);
        time::sleep(Duration::from_secs(1)).await;

        assert!(storage.find_link(&stale.id, now - 1_000, 300).unwrap().is_none());
        handle.abort();
    }
}
