use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{Engine, EngineError};

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&engine, threshold).await {
            tracing::error!("WAL compaction failed: {e}");
        }
    }
}

/// Compact when the appends since the last compaction reach `threshold`.
/// Returns whether a compaction ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        tracing::debug!("compactor skip: {appends} appends < {threshold}");
        return Ok(false);
    }
    engine.compact_wal().await?;
    info!("compacted WAL after {appends} appends");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("parkd_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let engine = Engine::new(test_wal_path("threshold.wal")).unwrap();

        engine.create_lot(Ulid::new(), "A".into(), None, 2).await.unwrap();
        assert!(!compact_if_needed(&engine, 3).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 1);

        engine.create_lot(Ulid::new(), "B".into(), None, 2).await.unwrap();
        engine.create_lot(Ulid::new(), "C".into(), None, 2).await.unwrap();
        assert!(compact_if_needed(&engine, 3).await.unwrap());
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.list_lots().await.len(), 3);
    }
}
