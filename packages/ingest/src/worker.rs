//! Background refresh worker.
//!
//! Runs one refresh cycle on startup and then one per refresh interval until
//! a shutdown signal arrives. A cycle in flight when the signal arrives is
//! abandoned at its next suspension point and its open fetch run is
//! finalized as failed; the store is closed on the way out.

use std::time::Duration;

use govdata_database::DbError;
use govdata_ingest_models::CycleSummary;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::engine::FetchEngine;

/// Runs a single refresh cycle and logs its summary.
///
/// A cycle that cannot start (e.g. the store is unreadable) is logged and
/// yields `None`.
pub async fn run_cycle(engine: &FetchEngine) -> Option<CycleSummary> {
    log::info!("Data refresh cycle started at {}", chrono::Utc::now().to_rfc3339());

    match engine.fetch_due_datasets().await {
        Ok(results) => {
            let summary = CycleSummary::from_results(&results);
            summary.log("Refresh cycle summary");
            Some(summary)
        }
        Err(e) => {
            log::error!("Fatal error in refresh cycle: {e}");
            None
        }
    }
}

/// Runs the refresh loop until `shutdown` flips to `true` or its sender is
/// dropped, then closes the store.
///
/// # Errors
///
/// Returns [`DbError`] if the store fails to close.
pub async fn run(
    engine: &FetchEngine,
    refresh_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), DbError> {
    log::info!(
        "Worker starting, refresh interval {} minute(s)",
        refresh_interval.as_secs() / 60
    );

    let mut ticker = tokio::time::interval(refresh_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while !*shutdown.borrow_and_update() {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                tokio::select! {
                    _ = run_cycle(engine) => {}
                    _ = shutdown.changed() => {
                        log::warn!("Shutdown requested, abandoning in-flight refresh cycle");
                        engine.abandon_in_flight("shutdown").await;
                        break;
                    }
                }
            }
        }
    }

    log::info!("Shutting down worker");
    engine.close().await?;
    log::info!("Worker stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or on SIGTERM where supported.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            log::error!("Failed to listen for Ctrl-C: {e}");
                        }
                        log::warn!("Received SIGINT, shutting down gracefully");
                    }
                    _ = sigterm.recv() => {
                        log::warn!("Received SIGTERM, shutting down gracefully");
                    }
                }
                return;
            }
            Err(e) => log::error!("Failed to install SIGTERM handler: {e}"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {e}");
    }
    log::warn!("Received SIGINT, shutting down gracefully");
}

/// Spawns a task that flips the returned receiver to `true` on the first
/// OS shutdown signal.
#[must_use]
pub fn spawn_shutdown_listener() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = tx.send(true);
    });
    rx
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{TimeZone as _, Utc};
    use govdata_client::{ApiPage, ClientError, PageFetcher, PageRequest};
    use govdata_database::{IndicatorStore, MemoryStore};
    use govdata_dataset::{DatasetDescriptor, DatasetRegistry};
    use govdata_indicator_models::Category;
    use govdata_ingest_models::PipelineConfig;

    use super::*;
    use crate::clock::FakeClock;

    /// Requests shutdown on its first call and then never answers.
    struct SignallingFetcher {
        shutdown: watch::Sender<bool>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for SignallingFetcher {
        async fn fetch_page(
            &self,
            _resource_id: &str,
            _request: &PageRequest,
        ) -> Result<ApiPage, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.shutdown.send(true);
            std::future::pending().await
        }
    }

    fn engine(fetcher: Arc<dyn PageFetcher>, store: Arc<dyn IndicatorStore>) -> FetchEngine {
        let descriptor = DatasetDescriptor {
            id: "gdp".to_string(),
            name: "GDP".to_string(),
            resource_id: "gdp-resource".to_string(),
            category: Category::Economy,
            refresh_interval_minutes: 60,
            normalization: "economy".to_string(),
            description: String::new(),
            filters: BTreeMap::new(),
            page_size: None,
            active: true,
        };
        let registry = Arc::new(DatasetRegistry::new(vec![descriptor]).unwrap());
        let clock = Arc::new(FakeClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        ));
        FetchEngine::new(registry, fetcher, store, clock, PipelineConfig::default())
    }

    #[tokio::test]
    async fn already_signalled_worker_closes_store_without_fetching() {
        let (tx, rx) = watch::channel(false);
        let fetcher = Arc::new(SignallingFetcher {
            shutdown: tx.clone(),
            calls: AtomicUsize::new(0),
        });
        let store = Arc::new(MemoryStore::new());
        let engine = engine(fetcher.clone(), store.clone());

        tx.send(true).unwrap();
        run(&engine, Duration::from_secs(3600), rx).await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert!(matches!(
            store.registry_entries().await,
            Err(DbError::Closed)
        ));
    }

    #[tokio::test]
    async fn signal_during_first_cycle_stops_the_worker() {
        let (tx, rx) = watch::channel(false);
        let fetcher = Arc::new(SignallingFetcher {
            shutdown: tx,
            calls: AtomicUsize::new(0),
        });
        let store = Arc::new(MemoryStore::new());
        let engine = engine(fetcher.clone(), store.clone());

        tokio::time::timeout(
            Duration::from_secs(5),
            run(&engine, Duration::from_secs(3600), rx),
        )
        .await
        .expect("worker did not stop")
        .unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            store.registry_entries().await,
            Err(DbError::Closed)
        ));
    }

    #[tokio::test]
    async fn failed_cycle_is_logged_not_fatal() {
        let (tx, _rx) = watch::channel(false);
        let store = Arc::new(MemoryStore::new());
        let engine = engine(
            Arc::new(SignallingFetcher {
                shutdown: tx,
                calls: AtomicUsize::new(0),
            }),
            store.clone(),
        );
        store.close().await.unwrap();

        assert!(run_cycle(&engine).await.is_none());
    }
}
