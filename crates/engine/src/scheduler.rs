use crate::quote_cache::QuoteCache;
use chrono::Utc;
use events::SessionEvent;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Periodically refreshes a `QuoteCache` for a watched symbol set.
///
/// The loop runs on its own task. At most one refresh is in flight at a time:
/// a tick that fires while the previous refresh is still running is skipped,
/// and the interval stays anchored to the start time so skipped ticks never
/// delay later ones. Failures are reported and the loop keeps its interval.
pub struct PollingScheduler {
    watch_set: watch::Sender<BTreeSet<String>>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PollingScheduler {
    /// Spawns the polling loop. The first tick fires immediately.
    pub fn start(
        cache: Arc<QuoteCache>,
        symbols: BTreeSet<String>,
        interval: Duration,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let (watch_set, watch_rx) = watch::channel(symbols);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(cache, watch_rx, shutdown_rx, interval, events));

        tracing::info!(interval = ?interval, "Polling scheduler started.");
        Self {
            watch_set,
            shutdown,
            handle,
        }
    }

    /// Replaces the watched symbols. Takes effect on the next tick; the timer
    /// is not restarted.
    pub fn update_watch_set(&self, symbols: BTreeSet<String>) {
        self.watch_set.send_replace(symbols);
    }

    pub fn watch_set(&self) -> BTreeSet<String> {
        self.watch_set.borrow().clone()
    }

    /// Stops the loop and cancels any in-flight refresh. No tick fires after
    /// this returns.
    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                tracing::error!(error = %e, "Polling loop panicked.");
            }
        }
        tracing::info!("Polling scheduler stopped.");
    }
}

async fn run(
    cache: Arc<QuoteCache>,
    watch_set: watch::Receiver<BTreeSet<String>>,
    mut shutdown: watch::Receiver<bool>,
    interval: Duration,
    events: broadcast::Sender<SessionEvent>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            biased;

            // Also resolves when the scheduler handle is dropped.
            _ = shutdown.changed() => break,

            _ = ticker.tick() => {
                if in_flight.as_ref().is_some_and(|refresh| !refresh.is_finished()) {
                    tracing::debug!("Previous refresh still running, skipping tick.");
                    let _ = events.send(SessionEvent::RefreshSkipped { at: Utc::now() });
                    continue;
                }

                let symbols = watch_set.borrow().clone();
                if symbols.is_empty() {
                    continue;
                }
                in_flight = Some(tokio::spawn(refresh_once(Arc::clone(&cache), symbols, events.clone())));
            }
        }
    }

    if let Some(refresh) = in_flight {
        refresh.abort();
        let _ = refresh.await;
    }
}

async fn refresh_once(cache: Arc<QuoteCache>, symbols: BTreeSet<String>, events: broadcast::Sender<SessionEvent>) {
    let event = match cache.refresh(&symbols).await {
        Ok(report) => SessionEvent::QuotesRefreshed {
            updated: report.updated,
            missing: report.missing,
            at: Utc::now(),
        },
        Err(e) => {
            tracing::warn!(symbols = ?symbols, error = %e, "Quote refresh failed.");
            SessionEvent::QuoteFetchFailed {
                symbols: symbols.into_iter().collect(),
                reason: e.to_string(),
                at: Utc::now(),
            }
        }
    };
    // No subscribers is not an error.
    let _ = events.send(event);
}
