// src/poller.rs
// Periodic signal refresh while the bot is enabled. Armed on the enable
// transition, disarmed on disable or panel teardown; each armed timer is
// keyed by a generation token so a disarm always stops the exact task its
// enable started.

use crate::api::{AnalyzeRequest, ApiClient};
use crate::error::Error;
use crate::panel::{self, SharedState};
use log::{debug, info, warn};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(0);

/// Handle to one armed poller task
pub struct PollerHandle {
    generation: u64,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stop the task this handle armed and wait for it to wind down. After
    /// this returns no further tick can run from this generation.
    pub async fn disarm(self) {
        let _ = self.stop.send(true);
        if let Err(error) = self.task.await {
            if !error.is_cancelled() {
                warn!(
                    "Poller generation {} ended abnormally: {}",
                    self.generation, error
                );
            }
        }
        debug!("Signal poller generation {} disarmed", self.generation);
    }
}

/// Arm the poller: every `period` the watch target is re-analyzed against
/// the shared panel state.
pub fn arm(
    api: ApiClient,
    state: SharedState,
    target: AnalyzeRequest,
    period: Duration,
) -> PollerHandle {
    let generation = NEXT_GENERATION.fetch_add(1, Ordering::SeqCst) + 1;
    let (stop_tx, stop_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        info!(
            "Signal poller generation {} started, refreshing {} every {}s",
            generation,
            target.symbol,
            period.as_secs()
        );

        run_with(period, stop_rx, move || {
            let api = api.clone();
            let state = state.clone();
            let target = target.clone();
            async move {
                match panel::run_analysis(&api, &state, &target).await {
                    Ok(()) => debug!("Poller tick completed (generation {})", generation),
                    Err(Error::Busy) => {
                        // Another request is in flight; skip this tick
                        // rather than queueing behind it
                        debug!("Poller tick skipped, panel is busy");
                    }
                    // A failed tick never cancels future ticks
                    Err(error) => warn!("Poller tick failed: {}", error),
                }
            }
        })
        .await;

        info!("Signal poller generation {} stopped", generation);
    });

    PollerHandle {
        generation,
        stop: stop_tx,
        task,
    }
}

/// Core timer loop. The first tick fires one full period after arming, and
/// ticks are awaited inline so they can never overlap.
async fn run_with<F, Fut>(period: Duration, mut stop: watch::Receiver<bool>, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let first = tokio::time::Instant::now() + period;
    let mut timer = tokio::time::interval_at(first, period);

    loop {
        tokio::select! {
            changed = stop.changed() => {
                // A dropped sender counts as a stop as well
                if changed.is_err() || *stop.borrow_and_update() {
                    break;
                }
            }
            _ = timer.tick() => {
                tick().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use std::sync::Arc;
    use std::sync::Mutex;
    use tokio::time::timeout;

    fn counting_tick(
        counter: Arc<AtomicU64>,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>> {
        move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    #[tokio::test]
    async fn stop_before_the_first_period_runs_zero_ticks() {
        let count = Arc::new(AtomicU64::new(0));
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(run_with(
            Duration::from_millis(100),
            stop_rx,
            counting_tick(count.clone()),
        ));

        stop_tx.send(true).unwrap();
        task.await.unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ticks_keep_firing_until_stopped() {
        let count = Arc::new(AtomicU64::new(0));
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(run_with(
            Duration::from_millis(50),
            stop_rx,
            counting_tick(count.clone()),
        ));

        tokio::time::sleep(Duration::from_millis(230)).await;
        stop_tx.send(true).unwrap();
        task.await.unwrap();

        let ticks = count.load(Ordering::SeqCst);
        assert!(ticks >= 2, "expected at least 2 ticks, got {}", ticks);

        // No further ticks after the stop
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(count.load(Ordering::SeqCst), ticks);
    }

    #[tokio::test]
    async fn disarm_returns_promptly_even_with_a_long_period() {
        let config = ClientConfig::new("http://127.0.0.1:9", "test-key")
            .unwrap()
            .with_timeout(Duration::from_millis(200));
        let api = ApiClient::new(config);
        let state: SharedState = Arc::new(Mutex::new(Default::default()));

        let handle = arm(
            api,
            state,
            AnalyzeRequest::new("EUR/USD", "1min"),
            Duration::from_secs(300),
        );

        timeout(Duration::from_secs(1), handle.disarm())
            .await
            .expect("disarm should not wait for the next tick");
    }

    #[tokio::test]
    async fn failing_ticks_do_not_stop_the_loop() {
        // Nothing listens on the discard port, so every tick fails
        let config = ClientConfig::new("http://127.0.0.1:9", "test-key")
            .unwrap()
            .with_timeout(Duration::from_millis(100));
        let api = ApiClient::new(config);
        let state: SharedState = Arc::new(Mutex::new(Default::default()));

        let handle = arm(
            api,
            state.clone(),
            AnalyzeRequest::new("EUR/USD", "1min"),
            Duration::from_millis(100),
        );

        tokio::time::sleep(Duration::from_millis(450)).await;

        timeout(Duration::from_secs(1), handle.disarm())
            .await
            .expect("poller should still be responsive after failures");

        let panel_state = state.lock().unwrap();
        // The machine returned to idle after every failed tick
        assert!(!panel_state.is_loading());
        assert!(panel_state.result().is_error);
        assert!(panel_state.last_signal().is_none());
    }

    #[tokio::test]
    async fn generations_are_unique_per_arm() {
        let config = ClientConfig::new("http://127.0.0.1:9", "test-key").unwrap();
        let api = ApiClient::new(config);
        let state: SharedState = Arc::new(Mutex::new(Default::default()));

        let first = arm(
            api.clone(),
            state.clone(),
            AnalyzeRequest::new("EUR/USD", "1min"),
            Duration::from_secs(300),
        );
        let second = arm(
            api,
            state,
            AnalyzeRequest::new("EUR/USD", "1min"),
            Duration::from_secs(300),
        );

        assert_ne!(first.generation(), second.generation());
        first.disarm().await;
        second.disarm().await;
    }
}
