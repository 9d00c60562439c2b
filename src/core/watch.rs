use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::error::MonitorError;
use crate::core::history::HistoryStore;
use crate::core::models::records::AlertType;
use crate::core::models::snapshot::StatusSnapshot;

/// Consecutive failures after which the loop gives up and stops itself.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// One status check, boxed so the controller does not care where the
/// snapshot comes from.
pub type StatusCheck = Box<
    dyn Fn() -> Pin<Box<dyn Future<Output = Result<StatusSnapshot, MonitorError>> + Send>>
        + Send
        + Sync,
>;

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub interval: Duration,
    pub warn_threshold: u8,
    pub alert_threshold: u8,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            warn_threshold: 80,
            alert_threshold: 95,
        }
    }
}

/// Callbacks fired by the loop. All default to no-ops.
pub struct WatchEvents {
    pub on_status: Box<dyn Fn(&StatusSnapshot) + Send + Sync>,
    pub on_warning: Box<dyn Fn(&StatusSnapshot, u8) + Send + Sync>,
    pub on_alert: Box<dyn Fn(&StatusSnapshot, u8) + Send + Sync>,
    /// A single failed cycle, with the running consecutive-error count
    pub on_error: Box<dyn Fn(&MonitorError, u32) + Send + Sync>,
    /// The consecutive-error ceiling was hit; the loop has stopped
    pub on_fatal: Box<dyn Fn(u32) + Send + Sync>,
}

impl Default for WatchEvents {
    fn default() -> Self {
        Self {
            on_status: Box::new(|_| {}),
            on_warning: Box::new(|_, _| {}),
            on_alert: Box::new(|_, _| {}),
            on_error: Box::new(|_, _| {}),
            on_fatal: Box::new(|_| {}),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Running,
    /// Terminal; a stopped controller is never restarted
    Stopped,
}

/// Timer-driven polling loop with threshold alerting.
///
/// Checks are strictly sequential: the next one is only scheduled after the
/// previous fully completes, so history and alert records always land in
/// chronological order.
pub struct WatchController {
    cancel: CancellationToken,
    state: Arc<Mutex<WatchState>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

fn set_state(state: &Arc<Mutex<WatchState>>, value: WatchState) {
    let mut guard = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = value;
}

impl WatchController {
    /// Spawn the loop. The first check runs immediately; history recording
    /// happens when a store and the raw key are supplied.
    pub fn start(
        config: WatchConfig,
        check: StatusCheck,
        history: Option<(Arc<HistoryStore>, String)>,
        events: WatchEvents,
    ) -> Self {
        let cancel = CancellationToken::new();
        let state = Arc::new(Mutex::new(WatchState::Idle));
        set_state(&state, WatchState::Running);

        let task_cancel = cancel.clone();
        let task_state = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            run_loop(config, check, history, events, task_cancel.clone()).await;
            set_state(&task_state, WatchState::Stopped);
            // The token doubles as the done signal for self-stops
            task_cancel.cancel();
        });

        Self {
            cancel,
            state,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn state(&self) -> WatchState {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.state() == WatchState::Running
    }

    /// Cancel the pending check. Idempotent; a check already in flight
    /// completes but its result is not acted upon.
    pub fn stop(&self) {
        self.cancel.cancel();
        set_state(&self.state, WatchState::Stopped);
    }

    /// Resolves once the loop is over, whether stopped or self-stopped.
    pub async fn done(&self) {
        self.cancel.cancelled().await;
    }

    /// Wait for the loop task to wind down.
    pub async fn join(&self) {
        let handle = {
            let mut guard = self
                .handle
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.take()
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Watch task ended abnormally");
            }
        }
    }
}

async fn run_loop(
    config: WatchConfig,
    check: StatusCheck,
    history: Option<(Arc<HistoryStore>, String)>,
    events: WatchEvents,
    cancel: CancellationToken,
) {
    let mut consecutive_errors = 0u32;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let result = check().await;

        // Stopped while the check was in flight: drop the result unacted.
        if cancel.is_cancelled() {
            break;
        }

        let delay = match result {
            Ok(snapshot) => {
                consecutive_errors = 0;
                (events.on_status)(&snapshot);

                if let Some((store, api_key)) = &history {
                    store.record(&snapshot, api_key);
                }

                let usage = snapshot.health.percentage;
                if usage >= config.alert_threshold {
                    (events.on_alert)(&snapshot, usage);
                    if let Some((store, api_key)) = &history {
                        store.record_alert(
                            api_key,
                            AlertType::Alert,
                            &format!("Usage reached alert level ({}%)", usage),
                            config.alert_threshold,
                            usage,
                        );
                    }
                } else if usage >= config.warn_threshold {
                    (events.on_warning)(&snapshot, usage);
                    if let Some((store, api_key)) = &history {
                        store.record_alert(
                            api_key,
                            AlertType::Warning,
                            &format!("Usage reached warning level ({}%)", usage),
                            config.warn_threshold,
                            usage,
                        );
                    }
                }

                config.interval
            }
            Err(e) => {
                consecutive_errors += 1;
                (events.on_error)(&e, consecutive_errors);
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    warn!(
                        errors = consecutive_errors,
                        "Consecutive error ceiling reached; stopping watch"
                    );
                    (events.on_fatal)(consecutive_errors);
                    break;
                }
                let backoff = (config.interval * 2).min(MAX_BACKOFF);
                debug!(errors = consecutive_errors, backoff_secs = backoff.as_secs(), "Backing off after failed check");
                backoff
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
