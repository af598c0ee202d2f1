//! Health supervision and recovery of the player widget
//!
//! Every widget command runs under a timeout, retried with exponential backoff.
//! Exhausted retries and failed probes demote the widget; a periodic probe notices
//! unhealthy states and rebuilds the widget from scratch, at most once per cooldown
//! and never concurrently.

use afterglow_core::{EventBus, HealthStatus, PipelineEvent};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::health::WidgetHealth;
use super::player::{PlayerWidget, WidgetEvent, WidgetHost};
use super::retry::{with_retry, with_timeout, Backoff};
use crate::error::WidgetError;

/// Supervisor tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetConfig {
    /// Base URL of the remote player (HTTP backend)
    pub base_url: String,
    pub health_check_interval_ms: u64,
    pub operation_timeout_ms: u64,
    /// Attempts per retried operation
    pub max_retries: u32,
    pub max_consecutive_failures: u32,
    pub reinit_cooldown_ms: u64,
    /// Without a success for this long the widget counts as unhealthy
    pub stale_after_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Bound on waiting for the player to report readiness during bring-up
    pub readiness_timeout_ms: u64,
    pub max_recovery_attempts: u32,
    /// State polling interval of the HTTP backend
    pub poll_interval_ms: u64,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8790".to_string(),
            health_check_interval_ms: 5000,
            operation_timeout_ms: 3000,
            max_retries: 3,
            max_consecutive_failures: 3,
            reinit_cooldown_ms: 10_000,
            stale_after_ms: 30_000,
            backoff_base_ms: 250,
            backoff_cap_ms: 4000,
            readiness_timeout_ms: 10_000,
            max_recovery_attempts: 3,
            poll_interval_ms: 1000,
        }
    }
}

impl WidgetConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms.max(1))
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn reinit_cooldown(&self) -> Duration {
        Duration::from_millis(self.reinit_cooldown_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.backoff_base_ms),
            cap: Duration::from_millis(self.backoff_cap_ms),
        }
    }
}

const READINESS_POLL: Duration = Duration::from_millis(100);

struct Inner {
    config: WidgetConfig,
    host: Arc<dyn WidgetHost>,
    widget: tokio::sync::Mutex<Option<Box<dyn PlayerWidget>>>,
    health: Mutex<WidgetHealth>,
    is_recovering: AtomicBool,
    torn_down: AtomicBool,
    /// Automatic recovery gave up after `max_recovery_attempts`
    abandoned: AtomicBool,
    bus: EventBus,
    events_tx: mpsc::UnboundedSender<WidgetEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<WidgetEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Owns the player widget for one session
#[derive(Clone)]
pub struct WidgetSupervisor {
    inner: Arc<Inner>,
}

impl WidgetSupervisor {
    pub fn new(config: WidgetConfig, host: Arc<dyn WidgetHost>, bus: EventBus) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                config,
                host,
                widget: tokio::sync::Mutex::new(None),
                health: Mutex::new(WidgetHealth::default()),
                is_recovering: AtomicBool::new(false),
                torn_down: AtomicBool::new(false),
                abandoned: AtomicBool::new(false),
                bus,
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Run the initial bring-up and start the probe loop and event pump.
    ///
    /// Returns whether the widget came up. The probe loop keeps trying to recover
    /// a widget that did not.
    pub async fn start(&self) -> bool {
        let ok = match self.inner.bring_up().await {
            Ok(()) => {
                let changed = self.inner.health.lock().reinit_succeeded(Instant::now());
                self.inner.publish_status(changed);
                info!("Player widget ready");
                self.inner.start_playlist().await;
                true
            }
            Err(e) => {
                error!("Player widget bring-up failed: {}", e);
                let changed = self.inner.health.lock().reinit_failed();
                self.inner.publish_status(changed);
                false
            }
        };

        let mut tasks = self.inner.tasks.lock();
        if let Some(events) = self.inner.events_rx.lock().take() {
            tasks.push(tokio::spawn(run_event_pump(
                Arc::downgrade(&self.inner),
                events,
            )));
        }
        tasks.push(tokio::spawn(run_probe_loop(Arc::downgrade(&self.inner))));
        ok
    }

    /// Stop background tasks and release the widget. In-flight results are discarded.
    pub async fn shutdown(&self) {
        if self.inner.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        if let Some(mut widget) = self.inner.widget.lock().await.take() {
            widget.unbind_events();
        }
        info!("Player supervisor shut down");
    }

    /// Snapshot of the health record
    pub fn health(&self) -> WidgetHealth {
        self.inner.health.lock().clone()
    }

    pub fn status(&self) -> HealthStatus {
        self.inner.health.lock().status
    }

    pub fn is_recovering(&self) -> bool {
        self.inner.is_recovering.load(Ordering::SeqCst)
    }

    /// Widget bound, API loaded, not failed, recently successful, under the
    /// failure threshold and not recovering
    pub async fn is_healthy(&self) -> bool {
        self.inner.is_healthy().await
    }

    /// One attempt of `op` under the operation timeout
    pub async fn execute_with_timeout<T, F>(&self, label: &str, op: F) -> Option<T>
    where
        F: for<'w> FnMut(&'w mut dyn PlayerWidget) -> BoxFuture<'w, Result<T, WidgetError>>,
    {
        self.inner.execute_with_timeout(label, op).await
    }

    /// `op` with sequential retries and backoff; exhaustion demotes health
    pub async fn execute_with_retry<T, F>(&self, label: &str, op: F) -> Option<T>
    where
        F: for<'w> FnMut(&'w mut dyn PlayerWidget) -> BoxFuture<'w, Result<T, WidgetError>>,
    {
        self.inner.execute_with_retry(label, op).await
    }

    pub async fn play(&self) -> bool {
        self.guarded("play", |w| w.play()).await.is_some()
    }

    pub async fn pause(&self) -> bool {
        self.guarded("pause", |w| w.pause()).await.is_some()
    }

    pub async fn set_muted(&self, muted: bool) -> bool {
        self.guarded("set_muted", move |w| w.set_muted(muted))
            .await
            .is_some()
    }

    pub async fn seek(&self, position: Duration) -> bool {
        self.guarded("seek", move |w| w.seek(position))
            .await
            .is_some()
    }

    /// Jump to a random track of the playlist, returning its index
    pub async fn select_random_track(&self) -> Option<usize> {
        if !self.is_healthy().await {
            debug!("Player unhealthy, skipping select_random_track");
            return None;
        }
        self.inner.select_random_track().await
    }

    /// Force a reinitialization, ignoring the cooldown and the recovery limit
    pub async fn reinitialize(&self) -> bool {
        self.inner.abandoned.store(false, Ordering::SeqCst);
        self.inner.recover("manual request").await
    }

    async fn guarded<T, F>(&self, label: &str, op: F) -> Option<T>
    where
        F: for<'w> FnMut(&'w mut dyn PlayerWidget) -> BoxFuture<'w, Result<T, WidgetError>>,
    {
        if !self.is_healthy().await {
            debug!("Player unhealthy, skipping {}", label);
            return None;
        }
        self.inner.execute_with_retry(label, op).await
    }
}

impl Inner {
    async fn is_healthy(&self) -> bool {
        let bound = self.widget.lock().await.is_some();
        bound && self.healthy_without_widget()
    }

    fn healthy_without_widget(&self) -> bool {
        if !self.host.api_present() || self.is_recovering.load(Ordering::SeqCst) {
            return false;
        }
        let health = self.health.lock();
        health.status != HealthStatus::Failed
            && health.consecutive_failures < self.config.max_consecutive_failures
            && !health.is_stale(Instant::now(), self.config.stale_after())
    }

    fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    fn publish_status(&self, changed: Option<HealthStatus>) {
        if let Some(status) = changed {
            info!("Player health is now {}", status);
            self.bus.publish(PipelineEvent::WidgetHealthChanged(status));
        }
    }

    fn record_success(&self) {
        let changed = self.health.lock().record_success(Instant::now());
        self.publish_status(changed);
    }

    fn record_failure(&self, what: &str) {
        let (changed, failures) = {
            let mut health = self.health.lock();
            let changed = health.record_failure(self.config.max_consecutive_failures);
            (changed, health.consecutive_failures)
        };
        warn!("Player {} failed ({} in a row)", what, failures);
        self.publish_status(changed);
    }

    async fn execute_with_timeout<T, F>(&self, label: &str, mut op: F) -> Option<T>
    where
        F: for<'w> FnMut(&'w mut dyn PlayerWidget) -> BoxFuture<'w, Result<T, WidgetError>>,
    {
        if self.is_torn_down() {
            return None;
        }
        let result = {
            let mut guard = self.widget.lock().await;
            let widget = guard.as_mut()?;
            with_timeout(self.config.operation_timeout(), op(widget.as_mut())).await
        };
        if self.is_torn_down() {
            debug!("Discarding '{}' result after shutdown", label);
            return None;
        }

        match result {
            Some(Ok(value)) => {
                self.record_success();
                Some(value)
            }
            Some(Err(e)) => {
                debug!("Player '{}' failed: {}", label, e);
                None
            }
            None => {
                debug!("Player '{}' timed out", label);
                None
            }
        }
    }

    async fn execute_with_retry<T, F>(&self, label: &str, mut op: F) -> Option<T>
    where
        F: for<'w> FnMut(&'w mut dyn PlayerWidget) -> BoxFuture<'w, Result<T, WidgetError>>,
    {
        if self.health.lock().status == HealthStatus::Failed {
            debug!("Player failed, '{}' waits for reinitialization", label);
            return None;
        }

        let attempts = self.config.max_retries.max(1);
        let backoff = self.config.backoff();
        for attempt in 0..attempts {
            if let Some(value) = self.execute_with_timeout(label, &mut op).await {
                return Some(value);
            }
            if self.is_torn_down() {
                return None;
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(backoff.delay(attempt)).await;
            }
        }

        let (changed, failures) = {
            let mut health = self.health.lock();
            let changed = health.record_exhaustion(self.config.max_consecutive_failures);
            (changed, health.consecutive_failures)
        };
        warn!(
            "Player '{}' failed after {} attempts ({} in a row)",
            label, attempts, failures
        );
        self.publish_status(changed);
        None
    }

    async fn select_random_track(&self) -> Option<usize> {
        let count = self
            .execute_with_retry("track_count", |w| w.track_count())
            .await?;
        if count == 0 {
            debug!("Playlist is empty");
            return None;
        }
        let index = rand::rng().random_range(0..count);
        self.execute_with_retry("skip_to", move |w| w.skip_to(index))
            .await?;
        info!("Selected track {} of {}", index + 1, count);
        Some(index)
    }

    /// A playlist problem does not undo a successful bring-up
    async fn start_playlist(&self) {
        if self.select_random_track().await.is_none() {
            warn!("Could not select a random track after bring-up");
        }
    }

    /// Load API, wait for readiness, bind a fresh widget with events
    async fn bring_up(&self) -> Result<(), WidgetError> {
        let timeout = self.config.operation_timeout();
        let host = Arc::clone(&self.host);

        let loaded = with_retry(
            "load_api",
            self.config.max_retries,
            self.config.backoff(),
            |_| {
                let host = Arc::clone(&host);
                async move {
                    match with_timeout(timeout, host.load_api()).await {
                        Some(Ok(())) => Some(()),
                        Some(Err(e)) => {
                            debug!("Player API load failed: {}", e);
                            None
                        }
                        None => None,
                    }
                }
            },
        )
        .await;
        if loaded.is_none() || !self.host.api_present() {
            return Err(WidgetError::ApiUnavailable(
                "player API did not load".to_string(),
            ));
        }

        let limit = self.config.readiness_timeout();
        let deadline = Instant::now() + limit;
        loop {
            if with_timeout(timeout, self.host.is_ready()).await == Some(true) {
                break;
            }
            if Instant::now() >= deadline {
                return Err(WidgetError::NotReady(limit));
            }
            tokio::time::sleep(READINESS_POLL).await;
        }

        let mut widget = with_timeout(timeout, self.host.bind())
            .await
            .ok_or_else(|| WidgetError::Timeout("bind".to_string()))??;
        widget.bind_events(self.events_tx.clone());
        *self.widget.lock().await = Some(widget);

        if self.is_torn_down() {
            return Err(WidgetError::NotBound);
        }
        Ok(())
    }

    /// Tear down and rebuild the widget. No-op while another recovery runs.
    async fn recover(&self, reason: &str) -> bool {
        if self
            .is_recovering
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Recovery already running");
            return false;
        }
        warn!("Reinitializing player widget: {}", reason);

        if let Some(mut widget) = self.widget.lock().await.take() {
            widget.unbind_events();
        }
        self.health.lock().begin_reinit(Instant::now());
        self.bus.publish(PipelineEvent::WidgetReinitializeRequested);

        let result = self.bring_up().await;
        if self.is_torn_down() {
            self.is_recovering.store(false, Ordering::SeqCst);
            return false;
        }

        let ok = match result {
            Ok(()) => {
                let changed = self.health.lock().reinit_succeeded(Instant::now());
                self.publish_status(changed);
                info!("Player widget reinitialized");
                self.start_playlist().await;
                true
            }
            Err(e) => {
                let (changed, attempts) = {
                    let mut health = self.health.lock();
                    let changed = health.reinit_failed();
                    (changed, health.recovery_attempts)
                };
                error!("Player reinitialization {} failed: {}", attempts, e);
                self.publish_status(changed);
                if attempts >= self.config.max_recovery_attempts {
                    self.abandoned.store(true, Ordering::SeqCst);
                    let reason =
                        format!("{} reinitializations failed, last error: {}", attempts, e);
                    error!("Giving up on player widget: {}", reason);
                    self.bus.publish(PipelineEvent::WidgetFailed { reason });
                }
                false
            }
        };
        self.is_recovering.store(false, Ordering::SeqCst);
        ok
    }

    async fn probe(&self) {
        let bound = self.widget.lock().await.is_some();
        if bound
            && self
                .execute_with_timeout("probe", |w| w.position())
                .await
                .is_none()
            && !self.is_torn_down()
        {
            self.record_failure("health probe");
        }

        let healthy = bound && self.healthy_without_widget();
        if healthy || self.abandoned.load(Ordering::SeqCst) {
            return;
        }
        let cooldown_elapsed = self
            .health
            .lock()
            .cooldown_elapsed(Instant::now(), self.config.reinit_cooldown());
        if cooldown_elapsed {
            self.recover("health check failed").await;
        }
    }

    async fn handle_event(&self, event: WidgetEvent) {
        match event {
            WidgetEvent::Ready => debug!("Player widget reports ready"),
            WidgetEvent::Play => debug!("Player started"),
            WidgetEvent::Pause => debug!("Player paused"),
            WidgetEvent::Finish => {
                if self.is_healthy().await {
                    info!("Track finished, picking another");
                    self.select_random_track().await;
                }
            }
            WidgetEvent::Error(message) => {
                warn!("Player error: {}", message);
                self.record_failure("widget");
            }
            WidgetEvent::NetworkError(message) => {
                warn!("Player network error: {}", message);
                self.bus
                    .publish(PipelineEvent::WidgetNetworkError { message });
            }
        }
    }
}

async fn run_probe_loop(weak: Weak<Inner>) {
    let period = match weak.upgrade() {
        Some(inner) => inner.config.health_check_interval(),
        None => return,
    };
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let Some(inner) = weak.upgrade() else {
            break;
        };
        if inner.is_torn_down() {
            break;
        }
        if inner.is_recovering.load(Ordering::SeqCst) {
            continue;
        }
        inner.probe().await;
    }
}

async fn run_event_pump(weak: Weak<Inner>, mut events: mpsc::UnboundedReceiver<WidgetEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        if inner.is_torn_down() {
            break;
        }
        inner.handle_event(event).await;
    }
}
