//! Half-hour aligned poll scheduler.
//!
//! On start the scheduler either fetches right away (the current half-hour
//! boundary has not been served) or publishes cached data and sleeps until the
//! next boundary. After the first aligned fetch it polls every `poll_interval`.
//! An independent `refresh_interval` timer fetches regardless of alignment,
//! and selecting a new window fetches immediately, abandoning any in-flight
//! fetch for the old window.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::marks::{decide_startup, most_recent_half_hour_mark, Clock, StartupDecision, SystemClock};
use crate::aggregator::{build_snapshot, DashboardSnapshot};
use crate::metrics::{record_record_count, FetchTimer};
use crate::record::EventRecord;
use crate::store::{DashboardCache, KeyValueStore};
use crate::webhook::RecordSource;
use crate::window::Window;
use crate::{Error, Result};

/// Lifecycle of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PollState {
    Idle,
    AwaitingFetch,
    Fetched,
    WaitingForBoundary,
    Stopped,
}

/// What caused a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Boundary,
    Recurring,
    Refresh,
    WindowChange,
    Manual,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Startup => "startup",
            Trigger::Boundary => "boundary",
            Trigger::Recurring => "recurring",
            Trigger::Refresh => "refresh",
            Trigger::WindowChange => "window_change",
            Trigger::Manual => "manual",
        }
    }

    /// Fetches that belong to the half-hour schedule.
    fn is_aligned(self) -> bool {
        matches!(self, Trigger::Startup | Trigger::Boundary | Trigger::Recurring)
    }
}

/// Bounded exponential backoff for transient failures within one cycle.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub window: Window,
    pub poll_interval: Duration,
    /// `None` disables the unaligned refresh timer.
    pub refresh_interval: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            window: Window::default(),
            poll_interval: Duration::from_secs(30 * 60),
            refresh_interval: Some(Duration::from_secs(5 * 60)),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct Poller {
    source: Arc<dyn RecordSource>,
    cache: DashboardCache<Arc<dyn KeyValueStore>>,
    clock: Arc<dyn Clock>,
    config: PollerConfig,
    state: Mutex<PollState>,
    latch: tokio::sync::Mutex<()>,
    /// Cancels the fetch currently holding the latch.
    inflight: Mutex<Option<CancellationToken>>,
    window: watch::Sender<Window>,
    snapshots: watch::Sender<Option<DashboardSnapshot>>,
}

impl Poller {
    pub fn new(
        source: Arc<dyn RecordSource>,
        store: Arc<dyn KeyValueStore>,
        config: PollerConfig,
    ) -> Self {
        let (window, _) = watch::channel(config.window);
        let (snapshots, _) = watch::channel(None);
        Self {
            source,
            cache: DashboardCache::new(store),
            clock: Arc::new(SystemClock),
            config,
            state: Mutex::new(PollState::Idle),
            latch: tokio::sync::Mutex::new(()),
            inflight: Mutex::new(None),
            window,
            snapshots,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cache(&self) -> &DashboardCache<Arc<dyn KeyValueStore>> {
        &self.cache
    }

    pub fn state(&self) -> PollState {
        self.state.lock().map(|s| *s).unwrap_or(PollState::Stopped)
    }

    fn set_state(&self, next: PollState) {
        if let Ok(mut state) = self.state.lock() {
            if *state != next {
                debug!(from = ?*state, to = ?next, "Poller state change");
                *state = next;
            }
        }
    }

    pub fn window(&self) -> Window {
        *self.window.borrow()
    }

    /// Switch windows. Any fetch in flight, scheduled or manual, is
    /// abandoned in favour of the new window.
    pub fn select_window(&self, window: Window) {
        info!(window = %window, "Window selected");
        self.window.send_replace(window);
        self.cancel_inflight();
    }

    fn cancel_inflight(&self) {
        if let Ok(inflight) = self.inflight.lock() {
            if let Some(token) = inflight.as_ref() {
                debug!("Cancelling in-flight fetch");
                token.cancel();
            }
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<DashboardSnapshot>> {
        self.snapshots.subscribe()
    }

    /// Snapshot of the cached records for `window`, if any are stored.
    pub fn cached_snapshot(&self, window: Window) -> Result<Option<DashboardSnapshot>> {
        let records = self.cache.load_records()?;
        Ok(records.map(|r| build_snapshot(&r, window, self.clock.now(), true)))
    }

    fn publish_cached(&self, window: Window) {
        match self.cached_snapshot(window) {
            Ok(Some(snapshot)) => {
                info!(
                    records = snapshot.metrics.total_messages,
                    "Showing cached dashboard data"
                );
                self.snapshots.send_replace(Some(snapshot));
            }
            Ok(None) => debug!("No cached dashboard data"),
            Err(e) => warn!(error = %e, "Failed to read cached dashboard data"),
        }
    }

    async fn fetch_with_retry(&self, window: Window) -> Result<Vec<EventRecord>> {
        let retry = self.config.retry;
        let mut attempt = 0;
        loop {
            match self.source.fetch(window, self.clock.now()).await {
                Ok(records) => return Ok(records),
                Err(e) if e.is_transient() && attempt < retry.max_retries => {
                    let delay = retry.delay_for(attempt);
                    attempt += 1;
                    warn!(
                        error = %e,
                        attempt,
                        max = retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Fetch failed, retrying"
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch, persist and publish one snapshot.
    ///
    /// Fails with `Error::FetchInProgress` when another fetch holds the latch
    /// and with `Error::Cancelled` when a window selection supersedes it.
    /// Persisted state is only touched on success.
    pub async fn fetch_cycle(&self, window: Window, trigger: Trigger) -> Result<DashboardSnapshot> {
        let _latch = self.latch.try_lock().map_err(|_| {
            warn!(trigger = trigger.as_str(), "Skipping fetch, another is in progress");
            Error::FetchInProgress
        })?;

        let token = CancellationToken::new();
        if let Ok(mut inflight) = self.inflight.lock() {
            *inflight = Some(token.clone());
        }
        let mut cycle = CycleGuard {
            poller: self,
            previous: self.state(),
            published: false,
        };
        self.set_state(PollState::AwaitingFetch);
        let timer = FetchTimer::start(trigger.as_str());

        let fetched = tokio::select! {
            _ = token.cancelled() => Err(Error::Cancelled),
            result = self.fetch_with_retry(window) => result,
        };
        let records = match fetched {
            Ok(records) => records,
            Err(Error::Cancelled) => {
                info!(trigger = trigger.as_str(), window = %window, "Fetch superseded");
                return Err(Error::Cancelled);
            }
            Err(e) => {
                timer.finish(false);
                match &e {
                    Error::EndpointNotConfigured(_) => {
                        error!("No valid webhook URL configured, skipping fetch")
                    }
                    _ => error!(error = %e, trigger = trigger.as_str(), "Error fetching data"),
                }
                return Err(e);
            }
        };

        let completed = self.clock.now();
        let mark = most_recent_half_hour_mark(&completed);
        if let Err(e) = self.cache.store_snapshot(&records, mark) {
            timer.finish(false);
            error!(error = %e, "Failed to persist dashboard data");
            return Err(e);
        }
        timer.finish(true);
        record_record_count(records.len());

        let snapshot = build_snapshot(&records, window, completed, false);
        info!(
            trigger = trigger.as_str(),
            window = %window,
            total_messages = snapshot.metrics.total_messages,
            appointments_booked = snapshot.metrics.appointments_booked,
            mark = %mark,
            "Dashboard updated"
        );
        self.snapshots.send_replace(Some(snapshot.clone()));
        cycle.published = true;
        self.set_state(PollState::Fetched);
        Ok(snapshot)
    }

    /// Run a fetch, restarting it whenever the window changes mid-flight.
    /// Returns `false` when the scheduler should stop.
    async fn run_cycle(
        &self,
        trigger: Trigger,
        window_rx: &mut watch::Receiver<Window>,
        cancel: &CancellationToken,
    ) -> bool {
        let mut current = trigger;
        loop {
            let window = *window_rx.borrow_and_update();
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return false,
                changed = window_rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                    info!(from = %window, "Window changed during fetch, restarting");
                    current = Trigger::WindowChange;
                    continue;
                }
                result = self.fetch_cycle(window, current) => result,
            };

            match outcome {
                // A superseded manual fetch may still hold the latch.
                Err(Error::FetchInProgress) if current == Trigger::WindowChange => {
                    tokio::select! {
                        _ = cancel.cancelled() => return false,
                        _ = self.latch.lock() => {}
                    }
                }
                _ => break,
            }
        }

        if trigger.is_aligned() {
            if let Err(e) = self.cache.set_last_fetch_time(self.clock.now()) {
                warn!(error = %e, "Failed to record last fetch time");
            }
        }
        true
    }

    fn recurring_interval(&self) -> Interval {
        let period = self.config.poll_interval;
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    async fn run(self: Arc<Self>, mut window_rx: watch::Receiver<Window>, cancel: CancellationToken) {
        let now = self.clock.now();
        let last_updated = self.cache.last_updated().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read last updated mark");
            None
        });

        let mut refresh = self.config.refresh_interval.map(|period| {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut recurring: Option<Interval> = None;
        let boundary = sleep(Duration::ZERO);
        tokio::pin!(boundary);
        let mut boundary_armed = false;

        match decide_startup(now, last_updated) {
            StartupDecision::FetchNow { mark } => {
                info!(mark = %mark, "Half-hour mark not yet served, fetching now");
                if !self.run_cycle(Trigger::Startup, &mut window_rx, &cancel).await {
                    self.set_state(PollState::Stopped);
                    return;
                }
                recurring = Some(self.recurring_interval());
            }
            StartupDecision::WaitForBoundary { next_mark, delay } => {
                self.publish_cached(*window_rx.borrow());
                self.set_state(PollState::WaitingForBoundary);
                info!(
                    next_mark = %next_mark,
                    wait_secs = delay.num_seconds(),
                    "Current half-hour already served, waiting for next mark"
                );
                let delay = delay.to_std().unwrap_or_default();
                boundary.as_mut().reset(Instant::now() + delay);
                boundary_armed = true;
            }
        }

        loop {
            let keep_going = tokio::select! {
                _ = cancel.cancelled() => false,
                _ = &mut boundary, if boundary_armed => {
                    boundary_armed = false;
                    let keep = self.run_cycle(Trigger::Boundary, &mut window_rx, &cancel).await;
                    recurring = Some(self.recurring_interval());
                    keep
                }
                _ = tick(&mut recurring) => {
                    self.run_cycle(Trigger::Recurring, &mut window_rx, &cancel).await
                }
                _ = tick(&mut refresh) => {
                    self.run_cycle(Trigger::Refresh, &mut window_rx, &cancel).await
                }
                changed = window_rx.changed() => match changed {
                    Ok(()) => self.run_cycle(Trigger::WindowChange, &mut window_rx, &cancel).await,
                    Err(_) => false,
                },
            };
            if !keep_going {
                break;
            }
        }

        self.set_state(PollState::Stopped);
        info!("Poller stopped");
    }

    /// Spawn the scheduler task.
    pub fn start(self: Arc<Self>) -> PollerHandle {
        let cancel = CancellationToken::new();
        // Subscribe before spawning so a window selected right away is not missed.
        let window_rx = self.window.subscribe();
        let task = tokio::spawn(Arc::clone(&self).run(window_rx, cancel.clone()));
        PollerHandle {
            poller: self,
            cancel,
            task,
        }
    }
}

/// Puts the poller back in its pre-fetch state unless the cycle published,
/// including when the cycle's future is dropped mid-flight.
struct CycleGuard<'a> {
    poller: &'a Poller,
    previous: PollState,
    published: bool,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut inflight) = self.poller.inflight.lock() {
            *inflight = None;
        }
        if !self.published {
            self.poller.set_state(self.previous);
        }
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Handle to a running scheduler.
pub struct PollerHandle {
    poller: Arc<Poller>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn poller(&self) -> &Arc<Poller> {
        &self.poller
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<DashboardSnapshot>> {
        self.poller.subscribe()
    }

    pub fn select_window(&self, window: Window) {
        self.poller.select_window(window);
    }

    pub fn state(&self) -> PollState {
        self.poller.state()
    }

    /// Fetch immediately with the current window, outside the schedule.
    pub async fn refresh_now(&self) -> Result<DashboardSnapshot> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = self.poller.fetch_cycle(self.poller.window(), Trigger::Manual) => result,
        }
    }

    /// Request cancellation without waiting for the task.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn last_fetch_time(&self) -> Option<DateTime<Utc>> {
        self.poller.cache.last_fetch_time().ok().flatten()
    }

    /// Cancel timers and any in-flight fetch, then wait for the task.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "Poller task failed");
        }
    }
}
