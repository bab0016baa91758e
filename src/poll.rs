//! Periodic poll scheduling with per-kind single-flight.
//!
//! One [`PollScheduler`] per kind (registers, coils). The scheduler owns the
//! repeating timer and the single-flight guard; the actual read lives behind
//! the [`PollTask`] trait so the engine stays in charge of what a tick does.
//! Ticks that fire while the previous read of the same kind is still
//! outstanding are dropped, never queued.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Poll cadences are clamped to this floor.
pub const MIN_POLL_INTERVAL_SECS: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollKind {
    Registers,
    Coils,
}

impl PollKind {
    pub fn label(self) -> &'static str {
        match self {
            PollKind::Registers => "register",
            PollKind::Coils => "coil",
        }
    }
}

/// What a scheduled tick executes.
#[async_trait]
pub trait PollTask: Send + Sync + 'static {
    /// Whether the owning session still allows polling.
    async fn is_ready(&self) -> bool;

    /// Perform one read. Failures are the task's to report; the scheduler
    /// never retries and keeps ticking.
    async fn poll(&self);

    /// Called exactly once when the scheduler shuts itself down because the
    /// session is no longer ready.
    async fn on_auto_disabled(&self);
}

/// Repeating timer for one poll kind.
pub struct PollScheduler {
    kind: PollKind,
    interval_ms: AtomicU64,
    enabled: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PollScheduler {
    pub fn new(kind: PollKind) -> Self {
        Self {
            kind,
            interval_ms: AtomicU64::new(MIN_POLL_INTERVAL_SECS * 1000),
            enabled: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> PollKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::SeqCst))
    }

    /// Arm the repeating timer, cancelling any previous one first. The first
    /// tick fires immediately.
    pub async fn start(&self, period: Duration, task: Arc<dyn PollTask>) {
        self.arm(period, task, true).await;
    }

    async fn arm(&self, period: Duration, task: Arc<dyn PollTask>, immediate: bool) {
        self.stop().await;

        let period = period.max(Duration::from_secs(MIN_POLL_INTERVAL_SECS));
        self.interval_ms.store(period.as_millis() as u64, Ordering::SeqCst);
        self.enabled.store(true, Ordering::SeqCst);

        let kind = self.kind;
        let enabled = Arc::clone(&self.enabled);
        let in_flight = Arc::clone(&self.in_flight);

        let handle = tokio::spawn(async move {
            let first_tick = if immediate {
                Instant::now()
            } else {
                Instant::now() + period
            };
            let mut ticker = interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                if !enabled.load(Ordering::SeqCst) {
                    break;
                }

                if !task.is_ready().await {
                    enabled.store(false, Ordering::SeqCst);
                    warn!("{} auto read stopped: session no longer connected", kind.label());
                    task.on_auto_disabled().await;
                    break;
                }

                // Single-flight: drop this tick if the previous read of this
                // kind is still outstanding.
                if in_flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    debug!("{} poll tick dropped: previous read still in flight", kind.label());
                    continue;
                }

                let task = Arc::clone(&task);
                let in_flight = Arc::clone(&in_flight);
                tokio::spawn(async move {
                    task.poll().await;
                    in_flight.store(false, Ordering::SeqCst);
                });
            }
        });

        *self.handle.lock().await = Some(handle);
        info!("{} poll started at {:?}", self.kind.label(), period);
    }

    /// Cancel the timer. Idempotent and safe when never started; a read in
    /// flight is left to complete on its own.
    pub async fn stop(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
            info!("{} poll stopped", self.kind.label());
        }
    }

    /// Clamp `secs` to the floor and, if currently running, restart with the
    /// new cadence. The restarted timer waits a full period before its first
    /// tick, so a cadence change never duplicates a tick; at most the one
    /// read already in flight completes across the boundary.
    pub async fn set_interval(&self, secs: u64, task: Arc<dyn PollTask>) {
        let secs = secs.max(MIN_POLL_INTERVAL_SECS);
        self.interval_ms.store(secs * 1000, Ordering::SeqCst);
        if self.is_enabled() {
            self.arm(Duration::from_secs(secs), task, false).await;
        }
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        // Mutex::new is sync-accessible here; abort any leftover timer task.
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingTask {
        polls: AtomicUsize,
        disabled: AtomicUsize,
        ready: AtomicBool,
        poll_delay: Duration,
    }

    impl CountingTask {
        fn new(poll_delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                polls: AtomicUsize::new(0),
                disabled: AtomicUsize::new(0),
                ready: AtomicBool::new(true),
                poll_delay,
            })
        }
    }

    #[async_trait]
    impl PollTask for CountingTask {
        async fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        async fn poll(&self) {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if !self.poll_delay.is_zero() {
                tokio::time::sleep(self.poll_delay).await;
            }
        }

        async fn on_auto_disabled(&self) {
            self.disabled.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_on_the_configured_cadence() {
        let scheduler = PollScheduler::new(PollKind::Registers);
        let task = CountingTask::new(Duration::ZERO);

        scheduler.start(Duration::from_secs(2), task.clone()).await;
        tokio::time::sleep(Duration::from_millis(4500)).await;
        scheduler.stop().await;

        // Immediate tick plus the ticks at 2s and 4s.
        assert_eq!(task.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_ticks_are_dropped_not_queued() {
        let scheduler = PollScheduler::new(PollKind::Coils);
        // Each read outlives one tick period.
        let task = CountingTask::new(Duration::from_secs(3));

        scheduler.start(Duration::from_secs(2), task.clone()).await;
        tokio::time::sleep(Duration::from_millis(4500)).await;
        scheduler.stop().await;

        // Tick at 0s starts a read that is still in flight at the 2s tick,
        // so that tick is dropped; the 4s tick starts the second read.
        assert_eq!(task.polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_itself_when_the_task_is_not_ready() {
        let scheduler = PollScheduler::new(PollKind::Registers);
        let task = CountingTask::new(Duration::ZERO);
        task.ready.store(false, Ordering::SeqCst);

        scheduler.start(Duration::from_secs(1), task.clone()).await;
        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert_eq!(task.polls.load(Ordering::SeqCst), 0);
        assert_eq!(task.disabled.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_enabled());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_safe_when_never_started() {
        let scheduler = PollScheduler::new(PollKind::Coils);
        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn set_interval_clamps_and_restarts() {
        let scheduler = PollScheduler::new(PollKind::Registers);
        let task = CountingTask::new(Duration::ZERO);

        scheduler.set_interval(0, task.clone()).await;
        assert_eq!(scheduler.interval(), Duration::from_secs(1));
        // Not running, so the clamp alone must not arm a timer.
        assert!(!scheduler.is_enabled());

        scheduler.start(Duration::from_secs(5), task.clone()).await;
        scheduler.set_interval(1, task.clone()).await;
        assert!(scheduler.is_enabled());
        assert_eq!(scheduler.interval(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.stop().await;
        // The initial immediate tick of the first start plus the restarted
        // cadence's ticks at 1s and 2s.
        assert_eq!(task.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_change_does_not_fire_an_extra_tick() {
        let scheduler = PollScheduler::new(PollKind::Registers);
        let task = CountingTask::new(Duration::ZERO);

        scheduler.start(Duration::from_secs(2), task.clone()).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(task.polls.load(Ordering::SeqCst), 1);

        // Changing the cadence mid-flight must wait a full new period
        // before the next tick, not fire one at the restart boundary.
        scheduler.set_interval(3, task.clone()).await;
        tokio::time::sleep(Duration::from_millis(2800)).await;
        assert_eq!(task.polls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.stop().await;
        assert_eq!(task.polls.load(Ordering::SeqCst), 2);
    }
}
