//! Top-level break scheduler.
//!
//! ## Flow
//!
//! 1. `restart()` starts the work watch.
//! 2. Every tick of the running watch is forwarded to the event sink as
//!    [`Event::TickChanged`] (tray tooltip or similar).
//! 3. When a watch finishes, an [`OverlayTimeController`] episode is shown
//!    on the UI context and takes over.
//! 4. The episode's reason picks the next watch: `Normal` restarts the work
//!    watch at its full duration, `Forced` starts the escape watch.
//!
//! ```text
//! WorkWaiting ──finished──▶ OverlayShowing ──normal──▶ WorkWaiting
//!                                │
//!                                └──forced──▶ EscapeWaiting ──finished──▶ OverlayShowing
//! ```
//!
//! Every watch start goes through `abort()` first, so at most one of the
//! two watches runs at any time.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::events::{Event, WatchKind};
use crate::overlay::{FinishReason, OverlayTimeController};
use crate::storage::Settings;
use crate::surface::OverlaySurface;
use crate::timer::{CountdownListener, CountdownTimer};
use crate::ui::UiContext;

/// Receives every scheduler [`Event`]. Called from timer workers and the
/// UI context, so it must return quickly.
pub type EventSink = Arc<dyn Fn(Event) + Send + Sync>;

/// Coarse scheduler state, derived from the watches and the overlay slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    WorkWaiting,
    EscapeWaiting,
    OverlayShowing,
}

/// Workstation session notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Lock,
    Unlock,
}

struct Scheduler {
    settings: Arc<Settings>,
    ui: UiContext,
    surface: Arc<dyn OverlaySurface>,
    work_watch: CountdownTimer,
    escape_watch: CountdownTimer,
    episode: Mutex<Option<OverlayTimeController>>,
    next_episode: AtomicU64,
    /// Bumped by every abort; a queued hand-off from an older cycle is dropped.
    cycle: AtomicU64,
    sink: EventSink,
    disposed: AtomicBool,
}

impl Scheduler {
    fn emit(&self, event: Event) {
        (self.sink)(event);
    }

    fn lock_episode(&self) -> MutexGuard<'_, Option<OverlayTimeController>> {
        self.episode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn watch(&self, kind: WatchKind) -> &CountdownTimer {
        match kind {
            WatchKind::Work => &self.work_watch,
            WatchKind::Escape => &self.escape_watch,
        }
    }

    fn abort(&self) {
        self.work_watch.cancel();
        self.escape_watch.cancel();
        {
            // Bumped under the slot lock so a hand-off either sees the new
            // cycle or has already claimed the slot.
            let _slot = self.lock_episode();
            self.cycle.fetch_add(1, Ordering::AcqRel);
        }
        info!("watches aborted");
        self.emit(Event::TickChanged {
            remaining_ms: 0,
            at: Utc::now(),
        });
        self.emit(Event::Aborted { at: Utc::now() });
    }

    fn start_watch(&self, kind: WatchKind) {
        if self.disposed.load(Ordering::Acquire) {
            debug!(watch = %kind, "start ignored after dispose");
            return;
        }
        let watch = self.watch(kind);
        watch.restart();
        info!(watch = %kind, duration_ms = watch.total().as_millis() as u64, "watch started");
        self.emit(Event::WatchStarted {
            watch: kind,
            duration_ms: watch.total().as_millis() as u64,
            at: Utc::now(),
        });
    }

    fn restart(&self) {
        self.abort();
        self.start_watch(WatchKind::Work);
    }

    fn can_show(&self) -> bool {
        self.lock_episode().is_none() && !self.surface.is_visible()
    }

    fn on_watch_finished(self: &Arc<Self>, kind: WatchKind) {
        info!(watch = %kind, "watch finished, handing over to overlay");
        let cycle = self.cycle.load(Ordering::Acquire);
        let weak = Arc::downgrade(self);
        let posted = self.ui.post(move || {
            if let Some(scheduler) = weak.upgrade() {
                scheduler.show_episode_or_report(cycle);
            }
        });
        if let Err(e) = posted {
            warn!(watch = %kind, "UI context rejected overlay: {e}");
            self.show_episode_or_report(cycle);
        }
    }

    fn show_episode_or_report(self: &Arc<Self>, cycle: u64) {
        if let Err(e) = self.begin_episode(Some(cycle)) {
            error!("overlay could not be shown, scheduler idle until restarted: {e}");
        }
    }

    /// Create and show an episode unless one is already active.
    ///
    /// A hand-off from a watch carries the cycle it finished in and is
    /// dropped if the scheduler was aborted since.
    fn begin_episode(self: &Arc<Self>, cycle: Option<u64>) -> Result<bool> {
        if self.disposed.load(Ordering::Acquire) {
            return Ok(false);
        }

        let episode = {
            let mut slot = self.lock_episode();
            if let Some(cycle) = cycle {
                if cycle != self.cycle.load(Ordering::Acquire) {
                    debug!(cycle, "stale overlay hand-off dropped");
                    return Ok(false);
                }
            }
            if let Some(active) = slot.as_ref() {
                debug!(episode = active.id(), "overlay already active");
                return Ok(false);
            }
            let id = self.next_episode.fetch_add(1, Ordering::Relaxed);
            let weak = Arc::downgrade(self);
            let episode = OverlayTimeController::new(
                id,
                Arc::clone(&self.settings),
                self.ui.clone(),
                Arc::clone(&self.surface),
                move |reason| {
                    if let Some(scheduler) = weak.upgrade() {
                        scheduler.on_episode_finished(id, reason);
                    }
                },
            )?;
            *slot = Some(episode.clone());
            episode
        };

        match episode.show_overlay() {
            Ok(()) => {
                self.emit(Event::OverlayShown {
                    episode: episode.id(),
                    at: Utc::now(),
                });
                Ok(true)
            }
            Err(e) => {
                self.clear_episode(episode.id());
                self.emit(Event::OverlayFailed {
                    episode: episode.id(),
                    message: e.to_string(),
                    at: Utc::now(),
                });
                Err(e)
            }
        }
    }

    fn clear_episode(&self, id: u64) -> Option<OverlayTimeController> {
        let mut slot = self.lock_episode();
        if slot.as_ref().map(OverlayTimeController::id) == Some(id) {
            slot.take()
        } else {
            None
        }
    }

    fn on_episode_finished(&self, id: u64, reason: FinishReason) {
        self.clear_episode(id);
        self.emit(Event::OverlayFinished {
            episode: id,
            reason,
            at: Utc::now(),
        });
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        match reason {
            FinishReason::Normal => self.restart(),
            FinishReason::Forced => {
                self.abort();
                self.start_watch(WatchKind::Escape);
            }
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.work_watch.dispose();
        self.escape_watch.dispose();
        let episode = self.lock_episode().take();
        if let Some(episode) = episode {
            episode.dispose();
        }
        info!("scheduler disposed");
    }
}

struct WatchListener {
    kind: WatchKind,
    scheduler: Arc<OnceLock<Weak<Scheduler>>>,
}

impl WatchListener {
    fn scheduler(&self) -> Option<Arc<Scheduler>> {
        self.scheduler.get().and_then(Weak::upgrade)
    }
}

impl CountdownListener for WatchListener {
    fn elapsed(&self, remaining: Duration) {
        if let Some(scheduler) = self.scheduler() {
            scheduler.emit(Event::TickChanged {
                remaining_ms: remaining.as_millis() as u64,
                at: Utc::now(),
            });
        }
    }

    fn finished(&self) {
        if let Some(scheduler) = self.scheduler() {
            scheduler.on_watch_finished(self.kind);
        }
    }
}

/// Owns the work and escape watches and alternates between them.
pub struct AppTimeController {
    inner: Arc<Scheduler>,
}

impl AppTimeController {
    /// Build an idle scheduler. Call [`restart`](Self::restart) to begin.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `settings` breaks the scheduler's
    /// invariants, or a timer error if a watch cannot be created.
    pub fn new(
        settings: Settings,
        ui: UiContext,
        surface: Arc<dyn OverlaySurface>,
        sink: impl Fn(Event) + Send + Sync + 'static,
    ) -> Result<Self> {
        settings.check_invariants()?;

        let link = Arc::new(OnceLock::new());
        let work_watch = CountdownTimer::new(
            "work",
            settings.interval,
            settings.tick,
            WatchListener {
                kind: WatchKind::Work,
                scheduler: Arc::clone(&link),
            },
        )?;
        let escape_watch = CountdownTimer::new(
            "escape",
            settings.escape_next,
            settings.tick,
            WatchListener {
                kind: WatchKind::Escape,
                scheduler: Arc::clone(&link),
            },
        )?;

        let inner = Arc::new(Scheduler {
            settings: Arc::new(settings),
            ui,
            surface,
            work_watch,
            escape_watch,
            episode: Mutex::new(None),
            next_episode: AtomicU64::new(1),
            cycle: AtomicU64::new(0),
            sink: Arc::new(sink),
            disposed: AtomicBool::new(false),
        });
        let _ = link.set(Arc::downgrade(&inner));
        Ok(Self { inner })
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Cancel both watches and start the work watch from its full duration.
    pub fn restart(&self) {
        info!("scheduler restart");
        self.inner.restart();
    }

    /// Cancel both watches and zero the tick display. Idempotent.
    pub fn abort(&self) {
        self.inner.abort();
    }

    /// True when no overlay is visible.
    pub fn can_show(&self) -> bool {
        self.inner.can_show()
    }

    /// Show a break right away, bypassing both watches.
    ///
    /// Returns `Ok(false)` without touching the watches when an overlay is
    /// already visible.
    ///
    /// # Errors
    ///
    /// Returns an error if the overlay cannot be shown. The watches stay
    /// cancelled; call [`restart`](Self::restart) to recover.
    pub fn show_now(&self) -> Result<bool> {
        if self.inner.disposed.load(Ordering::Acquire) || !self.can_show() {
            debug!("show now ignored");
            return Ok(false);
        }
        info!("show now");
        self.inner.abort();
        self.inner.begin_episode(None)
    }

    /// Force-cancel the visible overlay, as the keyboard gesture would.
    pub fn request_forced_cancel(&self) -> bool {
        let episode = self.inner.lock_episode().clone();
        match episode {
            Some(episode) => episode.signals().request_forced_cancel(),
            None => false,
        }
    }

    pub fn handle_session(&self, event: SessionEvent) {
        match event {
            SessionEvent::Lock => {
                info!("workstation locked, pausing");
                self.abort();
            }
            SessionEvent::Unlock => {
                info!("workstation unlocked, resuming");
                self.restart();
            }
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.inner.lock_episode().is_some() {
            SchedulerState::OverlayShowing
        } else if self.inner.work_watch.is_running() {
            SchedulerState::WorkWaiting
        } else if self.inner.escape_watch.is_running() {
            SchedulerState::EscapeWaiting
        } else {
            SchedulerState::Idle
        }
    }

    pub fn is_running(&self, watch: WatchKind) -> bool {
        self.inner.watch(watch).is_running()
    }

    /// Dispose both watches and any active episode. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// [`dispose`](Self::dispose) without blocking the async caller.
    pub async fn dispose_async(&self) {
        let inner = Arc::clone(&self.inner);
        if let Err(e) = tokio::task::spawn_blocking(move || inner.dispose()).await {
            error!("scheduler dispose failed: {e}");
        }
    }
}

impl Drop for AppTimeController {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl std::fmt::Debug for AppTimeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppTimeController")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::HeadlessSurface;
    use std::sync::mpsc::{self, Receiver};
    use std::thread;

    const WAIT: Duration = Duration::from_secs(5);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn fast_settings() -> Settings {
        Settings {
            interval: ms(600),
            escape_next: ms(400),
            rest: ms(200),
            fade_in: ms(30),
            fade_out: ms(30),
            color_change_lead: ms(50),
            tick: ms(100),
            ..Settings::default()
        }
    }

    struct Harness {
        controller: AppTimeController,
        surface: Arc<HeadlessSurface>,
        events: Receiver<Event>,
        ui: UiContext,
    }

    fn harness(settings: Settings) -> Harness {
        let ui = UiContext::spawn("scheduler-test-ui").unwrap();
        let surface = Arc::new(HeadlessSurface::new(ui.clone(), &settings));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let controller = AppTimeController::new(settings, ui.clone(), surface.clone(), move |e| {
            let _ = tx.lock().unwrap().send(e);
        })
        .unwrap();
        Harness {
            controller,
            surface,
            events: rx,
            ui,
        }
    }

    fn wait_for(events: &Receiver<Event>, mut pred: impl FnMut(&Event) -> bool) -> Event {
        loop {
            let event = events.recv_timeout(WAIT).expect("expected event never arrived");
            if pred(&event) {
                return event;
            }
        }
    }

    #[test]
    fn rejects_settings_that_break_invariants() {
        let ui = UiContext::spawn("scheduler-invalid-ui").unwrap();
        let settings = Settings {
            escape_next: ms(900),
            ..fast_settings()
        };
        let surface = Arc::new(HeadlessSurface::new(ui.clone(), &settings));
        let err = AppTimeController::new(settings, ui, surface, |_| {}).unwrap_err();
        assert!(matches!(err, crate::error::CoreError::Config(_)));
    }

    #[test]
    fn starts_idle_and_restart_runs_work_watch() {
        let h = harness(fast_settings());
        assert_eq!(h.controller.state(), SchedulerState::Idle);

        h.controller.restart();
        assert_eq!(h.controller.state(), SchedulerState::WorkWaiting);
        assert!(h.controller.is_running(WatchKind::Work));
        assert!(!h.controller.is_running(WatchKind::Escape));
        wait_for(&h.events, |e| {
            matches!(e, Event::WatchStarted { watch: WatchKind::Work, duration_ms: 600, .. })
        });
    }

    #[test]
    fn abort_zeroes_tick_and_stops_watches() {
        let h = harness(fast_settings());
        h.controller.restart();
        wait_for(&h.events, |e| matches!(e, Event::TickChanged { remaining_ms, .. } if *remaining_ms > 0));

        h.controller.abort();
        assert_eq!(h.controller.state(), SchedulerState::Idle);
        wait_for(&h.events, |e| matches!(e, Event::TickChanged { remaining_ms: 0, .. }));

        thread::sleep(ms(800));
        assert!(h.surface.calls().is_empty());
        assert!(h.controller.can_show());
    }

    #[test]
    fn session_lock_and_unlock_pause_and_resume() {
        let h = harness(fast_settings());
        h.controller.restart();
        h.controller.handle_session(SessionEvent::Lock);
        assert_eq!(h.controller.state(), SchedulerState::Idle);
        h.controller.handle_session(SessionEvent::Unlock);
        assert_eq!(h.controller.state(), SchedulerState::WorkWaiting);
    }

    #[test]
    fn show_now_is_noop_while_overlay_visible() {
        let settings = Settings {
            rest: ms(300),
            ..fast_settings()
        };
        let h = harness(settings);
        assert!(h.controller.show_now().unwrap());
        assert_eq!(h.controller.state(), SchedulerState::OverlayShowing);
        assert!(!h.controller.can_show());
        assert!(!h.controller.show_now().unwrap());

        wait_for(&h.events, |e| matches!(e, Event::OverlayFinished { .. }));
        wait_for(&h.events, |e| {
            matches!(e, Event::WatchStarted { watch: WatchKind::Work, .. })
        });
        assert_eq!(h.controller.state(), SchedulerState::WorkWaiting);
    }

    #[test]
    fn failed_show_leaves_watches_cancelled() {
        let h = harness(fast_settings());
        h.controller.restart();
        h.surface.refuse_next_show("no display");

        assert!(h.controller.show_now().is_err());
        wait_for(&h.events, |e| matches!(e, Event::OverlayFailed { .. }));
        assert_eq!(h.controller.state(), SchedulerState::Idle);
        assert!(h.controller.can_show());

        h.controller.restart();
        assert_eq!(h.controller.state(), SchedulerState::WorkWaiting);
    }

    #[test]
    fn abort_drops_queued_overlay_hand_off() {
        let h = harness(fast_settings());
        h.controller.restart();
        wait_for(&h.events, |e| matches!(e, Event::WatchStarted { .. }));

        // Keep the UI context busy so the hand-off queues behind this job.
        let (release, blocked) = mpsc::channel::<()>();
        h.ui.post(move || {
            let _ = blocked.recv_timeout(WAIT);
        })
        .unwrap();

        wait_for(&h.events, |e| matches!(e, Event::TickChanged { remaining_ms: 0, .. }));
        h.controller.abort();
        release.send(()).unwrap();

        thread::sleep(ms(300));
        let late: Vec<Event> = h.events.try_iter().collect();
        assert!(
            !late.iter().any(|e| matches!(e, Event::OverlayShown { .. })),
            "overlay shown after abort: {late:?}"
        );
        assert_eq!(h.controller.state(), SchedulerState::Idle);
        assert!(h.surface.calls().is_empty());
    }

    #[test]
    fn restart_drops_queued_overlay_hand_off() {
        let h = harness(fast_settings());
        h.controller.restart();
        wait_for(&h.events, |e| matches!(e, Event::WatchStarted { .. }));

        let (release, blocked) = mpsc::channel::<()>();
        h.ui.post(move || {
            let _ = blocked.recv_timeout(WAIT);
        })
        .unwrap();

        wait_for(&h.events, |e| matches!(e, Event::TickChanged { remaining_ms: 0, .. }));
        h.controller.restart();
        release.send(()).unwrap();

        thread::sleep(ms(200));
        assert_eq!(h.controller.state(), SchedulerState::WorkWaiting);
        assert!(h.surface.calls().is_empty());
    }

    #[test]
    fn dispose_is_idempotent() {
        let h = harness(fast_settings());
        h.controller.restart();
        h.controller.dispose();
        h.controller.dispose();
        assert!(!h.controller.is_running(WatchKind::Work));

        h.controller.restart();
        assert_eq!(h.controller.state(), SchedulerState::Idle);
        assert!(!h.controller.show_now().unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dispose_async_cancels_watches() {
        let h = harness(fast_settings());
        h.controller.restart();
        h.controller.dispose_async().await;
        assert_eq!(h.controller.state(), SchedulerState::Idle);
    }
}
