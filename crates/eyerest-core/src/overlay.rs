//! In-overlay countdown and its hand-off into fade-out.
//!
//! One [`OverlayTimeController`] drives one overlay episode:
//!
//! ```text
//! Created -> Showing (fade-in) -> CountingDown -> FadingOut -> Finished(reason)
//! ```
//!
//! Two paths can end the countdown: the rest timer completing (normal) or
//! the user's forced-cancel gesture. Both race to set a single atomic latch;
//! the winner triggers the fade-out and decides the reason, the loser is a
//! no-op. The owner's callback receives that reason exactly once, after the
//! surface reports its fade-out completed.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{CoreError, Result, TimerError};
use crate::storage::Settings;
use crate::surface::{ForegroundStyle, OverlaySurface};
use crate::timer::{CountdownListener, CountdownTimer};
use crate::ui::UiContext;

/// Why an overlay episode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum FinishReason {
    /// The rest countdown ran to completion.
    Normal = 1,
    /// The user cancelled the break early.
    Forced = 2,
}

impl TryFrom<u8> for FinishReason {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(FinishReason::Normal),
            2 => Ok(FinishReason::Forced),
            other => Err(CoreError::InvalidReason(other)),
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishReason::Normal => f.write_str("normal"),
            FinishReason::Forced => f.write_str("forced"),
        }
    }
}

const UNDECIDED: u8 = 0;

/// Set-once holder of the episode's finish reason.
struct FinishLatch(AtomicU8);

impl FinishLatch {
    fn new() -> Self {
        Self(AtomicU8::new(UNDECIDED))
    }

    /// True if this call decided the reason.
    fn try_set(&self, reason: FinishReason) -> bool {
        self.0
            .compare_exchange(UNDECIDED, reason as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn get(&self) -> Option<FinishReason> {
        match self.0.load(Ordering::Acquire) {
            UNDECIDED => None,
            raw => match FinishReason::try_from(raw) {
                Ok(reason) => Some(reason),
                Err(e) => unreachable!("finish latch holds {raw}: {e}"),
            },
        }
    }
}

type FinishedCallback = Box<dyn FnOnce(FinishReason) + Send + 'static>;

struct Episode {
    id: u64,
    settings: Arc<Settings>,
    ui: UiContext,
    surface: Arc<dyn OverlaySurface>,
    watch: CountdownTimer,
    latch: FinishLatch,
    on_finished: Mutex<Option<FinishedCallback>>,
}

impl Episode {
    fn on_fade_in_completed(&self) {
        match self.latch.get() {
            // A cancel accepted before the surface was up could not fade it out.
            Some(FinishReason::Forced) => {
                if !self.surface.is_visible() {
                    return;
                }
                info!(episode = self.id, "fade-in completed after forced cancel, fading out");
                self.surface.set_foreground_style(ForegroundStyle::Failed);
                self.surface.begin_fade_out();
                return;
            }
            Some(reason) => {
                debug!(episode = self.id, %reason, "fade-in completed after finish was decided");
                return;
            }
            None => {}
        }
        info!(episode = self.id, "fade-in completed, starting rest countdown");
        self.watch.start();
    }

    fn on_tick(&self, remaining: Duration) {
        if self.latch.get() == Some(FinishReason::Forced) {
            self.watch.cancel();
            return;
        }
        let text = format!("{:02}", remaining.as_secs_f64().round() as u64);
        let surface = Arc::clone(&self.surface);
        if let Err(e) = self.ui.post(move || surface.set_tick_text(&text)) {
            warn!(episode = self.id, "tick display dropped: {e}");
        }
    }

    fn on_countdown_finished(&self) {
        if !self.latch.try_set(FinishReason::Normal) {
            debug!(episode = self.id, "countdown finished after forced cancel");
            return;
        }
        info!(episode = self.id, "rest completed, fading out");

        let surface = Arc::clone(&self.surface);
        let lead = self.settings.color_change_lead;
        let scheduled = self
            .ui
            .post(move || surface.set_foreground_style(ForegroundStyle::Success))
            .and_then(|()| {
                let surface = Arc::clone(&self.surface);
                self.ui.post_after(lead, move || surface.begin_fade_out())
            });
        if let Err(e) = scheduled {
            error!(episode = self.id, "fade-out could not be scheduled: {e}");
            self.complete();
        }
    }

    fn request_forced_cancel(&self) -> bool {
        if !self.latch.try_set(FinishReason::Forced) {
            debug!(episode = self.id, "forced cancel ignored, fade-out already decided");
            return false;
        }
        info!(episode = self.id, "break force-cancelled");
        self.watch.cancel();

        let surface = Arc::clone(&self.surface);
        let scheduled = self.ui.post(move || {
            surface.set_foreground_style(ForegroundStyle::Failed);
            surface.begin_fade_out();
        });
        if let Err(e) = scheduled {
            error!(episode = self.id, "fade-out could not be scheduled: {e}");
            self.complete();
        }
        true
    }

    fn on_fade_out_completed(&self) {
        self.surface.close();
        self.complete();
    }

    /// Report the latched reason to the owner, once.
    fn complete(&self) {
        let callback = self
            .on_finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(callback) = callback else {
            debug!(episode = self.id, "duplicate completion ignored");
            return;
        };

        let reason = self.latch.get().unwrap_or_else(|| {
            warn!(episode = self.id, "fade-out completed before a reason was set");
            self.latch.try_set(FinishReason::Normal);
            FinishReason::Normal
        });
        self.watch.cancel();
        info!(episode = self.id, %reason, "overlay finished");
        callback(reason);
    }
}

struct RestWatchListener {
    episode: Arc<OnceLock<Weak<Episode>>>,
}

impl RestWatchListener {
    fn episode(&self) -> Option<Arc<Episode>> {
        self.episode.get().and_then(Weak::upgrade)
    }
}

impl CountdownListener for RestWatchListener {
    fn elapsed(&self, remaining: Duration) {
        if let Some(episode) = self.episode() {
            episode.on_tick(remaining);
        }
    }

    fn finished(&self) {
        if let Some(episode) = self.episode() {
            episode.on_countdown_finished();
        }
    }
}

/// Handle a surface (or an input hook) uses to report back to its episode.
///
/// Signals may be raised from any thread. Signals for an episode that has
/// already been dropped are ignored.
#[derive(Clone)]
pub struct OverlaySignals {
    episode: Weak<Episode>,
}

impl OverlaySignals {
    pub fn fade_in_completed(&self) {
        self.dispatch("fade-in completed", Episode::on_fade_in_completed);
    }

    pub fn fade_out_completed(&self) {
        self.dispatch("fade-out completed", Episode::on_fade_out_completed);
    }

    /// The user's forced-cancel gesture. Returns true if it ended the break;
    /// false once a fade-out is already under way.
    pub fn request_forced_cancel(&self) -> bool {
        match self.episode.upgrade() {
            Some(episode) => episode.request_forced_cancel(),
            None => false,
        }
    }

    /// The reason decided so far, if any.
    pub fn reason(&self) -> Option<FinishReason> {
        self.episode.upgrade().and_then(|e| e.latch.get())
    }

    fn dispatch(&self, signal: &'static str, handler: fn(&Episode)) {
        let Some(episode) = self.episode.upgrade() else {
            debug!(signal, "signal for a finished overlay ignored");
            return;
        };
        if episode.ui.is_current() {
            handler(&episode);
            return;
        }
        let ui = episode.ui.clone();
        let weak = Weak::clone(&self.episode);
        drop(episode);
        if let Err(e) = ui.post(move || {
            if let Some(episode) = weak.upgrade() {
                handler(&episode);
            }
        }) {
            warn!(signal, "signal dropped: {e}");
        }
    }
}

impl fmt::Debug for OverlaySignals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlaySignals")
            .field("episode", &self.episode.upgrade().map(|e| e.id))
            .finish()
    }
}

/// Drives the countdown shown while the overlay is visible.
#[derive(Clone)]
pub struct OverlayTimeController {
    episode: Arc<Episode>,
}

impl OverlayTimeController {
    /// Prepare an episode; nothing is shown until [`show_overlay`](Self::show_overlay).
    ///
    /// `on_finished` runs once with the episode's reason, on the UI context.
    /// If the context stops accepting work mid-episode, it runs instead on
    /// the thread that found the context closed (the rest countdown worker
    /// or the caller of a forced cancel).
    ///
    /// # Errors
    ///
    /// Returns an error if the rest countdown cannot be created.
    pub fn new(
        id: u64,
        settings: Arc<Settings>,
        ui: UiContext,
        surface: Arc<dyn OverlaySurface>,
        on_finished: impl FnOnce(FinishReason) + Send + 'static,
    ) -> Result<Self, TimerError> {
        let link = Arc::new(OnceLock::new());
        let watch = CountdownTimer::new(
            format!("rest-{id}"),
            settings.rest,
            settings.tick,
            RestWatchListener {
                episode: Arc::clone(&link),
            },
        )?;
        let episode = Arc::new(Episode {
            id,
            settings,
            ui,
            surface,
            watch,
            latch: FinishLatch::new(),
            on_finished: Mutex::new(Some(Box::new(on_finished))),
        });
        let _ = link.set(Arc::downgrade(&episode));
        Ok(Self { episode })
    }

    pub fn id(&self) -> u64 {
        self.episode.id
    }

    /// Show the overlay on the UI context and wait until it is up.
    /// May be called from any thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the UI context is closed or the surface refuses
    /// to show; the episode then never reports a reason.
    pub fn show_overlay(&self) -> Result<()> {
        let episode = &self.episode;
        info!(episode = episode.id, "showing overlay");

        let signals = self.signals();
        let surface = Arc::clone(&episode.surface);
        let rest_text = format!("{:02}", episode.settings.rest.as_secs_f64().round() as u64);
        episode.ui.invoke(move || {
            surface.close();
            surface.set_foreground_style(ForegroundStyle::Countdown);
            surface.set_tick_text(&rest_text);
            surface.show(signals)
        })??;
        Ok(())
    }

    pub fn signals(&self) -> OverlaySignals {
        OverlaySignals {
            episode: Arc::downgrade(&self.episode),
        }
    }

    /// The reason decided so far, if any.
    pub fn reason(&self) -> Option<FinishReason> {
        self.episode.latch.get()
    }

    /// True once the finished callback has run.
    pub fn is_finished(&self) -> bool {
        self.episode
            .on_finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Cancel the rest countdown for good. Safe to call repeatedly.
    pub fn dispose(&self) {
        self.episode.watch.dispose();
    }
}

impl fmt::Debug for OverlayTimeController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayTimeController")
            .field("id", &self.episode.id)
            .field("reason", &self.reason())
            .finish()
    }
}
