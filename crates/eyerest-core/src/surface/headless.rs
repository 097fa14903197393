//! A windowless surface that plays the overlay's timeline without drawing.
//!
//! Fades are simulated with the configured durations on the UI context.
//! Every call is recorded and can be forwarded to an observer, which is how
//! the terminal host renders the countdown.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use super::{ForegroundStyle, OverlaySurface};
use crate::error::SurfaceError;
use crate::overlay::OverlaySignals;
use crate::storage::Settings;
use crate::ui::UiContext;

/// One call made on a [`HeadlessSurface`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    Show,
    Close,
    TickText(String),
    Style(ForegroundStyle),
    FadeOut,
}

type Observer = Box<dyn Fn(&SurfaceCall) + Send + Sync>;

#[derive(Default)]
struct State {
    visible: bool,
    fading_out: bool,
    signals: Option<OverlaySignals>,
    calls: Vec<SurfaceCall>,
    refuse_next_show: Option<String>,
}

pub struct HeadlessSurface {
    ui: UiContext,
    fade_in: Duration,
    fade_out: Duration,
    state: Mutex<State>,
    observer: Option<Observer>,
}

impl HeadlessSurface {
    pub fn new(ui: UiContext, settings: &Settings) -> Self {
        Self {
            ui,
            fade_in: settings.fade_in,
            fade_out: settings.fade_out,
            state: Mutex::new(State::default()),
            observer: None,
        }
    }

    /// Forward every call to `observer` after it is recorded.
    pub fn with_observer(mut self, observer: impl Fn(&SurfaceCall) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Stand-in for the global keyboard hook: force-cancel whatever
    /// overlay is currently shown. Returns false when nothing was cancelled.
    pub fn request_forced_cancel(&self) -> bool {
        let signals = self.lock().signals.clone();
        match signals {
            Some(signals) => signals.request_forced_cancel(),
            None => {
                debug!("forced cancel requested with no overlay shown");
                false
            }
        }
    }

    /// Make the next `show` fail with `message`.
    pub fn refuse_next_show(&self, message: impl Into<String>) {
        self.lock().refuse_next_show = Some(message.into());
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, mut state: MutexGuard<'_, State>, call: SurfaceCall) {
        state.calls.push(call.clone());
        drop(state);
        if let Some(observer) = &self.observer {
            observer(&call);
        }
    }
}

impl OverlaySurface for HeadlessSurface {
    fn show(&self, signals: OverlaySignals) -> Result<(), SurfaceError> {
        let mut state = self.lock();
        if let Some(message) = state.refuse_next_show.take() {
            return Err(SurfaceError::Unavailable(message));
        }

        let fade_in_done = signals.clone();
        self.ui
            .post_after(self.fade_in, move || fade_in_done.fade_in_completed())
            .map_err(|e| SurfaceError::Unavailable(e.to_string()))?;

        state.visible = true;
        state.fading_out = false;
        state.signals = Some(signals);
        self.record(state, SurfaceCall::Show);
        Ok(())
    }

    fn close(&self) {
        let mut state = self.lock();
        if !state.visible {
            return;
        }
        state.visible = false;
        state.fading_out = false;
        state.signals = None;
        self.record(state, SurfaceCall::Close);
    }

    fn set_tick_text(&self, text: &str) {
        let state = self.lock();
        self.record(state, SurfaceCall::TickText(text.to_owned()));
    }

    fn set_foreground_style(&self, style: ForegroundStyle) {
        let state = self.lock();
        self.record(state, SurfaceCall::Style(style));
    }

    fn begin_fade_out(&self) {
        let mut state = self.lock();
        if !state.visible || state.fading_out {
            return;
        }
        let Some(signals) = state.signals.clone() else {
            return;
        };
        state.fading_out = true;
        if let Err(e) = self
            .ui
            .post_after(self.fade_out, move || signals.fade_out_completed())
        {
            warn!("fade-out could not be scheduled: {e}");
        }
        self.record(state, SurfaceCall::FadeOut);
    }

    fn is_visible(&self) -> bool {
        self.lock().visible
    }
}
