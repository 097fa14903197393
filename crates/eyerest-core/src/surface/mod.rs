//! The break overlay's display surface, seen from the scheduler.
//!
//! Rendering, animation and input hooking live outside this crate. A
//! surface only has to show and close itself, display the countdown text,
//! switch the countdown color, run its fade-out, and raise the signals in
//! [`OverlaySignals`] when its fades complete or the user forces a cancel.

mod headless;

pub use headless::{HeadlessSurface, SurfaceCall};

use serde::{Deserialize, Serialize};

use crate::error::SurfaceError;
use crate::overlay::OverlaySignals;

/// Countdown text color role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForegroundStyle {
    Countdown,
    Success,
    Failed,
}

/// Process-wide overlay display.
///
/// Every method is called on the [`UiContext`](crate::ui::UiContext) only,
/// except [`is_visible`](OverlaySurface::is_visible) which may be queried
/// from anywhere.
pub trait OverlaySurface: Send + Sync {
    /// Show the overlay and start its fade-in. The surface reports fade
    /// completion and forced cancels through `signals`.
    fn show(&self, signals: OverlaySignals) -> Result<(), SurfaceError>;

    /// Hide the overlay. No-op when it is not visible.
    fn close(&self);

    fn set_tick_text(&self, text: &str);

    fn set_foreground_style(&self, style: ForegroundStyle);

    /// Start the fade-out; the surface raises fade-out completed when done.
    fn begin_fade_out(&self);

    fn is_visible(&self) -> bool;
}
