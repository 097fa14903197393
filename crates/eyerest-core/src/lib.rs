//! # Eyerest Core Library
//!
//! Core logic of the eyerest 20-20-20 break reminder. Every few minutes a
//! full-screen overlay asks the user to look away for a short rest, counting
//! the rest down on screen. The user may force-cancel the overlay; the next
//! break then comes sooner.
//!
//! ## Architecture
//!
//! - **Timer**: A self-correcting countdown with fixed-interval ticks and a
//!   single finished notification, driven by its own worker thread
//! - **UI context**: A single-threaded executor that owns every surface call
//! - **Overlay**: One break episode, from fade-in through rest countdown to
//!   fade-out, reporting whether it ended normally or was forced
//! - **Scheduler**: Alternates the work and escape watches with overlay episodes
//! - **Storage**: TOML-based settings with validation
//!
//! ## Key Components
//!
//! - [`CountdownTimer`]: Tick/finish countdown
//! - [`UiContext`]: Serial executor for the display
//! - [`OverlayTimeController`]: One overlay episode
//! - [`AppTimeController`]: Top-level break scheduler
//! - [`Settings`]: Application settings

pub mod error;
pub mod events;
pub mod overlay;
pub mod scheduler;
pub mod storage;
pub mod surface;
pub mod timer;
pub mod ui;

pub use error::{ConfigError, CoreError, DispatchError, FieldError, SurfaceError, TimerError};
pub use events::{Event, WatchKind};
pub use overlay::{FinishReason, OverlaySignals, OverlayTimeController};
pub use scheduler::{AppTimeController, EventSink, SchedulerState, SessionEvent};
pub use storage::{Color, Settings, SettingsFile};
pub use surface::{ForegroundStyle, HeadlessSurface, OverlaySurface, SurfaceCall};
pub use timer::{CountdownListener, CountdownTimer};
pub use ui::UiContext;
