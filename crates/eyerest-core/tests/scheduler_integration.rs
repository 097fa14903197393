//! Integration tests for the break scheduler.
//!
//! Runs whole work/overlay/escape cycles against the headless surface with
//! millisecond-scale settings.

use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use eyerest_core::{
    AppTimeController, ConfigError, CoreError, Event, FinishReason, ForegroundStyle,
    HeadlessSurface, SchedulerState, Settings, SurfaceCall, UiContext, WatchKind,
};

const WAIT: Duration = Duration::from_secs(5);

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn fast_settings() -> Settings {
    Settings {
        interval: ms(400),
        escape_next: ms(250),
        rest: ms(200),
        fade_in: ms(20),
        fade_out: ms(20),
        color_change_lead: ms(30),
        tick: ms(50),
        ..Settings::default()
    }
}

struct Rig {
    controller: AppTimeController,
    surface: Arc<HeadlessSurface>,
    events: Receiver<Event>,
    ui: UiContext,
}

impl Rig {
    fn new(settings: Settings) -> Self {
        let ui = UiContext::spawn("integration-ui").unwrap();
        let surface = Arc::new(HeadlessSurface::new(ui.clone(), &settings));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let controller = AppTimeController::new(settings, ui.clone(), surface.clone(), move |e| {
            let _ = tx.lock().unwrap().send(e);
        })
        .unwrap();
        Self {
            controller,
            surface,
            events: rx,
            ui,
        }
    }

    /// Block until an event matching `pred` arrives; returns it.
    fn expect(&self, what: &str, mut pred: impl FnMut(&Event) -> bool) -> Event {
        loop {
            match self.events.recv_timeout(WAIT) {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(_) => panic!("timed out waiting for {what}"),
            }
        }
    }

    fn drain(&self) -> Vec<Event> {
        self.events.try_iter().collect()
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        self.controller.dispose();
        self.ui.shutdown();
    }
}

fn is_shown(e: &Event) -> bool {
    matches!(e, Event::OverlayShown { .. })
}

fn finished_with(e: &Event, expected: FinishReason) -> bool {
    matches!(e, Event::OverlayFinished { reason, .. } if *reason == expected)
}

fn started(e: &Event, kind: WatchKind) -> bool {
    matches!(e, Event::WatchStarted { watch, .. } if *watch == kind)
}

#[test]
fn test_work_cycle_completes_normally_and_restarts_work_watch() {
    let rig = Rig::new(fast_settings());
    rig.controller.restart();
    rig.expect("work watch start", |e| started(e, WatchKind::Work));

    rig.expect("overlay shown", is_shown);
    assert_eq!(rig.controller.state(), SchedulerState::OverlayShowing);
    assert!(!rig.controller.is_running(WatchKind::Work));

    rig.expect("normal finish", |e| finished_with(e, FinishReason::Normal));
    let restarted = rig.expect("work watch restart", |e| started(e, WatchKind::Work));
    match restarted {
        Event::WatchStarted { duration_ms, .. } => assert_eq!(duration_ms, 400),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(rig.controller.is_running(WatchKind::Work));
    assert!(!rig.controller.is_running(WatchKind::Escape));

    let calls = rig.surface.calls();
    let success = calls
        .iter()
        .position(|c| *c == SurfaceCall::Style(ForegroundStyle::Success))
        .expect("success style");
    let fade_out = calls
        .iter()
        .position(|c| *c == SurfaceCall::FadeOut)
        .expect("fade-out");
    assert!(success < fade_out);
    assert_eq!(calls.last(), Some(&SurfaceCall::Close));
}

#[test]
fn test_forced_cancel_switches_to_escape_watch() {
    let settings = Settings {
        rest: ms(1500),
        interval: ms(2000),
        ..fast_settings()
    };
    let rig = Rig::new(settings);
    rig.controller.restart();

    assert!(rig.controller.show_now().unwrap());
    rig.expect("overlay shown", is_shown);
    thread::sleep(ms(150));

    assert!(rig.controller.request_forced_cancel());
    assert!(!rig.controller.request_forced_cancel());
    rig.expect("forced finish", |e| finished_with(e, FinishReason::Forced));
    let escape = rig.expect("escape watch start", |e| started(e, WatchKind::Escape));
    match escape {
        Event::WatchStarted { duration_ms, .. } => assert_eq!(duration_ms, 250),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(!rig.controller.is_running(WatchKind::Work));

    let tick = rig.expect("escape tick", |e| {
        matches!(e, Event::TickChanged { remaining_ms, .. } if *remaining_ms > 0)
    });
    match tick {
        Event::TickChanged { remaining_ms, .. } => assert!(remaining_ms <= 250),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(rig.controller.state(), SchedulerState::EscapeWaiting);

    let calls = rig.surface.calls();
    assert!(calls.contains(&SurfaceCall::Style(ForegroundStyle::Failed)));
    assert!(!calls.contains(&SurfaceCall::Style(ForegroundStyle::Success)));

    // The escape watch triggers the next overlay.
    rig.expect("second overlay", is_shown);
}

#[test]
fn test_forced_cancel_during_escape_overlay_loops_back_to_escape() {
    let settings = Settings {
        rest: ms(1000),
        interval: ms(1500),
        escape_next: ms(200),
        ..fast_settings()
    };
    let rig = Rig::new(settings);

    assert!(rig.controller.show_now().unwrap());
    rig.expect("first overlay", is_shown);
    assert!(rig.controller.request_forced_cancel());
    rig.expect("escape watch start", |e| started(e, WatchKind::Escape));

    rig.expect("escape overlay", is_shown);
    thread::sleep(ms(100));
    assert!(rig.controller.request_forced_cancel());
    rig.expect("forced finish", |e| finished_with(e, FinishReason::Forced));
    rig.expect("escape watch again", |e| started(e, WatchKind::Escape));
}

#[test]
fn test_abort_resets_tick_display_and_suppresses_finish() {
    let rig = Rig::new(fast_settings());
    rig.controller.restart();
    rig.expect("a tick", |e| {
        matches!(e, Event::TickChanged { remaining_ms, .. } if *remaining_ms > 0)
    });

    rig.controller.abort();
    rig.expect("zeroed tick", |e| {
        matches!(e, Event::TickChanged { remaining_ms: 0, .. })
    });
    rig.drain();

    thread::sleep(ms(700));
    let late = rig.drain();
    assert!(late.is_empty(), "events after abort: {late:?}");
    assert!(rig.surface.calls().is_empty());

    rig.controller.restart();
    let restarted = rig.expect("fresh cycle", |e| started(e, WatchKind::Work));
    match restarted {
        Event::WatchStarted { duration_ms, .. } => assert_eq!(duration_ms, 400),
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_show_now_aborts_watch_and_is_noop_while_visible() {
    let settings = Settings {
        rest: ms(600),
        interval: ms(1000),
        ..fast_settings()
    };
    let rig = Rig::new(settings);
    rig.controller.restart();
    assert!(rig.controller.is_running(WatchKind::Work));
    assert!(rig.controller.can_show());

    assert!(rig.controller.show_now().unwrap());
    assert!(!rig.controller.is_running(WatchKind::Work));
    assert!(!rig.controller.is_running(WatchKind::Escape));
    assert!(!rig.controller.can_show());

    rig.drain();
    assert!(!rig.controller.show_now().unwrap());
    assert!(
        !rig.drain().iter().any(|e| matches!(e, Event::Aborted { .. })),
        "no-op show must not abort"
    );
    let shows = rig
        .surface
        .calls()
        .iter()
        .filter(|c| **c == SurfaceCall::Show)
        .count();
    assert_eq!(shows, 1);
}

#[test]
fn test_at_most_one_watch_runs() {
    let settings = Settings {
        rest: ms(100),
        interval: ms(250),
        escape_next: ms(150),
        ..fast_settings()
    };
    let rig = Rig::new(settings);

    for round in 0..20 {
        match round % 5 {
            0 => rig.controller.restart(),
            1 => {
                let _ = rig.controller.show_now();
            }
            2 => {
                rig.controller.request_forced_cancel();
            }
            3 => rig.controller.abort(),
            _ => rig.controller.restart(),
        }
        for _ in 0..10 {
            let work = rig.controller.is_running(WatchKind::Work);
            let escape = rig.controller.is_running(WatchKind::Escape);
            assert!(!(work && escape), "both watches running in round {round}");
            thread::sleep(ms(5));
        }
    }
}

#[test]
fn test_failed_show_requires_restart() {
    let rig = Rig::new(fast_settings());
    rig.surface.refuse_next_show("display unavailable");
    rig.controller.restart();

    let failed = rig.expect("overlay failure", |e| matches!(e, Event::OverlayFailed { .. }));
    match failed {
        Event::OverlayFailed { message, .. } => assert!(message.contains("display unavailable")),
        other => panic!("unexpected event {other:?}"),
    }
    thread::sleep(ms(100));
    assert_eq!(rig.controller.state(), SchedulerState::Idle);

    rig.controller.restart();
    rig.expect("overlay after recovery", is_shown);
}

#[test]
fn test_invalid_settings_prevent_startup() {
    let ui = UiContext::spawn("integration-invalid").unwrap();
    let settings = Settings {
        rest: ms(500),
        ..fast_settings()
    };
    let surface = Arc::new(HeadlessSurface::new(ui.clone(), &settings));
    let err = AppTimeController::new(settings, ui.clone(), surface, |_| {}).unwrap_err();
    match err {
        CoreError::Config(ConfigError::Invalid(errors)) => {
            assert!(errors.iter().any(|e| e.field == "interval"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    ui.shutdown();
}
