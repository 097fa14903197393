use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use eyerest_core::{
    AppTimeController, Event, HeadlessSurface, SessionEvent, Settings, SurfaceCall, UiContext,
};
use serde_json::json;
use tracing::info;

#[derive(Args)]
pub struct RunArgs {
    /// Settings file to use instead of the default location
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Print scheduler events as JSON lines
    #[arg(long)]
    json: bool,
}

/// Tray-tooltip style `mm:ss`.
fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs_f64().round() as u64;
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

fn print_event(event: &Event) {
    match event {
        Event::WatchStarted {
            watch, duration_ms, ..
        } => println!(
            "{watch} watch started, next break in {}",
            format_remaining(Duration::from_millis(*duration_ms))
        ),
        Event::TickChanged { remaining_ms, .. } => {
            println!("next break in {}", format_remaining(Duration::from_millis(*remaining_ms)))
        }
        Event::Aborted { .. } => println!("paused"),
        Event::OverlayShown { episode, .. } => println!("break #{episode}: look away"),
        Event::OverlayFinished {
            episode, reason, ..
        } => println!("break #{episode} finished ({reason})"),
        Event::OverlayFailed {
            episode, message, ..
        } => println!("break #{episode} failed: {message}"),
    }
}

fn print_surface_call(call: &SurfaceCall) {
    match call {
        SurfaceCall::TickText(text) => println!("  [overlay] {text}"),
        SurfaceCall::Style(style) => println!("  [overlay] {style:?}"),
        SurfaceCall::Show => println!("  [overlay] shown"),
        SurfaceCall::FadeOut => println!("  [overlay] fading out"),
        SurfaceCall::Close => println!("  [overlay] closed"),
    }
}

pub fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let settings = match &args.settings {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    let ui = UiContext::spawn("eyerest-ui")?;
    let mut surface = HeadlessSurface::new(ui.clone(), &settings);
    if !args.json {
        surface = surface.with_observer(print_surface_call);
    }
    let surface = Arc::new(surface);

    let json_output = args.json;
    let controller = AppTimeController::new(settings, ui.clone(), surface.clone(), move |event| {
        if json_output {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => eprintln!("error: {e}"),
            }
        } else {
            print_event(&event);
        }
    })?;
    controller.restart();

    for line in io::stdin().lock().lines() {
        let line = line?;
        match line.trim() {
            "" => continue,
            "show" => match controller.show_now() {
                Ok(true) => {}
                Ok(false) => eprintln!("a break is already showing"),
                Err(e) => eprintln!("error: {e}"),
            },
            "cancel" => {
                if !surface.request_forced_cancel() {
                    eprintln!("no break to cancel");
                }
            }
            "lock" => controller.handle_session(SessionEvent::Lock),
            "unlock" => controller.handle_session(SessionEvent::Unlock),
            "status" => {
                let state = serde_json::to_value(controller.state())?;
                if args.json {
                    println!("{}", json!({ "type": "Status", "state": state }));
                } else {
                    println!("state: {}", state.as_str().unwrap_or_default());
                }
            }
            "quit" | "exit" => break,
            other => eprintln!("unknown command: {other}"),
        }
    }

    info!("shutting down");
    controller.dispose();
    ui.shutdown();
    Ok(())
}
