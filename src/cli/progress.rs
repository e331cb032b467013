// src/cli/progress.rs — Terminal renderer for turn lifecycle events

use crossterm::style::Stylize;

use crate::core::types::SessionEvent;

/// One-line description of `event`, without styling.
pub fn format_event(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Busy => "[busy] still answering, Ctrl-C cancels".into(),
        SessionEvent::NoPattern { attempt: 0 } => "[pattern] none in reply".into(),
        SessionEvent::NoPattern { attempt } => {
            format!("[fix {attempt}] no pattern in correction, giving up")
        }
        SessionEvent::PatternExtracted { attempt, pattern } => {
            let lines = pattern.lines().count();
            format!("[{}] evaluating {} line(s)", label(*attempt), lines)
        }
        SessionEvent::Played { attempt } => format!("[{}] playing", label(*attempt)),
        SessionEvent::EvaluationFailed { attempt, error } => {
            format!("[{}] error: {}", label(*attempt), error)
        }
        SessionEvent::CorrectionRequested { attempt, budget } => {
            format!("[fix {attempt}/{budget}] asking for a correction...")
        }
        SessionEvent::EndpointNotReady => "[engine] audio engine not running".into(),
        SessionEvent::EngineFault { error } => format!("[engine] {error}"),
        SessionEvent::GaveUp { attempts, error } => {
            format!("[gave up] after {attempts} correction(s): {error}")
        }
    }
}

fn label(attempt: u32) -> String {
    if attempt == 0 {
        "play".into()
    } else {
        format!("fix {attempt}")
    }
}

/// Build a progress callback that writes styled events to stderr.
///
/// Returns a closure suitable for `Orchestrator::with_progress()`.
pub fn terminal_progress() -> impl Fn(SessionEvent) + Send + Sync + 'static {
    move |event| {
        let line = format_event(&event);
        match event {
            SessionEvent::Played { .. } => eprintln!("{}", line.green()),
            SessionEvent::EvaluationFailed { .. }
            | SessionEvent::GaveUp { .. }
            | SessionEvent::EndpointNotReady
            | SessionEvent::EngineFault { .. } => eprintln!("{}", line.red()),
            SessionEvent::CorrectionRequested { .. } | SessionEvent::Busy => {
                eprintln!("{}", line.yellow())
            }
            _ => eprintln!("{}", line.dim()),
        }
    }
}
