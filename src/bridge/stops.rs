//! Stop fan-out
//!
//! One `*stopped` record can pause several threads at once. The host gets a
//! focused stop for the thread that triggered it and a non-focus stop for
//! each other listed thread, so every thread shows as paused without
//! stealing the selection.

use crate::backend::{BackendEvent, StopEvent, StoppedThreads};

use super::protocol::StoppedEvent;

/// Host-visible reason for a classified stop, plus the stop itself
pub fn classify(event: &BackendEvent) -> Option<(&'static str, &StopEvent)> {
    match event {
        BackendEvent::BreakpointHit(stop) => Some(("breakpoint", stop)),
        BackendEvent::Watchpoint(stop) => Some(("data breakpoint", stop)),
        BackendEvent::StepEnd(stop) => Some(("step", stop)),
        BackendEvent::SignalStop(stop) => Some(("pause", stop)),
        BackendEvent::Stopped(stop) => Some(("exception", stop)),
        _ => None,
    }
}

/// Host stop events for one backend stop
///
/// The first entry is always the focused one.
pub fn fan_out(reason: &str, stop: &StopEvent, hit_breakpoint_ids: Vec<String>) -> Vec<StoppedEvent> {
    let focus = stop.thread_id().unwrap_or(1);
    let description = stop.record.record_str("signal-meaning").map(str::to_string);

    let others: Vec<i64> = match stop.stopped_threads() {
        StoppedThreads::List(threads) if threads.len() > 1 => {
            threads.into_iter().filter(|&t| t != focus).collect()
        }
        _ => {
            return vec![StoppedEvent {
                reason: reason.to_string(),
                thread_id: focus,
                all_threads_stopped: true,
                preserve_focus_hint: false,
                description,
                hit_breakpoint_ids,
            }];
        }
    };

    let mut events = Vec::with_capacity(others.len() + 1);
    events.push(StoppedEvent {
        reason: reason.to_string(),
        thread_id: focus,
        all_threads_stopped: false,
        preserve_focus_hint: false,
        description,
        hit_breakpoint_ids,
    });
    events.extend(others.into_iter().map(|thread_id| StoppedEvent {
        reason: reason.to_string(),
        thread_id,
        all_threads_stopped: false,
        preserve_focus_hint: true,
        description: None,
        hit_breakpoint_ids: Vec::new(),
    }));
    events
}
