//! End-to-end tests against the scripted MI debugger
//!
//! Each test spawns `mock_mi` as the debugger process and drives it through
//! the backend or the full session orchestrator.

use std::time::Duration;

use mibridge::backend::{Backend, BackendEvent, BreakpointSpec, FunctionBreakpointSpec, LaunchOptions};
use mibridge::bridge::protocol::{EvaluateContext, HostEvent, RunMode, SourceBreakpoint};
use mibridge::bridge::{Behaviour, DebugSession};
use mibridge::common::config::{Config, StopAtEntry};

const TIMEOUT: Duration = Duration::from_secs(10);

fn mock_options(args: &[&str]) -> LaunchOptions {
    let mut options = LaunchOptions::new(env!("CARGO_BIN_EXE_mock_mi"));
    options.args = args.iter().map(|a| a.to_string()).collect();
    options
}

async fn launch(args: &[&str]) -> Backend {
    Backend::launch(&mock_options(args))
        .await
        .expect("mock debugger should start")
}

/// Feed backend events to the session until `done` accepts one of the
/// produced host events; returns everything produced on the way
async fn pump_until<F>(session: &mut DebugSession, mut done: F) -> Vec<HostEvent>
where
    F: FnMut(&HostEvent) -> bool,
{
    let mut seen = Vec::new();
    tokio::time::timeout(TIMEOUT, async {
        loop {
            let event = session.next_event().await.expect("backend event");
            let produced = session.handle_event(event).await;
            let finished = produced.iter().any(&mut done);
            seen.extend(produced);
            if finished {
                break;
            }
        }
    })
    .await
    .expect("timed out waiting for host event");
    seen
}

/// Session over a fresh mock, once `threads` thread notices are in
async fn session_with(behaviour: Behaviour, args: &[&str], threads: usize) -> DebugSession {
    let backend = launch(args).await;
    let mut session = DebugSession::new(backend, behaviour, None).unwrap();
    let mut started = 0;
    pump_until(&mut session, |e| {
        if matches!(e, HostEvent::Thread { .. }) {
            started += 1;
        }
        started == threads
    })
    .await;
    session
}

fn line(line: u32) -> SourceBreakpoint {
    SourceBreakpoint {
        line,
        condition: None,
        hit_condition: None,
        log_message: None,
    }
}

#[tokio::test]
async fn test_backend_queries() {
    let backend = launch(&[]).await;
    assert!(backend.is_ready());

    let threads = backend.thread_info().await.unwrap();
    assert_eq!(threads.len(), 2);
    assert_eq!(threads[1].session_id, Some(2));

    let frames = backend.stack(1).await.unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].source_path(), Some("/src/main.c"));
    assert_eq!(frames[1].function.as_deref(), Some("main"));

    // The unnamed register is skipped
    let registers = backend.registers(1, 0).await.unwrap();
    let names: Vec<&str> = registers.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["rax", "rbx", "rip"]);

    assert_eq!(backend.evaluate("count", 1, 0).await.unwrap(), "3");
    assert_eq!(backend.examine_memory(0x1000, 4).await.unwrap(), "deadbeef");

    backend.list_features().await.unwrap();
    assert!(backend.supports("exec-run-start-option"));

    backend.stop().await.unwrap();
}

#[tokio::test]
async fn test_partial_breakpoint_keeps_accepting_sessions() {
    let backend = launch(&["--sessions", "1,2,3", "--fail-sessions", "2"]).await;

    let spec = BreakpointSpec::at("/src/main.c", 12);
    let bp = backend.add_breakpoint(&spec, &[1, 2, 3]).await;
    assert_eq!(bp.session_ids, vec![1, 3]);
    assert_eq!(backend.breakpoints().sessions_at(&spec.id()).len(), 2);

    // Same location again reuses the tracked breakpoints
    let again = backend.add_breakpoint(&spec, &[1, 3]).await;
    assert_eq!(again.session_ids, vec![1, 3]);

    assert_eq!(backend.clear_breakpoints("/src").await.unwrap(), 2);
    assert!(backend.breakpoints().list().is_empty());

    backend.stop().await.unwrap();
}

#[tokio::test]
async fn test_function_breakpoint_resolves_location() {
    let backend = launch(&["--sessions", "1,2", "--fail-sessions", "2"]).await;

    let main = FunctionBreakpointSpec {
        name: "main".into(),
        ..Default::default()
    };
    let set = backend.set_function_breakpoints(&[main], &[1, 2]).await.unwrap();
    assert_eq!(set[0].session_ids, vec![1]);
    assert_eq!(set[0].file.as_deref(), Some("/src/main.c"));
    assert_eq!(set[0].line, Some(20));

    assert!(backend.set_function_breakpoints(&[], &[1]).await.unwrap().is_empty());
    assert!(backend.breakpoints().function_breakpoints().is_empty());

    backend.stop().await.unwrap();
}

#[tokio::test]
async fn test_command_error_carries_message() {
    let backend = launch(&[]).await;
    let err = backend.evaluate("missing", 1, 0).await.unwrap_err();
    assert!(err.to_string().contains("No symbol"));
    backend.stop().await.unwrap();
}

#[tokio::test]
async fn test_breakpoint_hit_flow() {
    let behaviour = Behaviour {
        run_mode: RunMode::Continue,
        stop_at_entry: StopAtEntry::Flag(false),
        var_objects: true,
        interrupt_on_breakpoint: true,
    };
    let mut session = session_with(behaviour, &[], 2).await;

    let threads = session.threads();
    assert_eq!(threads.len(), 4, "two group headers and two threads");
    assert!(threads.iter().any(|t| t.name == "[svc2]: Thread 2, sid = 2"));

    let reconciled = session
        .set_breakpoints("/src/main.c", &[line(12)], &[], false)
        .await
        .unwrap();
    assert_eq!(reconciled.file[0].session_ids, vec![1, 2]);
    assert!(reconciled.file[0].verified);

    let events = session.configuration_done().await.unwrap();
    assert!(matches!(
        events.as_slice(),
        [HostEvent::Continued {
            all_threads_continued: true,
            ..
        }]
    ));

    let events = pump_until(&mut session, |e| matches!(e, HostEvent::BreakpointHit { .. })).await;
    let stops: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            HostEvent::Stopped(stop) => Some(stop),
            _ => None,
        })
        .collect();
    assert_eq!(stops.len(), 2);
    assert_eq!(stops[0].reason, "breakpoint");
    assert!(!stops[0].preserve_focus_hint);
    assert!(stops[1].preserve_focus_hint);
    assert_ne!(stops[0].thread_id, stops[1].thread_id);

    let (frames, total) = session.stack_trace(1, 0, Some(1)).await.unwrap();
    assert_eq!(total, 2);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].line, 12);
    assert!(frames[0].name.starts_with("work@0x"));

    let scopes = session.scopes(frames[0].id).unwrap();
    assert_eq!(scopes[0].name, "Locals");
    assert_eq!(scopes[1].name, "Registers");

    let locals = session.variables(scopes[0].variables_reference).await.unwrap();
    assert_eq!(locals.len(), 2);
    assert_eq!(locals[0].name, "count");
    assert_eq!(locals[0].value, "3");
    assert_eq!(locals[0].variables_reference, 0);
    let point = &locals[1];
    assert_ne!(point.variables_reference, 0);

    let fields = session.variables(point.variables_reference).await.unwrap();
    let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["x", "y"]);

    // Known locals are refreshed, not recreated
    let again = session.variables(scopes[0].variables_reference).await.unwrap();
    assert_eq!(again[1].variables_reference, point.variables_reference);

    let registers = session.variables(scopes[1].variables_reference).await.unwrap();
    assert_eq!(registers.len(), 3);

    let watch = session
        .evaluate("count", Some(frames[0].id), EvaluateContext::Watch)
        .await
        .unwrap();
    assert_eq!(watch.result, "3");
    let broken = session
        .evaluate("nope", Some(frames[0].id), EvaluateContext::Watch)
        .await
        .unwrap();
    assert!(broken.result.contains("No symbol"));
    assert_eq!(broken.variables_reference, 0);

    let assigned = session
        .set_variable(scopes[0].variables_reference, "count", "7")
        .await
        .unwrap();
    assert_eq!(assigned, "7");

    let events = session.disconnect(true).await.unwrap();
    assert_eq!(events.last(), Some(&HostEvent::Terminated));
}

#[tokio::test]
async fn test_stepping_reports_single_thread_stop() {
    let mut session = session_with(Behaviour::default(), &["--sessions", "1"], 1).await;
    assert!(session.next(1, false).await.unwrap());

    let events = pump_until(&mut session, |e| matches!(e, HostEvent::Stopped(_))).await;
    let stop = events
        .iter()
        .find_map(|e| match e {
            HostEvent::Stopped(stop) => Some(stop),
            _ => None,
        })
        .unwrap();
    assert_eq!(stop.reason, "step");
    assert_eq!(stop.thread_id, 1);
    assert!(stop.all_threads_stopped);

    session.disconnect(true).await.unwrap();
}

#[tokio::test]
async fn test_backend_quit_on_exit() {
    let mut backend = launch(&[]).await;
    let mut events = backend.take_event_receiver().unwrap();
    backend.detach().await.unwrap();

    let quit = tokio::time::timeout(TIMEOUT, async {
        while let Some(event) = events.recv().await {
            if let BackendEvent::Quit { .. } = event {
                return true;
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(quit);
    assert!(backend.is_closed());
}

#[test]
fn test_config_file_round_trip() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[debugger]\npath = \"{}\"\n[session]\nrun_mode = \"continue\"",
        env!("CARGO_BIN_EXE_mock_mi")
    )
    .unwrap();
    let config = Config::load_from(file.path()).unwrap();
    assert_eq!(config.session.run_mode, RunMode::Continue);
    assert!(config.debugger.resolve_path().is_ok());
}
