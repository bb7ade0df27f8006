//! Command handler for host requests
//!
//! Translates host commands into session operations. Events produced while
//! handling a command are collected for the caller to write after the
//! response.

use serde_json::json;

use crate::common::{config::Config, error::HostError, Error, Result};
use crate::registry::{HttpRegistry, SessionRegistry};

use super::protocol::{Command, HostEvent, LaunchArgs, Response};
use super::session::{launch_failure_events, DebugSession, SessionOptions, SessionState};

/// Handle a host command
pub async fn handle_command(
    session: &mut Option<DebugSession>,
    config: &Config,
    id: u64,
    command: Command,
    events: &mut Vec<HostEvent>,
) -> Response {
    match handle_command_inner(session, config, command, events).await {
        Ok(result) => Response::success(id, result),
        Err(e) => {
            tracing::debug!(id, error = %e, "Command failed");
            if e.is_fatal() {
                if let Some(mut sess) = session.take() {
                    tracing::warn!(error = %e, "Debugger lost, ending session");
                    events.extend(sess.abandon());
                }
            }
            Response::error(id, HostError::from(&e))
        }
    }
}

fn active(session: &mut Option<DebugSession>) -> Result<&mut DebugSession> {
    session.as_mut().ok_or(Error::SessionNotActive)
}

async fn launch_session(config: &Config, args: &LaunchArgs) -> Result<(String, DebugSession)> {
    let options = SessionOptions::resolve(config, args)?;
    let program = options.launch.program.display().to_string();
    Ok((program, DebugSession::launch(options).await?))
}

async fn handle_command_inner(
    session: &mut Option<DebugSession>,
    config: &Config,
    command: Command,
    events: &mut Vec<HostEvent>,
) -> Result<serde_json::Value> {
    match command {
        // === Session ===
        Command::Launch(args) => {
            if session.is_some() {
                return Err(Error::SessionAlreadyActive);
            }
            let (program, new_session) = match launch_session(config, &args).await {
                Ok(launched) => launched,
                Err(e) => {
                    events.extend(launch_failure_events(&e));
                    return Err(e);
                }
            };
            let dialect = new_session.backend().dialect();
            *session = Some(new_session);

            Ok(json!({
                "status": "launched",
                "debugger": program,
                "dialect": dialect,
            }))
        }

        Command::ConfigurationDone => {
            let sess = active(session)?;
            if sess.state() != SessionState::Configuring {
                return Err(Error::invalid_state("finish configuration", &sess.state().to_string()));
            }
            events.extend(sess.configuration_done().await?);
            Ok(json!({ "state": sess.state().to_string() }))
        }

        Command::Disconnect { terminate } => {
            let Some(mut sess) = session.take() else {
                return Err(Error::SessionNotActive);
            };
            events.extend(sess.disconnect(terminate).await?);
            Ok(json!({ "status": if terminate { "terminated" } else { "detached" } }))
        }

        Command::Sessions => {
            let registry = HttpRegistry::new(config.registry.url.clone())?;
            let sessions = registry.sessions().await?;
            Ok(json!({ "sessions": sessions }))
        }

        // === Breakpoints ===
        Command::SetBreakpoints {
            file,
            breakpoints,
            session_ids,
            source_modified,
        } => {
            let sess = active(session)?;
            let reconciled = sess
                .set_breakpoints(&file, &breakpoints, &session_ids, source_modified)
                .await?;
            events.push(HostEvent::BreakpointsChanged {
                breakpoints: reconciled.all,
            });
            Ok(json!({ "breakpoints": reconciled.file }))
        }

        Command::SetFunctionBreakpoints {
            breakpoints,
            session_ids,
        } => {
            let set = active(session)?
                .set_function_breakpoints(&breakpoints, &session_ids)
                .await?;
            Ok(json!({ "breakpoints": set }))
        }

        Command::ClearBreakpoints { path_prefix } => {
            let sess = active(session)?;
            let removed = sess.clear_breakpoints(&path_prefix).await?;
            events.push(HostEvent::BreakpointsChanged {
                breakpoints: sess.list_breakpoints(),
            });
            Ok(json!({ "removed": removed }))
        }

        Command::ListBreakpoints => {
            let sess = active(session)?;
            Ok(json!({ "breakpoints": sess.list_breakpoints() }))
        }

        // === Execution ===
        Command::Continue { session_id, reverse } => {
            let sess = active(session)?;
            let ok = sess.continue_execution(session_id, reverse).await?;
            Ok(json!({ "success": ok, "all_threads_continued": session_id.is_none() }))
        }

        Command::Next { thread_id, reverse } => {
            let ok = active(session)?.next(thread_id, reverse).await?;
            Ok(json!({ "success": ok }))
        }

        Command::StepIn { thread_id, reverse } => {
            let ok = active(session)?.step_in(thread_id, reverse).await?;
            Ok(json!({ "success": ok }))
        }

        Command::StepOut { thread_id, reverse } => {
            let ok = active(session)?.step_out(thread_id, reverse).await?;
            Ok(json!({ "success": ok }))
        }

        Command::Pause { session_id } => {
            let ok = active(session)?.pause(session_id).await?;
            Ok(json!({ "success": ok }))
        }

        Command::GotoTargets { file, line } => {
            let targets = active(session)?.goto_targets(&file, line);
            Ok(json!({ "targets": targets }))
        }

        Command::Goto { thread_id, target_id } => {
            let ok = active(session)?.goto(thread_id, target_id).await?;
            Ok(json!({ "success": ok }))
        }

        // === Inspection ===
        Command::Threads => {
            let threads = active(session)?.threads();
            Ok(json!({ "threads": threads }))
        }

        Command::StackTrace {
            thread_id,
            start_frame,
            levels,
        } => {
            let (frames, total) = active(session)?
                .stack_trace(thread_id, start_frame, levels)
                .await?;
            Ok(json!({ "stack_frames": frames, "total_frames": total }))
        }

        Command::Scopes { frame_id } => {
            let scopes = active(session)?.scopes(frame_id)?;
            Ok(json!({ "scopes": scopes }))
        }

        Command::Variables { reference } => {
            let variables = active(session)?.variables(reference).await?;
            Ok(json!({ "variables": variables }))
        }

        Command::Evaluate {
            expression,
            frame_id,
            context,
        } => {
            let result = active(session)?
                .evaluate(&expression, frame_id, context)
                .await?;
            Ok(serde_json::to_value(result)?)
        }

        Command::SetVariable {
            reference,
            name,
            value,
        } => {
            let value = active(session)?.set_variable(reference, &name, &value).await?;
            Ok(json!({ "value": value }))
        }

        Command::ReadMemory { address, count } => {
            let data = active(session)?.read_memory(address, count).await?;
            Ok(json!({ "address": format!("0x{address:x}"), "data": data }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{script, Dialect};
    use crate::bridge::session::Behaviour;

    fn scripted(replies: Vec<(&'static str, &'static str)>) -> Option<DebugSession> {
        let (backend, _peer) = script::backend(Dialect::Ddb, script::table(replies));
        Some(DebugSession::new(backend, Behaviour::default(), None).unwrap())
    }

    #[tokio::test]
    async fn test_commands_need_a_session() {
        let mut session = None;
        let mut events = Vec::new();
        let response = handle_command(
            &mut session,
            &Config::default(),
            7,
            Command::Threads,
            &mut events,
        )
        .await;
        assert!(!response.success);
        assert_eq!(response.id, 7);
        assert_eq!(response.error.unwrap().code, "SESSION_NOT_ACTIVE");
    }

    #[tokio::test]
    async fn test_launch_twice_is_rejected() {
        let mut session = scripted(Vec::new());
        let mut events = Vec::new();
        let response = handle_command(
            &mut session,
            &Config::default(),
            1,
            Command::Launch(Default::default()),
            &mut events,
        )
        .await;
        assert_eq!(response.error.unwrap().code, "SESSION_ALREADY_ACTIVE");
    }

    #[tokio::test]
    async fn test_set_breakpoints_reports_file_and_all() {
        let mut session = scripted(vec![("break-insert", r#"^done,bkpt={number="3"}"#)]);
        let mut events = Vec::new();
        let command: Command = serde_json::from_str(
            r#"{"type":"set_breakpoints","file":"/src/a.c","breakpoints":[{"line":4}],"session_ids":[2]}"#,
        )
        .unwrap();
        let response = handle_command(&mut session, &Config::default(), 2, command, &mut events).await;

        assert!(response.success);
        let result = response.result.unwrap();
        assert_eq!(result["breakpoints"][0]["id"], "/src/a.c|||4");
        assert_eq!(result["breakpoints"][0]["session_ids"], json!([2]));
        match events.as_slice() {
            [HostEvent::BreakpointsChanged { breakpoints }] => assert_eq!(breakpoints.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_set_function_breakpoints_reports_location() {
        let mut session = scripted(vec![(
            "break-insert",
            r#"^done,bkpt={number="4",func="main",file="main.c",fullname="/src/main.c",line="20"}"#,
        )]);
        let mut events = Vec::new();
        let command: Command = serde_json::from_str(
            r#"{"type":"set_function_breakpoints","breakpoints":[{"name":"main"}],"session_ids":[1]}"#,
        )
        .unwrap();
        let response = handle_command(&mut session, &Config::default(), 6, command, &mut events).await;

        let result = response.result.unwrap();
        let bp = &result["breakpoints"][0];
        assert_eq!(bp["name"], "main");
        assert_eq!(bp["verified"], true);
        assert_eq!(bp["file"], "/src/main.c");
        assert_eq!(bp["line"], 20);
        assert_eq!(bp["session_ids"], json!([1]));
    }

    #[tokio::test]
    async fn test_command_failure_maps_to_host_error() {
        let mut session = scripted(vec![("record-time-and-next", r#"^error,msg="Cannot find bounds of current function""#)]);
        let mut events = Vec::new();
        let response = handle_command(
            &mut session,
            &Config::default(),
            5,
            Command::Next {
                thread_id: 1,
                reverse: false,
            },
            &mut events,
        )
        .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, "COMMAND_FAILED");
        assert!(error.message.contains("Cannot find bounds"));
    }

    #[tokio::test]
    async fn test_failed_launch_reports_and_terminates() {
        let mut session = None;
        let mut events = Vec::new();
        let args = LaunchArgs {
            debugger: Some("/nonexistent/mi-debugger".to_string()),
            ..Default::default()
        };
        let response = handle_command(&mut session, &Config::default(), 1, Command::Launch(args), &mut events).await;

        assert_eq!(response.error.unwrap().code, "DEBUGGER_NOT_FOUND");
        assert!(session.is_none());
        match events.as_slice() {
            [HostEvent::Output { output: hint, .. }, HostEvent::Output { output: detail, .. }, HostEvent::Terminated] => {
                assert!(hint.starts_with("Could not start debugger process"));
                assert!(detail.contains("/nonexistent/mi-debugger"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lost_debugger_ends_session() {
        let (backend, peer) = script::backend(Dialect::Ddb, script::table(Vec::new()));
        let mut session = Some(DebugSession::new(backend, Behaviour::default(), None).unwrap());
        peer.abort();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !session.as_ref().unwrap().backend().is_closed() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let mut events = Vec::new();
        let response = handle_command(
            &mut session,
            &Config::default(),
            3,
            Command::Next {
                thread_id: 1,
                reverse: false,
            },
            &mut events,
        )
        .await;
        assert_eq!(response.error.unwrap().code, "PROCESS_EXITED");
        assert!(session.is_none());
        assert_eq!(events, vec![HostEvent::Terminated]);
    }

    #[tokio::test]
    async fn test_configuration_done_only_once() {
        let mut session = scripted(Vec::new());
        let mut events = Vec::new();
        let first = handle_command(&mut session, &Config::default(), 1, Command::ConfigurationDone, &mut events).await;
        assert!(first.success);
        assert_eq!(events.len(), 1);

        let second = handle_command(&mut session, &Config::default(), 2, Command::ConfigurationDone, &mut events).await;
        assert_eq!(second.error.unwrap().code, "INVALID_STATE");
    }
}
