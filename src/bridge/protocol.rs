//! Host protocol message types
//!
//! One JSON request per input line, one JSON response or event per output
//! line.

use serde::{Deserialize, Serialize};

use crate::backend::{Breakpoint, BreakpointSpec, Dialect, FunctionBreakpointSpec, OutputCategory};
use crate::common::config::StopAtEntry;
use crate::common::error::HostError;
use crate::mi::VariableObject;

/// Request from the host
#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    /// Echoed back on the response
    pub id: u64,
    pub command: Command,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<HostError>,
}

impl Response {
    pub fn success(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: u64, error: HostError) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(error),
        }
    }
}

/// Anything written to the host
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Response(Response),
    Event(HostEvent),
}

/// Per-launch overrides of the configured defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchArgs {
    pub debugger: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub dialect: Option<Dialect>,
    pub run_mode: Option<RunMode>,
    pub stop_at_entry: Option<StopAtEntry>,
    pub var_objects: Option<bool>,
    pub interrupt_on_breakpoint: Option<bool>,
}

/// What to do with the debuggee once configuration is done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Already running; continue every session
    Continue,
    /// Start the program
    Run,
    /// Leave it as is and report it paused
    #[default]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluateContext {
    #[default]
    Watch,
    Repl,
    Hover,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceBreakpoint {
    pub line: u32,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
}

impl SourceBreakpoint {
    pub fn to_spec(&self, file: &str) -> BreakpointSpec {
        BreakpointSpec {
            file: file.to_string(),
            line: self.line,
            condition: self.condition.clone(),
            hit_condition: self.hit_condition.clone(),
            log_message: self.log_message.clone(),
        }
    }
}

/// Commands the host can send
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    // === Session ===
    Launch(LaunchArgs),
    /// Breakpoints are in; apply the run mode
    ConfigurationDone,
    Disconnect {
        #[serde(default)]
        terminate: bool,
    },
    /// Live sessions from the registry
    Sessions,

    // === Breakpoints ===
    SetBreakpoints {
        file: String,
        breakpoints: Vec<SourceBreakpoint>,
        /// Empty means every known session
        #[serde(default)]
        session_ids: Vec<u32>,
        #[serde(default)]
        source_modified: bool,
    },
    /// Replaces every function breakpoint
    SetFunctionBreakpoints {
        breakpoints: Vec<FunctionBreakpointSpec>,
        #[serde(default)]
        session_ids: Vec<u32>,
    },
    ClearBreakpoints {
        path_prefix: String,
    },
    ListBreakpoints,

    // === Execution ===
    Continue {
        session_id: Option<u32>,
        #[serde(default)]
        reverse: bool,
    },
    Next {
        thread_id: i64,
        #[serde(default)]
        reverse: bool,
    },
    StepIn {
        thread_id: i64,
        #[serde(default)]
        reverse: bool,
    },
    StepOut {
        thread_id: i64,
        #[serde(default)]
        reverse: bool,
    },
    Pause {
        session_id: Option<u32>,
    },
    GotoTargets {
        file: String,
        line: u32,
    },
    Goto {
        thread_id: i64,
        target_id: i64,
    },

    // === Inspection ===
    Threads,
    StackTrace {
        thread_id: i64,
        #[serde(default)]
        start_frame: usize,
        levels: Option<usize>,
    },
    Scopes {
        frame_id: i64,
    },
    Variables {
        reference: i64,
    },
    Evaluate {
        expression: String,
        frame_id: Option<i64>,
        #[serde(default)]
        context: EvaluateContext,
    },
    SetVariable {
        reference: i64,
        name: String,
        value: String,
    },
    ReadMemory {
        address: u64,
        count: usize,
    },
}

/// Events pushed to the host
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    Initialized,
    Output {
        category: OutputCategory,
        output: String,
    },
    Stopped(StoppedEvent),
    Continued {
        thread_id: Option<i64>,
        all_threads_continued: bool,
    },
    Thread {
        reason: ThreadReason,
        thread_id: i64,
    },
    /// A session stopped at a source breakpoint
    BreakpointHit {
        session_id: Option<u32>,
        file: Option<String>,
        line: Option<u32>,
    },
    /// Backend truth for every tracked file
    BreakpointsChanged {
        breakpoints: Vec<HostBreakpoint>,
    },
    Exited {
        exit_code: i32,
    },
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadReason {
    Started,
    Exited,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoppedEvent {
    pub reason: String,
    pub thread_id: i64,
    pub all_threads_stopped: bool,
    pub preserve_focus_hint: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hit_breakpoint_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostBreakpoint {
    /// `file|||line`
    pub id: String,
    pub verified: bool,
    pub file: String,
    pub line: u32,
    pub session_ids: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_message: Option<String>,
}

impl From<&Breakpoint> for HostBreakpoint {
    fn from(bp: &Breakpoint) -> Self {
        Self {
            id: bp.id().to_string(),
            verified: bp.verified(),
            file: bp.file.clone(),
            line: bp.line,
            session_ids: bp.session_ids.clone(),
            condition: bp.condition.clone(),
            hit_condition: bp.hit_condition.clone(),
            log_message: bp.log_message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Thread {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    /// Packed frame handle
    pub id: i64,
    pub name: String,
    pub source: Option<String>,
    pub line: u32,
    pub session_id: u32,
    pub thread_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scope {
    pub name: String,
    pub variables_reference: i64,
    pub expensive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub variables_reference: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluate_name: Option<String>,
}

impl From<&VariableObject> for Variable {
    fn from(var: &VariableObject) -> Self {
        Self {
            name: var.display_name.clone(),
            value: var.display_value().to_string(),
            type_name: (!var.type_name.is_empty()).then(|| var.type_name.clone()),
            variables_reference: if var.is_compound() { var.handle } else { 0 },
            evaluate_name: Some(var.expression.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluateResult {
    pub result: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub variables_reference: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GotoTarget {
    pub id: i64,
    pub label: String,
    pub line: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set_breakpoints_request() {
        let request: Request = serde_json::from_str(
            r#"{"id":3,"command":{"type":"set_breakpoints","file":"/src/a.c","breakpoints":[{"line":10,"hit_condition":">2"}],"session_ids":[1,2]}}"#,
        )
        .unwrap();
        match request.command {
            Command::SetBreakpoints {
                file,
                breakpoints,
                session_ids,
                source_modified,
            } => {
                assert_eq!(file, "/src/a.c");
                assert_eq!(breakpoints[0].hit_condition.as_deref(), Some(">2"));
                assert_eq!(session_ids, vec![1, 2]);
                assert!(!source_modified);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_function_breakpoints_request() {
        let request: Request = serde_json::from_str(
            r#"{"id":4,"command":{"type":"set_function_breakpoints","breakpoints":[{"name":"main","condition":"argc > 1"}]}}"#,
        )
        .unwrap();
        match request.command {
            Command::SetFunctionBreakpoints {
                breakpoints,
                session_ids,
            } => {
                assert_eq!(breakpoints[0].name, "main");
                assert_eq!(breakpoints[0].condition.as_deref(), Some("argc > 1"));
                assert_eq!(breakpoints[0].hit_condition, None);
                assert!(session_ids.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_launch_defaults() {
        let request: Request =
            serde_json::from_str(r#"{"id":1,"command":{"type":"launch","run_mode":"continue"}}"#).unwrap();
        match request.command {
            Command::Launch(args) => {
                assert_eq!(args.run_mode, Some(RunMode::Continue));
                assert!(args.args.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_event_framing() {
        let message = Message::Event(HostEvent::Continued {
            thread_id: None,
            all_threads_continued: true,
        });
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"], "continued");
        assert_eq!(json["all_threads_continued"], true);

        let json = serde_json::to_value(Message::Response(Response::success(4, serde_json::json!({})))).unwrap();
        assert_eq!(json["type"], "response");
        assert_eq!(json["id"], 4);
        assert_eq!(json["success"], true);
    }
}
