//! Mock MI debugger for integration testing
//!
//! Speaks the multi-session dialect over stdin/stdout with canned program
//! state: one thread per session, a two-frame stack, two locals and a
//! handful of registers.
//!
//! Options (each also read from the environment):
//! - `--sessions` / `MOCK_MI_SESSIONS`: comma-separated session ids (default `1,2`)
//! - `--fail-sessions` / `MOCK_MI_FAIL_SESSIONS`: sessions whose `break-insert` fails

use std::io::{BufRead, BufReader, Write};

fn main() {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let reader = BufReader::new(stdin.lock());
    let mut writer = stdout.lock();

    let mut state = MockState::from_env();
    for line in state.startup() {
        send(&mut writer, &line);
    }

    for line in reader.lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            // Keepalive
            continue;
        }
        let Some(request) = Request::parse(line) else {
            send(&mut writer, &format!("&\"unparsed: {line}\\n\""));
            continue;
        };
        let replies = state.process(&request);
        for reply in replies {
            send(&mut writer, &reply);
        }
        send(&mut writer, "(gdb)");
        if state.exited {
            break;
        }
    }
}

fn send<W: Write>(writer: &mut W, line: &str) {
    writer.write_all(line.as_bytes()).ok();
    writer.write_all(b"\n").ok();
    writer.flush().ok();
}

/// Session ids from `--flag a,b` on the command line, else `var`, else `default`
fn session_list(flag: &str, var: &str, default: &str) -> Vec<u32> {
    let args: Vec<String> = std::env::args().collect();
    let from_args = args
        .iter()
        .position(|a| a == flag)
        .and_then(|pos| args.get(pos + 1).cloned());
    from_args
        .or_else(|| std::env::var(var).ok())
        .unwrap_or_else(|| default.to_string())
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

struct Request {
    token: String,
    command: String,
    args: Vec<String>,
}

impl Request {
    /// `TOKEN-command args`; raw `-command` lines get an empty token
    fn parse(line: &str) -> Option<Self> {
        let dash = line.find('-')?;
        let token = &line[..dash];
        if !token.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let mut words = split_args(&line[dash + 1..]);
        if words.is_empty() {
            return None;
        }
        let command = words.remove(0);
        Some(Self {
            token: token.to_string(),
            command,
            args: words,
        })
    }

    fn option(&self, name: &str) -> Option<&str> {
        let pos = self.args.iter().position(|a| a == name)?;
        self.args.get(pos + 1).map(String::as_str)
    }

    fn flag(&self, name: &str) -> bool {
        self.args.iter().any(|a| a == name)
    }

    /// Arguments that are neither switches nor switch values
    fn positional(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut skip = false;
        for arg in &self.args {
            if skip {
                skip = false;
                continue;
            }
            match arg.as_str() {
                "--session" | "--thread" | "--frame" | "-i" | "-c" => skip = true,
                a if a.starts_with("--") || a == "-t" || a == "-f" => {}
                a => out.push(a),
            }
        }
        out
    }

    fn done(&self, results: &str) -> String {
        if results.is_empty() {
            format!("{}^done", self.token)
        } else {
            format!("{}^done,{results}", self.token)
        }
    }

    fn running(&self) -> String {
        format!("{}^running", self.token)
    }

    fn error(&self, msg: &str) -> String {
        format!("{}^error,msg=\"{msg}\"", self.token)
    }
}

/// Whitespace split honouring double-quoted arguments
fn split_args(text: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut escaped = false;
    let mut started = false;
    for c in text.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if quoted => escaped = true,
            '"' => {
                quoted = !quoted;
                started = true;
            }
            c if c.is_whitespace() && !quoted => {
                if started || !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
                started = false;
            }
            c => current.push(c),
        }
    }
    if started || !current.is_empty() {
        args.push(current);
    }
    args
}

struct MockState {
    sessions: Vec<u32>,
    failing: Vec<u32>,
    next_breakpoint: u32,
    line: u32,
    exited: bool,
}

impl MockState {
    fn from_env() -> Self {
        Self {
            sessions: session_list("--sessions", "MOCK_MI_SESSIONS", "1,2"),
            failing: session_list("--fail-sessions", "MOCK_MI_FAIL_SESSIONS", ""),
            next_breakpoint: 1,
            line: 10,
            exited: false,
        }
    }

    /// Thread id of a session's only thread
    fn thread_of(session: u32) -> u32 {
        session
    }

    fn startup(&self) -> Vec<String> {
        let mut lines = vec!["=thread-group-added,id=\"i1\"".to_string()];
        for &sid in &self.sessions {
            lines.push(format!(
                "=thread-created,id=\"{}\",group-id=\"g{sid}\",session-id=\"{sid}\",session-alias=\"svc{sid}\"",
                Self::thread_of(sid)
            ));
        }
        lines.push("(gdb)".to_string());
        lines
    }

    fn frame(&self, level: u32, session: u32) -> String {
        let (func, line) = if level == 0 { ("work", self.line) } else { ("main", 30) };
        format!(
            "{{level=\"{level}\",addr=\"0x40{level}000\",func=\"{func}\",file=\"main.c\",fullname=\"/src/main.c\",line=\"{line}\",session=\"{session}\",thread=\"{}\"}}",
            Self::thread_of(session)
        )
    }

    fn stopped_threads(&self) -> String {
        let ids: Vec<String> = self
            .sessions
            .iter()
            .map(|&s| format!("\"{}\"", Self::thread_of(s)))
            .collect();
        format!("[{}]", ids.join(","))
    }

    fn process(&mut self, req: &Request) -> Vec<String> {
        let session: u32 = req
            .option("--session")
            .and_then(|s| s.parse().ok())
            .or_else(|| self.sessions.first().copied())
            .unwrap_or(1);
        let thread: u32 = req
            .option("--thread")
            .and_then(|t| t.parse().ok())
            .unwrap_or_else(|| Self::thread_of(session));

        match req.command.as_str() {
            "list-features" => vec![req.done("features=[\"exec-run-start-option\",\"data-read-memory-bytes\"]")],

            "break-insert" if req.flag("-t") && req.option("--session").is_none() => vec![req.done(&format!(
                "bkpt={{number=\"{}\",type=\"breakpoint\",disp=\"del\"}}",
                self.take_breakpoint()
            ))],
            "break-insert" => {
                if self.failing.contains(&session) {
                    return vec![req.error("No symbol table is loaded.")];
                }
                let location = req.positional().first().map(|s| s.to_string()).unwrap_or_default();
                // A bare name is a function; every function lives in main.c
                let (file, line) = location.rsplit_once(':').unwrap_or(("/src/main.c", "20"));
                vec![req.done(&format!(
                    "bkpt={{number=\"{}\",type=\"breakpoint\",enabled=\"y\",file=\"{file}\",fullname=\"{file}\",line=\"{line}\",session=\"{session}\"}}",
                    self.take_breakpoint()
                ))]
            }
            "break-delete" | "break-condition" | "break-commands" | "gdb-set" | "thread-select" => {
                vec![req.done("")]
            }

            "record-time-and-continue" | "exec-continue" => {
                self.line = 12;
                vec![
                    req.running(),
                    "*running,thread-id=\"all\"".to_string(),
                    format!(
                        "*stopped,reason=\"breakpoint-hit\",disp=\"keep\",bkptno=\"1\",thread-id=\"{}\",session-id=\"{session}\",stopped-threads={},frame={}",
                        Self::thread_of(session),
                        self.stopped_threads(),
                        self.frame(0, session)
                    ),
                ]
            }
            "record-time-and-next" | "record-time-and-step" | "record-time-and-finish" | "exec-next"
            | "exec-step" | "exec-finish" => {
                self.line += if req.flag("--reverse") { 0 } else { 1 };
                vec![
                    req.running(),
                    format!("*running,thread-id=\"{thread}\""),
                    format!(
                        "*stopped,reason=\"end-stepping-range\",thread-id=\"{thread}\",session-id=\"{session}\",stopped-threads=[\"{thread}\"],frame={}",
                        self.frame(0, session)
                    ),
                ]
            }
            "exec-interrupt" => vec![req.done("")],
            "exec-run" => vec![req.running(), "*running,thread-id=\"all\"".to_string()],
            "exec-jump" => {
                if let Some((_, line)) = req.positional().first().and_then(|l| l.rsplit_once(':')) {
                    self.line = line.parse().unwrap_or(self.line);
                }
                vec![req.running()]
            }

            "thread-info" => {
                let threads: Vec<String> = self
                    .sessions
                    .iter()
                    .map(|&s| {
                        format!(
                            "{{id=\"{}\",target-id=\"Thread 0x{s:x}\",name=\"svc{s}\",session-id=\"{s}\",state=\"stopped\"}}",
                            Self::thread_of(s)
                        )
                    })
                    .collect();
                vec![req.done(&format!("threads=[{}]", threads.join(",")))]
            }
            "bt-remote" | "stack-list-frames" => {
                let session = self
                    .sessions
                    .iter()
                    .copied()
                    .find(|&s| Self::thread_of(s) == thread)
                    .unwrap_or(session);
                vec![req.done(&format!(
                    "stack=[frame={},frame={}]",
                    self.frame(0, session),
                    self.frame(1, session)
                ))]
            }
            "stack-list-variables" => vec![req.done(
                "variables=[{name=\"count\",value=\"3\",type=\"int\"},{name=\"p\",value=\"{x = 1, y = 2}\",type=\"struct point\"}]",
            )],

            "var-create" => {
                let positional = req.positional();
                let name = positional.first().copied().unwrap_or("var");
                let expression = positional.get(2).copied().unwrap_or("");
                match expression {
                    "count" => vec![req.done(&format!(
                        "name=\"{name}\",numchild=\"0\",value=\"3\",type=\"int\",thread-id=\"{thread}\",has_more=\"0\""
                    ))],
                    "p" => vec![req.done(&format!(
                        "name=\"{name}\",numchild=\"2\",value=\"{{...}}\",type=\"struct point\",thread-id=\"{thread}\",has_more=\"0\""
                    ))],
                    other => vec![req.error(&format!("No symbol \\\"{other}\\\" in current context."))],
                }
            }
            "var-list-children" => {
                let parent = req.positional().first().map(|s| s.to_string()).unwrap_or_default();
                vec![req.done(&format!(
                    "numchild=\"2\",children=[child={{name=\"{parent}.x\",exp=\"x\",numchild=\"0\",value=\"1\",type=\"int\"}},child={{name=\"{parent}.y\",exp=\"y\",numchild=\"0\",value=\"2\",type=\"int\"}}],has_more=\"0\""
                ))]
            }
            "var-update" => vec![req.done("changelist=[]")],
            "var-assign" => {
                let value = req.positional().get(1).map(|s| s.to_string()).unwrap_or_default();
                vec![req.done(&format!("value=\"{value}\""))]
            }

            "data-evaluate-expression" => match req.positional().first().copied() {
                Some("count") => vec![req.done("value=\"3\"")],
                Some("p") => vec![req.done("value=\"{x = 1, y = 2}\"")],
                Some(other) => vec![req.error(&format!("No symbol \\\"{other}\\\" in current context."))],
                None => vec![req.error("-data-evaluate-expression: Usage: -data-evaluate-expression expression")],
            },
            "data-list-register-names" => vec![req.done("register-names=[\"rax\",\"rbx\",\"\",\"rip\"]")],
            "data-list-register-values" => vec![req.done(
                "register-values=[{number=\"0\",value=\"0x1\"},{number=\"1\",value=\"0x2\"},{number=\"2\",value=\"0x0\"},{number=\"3\",value=\"0x401000\"}]",
            )],
            "data-read-memory-bytes" => {
                let begin = req.positional().first().map(|s| s.to_string()).unwrap_or_default();
                vec![req.done(&format!(
                    "memory=[{{begin=\"{begin}\",offset=\"0x0\",end=\"{begin}\",contents=\"deadbeef\"}}]"
                ))]
            }
            "interpreter-exec" => {
                let text = req.positional().get(1).map(|s| s.to_string()).unwrap_or_default();
                vec![format!("~\"echo: {text}\\n\""), req.done("")]
            }

            "target-detach" | "gdb-exit" => {
                self.exited = true;
                vec![format!("{}^exit", req.token)]
            }

            other => vec![req.error(&format!("Undefined MI command: {other}"))],
        }
    }

    fn take_breakpoint(&mut self) -> u32 {
        let number = self.next_breakpoint;
        self.next_breakpoint += 1;
        number
    }
}
