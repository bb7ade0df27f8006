//! Log points
//!
//! A log point is a breakpoint whose message has `{expr}` placeholders. The
//! breakpoint carries one `print expr` command per placeholder; when it is
//! hit, the `$N = value` console lines that follow fill the placeholders in
//! order and one `Log Message: ...` line is produced.

use std::collections::HashMap;

use super::events::StopEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Slot(String),
}

/// A log message split into literal text and `{expr}` slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTemplate {
    segments: Vec<Segment>,
}

impl LogTemplate {
    /// Scan `message` for `{...}` spans
    ///
    /// Empty `{}` and an unclosed `{` stay literal text.
    pub fn parse(message: &str) -> Self {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut rest = message;

        while let Some(open) = rest.find('{') {
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) if close > 0 => {
                    text.push_str(&rest[..open]);
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Slot(after[..close].to_string()));
                    rest = &after[close + 1..];
                }
                Some(close) => {
                    text.push_str(&rest[..open + close + 2]);
                    rest = &after[close + 1..];
                }
                None => break,
            }
        }
        text.push_str(rest);
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        Self { segments }
    }

    /// Placeholder expressions in order of appearance
    pub fn expressions(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Slot(expr) => Some(expr.as_str()),
                Segment::Text(_) => None,
            })
            .collect()
    }

    pub fn slot_count(&self) -> usize {
        self.expressions().len()
    }

    /// Arguments for `break-commands`, one quoted `print` per placeholder
    pub fn print_commands(&self) -> Vec<String> {
        self.expressions()
            .into_iter()
            .map(|expr| format!("\"print {}\"", crate::mi::escape(expr)))
            .collect()
    }

    /// Fill slots in order; missing values leave the `{expr}` text
    pub fn render(&self, values: &[String]) -> String {
        let mut values = values.iter();
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(t) => out.push_str(t),
                Segment::Slot(expr) => match values.next() {
                    Some(v) => out.push_str(v),
                    None => {
                        out.push('{');
                        out.push_str(expr);
                        out.push('}');
                    }
                },
            }
        }
        out
    }
}

#[derive(Debug)]
struct PendingMessage {
    template: LogTemplate,
    remaining: usize,
    values: Vec<String>,
}

/// Log points registered with the debugger, keyed by (session, number)
#[derive(Debug, Default)]
pub struct LogPointTracker {
    registered: HashMap<(u32, u32), LogTemplate>,
    pending: Option<PendingMessage>,
}

impl LogPointTracker {
    pub fn register(&mut self, session_id: u32, number: u32, message: &str) {
        self.registered
            .insert((session_id, number), LogTemplate::parse(message));
    }

    pub fn unregister(&mut self, session_id: u32, number: u32) {
        self.registered.remove(&(session_id, number));
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }

    /// Arm substitution when a registered log point is hit
    ///
    /// A message without placeholders is complete immediately and returned.
    pub fn on_breakpoint_hit(&mut self, stop: &StopEvent) -> Option<String> {
        let number = stop.breakpoint_number()?;
        let template = match stop.session_id() {
            Some(session) => self.registered.get(&(session, number)),
            None => self
                .registered
                .iter()
                .find(|((_, n), _)| *n == number)
                .map(|(_, t)| t),
        }?
        .clone();

        let remaining = template.slot_count();
        if remaining == 0 {
            self.pending = None;
            return Some(format_message(&template.render(&[])));
        }
        self.pending = Some(PendingMessage {
            template,
            remaining,
            values: Vec::with_capacity(remaining),
        });
        None
    }

    /// Feed one console line; returns the finished message once every
    /// placeholder has a value
    pub fn on_console(&mut self, content: &str) -> Option<String> {
        let pending = self.pending.as_mut()?;
        let value = print_value(content)?;
        pending.values.push(value.to_string());
        pending.remaining -= 1;
        if pending.remaining > 0 {
            return None;
        }
        let done = self.pending.take()?;
        Some(format_message(&done.template.render(&done.values)))
    }
}

fn format_message(text: &str) -> String {
    format!("Log Message: {text}")
}

/// `$12 = value` -> `value`
fn print_value(content: &str) -> Option<&str> {
    let rest = content.strip_prefix('$')?;
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());
    let rest = rest.trim_start().strip_prefix('=')?;
    Some(rest.trim())
}
