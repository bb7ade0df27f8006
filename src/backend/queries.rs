//! Inspection and miscellaneous commands

use serde::Serialize;

use crate::common::{Error, Result};
use crate::mi::{escape, quote, Record, ResultClass, Value, VariableObject};

use super::Backend;

/// One entry of `thread-info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadEntry {
    pub id: i64,
    pub target_id: String,
    pub name: Option<String>,
    pub session_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    pub level: u32,
    pub address: Option<String>,
    pub function: Option<String>,
    pub file: Option<String>,
    pub fullname: Option<String>,
    pub line: Option<u32>,
    pub session_id: Option<u32>,
    pub thread_id: Option<i64>,
}

impl StackFrame {
    fn from_value(frame: &Value) -> Option<Self> {
        // `[frame={..},frame={..}]` and `[{..},{..}]` both show up
        let frame = match frame.get("frame") {
            Some(inner @ Value::Tuple(_)) => inner,
            _ => frame,
        };
        Some(Self {
            level: frame.str_at("level")?.parse().ok()?,
            address: frame.str_at("addr").map(str::to_string),
            function: frame.str_at("func").map(str::to_string),
            file: frame.str_at("file").map(str::to_string),
            fullname: frame.str_at("fullname").map(str::to_string),
            line: frame.str_at("line").and_then(|l| l.parse().ok()),
            session_id: frame.str_at("session").and_then(|s| s.parse().ok()),
            thread_id: frame.str_at("thread").and_then(|t| t.parse().ok()),
        })
    }

    /// Path to show for this frame, preferring the full path
    pub fn source_path(&self) -> Option<&str> {
        self.fullname.as_deref().or(self.file.as_deref())
    }
}

/// A local from `stack-list-variables`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalVariable {
    pub name: String,
    pub value: Option<String>,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterValue {
    pub number: u32,
    pub name: String,
    pub value: String,
}

/// ` --thread T --frame L`, or nothing when no thread is selected
fn frame_switch(thread_id: i64, level: u32) -> String {
    if thread_id > 0 {
        format!(" --thread {thread_id} --frame {level}")
    } else {
        String::new()
    }
}

impl Backend {
    pub async fn thread_info(&self) -> Result<Vec<ThreadEntry>> {
        let record = self.send_command("thread-info", false).await?;
        let Some(threads) = record.result("threads") else {
            return Ok(Vec::new());
        };
        Ok(threads
            .elements()
            .into_iter()
            .filter_map(|t| {
                Some(ThreadEntry {
                    id: t.str_at("id")?.parse().ok()?,
                    target_id: t.str_at("target-id").unwrap_or_default().to_string(),
                    name: t.str_at("name").or_else(|| t.str_at("details")).map(str::to_string),
                    session_id: t.str_at("session-id").and_then(|s| s.parse().ok()),
                })
            })
            .collect())
    }

    /// Backtrace of one thread
    pub async fn stack(&self, thread_id: i64) -> Result<Vec<StackFrame>> {
        let command = self.dialect.stack_command(thread_id);
        let record = self.send_command(&command, false).await?;
        let frames = record
            .result("stack")
            .ok_or_else(|| Error::unexpected_reply(&command, "missing stack"))?;
        Ok(frames
            .elements()
            .into_iter()
            .filter_map(StackFrame::from_value)
            .collect())
    }

    pub async fn stack_variables(&self, thread_id: i64, level: u32) -> Result<Vec<LocalVariable>> {
        let command = format!("stack-list-variables{} --all-values", frame_switch(thread_id, level));
        let record = self.send_command(&command, false).await?;
        let Some(variables) = record.result("variables") else {
            return Ok(Vec::new());
        };
        Ok(variables
            .elements()
            .into_iter()
            .filter_map(|v| {
                Some(LocalVariable {
                    name: v.str_at("name")?.to_string(),
                    value: v.str_at("value").map(str::to_string),
                    type_name: v.str_at("type").map(str::to_string),
                })
            })
            .collect())
    }

    pub async fn register_names(&self) -> Result<Vec<String>> {
        let record = self.send_command("data-list-register-names", false).await?;
        Ok(record
            .result("register-names")
            .map(|names| {
                names
                    .elements()
                    .into_iter()
                    .map(|n| n.as_str().unwrap_or_default().to_string())
                    .collect()
            })
            .unwrap_or_default())
    }

    /// `(number, value)` pairs in hex
    pub async fn register_values(&self, thread_id: i64, level: u32) -> Result<Vec<(u32, String)>> {
        let command = format!("data-list-register-values{} x", frame_switch(thread_id, level));
        let record = self.send_command(&command, false).await?;
        let Some(values) = record.result("register-values") else {
            return Ok(Vec::new());
        };
        Ok(values
            .elements()
            .into_iter()
            .filter_map(|v| Some((v.str_at("number")?.parse().ok()?, v.str_at("value")?.to_string())))
            .collect())
    }

    /// Register values joined with their names by register number
    pub async fn registers(&self, thread_id: i64, level: u32) -> Result<Vec<RegisterValue>> {
        let names = self.register_names().await?;
        let values = self.register_values(thread_id, level).await?;
        Ok(values
            .into_iter()
            .filter_map(|(number, value)| {
                let name = names.get(number as usize).filter(|n| !n.is_empty())?;
                Some(RegisterValue {
                    number,
                    name: name.clone(),
                    value,
                })
            })
            .collect())
    }

    pub async fn evaluate(&self, expression: &str, thread_id: i64, level: u32) -> Result<String> {
        let command = format!(
            "data-evaluate-expression{} \"{}\"",
            frame_switch(thread_id, level),
            escape(expression)
        );
        let record = self.send_command(&command, false).await?;
        value_of(&command, &record)
    }

    /// Hex dump of `length` bytes at `address`
    pub async fn examine_memory(&self, address: u64, length: usize) -> Result<String> {
        let command = format!("data-read-memory-bytes 0x{address:x} {length}");
        let record = self.send_command(&command, false).await?;
        record
            .result_str("memory[0].contents")
            .map(str::to_string)
            .ok_or_else(|| Error::unexpected_reply(&command, "missing memory contents"))
    }

    // === Variable objects ===

    /// Create a variable object for `expression` in the given frame
    pub async fn var_create(
        &self,
        name: &str,
        expression: &str,
        thread_id: i64,
        level: u32,
    ) -> Result<VariableObject> {
        let command = format!(
            "var-create{} {} @ \"{}\"",
            frame_switch(thread_id, level),
            quote(name),
            escape(expression)
        );
        let record = self.send_command(&command, false).await?;
        let thread = (thread_id > 0).then_some(thread_id);
        let mut var = VariableObject::from_node(&record.results_value(), thread, None);
        if var.display_name.is_empty() {
            var.display_name = expression.to_string();
            var.expression = expression.to_string();
        }
        Ok(var)
    }

    pub async fn var_list_children(&self, parent: &VariableObject) -> Result<Vec<VariableObject>> {
        let command = format!("var-list-children --all-values {}", quote(&parent.name));
        let record = self.send_command(&command, false).await?;
        let Some(children) = record.result("children") else {
            return Ok(Vec::new());
        };
        Ok(children
            .elements()
            .into_iter()
            .map(|child| VariableObject::from_node(child, parent.thread_id, Some(parent)))
            .collect())
    }

    /// Changelist entries for `name` and its children
    pub async fn var_update(&self, name: &str, thread_id: i64, level: u32) -> Result<Vec<Value>> {
        let command = format!(
            "var-update{} --all-values {}",
            frame_switch(thread_id, level),
            quote(name)
        );
        let record = self.send_command(&command, false).await?;
        Ok(record
            .result("changelist")
            .map(|list| list.elements().into_iter().cloned().collect())
            .unwrap_or_default())
    }

    pub async fn var_assign(&self, name: &str, value: &str) -> Result<String> {
        let command = format!("var-assign {} {}", quote(name), quote(value));
        let record = self.send_command(&command, false).await?;
        value_of(&command, &record)
    }

    // === Console ===

    pub async fn send_cli_command(&self, text: &str, thread_id: i64, level: u32) -> Result<Record> {
        let command = format!(
            "interpreter-exec{} console \"{}\"",
            frame_switch(thread_id, level),
            escape(text)
        );
        self.send_command(&command, false).await
    }

    /// Run what the user typed: a leading `-` means raw MI
    pub async fn send_user_input(&self, input: &str, thread_id: i64, level: u32) -> Result<Record> {
        match input.strip_prefix('-') {
            Some(mi) => self.send_command(mi, false).await,
            None => self.send_cli_command(input, thread_id, level).await,
        }
    }

    pub async fn set_variable(&self, name: &str, value: &str) -> Result<bool> {
        let record = self
            .send_command(&format!("gdb-set var {name}={value}"), false)
            .await?;
        Ok(record.is_class(ResultClass::Done))
    }

    /// Fetch and cache the debugger's feature list
    pub async fn list_features(&self) -> Result<Vec<String>> {
        let record = self.send_command("list-features", false).await?;
        let features: Vec<String> = record
            .result("features")
            .map(|list| {
                list.elements()
                    .into_iter()
                    .filter_map(|f| f.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        if let Ok(mut cached) = self.features.lock() {
            *cached = features.clone();
        }
        Ok(features)
    }

    /// Whether the last `list_features` reported `feature`
    pub fn supports(&self, feature: &str) -> bool {
        self.features
            .lock()
            .map(|f| f.iter().any(|x| x == feature))
            .unwrap_or(false)
    }
}

fn value_of(command: &str, record: &Record) -> Result<String> {
    record
        .result_str("value")
        .map(str::to_string)
        .ok_or_else(|| Error::unexpected_reply(command, "missing value"))
}
