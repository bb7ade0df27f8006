//! Variable objects
//!
//! A variable object is a debugger-side handle for one expression. The
//! bridge mirrors each one so it can be expanded lazily and refreshed with
//! `var-update` instead of being re-created on every stop.

use serde::Serialize;

use super::types::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableObject {
    /// Debugger-side object name (`var1`, `var_1000_x.field`)
    pub name: String,
    /// What the host shows as the variable name
    pub display_name: String,
    /// Full expression that evaluates to this value; fixed at construction
    pub expression: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub value: Option<String>,
    pub child_count: u32,
    pub thread_id: Option<i64>,
    pub frozen: bool,
    pub dynamic: bool,
    pub display_hint: Option<String>,
    pub has_more: bool,
    /// Host reference for expansion, 0 until registered
    pub handle: i64,
}

impl VariableObject {
    /// Build from a `var-create` reply or one `var-list-children` child
    ///
    /// `thread_id` overrides the node's own `thread-id` when given.
    pub fn from_node(node: &Value, thread_id: Option<i64>, parent: Option<&VariableObject>) -> Self {
        let own_exp = node.str_at("exp").unwrap_or_default().to_string();
        let expression = match parent {
            Some(parent) => child_expression(parent, &own_exp),
            None => own_exp.clone(),
        };

        Self {
            name: node.str_at("name").unwrap_or_default().to_string(),
            display_name: own_exp,
            expression,
            type_name: node.str_at("type").unwrap_or_default().to_string(),
            value: node.str_at("value").map(str::to_string),
            child_count: node
                .str_at("numchild")
                .and_then(|n| n.parse().ok())
                .unwrap_or(0),
            thread_id: thread_id.or_else(|| node.str_at("thread-id").and_then(|t| t.parse().ok())),
            frozen: flag(node, "frozen"),
            dynamic: flag(node, "dynamic"),
            display_hint: node.str_at("displayhint").map(str::to_string),
            has_more: flag(node, "has_more"),
            handle: 0,
        }
    }

    /// Refresh from one `var-update` changelist entry
    ///
    /// The expression never changes; the type only when the entry says so.
    pub fn apply_changes(&mut self, change: &Value) {
        self.value = change.str_at("value").map(str::to_string);
        if flag(change, "type_changed") {
            if let Some(new_type) = change.str_at("new_type") {
                self.type_name = new_type.to_string();
            }
        }
        self.dynamic = flag(change, "dynamic");
        self.display_hint = change.str_at("displayhint").map(str::to_string);
        self.has_more = flag(change, "has_more");
    }

    /// Whether the host should offer to expand this variable
    pub fn is_compound(&self) -> bool {
        self.child_count > 0
            || self.value.as_deref() == Some("{...}")
            || (self.dynamic && matches!(self.display_hint.as_deref(), Some("array" | "map")))
    }

    pub fn display_value(&self) -> &str {
        self.value.as_deref().unwrap_or("<unknown>")
    }
}

fn child_expression(parent: &VariableObject, own_exp: &str) -> String {
    let hint = parent.display_hint.as_deref();
    let ty = parent.type_name.as_str();

    if ty.ends_with("**") || ty.ends_with("[]") || hint == Some("array") {
        match array_index(own_exp) {
            Some(index) => format!("{}[{}]", parent.expression, index),
            None => format!("{}[0]", parent.expression),
        }
    } else if ty.ends_with('*') {
        format!("{}->{}", parent.expression, own_exp)
    } else if hint == Some("map") {
        format!("{}[{}]", parent.expression, own_exp)
    } else {
        format!("{}.{}", parent.expression, own_exp)
    }
}

/// `3` or `[3]` -> `3`
fn array_index(exp: &str) -> Option<&str> {
    let inner = exp.strip_prefix('[').unwrap_or(exp);
    let inner = inner.strip_suffix(']').unwrap_or(inner);
    (!inner.is_empty() && inner.bytes().all(|b| b.is_ascii_digit())).then_some(inner)
}

fn flag(node: &Value, key: &str) -> bool {
    matches!(node.str_at(key), Some(v) if !v.is_empty() && v != "0")
}
