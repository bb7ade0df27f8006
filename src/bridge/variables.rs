//! Variable references handed to the host
//!
//! Every expandable thing the host sees is an integer reference into this
//! table: a frame scope, a printed expression to split further, or a
//! variable object. Reverse maps keep one reference per scope key and per
//! variable-object name, so repeated requests hand out stable ids.

use std::collections::HashMap;

use crate::mi::{FrameRef, VariableObject};

const FIRST_HANDLE: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Locals,
    Registers,
}

impl ScopeKind {
    pub fn name(self) -> &'static str {
        match self {
            ScopeKind::Locals => "Locals",
            ScopeKind::Registers => "Registers",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VarRef {
    Scope { kind: ScopeKind, frame: FrameRef },
    /// Printed aggregate, split on demand
    Expression {
        expression: String,
        value: String,
        frame: FrameRef,
    },
    Object(VariableObject),
}

#[derive(Debug, Default)]
pub struct HandleTable {
    next: i64,
    entries: HashMap<i64, VarRef>,
    scopes: HashMap<String, i64>,
    objects: HashMap<String, i64>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next: FIRST_HANDLE,
            ..Default::default()
        }
    }

    fn allocate(&mut self, entry: VarRef) -> i64 {
        let handle = self.next;
        self.next += 1;
        self.entries.insert(handle, entry);
        handle
    }

    /// Reference for a frame scope; the same frame and kind always map to the
    /// same reference
    pub fn scope(&mut self, kind: ScopeKind, frame: FrameRef) -> i64 {
        let key = format!(
            "{}:{}:{}:{}",
            kind.name(),
            frame.thread_id,
            frame.level,
            frame.session_id
        );
        if let Some(&handle) = self.scopes.get(&key) {
            return handle;
        }
        let handle = self.allocate(VarRef::Scope { kind, frame });
        self.scopes.insert(key, handle);
        handle
    }

    pub fn expression(&mut self, expression: &str, value: &str, frame: FrameRef) -> i64 {
        self.allocate(VarRef::Expression {
            expression: expression.to_string(),
            value: value.to_string(),
            frame,
        })
    }

    /// Track a variable object, replacing any previous one of the same name
    ///
    /// Returns the object with its `handle` filled in.
    pub fn object(&mut self, mut var: VariableObject) -> VariableObject {
        let handle = match self.objects.get(&var.name) {
            Some(&handle) => handle,
            None => {
                let handle = self.next;
                self.next += 1;
                self.objects.insert(var.name.clone(), handle);
                handle
            }
        };
        var.handle = handle;
        self.entries.insert(handle, VarRef::Object(var.clone()));
        var
    }

    pub fn get(&self, handle: i64) -> Option<&VarRef> {
        self.entries.get(&handle)
    }

    pub fn object_by_name(&self, name: &str) -> Option<&VariableObject> {
        let handle = self.objects.get(name)?;
        match self.entries.get(handle) {
            Some(VarRef::Object(var)) => Some(var),
            _ => None,
        }
    }

    pub fn object_by_name_mut(&mut self, name: &str) -> Option<&mut VariableObject> {
        let handle = self.objects.get(name)?;
        match self.entries.get_mut(handle) {
            Some(VarRef::Object(var)) => Some(var),
            _ => None,
        }
    }

    /// Drop printed-expression references; they describe a stop that is over
    pub fn forget_expressions(&mut self) {
        self.entries
            .retain(|_, entry| !matches!(entry, VarRef::Expression { .. }));
    }
}

/// Debugger-side name for a local or watch expression in a scope
pub fn object_name(reference: i64, name: &str) -> String {
    format!("var_{reference}_{name}")
}

/// Whether a failed `var-update` means the object has to be created
pub fn is_missing_object(message: &str) -> bool {
    message == "Variable object not found" || message.ends_with("does not exist")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mi::{parse_line, Value};

    fn var(name: &str) -> VariableObject {
        let line = format!(r#"^done,name="{name}",numchild="1",value="{{...}}",type="struct s",exp="s""#);
        let node: Value = parse_line(&line).results_value();
        VariableObject::from_node(&node, Some(1), None)
    }

    #[test]
    fn test_scope_references_are_stable() {
        let mut table = HandleTable::new();
        let frame = FrameRef::new(1, 0, 2);
        let locals = table.scope(ScopeKind::Locals, frame);
        let registers = table.scope(ScopeKind::Registers, frame);
        assert_ne!(locals, registers);
        assert_eq!(table.scope(ScopeKind::Locals, frame), locals);
        assert_ne!(table.scope(ScopeKind::Locals, FrameRef::new(1, 1, 2)), locals);
        assert!(matches!(
            table.get(locals),
            Some(VarRef::Scope { kind: ScopeKind::Locals, .. })
        ));
    }

    #[test]
    fn test_object_keeps_handle_when_replaced() {
        let mut table = HandleTable::new();
        let first = table.object(var("var_1000_s"));
        let mut updated = var("var_1000_s");
        updated.value = Some("changed".into());
        let second = table.object(updated);
        assert_eq!(first.handle, second.handle);
        assert_eq!(
            table.object_by_name("var_1000_s").and_then(|v| v.value.as_deref()),
            Some("changed")
        );
    }

    #[test]
    fn test_forget_expressions_keeps_objects() {
        let mut table = HandleTable::new();
        let frame = FrameRef::new(1, 0, 1);
        let expr = table.expression("s", "{a = 1}", frame);
        let obj = table.object(var("var_x")).handle;
        table.forget_expressions();
        assert!(table.get(expr).is_none());
        assert!(table.get(obj).is_some());
    }

    #[test]
    fn test_missing_object_messages() {
        assert!(is_missing_object("Variable object not found"));
        assert!(is_missing_object("Variable object var_1_x does not exist"));
        assert!(!is_missing_object("No symbol \"x\" in current context."));
    }
}
