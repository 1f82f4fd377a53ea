//! Diagnostic description of a state machine.

use std::collections::BTreeMap;
use std::fmt::Write;

use serde::Serialize;

/// A named node in a probe tree.
///
/// Probing has no effect on execution; it only describes what a machine and
/// its activities would do.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProbeScope {
    pub name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ProbeScope>,
}

impl ProbeScope {
    /// Creates an empty scope.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adds a child scope and returns it.
    pub fn create_scope(&mut self, name: impl Into<String>) -> &mut ProbeScope {
        let index = self.children.len();
        self.children.push(ProbeScope::new(name));
        &mut self.children[index]
    }

    /// Records a value on this scope.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Returns the first direct child with the given name.
    pub fn child(&self, name: &str) -> Option<&ProbeScope> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Renders the tree as indented text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        let _ = write!(out, "{:indent$}{}", "", self.name, indent = depth * 2);
        for (key, value) in &self.values {
            let _ = write!(out, " {key}={value}");
        }
        out.push('\n');
        for child in &self.children {
            child.render_into(out, depth + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_nested_scopes() {
        let mut root = ProbeScope::new("machine");
        let state = root.create_scope("Active");
        state.add("terminal", false);
        state.create_scope("publisher");

        let active = root.child("Active").unwrap();
        assert_eq!(active.values["terminal"], serde_json::json!(false));
        assert!(active.child("publisher").is_some());
        assert!(root.child("Done").is_none());
    }

    #[test]
    fn test_renders_indented_text() {
        let mut root = ProbeScope::new("machine");
        root.create_scope("Initial").create_scope("StartTest");

        assert_eq!(root.render(), "machine\n  Initial\n    StartTest\n");
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let json = serde_json::to_value(ProbeScope::new("leaf")).unwrap();
        assert_eq!(json, serde_json::json!({"name": "leaf"}));
    }
}
