use serde_json::Value;

use crate::record::{Document, Role};

/// Which values a rename rule accepts under a candidate name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Any,
    Array,
}

impl Shape {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Array => value.is_array(),
        }
    }
}

/// Move the first present candidate field to `canonical`.
#[derive(Debug, Clone, Copy)]
pub struct RenameRule {
    pub canonical: &'static str,
    /// Checked in order; the first hit wins.
    pub candidates: &'static [&'static str],
    pub shape: Shape,
}

pub const RECORD_RULES: &[RenameRule] = &[RenameRule {
    canonical: "messages",
    candidates: &["conversations", "conversation", "message"],
    shape: Shape::Array,
}];

pub const MESSAGE_RULES: &[RenameRule] = &[
    RenameRule {
        canonical: "content",
        candidates: &["text", "value", "message"],
        shape: Shape::Any,
    },
    RenameRule {
        canonical: "role",
        candidates: &["from"],
        shape: Shape::Any,
    },
];

/// Apply `rules` to `doc`. A field that already has its canonical name is
/// left alone, together with any stale candidates next to it.
pub fn apply_rules(doc: &mut Document, rules: &[RenameRule]) -> bool {
    let mut changed = false;
    for rule in rules {
        if doc.contains_key(rule.canonical) {
            continue;
        }
        let found = rule
            .candidates
            .iter()
            .find(|name| doc.get(**name).is_some_and(|value| rule.shape.accepts(value)));
        if let Some(name) = found {
            if let Some(value) = doc.remove(*name) {
                doc.insert(rule.canonical.to_string(), value);
                changed = true;
            }
        }
    }
    changed
}

/// Canonicalize a ShareGPT-style record in place: conversation lists become
/// `messages`, message text becomes `content`, speakers become `role` with
/// values `system`, `user`, or `assistant` where recognised.
pub fn normalize_document(doc: &mut Document) -> bool {
    let mut changed = apply_rules(doc, RECORD_RULES);

    let Some(Value::Array(messages)) = doc.get_mut("messages") else {
        return changed;
    };
    for message in messages.iter_mut() {
        let Value::Object(message) = message else {
            continue;
        };
        changed |= apply_rules(message, MESSAGE_RULES);

        if let Some(Value::String(role)) = message.get_mut("role") {
            let canonical = Role::parse(role);
            if canonical.as_str() != role.as_str() {
                *role = canonical.as_str().to_string();
                changed = true;
            }
        }
    }
    changed
}
