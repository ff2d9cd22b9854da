//! Typed view of one dataset record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// A record as an ordered, mutable JSON object.
pub type Document = Map<String, Value>;

pub const ID_FIELD: &str = "custom_id";

/// Give `doc` a zero-padded `custom_id` derived from its input index unless
/// it already carries a string id. Returns true when an id was assigned.
pub fn ensure_custom_id(doc: &mut Document, index: u64) -> bool {
    if matches!(doc.get(ID_FIELD), Some(Value::String(_))) {
        return false;
    }
    doc.insert(ID_FIELD.to_string(), Value::String(format!("{index:020}")));
    true
}

/// One dataset entry: an ordered list of role-tagged messages plus whatever
/// other fields the input carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "custom_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(flatten)]
    pub extra: Document,
}

impl Record {
    pub fn from_document(doc: Document) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(doc))?)
    }

    /// Like [`Record::from_document`], but hands the document back when it
    /// does not decode.
    pub fn try_from_document(doc: Document) -> std::result::Result<Self, (Document, Error)> {
        let value = Value::Object(doc);
        match Self::deserialize(&value) {
            Ok(record) => Ok(record),
            Err(err) => {
                let doc = match value {
                    Value::Object(doc) => doc,
                    _ => Document::new(),
                };
                Err((doc, err.into()))
            }
        }
    }

    pub fn into_document(self) -> Result<Document> {
        match serde_json::to_value(self)? {
            Value::Object(doc) => Ok(doc),
            _ => Err(Error::pipeline("record did not serialize to an object")),
        }
    }

    /// Indices of messages that still lack a transformation, in order.
    pub fn pending(&self) -> impl Iterator<Item = usize> + '_ {
        self.messages
            .iter()
            .enumerate()
            .filter(|(_, message)| !message.is_transformed())
            .map(|(idx, _)| idx)
    }

    pub fn is_complete(&self) -> bool {
        self.messages.iter().all(Message::is_transformed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(
        default,
        alias = "translated_content",
        skip_serializing_if = "Option::is_none"
    )]
    pub transformed_content: Option<String>,
    #[serde(flatten)]
    pub extra: Document,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role: Some(role),
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Only a non-empty transformation counts as done.
    pub fn is_transformed(&self) -> bool {
        self.transformed_content.as_deref().is_some_and(|text| !text.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Unrecognised role, kept verbatim.
    Other(String),
}

const USER_ALIASES: &[&str] = &["user", "human"];
const ASSISTANT_ALIASES: &[&str] = &["assistant", "gpt", "model", "completion", "bot", "ai"];
const ASSISTANT_MODEL_PREFIXES: &[&str] = &["gpt-", "chatgpt", "claude", "gemini", "llama"];

impl Role {
    pub fn parse(value: &str) -> Self {
        let lower = value.trim().to_ascii_lowercase();
        if lower == "system" {
            Self::System
        } else if USER_ALIASES.contains(&lower.as_str()) {
            Self::User
        } else if ASSISTANT_ALIASES.contains(&lower.as_str())
            || ASSISTANT_MODEL_PREFIXES.iter().any(|prefix| lower.starts_with(prefix))
        {
            Self::Assistant
        } else {
            Self::Other(value.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Other(value) => value,
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Other(value) => value,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
