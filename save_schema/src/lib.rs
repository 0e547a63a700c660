//! Generic attribute tree shared by the save parser, the writer and the
//! world transcription code.
//!
//! Every Paradox-style text file (saves, definition files, mapping files)
//! parses into the same shape: a [`Node`] holds a key and either a scalar
//! value or an ordered list of child nodes. Bare items inside a block
//! (`{ 1 2 3 }` or an anonymous `{ ... }`) are stored as nodes with an empty
//! key.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Scalar(String),
    /// A scalar the writer always emits in quotes.
    Quoted(String),
    Block(Vec<Node>),
}

impl Value {
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Value::Scalar(text) | Value::Quoted(text) => Some(text.as_str()),
            Value::Block(_) => None,
        }
    }

    pub fn as_block(&self) -> Option<&[Node]> {
        match self {
            Value::Scalar(_) | Value::Quoted(_) => None,
            Value::Block(children) => Some(children.as_slice()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub key: String,
    pub value: Value,
}

impl Node {
    pub fn scalar(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Value::Scalar(value.into()),
        }
    }

    /// A scalar written as a quoted string regardless of its contents.
    pub fn quoted(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Value::Quoted(value.into()),
        }
    }

    pub fn block(key: impl Into<String>, children: Vec<Node>) -> Self {
        Self {
            key: key.into(),
            value: Value::Block(children),
        }
    }

    /// A keyless scalar, as found in value lists such as `traits = { 1 4 }`.
    pub fn leaf(value: impl Into<String>) -> Self {
        Self::scalar(String::new(), value)
    }

    /// The unnamed block that wraps a whole document.
    pub fn root(children: Vec<Node>) -> Self {
        Self::block(String::new(), children)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_bare(&self) -> bool {
        self.key.is_empty()
    }

    pub fn as_scalar(&self) -> Option<&str> {
        self.value.as_scalar()
    }

    /// Child nodes of a block; empty for scalars.
    pub fn children(&self) -> &[Node] {
        self.value.as_block().unwrap_or(&[])
    }

    /// First child with the given key.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.children().iter().find(|child| child.key == key)
    }

    /// Every child with the given key, in document order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children().iter().filter(move |child| child.key == key)
    }

    /// Scalar value of the first child with the given key.
    pub fn get_scalar(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Node::as_scalar)
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get_scalar(key).and_then(|raw| raw.trim().parse().ok())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get_scalar(key).and_then(|raw| raw.trim().parse().ok())
    }

    /// Keyless scalar children, e.g. the members of `{ 5 6 7 }`.
    pub fn leaves(&self) -> impl Iterator<Item = &str> + '_ {
        self.children()
            .iter()
            .filter(|child| child.is_bare())
            .filter_map(Node::as_scalar)
    }

    pub fn push(&mut self, child: Node) {
        match &mut self.value {
            Value::Block(children) => children.push(child),
            Value::Scalar(_) | Value::Quoted(_) => self.value = Value::Block(vec![child]),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
