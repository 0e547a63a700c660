//! Text plumbing for Paradox-style save and definition files.
//!
//! This crate re-exports the attribute tree from `save_schema` and adds the
//! tokenizer/parser that produces it and the writer that turns a tree back
//! into save syntax. Nothing here knows about CK2 or EU3 semantics.

pub use save_schema::*;

mod text;
mod writer;

pub use text::{parse_file, parse_str, ParseError, SyntaxError};
pub use writer::{to_text, write_document};
