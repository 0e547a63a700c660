use std::io::{self, Write};

use save_schema::{Node, Value};

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

pub fn to_text(root: &Node) -> String {
    let mut buffer = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_document(root, &mut buffer);
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Write every child of `root` in save syntax, one assignment per line and
/// tab-indented blocks.
pub fn write_document<W: Write>(root: &Node, out: &mut W) -> io::Result<()> {
    for child in root.children() {
        write_node(child, 0, out)?;
    }
    Ok(())
}

fn write_node<W: Write>(node: &Node, depth: usize, out: &mut W) -> io::Result<()> {
    let indent = "\t".repeat(depth);
    match &node.value {
        Value::Scalar(_) | Value::Quoted(_) if node.is_bare() => {
            writeln!(out, "{indent}{}", render(&node.value))
        }
        Value::Scalar(_) | Value::Quoted(_) => {
            writeln!(out, "{indent}{}={}", node.key, render(&node.value))
        }
        Value::Block(children) if children.iter().all(is_bare_scalar) => {
            let items: Vec<_> = children.iter().map(|child| render(&child.value)).collect();
            let prefix = if node.is_bare() {
                String::new()
            } else {
                format!("{}=", node.key)
            };
            if items.is_empty() {
                writeln!(out, "{indent}{prefix}{{ }}")
            } else {
                writeln!(out, "{indent}{prefix}{{ {} }}", items.join(" "))
            }
        }
        Value::Block(children) => {
            if !node.is_bare() {
                writeln!(out, "{indent}{}=", node.key)?;
            }
            writeln!(out, "{indent}{{")?;
            for child in children {
                write_node(child, depth + 1, out)?;
            }
            writeln!(out, "{indent}}}")
        }
    }
}

fn is_bare_scalar(node: &Node) -> bool {
    node.is_bare() && node.as_scalar().is_some()
}

fn render(value: &Value) -> String {
    match value {
        Value::Quoted(text) => quote(text),
        Value::Scalar(text) if needs_quotes(text) => quote(text),
        Value::Scalar(text) => text.clone(),
        Value::Block(_) => String::new(),
    }
}

fn needs_quotes(text: &str) -> bool {
    text.is_empty()
        || text
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '=' | '{' | '}' | '#' | '"'))
}
