//! Shell variable files such as /etc/default/grub.

use anyhow::{bail, ensure, Error};
use lazy_static::lazy_static;
use regex::Regex;

use super::{push_piece, Node};

lazy_static! {
    static ref ASSIGNMENT: Regex =
        Regex::new(r"^\s*(export\s+)?([A-Za-z_][A-Za-z0-9_]*)=(.*)$").unwrap();
}

/// Returns the byte index of the quote closing the one at the start of
/// `value`. Double quotes honour backslash escapes.
fn closing_quote(value: &str) -> Option<usize> {
    let quote = value.chars().next()?;
    let mut escaped = false;
    for (i, c) in value.char_indices().skip(1) {
        match c {
            '\\' if quote == '"' && !escaped => escaped = true,
            c if c == quote && !escaped => return Some(i),
            _ => escaped = false,
        }
    }
    None
}

fn is_quote(c: char) -> bool {
    c == '"' || c == '\''
}

/// Splits an assignment value into the value proper and whatever follows it.
fn split_value(text: &str) -> (&str, &str) {
    if text.starts_with(is_quote) {
        if let Some(close) = closing_quote(text) {
            return text.split_at(close + 1);
        }
    }
    match text.find(char::is_whitespace) {
        Some(end) => text.split_at(end),
        None => (text, ""),
    }
}

fn comment_node(line: &str, raw: &str) -> Node {
    let text = line.trim_start().trim_start_matches('#').trim();
    Node::new("#comment", Some(text.to_string())).with_raw(raw)
}

fn list_children(value: &str) -> Vec<Node> {
    let (quote, inner) = match value.chars().next() {
        Some(q) if is_quote(q) && value.len() >= 2 => (q.to_string(), &value[1..value.len() - 1]),
        _ => (String::new(), value),
    };

    std::iter::once(Node::new("quote", Some(quote)))
        .chain(
            inner
                .split_whitespace()
                .map(|word| Node::new("value", Some(word.to_string()))),
        )
        .collect()
}

pub(super) fn parse(text: &str, list: bool) -> Result<Vec<Node>, Error> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut nodes = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let raw_line = lines[i];
        let line = raw_line.trim_end_matches(['\n', '\r']);
        i += 1;

        if line.trim().is_empty() {
            nodes.push(Node::new("#blank", None).with_raw(raw_line));
            continue;
        }
        if line.trim_start().starts_with('#') {
            nodes.push(comment_node(line, raw_line));
            continue;
        }

        let Some(captures) = ASSIGNMENT.captures(line) else {
            nodes.push(Node::new("#verbatim", Some(line.to_string())).with_raw(raw_line));
            continue;
        };

        let export = captures.get(1).is_some();
        let name = captures[2].to_string();
        let mut raw = raw_line.to_string();
        let mut value_text = captures[3].to_string();

        // Quoted values may span lines
        if value_text.starts_with(is_quote) {
            while closing_quote(&value_text).is_none() {
                let Some(next) = lines.get(i) else {
                    bail!("Unterminated quoted value for '{name}'");
                };
                value_text.push('\n');
                value_text.push_str(next.trim_end_matches(['\n', '\r']));
                raw.push_str(next);
                i += 1;
            }
        }

        let (value, rest) = split_value(&value_text);
        let rest = rest.trim();
        if !rest.is_empty() && !rest.starts_with('#') {
            // Not a plain assignment, e.g. `VAR=x command`
            nodes.push(Node::new("#verbatim", Some(line.to_string())).with_raw(raw));
            continue;
        }

        let mut children = Vec::new();
        if export {
            children.push(Node::new("export", None));
        }

        let node = if list {
            children.extend(list_children(value));
            Node::new(name, None)
        } else {
            Node::new(name, Some(value.to_string()))
        };
        nodes.push(node.with_children(children).with_raw(raw));
    }

    Ok(nodes)
}

fn render_value(node: &Node) -> Result<String, Error> {
    let Some(ref value) = node.value else {
        return Ok(String::new());
    };

    if value.starts_with(is_quote) {
        ensure!(
            closing_quote(value) == Some(value.len() - 1),
            "Unbalanced quotes in value of '{}': {value}",
            node.label
        );
    } else {
        ensure!(
            !value.contains(char::is_whitespace),
            "Value of '{}' contains whitespace but is not quoted: {value}",
            node.label
        );
    }
    Ok(value.clone())
}

fn render_list(node: &Node) -> Result<String, Error> {
    let quote = node
        .children
        .iter()
        .find(|c| c.label == "quote")
        .and_then(|c| c.value.clone())
        .unwrap_or_default();
    let values: Vec<&str> = node
        .children
        .iter()
        .filter(|c| c.label == "value")
        .filter_map(|c| c.value.as_deref())
        .collect();

    ensure!(
        !quote.is_empty() || values.len() <= 1,
        "Value list of '{}' has several words but is not quoted",
        node.label
    );
    if let Some(word) = values.iter().find(|w| w.contains(char::is_whitespace)) {
        bail!("Word '{word}' of '{}' contains whitespace", node.label);
    }

    Ok(format!("{quote}{}{quote}", values.join(" ")))
}

pub(super) fn render(nodes: &[Node], list: bool) -> Result<String, Error> {
    let mut out = String::new();

    for node in nodes {
        if let Some(ref raw) = node.raw {
            push_piece(&mut out, raw);
            continue;
        }

        let line = match node.label.as_str() {
            "#blank" => String::new(),
            "#comment" => format!("# {}", node.value.as_deref().unwrap_or_default()),
            "#verbatim" => node.value.clone().unwrap_or_default(),
            label => {
                let export = if node.children.iter().any(|c| c.label == "export") {
                    "export "
                } else {
                    ""
                };
                let value = if list {
                    render_list(node)?
                } else {
                    render_value(node)?
                };
                format!("{export}{label}={value}")
            }
        };
        push_piece(&mut out, &line);
        out.push('\n');
    }

    Ok(out)
}
