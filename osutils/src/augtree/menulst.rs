//! GRUB legacy menu.lst / grub.conf.
//!
//! Lines before the first `title` are global settings. Every following line
//! belongs to the section of the closest preceding `title`.

use anyhow::{ensure, Error};

use super::{push_piece, Node};

/// Commands whose arguments are a path followed by options.
const KERNEL_COMMANDS: [&str; 2] = ["kernel", "module"];

fn split_command(line: &str) -> (&str, Option<&str>) {
    let line = line.trim();
    match line.find(|c: char| c.is_whitespace() || c == '=') {
        Some(end) => {
            let rest = line[end + 1..].trim();
            (&line[..end], (!rest.is_empty()).then_some(rest))
        }
        None => (line, None),
    }
}

fn option_node(option: &str) -> Node {
    match option.split_once('=') {
        Some((key, value)) => Node::new(key, Some(value.to_string())),
        None => Node::new(option, None),
    }
}

fn parse_line(line: &str, raw: &str, in_title: bool) -> Node {
    if line.trim().is_empty() {
        return Node::new("#blank", None).with_raw(raw);
    }
    if let Some(comment) = line.trim_start().strip_prefix('#') {
        return Node::new("#comment", Some(comment.trim().to_string())).with_raw(raw);
    }

    let mut words = line.split_whitespace();
    if in_title {
        if let Some(command) = words.next().filter(|w| KERNEL_COMMANDS.contains(w)) {
            let path = words.next().map(str::to_string);
            return Node::new(command, path)
                .with_children(words.map(option_node).collect())
                .with_raw(raw);
        }
    }

    let (label, value) = split_command(line);
    Node::new(label, value.map(str::to_string)).with_raw(raw)
}

pub(super) fn parse(text: &str) -> Result<Vec<Node>, Error> {
    let mut nodes: Vec<Node> = Vec::new();
    let mut in_title = false;

    for raw in text.split_inclusive('\n') {
        let line = raw.trim_end_matches(['\n', '\r']);

        let mut words = line.split_whitespace();
        if words.next() == Some("title") {
            let value = line.trim_start()["title".len()..].trim();
            ensure!(!value.is_empty(), "Found a title without a name");
            nodes.push(Node::new("title", Some(value.to_string())).with_raw(raw));
            in_title = true;
            continue;
        }

        let node = parse_line(line, raw, in_title);
        match nodes.last_mut() {
            Some(title) if in_title => title.children.push(node),
            _ => nodes.push(node),
        }
    }

    Ok(nodes)
}

fn render_line(node: &Node, indent: &str, separator: char) -> Result<String, Error> {
    let line = match node.label.as_str() {
        "#blank" => String::new(),
        "#comment" => format!("# {}", node.value.as_deref().unwrap_or_default()),
        label if KERNEL_COMMANDS.contains(&label) && !indent.is_empty() => {
            let mut words = vec![label.to_string()];
            words.extend(node.value.clone());
            for option in &node.children {
                ensure!(
                    !option.label.contains(char::is_whitespace)
                        && !option
                            .value
                            .as_deref()
                            .is_some_and(|v| v.contains(char::is_whitespace)),
                    "Option '{}' of '{label}' contains whitespace",
                    option.label
                );
                words.push(match option.value {
                    Some(ref value) => format!("{}={value}", option.label),
                    None => option.label.clone(),
                });
            }
            words.join(" ")
        }
        label => match node.value {
            Some(ref value) => format!("{label}{separator}{value}"),
            None => label.to_string(),
        },
    };

    Ok(format!("{indent}{line}"))
}

pub(super) fn render(nodes: &[Node]) -> Result<String, Error> {
    let mut out = String::new();

    for node in nodes {
        match node.raw {
            Some(ref raw) => push_piece(&mut out, raw),
            None if node.label == "title" => {
                let name = node.value.as_deref().unwrap_or_default();
                ensure!(!name.trim().is_empty(), "Cannot render a title without a name");
                push_piece(&mut out, &format!("title {name}\n"));
            }
            None => {
                push_piece(&mut out, &render_line(node, "", '=')?);
                out.push('\n');
            }
        }

        if node.label != "title" {
            continue;
        }

        for child in &node.children {
            match child.raw {
                Some(ref raw) => push_piece(&mut out, raw),
                None => {
                    push_piece(&mut out, &render_line(child, "\t", ' ')?);
                    out.push('\n');
                }
            }
        }
    }

    Ok(out)
}
