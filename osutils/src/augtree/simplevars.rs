//! `key=value` files, including the fixed-size GRUB environment block.

use anyhow::{bail, ensure, Error};

use super::{push_piece, Node, PADDING};

/// Size of a GRUB environment block.
const ENV_BLOCK_SIZE: usize = 1024;

pub(super) fn parse(text: &str) -> Result<Vec<Node>, Error> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut nodes = Vec::with_capacity(lines.len());

    for (i, raw) in lines.iter().enumerate() {
        let line = raw.trim_end_matches(['\n', '\r']);

        if i + 1 == lines.len() && !line.is_empty() && line.chars().all(|c| c == '#') {
            nodes.push(Node::new(PADDING, None).with_raw(*raw));
        } else if line.trim().is_empty() {
            nodes.push(Node::new("#blank", None).with_raw(*raw));
        } else if let Some(comment) = line.trim_start().strip_prefix('#') {
            nodes.push(Node::new("#comment", Some(comment.trim().to_string())).with_raw(*raw));
        } else if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            ensure!(
                !key.is_empty() && !key.contains(char::is_whitespace),
                "Invalid variable name '{key}' on line {}",
                i + 1
            );
            nodes.push(Node::new(key, Some(value.to_string())).with_raw(*raw));
        } else {
            bail!("Unexpected content on line {}: '{line}'", i + 1);
        }
    }

    Ok(nodes)
}

pub(super) fn render(nodes: &[Node]) -> Result<String, Error> {
    let mut out = String::new();
    let mut pad = false;

    for node in nodes {
        if node.label == PADDING && node.raw.is_none() {
            pad = true;
            continue;
        }
        if let Some(ref raw) = node.raw {
            push_piece(&mut out, raw);
            continue;
        }

        let line = match node.label.as_str() {
            "#blank" => String::new(),
            "#comment" => format!("# {}", node.value.as_deref().unwrap_or_default()),
            label => {
                let value = node.value.as_deref().unwrap_or_default();
                ensure!(
                    !value.contains('\n'),
                    "Value of '{label}' spans several lines"
                );
                format!("{label}={value}")
            }
        };
        push_piece(&mut out, &line);
        out.push('\n');
    }

    if pad {
        ensure!(
            out.len() <= ENV_BLOCK_SIZE,
            "Environment block is {} bytes, exceeding {ENV_BLOCK_SIZE}",
            out.len()
        );
        out.push_str(&"#".repeat(ENV_BLOCK_SIZE - out.len()));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grubenv(vars: &str) -> String {
        let content = format!("# GRUB Environment Block\n{vars}");
        let padding = "#".repeat(ENV_BLOCK_SIZE - content.len());
        content + &padding
    }

    #[test]
    fn test_parse_grubenv() {
        let text = grubenv("saved_entry=abc\nkernelopts=root=/dev/sda1 ro quiet\n");
        let nodes = parse(&text).unwrap();

        let labels: Vec<_> = nodes.iter().map(|n| n.label.as_str()).collect();
        assert_eq!(labels, vec!["#comment", "saved_entry", "kernelopts", PADDING]);
        assert_eq!(nodes[2].value.as_deref(), Some("root=/dev/sda1 ro quiet"));
        assert_eq!(render(&nodes).unwrap(), text);
    }

    #[test]
    fn test_repad_after_edit() {
        let text = grubenv("kernelopts=root=/dev/sda1 ro\n");
        let mut nodes = parse(&text).unwrap();
        nodes[1].value = Some("root=/dev/sda1 ro quiet".into());
        nodes[1].raw = None;
        nodes[2].raw = None;

        let rendered = render(&nodes).unwrap();
        assert_eq!(rendered.len(), ENV_BLOCK_SIZE);
        assert_eq!(
            rendered,
            grubenv("kernelopts=root=/dev/sda1 ro quiet\n")
        );
    }

    #[test]
    fn test_block_overflow() {
        let nodes = vec![
            Node::new("big", Some("x".repeat(ENV_BLOCK_SIZE))),
            Node::new(PADDING, None),
        ];
        assert!(render(&nodes).is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("not a variable\n").is_err());
        assert!(parse("bad key=1\n").is_err());
    }
}
