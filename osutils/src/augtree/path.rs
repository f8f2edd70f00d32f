//! Path expressions addressing nodes of a tree.
//!
//! A path is a `/` separated list of segments. Each segment is a label, or
//! `*` for any label that does not start with `#`, followed by zero or more
//! predicates:
//!
//! - `[3]`: the third node among those selected so far (1-based)
//! - `[last()]`: the last node
//! - `[last()+1]`: never matches, used to append a node with `set`
//! - `[. = "v"]` or `[. = 'v']`: nodes whose value is `v`
//! - `[. =~ regexp('re')]`: nodes whose whole value matches `re`

use anyhow::{bail, ensure, Context, Error};
use regex::Regex;

#[derive(Debug, Clone)]
pub(super) enum Label {
    Name(String),
    Any,
}

#[derive(Debug, Clone)]
pub(super) enum Predicate {
    Index(usize),
    Last,
    LastPlusOne,
    ValueEq(String),
    ValueRegex(Regex),
}

#[derive(Debug, Clone)]
pub(super) struct Segment {
    pub label: Label,
    pub predicates: Vec<Predicate>,
}

impl Label {
    pub fn matches(&self, label: &str) -> bool {
        match self {
            Label::Name(name) => name == label,
            Label::Any => !label.starts_with('#'),
        }
    }
}

impl Predicate {
    /// Whether a node may be created to satisfy this predicate, given the
    /// number of siblings already carrying the label.
    pub fn allows_creation(&self, existing: usize) -> bool {
        match self {
            Predicate::Index(n) => *n == existing + 1,
            Predicate::LastPlusOne | Predicate::ValueEq(_) | Predicate::ValueRegex(_) => true,
            Predicate::Last => false,
        }
    }
}

/// Splits on `/` outside of brackets and quotes.
fn split_segments(path: &str) -> Result<Vec<&str>, Error> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in path.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => {
                ensure!(depth > 0, "Unbalanced ']' in path '{path}'");
                depth -= 1;
            }
            (None, '/') if depth == 0 => {
                segments.push(&path[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    ensure!(quote.is_none(), "Unterminated quote in path '{path}'");
    ensure!(depth == 0, "Unbalanced '[' in path '{path}'");
    segments.push(&path[start..]);

    Ok(segments)
}

fn unquote(text: &str) -> Option<&str> {
    let text = text.trim();
    let first = text.chars().next()?;
    if (first == '"' || first == '\'') && text.len() >= 2 && text.ends_with(first) {
        Some(&text[1..text.len() - 1])
    } else {
        None
    }
}

fn parse_predicate(text: &str) -> Result<Predicate, Error> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();

    if let Ok(n) = compact.parse::<usize>() {
        ensure!(n > 0, "Positions start at 1");
        return Ok(Predicate::Index(n));
    }

    match compact.as_str() {
        "last()" => return Ok(Predicate::Last),
        "last()+1" => return Ok(Predicate::LastPlusOne),
        _ => {}
    }

    let Some(rest) = text.trim().strip_prefix('.') else {
        bail!("Unsupported predicate '[{text}]'");
    };
    let rest = rest.trim_start();

    if let Some(rest) = rest.strip_prefix("=~") {
        let inner = rest
            .trim()
            .strip_prefix("regexp(")
            .and_then(|r| r.strip_suffix(')'))
            .with_context(|| format!("Expected regexp(...) in predicate '[{text}]'"))?;
        let pattern = unquote(inner)
            .with_context(|| format!("Expected a quoted regular expression in '[{text}]'"))?;
        let regex = Regex::new(&format!("^(?:{pattern})$"))
            .with_context(|| format!("Invalid regular expression '{pattern}'"))?;
        return Ok(Predicate::ValueRegex(regex));
    }

    if let Some(rest) = rest.strip_prefix('=') {
        let value =
            unquote(rest).with_context(|| format!("Expected a quoted value in '[{text}]'"))?;
        return Ok(Predicate::ValueEq(value.to_string()));
    }

    bail!("Unsupported predicate '[{text}]'")
}

fn parse_segment(text: &str) -> Result<Segment, Error> {
    let (label, mut rest) = match text.find('[') {
        Some(i) => (&text[..i], &text[i..]),
        None => (text, ""),
    };

    let label = label.trim();
    ensure!(!label.is_empty(), "Empty path segment in '{text}'");
    let label = match label {
        "*" => Label::Any,
        name => Label::Name(name.to_string()),
    };

    let mut predicates = Vec::new();
    while !rest.is_empty() {
        ensure!(rest.starts_with('['), "Unexpected text '{rest}' in segment");

        // Find the closing bracket outside quotes
        let mut quote: Option<char> = None;
        let mut end = None;
        for (i, c) in rest.char_indices().skip(1) {
            match (quote, c) {
                (Some(q), c) if c == q => quote = None,
                (Some(_), _) => {}
                (None, '\'' | '"') => quote = Some(c),
                (None, ']') => {
                    end = Some(i);
                    break;
                }
                _ => {}
            }
        }
        let end = end.with_context(|| format!("Unterminated predicate in '{text}'"))?;

        predicates.push(parse_predicate(&rest[1..end])?);
        rest = &rest[end + 1..];
    }

    Ok(Segment { label, predicates })
}

/// Parses a path expression into its segments.
pub(super) fn parse(path: &str) -> Result<Vec<Segment>, Error> {
    let trimmed = path.trim().trim_start_matches('/');
    ensure!(!trimmed.is_empty(), "Empty path");

    split_segments(trimmed)?
        .into_iter()
        .map(parse_segment)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse path '{path}'"))
}
