//! Kernel and module option tokens.

use lazy_static::lazy_static;
use regex::Regex;

use crate::constants::{APPEND_PREFIX, DEFAULTS, DISCARD_PREFIX, PRESERVE};

lazy_static! {
    /// A `key="quoted value"` pair, a `key=value` pair or a bare word.
    static ref OPTION_TOKEN: Regex = Regex::new(r#"\S+=(?:".+?"|\S+)|\S+"#).unwrap();
}

/// A single entry of a declared option list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionToken<'a> {
    /// `:defaults:`
    Defaults,
    /// `:preserve:`
    Preserve,
    /// `-:name` or `-:name=value`, carrying the payload after the prefix.
    Discard(&'a str),
    /// `!:name` or `!:name=value`, carrying the payload after the prefix.
    Append(&'a str),
    /// `name` or `name=value`.
    Plain(&'a str),
}

impl<'a> OptionToken<'a> {
    pub fn parse(raw: &'a str) -> Self {
        match raw {
            DEFAULTS => OptionToken::Defaults,
            PRESERVE => OptionToken::Preserve,
            _ => {
                if let Some(payload) = raw.strip_prefix(DISCARD_PREFIX) {
                    OptionToken::Discard(payload)
                } else if let Some(payload) = raw.strip_prefix(APPEND_PREFIX) {
                    OptionToken::Append(payload)
                } else {
                    OptionToken::Plain(raw)
                }
            }
        }
    }

    pub fn is_directive(&self) -> bool {
        !matches!(self, OptionToken::Plain(_))
    }
}

/// Returns the name of an option, i.e. the text before the first `=`.
pub fn option_key(option: &str) -> &str {
    option.split_once('=').map_or(option, |(key, _)| key)
}

/// Splits option text on whitespace, keeping `key="quoted value"` together.
pub fn tokenize(text: &str) -> Vec<String> {
    OPTION_TOKEN
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Returns whether the list contains both `:defaults:` and `:preserve:`.
pub fn has_conflicting_directives<S: AsRef<str>>(options: &[S]) -> bool {
    let mut defaults = false;
    let mut preserve = false;
    for option in options {
        match OptionToken::parse(option.as_ref().trim()) {
            OptionToken::Defaults => defaults = true,
            OptionToken::Preserve => preserve = true,
            _ => {}
        }
    }
    defaults && preserve
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(OptionToken::parse(":defaults:"), OptionToken::Defaults);
        assert_eq!(OptionToken::parse(":preserve:"), OptionToken::Preserve);
        assert_eq!(OptionToken::parse("-:quiet"), OptionToken::Discard("quiet"));
        assert_eq!(
            OptionToken::parse("!:console=ttyS0"),
            OptionToken::Append("console=ttyS0")
        );
        assert_eq!(OptionToken::parse("ro"), OptionToken::Plain("ro"));
        assert!(!OptionToken::parse("a=b").is_directive());
        assert!(OptionToken::parse("-:a").is_directive());
    }

    #[test]
    fn test_option_key() {
        assert_eq!(option_key("root=/dev/sda1"), "root");
        assert_eq!(option_key("quiet"), "quiet");
        assert_eq!(option_key("a=b=c"), "a");
        assert_eq!(option_key("=x"), "");
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize(r#"ro  quiet rd.lvm.lv="vg/root lv" console=ttyS0"#),
            vec!["ro", "quiet", r#"rd.lvm.lv="vg/root lv""#, "console=ttyS0"]
        );
        assert_eq!(tokenize("   "), Vec::<String>::new());
        assert_eq!(tokenize(r#"a="unterminated b"#), vec![r#"a="unterminated"#, "b"]);
    }

    #[test]
    fn test_conflicting_directives() {
        assert!(has_conflicting_directives(&[":defaults:", "ro", ":preserve:"]));
        assert!(!has_conflicting_directives(&[":defaults:", "ro"]));
        assert!(!has_conflicting_directives::<&str>(&[]));
    }
}
