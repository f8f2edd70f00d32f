//! Reconciliation of kernel and module option lists.
//!
//! A declared option list mixes plain options (`ro`, `console=ttyS0`) with
//! directives that pull in the options already on the system
//! (`:preserve:`), the options of the default boot entry (`:defaults:`),
//! remove options (`-:quiet`) or append options regardless of existing ones
//! (`!:console=tty0`).

use std::collections::HashSet;

use grubstate_api::{
    constants::{DEFAULTS, PRESERVE},
    options::{option_key, tokenize, OptionToken},
};

pub mod resolve;

pub use resolve::resolve;

/// Merges the declared option list `desired` into the options currently on
/// the system.
///
/// The result starts from `defaults` when `:defaults:` is declared and from
/// `system` when `:preserve:` is declared. Discards then remove matching
/// options, plain options replace the first option with the same name in
/// place (dropping any other option with that name) or are appended, and
/// `!:` options are appended unless already present verbatim. The result is
/// re-tokenized and stripped of exact duplicates.
pub fn merge<S: AsRef<str>>(system: &[S], desired: &[S], defaults: &[S]) -> Vec<String> {
    let system: Vec<&str> = system.iter().map(|o| o.as_ref().trim()).collect();
    let defaults: Vec<&str> = defaults.iter().map(|o| o.as_ref().trim()).collect();

    let mut seed_defaults = false;
    let mut preserve = false;
    let mut discards = Vec::new();
    let mut appends = Vec::new();
    let mut plain = Vec::new();
    for option in desired.iter().map(|o| o.as_ref().trim()) {
        match OptionToken::parse(option) {
            OptionToken::Defaults => seed_defaults = true,
            OptionToken::Preserve => preserve = true,
            OptionToken::Discard(payload) => discards.push(payload),
            OptionToken::Append(payload) => appends.push(payload),
            OptionToken::Plain(option) => plain.push(option),
        }
    }

    let mut result: Vec<&str> = if seed_defaults {
        defaults.clone()
    } else {
        Vec::new()
    };

    if preserve {
        let system_keys: HashSet<&str> = system.iter().map(|o| option_key(o).trim()).collect();
        result.retain(|o| !system_keys.contains(option_key(o).trim()));
        result.extend(system.iter().copied());
    }

    result.retain(|o| !discards.iter().any(|d| *d == *o || *d == option_key(o)));
    appends.retain(|a| !result.contains(a));

    // Options replacing an existing one keep its position
    let mut result: Vec<Option<&str>> = result.into_iter().map(Some).collect();
    let mut replaced: Vec<Option<&str>> = vec![None; result.len()];
    let mut added = Vec::new();
    for option in plain {
        let key = option_key(option);
        match result
            .iter()
            .position(|o| o.is_some_and(|o| option_key(o) == key))
        {
            Some(index) => {
                replaced[index] = Some(option);
                for slot in result.iter_mut() {
                    if slot.is_some_and(|o| option_key(o) == key) {
                        *slot = None;
                    }
                }
            }
            None => added.push(option),
        }
    }

    let merged = replaced
        .into_iter()
        .zip(result)
        .filter_map(|(replaced, kept)| replaced.or(kept))
        .chain(added)
        .chain(appends)
        .collect::<Vec<_>>()
        .join(" ");

    let mut seen = HashSet::new();
    tokenize(&merged)
        .into_iter()
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

/// Inputs of a desired-state computation for one option list.
#[derive(Debug, Clone, Copy)]
pub struct MergeRequest<'a> {
    /// Options currently on the system.
    pub current: &'a [String],

    /// Declared options, including directives.
    pub desired: &'a [String],

    /// Options that `:defaults:` expands to.
    pub defaults: &'a [String],

    /// Set when the entry is being created and should be seeded from the
    /// default entry if the declaration only preserves.
    pub seed_defaults_on_create: bool,
}

/// The normalized current options next to the options to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub current: Vec<String>,
    pub desired: Vec<String>,
}

impl MergeOutcome {
    pub fn insync(&self) -> bool {
        self.current == self.desired
    }
}

/// Computes the options to write for `request`. The same outcome is used to
/// decide whether the list is in sync and to write it, so both always agree.
pub fn compute_desired_merge(request: MergeRequest) -> MergeOutcome {
    let mut desired = request.desired.to_vec();
    let preserves = desired
        .iter()
        .any(|o| OptionToken::parse(o.trim()) == OptionToken::Preserve);
    if request.seed_defaults_on_create && preserves {
        desired.push(DEFAULTS.to_string());
    }

    MergeOutcome {
        current: merge(request.current, &[PRESERVE.to_string()], &[]),
        desired: merge(request.current, &desired, request.defaults),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn m(system: &[&str], desired: &[&str], defaults: &[&str]) -> Vec<String> {
        merge(&strings(system), &strings(desired), &strings(defaults))
    }

    #[test]
    fn test_plain_options_without_directives() {
        assert_eq!(m(&["ro", "quiet"], &["rhgb"], &[]), vec!["rhgb"]);
        assert_eq!(m(&[], &[], &["ro"]), Vec::<String>::new());
    }

    #[test]
    fn test_preserve_replaces_in_place() {
        assert_eq!(
            m(&["ro", "quiet", "console=tty0"], &[":preserve:", "console=ttyS0"], &[]),
            vec!["ro", "quiet", "console=ttyS0"]
        );
        assert_eq!(
            m(&["ro", "quiet"], &[":preserve:"], &[]),
            vec!["ro", "quiet"]
        );
    }

    #[test]
    fn test_replacement_drops_other_entries_with_the_same_key() {
        assert_eq!(
            m(
                &["console=tty0", "ro", "console=ttyS1"],
                &[":preserve:", "console=ttyS0"],
                &[]
            ),
            vec!["console=ttyS0", "ro"]
        );
    }

    #[test]
    fn test_repeated_key_in_declaration() {
        assert_eq!(
            m(
                &["ro", "console=tty1"],
                &[":preserve:", "console=tty0", "console=ttyS0,115200"],
                &[]
            ),
            vec!["ro", "console=tty0", "console=ttyS0,115200"]
        );
    }

    #[test]
    fn test_defaults() {
        assert_eq!(
            m(&["x=1"], &[":defaults:", "quiet"], &["ro", "rhgb"]),
            vec!["ro", "rhgb", "quiet"]
        );
    }

    #[test]
    fn test_defaults_only_yields_deduplicated_defaults() {
        let defaults = [
            "ro",
            "console=tty0",
            "quiet",
            "console=ttyS0,115200",
            "ro",
            "quiet",
        ];
        assert_eq!(
            m(&[], &[":defaults:"], &defaults),
            vec!["ro", "console=tty0", "quiet", "console=ttyS0,115200"]
        );
        // The current options play no part without :preserve:
        assert_eq!(
            m(&["rhgb"], &[":defaults:"], &defaults),
            vec!["ro", "console=tty0", "quiet", "console=ttyS0,115200"]
        );
    }

    #[test]
    fn test_discards() {
        assert_eq!(
            m(&["ro", "quiet", "rhgb"], &[":preserve:", "-:quiet"], &[]),
            vec!["ro", "rhgb"]
        );
        assert_eq!(
            m(
                &["console=tty0", "console=ttyS0", "ro"],
                &[":preserve:", "-:console"],
                &[]
            ),
            vec!["ro"]
        );
        assert_eq!(
            m(
                &["console=tty0", "console=ttyS0", "ro"],
                &[":preserve:", "-:console=tty0"],
                &[]
            ),
            vec!["console=ttyS0", "ro"]
        );
    }

    #[test]
    fn test_appends() {
        assert_eq!(
            m(&["console=tty0"], &[":preserve:", "!:console=ttyS0"], &[]),
            vec!["console=tty0", "console=ttyS0"]
        );
        assert_eq!(
            m(&["console=tty0"], &[":preserve:", "!:console=tty0"], &[]),
            vec!["console=tty0"]
        );
    }

    #[test]
    fn test_dedupe_and_tokenize() {
        assert_eq!(
            m(&["ro quiet", "ro"], &[":preserve:"], &[]),
            vec!["ro", "quiet"]
        );
        assert_eq!(
            m(&[r#"rd.lvm.lv="vg/root lv""#], &[":preserve:", " quiet "], &[]),
            vec![r#"rd.lvm.lv="vg/root lv""#, "quiet"]
        );
    }

    #[test]
    fn test_merge_is_idempotent() {
        let system = strings(&["ro", "console=tty0", "quiet"]);
        let desired = strings(&[":preserve:", "console=ttyS0", "-:quiet", "!:splash"]);
        let once = merge(&system, &desired, &[]);
        let twice = merge(&once, &desired, &[]);
        assert_eq!(once, twice);
        assert_eq!(merge(&once, &strings(&[":preserve:"]), &[]), once);
    }

    #[test]
    fn test_compute_desired_merge() {
        let current = strings(&["ro", "quiet"]);
        let desired = strings(&[":preserve:", "quiet"]);
        let defaults = strings(&["rhgb", "ro"]);

        let outcome = compute_desired_merge(MergeRequest {
            current: &current,
            desired: &desired,
            defaults: &defaults,
            seed_defaults_on_create: false,
        });
        assert!(outcome.insync());
        assert_eq!(outcome.desired, vec!["ro", "quiet"]);

        let outcome = compute_desired_merge(MergeRequest {
            current: &[],
            desired: &desired,
            defaults: &defaults,
            seed_defaults_on_create: true,
        });
        assert_eq!(outcome.desired, vec!["rhgb", "ro", "quiet"]);
        assert!(!outcome.insync());

        // Seeding only applies when the declaration preserves
        let declared = strings(&["console=ttyS0"]);
        let outcome = compute_desired_merge(MergeRequest {
            current: &[],
            desired: &declared,
            defaults: &defaults,
            seed_defaults_on_create: true,
        });
        assert_eq!(outcome.desired, vec!["console=ttyS0"]);
    }
}
