//! Boot Loader Specification snippets under /boot/loader/entries.

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Error};
use lazy_static::lazy_static;
use log::{debug, trace};
use regex::{Captures, Regex};

use grubstate_api::{
    constants::{BLS_ENTRIES_DIRECTORY, GRUBENV_PATH, MANAGED_MARKER},
    options::tokenize,
};
use osutils::{files, path::join_relative};

use super::{AuthorizedUsers, MenuEntry};

lazy_static! {
    static ref VERSION_PIECE: Regex = Regex::new(r"[-.]|\d+|[^-.\d]+").unwrap();
    static ref ENV_ASSIGNMENT: Regex = Regex::new(r"^(.+?)=(.+)$").unwrap();
    static ref KEY_VALUE: Regex = Regex::new(r"^(\S+)(?:\s+(.+))?$").unwrap();
}

/// Keywords whose values are collected from every line they appear on.
const GRUB_USERS: &str = "grub_users";
const GRUB_ARG: &str = "grub_arg";
const GRUB_CLASS: &str = "grub_class";

/// Token left in place when `grub_users` refers to the environment list.
const INHERITED_USERS: &str = "$grub_users";

const UNRESTRICTED_ARG: &str = "--unrestricted";

fn is_digits(piece: &str) -> bool {
    piece.bytes().all(|b| b.is_ascii_digit())
}

/// Compares two version strings the way package managers do: runs of digits
/// compare numerically, `-` sorts before `.` which sorts before anything
/// else.
pub fn versioncmp(a: &str, b: &str) -> Ordering {
    let mut left = VERSION_PIECE.find_iter(a).map(|m| m.as_str());
    let mut right = VERSION_PIECE.find_iter(b).map(|m| m.as_str());

    while let (Some(x), Some(y)) = (left.next(), right.next()) {
        if x == y {
            continue;
        }
        let ordering = match (x, y) {
            ("-", _) => Ordering::Less,
            (_, "-") => Ordering::Greater,
            (".", _) => Ordering::Less,
            (_, ".") => Ordering::Greater,
            (x, y) if is_digits(x) && is_digits(y) => {
                if x.starts_with('0') || y.starts_with('0') {
                    x.to_uppercase().cmp(&y.to_uppercase())
                } else {
                    x.len().cmp(&y.len()).then_with(|| x.cmp(y))
                }
            }
            (x, y) => x.to_uppercase().cmp(&y.to_uppercase()),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    a.cmp(b)
}

/// Reads the GRUB environment block. A missing block is empty.
fn read_grubenv(root: &Path) -> Result<BTreeMap<String, String>, Error> {
    let path = join_relative(root, GRUBENV_PATH);
    let Some(content) = files::read_file_if_exists(&path)? else {
        trace!("No GRUB environment at '{}'", path.display());
        return Ok(BTreeMap::new());
    };

    Ok(content
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| ENV_ASSIGNMENT.captures(line.trim()))
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect())
}

/// Replaces `$NAME` with the value of `NAME` wherever it is followed by
/// whitespace or the end of a line.
fn substitute(content: &str, env: &BTreeMap<String, String>) -> Result<String, Error> {
    let mut content = content.to_string();
    for (key, value) in env {
        let pattern = Regex::new(&format!(r"(?m)\${}(\s+|$)", regex::escape(key)))
            .with_context(|| format!("Invalid GRUB environment variable name '{key}'"))?;
        content = pattern
            .replace_all(&content, |c: &Captures| format!("{value}{}", &c[1]))
            .into_owned();
    }
    Ok(content)
}

/// Removes every line starting with `keyword` and returns the words that
/// followed it, sorted.
fn take_keyword(lines: &mut Vec<String>, keyword: &str) -> Vec<String> {
    let mut values = Vec::new();
    lines.retain(|line| {
        let mut words = line.split_whitespace();
        if words.next() != Some(keyword) || !line[keyword.len()..].starts_with(char::is_whitespace)
        {
            return true;
        }
        values.extend(words.filter(|w| *w != keyword).map(str::to_string));
        false
    });
    values.sort();
    values
}

fn parse_snippet(
    path: PathBuf,
    content: &str,
    env: &BTreeMap<String, String>,
) -> Result<Option<MenuEntry>, Error> {
    let managed = content.contains(MANAGED_MARKER);
    let content = substitute(content, env)?;

    let mut lines: Vec<String> = content.lines().map(|l| l.trim().to_string()).collect();
    let users: Vec<String> = take_keyword(&mut lines, GRUB_USERS)
        .into_iter()
        .filter(|u| u != INHERITED_USERS)
        .collect();
    let mut args = take_keyword(&mut lines, GRUB_ARG);
    let classes = take_keyword(&mut lines, GRUB_CLASS);

    let fields: BTreeMap<&str, &str> = lines
        .iter()
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| KEY_VALUE.captures(line))
        .filter_map(|c| {
            let key = c.get(1)?.as_str();
            let value = c.get(2).map_or("", |m| m.as_str());
            Some((key, value))
        })
        .collect();

    let Some(title) = fields.get("title") else {
        debug!("Skipping BLS snippet '{}': no title", path.display());
        return Ok(None);
    };

    let users = if args.iter().any(|a| a == UNRESTRICTED_ARG) {
        args.retain(|a| a != UNRESTRICTED_ARG);
        AuthorizedUsers::Unrestricted
    } else {
        AuthorizedUsers::Restricted(users)
    };

    Ok(Some(MenuEntry {
        name: title.to_string(),
        bls: true,
        bls_target: Some(path),
        managed,
        kernel: fields.get("linux").map(|s| s.to_string()),
        kernel_options: fields.get("options").map(|o| tokenize(o)).unwrap_or_default(),
        initrd: fields.get("initrd").map(|s| s.to_string()),
        classes,
        args,
        users,
        ..Default::default()
    }))
}

/// Reads every BLS snippet under `root`, newest version first.
pub(super) fn read_entries(root: &Path) -> Result<Vec<MenuEntry>, Error> {
    let env = read_grubenv(root)?;

    let directory = join_relative(root, BLS_ENTRIES_DIRECTORY);
    let pattern = directory.join("*.conf");
    let pattern = pattern
        .to_str()
        .with_context(|| format!("Non UTF-8 path '{}'", directory.display()))?;

    let mut files = glob::glob(pattern)
        .context("Invalid BLS entries pattern")?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to list BLS entries")?;
    files.sort_by(|a, b| versioncmp(&b.to_string_lossy(), &a.to_string_lossy()));

    let mut entries = Vec::new();
    for file in files {
        let content = std::fs::read_to_string(&file)
            .with_context(|| format!("Failed to read '{}'", file.display()))?;
        if let Some(entry) = parse_snippet(file, &content, &env)? {
            entries.push(entry);
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use maplit::btreemap;

    use super::*;

    #[test]
    fn test_versioncmp() {
        assert_eq!(versioncmp("1.10", "1.9"), Ordering::Greater);
        assert_eq!(versioncmp("1.2", "1.2"), Ordering::Equal);
        assert_eq!(versioncmp("1.2-1", "1.2.1"), Ordering::Less);
        assert_eq!(versioncmp("5.14.0-427", "5.14.0-70"), Ordering::Greater);
        assert_eq!(versioncmp("1.01", "1.1"), Ordering::Less);
        assert_eq!(versioncmp("abc", "ABD"), Ordering::Less);
        assert_eq!(versioncmp("1.2", "1.2.3"), Ordering::Less);
    }

    #[test]
    fn test_substitute() {
        let env = btreemap! {
            "kernelopts".to_string() => "root=/dev/sda1 ro".to_string(),
            "tuned_params".to_string() => "".to_string(),
        };
        assert_eq!(
            substitute("options $kernelopts $tuned_params\n", &env).unwrap(),
            "options root=/dev/sda1 ro \n"
        );
        // Only whole names are replaced
        assert_eq!(
            substitute("options $kerneloptsx\n", &env).unwrap(),
            "options $kerneloptsx\n"
        );
    }

    #[test]
    fn test_parse_snippet() {
        let content = indoc! {r#"
            title Fedora Linux (6.5.6-300.fc39.x86_64) 39
            version 6.5.6-300.fc39.x86_64
            linux /vmlinuz-6.5.6-300.fc39.x86_64
            initrd /initramfs-6.5.6-300.fc39.x86_64.img
            options $kernelopts quiet
            grub_users $grub_users
            grub_arg --unrestricted
            grub_arg --hotkey=x
            grub_class kernel
            grub_class fedora
        "#};
        let env = btreemap! { "kernelopts".to_string() => "root=UUID=1 ro".to_string() };

        let entry = parse_snippet("/x/a.conf".into(), content, &env)
            .unwrap()
            .unwrap();
        assert_eq!(entry.name, "Fedora Linux (6.5.6-300.fc39.x86_64) 39");
        assert!(entry.bls);
        assert!(!entry.managed);
        assert_eq!(entry.bls_target, Some(PathBuf::from("/x/a.conf")));
        assert_eq!(entry.kernel.as_deref(), Some("/vmlinuz-6.5.6-300.fc39.x86_64"));
        assert_eq!(entry.kernel_options, vec!["root=UUID=1", "ro", "quiet"]);
        assert_eq!(entry.users, AuthorizedUsers::Unrestricted);
        assert_eq!(entry.args, vec!["--hotkey=x"]);
        assert_eq!(entry.classes, vec!["fedora", "kernel"]);
    }

    #[test]
    fn test_restricted_snippet() {
        let content = indoc! {r#"
            ### PUPPET MANAGED ###
            title Locked
            linux /vmlinuz
            grub_users root bob
        "#};
        let entry = parse_snippet("/x/b.conf".into(), content, &BTreeMap::new())
            .unwrap()
            .unwrap();
        assert!(entry.managed);
        assert_eq!(
            entry.users,
            AuthorizedUsers::Restricted(vec!["bob".into(), "root".into()])
        );
        assert!(entry.kernel_options.is_empty());

        assert!(parse_snippet("/x/c.conf".into(), "linux /vmlinuz\n", &BTreeMap::new())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_read_entries_newest_first() {
        let root = tempfile::tempdir().unwrap();
        let entries = root.path().join("boot/loader/entries");
        for version in ["5.14.0-70", "5.14.0-427", "5.14.0-162"] {
            files::write_file(
                entries.join(format!("abc-{version}.conf")),
                0o644,
                format!("title Linux {version}\nlinux /vmlinuz-{version}\noptions $kernelopts\n")
                    .as_bytes(),
            )
            .unwrap();
        }
        files::write_file(
            root.path().join("boot/grub2/grubenv"),
            0o644,
            b"# GRUB Environment Block\nkernelopts=root=/dev/sda1 ro\n####\n",
        )
        .unwrap();

        let parsed = read_entries(root.path()).unwrap();
        let names: Vec<&str> = parsed.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Linux 5.14.0-427", "Linux 5.14.0-162", "Linux 5.14.0-70"]
        );
        assert_eq!(parsed[0].kernel_options, vec!["root=/dev/sda1", "ro"]);
    }
}
