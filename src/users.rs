//! GRUB2 authentication users.
//!
//! Users are written to a grub.d script that prints a `superusers` line and
//! one `password_pbkdf2` line per user into grub.cfg. What GRUB enforces is
//! the rendered grub.cfg, so the users found there are the current state.

use std::collections::BTreeSet;

use anyhow::{Context, Error};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use osutils::password::{is_hashed, Pbkdf2Hash};

lazy_static! {
    static ref SUPERUSERS: Regex = Regex::new(r#"set\s+superusers=['"](.+?)['"]"#).unwrap();
    static ref PASSWORD: Regex =
        Regex::new(r"^\s*password(?:_pbkdf2)?\s+(\S+)\s+(\S+)").unwrap();
    static ref SEPARATORS: Regex = Regex::new(r"\s|,|;|\||&").unwrap();
}

/// Terminator of the here-document in the users script.
const HEREDOC: &str = "USER_LIST";

/// A GRUB2 user as found in, or written to, a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrubUser {
    pub name: String,
    /// A PBKDF2 hash, or a plaintext password not hashed yet.
    pub password: String,
    pub superuser: bool,
}

/// Finds the users defined in a GRUB2 configuration or users script, in
/// order of first appearance.
pub fn extract_users(content: &str) -> Vec<GrubUser> {
    let mut superusers: Vec<String> = Vec::new();
    let mut users: Vec<GrubUser> = Vec::new();

    for line in content.lines() {
        if let Some(captures) = SUPERUSERS.captures(line) {
            superusers = SEPARATORS
                .split(captures[1].trim())
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect();
        } else if let Some(captures) = PASSWORD.captures(line) {
            let password = captures[2].to_string();
            match users.iter_mut().find(|u| u.name == captures[1]) {
                Some(user) => user.password = password,
                None => users.push(GrubUser {
                    name: captures[1].to_string(),
                    password,
                    superuser: false,
                }),
            }
        }
    }

    for user in users.iter_mut() {
        user.superuser = superusers.contains(&user.name);
    }
    users
}

/// Whether the password on the system matches the declared one. Hashes are
/// compared verbatim, a plaintext on one side is checked against the hash
/// on the other.
pub fn password_insync(is: &str, should: &str) -> Result<bool, Error> {
    match (is_hashed(is), is_hashed(should)) {
        (true, true) => Ok(is.trim() == should.trim()),
        (true, false) => is.parse::<Pbkdf2Hash>()?.verify(should),
        (false, true) => should.parse::<Pbkdf2Hash>()?.verify(is),
        (false, false) => Ok(is == should),
    }
}

/// Returns the hash to write for `declared`. A plaintext password reuses
/// `previous` when it already hashes that password with `rounds`, so that
/// unchanged users render identically.
pub fn hash_password(declared: &str, previous: Option<&str>, rounds: u32) -> Result<String, Error> {
    if is_hashed(declared) {
        return Ok(declared.to_string());
    }

    if let Some(previous) = previous.filter(|p| is_hashed(p)) {
        let hash: Pbkdf2Hash = previous.parse()?;
        if hash.rounds == rounds && hash.verify(declared)? {
            return Ok(previous.to_string());
        }
    }

    Ok(Pbkdf2Hash::new(declared, rounds)?.to_string())
}

/// The users the managed script should define after applying one
/// resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    /// Retained users sorted by name.
    pub users: Vec<GrubUser>,
    /// Users dropped because no resource of the run declares them.
    pub purged: Vec<String>,
}

impl Roster {
    /// Merges `declared` into the users of the existing managed script.
    ///
    /// The existing entry of the same name is replaced; `None` removes it.
    /// With `purge`, existing users missing from `run_users` are dropped.
    pub fn reconcile(
        existing: Vec<GrubUser>,
        name: &str,
        declared: Option<GrubUser>,
        purge: bool,
        run_users: &BTreeSet<String>,
    ) -> Self {
        let (mut users, purged): (Vec<GrubUser>, Vec<GrubUser>) = existing
            .into_iter()
            .filter(|u| u.name != name)
            .partition(|u| !purge || run_users.contains(&u.name));

        for user in &purged {
            debug!("Purging GRUB2 user '{}'", user.name);
        }

        users.extend(declared);
        users.sort_by(|a, b| a.name.cmp(&b.name));

        Roster {
            users,
            purged: purged.into_iter().map(|u| u.name).collect(),
        }
    }

    /// Summary of the purged users, e.g. `Purged GRUB2 users: "a", "b"`.
    pub fn purge_summary(&self) -> Option<String> {
        (!self.purged.is_empty())
            .then(|| format!("Purged GRUB2 users: \"{}\"", self.purged.join("\", \"")))
    }

    pub fn superusers(&self) -> Vec<&str> {
        let superusers: BTreeSet<&str> = self
            .users
            .iter()
            .filter(|u| u.superuser)
            .map(|u| u.name.as_str())
            .collect();
        superusers.into_iter().collect()
    }

    /// Renders the users script. Every password must already be hashed.
    pub fn render(&self) -> Result<String, Error> {
        let mut lines = vec![
            "#!/bin/sh",
            "########",
            "# This file managed by Puppet",
            "# Manual changes will be erased!",
            "########",
        ]
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
        lines.push(format!("cat << {HEREDOC}"));

        let superusers = self.superusers();
        if !superusers.is_empty() {
            lines.push(format!("set superusers=\"{}\"", superusers.join(",")));
        }
        for user in &self.users {
            anyhow::ensure!(
                is_hashed(&user.password),
                "Password of user '{}' is not hashed",
                user.name
            );
            lines.push(format!("password_pbkdf2 {} {}", user.name, user.password));
        }
        lines.push(HEREDOC.to_string());

        Ok(lines.join("\n") + "\n")
    }
}

/// Names of users present in `active` that no resource declares.
pub fn unmanaged_users<'a>(active: &'a [GrubUser], run_users: &BTreeSet<String>) -> Vec<&'a str> {
    active
        .iter()
        .map(|u| u.name.as_str())
        .filter(|name| !run_users.contains(*name))
        .collect()
}

/// Hashes the password of `user` unless it already is a hash.
pub fn hashed(mut user: GrubUser, previous: Option<&str>, rounds: u32) -> Result<GrubUser, Error> {
    user.password = hash_password(&user.password, previous, rounds)
        .with_context(|| format!("Failed to hash password of user '{}'", user.name))?;
    Ok(user)
}
