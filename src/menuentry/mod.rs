//! GRUB2 menu entries, as rendered into grub.cfg by grub2-mkconfig or
//! described by Boot Loader Specification snippets.

use std::path::PathBuf;

use serde::Serialize;
use sha2::{Digest, Sha256};

use grubstate_api::constants::UNRESTRICTED;

mod bls;
mod emitter;
mod parser;

pub use bls::versioncmp;
pub use emitter::{bls_version, emit_bls, emit_legacy};
pub use parser::parse_menu;

/// Who may boot an entry once GRUB2 authentication is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthorizedUsers {
    /// Any user, `--unrestricted`.
    Unrestricted,
    /// The listed users and the superusers. An empty list means the entry
    /// carries no users list of its own.
    Restricted(Vec<String>),
}

impl Default for AuthorizedUsers {
    fn default() -> Self {
        AuthorizedUsers::Restricted(Vec::new())
    }
}

impl AuthorizedUsers {
    /// Builds the users from a declared list, already split on separators.
    /// No list at all means unrestricted.
    pub fn from_declared(users: Option<Vec<String>>) -> Self {
        match users {
            None => AuthorizedUsers::Unrestricted,
            Some(users) if users.iter().any(|u| u == UNRESTRICTED) => {
                AuthorizedUsers::Unrestricted
            }
            Some(mut users) => {
                users.sort();
                AuthorizedUsers::Restricted(users)
            }
        }
    }

    /// Same users in a canonical order, for comparison.
    pub fn sorted(&self) -> Self {
        match self {
            AuthorizedUsers::Unrestricted => AuthorizedUsers::Unrestricted,
            AuthorizedUsers::Restricted(users) => {
                let mut users = users.clone();
                users.sort();
                AuthorizedUsers::Restricted(users)
            }
        }
    }

    /// Users as they are declared, with `unrestricted` as the sentinel.
    pub fn to_declared(&self) -> Vec<String> {
        match self {
            AuthorizedUsers::Unrestricted => vec![UNRESTRICTED.to_string()],
            AuthorizedUsers::Restricted(users) => users.clone(),
        }
    }
}

/// A menu entry discovered on the system or about to be written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuEntry {
    pub name: String,

    /// Whether the entry comes from (or goes to) a BLS snippet.
    pub bls: bool,

    /// Snippet the entry was read from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bls_target: Option<PathBuf>,

    /// Whether the entry carries the managed marker.
    pub managed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel: Option<String>,

    pub kernel_options: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub initrd: Option<String>,

    /// Multiboot modules, each a path followed by its options.
    pub modules: Vec<Vec<String>>,

    pub classes: Vec<String>,

    /// BLS `grub_arg` values other than `--unrestricted`.
    pub args: Vec<String>,

    pub users: AuthorizedUsers,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,

    pub load_16bit: bool,

    pub load_video: bool,

    pub plugins: Vec<String>,

    /// Whether this is the entry GRUB boots by default.
    pub default_entry: bool,

    /// Titles of the enclosing submenus, outermost first.
    pub submenus: Vec<String>,
}

impl MenuEntry {
    /// Address of the entry as understood by grub2-set-default, e.g.
    /// `Advanced options>Rescue`.
    pub fn default_path(&self) -> String {
        self.submenus
            .iter()
            .chain(std::iter::once(&self.name))
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(">")
    }
}

/// Stable identifier of an entry, the hex SHA-256 of its title.
pub fn entry_id(name: &str) -> String {
    hex::encode(Sha256::digest(name.as_bytes()))
}
