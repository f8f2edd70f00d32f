use std::path::Path;

use anyhow::{Context, Error};
use log::trace;
use serde::Serialize;

use grubstate_api::constants::OS_RELEASE_PATH;

use crate::path;

/// Distribution IDs that ship the RedHat flavor of the GRUB2 tooling.
const REDHAT_FAMILY: [&str; 4] = ["rhel", "centos", "fedora", "rocky"];

/// Represents the contents of the /etc/os-release file.
#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OsRelease {
    pub id: Option<String>,
    pub id_like: Vec<String>,
    pub name: Option<String>,
    pub version_id: Option<String>,
}

impl OsRelease {
    /// Reads the contents of /\<root\>/etc/os-release and parses it into an OsRelease struct.
    pub fn read_root(root: impl AsRef<Path>) -> Result<Self, Error> {
        let osrelease_path = path::join_relative(root, OS_RELEASE_PATH);
        Ok(Self::parse(
            &std::fs::read_to_string(&osrelease_path)
                .with_context(|| format!("Failed to read '{}'", osrelease_path.display()))?,
        ))
    }

    /// Returns whether the host belongs to the RedHat family of distributions.
    pub fn is_redhat_family(&self) -> bool {
        self.id
            .iter()
            .chain(self.id_like.iter())
            .any(|id| REDHAT_FAMILY.contains(&id.as_str()))
    }

    /// Returns the major and minor components of VERSION_ID.
    pub fn version(&self) -> Option<(u32, u32)> {
        let version_id = self.version_id.as_deref()?;
        let mut parts = version_id.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = match parts.next() {
            Some(minor) => minor.parse().ok()?,
            None => 0,
        };
        Some((major, minor))
    }

    /// Returns whether grub2-mkconfig needs `--update-bls-cmdline` to
    /// propagate the kernel command line into BLS snippets, which is the case
    /// on RedHat-family releases starting with 9.3.
    pub fn needs_bls_cmdline_update(&self) -> bool {
        if !self.is_redhat_family() {
            return false;
        }

        match self.version() {
            Some(version) => version >= (9, 3),
            None => {
                trace!("Unknown VERSION_ID: {:?}", self.version_id);
                false
            }
        }
    }

    /// Parses the input string into an OsRelease struct.
    pub fn parse(data: &str) -> Self {
        let mut os_release = OsRelease::default();
        for line in data.lines() {
            if line.is_empty() || line.trim_start().starts_with('#') {
                continue;
            }

            let Some((key, raw_value)) = line.trim().split_once('=') else {
                continue;
            };

            let value = raw_value
                .trim()
                .trim_matches('\"')
                .trim_matches('\'')
                .to_string();

            match key {
                "ID" => os_release.id = Some(value),
                "ID_LIKE" => {
                    os_release.id_like = value.split_whitespace().map(str::to_string).collect()
                }
                "NAME" => os_release.name = Some(value),
                "VERSION_ID" => os_release.version_id = Some(value),
                _ => {}
            }
        }

        os_release
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rhel() {
        let data = indoc::indoc! {
            r#"
            NAME="Red Hat Enterprise Linux"
            VERSION="9.4 (Plow)"
            ID="rhel"
            ID_LIKE="fedora"
            VERSION_ID="9.4"
            PRETTY_NAME="Red Hat Enterprise Linux 9.4 (Plow)"
            "#,
        };

        let os_release = OsRelease::parse(data);
        assert_eq!(os_release.id.as_deref(), Some("rhel"));
        assert_eq!(os_release.id_like, vec!["fedora"]);
        assert_eq!(os_release.version(), Some((9, 4)));
        assert!(os_release.is_redhat_family());
        assert!(os_release.needs_bls_cmdline_update());
    }

    #[test]
    fn test_parse_like() {
        let data = indoc::indoc! {
            r#"
            ID="almalinux"
            ID_LIKE="rhel centos fedora"
            VERSION_ID="9.2"
            "#,
        };

        let os_release = OsRelease::parse(data);
        assert!(os_release.is_redhat_family());
        assert!(!os_release.needs_bls_cmdline_update());
    }

    #[test]
    fn test_parse_debian() {
        let data = indoc::indoc! {
            r#"
            ID=debian
            VERSION_ID="12"
            "#,
        };

        let os_release = OsRelease::parse(data);
        assert_eq!(os_release.version(), Some((12, 0)));
        assert!(!os_release.is_redhat_family());
        assert!(!os_release.needs_bls_cmdline_update());
    }
}
