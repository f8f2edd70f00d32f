//! Facts gathered from the managed system, used to pick providers.

use std::{collections::BTreeMap, path::Path};

use lazy_static::lazy_static;
use log::{debug, trace};
use regex::Regex;
use serde::Serialize;

use grubstate_api::constants::{
    EFI_FIRMWARE_DIRECTORY, ETC_DEFAULT_GRUB, GRUB_D_DIRECTORY, GRUB_LEGACY_EFI_CONF,
    GRUB_LEGACY_MENU_LST,
};
use osutils::{dependencies::Dependency, files, osrelease::OsRelease, path::join_relative};

lazy_static! {
    static ref BLSCFG_ENABLED: Regex =
        Regex::new(r#"(?i)^\s*(?:export\s+)?GRUB_ENABLE_BLSCFG=["']?true["']?\s*$"#).unwrap();
}

const COMMANDS: [Dependency; 4] = [
    Dependency::Grub2Mkconfig,
    Dependency::GrubMkconfig,
    Dependency::Grub2SetDefault,
    Dependency::Grubby,
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Facts {
    /// 2 for GRUB2, 1 for GRUB legacy, none when no GRUB was found.
    pub grub_version: Option<u8>,

    /// Whether /etc/default/grub enables BLS entries.
    pub blscfg: bool,

    pub efi: bool,

    /// Whether /etc/grub.d exists.
    pub grub_d: bool,

    pub os_release: OsRelease,

    /// Availability of the boot tools, by command name.
    pub commands: BTreeMap<String, bool>,
}

impl Facts {
    pub fn gather(root: &Path) -> Self {
        let exists = |path: &str| join_relative(root, path).exists();

        let grub_version = if exists(ETC_DEFAULT_GRUB) {
            Some(2)
        } else if exists(GRUB_LEGACY_MENU_LST) || exists(GRUB_LEGACY_EFI_CONF) {
            Some(1)
        } else {
            None
        };

        let blscfg = match files::read_file_if_exists(join_relative(root, ETC_DEFAULT_GRUB)) {
            Ok(Some(content)) => blscfg_enabled(&content),
            Ok(None) => false,
            Err(e) => {
                debug!("Could not read '{ETC_DEFAULT_GRUB}': {e:#}");
                false
            }
        };

        let os_release = OsRelease::read_root(root).unwrap_or_else(|e| {
            trace!("No os-release information: {e:#}");
            OsRelease::default()
        });

        let facts = Facts {
            grub_version,
            blscfg,
            efi: exists(EFI_FIRMWARE_DIRECTORY),
            grub_d: exists(GRUB_D_DIRECTORY),
            os_release,
            commands: COMMANDS
                .iter()
                .map(|c| (c.name().to_string(), c.exists()))
                .collect(),
        };
        debug!("Gathered facts: {facts:?}");
        facts
    }

    /// Whether some flavor of grub-mkconfig can be run.
    pub fn has_mkconfig(&self) -> bool {
        [Dependency::Grub2Mkconfig, Dependency::GrubMkconfig]
            .iter()
            .any(|c| self.commands.get(c.name()).copied().unwrap_or_default())
    }
}

fn blscfg_enabled(default_grub: &str) -> bool {
    default_grub
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .any(|line| BLSCFG_ENABLED.is_match(line))
}

/// A condition on the facts that a provider relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confine {
    GrubVersion(u8),
    Blscfg,
    GrubD,
    Mkconfig,
}

impl Confine {
    pub fn holds(&self, facts: &Facts) -> bool {
        match self {
            Confine::GrubVersion(version) => facts.grub_version == Some(*version),
            Confine::Blscfg => facts.blscfg,
            Confine::GrubD => facts.grub_d,
            Confine::Mkconfig => facts.has_mkconfig(),
        }
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn test_blscfg_enabled() {
        assert!(blscfg_enabled(indoc! {r#"
            GRUB_TIMEOUT=5
            GRUB_ENABLE_BLSCFG=true
        "#}));
        assert!(blscfg_enabled("export GRUB_ENABLE_BLSCFG=\"TRUE\"\n"));
        assert!(!blscfg_enabled("#GRUB_ENABLE_BLSCFG=true\n"));
        assert!(!blscfg_enabled("GRUB_ENABLE_BLSCFG=false\n"));
        assert!(!blscfg_enabled(""));
    }

    #[test]
    fn test_gather() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(Facts::gather(root.path()).grub_version, None);

        files::write_file(
            root.path().join("boot/grub/menu.lst"),
            0o644,
            b"timeout 5\n",
        )
        .unwrap();
        let facts = Facts::gather(root.path());
        assert_eq!(facts.grub_version, Some(1));
        assert!(!facts.grub_d);

        files::write_file(
            root.path().join("etc/default/grub"),
            0o644,
            b"GRUB_ENABLE_BLSCFG=true\n",
        )
        .unwrap();
        files::create_dirs(root.path().join("etc/grub.d")).unwrap();
        files::write_file(
            root.path().join("etc/os-release"),
            0o644,
            b"ID=\"rhel\"\nVERSION_ID=\"9.4\"\n",
        )
        .unwrap();

        let facts = Facts::gather(root.path());
        assert_eq!(facts.grub_version, Some(2));
        assert!(facts.blscfg);
        assert!(facts.grub_d);
        assert_eq!(facts.os_release.id.as_deref(), Some("rhel"));
        assert_eq!(facts.commands.len(), 4);
    }

    #[test]
    fn test_confines() {
        let mut facts = Facts {
            grub_version: Some(2),
            ..Default::default()
        };
        assert!(Confine::GrubVersion(2).holds(&facts));
        assert!(!Confine::GrubVersion(1).holds(&facts));
        assert!(!Confine::Blscfg.holds(&facts));
        assert!(!Confine::Mkconfig.holds(&facts));

        facts.commands.insert("grub-mkconfig".into(), true);
        assert!(Confine::Mkconfig.holds(&facts));
    }
}
