//! External boot tools: grubby, grub2-mkconfig and grub2-set-default.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use grubstate_api::error::GrubStateError;
use osutils::{grub_mkconfig, grubby, osrelease::OsRelease};

/// Access to the commands that inspect and regenerate the boot
/// configuration.
pub trait BootTools {
    /// Fields of the default boot entry as reported by grubby, empty when
    /// they cannot be queried.
    fn default_entry_info(&self, legacy: bool) -> BTreeMap<String, String>;

    /// Runs grub-mkconfig and returns the generated configuration.
    fn mkconfig(&self) -> Result<String, GrubStateError>;

    fn set_default(&self, entry: &str) -> Result<(), GrubStateError>;

    /// The grub.cfg files of the system, the active one first.
    fn config_paths(&self) -> Result<Vec<PathBuf>, GrubStateError>;
}

/// Boot tools of the running system.
pub struct SystemBootTools {
    root: PathBuf,
    os_release: OsRelease,
}

impl SystemBootTools {
    pub fn new(root: &Path, os_release: OsRelease) -> Self {
        SystemBootTools {
            root: root.to_path_buf(),
            os_release,
        }
    }
}

impl BootTools for SystemBootTools {
    fn default_entry_info(&self, legacy: bool) -> BTreeMap<String, String> {
        grubby::default_info(legacy)
    }

    fn mkconfig(&self) -> Result<String, GrubStateError> {
        grub_mkconfig::generate(self.os_release.needs_bls_cmdline_update())
    }

    fn set_default(&self, entry: &str) -> Result<(), GrubStateError> {
        grubby::set_default(entry)
    }

    fn config_paths(&self) -> Result<Vec<PathBuf>, GrubStateError> {
        grub_mkconfig::discover_configs(&self.root, self.os_release.id.as_deref())
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    /// Records what was asked of the boot tools instead of running them.
    #[derive(Clone, Default)]
    pub struct FakeBootTools {
        pub info: BTreeMap<String, String>,
        pub mkconfig_output: String,
        pub configs: Vec<PathBuf>,
        pub calls: Rc<RefCell<Vec<String>>>,
    }

    impl FakeBootTools {
        pub fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl BootTools for FakeBootTools {
        fn default_entry_info(&self, _legacy: bool) -> BTreeMap<String, String> {
            self.info.clone()
        }

        fn mkconfig(&self) -> Result<String, GrubStateError> {
            self.calls.borrow_mut().push("mkconfig".into());
            Ok(self.mkconfig_output.clone())
        }

        fn set_default(&self, entry: &str) -> Result<(), GrubStateError> {
            self.calls.borrow_mut().push(format!("set-default {entry}"));
            Ok(())
        }

        fn config_paths(&self) -> Result<Vec<PathBuf>, GrubStateError> {
            Ok(self.configs.clone())
        }
    }
}
