use std::{
    collections::{BTreeMap, BTreeSet},
    mem,
    path::{Path, PathBuf},
    rc::Rc,
};

use log::{debug, info};

use grubstate_api::error::{
    ExecutionEnvironmentMisconfigurationError, GrubStateError, GrubStateResultExt, ReportError,
    ServicingError,
};
use osutils::{grub_mkconfig, path::join_relative};

use crate::{
    facts::Facts,
    menuentry::{parse_menu, MenuEntry},
    tools::BootTools,
};

/// The GRUB2 menu as found at the start of the run.
#[derive(Debug, Clone, Default)]
pub struct MenuSnapshot {
    /// Fields of the default boot entry as reported by grubby.
    pub default_info: BTreeMap<String, String>,
    pub entries: Vec<MenuEntry>,
}

impl MenuSnapshot {
    pub fn default_entry(&self) -> Option<&MenuEntry> {
        self.entries.iter().find(|e| e.default_entry)
    }
}

/// State shared by every resource of one run.
pub struct RunContext {
    root: PathBuf,

    pub facts: Facts,

    /// Report changes without making them.
    pub noop: bool,

    tools: Box<dyn BootTools>,

    /// Content of the active grub.cfg.
    grub_cfg: Option<Rc<str>>,

    menu: Option<Rc<MenuSnapshot>>,

    /// Names of all users declared in the run.
    declared_users: BTreeSet<String>,

    unmanaged_users_reported: bool,

    regenerate: bool,

    /// Entries to make the default once the configuration is regenerated.
    pending_defaults: Vec<String>,
}

impl RunContext {
    pub fn new(root: &Path, facts: Facts, tools: Box<dyn BootTools>) -> Self {
        RunContext {
            root: root.to_path_buf(),
            facts,
            noop: false,
            tools,
            grub_cfg: None,
            menu: None,
            declared_users: BTreeSet::new(),
            unmanaged_users_reported: false,
            regenerate: false,
            pending_defaults: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of a system path under the managed root.
    pub fn path(&self, path: impl AsRef<Path>) -> PathBuf {
        join_relative(&self.root, path)
    }

    pub fn tools(&self) -> &dyn BootTools {
        self.tools.as_ref()
    }

    pub fn declared_users(&self) -> &BTreeSet<String> {
        &self.declared_users
    }

    pub(super) fn set_declared_users(&mut self, users: BTreeSet<String>) {
        self.declared_users = users;
    }

    /// Returns true the first time it is called in a run.
    pub fn report_unmanaged_users_once(&mut self) -> bool {
        !mem::replace(&mut self.unmanaged_users_reported, true)
    }

    /// Content of the active grub.cfg, read once per run.
    pub fn grub_cfg(&mut self) -> Result<Rc<str>, GrubStateError> {
        if let Some(ref content) = self.grub_cfg {
            return Ok(content.clone());
        }

        let paths = self.tools.config_paths()?;
        let path = paths.first().structured(
            ExecutionEnvironmentMisconfigurationError::NoGrubConfig {
                paths: String::new(),
            },
        )?;
        debug!("Reading GRUB configuration '{}'", path.display());
        let content: Rc<str> = std::fs::read_to_string(path)
            .structured(ServicingError::ReadFile {
                path: path.display().to_string(),
            })?
            .into();

        self.grub_cfg = Some(content.clone());
        Ok(content)
    }

    /// The GRUB2 menu entries and the default entry, read once per run.
    pub fn grub2_menu(&mut self) -> Result<Rc<MenuSnapshot>, GrubStateError> {
        if let Some(ref menu) = self.menu {
            return Ok(menu.clone());
        }

        let config = self.grub_cfg()?;
        let default_info = self.tools.default_entry_info(false);
        let entries = parse_menu(
            &config,
            &self.root,
            default_info.get("title").map(String::as_str),
        )?;
        debug!("Found {} GRUB2 menu entries", entries.len());

        let menu = Rc::new(MenuSnapshot {
            default_info,
            entries,
        });
        self.menu = Some(menu.clone());
        Ok(menu)
    }

    /// Asks for grub.cfg to be regenerated at the end of the run.
    pub fn request_regeneration(&mut self) {
        if !self.regenerate {
            debug!("GRUB configuration regeneration requested");
        }
        self.regenerate = true;
    }

    pub fn regeneration_requested(&self) -> bool {
        self.regenerate
    }

    /// Makes `entry` the default after regeneration. `entry` is a
    /// grub2-set-default path like `Submenu>Title`.
    pub fn queue_set_default(&mut self, entry: String) {
        self.pending_defaults.push(entry);
    }

    /// Regenerates grub.cfg once if any resource asked for it, then applies
    /// the queued default entries.
    pub fn finish(&mut self) -> Result<(), GrubStateError> {
        let regenerate = mem::take(&mut self.regenerate);
        let defaults = mem::take(&mut self.pending_defaults);

        if self.noop {
            if regenerate {
                info!("Would regenerate the GRUB configuration");
            }
            for entry in &defaults {
                info!("Would set the default boot entry to '{entry}'");
            }
            return Ok(());
        }

        if regenerate {
            let paths = self.tools.config_paths()?;
            info!(
                "Regenerating the GRUB configuration at {}",
                paths
                    .iter()
                    .map(|p| format!("'{}'", p.display()))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let output = self
                .tools
                .mkconfig()
                .message("Failed to regenerate the GRUB configuration")?;
            grub_mkconfig::write_configs(&paths, &output)
                .message("Failed to regenerate the GRUB configuration")?;
            self.grub_cfg = None;
            self.menu = None;
        }

        for entry in defaults {
            info!("Setting the default boot entry to '{entry}'");
            self.tools.set_default(&entry)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use maplit::btreemap;

    use grubstate_api::error::ErrorKind;
    use osutils::files;

    use crate::tools::fake::FakeBootTools;

    use super::*;

    fn context(tools: &FakeBootTools, root: &Path) -> RunContext {
        RunContext::new(root, Facts::default(), Box::new(tools.clone()))
    }

    #[test]
    fn test_grub2_menu() {
        let root = tempfile::tempdir().unwrap();
        let cfg = root.path().join("boot/grub2/grub.cfg");
        files::write_file(
            &cfg,
            0o600,
            indoc! {r#"
                menuentry 'Linux' --class os {
                  linux /vmlinuz ro
                  initrd /initrd.img
                }
                menuentry 'Other' {
                  linux /vmlinuz-other
                }
            "#}
            .as_bytes(),
        )
        .unwrap();
        let tools = FakeBootTools {
            info: btreemap! { "title".into() => "Linux".into() },
            configs: vec![cfg],
            ..Default::default()
        };

        let mut ctx = context(&tools, root.path());
        let menu = ctx.grub2_menu().unwrap();
        assert_eq!(menu.entries.len(), 2);
        assert_eq!(menu.default_entry().unwrap().name, "Linux");
        assert!(Rc::ptr_eq(&menu, &ctx.grub2_menu().unwrap()));
    }

    #[test]
    fn test_missing_grub_cfg() {
        let root = tempfile::tempdir().unwrap();
        let tools = FakeBootTools {
            configs: vec![root.path().join("grub.cfg")],
            ..Default::default()
        };
        let error = context(&tools, root.path()).grub_cfg().unwrap_err();
        assert!(matches!(
            error.kind(),
            ErrorKind::Servicing(ServicingError::ReadFile { .. })
        ));
    }

    #[test]
    fn test_finish_regenerates_once() {
        let root = tempfile::tempdir().unwrap();
        let cfg = root.path().join("grub.cfg");
        let tools = FakeBootTools {
            mkconfig_output: "set timeout=5\n".into(),
            configs: vec![cfg.clone()],
            ..Default::default()
        };

        let mut ctx = context(&tools, root.path());
        ctx.finish().unwrap();
        assert!(tools.calls().is_empty());

        ctx.request_regeneration();
        ctx.request_regeneration();
        ctx.queue_set_default("Advanced>Rescue".into());
        ctx.finish().unwrap();
        assert_eq!(tools.calls(), vec!["mkconfig", "set-default Advanced>Rescue"]);
        assert_eq!(std::fs::read_to_string(&cfg).unwrap(), "set timeout=5\n");

        ctx.finish().unwrap();
        assert_eq!(tools.calls().len(), 2);
    }

    #[test]
    fn test_finish_noop() {
        let root = tempfile::tempdir().unwrap();
        let tools = FakeBootTools::default();
        let mut ctx = context(&tools, root.path());
        ctx.noop = true;
        ctx.request_regeneration();
        ctx.queue_set_default("Linux".into());
        ctx.finish().unwrap();
        assert!(tools.calls().is_empty());
    }

    #[test]
    fn test_report_unmanaged_once() {
        let root = tempfile::tempdir().unwrap();
        let mut ctx = context(&FakeBootTools::default(), root.path());
        assert!(ctx.report_unmanaged_users_once());
        assert!(!ctx.report_unmanaged_users_once());
    }
}
