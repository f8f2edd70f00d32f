//! GRUB2 menu entries, written either as a /etc/grub.d script or as a BLS
//! snippet.
//!
//! Entries are looked up by title in the menu parsed from grub.cfg. On a
//! BLS system new entries become snippets unless declared otherwise, and an
//! entry declared in the other form than found is recreated in the declared
//! form, removing the file of the old one.

use std::{
    path::{Path, PathBuf},
    rc::Rc,
};

use log::{debug, info};

use grubstate_api::{
    config::{MenuEntryDeclaration, ResourceDeclaration},
    constants::{
        BLS_ENTRIES_DIRECTORY, BLS_FILE_MODE, DEFAULT_BLS_CLASSES, DEFAULT_PLUGINS,
        MANAGED_ENTRY_PREFIX, PRESERVE, SCRIPT_FILE_MODE,
    },
    error::{
        GrubStateError, InternalError, InvalidInputError, MissingDefaultError, ReportError,
        ServicingError, UnsupportedConfigurationError,
    },
};
use osutils::files;

use crate::{
    engine::{MenuSnapshot, Property, PropertyKind, PropertyValue, Provider, RunContext},
    menuentry::{bls_version, emit_bls, emit_legacy, entry_id, AuthorizedUsers, MenuEntry},
    options::{compute_desired_merge, resolve, MergeRequest},
};

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn missing(declaration: &MenuEntryDeclaration, property: &'static str) -> GrubStateError {
    GrubStateError::new(InvalidInputError::MissingProperty {
        resource: format!("grub_menuentry[{}]", declaration.name),
        property,
    })
}

/// Options of a module set as found on the system, normalized the way
/// desired options are.
fn normalized(options: &[String]) -> Vec<String> {
    compute_desired_merge(MergeRequest {
        current: options,
        desired: &[PRESERVE.to_string()],
        defaults: &[],
        seed_defaults_on_create: false,
    })
    .current
}

pub struct Grub2MenuEntry {
    declaration: MenuEntryDeclaration,
    menu: Rc<MenuSnapshot>,

    /// The entry of the same title found in the menu.
    current: Option<MenuEntry>,

    /// Form of the current entry, or the form a new entry takes.
    detected_bls: bool,

    /// Form the entry is written in.
    bls: bool,

    id: String,

    /// The entry to write, built by `create` or by setting properties on
    /// the current entry.
    entry: MenuEntry,

    creating: bool,
    destroying: bool,

    /// Whether the file of the entry must be written. Making an entry the
    /// default does not touch it.
    rewrite: bool,
}

impl Grub2MenuEntry {
    pub fn build(
        resource: &ResourceDeclaration,
        ctx: &mut RunContext,
    ) -> Result<Box<dyn Provider>, GrubStateError> {
        let ResourceDeclaration::GrubMenuentry(declaration) = resource else {
            return Err(GrubStateError::internal(
                "grub_menuentry provider built for another resource kind",
            ));
        };

        let menu = ctx.grub2_menu()?;
        menu.default_entry()
            .structured(MissingDefaultError::NoDefaultEntry)?;

        let bls_system = menu.entries.iter().any(|e| e.bls);
        let current = menu
            .entries
            .iter()
            .find(|e| e.name == declaration.name)
            .cloned();
        let detected_bls = bls_system
            && match current {
                Some(ref current) => current.bls,
                None => declaration.bls != Some(false),
            };
        let bls = declaration.bls.unwrap_or(detected_bls);
        debug!(
            "Menu entry '{}' is {} as a {} entry",
            declaration.name,
            if current.is_some() { "found" } else { "not found" },
            if bls { "BLS" } else { "grub.d" }
        );

        let mut entry = current.clone().unwrap_or_default();
        entry.bls = bls;

        Ok(Box::new(Grub2MenuEntry {
            id: entry_id(&declaration.name),
            declaration: declaration.clone(),
            menu,
            current,
            detected_bls,
            bls,
            entry,
            creating: false,
            destroying: false,
            rewrite: false,
        }))
    }

    pub fn instances(ctx: &mut RunContext) -> Result<Vec<ResourceDeclaration>, GrubStateError> {
        let menu = ctx.grub2_menu()?;
        let root = ctx.root();
        Ok(menu
            .entries
            .iter()
            .map(|entry| {
                ResourceDeclaration::GrubMenuentry(MenuEntryDeclaration {
                    name: entry.name.clone(),
                    root: entry.root.clone(),
                    kernel: entry.kernel.clone(),
                    kernel_options: entry.kernel_options.clone(),
                    modules: (!entry.modules.is_empty()).then(|| entry.modules.clone()),
                    initrd: entry.initrd.clone(),
                    default_entry: Some(entry.default_entry),
                    bls: Some(entry.bls),
                    classes: (!entry.classes.is_empty()).then(|| entry.classes.clone()),
                    users: Some(entry.users.to_declared()),
                    load_16bit: (!entry.bls).then_some(entry.load_16bit),
                    load_video: (!entry.bls).then_some(entry.load_video),
                    plugins: (!entry.bls && !entry.plugins.is_empty())
                        .then(|| entry.plugins.clone()),
                    target: entry
                        .bls_target
                        .as_ref()
                        .and_then(|t| t.strip_prefix(root).ok())
                        .map(|t| Path::new("/").join(t)),
                    ..Default::default()
                })
            })
            .collect())
    }

    fn default_entry(&self) -> Result<&MenuEntry, GrubStateError> {
        self.menu
            .default_entry()
            .structured(MissingDefaultError::NoDefaultEntry)
    }

    fn seed_defaults(&self) -> bool {
        self.creating && self.declaration.add_defaults_on_creation
    }

    /// The kernel or initrd path to write, `None` when it is not declared.
    fn resolved_path(
        &self,
        current: Option<&str>,
        flavor: &str,
    ) -> Result<Option<String>, GrubStateError> {
        let declared = match flavor {
            "kernel" => self.declaration.kernel.as_deref(),
            _ => self.declaration.initrd.as_deref(),
        };
        declared
            .map(|desired| resolve(current, desired, &self.menu.default_info, flavor))
            .transpose()
    }

    /// Current and desired kernel options. Multiboot entries do not inherit
    /// the options of the default entry.
    fn kernel_options(
        &self,
        current: &[String],
    ) -> Result<(Vec<String>, Vec<String>), GrubStateError> {
        let defaults = if self.declaration.has_modules() {
            Vec::new()
        } else {
            self.default_entry()?.kernel_options.clone()
        };
        let outcome = compute_desired_merge(MergeRequest {
            current,
            desired: &self.declaration.kernel_options,
            defaults: &defaults,
            seed_defaults_on_create: self.seed_defaults(),
        });
        Ok((outcome.current, outcome.desired))
    }

    /// Current and desired module sets. `:defaults:` in a module set stands
    /// for the default kernel followed by its options.
    fn modules(
        &self,
        current: &[Vec<String>],
    ) -> Result<Option<(Vec<Vec<String>>, Vec<Vec<String>>)>, GrubStateError> {
        let Some(ref declared) = self.declaration.modules else {
            return Ok(None);
        };

        let default = self.default_entry()?;
        let defaults: Vec<String> = default
            .kernel
            .iter()
            .chain(default.kernel_options.iter())
            .cloned()
            .collect();

        let desired = declared
            .iter()
            .enumerate()
            .map(|(i, set)| {
                compute_desired_merge(MergeRequest {
                    current: current.get(i).map(Vec::as_slice).unwrap_or_default(),
                    desired: set,
                    defaults: &defaults,
                    seed_defaults_on_create: self.seed_defaults(),
                })
                .desired
            })
            .collect();
        let current = current
            .iter()
            .filter(|set| !set.is_empty())
            .map(|set| normalized(set))
            .collect();

        Ok(Some((current, desired)))
    }

    fn bls_target(&self, ctx: &RunContext, version: &str) -> PathBuf {
        match self.current.as_ref().and_then(|c| c.bls_target.clone()) {
            Some(target) => target,
            None => ctx
                .path(BLS_ENTRIES_DIRECTORY)
                .join(format!("{}-{version}.conf", &self.id[..32])),
        }
    }

    fn legacy_target(&self, ctx: &RunContext) -> PathBuf {
        match self.declaration.target {
            Some(ref target) => ctx.path(target),
            None => ctx.path(format!(
                "{MANAGED_ENTRY_PREFIX}{}",
                &self.id.to_uppercase()[..10]
            )),
        }
    }

    fn flush_bls(&self, ctx: &mut RunContext, version: &str) -> Result<(), GrubStateError> {
        let bls_target = self.bls_target(ctx, version);
        if self.destroying {
            return remove(&bls_target).map(|_| ());
        }

        info!("Writing BLS entry '{}'", bls_target.display());
        write(&bls_target, BLS_FILE_MODE, &emit_bls(&self.entry, &self.id, version))?;

        if remove(&self.legacy_target(ctx))? {
            ctx.request_regeneration();
        }
        Ok(())
    }

    fn flush_legacy(&self, ctx: &mut RunContext, version: &str) -> Result<(), GrubStateError> {
        let legacy_target = self.legacy_target(ctx);
        if self.destroying {
            if remove(&legacy_target)? {
                ctx.request_regeneration();
            }
            return Ok(());
        }

        if !self.creating && !legacy_target.exists() {
            return Err(GrubStateError::new(
                UnsupportedConfigurationError::StockEntryModification {
                    name: self.declaration.name.clone(),
                },
            ));
        }

        info!("Writing menu entry script '{}'", legacy_target.display());
        write(
            &legacy_target,
            SCRIPT_FILE_MODE,
            &emit_legacy(&self.entry, ctx.facts.efi),
        )?;

        if self.current.as_ref().is_some_and(|c| c.bls) {
            remove(&self.bls_target(ctx, version))?;
        }
        ctx.request_regeneration();
        Ok(())
    }
}

fn write(path: &Path, mode: u32, content: &str) -> Result<(), GrubStateError> {
    files::write_file(path, mode, content.as_bytes()).structured(ServicingError::WriteFile {
        path: path.display().to_string(),
    })
}

fn remove(path: &Path) -> Result<bool, GrubStateError> {
    let removed = files::remove_file_if_exists(path).structured(ServicingError::RemoveFile {
        path: path.display().to_string(),
    })?;
    if removed {
        info!("Removed '{}'", path.display());
    }
    Ok(removed)
}

impl Provider for Grub2MenuEntry {
    fn name(&self) -> &'static str {
        "grub2"
    }

    fn exists(&mut self, _ctx: &mut RunContext) -> Result<bool, GrubStateError> {
        Ok(self.current.is_some()
            && self
                .declaration
                .bls
                .map_or(true, |bls| bls == self.detected_bls))
    }

    fn create(&mut self, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        let declaration = &self.declaration;
        if !self.bls && declaration.root.is_none() {
            return Err(missing(declaration, "root"));
        }
        if declaration.kernel.is_none() {
            return Err(missing(declaration, "kernel"));
        }
        if declaration.initrd.is_none() && !declaration.has_modules() {
            return Err(missing(declaration, "initrd"));
        }

        self.creating = true;
        self.rewrite = true;

        let (_, kernel_options) = self.kernel_options(&[])?;
        let modules = self
            .modules(&[])?
            .map(|(_, desired)| desired)
            .unwrap_or_default();

        let declaration = &self.declaration;
        let mut entry = MenuEntry {
            name: declaration.name.clone(),
            bls: self.bls,
            kernel: self.resolved_path(None, "kernel")?,
            initrd: self.resolved_path(None, "initrd")?,
            kernel_options,
            modules,
            users: AuthorizedUsers::from_declared(declaration.restricted_users()),
            default_entry: declaration.default_entry == Some(true),
            ..Default::default()
        };

        if self.bls {
            entry.classes = declaration
                .classes
                .clone()
                .unwrap_or_else(|| strings(&DEFAULT_BLS_CLASSES));
        } else {
            entry.classes = declaration.classes.clone().unwrap_or_default();
            entry.root = declaration.root.clone();
            entry.load_16bit = declaration.load_16bit.unwrap_or(true);
            entry.load_video = declaration.load_video.unwrap_or(true);
            entry.plugins = declaration
                .plugins
                .clone()
                .unwrap_or_else(|| strings(&DEFAULT_PLUGINS));
        }

        self.entry = entry;
        Ok(())
    }

    fn destroy(&mut self, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        self.destroying = true;
        self.rewrite = true;
        Ok(())
    }

    fn properties(&mut self, _ctx: &mut RunContext) -> Result<Vec<Property>, GrubStateError> {
        let Some(ref current) = self.current else {
            return Ok(Vec::new());
        };
        let declaration = &self.declaration;
        let mut properties = Vec::new();

        if let Some(kernel) = self.resolved_path(current.kernel.as_deref(), "kernel")? {
            properties.push(Property::exact(
                "kernel",
                PropertyValue::optional(current.kernel.clone()),
                PropertyValue::Scalar(kernel),
            ));
        }
        if let Some(initrd) = self.resolved_path(current.initrd.as_deref(), "initrd")? {
            properties.push(Property::exact(
                "initrd",
                PropertyValue::optional(current.initrd.clone()),
                PropertyValue::Scalar(initrd),
            ));
        }

        let (is, should) = self.kernel_options(&current.kernel_options)?;
        properties.push(Property::exact(
            "kernel_options",
            PropertyValue::List(is),
            PropertyValue::List(should),
        ));

        if let Some((is, should)) = self.modules(&current.modules)? {
            properties.push(Property::exact(
                "modules",
                PropertyValue::Nested(is),
                PropertyValue::Nested(should),
            ));
        }

        if let Some(ref classes) = declaration.classes {
            properties.push(Property::new(
                "classes",
                PropertyKind::Unordered,
                PropertyValue::List(current.classes.clone()),
                PropertyValue::List(classes.clone()),
            ));
        }

        properties.push(Property::exact(
            "users",
            PropertyValue::List(current.users.sorted().to_declared()),
            PropertyValue::List(
                AuthorizedUsers::from_declared(declaration.restricted_users()).to_declared(),
            ),
        ));

        if !self.bls {
            if let Some(ref root) = declaration.root {
                properties.push(Property::exact(
                    "root",
                    PropertyValue::optional(current.root.clone()),
                    PropertyValue::scalar(root.clone()),
                ));
            }
            if let Some(load_16bit) = declaration.load_16bit {
                properties.push(Property::exact(
                    "load_16bit",
                    PropertyValue::Flag(current.load_16bit),
                    PropertyValue::Flag(load_16bit),
                ));
            }
            if let Some(load_video) = declaration.load_video {
                properties.push(Property::exact(
                    "load_video",
                    PropertyValue::Flag(current.load_video),
                    PropertyValue::Flag(load_video),
                ));
            }
            if let Some(ref plugins) = declaration.plugins {
                properties.push(Property::exact(
                    "plugins",
                    PropertyValue::List(current.plugins.clone()),
                    PropertyValue::List(plugins.clone()),
                ));
            }
        }

        if declaration.default_entry == Some(true) {
            properties.push(Property::exact(
                "default_entry",
                PropertyValue::Flag(current.default_entry),
                PropertyValue::Flag(true),
            ));
        }

        Ok(properties)
    }

    fn set(&mut self, property: &Property, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        let should = &property.should;
        let entry = &mut self.entry;
        match property.name {
            "kernel" => entry.kernel = should.as_scalar().map(str::to_string),
            "initrd" => entry.initrd = should.as_scalar().map(str::to_string),
            "kernel_options" => entry.kernel_options = should.to_list(),
            "modules" => entry.modules = should.to_nested(),
            "classes" => entry.classes = should.to_list(),
            "users" => entry.users = AuthorizedUsers::from_declared(Some(should.to_list())),
            "root" => entry.root = should.as_scalar().map(str::to_string),
            "load_16bit" => entry.load_16bit = should.as_flag().unwrap_or_default(),
            "load_video" => entry.load_video = should.as_flag().unwrap_or_default(),
            "plugins" => entry.plugins = should.to_list(),
            "default_entry" => {
                entry.default_entry = true;
                return Ok(());
            }
            name => {
                return Err(GrubStateError::new(InternalError::UnknownProperty {
                    property: name,
                    provider: "grub2",
                }))
            }
        }
        self.rewrite = true;
        Ok(())
    }

    fn flush(&mut self, ctx: &mut RunContext) -> Result<(), GrubStateError> {
        let version = bls_version(self.entry.kernel.as_deref().unwrap_or_default());

        if self.rewrite {
            if self.bls {
                self.flush_bls(ctx, &version)?;
            } else {
                self.flush_legacy(ctx, &version)?;
            }
        }

        if !self.destroying && self.declaration.default_entry == Some(true) {
            ctx.queue_set_default(self.entry.default_path());
        }
        Ok(())
    }
}
