//! GRUB legacy menu entries, the `title` sections of menu.lst.

use std::collections::BTreeMap;

use anyhow::Error;
use log::debug;

use grubstate_api::{
    config::{MenuEntryDeclaration, ResourceDeclaration},
    constants::PRESERVE,
    error::{GrubStateError, InternalError, InvalidInputError},
};
use osutils::augtree::{Editor, Lens};

use crate::{
    engine::{Property, PropertyValue, Provider, RunContext},
    options::{compute_desired_merge, resolve, MergeRequest},
};

use super::{edited, legacy_menu_path, open, save, value_eq};

const KERNEL: &str = "kernel";
const MODULE: &str = "module";

fn option(label: String, value: Option<String>) -> String {
    match value {
        Some(value) => format!("{label}={value}"),
        None => label,
    }
}

/// Options of the kernel line of the entry at `entry`.
fn kernel_options(editor: &Editor, entry: &str) -> Result<Vec<String>, Error> {
    Ok(editor
        .entries(&format!("{entry}/{KERNEL}/*"))?
        .into_iter()
        .map(|(label, value)| option(label, value))
        .collect())
}

/// Module lines of the entry at `entry`, each its path followed by its
/// options.
fn modules(editor: &Editor, entry: &str) -> Result<Vec<Vec<String>>, Error> {
    let mut modules = Vec::new();
    for i in 1..=editor.count(&format!("{entry}/{MODULE}"))? {
        let module = format!("{entry}/{MODULE}[{i}]");
        let mut set: Vec<String> = editor.get(&module)?.into_iter().collect();
        set.extend(
            editor
                .entries(&format!("{module}/*"))?
                .into_iter()
                .map(|(label, value)| option(label, value)),
        );
        modules.push(set);
    }
    Ok(modules)
}

/// Appends `options` as children of the node at `node`.
fn append_options(editor: &mut Editor, node: &str, options: &[String]) -> Result<(), Error> {
    for option in options {
        let (key, value) = match option.split_once('=') {
            Some((key, value)) => (key, Some(value)),
            None => (option.as_str(), None),
        };
        editor.set(&format!("{node}/{key}[last()+1]"), value)?;
    }
    Ok(())
}

fn write_kernel_options(editor: &mut Editor, entry: &str, options: &[String]) -> Result<(), Error> {
    editor.rm(&format!("{entry}/{KERNEL}/*"))?;
    append_options(editor, &format!("{entry}/{KERNEL}"), options)
}

fn write_modules(editor: &mut Editor, entry: &str, modules: &[Vec<String>]) -> Result<(), Error> {
    editor.rm(&format!("{entry}/{MODULE}"))?;
    for set in modules {
        let Some((path, options)) = set.split_first() else {
            continue;
        };
        editor.set(&format!("{entry}/{MODULE}[last()+1]"), Some(path.as_str()))?;
        append_options(editor, &format!("{entry}/{MODULE}[last()]"), options)?;
    }
    Ok(())
}

/// Zero-based index of the default entry, `default` defaulting to the first.
pub(super) fn default_index(editor: &Editor) -> Result<usize, Error> {
    Ok(editor
        .get("default")?
        .and_then(|d| d.trim().parse().ok())
        .unwrap_or_default())
}

fn set_default(editor: &mut Editor, index: usize) -> Result<(), Error> {
    if !editor.exists("default")? && editor.exists("title")? {
        editor.insert("title[1]", "default", true)?;
    }
    editor.set("default", Some(index.to_string().as_str()))
}

pub struct LegacyMenuEntry {
    declaration: MenuEntryDeclaration,
    editor: Editor,

    /// Path of the entry in the menu tree.
    entry: String,

    /// Fields of the default entry as reported by grubby.
    default_info: BTreeMap<String, String>,
    default_kernel: Option<String>,
    default_options: Vec<String>,

    creating: bool,
}

impl LegacyMenuEntry {
    pub fn build(
        resource: &ResourceDeclaration,
        ctx: &mut RunContext,
    ) -> Result<Box<dyn Provider>, GrubStateError> {
        let ResourceDeclaration::GrubMenuentry(declaration) = resource else {
            return Err(GrubStateError::internal(
                "grub_menuentry provider built for another resource kind",
            ));
        };

        let editor = open(
            &legacy_menu_path(ctx, declaration.target.as_deref()),
            Lens::GrubMenu,
        )?;
        let default_info = ctx.tools().default_entry_info(true);

        let default_entry = format!(
            "title[{}]",
            edited(&editor, default_index(&editor))? + 1
        );
        let default_options = edited(&editor, kernel_options(&editor, &default_entry))?;
        debug!(
            "Default entry of '{}' has options {default_options:?}",
            editor.path().display()
        );

        Ok(Box::new(LegacyMenuEntry {
            entry: format!("title{}", value_eq(&declaration.name)),
            declaration: declaration.clone(),
            default_kernel: default_info.get("kernel").cloned(),
            default_info,
            default_options,
            editor,
            creating: false,
        }))
    }

    pub fn instances(ctx: &mut RunContext) -> Result<Vec<ResourceDeclaration>, GrubStateError> {
        let editor = open(&legacy_menu_path(ctx, None), Lens::GrubMenu)?;
        let result = Self::discover(&editor);
        edited(&editor, result)
    }

    fn discover(editor: &Editor) -> Result<Vec<ResourceDeclaration>, Error> {
        let default = default_index(editor)?;
        let mut resources = Vec::new();

        for (index, (_, name)) in editor.entries("title")?.into_iter().enumerate() {
            let entry = format!("title[{}]", index + 1);
            let kernel = editor.get(&format!("{entry}/{KERNEL}"))?;
            let modules = modules(editor, &entry)?;

            resources.push(ResourceDeclaration::GrubMenuentry(MenuEntryDeclaration {
                name: name.unwrap_or_default(),
                root: editor.get(&format!("{entry}/root"))?,
                kernel_options: match kernel {
                    Some(_) => kernel_options(editor, &entry)?,
                    None => Vec::new(),
                },
                kernel,
                initrd: editor.get(&format!("{entry}/initrd"))?,
                modules: (!modules.is_empty()).then_some(modules),
                default_entry: Some(index == default),
                makeactive: Some(editor.exists(&format!("{entry}/makeactive"))?),
                ..Default::default()
            }));
        }

        Ok(resources)
    }

    fn missing(&self, property: &'static str) -> GrubStateError {
        GrubStateError::new(InvalidInputError::MissingProperty {
            resource: format!("grub_menuentry[{}]", self.declaration.name),
            property,
        })
    }

    fn get(&self, property: &str) -> Result<Option<String>, GrubStateError> {
        edited(
            &self.editor,
            self.editor.get(&format!("{}/{property}", self.entry)),
        )
    }

    fn set_node(&mut self, property: &str, value: Option<&str>) -> Result<(), GrubStateError> {
        let result = self
            .editor
            .set(&format!("{}/{property}", self.entry), value);
        edited(&self.editor, result)
    }

    /// Zero-based position of the entry among the titles.
    fn index(&self) -> Result<Option<usize>, GrubStateError> {
        let titles = edited(&self.editor, self.editor.entries("title"))?;
        Ok(titles
            .iter()
            .position(|(_, name)| name.as_deref() == Some(self.declaration.name.as_str())))
    }

    fn resolved_path(
        &self,
        current: Option<&str>,
        flavor: &str,
    ) -> Result<Option<String>, GrubStateError> {
        let declared = match flavor {
            KERNEL => self.declaration.kernel.as_deref(),
            _ => self.declaration.initrd.as_deref(),
        };
        declared
            .map(|desired| resolve(current, desired, &self.default_info, flavor))
            .transpose()
    }

    fn seed_defaults(&self) -> bool {
        self.creating && self.declaration.add_defaults_on_creation
    }

    /// Multiboot entries do not inherit the options of the default entry.
    fn desired_kernel_options(&self, current: &[String]) -> (Vec<String>, Vec<String>) {
        let defaults: &[String] = if self.declaration.has_modules() {
            &[]
        } else {
            &self.default_options
        };
        let outcome = compute_desired_merge(MergeRequest {
            current,
            desired: &self.declaration.kernel_options,
            defaults,
            seed_defaults_on_create: self.seed_defaults(),
        });
        (outcome.current, outcome.desired)
    }

    /// `:defaults:` in a module set stands for the default kernel followed
    /// by its options.
    fn desired_modules(
        &self,
        current: &[Vec<String>],
    ) -> Option<(Vec<Vec<String>>, Vec<Vec<String>>)> {
        let declared = self.declaration.modules.as_ref()?;
        let defaults: Vec<String> = self
            .default_kernel
            .iter()
            .chain(self.default_options.iter())
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
            .map(|set| {
                compute_desired_merge(MergeRequest {
                    current: set,
                    desired: &[PRESERVE.to_string()],
                    defaults: &[],
                    seed_defaults_on_create: false,
                })
                .current
            })
            .collect();

        Some((current, desired))
    }

    fn write_kernel_options(&mut self, options: &[String]) -> Result<(), GrubStateError> {
        let result = write_kernel_options(&mut self.editor, &self.entry, options);
        edited(&self.editor, result)
    }

    fn write_modules(&mut self, modules: &[Vec<String>]) -> Result<(), GrubStateError> {
        let result = write_modules(&mut self.editor, &self.entry, modules);
        edited(&self.editor, result)
    }

    fn make_default(&mut self) -> Result<(), GrubStateError> {
        let Some(index) = self.index()? else {
            return Err(GrubStateError::internal(
                "Menu entry disappeared before it was made the default",
            ));
        };
        let result = set_default(&mut self.editor, index);
        edited(&self.editor, result)
    }

    fn set_makeactive(&mut self, makeactive: bool) -> Result<(), GrubStateError> {
        if makeactive {
            self.set_node("makeactive", None)
        } else {
            let result = self.editor.rm(&format!("{}/makeactive", self.entry));
            edited(&self.editor, result).map(|_| ())
        }
    }

    /// Moves `default` so it keeps pointing at the same entry after an entry
    /// is inserted (`inserted`) or removed at `position`.
    fn shift_default(&mut self, position: usize, inserted: bool) -> Result<(), GrubStateError> {
        if !edited(&self.editor, self.editor.exists("default"))? {
            return Ok(());
        }
        let default = edited(&self.editor, default_index(&self.editor))?;
        let shifted = match inserted {
            true if position <= default => default + 1,
            false if position < default => default - 1,
            _ => return Ok(()),
        };
        let result = self
            .editor
            .set("default", Some(shifted.to_string().as_str()));
        edited(&self.editor, result)
    }
}

impl Provider for LegacyMenuEntry {
    fn name(&self) -> &'static str {
        "grub"
    }

    fn exists(&mut self, _ctx: &mut RunContext) -> Result<bool, GrubStateError> {
        edited(&self.editor, self.editor.exists(&self.entry))
    }

    /// New entries go first in the menu.
    fn create(&mut self, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        let Some(root) = self.declaration.root.clone() else {
            return Err(self.missing("root"));
        };
        if self.declaration.kernel.is_none() {
            return Err(self.missing("kernel"));
        }
        if self.declaration.initrd.is_none() && !self.declaration.has_modules() {
            return Err(self.missing("initrd"));
        }
        self.creating = true;

        let name = self.declaration.name.clone();
        if edited(&self.editor, self.editor.exists("title"))? {
            let result = self.editor.insert("title[1]", "title", true);
            edited(&self.editor, result)?;
            let result = self.editor.set("title[1]", Some(name.as_str()));
            edited(&self.editor, result)?;
            self.shift_default(0, true)?;
        } else {
            let entry = self.entry.clone();
            let result = self.editor.set(&entry, Some(name.as_str()));
            edited(&self.editor, result)?;
        }

        self.set_node("root", Some(root.as_str()))?;

        let kernel = self.resolved_path(None, KERNEL)?;
        self.set_node(KERNEL, kernel.as_deref())?;
        let (_, options) = self.desired_kernel_options(&[]);
        self.write_kernel_options(&options)?;

        if let Some(initrd) = self.resolved_path(None, "initrd")? {
            self.set_node("initrd", Some(initrd.as_str()))?;
        }

        if let Some((_, modules)) = self.desired_modules(&[]) {
            self.write_modules(&modules)?;
        }

        if self.declaration.makeactive == Some(true) {
            self.set_makeactive(true)?;
        }

        if self.declaration.default_entry == Some(true) {
            self.make_default()?;
        }

        Ok(())
    }

    fn destroy(&mut self, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        let position = self.index()?;
        let entry = self.entry.clone();
        let result = self.editor.rm(&entry);
        edited(&self.editor, result)?;
        if let Some(position) = position {
            self.shift_default(position, false)?;
        }
        Ok(())
    }

    fn properties(&mut self, _ctx: &mut RunContext) -> Result<Vec<Property>, GrubStateError> {
        let mut properties = Vec::new();

        if let Some(ref root) = self.declaration.root {
            properties.push(Property::exact(
                "root",
                PropertyValue::optional(self.get("root")?),
                PropertyValue::scalar(root.clone()),
            ));
        }

        let kernel = self.get(KERNEL)?;
        if let Some(should) = self.resolved_path(kernel.as_deref(), KERNEL)? {
            properties.push(Property::exact(
                KERNEL,
                PropertyValue::optional(kernel),
                PropertyValue::Scalar(should),
            ));
        }

        let current = edited(&self.editor, kernel_options(&self.editor, &self.entry))?;
        let (is, should) = self.desired_kernel_options(&current);
        properties.push(Property::exact(
            "kernel_options",
            PropertyValue::List(is),
            PropertyValue::List(should),
        ));

        let initrd = self.get("initrd")?;
        if let Some(should) = self.resolved_path(initrd.as_deref(), "initrd")? {
            properties.push(Property::exact(
                "initrd",
                PropertyValue::optional(initrd),
                PropertyValue::Scalar(should),
            ));
        }

        let current = edited(&self.editor, modules(&self.editor, &self.entry))?;
        if let Some((is, should)) = self.desired_modules(&current) {
            properties.push(Property::exact(
                "modules",
                PropertyValue::Nested(is),
                PropertyValue::Nested(should),
            ));
        }

        if let Some(makeactive) = self.declaration.makeactive {
            let current = edited(
                &self.editor,
                self.editor.exists(&format!("{}/makeactive", self.entry)),
            )?;
            properties.push(Property::exact(
                "makeactive",
                PropertyValue::Flag(current),
                PropertyValue::Flag(makeactive),
            ));
        }

        if self.declaration.default_entry == Some(true) {
            let default = edited(&self.editor, default_index(&self.editor))?;
            properties.push(Property::exact(
                "default_entry",
                PropertyValue::Flag(self.index()? == Some(default)),
                PropertyValue::Flag(true),
            ));
        }

        Ok(properties)
    }

    fn set(&mut self, property: &Property, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        let should = &property.should;
        match property.name {
            "root" | KERNEL | "initrd" => self.set_node(property.name, should.as_scalar()),
            "kernel_options" => self.write_kernel_options(&should.to_list()),
            "modules" => self.write_modules(&should.to_nested()),
            "makeactive" => self.set_makeactive(should.as_flag().unwrap_or_default()),
            "default_entry" => self.make_default(),
            name => Err(GrubStateError::new(InternalError::UnknownProperty {
                property: name,
                provider: "grub",
            })),
        }
    }

    fn flush(&mut self, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        save(&mut self.editor).map(|_| ())
    }
}
