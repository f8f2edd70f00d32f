//! Kernel command line parameters, kept in /etc/default/grub, in the
//! `kernelopts` variable of grubenv on BLS systems, or on the kernel lines
//! of the GRUB legacy menu.

use anyhow::Error;
use log::debug;

use grubstate_api::{
    config::{Bootmode, Ensure, KernelParameterDeclaration, ResourceDeclaration},
    constants::{ETC_DEFAULT_GRUB, GRUBENV_PATH},
    error::GrubStateError,
};
use osutils::augtree::{Editor, Lens};

use crate::{
    engine::{Property, PropertyValue, Provider, RunContext},
    kernel_params::{self, CmdlineStore, Kernelopts},
};

use super::{
    edited, legacy_menu_path, menuentry_legacy::default_index, open, save, target_path,
};

fn declaration(
    resource: &ResourceDeclaration,
) -> Result<&KernelParameterDeclaration, GrubStateError> {
    match resource {
        ResourceDeclaration::KernelParameter(declaration) => Ok(declaration),
        _ => Err(GrubStateError::internal(
            "kernel_parameter provider built for another resource kind",
        )),
    }
}

/// The values of a parameter as a property: absent for a bare flag, a
/// scalar for one value, a list otherwise.
fn collapse<'a>(values: impl IntoIterator<Item = &'a str>) -> PropertyValue {
    let mut values: Vec<String> = values.into_iter().map(str::to_string).collect();
    match values.len() {
        0 => PropertyValue::Absent,
        1 => PropertyValue::Scalar(values.remove(0)),
        _ => PropertyValue::List(values),
    }
}

/// A parameter as listed from the system.
fn discovered(name: &str, values: &[Option<String>], bootmode: Bootmode) -> ResourceDeclaration {
    let values: Vec<String> = values.iter().flatten().cloned().collect();
    ResourceDeclaration::KernelParameter(KernelParameterDeclaration {
        name: name.to_string(),
        value: (!values.is_empty()).then_some(values),
        bootmode: Some(bootmode),
        ..Default::default()
    })
}

/// A parameter of a `GRUB_CMDLINE_LINUX*` variable in /etc/default/grub.
pub struct Grub2KernelParameter {
    declaration: KernelParameterDeclaration,
    section: &'static str,
    editor: Editor,
}

impl Grub2KernelParameter {
    pub fn build(
        resource: &ResourceDeclaration,
        ctx: &mut RunContext,
    ) -> Result<Box<dyn Provider>, GrubStateError> {
        let declaration = declaration(resource)?.clone();
        let section = CmdlineStore::DefaultGrub.section(declaration.bootmode())?;
        let path = target_path(ctx, declaration.target.as_deref(), ETC_DEFAULT_GRUB);
        debug!(
            "Managing kernel parameter '{}' in {section} of '{}'",
            declaration.param_name(),
            path.display()
        );
        Ok(Box::new(Grub2KernelParameter {
            editor: open(&path, Lens::ShellvarsList)?,
            declaration,
            section,
        }))
    }

    pub fn instances(ctx: &mut RunContext) -> Result<Vec<ResourceDeclaration>, GrubStateError> {
        let editor = open(&ctx.path(ETC_DEFAULT_GRUB), Lens::ShellvarsList)?;
        let mut resources = Vec::new();
        for bootmode in [Bootmode::All, Bootmode::Default, Bootmode::Normal] {
            let section = CmdlineStore::DefaultGrub.section(bootmode)?;
            for (name, values) in edited(&editor, kernel_params::list_params(&editor, section))? {
                resources.push(discovered(&name, &values, bootmode));
            }
        }
        Ok(resources)
    }

    fn current(&self) -> Result<Vec<Option<String>>, GrubStateError> {
        edited(
            &self.editor,
            kernel_params::read_param(&self.editor, self.section, self.declaration.param_name()),
        )
    }

    fn write(&mut self) -> Result<(), GrubStateError> {
        let result = kernel_params::write_param(
            &mut self.editor,
            self.section,
            self.declaration.param_name(),
            self.declaration.values(),
        );
        edited(&self.editor, result)
    }
}

impl Provider for Grub2KernelParameter {
    fn name(&self) -> &'static str {
        "grub2"
    }

    fn exists(&mut self, _ctx: &mut RunContext) -> Result<bool, GrubStateError> {
        Ok(!self.current()?.is_empty())
    }

    fn create(&mut self, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        self.write()
    }

    fn destroy(&mut self, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        let result = kernel_params::remove_param(
            &mut self.editor,
            self.section,
            self.declaration.param_name(),
        );
        edited(&self.editor, result).map(|_| ())
    }

    fn properties(&mut self, _ctx: &mut RunContext) -> Result<Vec<Property>, GrubStateError> {
        let Some(should) = self.declaration.values() else {
            return Ok(Vec::new());
        };
        let is = self.current()?;
        Ok(vec![Property::exact(
            "value",
            collapse(is.iter().flatten().map(String::as_str)),
            collapse(should.iter().map(String::as_str)),
        )])
    }

    fn set(&mut self, _property: &Property, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        self.write()
    }

    fn flush(&mut self, ctx: &mut RunContext) -> Result<(), GrubStateError> {
        if save(&mut self.editor)? {
            ctx.request_regeneration();
        }
        Ok(())
    }
}

/// A parameter of `kernelopts` in grubenv, read by every BLS entry that
/// refers to `$kernelopts`.
pub struct BlsKernelParameter {
    declaration: KernelParameterDeclaration,
    editor: Editor,
    opts: Kernelopts,
}

impl BlsKernelParameter {
    pub fn build(
        resource: &ResourceDeclaration,
        ctx: &mut RunContext,
    ) -> Result<Box<dyn Provider>, GrubStateError> {
        let declaration = declaration(resource)?.clone();
        CmdlineStore::Grubenv.section(declaration.bootmode())?;
        let path = target_path(ctx, declaration.target.as_deref(), GRUBENV_PATH);
        let editor = open(&path, Lens::Simplevars)?;
        let opts = edited(&editor, Kernelopts::read(&editor))?;
        Ok(Box::new(BlsKernelParameter {
            declaration,
            editor,
            opts,
        }))
    }

    pub fn instances(ctx: &mut RunContext) -> Result<Vec<ResourceDeclaration>, GrubStateError> {
        let editor = open(&ctx.path(GRUBENV_PATH), Lens::Simplevars)?;
        let opts = edited(&editor, Kernelopts::read(&editor))?;
        let mut params: Vec<(&str, &[Option<String>])> = opts.params().collect();
        params.sort_by_key(|(name, _)| *name);
        Ok(params
            .into_iter()
            .map(|(name, values)| discovered(name, values, Bootmode::Default))
            .collect())
    }
}

impl Provider for BlsKernelParameter {
    fn name(&self) -> &'static str {
        "grub2bls"
    }

    fn exists(&mut self, _ctx: &mut RunContext) -> Result<bool, GrubStateError> {
        Ok(self.opts.get(self.declaration.param_name()).is_some())
    }

    fn create(&mut self, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        self.opts
            .set(self.declaration.param_name(), self.declaration.values());
        Ok(())
    }

    /// Removes the declared values only, or the whole parameter when none
    /// are declared.
    fn destroy(&mut self, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        self.opts
            .remove(self.declaration.param_name(), self.declaration.values());
        Ok(())
    }

    fn properties(&mut self, _ctx: &mut RunContext) -> Result<Vec<Property>, GrubStateError> {
        let Some(should) = self.declaration.values() else {
            return Ok(Vec::new());
        };
        let is = self
            .opts
            .get(self.declaration.param_name())
            .unwrap_or_default();
        Ok(vec![Property::exact(
            "value",
            collapse(is.iter().flatten().map(String::as_str)),
            collapse(should.iter().map(String::as_str)),
        )])
    }

    fn set(&mut self, _property: &Property, ctx: &mut RunContext) -> Result<(), GrubStateError> {
        self.create(ctx)
    }

    /// grubenv is read at boot, nothing needs regenerating.
    fn flush(&mut self, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        let result = self.opts.write(&mut self.editor);
        edited(&self.editor, result)?;
        save(&mut self.editor).map(|_| ())
    }
}

/// Kernel options that boot GRUB legacy entries into single-user mode.
const RECOVERY_FLAGS: [&str; 2] = ["S", "single"];

/// A `kernel` line of the GRUB legacy menu.
struct KernelLine {
    path: String,
    recovery: bool,
}

fn kernel_lines(editor: &Editor) -> Result<Vec<KernelLine>, Error> {
    let mut lines = Vec::new();
    for i in 1..=editor.count("title")? {
        let path = format!("title[{i}]/kernel");
        if !editor.exists(&path)? {
            continue;
        }
        let mut recovery = false;
        for flag in RECOVERY_FLAGS {
            recovery |= editor.exists(&format!("{path}/{flag}"))?;
        }
        lines.push(KernelLine { path, recovery });
    }
    Ok(lines)
}

/// Paths of the kernel lines booted in `bootmode`.
fn covered_lines(editor: &Editor, bootmode: Bootmode) -> Result<Vec<String>, Error> {
    let default = format!("title[{}]/kernel", default_index(editor)? + 1);
    Ok(kernel_lines(editor)?
        .into_iter()
        .filter(|line| match bootmode {
            Bootmode::All => true,
            Bootmode::Default => line.path == default,
            Bootmode::Normal => !line.recovery,
            Bootmode::Recovery => line.recovery,
        })
        .map(|line| line.path)
        .collect())
}

fn line_values(editor: &Editor, line: &str, name: &str) -> Result<Vec<Option<String>>, Error> {
    Ok(editor
        .entries(&format!("{line}/{name}"))?
        .into_iter()
        .map(|(_, value)| value)
        .collect())
}

/// Gives `name` the declared values on `line`, reusing existing occurrences
/// in place. Without declared values a missing parameter is added as a bare
/// flag and an existing one is left alone.
fn write_line(
    editor: &mut Editor,
    line: &str,
    name: &str,
    values: Option<&[String]>,
) -> Result<(), Error> {
    let node = format!("{line}/{name}");
    let existing = editor.count(&node)?;
    let Some(values) = values else {
        if existing == 0 {
            editor.set(&format!("{node}[last()+1]"), None)?;
        }
        return Ok(());
    };

    for (i, value) in values.iter().enumerate() {
        if i < existing {
            editor.set(&format!("{node}[{}]", i + 1), Some(value.as_str()))?;
        } else {
            editor.set(&format!("{node}[last()+1]"), Some(value.as_str()))?;
        }
    }
    for i in (values.len() + 1..=existing).rev() {
        editor.rm(&format!("{node}[{i}]"))?;
    }
    Ok(())
}

/// A parameter on the kernel lines of menu.lst. The bootmode picks the
/// lines: all of them, the one of the default entry, or those with or
/// without a single-user flag.
pub struct GrubKernelParameter {
    declaration: KernelParameterDeclaration,
    editor: Editor,
    lines: Vec<String>,
}

impl GrubKernelParameter {
    pub fn build(
        resource: &ResourceDeclaration,
        ctx: &mut RunContext,
    ) -> Result<Box<dyn Provider>, GrubStateError> {
        let declaration = declaration(resource)?.clone();
        let path = legacy_menu_path(ctx, declaration.target.as_deref());
        let editor = open(&path, Lens::GrubMenu)?;
        let lines = edited(&editor, covered_lines(&editor, declaration.bootmode()))?;
        debug!(
            "Managing kernel parameter '{}' on {} kernel line(s) of '{}'",
            declaration.param_name(),
            lines.len(),
            path.display()
        );
        Ok(Box::new(GrubKernelParameter {
            declaration,
            editor,
            lines,
        }))
    }

    pub fn instances(ctx: &mut RunContext) -> Result<Vec<ResourceDeclaration>, GrubStateError> {
        let editor = open(&legacy_menu_path(ctx, None), Lens::GrubMenu)?;
        let result = Self::discover(&editor);
        edited(&editor, result)
    }

    /// Reports every parameter under the bootmode whose kernel lines are
    /// exactly the ones carrying it. Parameters scattered over any other
    /// set of lines are skipped.
    fn discover(editor: &Editor) -> Result<Vec<ResourceDeclaration>, Error> {
        let mut sections = Vec::new();
        for bootmode in [
            Bootmode::All,
            Bootmode::Default,
            Bootmode::Normal,
            Bootmode::Recovery,
        ] {
            sections.push((bootmode, covered_lines(editor, bootmode)?));
        }

        let mut names: Vec<String> = Vec::new();
        for line in &sections[0].1 {
            for (name, _) in editor.entries(&format!("{line}/*"))? {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }

        let mut resources = Vec::new();
        for name in names {
            let mut carrying = Vec::new();
            for line in &sections[0].1 {
                if editor.exists(&format!("{line}/{name}"))? {
                    carrying.push(line.clone());
                }
            }
            let Some((bootmode, _)) = sections.iter().find(|(_, lines)| *lines == carrying) else {
                debug!("Kernel parameter '{name}' matches no bootmode, skipping");
                continue;
            };
            let values = line_values(editor, &carrying[0], &name)?;
            resources.push(discovered(&name, &values, *bootmode));
        }
        Ok(resources)
    }

    fn values(&self) -> Result<Vec<Vec<Option<String>>>, GrubStateError> {
        let name = self.declaration.param_name();
        self.lines
            .iter()
            .map(|line| edited(&self.editor, line_values(&self.editor, line, name)))
            .collect()
    }

    fn write(&mut self) -> Result<(), GrubStateError> {
        let name = self.declaration.param_name().to_string();
        let values = self.declaration.values().map(<[String]>::to_vec);
        for line in self.lines.clone() {
            let result = write_line(&mut self.editor, &line, &name, values.as_deref());
            edited(&self.editor, result)?;
        }
        Ok(())
    }
}

impl Provider for GrubKernelParameter {
    fn name(&self) -> &'static str {
        "grub"
    }

    /// A parameter on only some of the lines counts as missing when declared
    /// present and as present when declared absent.
    fn exists(&mut self, _ctx: &mut RunContext) -> Result<bool, GrubStateError> {
        let values = self.values()?;
        Ok(match self.declaration.ensure {
            Ensure::Absent => values.iter().any(|v| !v.is_empty()),
            Ensure::Present => values.iter().all(|v| !v.is_empty()),
        })
    }

    fn create(&mut self, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        self.write()
    }

    fn destroy(&mut self, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        let name = self.declaration.param_name().to_string();
        for line in self.lines.clone() {
            let result = self.editor.rm(&format!("{line}/{name}"));
            edited(&self.editor, result)?;
        }
        Ok(())
    }

    /// Reports the first line that differs from the declared values.
    fn properties(&mut self, _ctx: &mut RunContext) -> Result<Vec<Property>, GrubStateError> {
        let Some(should) = self.declaration.values() else {
            return Ok(Vec::new());
        };
        let should = collapse(should.iter().map(String::as_str));
        let values = self.values()?;
        let is = values
            .iter()
            .map(|v| collapse(v.iter().flatten().map(String::as_str)))
            .find(|is| *is != should)
            .unwrap_or_else(|| should.clone());
        Ok(vec![Property::exact("value", is, should)])
    }

    fn set(&mut self, _property: &Property, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        self.write()
    }

    /// menu.lst is read at boot, nothing needs regenerating.
    fn flush(&mut self, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        save(&mut self.editor).map(|_| ())
    }
}
