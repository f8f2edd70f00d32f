//! Global GRUB settings: variables of /etc/default/grub for GRUB2, and the
//! lines before the first `title` of a legacy menu.lst.

use grubstate_api::{
    config::{GrubConfigDeclaration, ResourceDeclaration},
    constants::ETC_DEFAULT_GRUB,
    error::{GrubStateError, InternalError, InvalidInputError},
};
use osutils::augtree::{Editor, Lens};

use crate::engine::{Property, PropertyValue, Provider, RunContext};

use super::{edited, legacy_menu_path, open, save, target_path, unquote};

fn declaration(resource: &ResourceDeclaration) -> Result<&GrubConfigDeclaration, GrubStateError> {
    match resource {
        ResourceDeclaration::GrubConfig(declaration) => Ok(declaration),
        _ => Err(GrubStateError::internal(
            "grub_config provider built for another resource kind",
        )),
    }
}

fn missing_value(declaration: &GrubConfigDeclaration) -> GrubStateError {
    GrubStateError::new(InvalidInputError::MissingProperty {
        resource: format!("grub_config[{}]", declaration.name),
        property: "value",
    })
}

/// Quotes a shell value unless it already is.
fn quoted(value: &str) -> String {
    if value.starts_with(['"', '\'']) {
        value.to_string()
    } else {
        format!("\"{value}\"")
    }
}

/// A variable of /etc/default/grub.
pub struct Grub2Config {
    declaration: GrubConfigDeclaration,
    editor: Editor,
}

impl Grub2Config {
    pub fn build(
        resource: &ResourceDeclaration,
        ctx: &mut RunContext,
    ) -> Result<Box<dyn Provider>, GrubStateError> {
        let declaration = declaration(resource)?.clone();
        let path = target_path(ctx, declaration.target.as_deref(), ETC_DEFAULT_GRUB);
        Ok(Box::new(Grub2Config {
            editor: open(&path, Lens::Shellvars)?,
            declaration,
        }))
    }

    pub fn instances(ctx: &mut RunContext) -> Result<Vec<ResourceDeclaration>, GrubStateError> {
        let editor = open(&ctx.path(ETC_DEFAULT_GRUB), Lens::Shellvars)?;
        Ok(edited(&editor, editor.entries("*"))?
            .into_iter()
            .map(|(name, value)| {
                ResourceDeclaration::GrubConfig(GrubConfigDeclaration {
                    name,
                    value: value.map(|v| unquote(&v).to_string()),
                    ..Default::default()
                })
            })
            .collect())
    }

    fn write_value(&mut self, value: &str) -> Result<(), GrubStateError> {
        let result = self
            .editor
            .set(&self.declaration.name, Some(quoted(value).as_str()));
        edited(&self.editor, result)
    }
}

impl Provider for Grub2Config {
    fn name(&self) -> &'static str {
        "grub2"
    }

    fn exists(&mut self, _ctx: &mut RunContext) -> Result<bool, GrubStateError> {
        edited(&self.editor, self.editor.exists(&self.declaration.name))
    }

    fn create(&mut self, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        let value = self
            .declaration
            .value
            .clone()
            .ok_or_else(|| missing_value(&self.declaration))?;
        self.write_value(&value)
    }

    fn destroy(&mut self, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        let result = self.editor.rm(&self.declaration.name);
        edited(&self.editor, result).map(|_| ())
    }

    fn properties(&mut self, _ctx: &mut RunContext) -> Result<Vec<Property>, GrubStateError> {
        let Some(ref should) = self.declaration.value else {
            return Ok(Vec::new());
        };
        let is = edited(&self.editor, self.editor.get(&self.declaration.name))?;
        Ok(vec![Property::exact(
            "value",
            PropertyValue::optional(is.as_deref().map(unquote)),
            PropertyValue::scalar(unquote(should)),
        )])
    }

    fn set(&mut self, property: &Property, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        match property.name {
            "value" => {
                let value = self
                    .declaration
                    .value
                    .clone()
                    .ok_or_else(|| missing_value(&self.declaration))?;
                self.write_value(&value)
            }
            name => Err(GrubStateError::new(InternalError::UnknownProperty {
                property: name,
                provider: self.name(),
            })),
        }
    }

    fn flush(&mut self, ctx: &mut RunContext) -> Result<(), GrubStateError> {
        if save(&mut self.editor)? {
            ctx.request_regeneration();
        }
        Ok(())
    }
}

/// A global setting of the GRUB legacy menu.
pub struct LegacyGrubConfig {
    declaration: GrubConfigDeclaration,
    editor: Editor,
}

impl LegacyGrubConfig {
    pub fn build(
        resource: &ResourceDeclaration,
        ctx: &mut RunContext,
    ) -> Result<Box<dyn Provider>, GrubStateError> {
        let declaration = declaration(resource)?.clone();
        let path = legacy_menu_path(ctx, declaration.target.as_deref());
        Ok(Box::new(LegacyGrubConfig {
            editor: open(&path, Lens::GrubMenu)?,
            declaration,
        }))
    }

    pub fn instances(ctx: &mut RunContext) -> Result<Vec<ResourceDeclaration>, GrubStateError> {
        let editor = open(&legacy_menu_path(ctx, None), Lens::GrubMenu)?;
        Ok(editor
            .nodes()
            .iter()
            .filter(|node| node.label != "title" && !node.label.starts_with('#'))
            .map(|node| {
                ResourceDeclaration::GrubConfig(GrubConfigDeclaration {
                    name: node.label.clone(),
                    value: node.value.clone(),
                    ..Default::default()
                })
            })
            .collect())
    }
}

impl Provider for LegacyGrubConfig {
    fn name(&self) -> &'static str {
        "grub"
    }

    fn exists(&mut self, _ctx: &mut RunContext) -> Result<bool, GrubStateError> {
        edited(&self.editor, self.editor.exists(&self.declaration.name))
    }

    /// Settings must come before the first entry.
    fn create(&mut self, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        let name = self.declaration.name.clone();
        if edited(&self.editor, self.editor.exists("title"))? {
            let result = self.editor.insert("title[1]", &name, true);
            edited(&self.editor, result)?;
        }
        let result = self
            .editor
            .set(&name, self.declaration.value.as_deref());
        edited(&self.editor, result)
    }

    fn destroy(&mut self, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        let result = self.editor.rm(&self.declaration.name);
        edited(&self.editor, result).map(|_| ())
    }

    fn properties(&mut self, _ctx: &mut RunContext) -> Result<Vec<Property>, GrubStateError> {
        let Some(ref should) = self.declaration.value else {
            return Ok(Vec::new());
        };
        let is = edited(&self.editor, self.editor.get(&self.declaration.name))?;
        Ok(vec![Property::exact(
            "value",
            PropertyValue::optional(is),
            PropertyValue::scalar(should.clone()),
        )])
    }

    fn set(&mut self, _property: &Property, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        let result = self
            .editor
            .set(&self.declaration.name, self.declaration.value.as_deref());
        edited(&self.editor, result)
    }

    fn flush(&mut self, _ctx: &mut RunContext) -> Result<(), GrubStateError> {
        save(&mut self.editor).map(|_| ())
    }
}
