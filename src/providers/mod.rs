//! Implementations of the resource kinds, one module per kind.

use std::path::{Path, PathBuf};

use anyhow::Error;
use log::debug;

use grubstate_api::{
    constants::{GRUB_LEGACY_EFI_CONF, GRUB_LEGACY_MENU_LST},
    error::{GrubStateError, ParseError, ReportError},
};
use osutils::augtree::{Editor, Lens};

use crate::engine::RunContext;

pub mod grub_config;
pub mod grub_user;
pub mod kernel_parameter;
pub mod menuentry_grub2;
pub mod menuentry_legacy;

/// The file a resource edits: its declared target, or `default`, under the
/// managed root.
fn target_path(ctx: &RunContext, target: Option<&Path>, default: &str) -> PathBuf {
    ctx.path(target.unwrap_or(Path::new(default)))
}

/// The GRUB legacy menu: the declared target, the RedHat EFI grub.conf when
/// present, menu.lst otherwise.
fn legacy_menu_path(ctx: &RunContext, target: Option<&Path>) -> PathBuf {
    if let Some(target) = target {
        return ctx.path(target);
    }
    let efi = ctx.path(GRUB_LEGACY_EFI_CONF);
    if efi.exists() {
        efi
    } else {
        ctx.path(GRUB_LEGACY_MENU_LST)
    }
}

fn open(path: &Path, lens: Lens) -> Result<Editor, GrubStateError> {
    Editor::open(path, lens).structured(ParseError::ConfigFile {
        path: path.display().to_string(),
    })
}

/// Lifts a failed tree operation on `editor` into a structured error.
fn edited<T>(editor: &Editor, result: Result<T, Error>) -> Result<T, GrubStateError> {
    result.structured(ParseError::ConfigFile {
        path: editor.path().display().to_string(),
    })
}

/// Saves `editor`, returning whether the file was written.
fn save(editor: &mut Editor) -> Result<bool, GrubStateError> {
    let written = editor.save().structured(ParseError::SaveConfigFile {
        path: editor.path().display().to_string(),
    })?;
    if !written {
        debug!("'{}' already up to date", editor.path().display());
    }
    Ok(written)
}

/// Strips one pair of surrounding quotes.
fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// Path predicate selecting nodes whose value is `value`.
fn value_eq(value: &str) -> String {
    if value.contains('"') {
        format!("[. = '{value}']")
    } else {
        format!("[. = \"{value}\"]")
    }
}

#[cfg(test)]
pub(crate) mod testutils {
    use std::path::Path;

    use grubstate_api::config::{Manifest, ResourceDeclaration};
    use osutils::files;

    use crate::{engine::RunContext, facts::Facts, tools::fake::FakeBootTools};

    pub fn write(root: &Path, path: &str, content: &str) {
        files::write_file(root.join(path.trim_start_matches('/')), 0o644, content.as_bytes())
            .unwrap();
    }

    pub fn read(root: &Path, path: &str) -> String {
        std::fs::read_to_string(root.join(path.trim_start_matches('/'))).unwrap()
    }

    pub fn context(root: &Path, facts: Facts, tools: &FakeBootTools) -> RunContext {
        RunContext::new(root, facts, Box::new(tools.clone()))
    }

    /// Parses a manifest holding a single resource.
    pub fn resource(yaml: &str) -> ResourceDeclaration {
        let mut manifest = Manifest::from_yaml(yaml).unwrap();
        assert_eq!(manifest.resources.len(), 1);
        manifest.resources.remove(0)
    }
}
