//! Placement of kernel command line parameters.
//!
//! GRUB2 keeps the command line in /etc/default/grub, split between
//! `GRUB_CMDLINE_LINUX` (every boot) and `GRUB_CMDLINE_LINUX_DEFAULT`
//! (non-recovery boots). Systems booting BLS snippets read the command line
//! from the `kernelopts` variable of the GRUB environment block.

use anyhow::Error;
use log::trace;

use grubstate_api::{
    config::Bootmode,
    constants::{GRUB_CMDLINE_LINUX, GRUB_CMDLINE_LINUX_DEFAULT, KERNELOPTS},
    error::{GrubStateError, UnsupportedConfigurationError},
};
use osutils::augtree::Editor;

/// Where a provider stores kernel parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdlineStore {
    /// /etc/default/grub, read by grub2-mkconfig.
    DefaultGrub,
    /// `kernelopts` in grubenv.
    Grubenv,
}

impl CmdlineStore {
    fn provider(self) -> &'static str {
        match self {
            CmdlineStore::DefaultGrub => "grub2",
            CmdlineStore::Grubenv => "grub2bls",
        }
    }

    /// Returns the variable holding the parameters of `bootmode`.
    pub fn section(self, bootmode: Bootmode) -> Result<&'static str, GrubStateError> {
        match (self, bootmode) {
            (CmdlineStore::DefaultGrub, Bootmode::All) => Ok(GRUB_CMDLINE_LINUX),
            (CmdlineStore::DefaultGrub, Bootmode::Default | Bootmode::Normal) => {
                Ok(GRUB_CMDLINE_LINUX_DEFAULT)
            }
            (CmdlineStore::Grubenv, Bootmode::Default | Bootmode::Normal) => Ok(KERNELOPTS),
            (store, bootmode) => Err(GrubStateError::new(
                UnsupportedConfigurationError::UnsupportedBootmode {
                    bootmode: bootmode.to_string(),
                    provider: store.provider(),
                },
            )),
        }
    }
}

/// Splits `name=value` into its name and value. Bare flags have no value.
pub fn split_param(word: &str) -> (&str, Option<&str>) {
    match word.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (word, None),
    }
}

fn join_param(name: &str, value: Option<&str>) -> String {
    match value {
        Some(value) => format!("{name}={value}"),
        None => name.to_string(),
    }
}

/// Path of every word of `section` setting `name`.
fn param_path(section: &str, name: &str) -> String {
    format!(
        "{section}/value[.=~regexp('{}(=.*)?')]",
        regex::escape(name)
    )
}

/// Values of every occurrence of `name` in `section`, in order.
pub fn read_param(
    editor: &Editor,
    section: &str,
    name: &str,
) -> Result<Vec<Option<String>>, Error> {
    Ok(editor
        .entries(&param_path(section, name))?
        .into_iter()
        .filter_map(|(_, word)| word)
        .map(|word| split_param(&word).1.map(str::to_string))
        .collect())
}

/// Every parameter of `section` with its values, in order of first
/// appearance.
pub fn list_params(
    editor: &Editor,
    section: &str,
) -> Result<Vec<(String, Vec<Option<String>>)>, Error> {
    let mut params: Vec<(String, Vec<Option<String>>)> = Vec::new();
    for (_, word) in editor.entries(&format!("{section}/value"))? {
        let Some(word) = word else { continue };
        let (name, value) = split_param(&word);
        let value = value.map(str::to_string);
        match params.iter_mut().find(|(n, _)| n == name) {
            Some((_, values)) => values.push(value),
            None => params.push((name.to_string(), vec![value])),
        }
    }
    Ok(params)
}

/// Fills an empty `GRUB_CMDLINE_LINUX_DEFAULT` with the parameters of
/// `GRUB_CMDLINE_LINUX`, leaving out `name`. Without this, kernels installed
/// later would boot without the common parameters.
fn copy_common_params(editor: &mut Editor, name: &str) -> Result<(), Error> {
    if editor.exists(&format!("{GRUB_CMDLINE_LINUX_DEFAULT}/value"))? {
        return Ok(());
    }

    for (_, word) in editor.entries(&format!("{GRUB_CMDLINE_LINUX}/value"))? {
        let Some(word) = word else { continue };
        if split_param(&word).0.trim() == name {
            continue;
        }
        trace!("Copying '{word}' into {GRUB_CMDLINE_LINUX_DEFAULT}");
        editor.set(
            &format!("{GRUB_CMDLINE_LINUX_DEFAULT}/value[last()+1]"),
            Some(word.as_str()),
        )?;
    }
    Ok(())
}

/// Sets `name` in `section` of /etc/default/grub.
///
/// Existing occurrences are overwritten in order, extra occurrences are
/// removed and missing ones appended. Without values, the first occurrence
/// becomes the bare flag and the others are removed.
pub fn write_param(
    editor: &mut Editor,
    section: &str,
    name: &str,
    values: Option<&[String]>,
) -> Result<(), Error> {
    if !editor.exists(section)? {
        editor.set(&format!("{section}/quote"), Some("\""))?;
    }
    if section == GRUB_CMDLINE_LINUX_DEFAULT {
        copy_common_params(editor, name)?;
    }

    let path = param_path(section, name);
    let existing = editor.match_paths(&path)?;
    match values.filter(|v| !v.is_empty()) {
        Some(values) => {
            let mut values = values.iter();
            let mut excess = Vec::new();
            for word_path in existing {
                match values.next() {
                    Some(value) => {
                        let word = join_param(name, Some(value.as_str()));
                        editor.set(&word_path, Some(word.as_str()))?;
                    }
                    None => excess.push(word_path),
                }
            }
            for word_path in excess.iter().rev() {
                editor.rm(word_path)?;
            }
            for value in values {
                let word = join_param(name, Some(value.as_str()));
                editor.set(&format!("{section}/value[last()+1]"), Some(word.as_str()))?;
            }
        }
        None => {
            editor.set(&format!("{path}[1]"), Some(name))?;
            for word_path in existing.iter().skip(1).rev() {
                editor.rm(word_path)?;
            }
        }
    }

    let quote_path = format!("{section}/quote");
    let unquoted = editor.get(&quote_path)?.unwrap_or_default().is_empty();
    if unquoted && editor.count(&format!("{section}/value"))? > 1 {
        editor.set(&quote_path, Some("\""))?;
    }
    Ok(())
}

/// Removes every occurrence of `name` from `section`.
pub fn remove_param(editor: &mut Editor, section: &str, name: &str) -> Result<usize, Error> {
    editor.rm(&param_path(section, name))
}

/// The `kernelopts` command line, grouped by parameter name in order of
/// first appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Kernelopts(Vec<(String, Vec<Option<String>>)>);

impl Kernelopts {
    pub fn parse(cmdline: &str) -> Self {
        let mut opts = Kernelopts::default();
        for word in cmdline.split_whitespace() {
            let (name, value) = split_param(word);
            opts.entry(name).push(value.map(str::to_string));
        }
        opts
    }

    /// Reads `kernelopts` from a grubenv editor. A missing variable is an
    /// empty command line.
    pub fn read(editor: &Editor) -> Result<Self, Error> {
        Ok(Self::parse(&editor.get(KERNELOPTS)?.unwrap_or_default()))
    }

    /// Writes the command line back into a grubenv editor.
    pub fn write(&self, editor: &mut Editor) -> Result<(), Error> {
        editor.set(KERNELOPTS, Some(self.render().as_str()))
    }

    fn entry(&mut self, name: &str) -> &mut Vec<Option<String>> {
        let index = match self.0.iter().position(|(n, _)| n == name) {
            Some(index) => index,
            None => {
                self.0.push((name.to_string(), Vec::new()));
                self.0.len() - 1
            }
        };
        &mut self.0[index].1
    }

    pub fn get(&self, name: &str) -> Option<&[Option<String>]> {
        self.0
            .iter()
            .find(|(n, values)| n == name && !values.is_empty())
            .map(|(_, values)| values.as_slice())
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &[Option<String>])> {
        self.0
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    /// Replaces the values of `name`, keeping its position. No values makes
    /// it a bare flag.
    pub fn set(&mut self, name: &str, values: Option<&[String]>) {
        *self.entry(name) = match values.filter(|v| !v.is_empty()) {
            Some(values) => values.iter().cloned().map(Some).collect(),
            None => vec![None],
        };
    }

    /// Removes `name` entirely, or only the given values of it.
    pub fn remove(&mut self, name: &str, values: Option<&[String]>) {
        match values.filter(|v| !v.is_empty()) {
            Some(values) => {
                if let Some((_, existing)) = self.0.iter_mut().find(|(n, _)| n == name) {
                    existing.retain(|v| !v.as_ref().is_some_and(|v| values.contains(v)));
                }
            }
            None => self.0.retain(|(n, _)| n != name),
        }
    }

    pub fn render(&self) -> String {
        self.0
            .iter()
            .flat_map(|(name, values)| values.iter().map(|v| join_param(name, v.as_deref())))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use grubstate_api::error::ErrorKind;
    use osutils::augtree::Lens;

    use super::*;

    const DEFAULT_GRUB: &str = indoc! {r#"
        GRUB_TIMEOUT=5
        GRUB_CMDLINE_LINUX="crashkernel=auto console=tty0 rhgb quiet console=ttyS0"
        GRUB_DISABLE_RECOVERY="true"
    "#};

    fn editor(text: &str) -> Editor {
        Editor::parse("/etc/default/grub", Lens::ShellvarsList, text).unwrap()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sections() {
        let store = CmdlineStore::DefaultGrub;
        assert_eq!(store.section(Bootmode::All).unwrap(), GRUB_CMDLINE_LINUX);
        assert_eq!(
            store.section(Bootmode::Normal).unwrap(),
            GRUB_CMDLINE_LINUX_DEFAULT
        );
        assert_eq!(
            store.section(Bootmode::Recovery).unwrap_err().kind(),
            &ErrorKind::UnsupportedConfiguration(
                UnsupportedConfigurationError::UnsupportedBootmode {
                    bootmode: "recovery".into(),
                    provider: "grub2",
                }
            )
        );

        let store = CmdlineStore::Grubenv;
        assert_eq!(store.section(Bootmode::Default).unwrap(), KERNELOPTS);
        assert!(store.section(Bootmode::All).is_err());
        assert!(store.section(Bootmode::Recovery).is_err());
    }

    #[test]
    fn test_read_and_list() {
        let editor = editor(DEFAULT_GRUB);
        assert_eq!(
            read_param(&editor, GRUB_CMDLINE_LINUX, "console").unwrap(),
            vec![Some("tty0".to_string()), Some("ttyS0".to_string())]
        );
        assert_eq!(
            read_param(&editor, GRUB_CMDLINE_LINUX, "quiet").unwrap(),
            vec![None]
        );
        assert!(read_param(&editor, GRUB_CMDLINE_LINUX, "splash")
            .unwrap()
            .is_empty());

        let names: Vec<String> = list_params(&editor, GRUB_CMDLINE_LINUX)
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["crashkernel", "console", "rhgb", "quiet"]);
        assert!(list_params(&editor, GRUB_CMDLINE_LINUX_DEFAULT)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_write_overwrites_in_place() {
        let mut editor = editor(DEFAULT_GRUB);
        write_param(
            &mut editor,
            GRUB_CMDLINE_LINUX,
            "console",
            Some(&strings(&["ttyS1,115200"])),
        )
        .unwrap();
        assert!(editor.render().unwrap().contains(
            "GRUB_CMDLINE_LINUX=\"crashkernel=auto console=ttyS1,115200 rhgb quiet\"\n"
        ));

        write_param(
            &mut editor,
            GRUB_CMDLINE_LINUX,
            "console",
            Some(&strings(&["tty0", "ttyS0", "ttyS1"])),
        )
        .unwrap();
        assert!(editor.render().unwrap().contains(
            "GRUB_CMDLINE_LINUX=\"crashkernel=auto console=tty0 rhgb quiet console=ttyS0 console=ttyS1\"\n"
        ));
    }

    #[test]
    fn test_write_bare_flag() {
        let mut editor = editor(DEFAULT_GRUB);
        write_param(&mut editor, GRUB_CMDLINE_LINUX, "console", None).unwrap();
        assert!(editor
            .render()
            .unwrap()
            .contains("GRUB_CMDLINE_LINUX=\"crashkernel=auto console rhgb quiet\"\n"));

        write_param(&mut editor, GRUB_CMDLINE_LINUX, "nomodeset", None).unwrap();
        assert!(editor
            .render()
            .unwrap()
            .contains("GRUB_CMDLINE_LINUX=\"crashkernel=auto console rhgb quiet nomodeset\"\n"));
    }

    #[test]
    fn test_write_default_section_copies_common_params() {
        let mut editor = editor(DEFAULT_GRUB);
        write_param(
            &mut editor,
            GRUB_CMDLINE_LINUX_DEFAULT,
            "console",
            Some(&strings(&["ttyS1"])),
        )
        .unwrap();

        let rendered = editor.render().unwrap();
        assert!(rendered.starts_with(DEFAULT_GRUB));
        assert!(rendered.ends_with(
            "GRUB_CMDLINE_LINUX_DEFAULT=\"crashkernel=auto rhgb quiet console=ttyS1\"\n"
        ));

        // The section is only seeded while empty
        write_param(&mut editor, GRUB_CMDLINE_LINUX_DEFAULT, "splash", None).unwrap();
        assert!(editor.render().unwrap().ends_with(
            "GRUB_CMDLINE_LINUX_DEFAULT=\"crashkernel=auto rhgb quiet console=ttyS1 splash\"\n"
        ));
    }

    #[test]
    fn test_write_quotes_growing_section() {
        let mut editor = editor("GRUB_CMDLINE_LINUX=quiet\n");
        write_param(&mut editor, GRUB_CMDLINE_LINUX, "rhgb", None).unwrap();
        assert_eq!(editor.render().unwrap(), "GRUB_CMDLINE_LINUX=\"quiet rhgb\"\n");
    }

    #[test]
    fn test_write_escapes_name() {
        let mut editor = editor("GRUB_CMDLINE_LINUX=\"rd.lvm.lv=vg/root rdxlvmxlv=1\"\n");
        write_param(
            &mut editor,
            GRUB_CMDLINE_LINUX,
            "rd.lvm.lv",
            Some(&strings(&["vg/swap"])),
        )
        .unwrap();
        assert_eq!(
            editor.render().unwrap(),
            "GRUB_CMDLINE_LINUX=\"rd.lvm.lv=vg/swap rdxlvmxlv=1\"\n"
        );
    }

    #[test]
    fn test_remove() {
        let mut editor = editor(DEFAULT_GRUB);
        assert_eq!(
            remove_param(&mut editor, GRUB_CMDLINE_LINUX, "console").unwrap(),
            2
        );
        assert!(editor
            .render()
            .unwrap()
            .contains("GRUB_CMDLINE_LINUX=\"crashkernel=auto rhgb quiet\"\n"));
        assert_eq!(
            remove_param(&mut editor, GRUB_CMDLINE_LINUX, "console").unwrap(),
            0
        );
    }

    #[test]
    fn test_kernelopts() {
        let mut opts = Kernelopts::parse("root=/dev/sda1 ro console=tty0 quiet console=ttyS0 ");
        assert_eq!(
            opts.get("console").unwrap(),
            &[Some("tty0".to_string()), Some("ttyS0".to_string())][..]
        );
        assert_eq!(opts.get("ro").unwrap(), &[None][..]);
        assert_eq!(opts.get("splash"), None);

        opts.set("console", Some(&strings(&["ttyS1"])));
        opts.set("splash", None);
        assert_eq!(
            opts.render(),
            "root=/dev/sda1 ro console=ttyS1 quiet splash"
        );

        opts.remove("quiet", None);
        opts.remove("console", Some(&strings(&["ttyS1"])));
        assert_eq!(opts.get("console"), None);
        assert_eq!(opts.render(), "root=/dev/sda1 ro splash");

        let names: Vec<&str> = opts.params().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["root", "ro", "splash"]);
    }

    #[test]
    fn test_kernelopts_in_grubenv() {
        let mut editor = Editor::parse(
            "/boot/grub2/grubenv",
            Lens::Simplevars,
            "# GRUB Environment Block\nsaved_entry=abc\nkernelopts=root=/dev/sda1 ro\n",
        )
        .unwrap();
        let mut opts = Kernelopts::read(&editor).unwrap();
        opts.set("quiet", None);
        opts.write(&mut editor).unwrap();
        assert_eq!(
            editor.render().unwrap(),
            "# GRUB Environment Block\nsaved_entry=abc\nkernelopts=root=/dev/sda1 ro quiet\n"
        );
    }
}
